//! Non-blocking HTTP/1.1 GET over TCP or TLS.
//!
//! [`HttpStream`] implements [`Transfer`]: each `perform` does whatever
//! connecting, handshaking, writing and reading its socket allows, and
//! hands decoded body bytes to the receiver as they arrive. It is built for
//! long-lived streaming responses, so nothing is buffered beyond the
//! response head.

pub mod response;
pub mod socket;

use std::collections::VecDeque;
use std::io::{self, Read, Write};
use std::mem;
use std::net::{SocketAddr, TcpStream};
use std::os::fd::AsRawFd;
use std::sync::Arc;
use std::time::{Duration, Instant};

use rustls::pki_types::{CertificateDer, ServerName};
use rustls::{ClientConfig, ClientConnection};
use tracing::{debug, info, trace, warn};
use url::{Host, Position, Url};

use crate::{tls, HttpError, Progress, Receiver, SocketSets, Transfer, TransferError};
use response::{BodyDecoder, ResponseHead};

/// Default time allowed for the TCP connect, across all addresses.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

const READ_BUF_SIZE: usize = 16 * 1024;

/// Request options for [`HttpStream::open`].
#[derive(Debug, Clone)]
pub struct StreamOptions {
    /// Extra request headers, sent after the standard ones
    pub headers: Vec<(String, String)>,

    pub connect_timeout: Duration,

    pub user_agent: String,

    /// Certificates trusted in addition to the Mozilla root set
    pub extra_roots: Vec<CertificateDer<'static>>,
}

impl Default for StreamOptions {
    fn default() -> Self {
        Self {
            headers: Vec::new(),
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            user_agent: concat!("irccloud-osd/", env!("CARGO_PKG_VERSION")).to_string(),
            extra_roots: Vec::new(),
        }
    }
}

impl StreamOptions {
    #[must_use]
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    #[must_use]
    pub fn trust(mut self, root: CertificateDer<'static>) -> Self {
        self.extra_roots.push(root);
        self
    }
}

/// Why `drive` stopped early.
enum Failure<E> {
    Transfer(TransferError),
    Receiver(E),
}

impl<E> From<TransferError> for Failure<E> {
    fn from(err: TransferError) -> Self {
        Self::Transfer(err)
    }
}

impl<E> From<HttpError> for Failure<E> {
    fn from(err: HttpError) -> Self {
        Self::Transfer(err.into())
    }
}

impl<E> From<io::Error> for Failure<E> {
    fn from(err: io::Error) -> Self {
        Self::Transfer(err.into())
    }
}

enum Phase {
    /// Resolved, nothing started yet
    Idle,
    Connecting { tcp: TcpStream, addr: SocketAddr },
    Open(Box<Connection>),
    /// Socket closed; see [`HttpStream::outcome`]
    Finished,
}

/// A streaming GET request.
pub struct HttpStream {
    url: Url,

    /// Host without IPv6 brackets
    host: String,
    options: StreamOptions,
    request: Vec<u8>,
    tls: Option<(Arc<ClientConfig>, ServerName<'static>)>,

    /// Addresses not yet tried
    addrs: VecDeque<SocketAddr>,
    deadline: Option<Instant>,
    last_error: Option<TransferError>,

    phase: Phase,
    outcome: Option<Result<(), TransferError>>,
}

impl HttpStream {
    /// Prepares a GET of `url`, which must be `http` or `https`.
    ///
    /// Name resolution happens here, synchronously. The connect itself
    /// starts on the first `perform`.
    ///
    /// # Errors
    ///
    /// * `HttpError::InvalidUrl` - unsupported scheme or no host
    /// * `TransferError::Resolve` / `NoAddress` - the host did not resolve
    /// * `TransferError::ServerName` - the host is not a valid TLS name
    /// * `TransferError::Tls` - the TLS configuration could not be built
    pub fn open(url: Url, options: StreamOptions) -> Result<Self, TransferError> {
        let invalid = |reason: &str| HttpError::InvalidUrl {
            url: url.to_string(),
            reason: reason.to_string(),
        };

        let secure = match url.scheme() {
            "https" => true,
            "http" => false,
            _ => return Err(invalid("scheme must be http or https").into()),
        };
        let host = match url.host() {
            Some(Host::Domain(name)) => name.to_string(),
            Some(Host::Ipv4(addr)) => addr.to_string(),
            Some(Host::Ipv6(addr)) => addr.to_string(),
            None => return Err(invalid("missing host").into()),
        };

        let addrs: VecDeque<SocketAddr> = url
            .socket_addrs(|| None)
            .map_err(|source| TransferError::Resolve {
                host: host.clone(),
                source,
            })?
            .into();
        if addrs.is_empty() {
            return Err(TransferError::NoAddress(host));
        }
        debug!(%host, addresses = addrs.len(), "Resolved stream host");

        let tls = if secure {
            let name = ServerName::try_from(host.clone())
                .map_err(|_| TransferError::ServerName(host.clone()))?;
            Some((tls::client_config(&options.extra_roots)?, name))
        } else {
            None
        };

        let request = build_request(&url, &options);

        Ok(Self {
            url,
            host,
            options,
            request,
            tls,
            addrs,
            deadline: None,
            last_error: None,
            phase: Phase::Idle,
            outcome: None,
        })
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    /// How the transfer ended, once it has.
    pub fn outcome(&self) -> Option<&Result<(), TransferError>> {
        self.outcome.as_ref()
    }

    /// Takes the final result, leaving the stream without one.
    pub fn take_outcome(&mut self) -> Option<Result<(), TransferError>> {
        self.outcome.take()
    }

    fn finish(&mut self, result: Result<(), TransferError>) {
        self.phase = Phase::Finished;
        if self.outcome.is_none() {
            self.outcome = Some(result);
        }
    }

    /// Starts connecting to the next untried address.
    fn connect_next(&mut self) -> Result<Phase, TransferError> {
        while let Some(addr) = self.addrs.pop_front() {
            match socket::connect_nonblocking(addr) {
                Ok(tcp) => {
                    debug!(%addr, "Connecting");
                    return Ok(Phase::Connecting { tcp, addr });
                }
                Err(source) => {
                    debug!(%addr, error = %source, "Connect failed immediately");
                    self.last_error = Some(TransferError::Connect { addr, source });
                }
            }
        }
        Err(self
            .last_error
            .take()
            .unwrap_or_else(|| TransferError::NoAddress(self.host.clone())))
    }

    fn connection(&self, tcp: TcpStream) -> Result<Connection, TransferError> {
        let tls = match &self.tls {
            Some((config, name)) => {
                let mut conn = ClientConnection::new(Arc::clone(config), name.clone())?;
                conn.writer().write_all(&self.request)?;
                Some(conn)
            }
            None => None,
        };
        let pending = if tls.is_some() {
            Vec::new()
        } else {
            self.request.clone()
        };
        Ok(Connection {
            tcp,
            tls,
            pending,
            written: 0,
            head: Vec::new(),
            body: None,
        })
    }

    fn drive<R: Receiver>(&mut self, receiver: &mut R) -> Result<Progress, Failure<R::Error>> {
        loop {
            match mem::replace(&mut self.phase, Phase::Finished) {
                Phase::Idle => {
                    self.deadline = Some(Instant::now() + self.options.connect_timeout);
                    self.phase = self.connect_next()?;
                }
                Phase::Connecting { tcp, addr } => match socket::poll_connected(&tcp) {
                    Ok(true) => {
                        info!(%addr, url = %self.url, "Connected");
                        self.phase = Phase::Open(Box::new(self.connection(tcp)?));
                    }
                    Ok(false) => {
                        if self.deadline.is_some_and(|d| Instant::now() >= d) {
                            return Err(TransferError::ConnectTimeout(self.options.connect_timeout).into());
                        }
                        self.phase = Phase::Connecting { tcp, addr };
                        return Ok(Progress::Running);
                    }
                    Err(source) => {
                        debug!(%addr, error = %source, "Connect failed");
                        self.last_error = Some(TransferError::Connect { addr, source });
                        self.phase = self.connect_next()?;
                    }
                },
                Phase::Open(mut conn) => {
                    let progress = conn.pump(receiver)?;
                    if progress == Progress::Running {
                        self.phase = Phase::Open(conn);
                    }
                    return Ok(progress);
                }
                Phase::Finished => return Ok(Progress::Finished),
            }
        }
    }
}

impl Transfer for HttpStream {
    fn perform<R: Receiver>(&mut self, receiver: &mut R) -> Result<Progress, R::Error> {
        if self.outcome.is_some() {
            return Ok(Progress::Finished);
        }
        match self.drive(receiver) {
            Ok(Progress::Running) => Ok(Progress::Running),
            Ok(Progress::Finished) => {
                info!(url = %self.url, "Stream ended");
                self.finish(Ok(()));
                Ok(Progress::Finished)
            }
            Err(Failure::Transfer(err)) => {
                warn!(url = %self.url, error = %err, "Stream failed");
                self.finish(Err(err));
                Ok(Progress::Finished)
            }
            Err(Failure::Receiver(err)) => {
                debug!(url = %self.url, "Receiver rejected data, closing stream");
                self.finish(Err(TransferError::Aborted));
                Err(err)
            }
        }
    }

    fn fdset(&self) -> SocketSets {
        let mut sets = SocketSets::default();
        match &self.phase {
            Phase::Idle | Phase::Finished => {}
            Phase::Connecting { tcp, .. } => sets.write.push(tcp.as_raw_fd()),
            Phase::Open(conn) => {
                let fd = conn.tcp.as_raw_fd();
                sets.read.push(fd);
                if conn.wants_write() {
                    sets.write.push(fd);
                }
            }
        }
        sets
    }

    fn timeout(&self) -> Option<Duration> {
        match (&self.phase, self.deadline) {
            (Phase::Connecting { .. }, Some(deadline)) => {
                Some(deadline.saturating_duration_since(Instant::now()))
            }
            _ => None,
        }
    }
}

// ============================================================================
// Connection
// ============================================================================

enum ReadOutcome {
    Data(usize),
    Eof,
    WouldBlock,
}

/// An established connection: request going out, response coming in.
struct Connection {
    tcp: TcpStream,
    tls: Option<ClientConnection>,

    /// Plaintext request bytes for non-TLS connections
    pending: Vec<u8>,
    written: usize,

    /// Response head bytes received so far
    head: Vec<u8>,

    /// Set once the head has been parsed
    body: Option<BodyDecoder>,
}

impl Connection {
    fn wants_write(&self) -> bool {
        match &self.tls {
            Some(conn) => conn.wants_write(),
            None => self.written < self.pending.len(),
        }
    }

    fn pump<R: Receiver>(&mut self, receiver: &mut R) -> Result<Progress, Failure<R::Error>> {
        self.flush()?;

        let mut buf = [0u8; READ_BUF_SIZE];
        loop {
            match self.read(&mut buf)? {
                ReadOutcome::WouldBlock => return Ok(Progress::Running),
                ReadOutcome::Eof => {
                    return match &self.body {
                        Some(body) if body.accepts_eof() => Ok(Progress::Finished),
                        _ => Err(TransferError::UnexpectedEof.into()),
                    };
                }
                ReadOutcome::Data(n) => {
                    if self.ingest(&buf[..n], receiver)? == Progress::Finished {
                        return Ok(Progress::Finished);
                    }
                }
            }
        }
    }

    /// Writes as much pending output as the socket takes.
    fn flush(&mut self) -> Result<(), TransferError> {
        match &mut self.tls {
            Some(conn) => {
                while conn.wants_write() {
                    match conn.write_tls(&mut self.tcp) {
                        Ok(_) => {}
                        Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                        Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                        Err(e) => return Err(e.into()),
                    }
                }
            }
            None => {
                while self.written < self.pending.len() {
                    match self.tcp.write(&self.pending[self.written..]) {
                        Ok(0) => return Err(io::Error::from(io::ErrorKind::WriteZero).into()),
                        Ok(n) => self.written += n,
                        Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                        Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                        Err(e) => return Err(e.into()),
                    }
                }
                if self.written == self.pending.len() && !self.pending.is_empty() {
                    trace!(bytes = self.written, "Request sent");
                    self.pending = Vec::new();
                    self.written = 0;
                }
            }
        }
        Ok(())
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<ReadOutcome, TransferError> {
        let Some(conn) = &mut self.tls else {
            return loop {
                match self.tcp.read(buf) {
                    Ok(0) => break Ok(ReadOutcome::Eof),
                    Ok(n) => break Ok(ReadOutcome::Data(n)),
                    Err(e) if e.kind() == io::ErrorKind::WouldBlock => break Ok(ReadOutcome::WouldBlock),
                    Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                    Err(e) => break Err(e.into()),
                }
            };
        };

        loop {
            match conn.reader().read(buf) {
                // Ok(0) is a clean close_notify
                Ok(0) => return Ok(ReadOutcome::Eof),
                Ok(n) => return Ok(ReadOutcome::Data(n)),
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => {}
                // Peer closed TCP without close_notify
                Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => return Ok(ReadOutcome::Eof),
                Err(e) => return Err(e.into()),
            }

            match conn.read_tls(&mut self.tcp) {
                Ok(_) => {}
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(ReadOutcome::WouldBlock),
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            }
            conn.process_new_packets()?;

            // Handshake and key updates may have queued records to send
            while conn.wants_write() {
                match conn.write_tls(&mut self.tcp) {
                    Ok(_) => {}
                    Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                    Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                    Err(e) => return Err(e.into()),
                }
            }
        }
    }

    /// Feeds received bytes through head parsing and body decoding.
    fn ingest<R: Receiver>(
        &mut self,
        bytes: &[u8],
        receiver: &mut R,
    ) -> Result<Progress, Failure<R::Error>> {
        if self.body.is_some() {
            return self.deliver(bytes, receiver);
        }

        self.head.extend_from_slice(bytes);
        let Some((head, len)) = ResponseHead::parse(&self.head)? else {
            return Ok(Progress::Running);
        };

        let rest = self.head.split_off(len);
        self.head = Vec::new();
        debug!(status = head.status, reason = %head.reason, "Response head received");

        if !head.is_success() {
            return Err(HttpError::Status {
                status: head.status,
                reason: head.reason,
            }
            .into());
        }
        self.body = Some(head.body_decoder()?);
        self.deliver(&rest, receiver)
    }

    fn deliver<R: Receiver>(
        &mut self,
        bytes: &[u8],
        receiver: &mut R,
    ) -> Result<Progress, Failure<R::Error>> {
        let Some(body) = &mut self.body else {
            return Ok(Progress::Running);
        };

        let mut pieces = Vec::new();
        body.decode(bytes, &mut pieces)?;
        for piece in pieces {
            if !piece.is_empty() {
                receiver.on_receive(piece).map_err(Failure::Receiver)?;
            }
        }

        if body.is_done() {
            Ok(Progress::Finished)
        } else {
            Ok(Progress::Running)
        }
    }
}

fn build_request(url: &Url, options: &StreamOptions) -> Vec<u8> {
    let target = &url[Position::BeforePath..Position::AfterQuery];
    let host = url.host_str().unwrap_or_default();
    let authority = match url.port() {
        Some(port) => format!("{host}:{port}"),
        None => host.to_string(),
    };

    let mut request = format!(
        "GET {target} HTTP/1.1\r\nHost: {authority}\r\nUser-Agent: {}\r\nAccept: */*\r\nConnection: close\r\n",
        options.user_agent,
    );
    for (name, value) in &options.headers {
        request.push_str(name);
        request.push_str(": ");
        request.push_str(value);
        request.push_str("\r\n");
    }
    request.push_str("\r\n");
    request.into_bytes()
}
