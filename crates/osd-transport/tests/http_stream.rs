//! Integration tests for `HttpStream` driven by `Multiplexer` and `PollLoop`.
//!
//! Each test runs a one-shot HTTP server on a loopback listener thread and
//! steps the stream from the test thread exactly as the daemon loop does.
//!
//! Tests CAN use `.unwrap()` and `.expect()`.

use std::io::{Read, Write};
use std::net::TcpListener;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use osd_transport::{HttpStream, Multiplexer, PollLoop, Receiver, StreamOptions, TransferError};
use rcgen::{
    BasicConstraints, CertificateParams, DnType, ExtendedKeyUsagePurpose, IsCa, KeyPair, KeyUsagePurpose,
};
use rustls::pki_types::{CertificateDer, PrivateKeyDer, PrivatePkcs8KeyDer};
use rustls::{ServerConfig, ServerConnection, StreamOwned};
use url::Url;

// ============================================================================
// Constants
// ============================================================================

/// Upper bound on how long a single test transfer may run
const TRANSFER_DEADLINE: Duration = Duration::from_secs(10);

/// Loop wait when the transfer reports no timeout of its own
const IDLE_WAIT: Duration = Duration::from_millis(200);

// ============================================================================
// Test Helpers
// ============================================================================

/// Serves one connection: reads the request head, then writes `response`
/// in small pieces and closes.
fn serve(response: &'static [u8]) -> (Url, JoinHandle<String>) {
    let listener = TcpListener::bind("127.0.0.1:0").expect("bind listener");
    let port = listener.local_addr().expect("local addr").port();

    let handle = thread::spawn(move || {
        let (mut sock, _) = listener.accept().expect("accept");
        let mut request = Vec::new();
        let mut buf = [0u8; 1024];
        while !request.windows(4).any(|w| w == b"\r\n\r\n") {
            let n = sock.read(&mut buf).expect("read request");
            if n == 0 {
                break;
            }
            request.extend_from_slice(&buf[..n]);
        }
        for piece in response.chunks(7) {
            if sock.write_all(piece).is_err() {
                break;
            }
            let _ = sock.flush();
            thread::sleep(Duration::from_millis(1));
        }
        String::from_utf8(request).expect("request is UTF-8")
    });

    let url = Url::parse(&format!("http://127.0.0.1:{port}/chat/stream")).unwrap();
    (url, handle)
}

/// A throwaway CA and a leaf for 127.0.0.1 signed by it.
struct TestPki {
    ca: CertificateDer<'static>,
    leaf: CertificateDer<'static>,
    leaf_key: PrivateKeyDer<'static>,
}

fn test_pki() -> TestPki {
    let ca_key = KeyPair::generate().unwrap();
    let mut ca_params = CertificateParams::new(Vec::<String>::new()).unwrap();
    ca_params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
    ca_params.key_usages = vec![KeyUsagePurpose::KeyCertSign, KeyUsagePurpose::CrlSign];
    ca_params.distinguished_name.push(DnType::CommonName, "irccloud-osd test CA");
    let ca_cert = ca_params.self_signed(&ca_key).unwrap();

    let leaf_key = KeyPair::generate().unwrap();
    let mut leaf_params = CertificateParams::new(vec!["127.0.0.1".to_string()]).unwrap();
    leaf_params.extended_key_usages = vec![ExtendedKeyUsagePurpose::ServerAuth];
    leaf_params.distinguished_name.push(DnType::CommonName, "127.0.0.1");
    let leaf_cert = leaf_params.signed_by(&leaf_key, &ca_cert, &ca_key).unwrap();

    TestPki {
        ca: ca_cert.der().clone(),
        leaf: leaf_cert.der().clone(),
        leaf_key: PrivateKeyDer::Pkcs8(PrivatePkcs8KeyDer::from(leaf_key.serialize_der())),
    }
}

/// Like `serve`, but over TLS with `pki`'s leaf.
///
/// Yields the request, or `None` if the handshake or read failed.
fn serve_tls(pki: &TestPki, response: &'static [u8]) -> (Url, JoinHandle<Option<String>>) {
    let listener = TcpListener::bind("127.0.0.1:0").expect("bind listener");
    let port = listener.local_addr().expect("local addr").port();

    let config = ServerConfig::builder_with_provider(Arc::new(rustls::crypto::ring::default_provider()))
        .with_safe_default_protocol_versions()
        .expect("protocol versions")
        .with_no_client_auth()
        .with_single_cert(vec![pki.leaf.clone()], pki.leaf_key.clone_key())
        .expect("server certificate");

    let handle = thread::spawn(move || {
        let (tcp, _) = listener.accept().expect("accept");
        let conn = ServerConnection::new(Arc::new(config)).expect("server connection");
        let mut tls = StreamOwned::new(conn, tcp);

        let mut request = Vec::new();
        let mut buf = [0u8; 1024];
        while !request.windows(4).any(|w| w == b"\r\n\r\n") {
            match tls.read(&mut buf) {
                Ok(0) | Err(_) => return None,
                Ok(n) => request.extend_from_slice(&buf[..n]),
            }
        }
        let _ = tls.write_all(response);
        tls.conn.send_close_notify();
        let _ = tls.flush();
        String::from_utf8(request).ok()
    });

    let url = Url::parse(&format!("https://127.0.0.1:{port}/chat/stream")).unwrap();
    (url, handle)
}

#[derive(Default)]
struct Collect {
    body: Vec<u8>,
    chunks: usize,
    reject_after: Option<usize>,
}

impl Receiver for Collect {
    type Error = String;

    fn on_receive(&mut self, chunk: &[u8]) -> Result<(), String> {
        if self.reject_after.is_some_and(|limit| self.body.len() >= limit) {
            return Err("enough".to_string());
        }
        self.chunks += 1;
        self.body.extend_from_slice(chunk);
        Ok(())
    }
}

/// Steps the stream to completion; returns it with the receiver's error, if any.
fn run(stream: HttpStream, rx: &mut Collect) -> (HttpStream, Option<String>) {
    let mut mux = Multiplexer::new(stream);
    let mut ev = PollLoop::new();
    let started = Instant::now();

    let mut result = mux.initialize(&mut ev, rx);
    while result.is_ok() && !mux.is_finished() {
        assert!(started.elapsed() < TRANSFER_DEADLINE, "transfer never finished");
        ev.wait(Some(mux.timeout().unwrap_or(IDLE_WAIT))).unwrap();
        result = mux.step(&mut ev, rx);
    }

    // Whatever ended the transfer, nothing is left registered
    assert!(ev.is_empty(), "watches leaked after the transfer ended");
    (mux.into_transfer(), result.err())
}

// ============================================================================
// Tests
// ============================================================================

#[test]
fn test_chunked_stream_delivers_decoded_body() {
    let (url, server) = serve(
        b"HTTP/1.1 200 OK\r\nTransfer-Encoding: chunked\r\n\r\n\
          1b\r\n{\"type\":\"backlog_complete\"}\r\n\
          1\r\n\n\r\n\
          0\r\n\r\n",
    );
    let options = StreamOptions::default().header("Cookie", "session=abc123");
    let stream = HttpStream::open(url, options).unwrap();

    let mut rx = Collect::default();
    let (stream, err) = run(stream, &mut rx);

    assert!(err.is_none());
    assert_eq!(rx.body, b"{\"type\":\"backlog_complete\"}\n");
    assert!(matches!(stream.outcome(), Some(Ok(()))));

    let request = server.join().unwrap();
    assert!(request.starts_with("GET /chat/stream HTTP/1.1\r\n"));
    assert!(request.contains("\r\nCookie: session=abc123\r\n"));
}

#[test]
fn test_content_length_body() {
    let (url, server) = serve(b"HTTP/1.1 200 OK\r\nContent-Length: 11\r\n\r\nhello world");
    let stream = HttpStream::open(url, StreamOptions::default()).unwrap();

    let mut rx = Collect::default();
    let (stream, err) = run(stream, &mut rx);

    assert!(err.is_none());
    assert_eq!(rx.body, b"hello world");
    assert!(matches!(stream.outcome(), Some(Ok(()))));
    server.join().unwrap();
}

#[test]
fn test_error_status_ends_transfer_without_body() {
    let (url, server) = serve(b"HTTP/1.1 404 Not Found\r\nContent-Length: 9\r\n\r\nnot found");
    let stream = HttpStream::open(url, StreamOptions::default()).unwrap();

    let mut rx = Collect::default();
    let (stream, err) = run(stream, &mut rx);

    assert!(err.is_none());
    assert!(rx.body.is_empty());
    match stream.outcome() {
        Some(Err(e)) => assert_eq!(e.http_status(), Some(404)),
        other => panic!("expected HTTP 404 outcome, got {other:?}"),
    }
    server.join().unwrap();
}

#[test]
fn test_truncated_chunked_body_is_unexpected_eof() {
    let (url, server) = serve(b"HTTP/1.1 200 OK\r\nTransfer-Encoding: chunked\r\n\r\n10\r\nonly part");
    let stream = HttpStream::open(url, StreamOptions::default()).unwrap();

    let mut rx = Collect::default();
    let (stream, _) = run(stream, &mut rx);

    assert_eq!(rx.body, b"only part");
    assert!(matches!(stream.outcome(), Some(Err(TransferError::UnexpectedEof))));
    server.join().unwrap();
}

#[test]
fn test_receiver_error_aborts_transfer() {
    let (url, server) = serve(
        b"HTTP/1.1 200 OK\r\nTransfer-Encoding: chunked\r\n\r\n\
          6\r\nfirst \r\n6\r\nsecond\r\n0\r\n\r\n",
    );
    let stream = HttpStream::open(url, StreamOptions::default()).unwrap();

    let mut rx = Collect {
        reject_after: Some(1),
        ..Collect::default()
    };
    let (stream, err) = run(stream, &mut rx);

    assert_eq!(err.as_deref(), Some("enough"));
    assert!(!rx.body.is_empty());
    assert!(matches!(stream.outcome(), Some(Err(TransferError::Aborted))));
    server.join().unwrap();
}

#[test]
fn test_refused_connection_reports_connect_error() {
    // Bind then drop to get a port with nothing listening
    let port = TcpListener::bind("127.0.0.1:0").unwrap().local_addr().unwrap().port();
    let url = Url::parse(&format!("http://127.0.0.1:{port}/")).unwrap();
    let stream = HttpStream::open(url, StreamOptions::default()).unwrap();

    let mut rx = Collect::default();
    let (stream, err) = run(stream, &mut rx);

    assert!(err.is_none());
    assert_eq!(rx.chunks, 0);
    assert!(matches!(stream.outcome(), Some(Err(TransferError::Connect { .. }))));
}

#[test]
fn test_query_stays_out_of_host_header() {
    let (url, server) = serve(b"HTTP/1.1 200 OK\r\nContent-Length: 2\r\n\r\nok");
    let port = url.port().unwrap();
    let url = Url::parse(&format!("http://127.0.0.1:{port}?since=5")).unwrap();
    let stream = HttpStream::open(url, StreamOptions::default()).unwrap();

    let mut rx = Collect::default();
    let (stream, _) = run(stream, &mut rx);
    assert!(matches!(stream.outcome(), Some(Ok(()))));

    let request = server.join().unwrap();
    assert!(request.starts_with("GET /?since=5 HTTP/1.1\r\n"));
    assert!(request.contains(&format!("\r\nHost: 127.0.0.1:{port}\r\n")));
}

#[test]
fn test_tls_stream_with_trusted_root() {
    let pki = test_pki();
    let (url, server) = serve_tls(
        &pki,
        b"HTTP/1.1 200 OK\r\nTransfer-Encoding: chunked\r\n\r\n\
          1b\r\n{\"type\":\"backlog_complete\"}\r\n\
          1\r\n\n\r\n\
          0\r\n\r\n",
    );
    let options = StreamOptions::default()
        .trust(pki.ca.clone())
        .header("Cookie", "session=tls");
    let stream = HttpStream::open(url, options).unwrap();

    let mut rx = Collect::default();
    let (stream, err) = run(stream, &mut rx);

    assert!(err.is_none());
    assert_eq!(rx.body, b"{\"type\":\"backlog_complete\"}\n");
    assert!(matches!(stream.outcome(), Some(Ok(()))));

    let request = server.join().unwrap().expect("server saw a request");
    assert!(request.starts_with("GET /chat/stream HTTP/1.1\r\n"));
    assert!(request.contains("\r\nCookie: session=tls\r\n"));
}

#[test]
fn test_tls_stream_rejects_unknown_issuer() {
    let pki = test_pki();
    let (url, server) = serve_tls(&pki, b"HTTP/1.1 200 OK\r\nContent-Length: 2\r\n\r\nok");
    let stream = HttpStream::open(url, StreamOptions::default()).unwrap();

    let mut rx = Collect::default();
    let (stream, err) = run(stream, &mut rx);

    assert!(err.is_none());
    assert_eq!(rx.chunks, 0);
    assert!(matches!(
        stream.outcome(),
        Some(Err(TransferError::Tls(rustls::Error::InvalidCertificate(_))))
    ));
    assert!(server.join().unwrap().is_none());
}
