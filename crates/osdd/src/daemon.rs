//! The daemon loop.
//!
//! One thread, one `poll(2)` loop. The loop owns the multiplexed stream
//! transfer, the stream handler and the alert aggregator; readiness on the
//! transfer's sockets steps the transfer (which feeds the handler, which
//! feeds the aggregator), and readiness on a sink's descriptors reports
//! dismissals back to the aggregator.
//!
//! ```text
//!            ┌──────────┐  fired   ┌─────────────┐ bytes ┌───────────────┐
//!  poll(2) ─▶│ PollLoop │─────────▶│ Multiplexer │──────▶│ StreamHandler │
//!            └──────────┘          └─────────────┘       └───────┬───────┘
//!                 │ fired (sink)                                 │ notify
//!                 ▼                                              ▼
//!            ┌───────────┐       dismissed keys         ┌─────────────────┐
//!            │ AlertSink │─────────────────────────────▶│ AlertAggregator │
//!            └───────────┘◀─────────────────────────────└─────────────────┘
//!                                    show
//! ```

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use nix::sys::signal::{sigaction, SaFlags, SigAction, SigHandler, SigSet, Signal};
use osd_transport::{HttpStream, Multiplexer, PollLoop, Receiver, StreamOptions, Transfer};
use tracing::{debug, info, trace, warn};

use crate::alert::{AlertAggregator, AlertSink, LogSink, NotifySendSink};
use crate::config::{Config, SinkKind};
use crate::error::{OsdError, Result, StreamError};
use crate::login::LoginClient;
use crate::stream::StreamHandler;

/// Timeout for the login request.
pub const LOGIN_TIMEOUT: Duration = Duration::from_secs(60);

/// Set from the SIGINT/SIGTERM handler; polled by the loop.
static SHUTDOWN: AtomicBool = AtomicBool::new(false);

extern "C" fn on_shutdown_signal(_signal: libc::c_int) {
    SHUTDOWN.store(true, Ordering::SeqCst);
}

/// Routes SIGINT and SIGTERM to the shutdown flag.
///
/// The handler is installed without `SA_RESTART` so a blocked `poll(2)`
/// returns `EINTR` and the loop notices the flag straight away.
pub fn install_signal_handlers() -> std::result::Result<(), nix::Error> {
    let action = SigAction::new(
        SigHandler::Handler(on_shutdown_signal),
        SaFlags::empty(),
        SigSet::empty(),
    );
    for signal in [Signal::SIGINT, Signal::SIGTERM] {
        // SAFETY: the handler only performs an atomic store.
        unsafe { sigaction(signal, &action) }?;
    }
    Ok(())
}

/// Why the loop returned without an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Exit {
    /// The transfer finished; see its outcome
    StreamEnded,
    /// SIGINT/SIGTERM
    Shutdown,
}

/// Receiver handed to the multiplexer: bytes go to the stream handler,
/// notifications to the aggregator.
struct Ingest<'a, S> {
    handler: &'a mut StreamHandler,
    alerts: &'a mut AlertAggregator<S>,
}

impl<S: AlertSink> Receiver for Ingest<'_, S> {
    type Error = StreamError;

    fn on_receive(&mut self, chunk: &[u8]) -> std::result::Result<(), StreamError> {
        self.handler.on_receive(chunk, &mut *self.alerts)
    }
}

/// Everything one run of the notifier owns.
pub struct Daemon<T, S> {
    mux: Multiplexer<T>,
    reactor: PollLoop,
    handler: StreamHandler,
    alerts: AlertAggregator<S>,
    shutdown: &'static AtomicBool,
}

impl<T: Transfer, S: AlertSink> Daemon<T, S> {
    pub fn new(transfer: T, sink: S) -> Self {
        Self {
            mux: Multiplexer::new(transfer),
            reactor: PollLoop::new(),
            handler: StreamHandler::new(),
            alerts: AlertAggregator::new(sink),
            shutdown: &SHUTDOWN,
        }
    }

    /// Uses `flag` instead of the process-wide signal flag.
    #[must_use]
    pub fn with_shutdown_flag(mut self, flag: &'static AtomicBool) -> Self {
        self.shutdown = flag;
        self
    }

    /// Runs until the transfer finishes or a shutdown is requested.
    ///
    /// # Errors
    ///
    /// * `OsdError::Stream` - a stream record failed to decode
    /// * `OsdError::EventLoop` - `poll(2)` failed
    pub fn run(&mut self) -> Result<Exit> {
        self.mux.initialize(
            &mut self.reactor,
            &mut Ingest {
                handler: &mut self.handler,
                alerts: &mut self.alerts,
            },
        )?;
        self.alerts.sink_mut().register(&mut self.reactor);

        loop {
            if self.shutdown.load(Ordering::SeqCst) {
                info!("Shutdown requested");
                self.mux.shutdown(&mut self.reactor);
                return Ok(Exit::Shutdown);
            }
            if self.mux.is_finished() {
                debug!(steps = self.mux.steps(), records = self.handler.records(), "Transfer finished");
                return Ok(Exit::StreamEnded);
            }

            let timeout = self.mux.timeout();
            if self.reactor.is_empty() && timeout.is_none() {
                warn!("Transfer is running but waits on nothing");
                return Ok(Exit::StreamEnded);
            }

            let fired = self.reactor.wait(timeout).map_err(OsdError::EventLoop)?;

            // A timeout lets the transfer check its own deadlines
            let mut step = fired.is_empty() && timeout.is_some();
            for watch in fired {
                if self.mux.owns(watch) {
                    step = true;
                    continue;
                }
                match self.alerts.sink_mut().on_ready(&mut self.reactor, watch) {
                    Some(dismissed) => {
                        for key in dismissed {
                            self.alerts.on_dismiss(key);
                        }
                    }
                    None => trace!(?watch, "Fired watch has no owner"),
                }
            }

            if step {
                self.mux.step(
                    &mut self.reactor,
                    &mut Ingest {
                        handler: &mut self.handler,
                        alerts: &mut self.alerts,
                    },
                )?;
            }
            self.alerts.sink_mut().register(&mut self.reactor);
        }
    }

    pub fn handler(&self) -> &StreamHandler {
        &self.handler
    }

    pub fn alerts(&self) -> &AlertAggregator<S> {
        &self.alerts
    }

    pub fn reactor(&self) -> &PollLoop {
        &self.reactor
    }

    pub fn into_transfer(self) -> T {
        self.mux.into_transfer()
    }
}

/// Logs in, opens the stream and runs the loop until it ends.
///
/// # Errors
///
/// Everything the loop can fail with, plus login failures and a failed
/// transfer outcome. A shutdown by signal is not an error.
pub fn run(config: &Config) -> Result<()> {
    install_signal_handlers()?;

    let session = LoginClient::new(&config.base_url, LOGIN_TIMEOUT)?.login(&config.credentials)?;

    let url = config.stream_url()?;
    let options = StreamOptions {
        connect_timeout: config.connect_timeout,
        ..StreamOptions::default()
    }
    .header("Cookie", format!("session={session}"));
    let stream = HttpStream::open(url, options)?;
    info!(url = %stream.url(), sink = %config.sink, "Opening stream");

    let sink: Box<dyn AlertSink> = match config.sink {
        SinkKind::Desktop => Box::new(NotifySendSink::new(config.notifier.clone())),
        SinkKind::Log => Box::new(LogSink::new()),
    };

    let mut daemon = Daemon::new(stream, sink);
    let exit = daemon.run()?;
    let mut stream = daemon.into_transfer();

    match (exit, stream.take_outcome()) {
        (Exit::Shutdown, _) => Ok(()),
        (Exit::StreamEnded, Some(Err(e))) => Err(e.into()),
        (Exit::StreamEnded, _) => {
            info!("Stream closed by server");
            Ok(())
        }
    }
}
