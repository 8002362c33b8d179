//! The alert rendering seam.

use osd_core::BufferId;
use osd_transport::{Reactor, WatchId};
use tracing::info;

use crate::error::SinkError;

/// Backend that puts alerts in front of the user.
///
/// Sinks key everything by buffer: showing an alert for a key that is
/// already on screen must update it in place.
pub trait AlertSink {
    /// Renders or re-renders the alert for `key`.
    fn show(&mut self, key: BufferId, title: &str, body: &str) -> Result<(), SinkError>;

    /// Installs watches for anything started since the last call.
    ///
    /// Called by the daemon loop after every step, outside of `show`, so
    /// sinks never need the reactor while the stream is being processed.
    fn register(&mut self, _reactor: &mut dyn Reactor) {}

    /// Services a fired watch.
    ///
    /// Returns the keys whose alerts the user dismissed, or `None` if the
    /// watch does not belong to this sink.
    fn on_ready(&mut self, _reactor: &mut dyn Reactor, _watch: WatchId) -> Option<Vec<BufferId>> {
        None
    }

    /// Checks, without blocking, whether the alert for `key` was closed
    /// but the close has not been reported through `on_ready` yet.
    ///
    /// A `true` return is the report: the sink has forgotten the alert and
    /// the next `show` for `key` starts a new one.
    fn poll_dismissed(&mut self, _key: BufferId) -> bool {
        false
    }
}

impl<S: AlertSink + ?Sized> AlertSink for Box<S> {
    fn show(&mut self, key: BufferId, title: &str, body: &str) -> Result<(), SinkError> {
        (**self).show(key, title, body)
    }

    fn register(&mut self, reactor: &mut dyn Reactor) {
        (**self).register(reactor);
    }

    fn on_ready(&mut self, reactor: &mut dyn Reactor, watch: WatchId) -> Option<Vec<BufferId>> {
        (**self).on_ready(reactor, watch)
    }

    fn poll_dismissed(&mut self, key: BufferId) -> bool {
        (**self).poll_dismissed(key)
    }
}

/// Writes alerts to the log instead of the desktop.
///
/// Alerts shown here are never dismissed, so bodies keep growing for the
/// life of the process.
#[derive(Debug, Default)]
pub struct LogSink {
    shown: u64,
}

impl LogSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of `show` calls so far.
    pub fn shown(&self) -> u64 {
        self.shown
    }
}

impl AlertSink for LogSink {
    fn show(&mut self, key: BufferId, title: &str, body: &str) -> Result<(), SinkError> {
        self.shown += 1;
        info!(bid = %key, title, body, "Alert");
        Ok(())
    }
}
