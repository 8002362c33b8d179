//! Alert aggregation.
//!
//! One alert per buffer. Qualifying messages append a line to their
//! buffer's alert and re-render it; dismissing an alert clears its lines
//! but keeps the alert, so the next message starts a fresh body under the
//! same identity.
//!
//! - `sink` - the `AlertSink` seam and `LogSink`
//! - `notify_send` - desktop notifications through `notify-send`

mod notify_send;
mod sink;

pub use notify_send::{NotifySendOptions, NotifySendSink};
pub use sink::{AlertSink, LogSink};

use std::collections::HashMap;

use osd_core::{BufferId, Notification};
use tracing::{debug, trace, warn};

use crate::error::SinkError;
use crate::stream::Notifier;

/// Separator between alert lines.
pub const LINE_SEPARATOR: &str = "\n";

// ============================================================================
// Alert
// ============================================================================

/// The aggregated alert for one buffer.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Alert {
    lines: Vec<String>,
    title: String,
    displayed: bool,
}

impl Alert {
    /// The lines joined for display.
    pub fn body(&self) -> String {
        self.lines.join(LINE_SEPARATOR)
    }

    pub fn lines(&self) -> &[String] {
        &self.lines
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    /// Whether the alert is currently on screen.
    pub fn is_displayed(&self) -> bool {
        self.displayed
    }
}

// ============================================================================
// Aggregator
// ============================================================================

/// Owns every alert and the sink that renders them.
pub struct AlertAggregator<S> {
    alerts: HashMap<BufferId, Alert>,
    sink: S,
}

impl<S: AlertSink> AlertAggregator<S> {
    pub fn new(sink: S) -> Self {
        Self {
            alerts: HashMap::new(),
            sink,
        }
    }

    /// Appends `line` to the alert for `key`, creating it if needed.
    ///
    /// The title is overwritten with the latest one. A displayed alert the
    /// sink reports as already closed is dismissed first, so the line
    /// starts a fresh body.
    pub fn update(&mut self, key: BufferId, title: &str, line: &str) {
        if self.alerts.get(&key).is_some_and(Alert::is_displayed) && self.sink.poll_dismissed(key) {
            self.on_dismiss(key);
        }

        let alert = self.alerts.entry(key).or_insert_with(|| {
            trace!(bid = %key, "New alert");
            Alert::default()
        });
        alert.title.clear();
        alert.title.push_str(title);
        alert.lines.push(line.to_string());
    }

    /// Renders the alert for `key`, or re-renders it in place if it is
    /// already displayed.
    ///
    /// # Errors
    ///
    /// Returns the sink's error; the alert keeps its lines and stays
    /// undisplayed so the next `show` tries again.
    pub fn show(&mut self, key: BufferId) -> Result<(), SinkError> {
        let Some(alert) = self.alerts.get_mut(&key) else {
            return Ok(());
        };
        self.sink.show(key, &alert.title, &alert.body())?;
        alert.displayed = true;
        Ok(())
    }

    /// Handles the user closing the alert for `key`.
    pub fn on_dismiss(&mut self, key: BufferId) {
        if let Some(alert) = self.alerts.get_mut(&key) {
            debug!(bid = %key, lines = alert.lines.len(), "Alert dismissed");
            alert.lines.clear();
            alert.displayed = false;
        }
    }

    pub fn alert(&self, key: BufferId) -> Option<&Alert> {
        self.alerts.get(&key)
    }

    /// Current body for `key`, if an alert exists.
    pub fn body(&self, key: BufferId) -> Option<String> {
        self.alerts.get(&key).map(Alert::body)
    }

    pub fn len(&self) -> usize {
        self.alerts.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.alerts.is_empty()
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }

    pub fn sink_mut(&mut self) -> &mut S {
        &mut self.sink
    }
}

impl<S: AlertSink> Notifier for AlertAggregator<S> {
    fn notify(&mut self, notification: Notification) {
        self.update(notification.bid, &notification.title, &notification.line);
        if let Err(e) = self.show(notification.bid) {
            warn!(bid = %notification.bid, error = %e, "Failed to show alert");
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
