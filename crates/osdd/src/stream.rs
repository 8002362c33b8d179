//! The stream state machine.
//!
//! `StreamHandler` turns body bytes into lines, lines into events, and
//! events into session updates or notifications. It is the only writer of
//! the `SessionState`, and it processes lines strictly in arrival order.

use osd_core::{Decision, Notification, SessionState};
use osd_protocol::{decode_event, LineAssembler, StreamEvent};
use tracing::{debug, info, trace};

use crate::error::StreamError;

/// Receives notifications as the stream produces them.
pub trait Notifier {
    fn notify(&mut self, notification: Notification);
}

/// Line reassembly plus the session it maintains.
#[derive(Debug, Default)]
pub struct StreamHandler {
    lines: LineAssembler,
    session: SessionState,
    records: u64,
}

impl StreamHandler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Accepts one chunk of body bytes.
    ///
    /// Every line the chunk completes is handled before returning; a
    /// trailing partial line stays buffered for the next chunk.
    ///
    /// # Errors
    ///
    /// Returns the first decode failure. Lines after it in the same chunk
    /// are not processed.
    pub fn on_receive(&mut self, chunk: &[u8], notifier: &mut dyn Notifier) -> Result<(), StreamError> {
        self.lines.push(chunk);
        while let Some(line) = self.lines.next_line() {
            self.on_line(&line, notifier)?;
        }
        Ok(())
    }

    /// Handles one complete line (terminator already removed).
    ///
    /// Blank lines are keepalives and are skipped.
    ///
    /// # Errors
    ///
    /// Returns `StreamError::Decode` if the line is not a valid record.
    pub fn on_line(&mut self, line: &[u8], notifier: &mut dyn Notifier) -> Result<(), StreamError> {
        let line = line.trim_ascii();
        if line.is_empty() {
            trace!("Keepalive");
            return Ok(());
        }

        let event = decode_event(line).map_err(|e| StreamError::decode(line, e))?;
        self.records += 1;

        match event {
            StreamEvent::ServerDefined(server) => {
                debug!(cid = %server.cid, name = %server.name, "Server defined");
                self.session.define_server(server);
            }
            StreamEvent::BufferDefined(buffer) => {
                debug!(bid = %buffer.bid, cid = %buffer.cid, name = %buffer.name, kind = %buffer.kind, "Buffer defined");
                self.session.define_buffer(buffer);
            }
            StreamEvent::BacklogComplete => {
                info!(
                    servers = self.session.server_count(),
                    buffers = self.session.buffer_count(),
                    "Backlog complete, notifications live"
                );
                self.session.complete_backlog();
            }
            StreamEvent::Message(record) if !self.session.is_backlog_complete() => {
                trace!(kind = record.kind().unwrap_or("<none>"), "Backlog message skipped");
            }
            StreamEvent::Message(record) => {
                let message = record.decode().map_err(|e| StreamError::decode(line, e))?;
                match self.session.decide(&message) {
                    Decision::Notify(notification) => {
                        debug!(bid = %notification.bid, title = %notification.title, "Notifying");
                        notifier.notify(notification);
                    }
                    Decision::Suppress(reason) => {
                        trace!(bid = %message.bid, %reason, "Message suppressed");
                    }
                }
            }
            StreamEvent::Ignored { kind } => {
                trace!(kind = kind.as_deref().unwrap_or("<none>"), "Ignored record");
            }
        }
        Ok(())
    }

    pub fn session(&self) -> &SessionState {
        &self.session
    }

    /// Number of records decoded so far, keepalives excluded.
    pub fn records(&self) -> u64 {
        self.records
    }

    /// Bytes held back waiting for a line terminator.
    pub fn pending(&self) -> usize {
        self.lines.pending().len()
    }
}
