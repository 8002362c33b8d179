//! Session state and the notification decision.
//!
//! `SessionState` is everything the stream has told us so far: the known
//! connections, the known buffers, and whether backlog replay has ended.
//! It lives for one process run and is only mutated by the stream handler,
//! in stream order.

use std::collections::HashMap;
use std::fmt;

use tracing::trace;

use crate::{BufferId, BufferInfo, ConnectionId, IncomingMessage, ServerInfo};

// ============================================================================
// Decision Types
// ============================================================================

/// An alert-worthy message, ready for the aggregator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    /// Buffer the alert is aggregated under
    pub bid: BufferId,

    /// `"{buffer} ({server})"`
    pub title: String,

    /// The line to append to the alert body
    pub line: String,
}

/// Why a message did not produce a notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Suppressed {
    /// Still replaying history; nothing before `backlog_complete` is new.
    BacklogReplay,

    /// The buffer has not been announced (yet).
    UnknownBuffer,

    /// The buffer's connection has not been announced (yet).
    UnknownServer,

    /// Neither a private message from someone else nor a highlight.
    NotAddressed,
}

impl fmt::Display for Suppressed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let reason = match self {
            Self::BacklogReplay => "backlog replay",
            Self::UnknownBuffer => "unknown buffer",
            Self::UnknownServer => "unknown server",
            Self::NotAddressed => "not addressed to us",
        };
        f.write_str(reason)
    }
}

/// Outcome of running the notification decision on one message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    Notify(Notification),
    Suppress(Suppressed),
}

impl Decision {
    #[must_use]
    pub fn is_notify(&self) -> bool {
        matches!(self, Self::Notify(_))
    }
}

// ============================================================================
// Session State
// ============================================================================

/// Servers, buffers and replay phase for the current stream.
#[derive(Debug, Default)]
pub struct SessionState {
    servers: HashMap<ConnectionId, ServerInfo>,
    buffers: HashMap<BufferId, BufferInfo>,
    backlog_complete: bool,
}

impl SessionState {
    /// Creates an empty session: no servers, no buffers, replaying backlog.
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a server, replacing any previous definition wholesale.
    ///
    /// Returns the previous definition if there was one.
    pub fn define_server(&mut self, server: ServerInfo) -> Option<ServerInfo> {
        self.servers.insert(server.cid, server)
    }

    /// Records a buffer, replacing any previous definition wholesale.
    ///
    /// Returns the previous definition if there was one.
    pub fn define_buffer(&mut self, buffer: BufferInfo) -> Option<BufferInfo> {
        self.buffers.insert(buffer.bid, buffer)
    }

    /// Marks the end of backlog replay. Idempotent.
    pub fn complete_backlog(&mut self) {
        self.backlog_complete = true;
    }

    #[must_use]
    pub fn is_backlog_complete(&self) -> bool {
        self.backlog_complete
    }

    pub fn server(&self, cid: ConnectionId) -> Option<&ServerInfo> {
        self.servers.get(&cid)
    }

    pub fn buffer(&self, bid: BufferId) -> Option<&BufferInfo> {
        self.buffers.get(&bid)
    }

    pub fn server_count(&self) -> usize {
        self.servers.len()
    }

    pub fn buffer_count(&self) -> usize {
        self.buffers.len()
    }

    /// Decides whether `message` should raise an alert.
    ///
    /// Messages notify only after backlog replay, only when both their
    /// buffer and that buffer's server are known, and only when they are
    /// either a private message from someone else or a highlight.
    pub fn decide(&self, message: &IncomingMessage) -> Decision {
        if !self.backlog_complete {
            return Decision::Suppress(Suppressed::BacklogReplay);
        }

        let Some(buffer) = self.buffers.get(&message.bid) else {
            trace!(bid = %message.bid, "Message for unknown buffer");
            return Decision::Suppress(Suppressed::UnknownBuffer);
        };

        let Some(server) = self.servers.get(&buffer.cid) else {
            trace!(bid = %message.bid, cid = %buffer.cid, "Buffer on unknown server");
            return Decision::Suppress(Suppressed::UnknownServer);
        };

        let private = buffer.kind.is_conversation() && !message.from_self;
        if !(private || message.highlight) {
            return Decision::Suppress(Suppressed::NotAddressed);
        }

        Decision::Notify(Notification {
            bid: buffer.bid,
            title: format!("{} ({})", buffer.name, server.name),
            line: message.text.clone(),
        })
    }
}

// ============================================================================
// Tests
// ============================================================================
