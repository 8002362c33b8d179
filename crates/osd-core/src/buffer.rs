//! Buffers: the conversation surfaces within a connection.

use crate::ConnectionId;
use serde::{Deserialize, Serialize};
use std::fmt;

// ============================================================================
// Type-Safe Identifiers
// ============================================================================

/// Identifier of a buffer (`bid` on the wire).
///
/// Also the key alerts are aggregated under: one alert per buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BufferId(i64);

impl BufferId {
    pub const fn new(id: i64) -> Self {
        Self(id)
    }

    pub const fn get(self) -> i64 {
        self.0
    }
}

impl fmt::Display for BufferId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<i64> for BufferId {
    fn from(id: i64) -> Self {
        Self(id)
    }
}

// ============================================================================
// Buffer Kind
// ============================================================================

/// What sort of surface a buffer is.
///
/// Parsed from the wire `buffer_type` string. Unrecognised types are kept
/// verbatim in `Other` so a newer server never breaks decoding.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum BufferKind {
    /// One-to-one private query
    Conversation,
    Channel,
    /// The per-network server console
    Console,
    Other(String),
}

impl BufferKind {
    /// Parses a wire `buffer_type` value.
    pub fn from_wire(kind: &str) -> Self {
        match kind {
            "conversation" => Self::Conversation,
            "channel" => Self::Channel,
            "console" => Self::Console,
            other => Self::Other(other.to_string()),
        }
    }

    /// Returns the wire spelling of this kind.
    pub fn as_str(&self) -> &str {
        match self {
            Self::Conversation => "conversation",
            Self::Channel => "channel",
            Self::Console => "console",
            Self::Other(other) => other,
        }
    }

    #[must_use]
    pub fn is_conversation(&self) -> bool {
        matches!(self, Self::Conversation)
    }
}

impl From<String> for BufferKind {
    fn from(kind: String) -> Self {
        Self::from_wire(&kind)
    }
}

impl From<BufferKind> for String {
    fn from(kind: BufferKind) -> Self {
        kind.as_str().to_string()
    }
}

impl fmt::Display for BufferKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// Buffer Info
// ============================================================================

/// A buffer as announced by a `makebuffer` event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BufferInfo {
    pub bid: BufferId,

    /// Owning connection. May name a server we have not seen yet.
    pub cid: ConnectionId,

    /// Channel name or the nick of the query partner
    pub name: String,

    pub kind: BufferKind,
}

impl BufferInfo {
    pub fn new(bid: BufferId, cid: ConnectionId, name: impl Into<String>, kind: BufferKind) -> Self {
        Self {
            bid,
            cid,
            name: name.into(),
            kind,
        }
    }
}
