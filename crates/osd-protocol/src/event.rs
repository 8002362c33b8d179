//! Decoding stream records into events.
//!
//! Each line of the stream body is one JSON object with a `type` field.
//! Only a handful of types matter for notifications; everything else is
//! decoded as `StreamEvent::Ignored` so new server-side event types never
//! break the client.

use osd_core::{BufferId, BufferInfo, BufferKind, ConnectionId, IncomingMessage, ServerInfo};
use serde::Deserialize;
use serde_json::{Map, Value};

use crate::ProtocolError;

/// Event type announcing a connection.
pub const MAKESERVER: &str = "makeserver";

/// Event type announcing a buffer.
pub const MAKEBUFFER: &str = "makebuffer";

/// One-time marker: history replay is over, later events are live.
pub const BACKLOG_COMPLETE: &str = "backlog_complete";

/// A decoded stream record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamEvent {
    ServerDefined(ServerInfo),
    BufferDefined(BufferInfo),
    BacklogComplete,

    /// Any record carrying a `msg` payload, not yet decoded.
    Message(MessageRecord),

    /// Everything else, with its `type` if it had one.
    Ignored { kind: Option<String> },
}

// ============================================================================
// Raw Wire Structures
// ============================================================================

/// Raw `makeserver` record.
///
/// ```json
/// {"bid":-1, "eid":-1, "type":"makeserver", "cid":1709, "name":"IRCCloud",
///  "nick":"ebroder", "hostname":"irc.irccloud.com", "port":6667,
///  "ssl":false, "disconnected":false, ...}
/// ```
///
/// Only `cid` is required. The descriptive fields are taken as whatever
/// JSON the server sent and converted leniently.
#[derive(Debug, Clone, Deserialize)]
pub struct RawServer {
    pub cid: i64,
    #[serde(default)]
    pub name: Option<Value>,
    #[serde(default)]
    pub nick: Option<Value>,
    #[serde(default)]
    pub hostname: Option<Value>,
    #[serde(default)]
    pub port: Option<Value>,
    #[serde(default)]
    pub ssl: Option<Value>,
    #[serde(default)]
    pub disconnected: Option<Value>,
}

impl RawServer {
    /// Converts to the domain type.
    ///
    /// A missing or empty network name falls back to the hostname, then to
    /// the connection id, so alert titles are never blank.
    pub fn into_server_info(self) -> ServerInfo {
        let hostname = self.hostname.as_ref().and_then(text);
        let name = self
            .name
            .as_ref()
            .and_then(text)
            .or_else(|| hostname.clone())
            .unwrap_or_else(|| format!("cid {}", self.cid));

        ServerInfo {
            cid: ConnectionId::new(self.cid),
            name,
            nick: self.nick.as_ref().and_then(text),
            hostname,
            port: self.port.as_ref().and_then(port),
            ssl: self.ssl.as_ref().is_some_and(flag),
            disconnected: self.disconnected.as_ref().is_some_and(flag),
        }
    }
}

/// Non-empty text from a string or number.
fn text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn port(value: &Value) -> Option<u16> {
    match value {
        Value::Number(n) => n.as_u64().and_then(|n| u16::try_from(n).ok()),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// Truthiness of `true`, non-zero numbers and `"true"`/`"1"`.
fn flag(value: &Value) -> bool {
    match value {
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|n| n != 0.0),
        Value::String(s) => matches!(s.trim(), "1" | "true"),
        _ => false,
    }
}

/// Raw `makebuffer` record.
///
/// ```json
/// {"bid":11162, "eid":-1, "type":"makebuffer", "name":"*",
///  "buffer_type":"console", "cid":1709, "max_eid":83, ...}
/// ```
#[derive(Debug, Clone, Deserialize)]
pub struct RawBuffer {
    pub bid: i64,
    pub cid: i64,
    pub name: String,
    pub buffer_type: String,
}

impl RawBuffer {
    pub fn into_buffer_info(self) -> BufferInfo {
        BufferInfo {
            bid: BufferId::new(self.bid),
            cid: ConnectionId::new(self.cid),
            name: self.name,
            kind: BufferKind::from_wire(&self.buffer_type),
        }
    }
}

/// Raw message-bearing record (`buffer_msg`, `buffer_me_msg`, `notice`, ...).
#[derive(Debug, Clone, Deserialize)]
pub struct RawMessage {
    pub bid: i64,
    pub msg: String,
    #[serde(default)]
    pub from: Option<String>,
    #[serde(default, rename = "self")]
    pub from_self: Option<bool>,
    #[serde(default)]
    pub highlight: Option<bool>,
}

impl RawMessage {
    pub fn into_message(self) -> IncomingMessage {
        IncomingMessage {
            bid: BufferId::new(self.bid),
            text: self.msg,
            from: self.from,
            from_self: self.from_self.unwrap_or(false),
            highlight: self.highlight.unwrap_or(false),
        }
    }
}

/// A message-bearing record whose body has not been decoded.
///
/// Messages replayed during backlog are dropped without looking inside, so
/// their shape only matters once notifications are live.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageRecord {
    kind: Option<String>,
    record: Map<String, Value>,
}

impl MessageRecord {
    /// The record's `type`, if it had one.
    pub fn kind(&self) -> Option<&str> {
        self.kind.as_deref()
    }

    /// Decodes the message body.
    ///
    /// # Errors
    ///
    /// Returns `ProtocolError::InvalidEvent` if `bid` or `msg` is missing or
    /// mistyped.
    pub fn decode(self) -> Result<IncomingMessage, ProtocolError> {
        let label = self.kind.unwrap_or_else(|| "message".to_string());
        let raw: RawMessage = typed(&label, self.record)?;
        Ok(raw.into_message())
    }
}

// ============================================================================
// Decoding
// ============================================================================

/// Decodes one stream line (terminator already stripped).
///
/// Message records are recognized but not decoded; see [`MessageRecord`].
///
/// # Errors
///
/// * `ProtocolError::Json` - the line is not valid UTF-8 JSON
/// * `ProtocolError::NotAnObject` - the line is JSON but not an object
/// * `ProtocolError::InvalidEvent` - a `makeserver` or `makebuffer` lacks
///   required fields
pub fn decode_event(line: &[u8]) -> Result<StreamEvent, ProtocolError> {
    let value: Value = serde_json::from_slice(line)?;
    let Value::Object(record) = value else {
        return Err(ProtocolError::NotAnObject);
    };

    let kind = record.get("type").and_then(Value::as_str).map(str::to_owned);

    match kind.as_deref() {
        Some(MAKESERVER) => {
            let raw: RawServer = typed(MAKESERVER, record)?;
            Ok(StreamEvent::ServerDefined(raw.into_server_info()))
        }
        Some(MAKEBUFFER) => {
            let raw: RawBuffer = typed(MAKEBUFFER, record)?;
            Ok(StreamEvent::BufferDefined(raw.into_buffer_info()))
        }
        Some(BACKLOG_COMPLETE) => Ok(StreamEvent::BacklogComplete),
        _ if record.contains_key("msg") => Ok(StreamEvent::Message(MessageRecord { kind, record })),
        _ => Ok(StreamEvent::Ignored { kind }),
    }
}

fn typed<T: for<'de> Deserialize<'de>>(kind: &str, record: Map<String, Value>) -> Result<T, ProtocolError> {
    serde_json::from_value(Value::Object(record)).map_err(|source| ProtocolError::InvalidEvent {
        kind: kind.to_string(),
        source,
    })
}

// ============================================================================
// Tests
// ============================================================================
