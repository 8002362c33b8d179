//! Chat network connections ("servers").

use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifier of one configured network connection (`cid` on the wire).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConnectionId(i64);

impl ConnectionId {
    pub const fn new(id: i64) -> Self {
        Self(id)
    }

    pub const fn get(self) -> i64 {
        self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<i64> for ConnectionId {
    fn from(id: i64) -> Self {
        Self(id)
    }
}

/// A chat network the account is connected to.
///
/// Built from a `makeserver` event. Only `cid` and `name` take part in
/// notification decisions; the remaining fields are kept for logging.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerInfo {
    pub cid: ConnectionId,

    /// Network display name, used in alert titles ("bob (Freenode)").
    pub name: String,

    /// Our nickname on this network
    pub nick: Option<String>,

    pub hostname: Option<String>,
    pub port: Option<u16>,
    pub ssl: bool,
    pub disconnected: bool,
}

impl ServerInfo {
    /// Creates a server with just the fields the core needs.
    pub fn new(cid: ConnectionId, name: impl Into<String>) -> Self {
        Self {
            cid,
            name: name.into(),
            nick: None,
            hostname: None,
            port: None,
            ssl: false,
            disconnected: false,
        }
    }
}
