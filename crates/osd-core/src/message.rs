//! Chat messages as seen by the notification decision.

use crate::BufferId;
use serde::{Deserialize, Serialize};

/// A stream event that carries message text.
///
/// The stream uses many event types for text (`buffer_msg`,
/// `buffer_me_msg`, `notice`, ...); they all reduce to this shape.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IncomingMessage {
    pub bid: BufferId,

    /// The message body, appended to the alert verbatim.
    pub text: String,

    /// Sender nick, if the event names one
    pub from: Option<String>,

    /// Whether we sent this message ourselves (`self` on the wire).
    pub from_self: bool,

    /// Server-side mention detection (`highlight` on the wire).
    pub highlight: bool,
}

impl IncomingMessage {
    /// Creates a message from someone else with no highlight.
    pub fn new(bid: BufferId, text: impl Into<String>) -> Self {
        Self {
            bid,
            text: text.into(),
            from: None,
            from_self: false,
            highlight: false,
        }
    }

    #[must_use]
    pub fn with_highlight(mut self, highlight: bool) -> Self {
        self.highlight = highlight;
        self
    }

    #[must_use]
    pub fn with_self(mut self, from_self: bool) -> Self {
        self.from_self = from_self;
        self
    }

    #[must_use]
    pub fn with_from(mut self, from: impl Into<String>) -> Self {
        self.from = Some(from.into());
        self
    }
}
