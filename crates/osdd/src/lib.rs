//! irccloud-osd Daemon - stream handling, alert aggregation and the event loop
//!
//! This crate provides everything between the command line and the wire:
//! - `config` - layered configuration (flags, config file, defaults)
//! - `login` - session acquisition over HTTPS
//! - `stream` - line reassembly, event dispatch and the notification decision
//! - `alert` - per-buffer alert aggregation and the sinks that render it
//! - `daemon` - the single-threaded `poll(2)` loop tying them together
//!
//! # Panic-Free Guarantees
//!
//! All production code in this crate follows the panic-free policy:
//! - No `.unwrap()`, `.expect()`, `panic!()`, `unreachable!()`, `todo!()`
//! - All fallible operations return `Result` or `Option`
//! - Sink failures are logged and never stop the stream

pub mod alert;
pub mod config;
pub mod daemon;
pub mod error;
pub mod login;
pub mod stream;

pub use alert::{Alert, AlertAggregator, AlertSink, LogSink, NotifySendOptions, NotifySendSink};
pub use config::{Config, Overrides, SinkKind};
pub use daemon::{Daemon, Exit};
pub use error::{ConfigError, LoginError, OsdError, SinkError, StreamError};
pub use login::{Credentials, LoginClient};
pub use stream::{Notifier, StreamHandler};
