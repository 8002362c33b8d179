//! Layered configuration.
//!
//! Settings come from, highest priority first:
//! 1. command-line flags and their environment fallbacks (`Overrides`)
//! 2. the TOML config file (`$XDG_CONFIG_HOME/irccloud-osd/config.toml`
//!    unless a path is given)
//! 3. built-in defaults
//!
//! ```toml
//! email = "me@example.com"
//! password = "hunter2"
//! base_url = "https://irccloud.com"
//! connect_timeout_secs = 30
//!
//! [notifier]
//! sink = "desktop"
//! command = "notify-send"
//! app_name = "irccloud-osd"
//! icon = "im-message-new"
//! expire_time_ms = 10000
//! ```

use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use serde::Deserialize;
use tracing::debug;
use url::{Position, Url};

use crate::alert::NotifySendOptions;
use crate::error::ConfigError;
use crate::login::Credentials;

/// Default service root.
pub const DEFAULT_BASE_URL: &str = "https://irccloud.com";

pub const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 30;

/// Directory name under the XDG config and state directories.
pub const APP_DIR: &str = "irccloud-osd";

/// Which alert backend to use.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SinkKind {
    /// Desktop notifications via `notify-send`
    #[default]
    Desktop,
    /// Alerts written to the log
    Log,
}

impl FromStr for SinkKind {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "desktop" => Ok(Self::Desktop),
            "log" => Ok(Self::Log),
            other => Err(ConfigError::Invalid {
                key: "sink",
                reason: format!("expected \"desktop\" or \"log\", got {other:?}"),
            }),
        }
    }
}

impl fmt::Display for SinkKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Desktop => "desktop",
            Self::Log => "log",
        })
    }
}

// ============================================================================
// File Layer
// ============================================================================

/// Contents of the config file. Every key is optional.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FileConfig {
    pub email: Option<String>,
    pub password: Option<String>,
    pub base_url: Option<String>,
    pub connect_timeout_secs: Option<u64>,
    #[serde(default)]
    pub notifier: NotifierFileConfig,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct NotifierFileConfig {
    pub sink: Option<SinkKind>,
    pub command: Option<String>,
    pub app_name: Option<String>,
    pub icon: Option<String>,
    pub expire_time_ms: Option<u32>,
}

impl FileConfig {
    /// Reads and parses `path`.
    ///
    /// A missing file yields the empty config unless `required` is set.
    pub fn load(path: &Path, required: bool) -> Result<Self, ConfigError> {
        let text = match fs::read_to_string(path) {
            Ok(text) => text,
            Err(e) if e.kind() == io::ErrorKind::NotFound && !required => {
                debug!(path = %path.display(), "No config file");
                return Ok(Self::default());
            }
            Err(source) => {
                return Err(ConfigError::Read {
                    path: path.to_path_buf(),
                    source,
                })
            }
        };
        debug!(path = %path.display(), "Loaded config file");
        toml::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }
}

/// `$XDG_CONFIG_HOME/irccloud-osd/config.toml`, if a config dir exists.
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join(APP_DIR).join("config.toml"))
}

// ============================================================================
// Command-Line Layer
// ============================================================================

/// Values given on the command line (or through their environment
/// variables). `None` defers to the lower layers.
#[derive(Debug, Default, Clone)]
pub struct Overrides {
    pub email: Option<String>,
    pub password: Option<String>,

    /// Explicit config file; unlike the default path it must exist
    pub config_path: Option<PathBuf>,

    pub sink: Option<SinkKind>,
}

// ============================================================================
// Resolved Configuration
// ============================================================================

/// Fully resolved settings for one run.
#[derive(Debug, Clone)]
pub struct Config {
    pub credentials: Credentials,

    /// Service root, e.g. `https://irccloud.com`
    pub base_url: String,

    pub connect_timeout: Duration,
    pub sink: SinkKind,
    pub notifier: NotifySendOptions,
}

impl Config {
    /// Loads the config file and merges every layer.
    ///
    /// # Errors
    ///
    /// * `ConfigError::Read` / `Parse` - the config file is unreadable or invalid
    /// * `ConfigError::Missing` - no email or password in any layer
    /// * `ConfigError::Invalid` - a value is out of range
    pub fn load(overrides: Overrides) -> Result<Self, ConfigError> {
        let file = match &overrides.config_path {
            Some(path) => FileConfig::load(path, true)?,
            None => match default_config_path() {
                Some(path) => FileConfig::load(&path, false)?,
                None => FileConfig::default(),
            },
        };
        Self::resolve(overrides, file)
    }

    /// Merges already-loaded layers.
    pub fn resolve(overrides: Overrides, file: FileConfig) -> Result<Self, ConfigError> {
        let email = non_empty(overrides.email)
            .or_else(|| non_empty(file.email))
            .ok_or(ConfigError::Missing("email"))?;
        let password = non_empty(overrides.password)
            .or_else(|| non_empty(file.password))
            .ok_or(ConfigError::Missing("password"))?;

        let base_url = normalize_base_url(file.base_url.as_deref().unwrap_or(DEFAULT_BASE_URL))?;

        let timeout_secs = file
            .connect_timeout_secs
            .unwrap_or(DEFAULT_CONNECT_TIMEOUT_SECS);
        if timeout_secs == 0 {
            return Err(ConfigError::Invalid {
                key: "connect_timeout_secs",
                reason: "must be at least 1".to_string(),
            });
        }

        let defaults = NotifySendOptions::default();
        let notifier = NotifySendOptions {
            command: file.notifier.command.unwrap_or(defaults.command),
            app_name: file.notifier.app_name.unwrap_or(defaults.app_name),
            // An empty icon turns the default off
            icon: file.notifier.icon.or(defaults.icon).filter(|icon| !icon.is_empty()),
            expire_time_ms: file.notifier.expire_time_ms.or(defaults.expire_time_ms),
        };
        if notifier.command.trim().is_empty() {
            return Err(ConfigError::Invalid {
                key: "notifier.command",
                reason: "must not be empty".to_string(),
            });
        }

        Ok(Self {
            credentials: Credentials { email, password },
            base_url,
            connect_timeout: Duration::from_secs(timeout_secs),
            sink: overrides.sink.or(file.notifier.sink).unwrap_or_default(),
            notifier,
        })
    }

    /// The streaming endpoint under `base_url`.
    pub fn stream_url(&self) -> Result<Url, ConfigError> {
        Url::parse(&format!("{}{}", self.base_url, crate::login::STREAM_PATH)).map_err(|e| {
            ConfigError::Invalid {
                key: "base_url",
                reason: e.to_string(),
            }
        })
    }
}

/// Validates a service root and strips it to scheme, authority and path.
///
/// Query and fragment are dropped, as is a trailing `/`, so endpoint paths
/// can be appended directly.
fn normalize_base_url(raw: &str) -> Result<String, ConfigError> {
    let invalid = |reason: String| ConfigError::Invalid {
        key: "base_url",
        reason,
    };

    let url = Url::parse(raw).map_err(|e| invalid(format!("{raw:?}: {e}")))?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(invalid(format!("{raw:?}: scheme must be http or https")));
    }
    if url.host().is_none() {
        return Err(invalid(format!("{raw:?}: missing host")));
    }
    Ok(url[..Position::AfterPath].trim_end_matches('/').to_string())
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.is_empty())
}
