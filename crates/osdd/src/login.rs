//! Session acquisition.
//!
//! A one-shot blocking POST of the account credentials to
//! `{base_url}/chat/login`. It runs before the event loop starts, so
//! blocking here is fine.

use std::time::Duration;

use osd_protocol::LoginResponse;
use reqwest::blocking::Client;
use tracing::{debug, info};

use crate::error::LoginError;

/// Path of the login endpoint, relative to the base URL.
pub const LOGIN_PATH: &str = "/chat/login";

/// Path of the streaming endpoint, relative to the base URL.
pub const STREAM_PATH: &str = "/chat/stream";

/// Account credentials.
#[derive(Clone)]
pub struct Credentials {
    pub email: String,
    pub password: String,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("email", &self.email)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Client for the login endpoint.
pub struct LoginClient {
    client: Client,
    base_url: String,
}

impl LoginClient {
    /// Creates a client for the service at `base_url`.
    ///
    /// # Errors
    ///
    /// Returns `LoginError::Request` if the HTTP client cannot be built.
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, LoginError> {
        let client = Client::builder()
            .timeout(timeout)
            .user_agent(concat!("irccloud-osd/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    pub fn login_url(&self) -> String {
        format!("{}{LOGIN_PATH}", self.base_url)
    }

    /// Logs in and returns the session token.
    ///
    /// # Errors
    ///
    /// * `LoginError::Rejected` - the service answered `success: false`
    /// * `LoginError::NoSession` - success without a token
    /// * `LoginError::Status` - an error status with no login response
    /// * `LoginError::Request` / `Decode` - transport or body failures
    pub fn login(&self, credentials: &Credentials) -> Result<String, LoginError> {
        let url = self.login_url();
        debug!(%url, email = %credentials.email, "Logging in");

        let resp = self
            .client
            .post(&url)
            .form(&[
                ("email", credentials.email.as_str()),
                ("password", credentials.password.as_str()),
            ])
            .send()?;
        let status = resp.status();
        let body = resp.text()?;

        let auth: LoginResponse = match serde_json::from_str(&body) {
            Ok(auth) => auth,
            Err(_) if !status.is_success() => return Err(LoginError::Status(status.as_u16())),
            Err(e) => return Err(e.into()),
        };

        if !auth.success {
            return Err(LoginError::Rejected(auth.message));
        }
        let token = auth.session_token().ok_or(LoginError::NoSession)?;
        info!(email = %credentials.email, "Logged in");
        Ok(token.to_string())
    }
}
