//! The `/chat/login` response.

use serde::Deserialize;

/// Body of a login response.
///
/// ```json
/// {"success": true, "session": "abc123..."}
/// {"success": false, "message": "auth"}
/// ```
#[derive(Debug, Clone, Deserialize)]
pub struct LoginResponse {
    pub success: bool,
    #[serde(default)]
    pub session: Option<String>,

    /// Failure reason, present on some rejections
    #[serde(default)]
    pub message: Option<String>,
}

impl LoginResponse {
    /// Returns the session token of a successful login.
    pub fn session_token(&self) -> Option<&str> {
        if !self.success {
            return None;
        }
        self.session.as_deref().filter(|s| !s.is_empty())
    }
}
