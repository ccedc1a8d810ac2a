//! Session introspection configuration.

use serde::{Deserialize, Serialize};

/// Settings for validating session cookies against the external API.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthConfig {
    /// Base URL of the external REST API.
    #[serde(default = "default_api_url")]
    pub api_url: String,
    /// Path of the session introspection endpoint, relative to `api_url`.
    #[serde(default = "default_session_path")]
    pub session_path: String,
    /// Request timeout for a single introspection call, in seconds.
    #[serde(default = "default_timeout")]
    pub timeout_seconds: u64,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            api_url: default_api_url(),
            session_path: default_session_path(),
            timeout_seconds: default_timeout(),
        }
    }
}

impl AuthConfig {
    /// Full URL of the introspection endpoint.
    ///
    /// A scheme-less `api_url` (e.g. `localhost:8000`) is treated as plain HTTP.
    pub fn session_url(&self) -> String {
        let base = self.api_url.trim_end_matches('/');
        if base.starts_with("http://") || base.starts_with("https://") {
            format!("{base}{}", self.session_path)
        } else {
            format!("http://{base}{}", self.session_path)
        }
    }
}

fn default_api_url() -> String {
    "http://localhost:8000".to_string()
}

fn default_session_path() -> String {
    "/_allauth/browser/v1/auth/session".to_string()
}

fn default_timeout() -> u64 {
    10
}
