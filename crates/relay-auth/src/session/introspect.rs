//! Validates session cookies by asking the external API who they belong to.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::COOKIE;
use serde::Deserialize;
use tracing::{debug, warn};

use relay_core::config::AuthConfig;
use relay_core::error::{AppError, ErrorKind};
use relay_core::result::AppResult;
use relay_core::traits::SessionAuthenticator;
use relay_core::types::UserId;

/// Envelope returned by the session endpoint: `{"data": {"user": {"id": ...}}}`.
#[derive(Debug, Deserialize)]
struct SessionEnvelope {
    data: Option<SessionData>,
}

#[derive(Debug, Deserialize)]
struct SessionData {
    user: Option<SessionUser>,
}

#[derive(Debug, Deserialize)]
struct SessionUser {
    id: Option<serde_json::Value>,
}

/// Authenticator that forwards the cookie header to the session endpoint.
///
/// No caching and no retries: every upgrade performs exactly one lookup.
#[derive(Clone)]
pub struct SessionIntrospector {
    /// HTTP client.
    http: reqwest::Client,
    /// Full introspection URL.
    session_url: String,
}

impl std::fmt::Debug for SessionIntrospector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionIntrospector")
            .field("session_url", &self.session_url)
            .finish()
    }
}

impl SessionIntrospector {
    /// Creates a new introspector from auth configuration.
    pub fn new(config: &AuthConfig) -> AppResult<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds))
            .build()
            .map_err(|e| {
                AppError::with_source(ErrorKind::Configuration, "Failed to build HTTP client", e)
            })?;

        Ok(Self {
            http,
            session_url: config.session_url(),
        })
    }

    /// Full URL of the introspection endpoint.
    pub fn session_url(&self) -> &str {
        &self.session_url
    }
}

#[async_trait]
impl SessionAuthenticator for SessionIntrospector {
    async fn authenticate(&self, cookie: Option<&str>) -> AppResult<UserId> {
        let cookie = match cookie {
            Some(c) if !c.trim().is_empty() => c,
            _ => return Err(AppError::authentication("Missing session cookie")),
        };

        let response = self
            .http
            .get(&self.session_url)
            .header(COOKIE, cookie)
            .send()
            .await
            .map_err(|e| {
                // Never log the cookie.
                warn!(error = %e, "Session introspection request failed");
                AppError::with_source(
                    ErrorKind::Authentication,
                    "Session introspection unavailable",
                    e,
                )
            })?;

        if !response.status().is_success() {
            debug!(status = %response.status(), "Session rejected");
            return Err(AppError::authentication("Session rejected"));
        }

        let body: serde_json::Value = response.json().await.map_err(|e| {
            AppError::with_source(
                ErrorKind::Authentication,
                "Malformed session response",
                e,
            )
        })?;

        extract_user_id(body).ok_or_else(|| AppError::authentication("Session has no user"))
    }
}

/// Pull `data.user.id` out of a session response.
///
/// Numeric and string IDs are both accepted; empty strings are not.
pub fn extract_user_id(body: serde_json::Value) -> Option<UserId> {
    let envelope: SessionEnvelope = serde_json::from_value(body).ok()?;
    let id = envelope.data?.user?.id?;
    match id {
        serde_json::Value::String(s) if !s.is_empty() => Some(UserId::new(s)),
        serde_json::Value::Number(n) => Some(UserId::new(n.to_string())),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;
    use tokio::sync::oneshot;

    fn config_for(addr: std::net::SocketAddr) -> AuthConfig {
        AuthConfig {
            api_url: format!("http://{addr}"),
            timeout_seconds: 2,
            ..AuthConfig::default()
        }
    }

    /// Answer one HTTP request with `status` and `body`, handing back the raw request.
    async fn serve_once(status: &'static str, body: &'static str) -> (AuthConfig, oneshot::Receiver<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let config = config_for(listener.local_addr().unwrap());
        let (tx, rx) = oneshot::channel();
        tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            let mut request = Vec::new();
            let mut chunk = [0u8; 1024];
            while !request.windows(4).any(|w| w == b"\r\n\r\n") {
                let n = stream.read(&mut chunk).await.unwrap();
                if n == 0 {
                    break;
                }
                request.extend_from_slice(&chunk[..n]);
            }
            let response = format!(
                "HTTP/1.1 {status}\r\ncontent-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{body}",
                body.len()
            );
            stream.write_all(response.as_bytes()).await.unwrap();
            let _ = tx.send(String::from_utf8_lossy(&request).into_owned());
        });
        (config, rx)
    }

    #[test]
    fn test_extract_numeric_id() {
        let body = json!({"status": 200, "data": {"user": {"id": 17, "email": "a@b.c"}}});
        assert_eq!(extract_user_id(body), Some(UserId::new("17")));
    }

    #[test]
    fn test_extract_string_id() {
        let body = json!({"data": {"user": {"id": "0f9c0b6e-3c54-4a0c-9c53-2f1f6c1c2a11"}}});
        assert_eq!(
            extract_user_id(body),
            Some(UserId::new("0f9c0b6e-3c54-4a0c-9c53-2f1f6c1c2a11"))
        );
    }

    #[test]
    fn test_extract_rejects_missing_user() {
        assert_eq!(extract_user_id(json!({"data": {}})), None);
        assert_eq!(extract_user_id(json!({"data": {"user": {"id": ""}}})), None);
        assert_eq!(extract_user_id(json!({"data": {"user": {"id": null}}})), None);
        assert_eq!(extract_user_id(json!([])), None);
    }

    #[tokio::test]
    async fn test_missing_cookie_is_rejected_without_request() {
        let introspector = SessionIntrospector::new(&AuthConfig::default()).unwrap();
        let err = introspector.authenticate(None).await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::Authentication);

        let err = introspector.authenticate(Some("  ")).await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::Authentication);
    }

    #[tokio::test]
    async fn test_valid_session_forwards_cookie() {
        let (config, request) =
            serve_once("200 OK", r#"{"status":200,"data":{"user":{"id":42}}}"#).await;
        let introspector = SessionIntrospector::new(&config).unwrap();

        let user = introspector.authenticate(Some("sessionid=abc")).await.unwrap();
        assert_eq!(user, UserId::new("42"));

        let request = request.await.unwrap().to_lowercase();
        assert!(request.starts_with("get /_allauth/browser/v1/auth/session"));
        assert!(request.contains("cookie: sessionid=abc"));
    }

    #[tokio::test]
    async fn test_rejected_session() {
        let (config, _request) = serve_once("401 Unauthorized", r#"{"status":401}"#).await;
        let introspector = SessionIntrospector::new(&config).unwrap();

        let err = introspector.authenticate(Some("sessionid=abc")).await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::Authentication);
        assert_eq!(err.message, "Session rejected");
    }

    #[tokio::test]
    async fn test_unreachable_endpoint_is_authentication_failure() {
        let addr = {
            let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
            listener.local_addr().unwrap()
        };
        let introspector = SessionIntrospector::new(&config_for(addr)).unwrap();

        let err = introspector.authenticate(Some("sessionid=abc")).await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::Authentication);
        assert_eq!(err.message, "Session introspection unavailable");
        assert!(err.source.is_some());
    }
}
