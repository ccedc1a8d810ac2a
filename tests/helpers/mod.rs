//! Shared test helpers for integration tests.

use std::net::SocketAddr;
use std::sync::Arc;

use async_trait::async_trait;
use axum::Router;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use serde_json::Value;
use tower::ServiceExt;

use relay_api::{AppState, build_router};
use relay_cache::StoreManager;
use relay_cache::memory::MemoryStore;
use relay_core::config::{AppConfig, RealtimeConfig};
use relay_core::error::AppError;
use relay_core::result::AppResult;
use relay_core::traits::SessionAuthenticator;
use relay_core::types::UserId;
use relay_realtime::RelayEngine;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::http::header::COOKIE;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};

/// Client side of a live test socket.
pub type TestSocket = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Cookie accepted by [`StaticAuthenticator`].
pub const GOOD_COOKIE: &str = "sessionid=good";

/// Accepts exactly one cookie value and maps it to user `u1`.
#[derive(Debug)]
pub struct StaticAuthenticator;

#[async_trait]
impl SessionAuthenticator for StaticAuthenticator {
    async fn authenticate(&self, cookie: Option<&str>) -> AppResult<UserId> {
        match cookie {
            Some(c) if c.split(';').any(|part| part.trim() == GOOD_COOKIE) => Ok(UserId::new("u1")),
            Some(_) => Err(AppError::authentication("Session rejected")),
            None => Err(AppError::authentication("Missing session cookie")),
        }
    }
}

/// Test application context
pub struct TestApp {
    /// The Axum router for making test requests
    pub router: Router,
    /// Relay engine behind the router
    pub engine: Arc<RelayEngine>,
    /// Store behind the engine
    pub store: Arc<MemoryStore>,
    /// Configuration the app was built with
    pub config: Arc<AppConfig>,
}

/// A buffered response
pub struct TestResponse {
    pub status: StatusCode,
    pub body: Vec<u8>,
}

impl TestResponse {
    pub fn json(&self) -> Value {
        serde_json::from_slice(&self.body).unwrap()
    }

    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

impl TestApp {
    /// Create a new test application over an in-memory store
    pub fn new() -> Self {
        Self::with_realtime(RealtimeConfig::default())
    }

    /// Create a test application with custom liveness settings
    pub fn with_realtime(realtime: RealtimeConfig) -> Self {
        let config = Arc::new(AppConfig {
            realtime,
            ..AppConfig::default()
        });
        let store = Arc::new(MemoryStore::default());
        let stores = StoreManager::from_memory(store.clone());
        let engine = Arc::new(RelayEngine::new(config.realtime.clone(), &stores));
        let state = AppState::new(config.clone(), engine.clone(), Arc::new(StaticAuthenticator));

        Self {
            router: build_router(state),
            engine,
            store,
            config,
        }
    }

    /// Start the engine and serve the router on an ephemeral local port
    pub async fn serve(&self) -> SocketAddr {
        self.engine.start(&self.config.store);
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let router = self.router.clone();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        addr
    }

    /// Open a WebSocket to a served app with the given cookie
    pub async fn connect(addr: SocketAddr, cookie: &str) -> TestSocket {
        let mut request = format!("ws://{addr}/ws").into_client_request().unwrap();
        request
            .headers_mut()
            .insert(COOKIE, HeaderValue::from_str(cookie).unwrap());
        let (socket, _) = connect_async(request).await.unwrap();
        socket
    }

    /// Wait until the registry holds `count` connections
    pub async fn wait_for_connections(&self, count: usize) {
        tokio::time::timeout(std::time::Duration::from_secs(2), async {
            while self.engine.registry.connection_count() != count {
                tokio::time::sleep(std::time::Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap_or_else(|_| panic!("expected {count} registered connections"));
    }

    /// Send a GET request with optional cookie
    pub async fn get(&self, path: &str, cookie: Option<&str>) -> TestResponse {
        let mut builder = Request::builder().method("GET").uri(path);
        if let Some(cookie) = cookie {
            builder = builder.header("cookie", cookie);
        }
        let request = builder.body(Body::empty()).unwrap();

        let response = self.router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap()
            .to_vec();

        TestResponse { status, body }
    }
}
