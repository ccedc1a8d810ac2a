//! WebSocket upgrade handler.

use std::time::Duration;

use axum::body::Bytes;
use axum::extract::ws::rejection::WebSocketUpgradeRejection;
use axum::extract::ws::{Message, WebSocket};
use axum::extract::{State, WebSocketUpgrade};
use axum::http::HeaderMap;
use axum::http::header::COOKIE;
use axum::response::{IntoResponse, Response};
use futures::{SinkExt, StreamExt};
use tracing::{debug, info, warn};

use relay_core::types::UserId;
use relay_realtime::connection::OutboundFrame;

use crate::error::ApiError;
use crate::state::AppState;

/// Time allowed for the writer to flush a close frame after the reader ends.
const WRITER_DRAIN: Duration = Duration::from_secs(1);

/// `GET /` and `GET /ws`: WebSocket upgrade gated by the session cookie.
///
/// Authentication runs before the upgrade: a missing or rejected cookie
/// gets a 401 and no socket or registry entry is created.
pub async fn ws_upgrade(
    State(state): State<AppState>,
    headers: HeaderMap,
    ws: Result<WebSocketUpgrade, WebSocketUpgradeRejection>,
) -> Result<Response, ApiError> {
    let cookie = headers.get(COOKIE).and_then(|v| v.to_str().ok());

    let user_id = state.authenticator.authenticate(cookie).await.map_err(|e| {
        debug!(error = %e, "WebSocket upgrade rejected");
        e
    })?;

    let ws = match ws {
        Ok(ws) => ws,
        Err(rejection) => return Ok(rejection.into_response()),
    };

    Ok(ws.on_upgrade(move |socket| handle_ws_connection(state, user_id, socket)))
}

/// Handles an established WebSocket connection.
async fn handle_ws_connection(state: AppState, user_id: UserId, socket: WebSocket) {
    let connections = state.engine.connections.clone();
    let idle_timeout = state.engine.config().idle_timeout();
    let (mut ws_tx, mut ws_rx) = socket.split();

    let (handle, mut outbound_rx) = connections.register(user_id);
    let conn_id = handle.id;

    // Spawn outbound frame forwarder
    let mut writer = tokio::spawn(async move {
        while let Some(frame) = outbound_rx.recv().await {
            let (message, last) = match frame {
                OutboundFrame::Text(text) => (Message::Text(text.into()), false),
                OutboundFrame::Ping => (Message::Ping(Bytes::new()), false),
                OutboundFrame::Close => (Message::Close(None), true),
            };
            if ws_tx.send(message).await.is_err() || last {
                break;
            }
        }
    });

    connections.hydrate(&handle).await;

    loop {
        tokio::select! {
            _ = handle.terminated() => {
                debug!(conn_id = %conn_id, "Connection terminated by server");
                break;
            }
            next = tokio::time::timeout(idle_timeout, ws_rx.next()) => match next {
                Err(_) => {
                    info!(conn_id = %conn_id, user_id = %handle.user_id, "Idle timeout, closing connection");
                    break;
                }
                Ok(None) | Ok(Some(Ok(Message::Close(_)))) => break,
                Ok(Some(Ok(Message::Text(text)))) => {
                    connections.handle_inbound(&handle, text.as_str()).await;
                }
                Ok(Some(Ok(Message::Pong(_)))) => connections.record_pong(&handle),
                Ok(Some(Ok(_))) => {}
                Ok(Some(Err(e))) => {
                    warn!(conn_id = %conn_id, error = %e, "WebSocket error");
                    break;
                }
            },
        }
    }

    // Cleanup
    connections.unregister(&handle);
    if tokio::time::timeout(WRITER_DRAIN, &mut writer).await.is_err() {
        writer.abort();
    }
}
