//! WebSocket driver.
//!
//! Runs the [`Reconnector`] against a real tokio-tungstenite socket. One
//! task owns the socket, the keepalive timer and the reconnect timer, so
//! at most one connection attempt is ever in flight.

use std::collections::VecDeque;
use std::sync::Arc;

use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use serde_json::{Value, json};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tokio::time::{Instant, Interval, MissedTickBehavior};
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::http::header::COOKIE;
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tracing::{debug, info, warn};

use relay_core::error::{AppError, ErrorKind};
use relay_core::result::AppResult;

use crate::backoff::ReconnectPolicy;
use crate::config::ClientConfig;
use crate::processor::{PONG, ProcessOutcome, UpdateProcessor};
use crate::push::PushRegistrationBridge;
use crate::router::{MessageRouter, StoreRefresher};
use crate::state::{Action, ClientEvent, Reconnector, UiStatus};
use crate::watermark::WatermarkStore;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsSink = SplitSink<WsStream, Message>;
type WsSource = SplitStream<WsStream>;

/// Keepalive text frame.
const PING: &str = "ping";

/// Requests from the application to the driver task.
#[derive(Debug, Clone)]
pub enum ClientCommand {
    /// The application returned to the foreground.
    VisibilityRegained,
    /// The platform produced a push subscription.
    RegisterPush(Value),
    /// Close the socket and stop.
    Shutdown,
}

/// Cloneable handle to a running [`RelayClient`].
#[derive(Debug, Clone)]
pub struct ClientHandle {
    commands: mpsc::Sender<ClientCommand>,
    processor: Arc<UpdateProcessor>,
}

impl ClientHandle {
    async fn send(&self, command: ClientCommand) -> AppResult<()> {
        self.commands
            .send(command)
            .await
            .map_err(|_| AppError::internal("Relay client has stopped"))
    }

    /// Reconnect now if disconnected, otherwise re-sync.
    pub async fn visibility_regained(&self) -> AppResult<()> {
        self.send(ClientCommand::VisibilityRegained).await
    }

    /// Forward a push subscription to the server once.
    pub async fn register_push(&self, subscription: Value) -> AppResult<()> {
        self.send(ClientCommand::RegisterPush(subscription)).await
    }

    /// Stop the client.
    pub async fn shutdown(&self) -> AppResult<()> {
        self.send(ClientCommand::Shutdown).await
    }

    /// UI status updates.
    pub fn status(&self) -> watch::Receiver<UiStatus> {
        self.processor.status()
    }

    /// Route an update that arrived through the push channel.
    pub async fn handle_push_payload(&self, payload: Value) -> ProcessOutcome {
        self.processor.handle_push_payload(payload).await
    }
}

/// Socket-side state owned by the driver loop.
#[derive(Default)]
struct Link {
    sink: Option<WsSink>,
    source: Option<WsSource>,
    keepalive: Option<Interval>,
    reconnect_at: Option<Instant>,
}

impl Link {
    fn drop_socket(&mut self) {
        self.sink = None;
        self.source = None;
    }
}

/// Reconnecting relay client.
pub struct RelayClient {
    config: ClientConfig,
    processor: Arc<UpdateProcessor>,
    push: PushRegistrationBridge,
    commands: mpsc::Receiver<ClientCommand>,
}

impl RelayClient {
    /// Build a client and the handle used to control it.
    pub fn new(
        config: ClientConfig,
        refresher: Arc<dyn StoreRefresher>,
        watermark: Arc<dyn WatermarkStore>,
    ) -> AppResult<(Self, ClientHandle)> {
        let processor = Arc::new(UpdateProcessor::new(
            MessageRouter::new()?,
            refresher,
            watermark,
            config.dedup_window(),
        ));
        let (tx, rx) = mpsc::channel(32);

        let client = Self {
            config,
            processor: processor.clone(),
            push: PushRegistrationBridge::new(),
            commands: rx,
        };
        let handle = ClientHandle {
            commands: tx,
            processor,
        };
        Ok((client, handle))
    }

    /// Drive the connection until [`ClientHandle::shutdown`] is called or
    /// every handle is dropped.
    pub async fn run(mut self) {
        let mut machine = Reconnector::new(ReconnectPolicy::new(
            self.config.base_reconnect_delay(),
            self.config.max_reconnect_attempts,
        ));
        let mut link = Link::default();
        let mut events = VecDeque::from([ClientEvent::Start]);

        loop {
            while let Some(event) = events.pop_front() {
                for action in machine.handle(event) {
                    if let Some(next) = self.perform(action, &mut link).await {
                        events.push_back(next);
                    }
                }
            }

            tokio::select! {
                frame = next_frame(&mut link.source) => match frame {
                    Some(Ok(Message::Text(text))) => self.on_text(text.as_str()).await,
                    Some(Ok(Message::Close(_))) | None => {
                        info!(url = %self.config.url, "Relay closed the connection");
                        link.drop_socket();
                        events.push_back(ClientEvent::Closed);
                    }
                    // Protocol pings are answered by tungstenite.
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        warn!(error = %e, "WebSocket error");
                        link.drop_socket();
                        events.push_back(ClientEvent::Closed);
                    }
                },
                _ = next_tick(&mut link.keepalive) => {
                    if !self.send_text(&mut link, PING.to_string()).await {
                        events.push_back(ClientEvent::Closed);
                    }
                }
                _ = sleep_until(link.reconnect_at) => {
                    link.reconnect_at = None;
                    events.push_back(ClientEvent::ReconnectDue);
                }
                command = self.commands.recv() => match command {
                    Some(ClientCommand::VisibilityRegained) => {
                        events.push_back(ClientEvent::VisibilityRegained);
                    }
                    Some(ClientCommand::RegisterPush(subscription)) => {
                        self.push.register(subscription);
                        if link.sink.is_some() && !self.flush_push(&mut link).await {
                            events.push_back(ClientEvent::Closed);
                        }
                    }
                    Some(ClientCommand::Shutdown) | None => break,
                },
            }
        }

        if let Some(mut sink) = link.sink.take() {
            let _ = sink.send(Message::Close(None)).await;
        }
        self.processor.set_status(UiStatus::Disconnected);
        info!("Relay client stopped");
    }

    async fn perform(&self, action: Action, link: &mut Link) -> Option<ClientEvent> {
        match action {
            Action::Connect => {
                self.processor.set_status(UiStatus::Connecting);
                match self.connect().await {
                    Ok(stream) => {
                        info!(url = %self.config.url, "Connected to relay");
                        let (sink, source) = stream.split();
                        link.sink = Some(sink);
                        link.source = Some(source);
                        Some(ClientEvent::Opened)
                    }
                    Err(e) => {
                        warn!(url = %self.config.url, error = %e, "Connection attempt failed");
                        Some(ClientEvent::Closed)
                    }
                }
            }
            Action::StartKeepalive => {
                let period = self.config.keepalive_interval();
                let mut interval = tokio::time::interval_at(Instant::now() + period, period);
                interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
                link.keepalive = Some(interval);
                None
            }
            Action::StopKeepalive => {
                link.keepalive = None;
                None
            }
            Action::FlushPush => {
                (!self.flush_push(link).await).then_some(ClientEvent::Closed)
            }
            Action::Sync => {
                if link.sink.is_none() {
                    return None;
                }
                self.processor.set_status(UiStatus::Syncing);
                let since = self.processor.watermark().load().await.unwrap_or_else(|e| {
                    warn!(error = %e, "Failed to load watermark, syncing from 0");
                    0
                });
                debug!(since, "Requesting sync");
                let sync = json!({ "type": "sync", "timestamp": since }).to_string();
                // The pong to this ping queues behind the replay.
                let sent = self.send_text(link, sync).await
                    && self.send_text(link, PING.to_string()).await;
                (!sent).then_some(ClientEvent::Closed)
            }
            Action::ScheduleReconnect(delay) => {
                self.processor.set_status(UiStatus::Disconnected);
                info!(delay_ms = delay.as_millis() as u64, "Reconnect scheduled");
                link.reconnect_at = Some(Instant::now() + delay);
                None
            }
        }
    }

    async fn connect(&self) -> AppResult<WsStream> {
        let mut request = self.config.url.as_str().into_client_request().map_err(|e| {
            AppError::with_source(ErrorKind::Configuration, "Invalid relay URL", e)
        })?;
        if let Some(cookie) = &self.config.cookie {
            let value = HeaderValue::from_str(cookie).map_err(|e| {
                AppError::with_source(ErrorKind::Configuration, "Invalid session cookie", e)
            })?;
            request.headers_mut().insert(COOKIE, value);
        }

        let (stream, _response) =
            tokio::time::timeout(self.config.connect_timeout(), connect_async(request))
                .await
                .map_err(|_| AppError::connection("Connection attempt timed out"))?
                .map_err(map_ws_error)?;
        Ok(stream)
    }

    async fn on_text(&self, text: &str) {
        if text.trim() == PONG {
            self.processor.clear_pending_status();
            return;
        }
        self.processor.handle_text(text).await;
    }

    /// Returns `false` and drops the socket if the write failed.
    async fn send_text(&self, link: &mut Link, text: String) -> bool {
        let Some(sink) = link.sink.as_mut() else {
            return false;
        };
        match sink.send(Message::text(text)).await {
            Ok(()) => true,
            Err(e) => {
                warn!(error = %e, "WebSocket send failed");
                link.drop_socket();
                false
            }
        }
    }

    async fn flush_push(&self, link: &mut Link) -> bool {
        let Some(frame) = self.push.pending_frame() else {
            return true;
        };
        if !self.send_text(link, frame).await {
            return false;
        }
        self.push.mark_delivered();
        debug!("Push subscription sent");
        true
    }
}

fn map_ws_error(e: tungstenite::Error) -> AppError {
    match e {
        tungstenite::Error::Http(response) => AppError::new(
            ErrorKind::Authentication,
            format!("Upgrade rejected with status {}", response.status()),
        ),
        other => AppError::with_source(ErrorKind::Connection, "WebSocket connect failed", other),
    }
}

async fn next_frame(source: &mut Option<WsSource>) -> Option<Result<Message, tungstenite::Error>> {
    match source {
        Some(source) => source.next().await,
        None => std::future::pending().await,
    }
}

async fn next_tick(keepalive: &mut Option<Interval>) {
    match keepalive {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending().await,
    }
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(at) => tokio::time::sleep_until(at).await,
        None => std::future::pending().await,
    }
}
