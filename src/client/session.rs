//! WebSocket session keeping a [`ClientMirror`] in sync with the canvas server.
//!
//! The session reconnects on its own with exponential backoff. Every new connection
//! re-registers the user and starts from a fresh `initialPixels` snapshot: broadcasts missed
//! while offline are never replayed.

use std::{collections::HashMap, sync::Arc, time::Duration};

use futures::{SinkExt, StreamExt};
use rand::Rng;
use thiserror::Error;
use tokio::{
    net::TcpStream,
    sync::{Mutex, broadcast, mpsc, watch},
    task::JoinHandle,
    time::sleep,
};
use tokio_stream::wrappers::BroadcastStream;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async, tungstenite::Message};
use tracing::{debug, info, warn};
use validator::{Validate, ValidationErrors};

use super::mirror::{ClientMirror, MirrorEvent};
use crate::{
    dao::models::Coordinate,
    dto::ws::{ClientMessage, PixelUpdateRequest, RegisterUserRequest, ServerMessage, UserDto},
};

/// Reconnect attempts before the session gives up and reports [`ConnectionStatus::Disconnected`].
pub const DEFAULT_MAX_RECONNECT_ATTEMPTS: u32 = 10;
/// Delay before the first reconnect attempt; doubled on every further failure.
pub const DEFAULT_RECONNECT_DELAY: Duration = Duration::from_millis(3_000);
/// Upper bound of the reconnect delay, before jitter.
pub const DEFAULT_MAX_RECONNECT_DELAY: Duration = Duration::from_secs(30);

const EVENT_CAPACITY: usize = 1024;

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Where and how persistently to connect.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// WebSocket endpoint, e.g. `ws://localhost:8080/ws`.
    pub url: String,
    /// Reconnect attempts after a drop or failed connect.
    pub max_reconnect_attempts: u32,
    /// Delay before the first reconnect attempt.
    pub reconnect_delay: Duration,
    /// Cap of the doubled delay, before jitter.
    pub max_reconnect_delay: Duration,
}

impl SessionConfig {
    /// Default reconnect policy for `url`.
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            max_reconnect_attempts: DEFAULT_MAX_RECONNECT_ATTEMPTS,
            reconnect_delay: DEFAULT_RECONNECT_DELAY,
            max_reconnect_delay: DEFAULT_MAX_RECONNECT_DELAY,
        }
    }

    /// Delay before reconnect attempt `attempt` (1-based), with up to 25% random jitter.
    fn backoff(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(16);
        let delay = self
            .reconnect_delay
            .saturating_mul(1u32 << exponent)
            .min(self.max_reconnect_delay);
        let spread = u64::try_from(delay.as_millis() / 4).unwrap_or(u64::MAX);
        delay + Duration::from_millis(rand::rng().random_range(0..=spread))
    }
}

/// Lifecycle of the underlying connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionStatus {
    /// First connection attempt in progress.
    Connecting,
    /// Socket open, snapshot not received yet.
    Connected,
    /// Snapshot applied; the mirror tracks the server.
    Synced,
    /// Waiting before reconnect attempt `attempt`.
    Reconnecting {
        /// 1-based attempt number.
        attempt: u32,
    },
    /// Retries exhausted or session shut down. The mirror keeps its last known state.
    Disconnected,
}

/// Notification pushed to subscribers.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    /// Change to the local grid.
    Grid(MirrorEvent),
    /// New presence list.
    Users(Vec<UserDto>),
    /// Error reported by the server for one of our requests.
    ServerError(String),
}

/// Failure of a request made through [`ClientSession`].
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("not connected to the canvas server")]
    /// No live connection; the request was not sent.
    NotConnected,
    #[error("invalid request: {0}")]
    /// The request failed local validation.
    Invalid(#[from] ValidationErrors),
}

struct Shared {
    mirror: ClientMirror,
    users: Vec<UserDto>,
    identity: Option<RegisterUserRequest>,
    /// Outbound queue of the current connection, if any.
    link: Option<mpsc::UnboundedSender<ClientMessage>>,
}

struct Inner {
    shared: Mutex<Shared>,
    events: broadcast::Sender<SessionEvent>,
    status: watch::Sender<ConnectionStatus>,
}

enum SessionEnd {
    Dropped,
    Shutdown,
}

impl Inner {
    fn emit(&self, event: SessionEvent) {
        // No subscriber is fine.
        let _ = self.events.send(event);
    }

    fn set_status(&self, status: ConnectionStatus) {
        self.status.send_replace(status);
    }

    async fn handle_server_message(&self, message: ServerMessage) {
        let mut shared = self.shared.lock().await;
        match message {
            ServerMessage::InitialPixels(pixels) => {
                let event = shared.mirror.apply_snapshot(pixels);
                self.emit(SessionEvent::Grid(event));
                self.set_status(ConnectionStatus::Synced);
            }
            ServerMessage::PixelUpdated(pixel) => {
                if let Some(event) = shared.mirror.apply_committed(pixel) {
                    self.emit(SessionEvent::Grid(event));
                }
            }
            ServerMessage::PixelUpdateError(failure) => {
                debug!(x = failure.x, y = failure.y, error = %failure.error, "pixel update rejected");
                if let Some(event) = shared.mirror.apply_rejection(failure.x, failure.y) {
                    self.emit(SessionEvent::Grid(event));
                }
                self.emit(SessionEvent::ServerError(failure.error));
            }
            ServerMessage::UsersList(users) => {
                shared.users = users.clone();
                self.emit(SessionEvent::Users(users));
            }
            ServerMessage::RegisterUserError(error)
            | ServerMessage::SnapshotUnavailable(error)
            | ServerMessage::ProtocolError(error) => {
                warn!(error = %error.error, "server reported an error");
                self.emit(SessionEvent::ServerError(error.error));
            }
        }
    }

    async fn connection_lost(&self) {
        let mut shared = self.shared.lock().await;
        shared.link = None;
        for event in shared.mirror.mark_disconnected() {
            self.emit(SessionEvent::Grid(event));
        }
    }
}

/// Handle to a running canvas session.
pub struct ClientSession {
    inner: Arc<Inner>,
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl ClientSession {
    /// Spawn the connection task. Progress is observable through [`ClientSession::status`].
    pub fn start(config: SessionConfig) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let (status, _) = watch::channel(ConnectionStatus::Connecting);
        let inner = Arc::new(Inner {
            shared: Mutex::new(Shared {
                mirror: ClientMirror::new(),
                users: Vec::new(),
                identity: None,
                link: None,
            }),
            events,
            status,
        });
        let (shutdown, shutdown_rx) = watch::channel(false);
        let task = tokio::spawn(run(inner.clone(), config, shutdown_rx));
        Self {
            inner,
            shutdown,
            task,
        }
    }

    /// Watch the connection lifecycle.
    pub fn status(&self) -> watch::Receiver<ConnectionStatus> {
        self.inner.status.subscribe()
    }

    /// Stream of mirror changes, presence lists and server errors from now on.
    pub fn subscribe(&self) -> BroadcastStream<SessionEvent> {
        BroadcastStream::new(self.inner.events.subscribe())
    }

    /// Register the user now and again after every reconnect.
    pub async fn register(
        &self,
        id: impl Into<String>,
        nickname: impl Into<String>,
        color: impl Into<String>,
    ) -> Result<(), ClientError> {
        let request = RegisterUserRequest {
            id: id.into(),
            nickname: nickname.into(),
            color: color.into(),
        };
        request.validate()?;

        let mut shared = self.inner.shared.lock().await;
        shared.identity = Some(request.clone());
        if let Some(link) = shared.link.as_ref() {
            // A closed link is picked up by the next connection, which re-registers.
            let _ = link.send(ClientMessage::RegisterUser(request));
        }
        Ok(())
    }

    /// Paint `(x, y)` locally and send the write. The guess is reverted if the server rejects
    /// it or the connection drops before a broadcast confirms it.
    pub async fn submit_update(&self, x: i32, y: i32, color: &str) -> Result<(), ClientError> {
        let mut shared = self.inner.shared.lock().await;
        let user_id = shared.identity.as_ref().map(|identity| identity.id.clone());
        PixelUpdateRequest {
            x,
            y,
            color: color.to_string(),
            user_id: user_id.clone(),
        }
        .validate()?;

        let Some(link) = shared.link.clone() else {
            return Err(ClientError::NotConnected);
        };

        let (request, event) = shared.mirror.submit(x, y, color, user_id);
        self.inner.emit(SessionEvent::Grid(event));
        if link.send(ClientMessage::UpdatePixel(request)).is_err() {
            if let Some(event) = shared.mirror.apply_rejection(x, y) {
                self.inner.emit(SessionEvent::Grid(event));
            }
            return Err(ClientError::NotConnected);
        }
        Ok(())
    }

    /// Ask the server for a fresh snapshot.
    pub async fn request_snapshot(&self) -> Result<(), ClientError> {
        let shared = self.inner.shared.lock().await;
        let link = shared.link.as_ref().ok_or(ClientError::NotConnected)?;
        link.send(ClientMessage::RequestSnapshot)
            .map_err(|_| ClientError::NotConnected)
    }

    /// Colors currently shown, confirmed or hinted.
    pub async fn current_grid(&self) -> HashMap<Coordinate, String> {
        self.inner.shared.lock().await.mirror.current_grid()
    }

    /// Last presence list received from the server.
    pub async fn users(&self) -> Vec<UserDto> {
        self.inner.shared.lock().await.users.clone()
    }

    /// Close the connection and wait for the session task to finish.
    pub async fn shutdown(self) {
        let Self { shutdown, task, .. } = self;
        let _ = shutdown.send(true);
        let _ = task.await;
    }
}

async fn run(inner: Arc<Inner>, config: SessionConfig, mut shutdown: watch::Receiver<bool>) {
    let mut failures: u32 = 0;

    loop {
        match connect_async(config.url.as_str()).await {
            Ok((socket, _response)) => {
                info!(url = %config.url, "connected to canvas server");
                failures = 0;
                let end = drive(&inner, socket, &mut shutdown).await;
                inner.connection_lost().await;
                if let SessionEnd::Shutdown = end {
                    inner.set_status(ConnectionStatus::Disconnected);
                    return;
                }
                warn!(url = %config.url, "connection to canvas server lost");
            }
            Err(err) => {
                warn!(url = %config.url, attempt = failures, error = %err, "failed to connect to canvas server");
            }
        }

        failures += 1;
        if failures > config.max_reconnect_attempts {
            warn!(attempts = config.max_reconnect_attempts, "giving up on the canvas server");
            inner.set_status(ConnectionStatus::Disconnected);
            return;
        }

        inner.set_status(ConnectionStatus::Reconnecting { attempt: failures });
        let delay = config.backoff(failures);
        debug!(attempt = failures, ?delay, "waiting before reconnecting");
        tokio::select! {
            _ = sleep(delay) => {}
            _ = shutdown.changed() => {
                inner.set_status(ConnectionStatus::Disconnected);
                return;
            }
        }
    }
}

/// Pump one connection until it drops or the session is shut down.
async fn drive(
    inner: &Inner,
    socket: Socket,
    shutdown: &mut watch::Receiver<bool>,
) -> SessionEnd {
    let (mut write, mut read) = socket.split();
    let (tx, mut rx) = mpsc::unbounded_channel::<ClientMessage>();
    {
        let mut shared = inner.shared.lock().await;
        if let Some(identity) = shared.identity.clone() {
            let _ = tx.send(ClientMessage::RegisterUser(identity));
        }
        shared.link = Some(tx);
    }
    inner.set_status(ConnectionStatus::Connected);

    loop {
        tokio::select! {
            frame = read.next() => match frame {
                Some(Ok(Message::Text(text))) => {
                    match serde_json::from_str::<ServerMessage>(text.as_str()) {
                        Ok(message) => inner.handle_server_message(message).await,
                        Err(err) => warn!(error = %err, "failed to decode server message"),
                    }
                }
                Some(Ok(Message::Close(_))) | None => return SessionEnd::Dropped,
                Some(Ok(_)) => {}
                Some(Err(err)) => {
                    warn!(error = %err, "websocket error");
                    return SessionEnd::Dropped;
                }
            },
            outbound = rx.recv() => {
                let Some(message) = outbound else {
                    return SessionEnd::Dropped;
                };
                let payload = match serde_json::to_string(&message) {
                    Ok(payload) => payload,
                    Err(err) => {
                        warn!(error = %err, "failed to serialize client message");
                        continue;
                    }
                };
                if write.send(Message::Text(payload.into())).await.is_err() {
                    return SessionEnd::Dropped;
                }
            }
            _ = shutdown.changed() => {
                let _ = write.send(Message::Close(None)).await;
                return SessionEnd::Shutdown;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_doubles_up_to_the_cap() {
        let config = SessionConfig::new("ws://localhost/ws");
        let within = |attempt: u32, base: Duration| {
            let delay = config.backoff(attempt);
            assert!(delay >= base, "attempt {attempt}: {delay:?} < {base:?}");
            assert!(delay <= base + base / 4, "attempt {attempt}: {delay:?} too large");
        };

        within(1, Duration::from_secs(3));
        within(2, Duration::from_secs(6));
        within(3, Duration::from_secs(12));
        within(4, Duration::from_secs(24));
        within(5, Duration::from_secs(30));
        within(40, Duration::from_secs(30));
    }

    #[tokio::test]
    async fn gives_up_after_bounded_attempts() {
        let config = SessionConfig {
            max_reconnect_attempts: 2,
            reconnect_delay: Duration::from_millis(10),
            ..SessionConfig::new("ws://127.0.0.1:1/ws")
        };
        let session = ClientSession::start(config);
        let mut status = session.status();

        let reached = tokio::time::timeout(
            Duration::from_secs(10),
            status.wait_for(|status| *status == ConnectionStatus::Disconnected),
        )
        .await;
        assert!(reached.is_ok());
        assert!(matches!(
            session.submit_update(0, 0, "#FFFFFF").await,
            Err(ClientError::NotConnected)
        ));
        assert!(session.current_grid().await.is_empty());
    }

    #[tokio::test]
    async fn invalid_registration_is_refused_locally() {
        let session = ClientSession::start(SessionConfig::new("ws://127.0.0.1:1/ws"));
        let result = session.register("u1", " x ", "#FFFFFF").await;
        assert!(matches!(result, Err(ClientError::Invalid(_))));
        session.shutdown().await;
    }
}
