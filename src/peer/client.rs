//! WebSocket client for the coordination server
//!
//! Provides the peer side of the message channel with:
//! - Name validation on the first connection, then `join`
//! - Automatic reconnection with exponential backoff, re-joining with the
//!   same direct address (no re-validation)
//! - Request queuing while disconnected

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};

use backoff::{backoff::Backoff, ExponentialBackoff};
use futures_util::{SinkExt, StreamExt};
use parking_lot::RwLock;
use serde_json::Value;
use tokio::sync::{mpsc, oneshot};
use tokio_tungstenite::{
    connect_async,
    tungstenite::{Error as WsError, Message as WsMessage},
};
use tracing::{debug, error, info, warn};
use url::Url;

use crate::config::PeerSettings;
use crate::error::{Error, Result};
use crate::protocol::{
    ClientMessage, JoinRequest, ListFilesRequest, NameRequest, PeerConnectRequest, ServerMessage,
    SmartDataStart, SmartDataUpdate, StreamRequest, TaskResultSubmit,
};

// ─────────────────────────────────────────────────────────────────
// Configuration
// ─────────────────────────────────────────────────────────────────

/// Configuration for the peer client
#[derive(Debug, Clone)]
pub struct PeerClientConfig {
    /// WebSocket URL of the coordination server
    pub url: String,

    /// Name this peer registers under
    pub name: String,

    /// Connection timeout
    pub connect_timeout: Duration,

    /// Maximum reconnection attempts (0 = infinite)
    pub max_reconnect_attempts: u32,

    /// Initial reconnect delay
    pub initial_reconnect_delay: Duration,

    /// Maximum reconnect delay
    pub max_reconnect_delay: Duration,

    /// How long to wait for `valid-username`
    pub validate_timeout: Duration,

    /// Command and event queue size; also bounds requests queued offline
    pub message_queue_size: usize,
}

impl Default for PeerClientConfig {
    fn default() -> Self {
        Self {
            url: "ws://127.0.0.1:8080".to_string(),
            name: "peer".to_string(),
            connect_timeout: Duration::from_secs(10),
            max_reconnect_attempts: 0, // Infinite
            initial_reconnect_delay: Duration::from_secs(2),
            max_reconnect_delay: Duration::from_secs(60),
            validate_timeout: Duration::from_secs(30),
            message_queue_size: 100,
        }
    }
}

impl PeerClientConfig {
    pub fn from_settings(settings: &PeerSettings, name: impl Into<String>) -> Self {
        Self {
            url: settings.server_url.clone(),
            name: name.into(),
            connect_timeout: Duration::from_millis(settings.connect_timeout_ms),
            max_reconnect_attempts: settings.max_reconnect_attempts,
            initial_reconnect_delay: Duration::from_millis(settings.reconnect_interval_ms.max(1)),
            ..Self::default()
        }
    }
}

// ─────────────────────────────────────────────────────────────────
// Connection State
// ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    /// Socket open, not yet joined
    Connected,
    /// Registered with the server
    Joined,
    Reconnecting,
    ShuttingDown,
}

#[derive(Default)]
struct ClientState {
    connection_state: ConnectionState,

    /// Set once the name has been validated; later connections skip it
    validated: bool,

    reconnect_attempts: u32,

    connected_at: Option<Instant>,
}

// ─────────────────────────────────────────────────────────────────
// Commands and Events
// ─────────────────────────────────────────────────────────────────

#[derive(Debug)]
pub enum ClientCommand {
    /// Send a request to the server
    Send(ClientMessage),

    /// Close the connection and stop reconnecting
    Shutdown,

    /// Get current connection state
    GetState(oneshot::Sender<ConnectionState>),
}

/// Events emitted by the client
#[derive(Debug, Clone)]
pub enum ClientEvent {
    Connected,

    /// `join` sent; `rejoin` is true after a reconnect
    Joined { name: String, rejoin: bool },

    /// Any server event other than `valid-username`
    Server(ServerMessage),

    Disconnected { reason: String },

    Reconnecting { attempt: u32 },

    Error { message: String, fatal: bool },
}

enum ConnectionExit {
    Closed,
    Shutdown,
}

// ─────────────────────────────────────────────────────────────────
// Peer Client
// ─────────────────────────────────────────────────────────────────

pub struct PeerClient {
    config: PeerClientConfig,
    state: Arc<RwLock<ClientState>>,
    command_tx: mpsc::Sender<ClientCommand>,
}

impl PeerClient {
    pub fn new(config: PeerClientConfig) -> Self {
        let (command_tx, _command_rx) = mpsc::channel(config.message_queue_size.max(1));

        Self {
            config,
            state: Arc::new(RwLock::new(ClientState::default())),
            command_tx,
        }
    }

    /// Client with no connection task; its requests land on the returned receiver
    #[cfg(test)]
    pub(crate) fn detached(config: PeerClientConfig) -> (Self, mpsc::Receiver<ClientCommand>) {
        let (command_tx, command_rx) = mpsc::channel(config.message_queue_size.max(1));
        let client = Self {
            config,
            state: Arc::new(RwLock::new(ClientState::default())),
            command_tx,
        };
        (client, command_rx)
    }

    /// Start the connection task and return the event receiver.
    ///
    /// `direct_address` is announced on every (re-)join.
    pub fn start(&mut self, direct_address: String) -> mpsc::Receiver<ClientEvent> {
        let queue = self.config.message_queue_size.max(1);
        let (event_tx, event_rx) = mpsc::channel(queue);
        let (command_tx, command_rx) = mpsc::channel(queue);

        self.command_tx = command_tx;

        let config = self.config.clone();
        let state = self.state.clone();

        tokio::spawn(async move {
            run_client_loop(config, state, command_rx, event_tx, direct_address).await;
        });

        event_rx
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.state.read().connection_state
    }

    pub fn is_joined(&self) -> bool {
        self.state.read().connection_state == ConnectionState::Joined
    }

    pub async fn send_command(&self, command: ClientCommand) -> Result<()> {
        self.command_tx.send(command).await.map_err(|_| Error::ConnectionLost {
            message: "client task stopped".to_string(),
        })
    }

    pub async fn send(&self, message: ClientMessage) -> Result<()> {
        self.send_command(ClientCommand::Send(message)).await
    }

    fn name_request(&self) -> NameRequest {
        NameRequest {
            name: self.config.name.clone(),
        }
    }

    pub async fn request_stream(&self, file_path: impl Into<String>) -> Result<()> {
        self.send(ClientMessage::StreamData(StreamRequest {
            name: self.config.name.clone(),
            file_path: file_path.into(),
        }))
        .await
    }

    pub async fn peers_list(&self) -> Result<()> {
        self.send(ClientMessage::PeersList(self.name_request())).await
    }

    pub async fn request_peer(&self, receiver: impl Into<String>, payload: Value) -> Result<()> {
        self.send(ClientMessage::RequestPeer(PeerConnectRequest {
            requestor_name: self.config.name.clone(),
            receiver_name: receiver.into(),
            payload,
        }))
        .await
    }

    /// Ask for a peer's direct address; answered by `peer-id-value`
    pub async fn resolve_peer(&self, name: impl Into<String>) -> Result<()> {
        self.send(ClientMessage::PeerId(NameRequest { name: name.into() })).await
    }

    pub async fn start_smart_data(
        &self,
        source_path: impl Into<String>,
        resolution: impl Into<String>,
        period_seconds: u64,
    ) -> Result<()> {
        self.send(ClientMessage::StartSmartDataSharing(SmartDataStart {
            name: self.config.name.clone(),
            source_path: source_path.into(),
            resolution: resolution.into(),
            period_seconds,
        }))
        .await
    }

    pub async fn update_smart_data(&self, resolution: impl Into<String>, period_seconds: u64) -> Result<()> {
        self.send(ClientMessage::UpdateSmartDataSharing(SmartDataUpdate {
            name: self.config.name.clone(),
            resolution: resolution.into(),
            period_seconds,
        }))
        .await
    }

    pub async fn get_task(&self) -> Result<()> {
        self.send(ClientMessage::GetTask(self.name_request())).await
    }

    pub async fn submit_result(&self, task: Value, result: Value) -> Result<()> {
        self.send(ClientMessage::TaskResult(TaskResultSubmit {
            name: self.config.name.clone(),
            task,
            result,
        }))
        .await
    }

    pub async fn list_files(&self, path: impl Into<String>) -> Result<()> {
        self.send(ClientMessage::ListFiles(ListFilesRequest {
            name: self.config.name.clone(),
            path: path.into(),
        }))
        .await
    }

    /// Request graceful shutdown
    pub async fn shutdown(&self) -> Result<()> {
        self.send_command(ClientCommand::Shutdown).await
    }
}

// ─────────────────────────────────────────────────────────────────
// Client Loop
// ─────────────────────────────────────────────────────────────────

async fn run_client_loop(
    config: PeerClientConfig,
    state: Arc<RwLock<ClientState>>,
    mut command_rx: mpsc::Receiver<ClientCommand>,
    event_tx: mpsc::Sender<ClientEvent>,
    direct_address: String,
) {
    let url = match Url::parse(&config.url) {
        Ok(u) => u,
        Err(e) => {
            error!(url = %config.url, error = %e, "Invalid server URL");
            let _ = event_tx
                .send(ClientEvent::Error {
                    message: format!("Invalid URL: {}", e),
                    fatal: true,
                })
                .await;
            return;
        }
    };

    let mut backoff = ExponentialBackoff {
        initial_interval: config.initial_reconnect_delay,
        max_interval: config.max_reconnect_delay,
        max_elapsed_time: None,
        ..Default::default()
    };

    // Requests issued while offline, replayed after the next join
    let mut backlog: VecDeque<ClientMessage> = VecDeque::new();

    loop {
        if state.read().connection_state == ConnectionState::ShuttingDown {
            break;
        }
        state.write().connection_state = ConnectionState::Connecting;

        info!(url = %url, name = %config.name, "Connecting to server");

        match tokio::time::timeout(config.connect_timeout, connect_async(url.as_str())).await {
            Ok(Ok((ws_stream, _response))) => {
                info!("WebSocket connection established");

                backoff.reset();
                {
                    let mut s = state.write();
                    s.connection_state = ConnectionState::Connected;
                    s.connected_at = Some(Instant::now());
                    s.reconnect_attempts = 0;
                }
                let _ = event_tx.send(ClientEvent::Connected).await;

                let (write, read) = ws_stream.split();
                let result = handle_connection(
                    &config,
                    &state,
                    &mut command_rx,
                    &event_tx,
                    &mut backlog,
                    &direct_address,
                    write,
                    read,
                )
                .await;

                match result {
                    Ok(ConnectionExit::Shutdown) => break,
                    Ok(ConnectionExit::Closed) => {
                        let _ = event_tx
                            .send(ClientEvent::Disconnected {
                                reason: "closed by server".to_string(),
                            })
                            .await;
                    }
                    Err(e) if e.is_fatal() => {
                        error!(error = %e, "Giving up on server connection");
                        let _ = event_tx
                            .send(ClientEvent::Error {
                                message: e.to_string(),
                                fatal: true,
                            })
                            .await;
                        break;
                    }
                    Err(e) => {
                        warn!(error = %e, "Connection error");
                        let _ = event_tx
                            .send(ClientEvent::Disconnected { reason: e.to_string() })
                            .await;
                    }
                }
            }
            Ok(Err(e)) => {
                error!(error = %e, "Failed to connect to server");
                let _ = event_tx
                    .send(ClientEvent::Error {
                        message: format!("Connection failed: {}", e),
                        fatal: false,
                    })
                    .await;
            }
            Err(_) => {
                let e = Error::connection_timeout(url.as_str(), config.connect_timeout.as_secs());
                error!(error = %e, "Failed to connect to server");
                let _ = event_tx
                    .send(ClientEvent::Error {
                        message: e.to_string(),
                        fatal: false,
                    })
                    .await;
            }
        }

        let attempts = {
            let mut s = state.write();
            s.connection_state = ConnectionState::Reconnecting;
            s.reconnect_attempts += 1;
            s.reconnect_attempts
        };

        if config.max_reconnect_attempts > 0 && attempts >= config.max_reconnect_attempts {
            error!(
                attempts = attempts,
                max = config.max_reconnect_attempts,
                "Max reconnection attempts reached"
            );
            let _ = event_tx
                .send(ClientEvent::Error {
                    message: "Max reconnection attempts reached".to_string(),
                    fatal: true,
                })
                .await;
            break;
        }

        let delay = backoff.next_backoff().unwrap_or(config.max_reconnect_delay);
        let _ = event_tx.send(ClientEvent::Reconnecting { attempt: attempts }).await;

        info!(delay_ms = delay.as_millis() as u64, attempt = attempts, "Waiting before reconnection");

        let sleep = tokio::time::sleep(delay);
        tokio::pin!(sleep);
        loop {
            tokio::select! {
                _ = &mut sleep => break,
                cmd = command_rx.recv() => match cmd {
                    Some(ClientCommand::Send(message)) => queue(&mut backlog, message, config.message_queue_size),
                    Some(ClientCommand::GetState(tx)) => {
                        let _ = tx.send(state.read().connection_state);
                    }
                    Some(ClientCommand::Shutdown) | None => {
                        state.write().connection_state = ConnectionState::ShuttingDown;
                        break;
                    }
                }
            }
        }
    }

    state.write().connection_state = ConnectionState::Disconnected;
    info!("Client loop terminated");
}

fn queue(backlog: &mut VecDeque<ClientMessage>, message: ClientMessage, limit: usize) {
    if backlog.len() >= limit.max(1) {
        if let Some(dropped) = backlog.pop_front() {
            warn!(event = dropped.event_name(), "Offline queue full, dropping oldest request");
        }
    }
    backlog.push_back(message);
}

#[allow(clippy::too_many_arguments)]
async fn handle_connection<S, R>(
    config: &PeerClientConfig,
    state: &Arc<RwLock<ClientState>>,
    command_rx: &mut mpsc::Receiver<ClientCommand>,
    event_tx: &mpsc::Sender<ClientEvent>,
    backlog: &mut VecDeque<ClientMessage>,
    direct_address: &str,
    mut write: S,
    mut read: R,
) -> Result<ConnectionExit>
where
    S: SinkExt<WsMessage, Error = WsError> + Unpin,
    R: StreamExt<Item = std::result::Result<WsMessage, WsError>> + Unpin,
{
    let rejoin = state.read().validated;
    if !rejoin {
        send_message(
            &mut write,
            &ClientMessage::ValidateUsername(NameRequest {
                name: config.name.clone(),
            }),
        )
        .await?;
        debug!(name = %config.name, "Sent validate-username");

        if !wait_for_validation(config, &mut read, event_tx).await? {
            return Err(Error::NameTaken {
                name: config.name.clone(),
            });
        }
        state.write().validated = true;
    }

    send_message(
        &mut write,
        &ClientMessage::Join(JoinRequest {
            name: config.name.clone(),
            direct_address: direct_address.to_string(),
        }),
    )
    .await?;
    state.write().connection_state = ConnectionState::Joined;
    info!(name = %config.name, address = %direct_address, rejoin, "Joined");
    let _ = event_tx
        .send(ClientEvent::Joined {
            name: config.name.clone(),
            rejoin,
        })
        .await;

    while let Some(message) = backlog.pop_front() {
        send_message(&mut write, &message).await?;
    }

    loop {
        tokio::select! {
            msg = read.next() => {
                match msg {
                    Some(Ok(WsMessage::Text(text))) => match ServerMessage::from_json(&text) {
                        Ok(message) => {
                            debug!(event = message.event_name(), "Received event");
                            let _ = event_tx.send(ClientEvent::Server(message)).await;
                        }
                        Err(e) => warn!(error = %e, "Failed to parse server event"),
                    },
                    Some(Ok(WsMessage::Ping(data))) => {
                        write.send(WsMessage::Pong(data)).await?;
                    }
                    Some(Ok(WsMessage::Close(frame))) => {
                        info!(frame = ?frame, "Received close frame");
                        return Ok(ConnectionExit::Closed);
                    }
                    Some(Err(e)) => {
                        return Err(Error::ConnectionLost { message: e.to_string() });
                    }
                    None => {
                        info!("WebSocket stream ended");
                        return Ok(ConnectionExit::Closed);
                    }
                    _ => {}
                }
            }

            cmd = command_rx.recv() => {
                match cmd {
                    Some(ClientCommand::Send(message)) => {
                        if let Err(e) = send_message(&mut write, &message).await {
                            backlog.push_front(message);
                            return Err(e);
                        }
                    }
                    Some(ClientCommand::GetState(tx)) => {
                        let _ = tx.send(state.read().connection_state);
                    }
                    Some(ClientCommand::Shutdown) | None => {
                        info!("Shutdown command received");
                        let _ = write.send(WsMessage::Close(None)).await;
                        state.write().connection_state = ConnectionState::ShuttingDown;
                        return Ok(ConnectionExit::Shutdown);
                    }
                }
            }
        }
    }
}

async fn send_message<S>(write: &mut S, message: &ClientMessage) -> Result<()>
where
    S: SinkExt<WsMessage, Error = WsError> + Unpin,
{
    let json = message.to_json().map_err(|e| Error::Internal(e.to_string()))?;
    write
        .send(WsMessage::Text(json))
        .await
        .map_err(|e| Error::ConnectionLost { message: e.to_string() })
}

/// Wait for `valid-username`, forwarding anything else that arrives first
async fn wait_for_validation<R>(
    config: &PeerClientConfig,
    read: &mut R,
    event_tx: &mpsc::Sender<ClientEvent>,
) -> Result<bool>
where
    R: StreamExt<Item = std::result::Result<WsMessage, WsError>> + Unpin,
{
    let wait = async {
        while let Some(msg) = read.next().await {
            match msg {
                Ok(WsMessage::Text(text)) => match ServerMessage::from_json(&text) {
                    Ok(ServerMessage::ValidUsername(reply)) => return Ok(reply.valid),
                    Ok(other) => {
                        let _ = event_tx.send(ClientEvent::Server(other)).await;
                    }
                    Err(e) => warn!(error = %e, "Failed to parse server event"),
                },
                Ok(WsMessage::Close(_)) => {
                    return Err(Error::ConnectionLost {
                        message: "connection closed during validation".to_string(),
                    });
                }
                Err(e) => return Err(Error::ConnectionLost { message: e.to_string() }),
                _ => {}
            }
        }
        Err(Error::ConnectionLost {
            message: "stream ended during validation".to_string(),
        })
    };

    tokio::time::timeout(config.validate_timeout, wait)
        .await
        .map_err(|_| Error::connection_timeout(config.url.as_str(), config.validate_timeout.as_secs()))?
}

// ─────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────
