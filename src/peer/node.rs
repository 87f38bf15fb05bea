//! Reference peer runtime
//!
//! Ties the server client, the inbound direct-channel listener and the
//! local cache together. Serves decentralized hand-offs of the cached
//! stream and reassembles chunked transfers sent by other peers.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use serde_json::{json, Value};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use super::cache::StreamCache;
use super::client::{ClientEvent, PeerClient, PeerClientConfig};
use super::direct::{self, DirectChannel, DirectEvent, DirectListenerOptions, DirectSlot};
use crate::config::{FieldmeshConfig, PeerSettings};
use crate::error::{Error, Result};
use crate::protocol::{ConnectKind, ConnectRequest, DirectMessage, DirectPayload, ServerMessage, StreamHandOff};
use crate::transfer::{ChunkReceiver, ChunkedSender};

/// One-shot actions the node performs once registered
#[derive(Debug, Clone, Default)]
pub struct NodePlan {
    /// Request this file stream
    pub stream: Option<String>,
    /// Ask for a task and answer it
    pub request_task: bool,
    /// `(source, resolution, period_seconds)` for smart data sharing
    pub smart_data: Option<(String, String, u64)>,
    /// `(peer, local file)` to send over a direct channel
    pub send_file: Option<(String, PathBuf)>,
}

/// Work waiting for a `peer-id-value` answer
#[derive(Debug, Clone, PartialEq)]
enum PendingDirect {
    /// Push the cached stream to the requestor
    HandOff { stored_at: PathBuf },
    /// Answer a collaborative request with a greeting
    Greet { payload: Value },
    /// Send a local file as a chunked transfer
    Transfer { path: PathBuf },
}

pub struct PeerNode {
    name: String,
    settings: PeerSettings,
    cache: StreamCache,
    plan: NodePlan,
    pending: HashMap<String, PendingDirect>,
    receivers: HashMap<SocketAddr, ChunkReceiver>,
    connect_timeout: Duration,
}

impl PeerNode {
    pub fn new(config: &FieldmeshConfig, plan: NodePlan) -> Self {
        Self {
            name: config.peer_name(),
            settings: config.peer.clone(),
            cache: StreamCache::new(config.cache_dir()),
            plan,
            pending: HashMap::new(),
            receivers: HashMap::new(),
            connect_timeout: Duration::from_millis(config.peer.connect_timeout_ms),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Run until Ctrl-C or a fatal client error
    pub async fn run(mut self) -> Result<()> {
        let listener = TcpListener::bind(&self.settings.direct_listen_addr)
            .await
            .map_err(|e| Error::connection_failed(&self.settings.direct_listen_addr, e.to_string()))?;
        let direct_address = advertised_address(&listener, self.settings.advertise_host.as_deref())?;
        info!(name = %self.name, address = %direct_address, "Direct channel listening");

        let (direct_tx, mut direct_rx) = mpsc::channel(256);
        let direct_task = tokio::spawn(direct::run_direct_listener(
            listener,
            DirectSlot::new(),
            DirectListenerOptions {
                name: self.name.clone(),
                reject_grace: Duration::from_millis(self.settings.reject_grace_ms),
            },
            direct_tx,
        ));

        let mut client = PeerClient::new(PeerClientConfig::from_settings(&self.settings, self.name.clone()));
        let mut events = client.start(direct_address);

        let result = loop {
            tokio::select! {
                event = events.recv() => match event {
                    Some(ClientEvent::Error { message, fatal: true }) => {
                        break Err(Error::ConnectionLost { message });
                    }
                    Some(event) => self.on_client_event(&client, event).await,
                    None => break Ok(()),
                },
                Some(event) = direct_rx.recv() => self.on_direct_event(event).await,
                _ = tokio::signal::ctrl_c() => {
                    info!("Received Ctrl+C, shutting down");
                    let _ = client.shutdown().await;
                    break Ok(());
                }
            }
        };

        direct_task.abort();
        result
    }

    async fn on_client_event(&mut self, client: &PeerClient, event: ClientEvent) {
        match event {
            ClientEvent::Joined { rejoin: false, .. } => {
                if let Err(e) = self.start_plan(client).await {
                    warn!(error = %e, "Failed to issue startup requests");
                }
            }
            ClientEvent::Joined { rejoin: true, .. } => info!("Re-joined after reconnect"),
            ClientEvent::Server(message) => {
                if let Err(e) = self.on_server_message(client, message).await {
                    warn!(error = %e, "Failed to handle server event");
                }
            }
            ClientEvent::Disconnected { reason } => warn!(%reason, "Disconnected from server"),
            ClientEvent::Reconnecting { attempt } => debug!(attempt, "Reconnecting"),
            ClientEvent::Error { message, .. } => warn!(error = %message, "Client error"),
            ClientEvent::Connected => debug!("Connected to server"),
        }
    }

    async fn start_plan(&mut self, client: &PeerClient) -> Result<()> {
        client.peers_list().await?;

        if let Some(path) = self.plan.stream.clone() {
            self.cache.expect_stream(path.clone());
            client.request_stream(path).await?;
        }
        if self.plan.request_task {
            client.get_task().await?;
        }
        if let Some((source, resolution, period)) = self.plan.smart_data.clone() {
            client.start_smart_data(source, resolution, period).await?;
        }
        if let Some((peer, path)) = self.plan.send_file.clone() {
            self.pending.insert(peer.clone(), PendingDirect::Transfer { path });
            client.resolve_peer(peer).await?;
        }
        Ok(())
    }

    async fn on_server_message(&mut self, client: &PeerClient, message: ServerMessage) -> Result<()> {
        match message {
            ServerMessage::DataStream(chunk) => {
                self.cache.accept_relay_block(chunk).await?;
            }
            ServerMessage::Peers(list) => info!(peers = ?list.peers, "Peers"),
            ServerMessage::ConnectRequest(request) => self.on_connect_request(client, request).await?,
            ServerMessage::PeerIdValue(address) => match self.pending.remove(&address.name) {
                Some(action) => self.spawn_direct(address.name, address.address, action),
                None => debug!(peer = %address.name, "Address resolved with nothing pending"),
            },
            ServerMessage::SmartData(item) => {
                let path = self.cache.store_smart_data(&item).await?;
                info!(
                    resolution = %item.resolution,
                    index = item.index,
                    filename = %item.filename,
                    stored = %path.display(),
                    "Smart data received"
                );
            }
            ServerMessage::Task(assignment) => {
                info!(task = %assignment.task, "Task received");
                let result = answer_task(&assignment.task);
                client.submit_result(assignment.task, result).await?;
            }
            ServerMessage::FileList(list) => info!(path = %list.path, files = ?list.files, "Files"),
            ServerMessage::ClearCache => self.cache.clear(),
            ServerMessage::Error(event) => warn!(code = event.code, error = %event.message, "Server error"),
            ServerMessage::ValidUsername(_) => {}
        }
        Ok(())
    }

    async fn on_connect_request(&mut self, client: &PeerClient, request: ConnectRequest) -> Result<()> {
        let action = match request.kind {
            ConnectKind::Decentralized => {
                let hand_off: StreamHandOff = serde_json::from_value(request.payload)
                    .map_err(|e| Error::malformed(format!("hand-off payload: {}", e)))?;
                match self.cache.cached_for(&hand_off.file_path) {
                    Some(stored_at) => PendingDirect::HandOff {
                        stored_at: stored_at.to_path_buf(),
                    },
                    None => {
                        warn!(
                            requestor = %request.requestor,
                            path = %hand_off.file_path,
                            "Hand-off requested for a stream not cached here"
                        );
                        return Ok(());
                    }
                }
            }
            ConnectKind::Collaborative => PendingDirect::Greet {
                payload: request.payload,
            },
        };

        info!(requestor = %request.requestor, kind = ?request.kind, "Connection requested");
        self.pending.insert(request.requestor.clone(), action);
        client.resolve_peer(request.requestor).await
    }

    fn spawn_direct(&self, peer: String, address: String, action: PendingDirect) {
        let name = self.name.clone();
        let chunk_size = self.settings.chunk_size;
        let timeout = self.connect_timeout;

        tokio::spawn(async move {
            if let Err(e) = run_direct(&name, &peer, &address, action, chunk_size, timeout).await {
                warn!(peer = %peer, address = %address, error = %e, "Direct channel failed");
            }
        });
    }

    async fn on_direct_event(&mut self, event: DirectEvent) {
        match event {
            DirectEvent::Opened { remote } => {
                self.receivers.insert(remote, ChunkReceiver::new());
            }
            DirectEvent::Closed { remote } => {
                self.receivers.remove(&remote);
            }
            DirectEvent::Received { remote, payload } => {
                if let Err(e) = self.on_direct_payload(remote, payload).await {
                    warn!(remote = %remote, error = %e, "Direct payload rejected");
                }
            }
        }
    }

    async fn on_direct_payload(&mut self, remote: SocketAddr, payload: DirectPayload) -> Result<()> {
        match payload {
            DirectPayload::Message(message) => {
                info!(sender = %message.sender, data = %message.data, "Direct message");
            }
            DirectPayload::Decentralized(block) => {
                self.cache.accept_hand_off(block).await?;
            }
            DirectPayload::Data(chunk) => {
                let receiver = self.receivers.entry(remote).or_default();
                if let Some(received) = receiver.accept(chunk, Instant::now())? {
                    let stored = self.cache.store_transfer(&received).await?;
                    match received.throughput {
                        Some(rate) => info!(
                            file = %received.file_name(),
                            sha256 = %received.sha256,
                            throughput = %rate,
                            stored = %stored.display(),
                            "Transfer received"
                        ),
                        None => info!(
                            file = %received.file_name(),
                            sha256 = %received.sha256,
                            stored = %stored.display(),
                            "Transfer received"
                        ),
                    }
                }
            }
        }
        Ok(())
    }
}

/// Address other peers should dial
fn advertised_address(listener: &TcpListener, advertise_host: Option<&str>) -> Result<String> {
    let local = listener.local_addr()?;
    Ok(match advertise_host {
        Some(host) => format!("{}:{}", host, local.port()),
        None if local.ip().is_unspecified() => format!("127.0.0.1:{}", local.port()),
        None => local.to_string(),
    })
}

/// Reference task handler: echoes the task inside the result array
fn answer_task(task: &Value) -> Value {
    match task {
        Value::Array(items) => Value::Array(items.clone()),
        other => json!([other]),
    }
}

/// Split `path` into the transfer name and extension
fn transfer_label(path: &Path) -> (String, String) {
    let name = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "transfer".to_string());
    let extension = path
        .extension()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    (name, extension)
}

async fn run_direct(
    name: &str,
    peer: &str,
    address: &str,
    action: PendingDirect,
    chunk_size: usize,
    timeout: Duration,
) -> Result<()> {
    let mut channel = direct::connect(address, timeout).await?;

    match action {
        PendingDirect::HandOff { stored_at } => {
            let data = tokio::fs::read(&stored_at)
                .await
                .map_err(|e| Error::io_read(&stored_at, e))?;
            let blocks = direct::push_hand_off(&mut channel, name, &data, chunk_size).await?;
            info!(peer, bytes = data.len(), blocks, "Stream handed off");
        }
        PendingDirect::Greet { payload } => {
            channel
                .send(&DirectPayload::Message(DirectMessage {
                    sender: name.to_string(),
                    data: payload,
                }))
                .await?;
            info!(peer, "Collaborative channel opened");
        }
        PendingDirect::Transfer { path } => {
            let data = tokio::fs::read(&path).await.map_err(|e| Error::io_read(&path, e))?;
            let (label, extension) = transfer_label(&path);
            let sent = direct::send_transfer(&mut channel, ChunkedSender::new(data, label, extension, chunk_size)).await?;
            info!(peer, bytes = sent, "Transfer sent");
        }
    }

    drain_notice(&mut channel, peer).await
}

/// Surface a rejection notice, if the remote sent one before closing
async fn drain_notice(channel: &mut dyn DirectChannel, peer: &str) -> Result<()> {
    match tokio::time::timeout(Duration::from_millis(200), channel.recv()).await {
        Ok(Ok(Some(payload))) if payload.is_rejection() => Err(Error::DirectChannelClosed {
            peer: peer.to_string(),
        }),
        _ => Ok(()),
    }
}
