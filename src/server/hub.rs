//! The hub: single owner of all coordination state
//!
//! Connection tasks forward parsed requests as [`HubCommand`]s. The hub
//! processes them one at a time, so registry, scheduler and task state need
//! no locking and every request sees the effects of the previous one.

use std::sync::Arc;

use serde_json::Value;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use super::effect::Effect;
use super::scheduler::SmartDataScheduler;
use super::tasks::TaskDistributor;
use super::{broker, relay};
use crate::config::FieldmeshConfig;
use crate::error::{Error, Result};
use crate::protocol::{ClientMessage, FileList, ServerMessage};
use crate::session::{ChannelHandle, Outbound, SessionRegistry};
use crate::storage::DirectoryAccess;

/// Work queued for the hub
#[derive(Debug)]
pub enum HubCommand {
    /// A request arrived on a channel
    Message {
        channel: ChannelHandle,
        message: ClientMessage,
    },

    /// The channel's socket closed
    Disconnected { channel: ChannelHandle },

    /// A relay task finished (or failed) streaming `path`
    StreamFinished {
        requestor: String,
        channel: ChannelHandle,
        path: String,
        result: Result<u64>,
    },

    /// Smart data timer fired
    SchedulerTick { generation: u64 },

    /// Replace the task pool
    SetTasks(Vec<Value>),

    Shutdown,
}

/// Tunables the hub reads from configuration
#[derive(Debug, Clone)]
pub struct HubOptions {
    pub block_size: usize,
    pub min_period_secs: u64,
    pub max_period_secs: u64,
    pub queue_capacity: usize,
}

impl Default for HubOptions {
    fn default() -> Self {
        Self {
            block_size: 16 * 1024,
            min_period_secs: 1,
            max_period_secs: 24 * 60 * 60,
            queue_capacity: 1024,
        }
    }
}

impl HubOptions {
    pub fn from_config(config: &FieldmeshConfig) -> Self {
        Self {
            block_size: config.relay.block_size,
            min_period_secs: config.smart_data.min_period_secs,
            max_period_secs: config.smart_data.max_period_secs,
            ..Self::default()
        }
    }
}

/// Cloneable sender side of the hub queue
#[derive(Debug, Clone)]
pub struct HubHandle {
    tx: mpsc::Sender<HubCommand>,
}

impl HubHandle {
    /// Queue a command; false once the hub has stopped
    pub async fn send(&self, command: HubCommand) -> bool {
        self.tx.send(command).await.is_ok()
    }

    pub async fn set_tasks(&self, tasks: Vec<Value>) -> bool {
        self.send(HubCommand::SetTasks(tasks)).await
    }

    pub async fn shutdown(&self) {
        let _ = self.tx.send(HubCommand::Shutdown).await;
    }
}

pub struct Hub {
    registry: SessionRegistry,
    scheduler: SmartDataScheduler,
    tasks: TaskDistributor,
    directory: Arc<dyn DirectoryAccess>,
    block_size: usize,
    commands: mpsc::Sender<HubCommand>,
    rx: mpsc::Receiver<HubCommand>,
}

impl Hub {
    pub fn new(options: HubOptions, directory: Arc<dyn DirectoryAccess>, tasks: Vec<Value>) -> (Self, HubHandle) {
        let (tx, rx) = mpsc::channel(options.queue_capacity.max(1));
        let hub = Self {
            registry: SessionRegistry::new(),
            scheduler: SmartDataScheduler::new(tx.clone(), options.min_period_secs, options.max_period_secs),
            tasks: TaskDistributor::new(tasks),
            directory,
            block_size: options.block_size.max(1),
            commands: tx.clone(),
            rx,
        };
        (hub, HubHandle { tx })
    }

    pub fn registry(&self) -> &SessionRegistry {
        &self.registry
    }

    pub fn tasks(&self) -> &TaskDistributor {
        &self.tasks
    }

    pub fn scheduler(&self) -> &SmartDataScheduler {
        &self.scheduler
    }

    /// Process commands until shutdown
    pub async fn run(mut self) {
        info!(block_size = self.block_size, "Hub started");
        while let Some(command) = self.rx.recv().await {
            if !self.handle_command(command).await {
                break;
            }
        }
        self.scheduler.cancel();
        info!(peers = self.registry.len(), "Hub stopped");
    }

    /// Apply one command; false means stop
    pub async fn handle_command(&mut self, command: HubCommand) -> bool {
        match command {
            HubCommand::Message { channel, message } => {
                let event = message.event_name();
                let smart_data = matches!(
                    message,
                    ClientMessage::StartSmartDataSharing(_) | ClientMessage::UpdateSmartDataSharing(_)
                );
                debug!(event, channel = %channel.id(), "Request");
                match self.dispatch(&channel, message).await {
                    Ok(effects) => {
                        if !self.execute(effects) && smart_data {
                            self.scheduler.rewind();
                        }
                    }
                    Err(e) => self.report(&channel, event, &e),
                }
            }

            HubCommand::Disconnected { channel } => {
                self.scheduler.target_closed(&channel);
                let (_, effects) = broker::disconnect(&mut self.registry, &channel);
                self.execute(effects);
            }

            HubCommand::StreamFinished {
                requestor,
                channel,
                path,
                result,
            } => self.stream_finished(&requestor, &channel, &path, result),

            HubCommand::SchedulerTick { generation } => {
                match self.scheduler.on_tick(self.directory.as_ref(), generation).await {
                    Ok(effects) => {
                        if !self.execute(effects) {
                            self.scheduler.rewind();
                        }
                    }
                    Err(e) => {
                        if let Some(target) = self.scheduler.target().cloned() {
                            self.report(&target, "smart-data", &e);
                        }
                    }
                }
            }

            HubCommand::SetTasks(tasks) => self.tasks.set_tasks(tasks),

            HubCommand::Shutdown => return false,
        }
        true
    }

    async fn dispatch(&mut self, channel: &ChannelHandle, message: ClientMessage) -> Result<Vec<Effect>> {
        match message {
            ClientMessage::ValidateUsername(req) => Ok(broker::validate_username(&self.registry, channel, &req)),
            ClientMessage::Join(req) => broker::join(&mut self.registry, channel, &req),
            ClientMessage::StreamData(req) => Ok(relay::request_stream(&self.registry, channel, &req)),
            ClientMessage::PeersList(_) => Ok(broker::peers_list(&self.registry)),
            ClientMessage::RequestPeer(req) => broker::request_connection(&self.registry, &req),
            ClientMessage::PeerId(req) => broker::resolve_address(&self.registry, channel, &req),
            ClientMessage::StartSmartDataSharing(req) => {
                self.scheduler.start(self.directory.as_ref(), channel, &req).await
            }
            ClientMessage::UpdateSmartDataSharing(req) => {
                self.scheduler.update(self.directory.as_ref(), channel, &req).await
            }
            ClientMessage::GetTask(req) => self.tasks.get_task(&self.registry, channel, &req),
            ClientMessage::TaskResult(req) => self.tasks.submit_result(&req),
            ClientMessage::ListFiles(req) => {
                let files = self.directory.list_files(&req.path).await?;
                Ok(vec![Effect::send(
                    channel,
                    ServerMessage::FileList(FileList { path: req.path, files }),
                )])
            }
        }
    }

    fn stream_finished(&mut self, requestor: &str, channel: &ChannelHandle, path: &str, result: Result<u64>) {
        match result {
            Ok(bytes) => {
                // Only the session that asked still counts; a re-join on
                // another channel has not received this data
                let same_session = self
                    .registry
                    .get(requestor)
                    .is_some_and(|session| session.channel == *channel);
                if same_session {
                    self.registry.mark_cached(requestor);
                }
                info!(requestor, path, bytes, cached = same_session, "Stream delivered");
            }
            Err(Error::ConnectionLost { message }) => {
                debug!(requestor, path, reason = %message, "Stream abandoned");
            }
            Err(e) => self.report(channel, "stream-data", &e),
        }
    }

    fn report(&self, channel: &ChannelHandle, event: &str, err: &Error) {
        warn!(
            event,
            channel = %channel.id(),
            peer = %broker::names_on(&self.registry, channel.id()),
            code = %err.code(),
            error = %err,
            "Request failed"
        );
        channel.try_deliver(Outbound::Message(ServerMessage::error(err)));
    }

    /// Carry out `effects`; false if any frame could not be queued
    fn execute(&self, effects: Vec<Effect>) -> bool {
        let mut queued = true;
        for effect in effects {
            match effect {
                Effect::Send { to, message } => {
                    queued &= to.try_deliver(Outbound::Message(message));
                }
                Effect::Close { channel } => {
                    queued &= channel.try_deliver(Outbound::Close);
                }
                Effect::StreamFile { to, requestor, path } => self.spawn_stream(to, requestor, path),
            }
        }
        queued
    }

    fn spawn_stream(&self, to: ChannelHandle, requestor: String, path: String) {
        let directory = Arc::clone(&self.directory);
        let commands = self.commands.clone();
        let block_size = self.block_size;

        tokio::spawn(async move {
            let result = relay::stream_file(directory.as_ref(), &path, block_size, &to).await;
            let _ = commands
                .send(HubCommand::StreamFinished {
                    requestor,
                    channel: to,
                    path,
                    result,
                })
                .await;
        });
    }
}
