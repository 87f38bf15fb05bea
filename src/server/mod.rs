//! Coordination server
//!
//! Binds the WebSocket listener and runs the hub that owns the session
//! registry, the stream relay, the smart data scheduler and the task pool.

pub mod broker;
mod effect;
pub mod hub;
mod listener;
pub mod relay;
pub mod scheduler;
pub mod tasks;

use std::net::SocketAddr;
use std::sync::Arc;

use serde_json::Value;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tracing::info;

use crate::config::FieldmeshConfig;
use crate::error::{Error, Result};
use crate::storage::{DirectoryAccess, LocalDirectory};

pub use effect::Effect;
pub use hub::{Hub, HubCommand, HubHandle, HubOptions};
pub use listener::ListenerOptions;

/// A bound, running server
pub struct Server {
    local_addr: SocketAddr,
    hub: HubHandle,
    hub_task: JoinHandle<()>,
    listener_task: JoinHandle<()>,
}

impl Server {
    /// Bind `config.server.listen_addr` and start serving `config.data_dir()`
    pub async fn start(config: &FieldmeshConfig, tasks: Vec<Value>) -> Result<Self> {
        let directory: Arc<dyn DirectoryAccess> = Arc::new(LocalDirectory::new(config.data_dir()));
        Self::start_with(config, directory, tasks).await
    }

    /// Start with a custom [`DirectoryAccess`]
    pub async fn start_with(
        config: &FieldmeshConfig,
        directory: Arc<dyn DirectoryAccess>,
        tasks: Vec<Value>,
    ) -> Result<Self> {
        let listener = TcpListener::bind(&config.server.listen_addr)
            .await
            .map_err(|e| Error::connection_failed(&config.server.listen_addr, e.to_string()))?;
        let local_addr = listener.local_addr()?;

        let (hub, handle) = Hub::new(HubOptions::from_config(config), directory, tasks);
        let hub_task = tokio::spawn(hub.run());
        let listener_task = tokio::spawn(listener::run_listener(
            listener,
            handle.clone(),
            ListenerOptions::from_settings(&config.server),
        ));

        info!("Coordination server listening on ws://{}", local_addr);

        Ok(Self {
            local_addr,
            hub: handle,
            hub_task,
            listener_task,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Handle for queueing commands, e.g. a task pool reload
    pub fn hub(&self) -> &HubHandle {
        &self.hub
    }

    /// Stop accepting connections and stop the hub
    pub async fn shutdown(self) {
        self.listener_task.abort();
        self.hub.shutdown().await;
        let _ = self.hub_task.await;
        info!("Coordination server stopped");
    }
}
