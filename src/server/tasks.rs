//! Task distribution
//!
//! Peers pull a task from a fixed pool; the task handed out depends on the
//! peer's position among the registered names, wrapping around the pool.
//! Results are logged and kept in a bounded in-memory history.

use std::collections::VecDeque;
use std::path::Path;

use chrono::{DateTime, Utc};
use serde_json::Value;
use tracing::{debug, info};

use super::effect::Effect;
use crate::error::{Error, Result};
use crate::protocol::{NameRequest, ServerMessage, TaskAssignment, TaskResultSubmit};
use crate::session::{ChannelHandle, SessionRegistry};

/// Results kept before the oldest are dropped
pub const RESULT_HISTORY: usize = 1024;

#[derive(Debug, Clone, PartialEq)]
pub struct TaskResultRecord {
    pub peer: String,
    pub task: Value,
    pub result: Value,
    pub received_at: DateTime<Utc>,
}

#[derive(Debug, Default)]
pub struct TaskDistributor {
    pool: Vec<Value>,
    results: VecDeque<TaskResultRecord>,
}

impl TaskDistributor {
    pub fn new(pool: Vec<Value>) -> Self {
        Self {
            pool,
            results: VecDeque::new(),
        }
    }

    pub fn set_tasks(&mut self, pool: Vec<Value>) {
        info!(tasks = pool.len(), "Task pool loaded");
        self.pool = pool;
    }

    pub fn pool(&self) -> &[Value] {
        &self.pool
    }

    pub fn results(&self) -> impl Iterator<Item = &TaskResultRecord> {
        self.results.iter()
    }

    /// Task for `name`: `pool[position % pool.len()]`
    pub fn task_for(&self, registry: &SessionRegistry, name: &str) -> Result<Value> {
        if self.pool.is_empty() {
            return Err(Error::NoTasksConfigured);
        }
        let position = registry.position(name).ok_or_else(|| Error::peer_not_found(name))?;
        Ok(self.pool[position % self.pool.len()].clone())
    }

    pub fn get_task(
        &self,
        registry: &SessionRegistry,
        channel: &ChannelHandle,
        request: &NameRequest,
    ) -> Result<Vec<Effect>> {
        let task = self.task_for(registry, &request.name)?;
        debug!(peer = %request.name, task = %task, "Assigning task");
        Ok(vec![Effect::send(channel, ServerMessage::Task(TaskAssignment { task }))])
    }

    /// Record a result; it must be a JSON array
    pub fn submit_result(&mut self, submission: &TaskResultSubmit) -> Result<Vec<Effect>> {
        if !submission.result.is_array() {
            return Err(Error::MalformedResult {
                peer: submission.name.clone(),
                message: "result must be an array".to_string(),
            });
        }

        info!(
            peer = %submission.name,
            task = %submission.task,
            result = %submission.result,
            "Task result received"
        );

        if self.results.len() == RESULT_HISTORY {
            self.results.pop_front();
        }
        self.results.push_back(TaskResultRecord {
            peer: submission.name.clone(),
            task: submission.task.clone(),
            result: submission.result.clone(),
            received_at: Utc::now(),
        });

        Ok(Vec::new())
    }
}

/// Read a task pool: a JSON array of arbitrary task values
pub fn load_pool(path: &Path) -> Result<Vec<Value>> {
    let content = std::fs::read_to_string(path).map_err(|e| Error::io_read(path, e))?;
    let value: Value = serde_json::from_str(&content).map_err(|e| {
        Error::config_validation(format!("tasks file {} is not valid JSON: {}", path.display(), e))
    })?;

    match value {
        Value::Array(tasks) => Ok(tasks),
        _ => Err(Error::config_validation(format!(
            "tasks file {} must contain a JSON array",
            path.display()
        ))),
    }
}
