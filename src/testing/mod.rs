//! Test doubles for the conductor's external collaborators
//!
//! Used by the crate's own tests; kept in the library so downstream users can
//! exercise conductor-driven flows without a cluster.

use crate::cluster::{ClusterComm, CorrelationId, WorkerExecutor};
use crate::conductor::DispatchBody;
use crate::error::ConductorResult;
use crate::scheduler::{TaskCallback, TaskScheduler};
use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

/// A request captured by [`RecordingCluster`].
#[derive(Debug, Clone)]
pub struct SentRequest {
    pub server: String,
    pub path: String,
    pub body: Value,
    pub correlation: CorrelationId,
}

/// [`ClusterComm`] that records every send and acknowledges delivery
/// immediately. Tests then play the workers by calling the conductor's
/// callback entry points directly.
#[derive(Debug, Default)]
pub struct RecordingCluster {
    sent: Mutex<Vec<SentRequest>>,
}

impl RecordingCluster {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sent(&self) -> Vec<SentRequest> {
        self.sent.lock().expect("cluster mutex poisoned").clone()
    }

    /// Captured requests whose path starts with `prefix`.
    pub fn requests_to(&self, prefix: &str) -> Vec<SentRequest> {
        self.sent()
            .into_iter()
            .filter(|request| request.path.starts_with(prefix))
            .collect()
    }
}

#[async_trait]
impl ClusterComm for RecordingCluster {
    fn async_send(
        &self,
        server: &str,
        path: &str,
        body: Value,
        correlation: CorrelationId,
    ) -> ConductorResult<()> {
        self.sent
            .lock()
            .expect("cluster mutex poisoned")
            .push(SentRequest {
                server: server.to_string(),
                path: path.to_string(),
                body,
                correlation,
            });
        Ok(())
    }

    async fn await_all(&self, _correlation: CorrelationId) -> ConductorResult<()> {
        Ok(())
    }
}

/// [`WorkerExecutor`] that records the commands it receives and does nothing
/// else; tests drive the callbacks themselves.
#[derive(Debug, Default)]
pub struct RecordingWorker {
    steps: Mutex<Vec<(String, u64, DispatchBody)>>,
    cleanups: Mutex<Vec<String>>,
}

impl RecordingWorker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn steps(&self) -> Vec<(String, u64, DispatchBody)> {
        self.steps.lock().expect("worker mutex poisoned").clone()
    }

    pub fn cleanups(&self) -> Vec<String> {
        self.cleanups.lock().expect("worker mutex poisoned").clone()
    }
}

#[async_trait]
impl WorkerExecutor for RecordingWorker {
    async fn execute_step(
        &self,
        execution: &str,
        step: u64,
        body: DispatchBody,
    ) -> ConductorResult<()> {
        self.steps
            .lock()
            .expect("worker mutex poisoned")
            .push((execution.to_string(), step, body));
        Ok(())
    }

    async fn clean_up(&self, execution: &str) -> ConductorResult<()> {
        self.cleanups
            .lock()
            .expect("worker mutex poisoned")
            .push(execution.to_string());
        Ok(())
    }
}

/// [`TaskScheduler`] that never fires on its own; tests trigger registered
/// tasks explicitly with [`ManualScheduler::fire`].
#[derive(Default)]
pub struct ManualScheduler {
    tasks: Mutex<HashMap<String, TaskCallback>>,
}

impl ManualScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_armed(&self, id: &str) -> bool {
        self.tasks
            .lock()
            .expect("scheduler mutex poisoned")
            .contains_key(id)
    }

    /// Runs the registered task, consuming it. Returns whether a task with
    /// this id was armed.
    pub async fn fire(&self, id: &str) -> bool {
        let callback = self
            .tasks
            .lock()
            .expect("scheduler mutex poisoned")
            .remove(id);
        match callback {
            Some(callback) => {
                callback().await;
                true
            }
            None => false,
        }
    }
}

impl TaskScheduler for ManualScheduler {
    fn register_one_shot(&self, id: &str, _delay: Duration, callback: TaskCallback) {
        self.tasks
            .lock()
            .expect("scheduler mutex poisoned")
            .insert(id.to_string(), callback);
    }

    fn unregister(&self, id: &str) {
        self.tasks
            .lock()
            .expect("scheduler mutex poisoned")
            .remove(id);
    }
}
