//! Fan-out of step and cleanup commands, and watchdog wiring
//!
//! Dispatch blocks only for delivery acknowledgement of every send, never for
//! step completion; workers answer later through the conductor's callback
//! entry points.

use crate::cluster::{cleanup_path, Topology, NEXT_STEP_PATH};
use crate::conductor::{
    global_space, server_space, watchdog_id, Conductor, JobState,
};
use crate::error::{ConductorError, ConductorResult};
use crate::keyspace::keys;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use super::barrier;

/// Wire body of the next-step worker request (logical fields only).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DispatchBody {
    pub step: u64,
    pub execution_number: String,
    /// Caller options plus conductor name; at step 0 also the algorithm
    /// source and the shard plan, and `final: true` on the final pass.
    pub setup: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub globals: Option<Value>,
}

impl Conductor {
    /// Fans the current step out to every participant. In distributed mode
    /// the watchdog is armed first, so a phase that never completes is forced
    /// into failure handling.
    pub(crate) async fn start_next_step(
        self: &Arc<Self>,
        execution: &str,
        extra_setup: Option<Value>,
    ) -> ConductorResult<()> {
        let space = global_space(execution);
        let step = self.current_step(execution).await?;
        let globals = self.registry.globals(execution).await?;
        let mut setup = match extra_setup {
            Some(Value::Object(map)) => Value::Object(map),
            _ => json!({}),
        };
        setup["conductor"] = json!(self.server_name);
        let body = DispatchBody {
            step,
            execution_number: execution.to_string(),
            setup,
            globals,
        };

        match &self.topology {
            Topology::Distributed { servers } => {
                let timeout_ms = self
                    .kv
                    .get(&space, keys::TIMEOUT)
                    .await?
                    .and_then(|value| value.as_u64())
                    .unwrap_or(super::DEFAULT_STEP_TIMEOUT.as_millis() as u64);
                self.arm_watchdog(execution, Duration::from_millis(timeout_ms));

                let cluster = self.cluster()?;
                let correlation = cluster.new_correlation();
                let payload = serde_json::to_value(&body)?;
                debug!(
                    execution,
                    step,
                    servers = servers.len(),
                    "dispatching superstep"
                );
                for server in servers {
                    cluster.async_send(server, NEXT_STEP_PATH, payload.clone(), correlation)?;
                }
                cluster.await_all(correlation).await?;
            }
            Topology::Local => {
                debug!(execution, step, "executing superstep on local worker");
                self.local_worker()?
                    .execute_step(execution, step, body)
                    .await?;
            }
        }
        Ok(())
    }

    /// Begins the cleanup phase. With a failure payload this only records the
    /// terminal error state: error cleanup bypasses the wait set and sends
    /// nothing to workers.
    pub(crate) async fn clean_up(
        &self,
        execution: &str,
        failure: Option<Value>,
    ) -> ConductorResult<()> {
        let space = global_space(execution);
        if let Some(payload) = failure {
            warn!(execution, %payload, "execution entering error state");
            self.kv
                .set(&space, keys::STATE, serde_json::to_value(JobState::Error)?)
                .await?;
            self.kv.set(&space, keys::ERROR, payload).await?;
            return Ok(());
        }

        let server = server_space(execution);
        barrier::rebuild(self.kv.as_ref(), &server, &self.topology.participants()).await?;
        match &self.topology {
            Topology::Distributed { servers } => {
                let cluster = self.cluster()?;
                let correlation = cluster.new_correlation();
                let path = cleanup_path(execution);
                debug!(execution, servers = servers.len(), "dispatching cleanup");
                for server in servers {
                    cluster.async_send(server, &path, json!({}), correlation)?;
                }
                cluster.await_all(correlation).await?;
            }
            Topology::Local => {
                debug!(execution, "cleaning up on local worker");
                self.local_worker()?.clean_up(execution).await?;
            }
        }
        Ok(())
    }

    pub(crate) fn arm_watchdog(self: &Arc<Self>, execution: &str, delay: Duration) {
        let conductor = Arc::downgrade(self);
        let execution_owned = execution.to_string();
        self.scheduler.register_one_shot(
            &watchdog_id(execution),
            delay,
            Box::new(move || {
                Box::pin(async move {
                    let Some(conductor) = conductor.upgrade() else {
                        return;
                    };
                    if let Err(error) = conductor.time_out_execution(&execution_owned).await {
                        warn!(
                            execution = %execution_owned,
                            %error,
                            "watchdog expiry handling failed"
                        );
                    }
                })
            }),
        );
    }

    pub(crate) fn disarm_watchdog(&self, execution: &str) {
        self.scheduler.unregister(&watchdog_id(execution));
    }

    fn cluster(&self) -> ConductorResult<&dyn crate::cluster::ClusterComm> {
        self.cluster
            .as_deref()
            .ok_or_else(|| ConductorError::cluster("no cluster comm configured"))
    }

    fn local_worker(&self) -> ConductorResult<&dyn crate::cluster::WorkerExecutor> {
        self.worker
            .as_deref()
            .ok_or_else(|| ConductorError::cluster("no local worker configured"))
    }
}
