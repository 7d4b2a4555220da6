//! The Pregel conductor
//!
//! Coordinator of a bulk-synchronous-parallel graph computation: drives the
//! worker set through supersteps, aggregates per-step termination signals via
//! the wait-set barrier, decides continue/final/cleanup, materializes the
//! result graph, and forces failure handling when the watchdog fires.
//!
//! All state transitions for one execution happen on the critical path of a
//! `finished_step`/`finished_cleanup`/`time_out_execution` callback,
//! serialized by the compare-and-swap on the wait-set entry plus the shared
//! countdown. Different executions use separate keyspace namespaces and
//! progress independently.

pub mod algorithm;
mod barrier;
pub mod dispatch;
mod driver;
mod timer;


pub use algorithm::{Algorithm, DelimiterValidator, SourceValidator, StepSummary, SuperstepFn};
pub use dispatch::DispatchBody;

use crate::cluster::{ClusterComm, Topology, WorkerExecutor};
use crate::error::{ConductorError, ConductorResult};
use crate::keyspace::{keys, KeyValueStore};
use crate::plan::ShardPlanner;
use crate::scheduler::TaskScheduler;
use crate::storage::{ExecutionRecord, ExecutionRegistry, GraphStore};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, error, info};

/// Watchdog duration per step when the caller does not configure one.
pub const DEFAULT_STEP_TIMEOUT: Duration = Duration::from_secs(600);

const KEYSPACE_PREFIX: &str = "P_C";

fn keyspace_id(execution: &str, postfix: &str) -> String {
    format!("{KEYSPACE_PREFIX}_{execution}_{postfix}")
}

pub(crate) fn global_space(execution: &str) -> String {
    keyspace_id(execution, "global")
}

pub(crate) fn server_space(execution: &str) -> String {
    keyspace_id(execution, "server")
}

pub(crate) fn timer_space(execution: &str) -> String {
    keyspace_id(execution, "timer")
}

pub(crate) fn watchdog_id(execution: &str) -> String {
    format!("pregel-watchdog-{execution}")
}

/// Externally observable job status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobState {
    Running,
    Finished,
    Error,
}

/// Options accepted by `start_execution`.
#[derive(Debug, Clone, Default)]
pub struct ExecutionOptions {
    /// Watchdog duration per step; [`DEFAULT_STEP_TIMEOUT`] when unset.
    pub timeout: Option<Duration>,
    /// Opaque setup fields handed to every worker dispatch and stored as the
    /// execution's global values.
    pub setup: Map<String, Value>,
}

/// Worker-to-conductor step completion report.
///
/// `step`, `active` and `messages` are required by the protocol; they are
/// optional here so that their absence can be rejected explicitly rather than
/// failing deserialization.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StepReport {
    pub step: Option<u64>,
    pub active: Option<i64>,
    pub messages: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Vec<Value>>,
    /// A failure the worker itself encountered; terminal for the execution.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<Value>,
}

/// Result of an execution as reported to callers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub error: bool,
    pub state: JobState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub graph_name: Option<String>,
    /// Failure payload, present only when `state` is `error`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure: Option<Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionInfo {
    pub step: u64,
    pub state: JobState,
    pub globals: Value,
}

/// Everything the conductor needs, injected at construction. No component is
/// looked up from ambient state.
pub struct ConductorConfig {
    /// Name this conductor announces to workers in the dispatch payload.
    pub server_name: String,
    pub topology: Topology,
    pub kv: Arc<dyn KeyValueStore>,
    pub graphs: Arc<dyn GraphStore>,
    pub registry: Arc<dyn ExecutionRegistry>,
    /// Required for [`Topology::Distributed`].
    pub cluster: Option<Arc<dyn ClusterComm>>,
    pub scheduler: Arc<dyn TaskScheduler>,
    /// Required for [`Topology::Local`].
    pub worker: Option<Arc<dyn WorkerExecutor>>,
    pub validator: Arc<dyn SourceValidator>,
    pub default_timeout: Duration,
}

/// The orchestrating façade; the only component with a public contract.
pub struct Conductor {
    server_name: String,
    topology: Topology,
    kv: Arc<dyn KeyValueStore>,
    graphs: Arc<dyn GraphStore>,
    registry: Arc<dyn ExecutionRegistry>,
    cluster: Option<Arc<dyn ClusterComm>>,
    scheduler: Arc<dyn TaskScheduler>,
    worker: Option<Arc<dyn WorkerExecutor>>,
    validator: Arc<dyn SourceValidator>,
    default_timeout: Duration,
    /// Aggregation callbacks by execution. Function values cannot live in the
    /// keyspace store, so this is the one piece of conductor-local state.
    supersteps: RwLock<HashMap<String, Arc<SuperstepFn>>>,
}

impl Conductor {
    pub fn new(config: ConductorConfig) -> Arc<Self> {
        Arc::new(Self {
            server_name: config.server_name,
            topology: config.topology,
            kv: config.kv,
            graphs: config.graphs,
            registry: config.registry,
            cluster: config.cluster,
            scheduler: config.scheduler,
            worker: config.worker,
            validator: config.validator,
            default_timeout: config.default_timeout,
            supersteps: RwLock::new(HashMap::new()),
        })
    }

    /// Starts a new execution on `graph_name` and returns its execution
    /// number. Never blocks for job completion: workers answer later through
    /// [`Conductor::finished_step`].
    ///
    /// Algorithm sources are validated before any side effect, so a rejected
    /// start leaves no record, keyspace, or collection behind.
    pub async fn start_execution(
        self: &Arc<Self>,
        graph_name: &str,
        algorithm: Algorithm,
        options: ExecutionOptions,
    ) -> ConductorResult<String> {
        self.validator.validate(&algorithm.base)?;
        if let Some(final_source) = &algorithm.final_step {
            self.validator.validate(final_source)?;
        }
        let graph = self.graphs.graph(graph_name).await?;
        let vertex_count = self.graphs.vertex_count(graph_name).await?;

        let mut setup = options.setup.clone();
        setup.insert("graphName".to_string(), json!(graph_name));
        let execution = self
            .registry
            .save(ExecutionRecord {
                global_values: Value::Object(setup.clone()),
            })
            .await?;
        info!(
            execution = %execution,
            graph = graph_name,
            vertices = vertex_count,
            "starting pregel execution"
        );

        let server = server_space(&execution);
        self.kv.create_keyspace(&server).await?;
        barrier::rebuild(self.kv.as_ref(), &server, &self.topology.participants()).await?;

        let space = global_space(&execution);
        self.kv.create_keyspace(&space).await?;
        self.kv.create_keyspace(&timer_space(&execution)).await?;

        self.kv.set(&space, keys::STEP, json!(0)).await?;
        self.kv.set(&space, keys::STEP_CONTENT, json!([])).await?;
        let seed = StepSummary {
            active: vertex_count as i64,
            messages: 0,
            data: Vec::new(),
            is_final: false,
        };
        self.kv
            .push(&space, keys::STEP_CONTENT, serde_json::to_value(&seed)?)
            .await?;
        self.kv
            .set(&space, keys::STATE, serde_json::to_value(JobState::Running)?)
            .await?;
        let timeout = options.timeout.unwrap_or(self.default_timeout);
        self.kv
            .set(&space, keys::TIMEOUT, json!(timeout.as_millis() as u64))
            .await?;
        self.prepare_next_step(&space).await?;

        if let Some(superstep) = algorithm.superstep.clone() {
            self.supersteps
                .write()
                .await
                .insert(execution.clone(), superstep);
        }
        if let Some(final_source) = &algorithm.final_step {
            self.kv
                .set(&space, keys::FINAL_STEP, json!(final_source))
                .await?;
        }
        timer::start(self.kv.as_ref(), &timer_space(&execution)).await?;

        let planner = ShardPlanner::new(self.graphs.as_ref(), &self.topology);
        let (plan, result_graph) = planner.create_result_graph(&graph, &execution).await?;
        self.kv.set(&space, keys::GRAPH, json!(result_graph)).await?;
        timer::store(self.kv.as_ref(), &timer_space(&execution), "setup").await?;

        setup.insert("algorithm".to_string(), json!(algorithm.base));
        setup.insert("map".to_string(), serde_json::to_value(&plan)?);
        self.start_next_step(&execution, Some(Value::Object(setup)))
            .await?;
        Ok(execution)
    }

    /// Pure read of the execution's outcome.
    pub async fn get_result(&self, execution: &str) -> ConductorResult<ExecutionResult> {
        let space = global_space(execution);
        let state = self.job_state(execution).await?;
        match state {
            JobState::Finished => Ok(ExecutionResult {
                error: false,
                state,
                graph_name: self
                    .kv
                    .get(&space, keys::GRAPH)
                    .await?
                    .and_then(|value| value.as_str().map(String::from)),
                failure: None,
            }),
            JobState::Running => Ok(ExecutionResult {
                error: false,
                state,
                graph_name: None,
                failure: None,
            }),
            JobState::Error => Ok(ExecutionResult {
                error: true,
                state,
                graph_name: None,
                failure: self.kv.get(&space, keys::ERROR).await?,
            }),
        }
    }

    /// Pure read of the execution's progress.
    pub async fn get_info(&self, execution: &str) -> ConductorResult<ExecutionInfo> {
        let state = self.job_state(execution).await?;
        let step = self.current_step(execution).await?;
        let globals = self
            .kv
            .get(&global_space(execution), keys::GLOBALS)
            .await?
            .unwrap_or_else(|| json!({}));
        Ok(ExecutionInfo {
            step,
            state,
            globals,
        })
    }

    /// Deletes the materialized result graph, the per-execution keyspaces,
    /// and the execution record. The caller must ensure the job is terminal;
    /// this is not enforced here.
    pub async fn drop_result(&self, execution: &str) -> ConductorResult<()> {
        let space = global_space(execution);
        if let Some(graph) = self
            .kv
            .get(&space, keys::GRAPH)
            .await?
            .and_then(|value| value.as_str().map(String::from))
        {
            self.graphs.drop_graph(&graph, true).await?;
        }
        self.registry.remove(execution).await?;
        self.supersteps.write().await.remove(execution);
        self.kv.destroy_keyspace(&space).await?;
        self.kv.destroy_keyspace(&server_space(execution)).await?;
        self.kv.destroy_keyspace(&timer_space(execution)).await?;
        info!(execution, "dropped execution result");
        Ok(())
    }

    /// Worker callback: one participant finished the current superstep.
    ///
    /// Protocol violations are returned to the caller and mutate nothing.
    /// Reports for an execution that is no longer running (post-timeout
    /// stragglers, duplicate error reports) are accepted as no-ops.
    pub async fn finished_step(
        self: &Arc<Self>,
        execution: &str,
        server_name: &str,
        report: StepReport,
    ) -> ConductorResult<()> {
        let space = global_space(execution);
        let state = self.job_state(execution).await?;
        if state != JobState::Running {
            debug!(
                execution,
                server = server_name,
                ?state,
                "ignoring step report for terminal execution"
            );
            return Ok(());
        }

        let current = self.current_step(execution).await?;
        match report.step {
            Some(step) if step == current => {}
            reported => {
                return Err(ConductorError::StepMismatch { reported, current });
            }
        }
        let active = report
            .active
            .ok_or(ConductorError::MalformedMessage { field: "active" })?;
        let messages = report
            .messages
            .ok_or(ConductorError::MalformedMessage { field: "messages" })?;

        let server = server_space(execution);
        if !barrier::is_participant(self.kv.as_ref(), &server, server_name).await? {
            return Err(ConductorError::ServerNameMismatch {
                server: server_name.to_string(),
            });
        }

        if let Some(failure) = report.error {
            error!(execution, server = server_name, "worker reported failure");
            self.disarm_watchdog(execution);
            return self.clean_up(execution, Some(failure)).await;
        }

        if !barrier::try_claim(self.kv.as_ref(), &server, server_name).await? {
            debug!(
                execution,
                server = server_name,
                step = current,
                "duplicate step report, not counted"
            );
            return Ok(());
        }
        self.kv.increment(&space, keys::ACTIVE, active).await?;
        self.kv.increment(&space, keys::MESSAGES, messages).await?;
        for item in report.data.unwrap_or_default() {
            self.kv.push(&space, keys::DATA, item).await?;
        }
        let waiting = barrier::arrive(self.kv.as_ref(), &server).await?;
        debug!(
            execution,
            server = server_name,
            step = current,
            waiting,
            "step report counted"
        );
        if waiting == 0 {
            self.disarm_watchdog(execution);
            // The watchdog can error the job between the entry check and the
            // final decrement; an errored job must not be advanced.
            if self.job_state(execution).await? != JobState::Running {
                return Ok(());
            }
            self.init_next_step(execution).await?;
        }
        Ok(())
    }

    /// Worker callback for the cleanup barrier. Same claim/decrement
    /// discipline as the step barrier, with no payload to accumulate.
    pub async fn finished_cleanup(
        &self,
        execution: &str,
        server_name: &str,
    ) -> ConductorResult<()> {
        let state = self.job_state(execution).await?;
        if state == JobState::Error {
            debug!(
                execution,
                server = server_name,
                "ignoring cleanup report for errored execution"
            );
            return Ok(());
        }
        let server = server_space(execution);
        if !barrier::try_claim(self.kv.as_ref(), &server, server_name).await? {
            return Ok(());
        }
        let waiting = barrier::arrive(self.kv.as_ref(), &server).await?;
        if waiting == 0 {
            let space = global_space(execution);
            timer::store(self.kv.as_ref(), &timer_space(execution), "cleanup").await?;
            self.kv
                .set(
                    &space,
                    keys::STATE,
                    serde_json::to_value(JobState::Finished)?,
                )
                .await?;
            timer::clear(self.kv.as_ref(), &timer_space(execution)).await?;
            self.disarm_watchdog(execution);
            info!(execution, "execution finished");
        }
        Ok(())
    }

    /// Watchdog callback: the current phase did not complete in time.
    /// Unconditionally moves the execution to `error` and begins cleanup
    /// without waiting on stragglers.
    pub async fn time_out_execution(&self, execution: &str) -> ConductorResult<()> {
        error!(execution, "watchdog fired before all workers reported");
        let payload = ConductorError::Timeout {
            execution: execution.to_string(),
        }
        .to_payload();
        self.clean_up(execution, Some(payload)).await
    }

    /// Resets the running accumulators for the next step.
    pub(crate) async fn prepare_next_step(&self, space: &str) -> ConductorResult<()> {
        self.kv.set(space, keys::ACTIVE, json!(0)).await?;
        self.kv.set(space, keys::MESSAGES, json!(0)).await?;
        self.kv.set(space, keys::DATA, json!([])).await?;
        self.kv.set(space, keys::FINAL, json!(false)).await
    }

    pub(crate) async fn job_state(&self, execution: &str) -> ConductorResult<JobState> {
        let value = self
            .kv
            .get(&global_space(execution), keys::STATE)
            .await?
            .ok_or_else(|| ConductorError::UnknownExecution {
                execution: execution.to_string(),
            })?;
        serde_json::from_value(value)
            .map_err(|e| ConductorError::keyspace(format!("invalid state value: {e}")))
    }

    pub(crate) async fn current_step(&self, execution: &str) -> ConductorResult<u64> {
        self.kv
            .get(&global_space(execution), keys::STEP)
            .await?
            .and_then(|value| value.as_u64())
            .ok_or_else(|| ConductorError::UnknownExecution {
                execution: execution.to_string(),
            })
    }

    pub(crate) async fn superstep_callback(&self, execution: &str) -> Option<Arc<SuperstepFn>> {
        self.supersteps.read().await.get(execution).cloned()
    }
}
