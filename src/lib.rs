//! # pregel-conductor
//!
//! Coordinator of bulk-synchronous-parallel (BSP) graph computations over
//! sharded collections. The conductor drives a set of worker servers through
//! repeated supersteps: it fans out the step command, collects completion
//! reports at a counting barrier, aggregates termination signals, decides
//! continue/final/cleanup, and forces failure handling through a watchdog
//! timer when a phase stalls. The result of a job is a sharded graph
//! materialized co-located with its source collections.
//!
//! ## Modules
//!
//! - `conductor` - the orchestrating state machine and its public contract
//! - `plan` - result-graph materialization and shard-locality planning
//! - `keyspace` - the atomic keyspace store the conductor keeps its state in
//! - `cluster` - topology, cluster communication and worker seams
//! - `scheduler` - one-shot delayed tasks (the watchdog)
//! - `storage` - graph storage layer and execution record registry seams
//! - `testing` - test doubles for the external collaborators

pub mod cluster;
pub mod conductor;
pub mod error;
pub mod keyspace;
pub mod plan;
pub mod scheduler;
pub mod storage;

pub mod testing;

pub use cluster::{ClusterComm, Topology, WorkerExecutor};
pub use conductor::{
    Algorithm, Conductor, ConductorConfig, DelimiterValidator, DispatchBody, ExecutionInfo,
    ExecutionOptions, ExecutionResult, JobState, SourceValidator, StepReport, StepSummary,
    DEFAULT_STEP_TIMEOUT,
};
pub use error::{ConductorError, ConductorResult};
pub use keyspace::{KeyValueStore, MemoryKeyValueStore};
pub use plan::{ShardPlan, ShardPlanner};
pub use scheduler::{TaskScheduler, TokioScheduler};
pub use storage::{
    ExecutionRecord, ExecutionRegistry, GraphStore, MemoryExecutionRegistry, MemoryGraphStore,
};
