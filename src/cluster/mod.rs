//! Cluster topology and worker communication seams
//!
//! The conductor never talks to workers directly: in a cluster it fans
//! requests out through [`ClusterComm`], in single-process mode it invokes a
//! [`WorkerExecutor`] in-process. Which of the two applies is decided once at
//! process start by [`Topology`], never queried from ambient server state.

use crate::conductor::DispatchBody;
use crate::error::ConductorResult;
use async_trait::async_trait;
use serde_json::Value;
use uuid::Uuid;

/// Worker-facing RPC path for superstep dispatch.
pub const NEXT_STEP_PATH: &str = "/_api/pregel/nextStep";

/// Worker-facing RPC path for the cleanup command.
pub fn cleanup_path(execution: &str) -> String {
    format!("/_api/pregel/cleanup/{execution}")
}

/// Groups a batch of asynchronous sends for delivery acknowledgement.
pub type CorrelationId = Uuid;

/// How the conductor reaches its workers. Selected once at process start.
#[derive(Debug, Clone)]
pub enum Topology {
    /// Fan out to the named worker servers via the cluster comm service.
    Distributed { servers: Vec<String> },
    /// Single-process mode with one in-process worker.
    Local,
}

impl Topology {
    /// Participant name used for the single worker in local mode.
    pub const LOCAL_PARTICIPANT: &'static str = "localhost";

    /// The participant names expected to report completion for each phase.
    pub fn participants(&self) -> Vec<String> {
        match self {
            Topology::Distributed { servers } => servers.clone(),
            Topology::Local => vec![Self::LOCAL_PARTICIPANT.to_string()],
        }
    }

    pub fn is_distributed(&self) -> bool {
        matches!(self, Topology::Distributed { .. })
    }
}

/// Asynchronous request dispatch to named servers.
#[async_trait]
pub trait ClusterComm: Send + Sync {
    /// Allocates a fresh correlation id for one batch of sends.
    fn new_correlation(&self) -> CorrelationId {
        Uuid::new_v4()
    }

    /// Dispatches `body` to `server` without waiting for a response. The send
    /// is tagged with `correlation` for later acknowledgement.
    fn async_send(
        &self,
        server: &str,
        path: &str,
        body: Value,
        correlation: CorrelationId,
    ) -> ConductorResult<()>;

    /// Resolves once every send tagged with `correlation` has been delivered.
    /// Delivery, not completion: workers answer later through the conductor's
    /// callback entry points.
    async fn await_all(&self, correlation: CorrelationId) -> ConductorResult<()>;
}

/// In-process worker entry points, used in [`Topology::Local`].
///
/// Implementations are expected to run the step on their local shards and
/// report back through `Conductor::finished_step` / `finished_cleanup`,
/// exactly like a remote worker would.
#[async_trait]
pub trait WorkerExecutor: Send + Sync {
    async fn execute_step(
        &self,
        execution: &str,
        step: u64,
        body: DispatchBody,
    ) -> ConductorResult<()>;

    async fn clean_up(&self, execution: &str) -> ConductorResult<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn local_topology_has_single_participant() {
        let topology = Topology::Local;
        assert_eq!(topology.participants(), vec!["localhost".to_string()]);
        assert!(!topology.is_distributed());
    }

    #[test]
    fn distributed_topology_lists_all_servers() {
        let topology = Topology::Distributed {
            servers: vec!["s1".into(), "s2".into()],
        };
        assert_eq!(topology.participants().len(), 2);
        assert!(topology.is_distributed());
    }
}
