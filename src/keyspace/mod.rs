//! The atomic keyspace store
//!
//! The keyspace store is the conductor's only shared mutable state. Keys are
//! scoped into named namespaces ("keyspaces") that are created and destroyed
//! as a unit, one set per execution. Every field kept there is either
//! monotonic (the step counter), commutative-accumulating (active/messages/
//! data), or boolean-idempotent via compare-and-swap (the per-participant
//! wait-set flags), so concurrent worker callbacks never need a lock across
//! the store.
//!
//! Production deployments back this with the distributed key-value store;
//! [`MemoryKeyValueStore`] serves single-process mode and tests.

pub mod memory;

pub use memory::MemoryKeyValueStore;

use crate::error::ConductorResult;
use async_trait::async_trait;
use serde_json::Value;

/// Well-known keys within the per-execution namespaces.
pub mod keys {
    /// Current superstep index (global namespace, monotone counter).
    pub const STEP: &str = "step";
    /// Append-only log of per-step summaries.
    pub const STEP_CONTENT: &str = "stepContent";
    /// Globals snapshot visible to the superstep aggregation callback.
    pub const GLOBALS: &str = "globals";
    /// Final-pass program source; present only when the caller supplied one.
    pub const FINAL_STEP: &str = "finalstep";
    /// Vertices still active in the current step.
    pub const ACTIVE: &str = "active";
    /// Messages produced in the current step.
    pub const MESSAGES: &str = "messages";
    /// Ordered log of opaque payload fragments reported by workers.
    pub const DATA: &str = "data";
    /// Wait-set countdown (server namespace).
    pub const COUNTER: &str = "counter";
    /// Configured watchdog duration in milliseconds.
    pub const TIMEOUT: &str = "timeout";
    /// True once the one-shot final pass has been entered.
    pub const FINAL: &str = "final";
    /// Start timestamp of the current timed interval (timer namespace).
    pub const ONGOING: &str = "ongoing";
    /// Externally observable job status.
    pub const STATE: &str = "state";
    /// Terminal failure payload, set only when state is `error`.
    pub const ERROR: &str = "error";
    /// Name of the materialized result graph.
    pub const GRAPH: &str = "graph";
}

/// Per-key atomic operations over named keyspaces.
///
/// Reads of an unknown keyspace behave as absence (`None`/`false`); writes
/// into an unknown keyspace are errors. `increment` treats a missing key as
/// zero and returns the new value.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    async fn create_keyspace(&self, space: &str) -> ConductorResult<()>;

    /// Destroys a namespace and everything in it. Destroying an unknown
    /// namespace is a no-op.
    async fn destroy_keyspace(&self, space: &str) -> ConductorResult<()>;

    async fn set(&self, space: &str, key: &str, value: Value) -> ConductorResult<()>;

    async fn get(&self, space: &str, key: &str) -> ConductorResult<Option<Value>>;

    /// Atomically adds `delta` to an integer key and returns the new value.
    async fn increment(&self, space: &str, key: &str, delta: i64) -> ConductorResult<i64>;

    /// Atomically subtracts `delta` and returns the new value.
    async fn decrement(&self, space: &str, key: &str, delta: i64) -> ConductorResult<i64> {
        self.increment(space, key, -delta).await
    }

    /// Appends `value` to the ordered list stored under `key`.
    async fn push(&self, space: &str, key: &str, value: Value) -> ConductorResult<()>;

    async fn exists(&self, space: &str, key: &str) -> ConductorResult<bool>;

    async fn remove(&self, space: &str, key: &str) -> ConductorResult<()>;

    /// Atomically replaces the stored value with `new` if it currently equals
    /// `expected`. Returns whether the swap happened. A missing key never
    /// matches.
    async fn compare_and_swap(
        &self,
        space: &str,
        key: &str,
        expected: Value,
        new: Value,
    ) -> ConductorResult<bool>;
}
