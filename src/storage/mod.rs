//! Graph storage layer and execution record registry seams
//!
//! Both are external collaborators: the graph storage layer owns collections,
//! shard placement and graph objects; the registry persists the per-job
//! ExecutionRecord durably, outside the keyspace store. Memory-backed
//! implementations for single-process mode and tests live in [`memory`].

pub mod memory;

pub use memory::{MemoryExecutionRegistry, MemoryGraphStore};

use crate::error::ConductorResult;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// Whether a collection stores vertices or edges.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CollectionKind {
    Vertex,
    Edge,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CollectionProperties {
    pub kind: CollectionKind,
    pub number_of_shards: u32,
    pub shard_keys: Vec<String>,
}

/// An edge collection plus the vertex collections it connects.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EdgeDefinition {
    pub collection: String,
    pub from: Vec<String>,
    pub to: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct GraphDefinition {
    pub name: String,
    pub edge_definitions: Vec<EdgeDefinition>,
    /// Vertex collections not referenced by any edge definition.
    pub orphan_collections: Vec<String>,
}

impl GraphDefinition {
    /// Every collection participating in this graph, deduplicated.
    pub fn collections(&self) -> Vec<String> {
        let mut names = std::collections::BTreeSet::new();
        for definition in &self.edge_definitions {
            names.insert(definition.collection.clone());
            names.extend(definition.from.iter().cloned());
            names.extend(definition.to.iter().cloned());
        }
        names.extend(self.orphan_collections.iter().cloned());
        names.into_iter().collect()
    }
}

/// Parameters for creating a result collection co-located with its source.
#[derive(Debug, Clone, Default)]
pub struct CreateOptions {
    pub number_of_shards: u32,
    pub shard_keys: Vec<String>,
    /// Place shards on the same servers as this collection's shards.
    pub distribute_shards_like: Option<String>,
}

/// The graph storage layer.
#[async_trait]
pub trait GraphStore: Send + Sync {
    async fn graph(&self, name: &str) -> ConductorResult<GraphDefinition>;

    /// Properties of every collection participating in `graph`.
    async fn collection_properties(
        &self,
        graph: &str,
    ) -> ConductorResult<BTreeMap<String, CollectionProperties>>;

    /// Shard name to owning server, in stable shard order.
    async fn collection_shards(
        &self,
        collection: &str,
    ) -> ConductorResult<BTreeMap<String, String>>;

    async fn create_vertex_collection(
        &self,
        name: &str,
        options: CreateOptions,
    ) -> ConductorResult<()>;

    async fn create_edge_collection(
        &self,
        name: &str,
        options: CreateOptions,
    ) -> ConductorResult<()>;

    /// Ensures a secondary index on `field`.
    async fn ensure_index(&self, collection: &str, field: &str) -> ConductorResult<()>;

    async fn create_graph(
        &self,
        name: &str,
        edge_definitions: Vec<EdgeDefinition>,
        orphan_collections: Vec<String>,
    ) -> ConductorResult<()>;

    /// Drops a graph and, when `drop_collections`, its collections too.
    async fn drop_graph(&self, name: &str, drop_collections: bool) -> ConductorResult<()>;

    /// Total vertex count across the graph's vertex collections.
    async fn vertex_count(&self, graph: &str) -> ConductorResult<u64>;
}

/// Durable per-job record, persisted outside the keyspace store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionRecord {
    /// Caller-supplied configuration/globals, mutable between steps.
    pub global_values: Value,
}

#[async_trait]
pub trait ExecutionRegistry: Send + Sync {
    /// Persists a new record and returns the generated execution number.
    async fn save(&self, record: ExecutionRecord) -> ConductorResult<String>;

    async fn globals(&self, execution: &str) -> ConductorResult<Option<Value>>;

    async fn update_globals(&self, execution: &str, globals: Value) -> ConductorResult<()>;

    async fn remove(&self, execution: &str) -> ConductorResult<()>;
}
