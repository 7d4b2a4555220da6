//! Result-graph materialization and shard-locality planning
//!
//! Runs exactly once per execution, before the first dispatch. For every
//! source collection a result collection is created co-located with it (same
//! shard count, same shard keys, `distribute_shards_like`), and the full
//! locality map is computed so workers can later resolve purely from local
//! data which shards they own and which edge shards sit next to which vertex
//! shard. No shard-discovery RPC happens during step execution.

use crate::cluster::Topology;
use crate::error::ConductorResult;
use crate::storage::{
    CollectionKind, CreateOptions, EdgeDefinition, GraphDefinition, GraphStore,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::debug;

/// Deterministic name of the result collection derived from `collection`.
pub fn result_collection_name(collection: &str, execution: &str) -> String {
    format!("P_{execution}_RESULT_{collection}")
}

/// Per-collection slice of the plan.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CollectionPlan {
    pub kind: CollectionKind,
    pub result_collection: String,
    pub shard_keys: Vec<String>,
    /// Original shard to owning server.
    pub original_shards: BTreeMap<String, String>,
    /// Result shard to owning server.
    pub result_shards: BTreeMap<String, String>,
}

/// The locality map shipped to every worker with the step-0 dispatch.
/// Built once at job start; immutable thereafter.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ShardPlan {
    /// collection -> shard keys
    pub shard_key_map: BTreeMap<String, Vec<String>>,
    /// every shard of every participating collection
    pub shard_map: Vec<String>,
    /// server -> collection -> original vertex shards
    pub server_shard_map: BTreeMap<String, BTreeMap<String, Vec<String>>>,
    /// server -> collection -> result vertex shards
    pub server_result_shard_map: BTreeMap<String, BTreeMap<String, Vec<String>>>,
    /// vertex shard -> co-located edge shards
    pub edge_shards: BTreeMap<String, Vec<String>>,
    /// original shard -> result shard
    pub result_shards: BTreeMap<String, String>,
    /// collection -> result collection
    pub collection_map: BTreeMap<String, String>,
    /// per-collection detail
    pub map: BTreeMap<String, CollectionPlan>,
}

/// Computes the [`ShardPlan`] and creates the result collections and graph.
pub struct ShardPlanner<'a> {
    graphs: &'a dyn GraphStore,
    topology: &'a Topology,
}

impl<'a> ShardPlanner<'a> {
    pub fn new(graphs: &'a dyn GraphStore, topology: &'a Topology) -> Self {
        Self { graphs, topology }
    }

    /// Materializes the result graph for `execution` and returns the plan
    /// together with the result graph's name. Any failure here aborts the
    /// start call before the first dispatch.
    pub async fn create_result_graph(
        &self,
        graph: &GraphDefinition,
        execution: &str,
    ) -> ConductorResult<(ShardPlan, String)> {
        let properties = self.graphs.collection_properties(&graph.name).await?;
        let mut plan = ShardPlan::default();
        let mut vertex_shards: BTreeMap<String, Vec<String>> = BTreeMap::new();
        let mut edge_shard_lists: BTreeMap<String, Vec<String>> = BTreeMap::new();
        let mut shards_per_vertex_collection = 1;

        for (collection, props) in &properties {
            let result_collection = result_collection_name(collection, execution);
            plan.collection_map
                .insert(collection.clone(), result_collection.clone());

            let (original_shards, shard_keys) = if self.topology.is_distributed() {
                (
                    self.graphs.collection_shards(collection).await?,
                    props.shard_keys.clone(),
                )
            } else {
                // Single-node mode: the collection itself is the one shard.
                (
                    BTreeMap::from([(
                        collection.clone(),
                        Topology::LOCAL_PARTICIPANT.to_string(),
                    )]),
                    Vec::new(),
                )
            };
            plan.shard_key_map
                .insert(collection.clone(), shard_keys.clone());
            let shard_names: Vec<String> = original_shards.keys().cloned().collect();
            plan.shard_map.extend(shard_names.iter().cloned());

            match props.kind {
                CollectionKind::Vertex => {
                    shards_per_vertex_collection = shard_names.len();
                    for (shard, server) in &original_shards {
                        plan.server_shard_map
                            .entry(server.clone())
                            .or_default()
                            .entry(collection.clone())
                            .or_default()
                            .push(shard.clone());
                    }
                    vertex_shards.insert(collection.clone(), shard_names);
                }
                CollectionKind::Edge => {
                    edge_shard_lists.insert(collection.clone(), shard_names);
                }
            }

            let options = CreateOptions {
                number_of_shards: props.number_of_shards,
                shard_keys: props.shard_keys.clone(),
                distribute_shards_like: Some(collection.clone()),
            };
            match props.kind {
                CollectionKind::Vertex => {
                    self.graphs
                        .create_vertex_collection(&result_collection, options)
                        .await?;
                    self.graphs
                        .ensure_index(&result_collection, "deleted")
                        .await?;
                }
                CollectionKind::Edge => {
                    self.graphs
                        .create_edge_collection(&result_collection, options)
                        .await?;
                }
            }
            self.graphs
                .ensure_index(&result_collection, "active")
                .await?;

            let result_shards = if self.topology.is_distributed() {
                self.graphs.collection_shards(&result_collection).await?
            } else {
                BTreeMap::from([(
                    result_collection.clone(),
                    Topology::LOCAL_PARTICIPANT.to_string(),
                )])
            };
            if props.kind == CollectionKind::Vertex {
                for (shard, server) in &result_shards {
                    plan.server_result_shard_map
                        .entry(server.clone())
                        .or_default()
                        .entry(collection.clone())
                        .or_default()
                        .push(shard.clone());
                }
            }
            // Shard i of the source maps to shard i of the result; co-location
            // guarantees both live on the same server.
            for (original, result) in original_shards.keys().zip(result_shards.keys()) {
                plan.result_shards
                    .insert(original.clone(), result.clone());
            }

            plan.map.insert(
                collection.clone(),
                CollectionPlan {
                    kind: props.kind,
                    result_collection,
                    shard_keys,
                    original_shards,
                    result_shards,
                },
            );
        }

        // For each vertex-shard index, the list of edge shards with the same
        // index across all edge collections.
        let mut colocated: Vec<Vec<String>> = Vec::with_capacity(shards_per_vertex_collection);
        for index in 0..shards_per_vertex_collection {
            let mut list = Vec::new();
            for shards in edge_shard_lists.values() {
                if let Some(shard) = shards.get(index) {
                    list.push(shard.clone());
                }
            }
            colocated.push(list);
        }
        for shards in vertex_shards.values() {
            for (index, shard) in shards.iter().enumerate() {
                if let Some(list) = colocated.get(index) {
                    plan.edge_shards.insert(shard.clone(), list.clone());
                }
            }
        }

        let result_edge_definitions = graph
            .edge_definitions
            .iter()
            .map(|definition| EdgeDefinition {
                collection: result_collection_name(&definition.collection, execution),
                from: definition
                    .from
                    .iter()
                    .map(|c| result_collection_name(c, execution))
                    .collect(),
                to: definition
                    .to
                    .iter()
                    .map(|c| result_collection_name(c, execution))
                    .collect(),
            })
            .collect();
        let orphan_collections = graph
            .orphan_collections
            .iter()
            .map(|c| result_collection_name(c, execution))
            .collect();
        let result_graph = result_collection_name(&graph.name, execution);
        self.graphs
            .create_graph(&result_graph, result_edge_definitions, orphan_collections)
            .await?;
        debug!(
            execution,
            graph = %result_graph,
            collections = plan.collection_map.len(),
            "result graph materialized"
        );
        Ok((plan, result_graph))
    }
}
