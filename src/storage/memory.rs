//! Map-backed graph store and execution registry

use crate::error::{ConductorError, ConductorResult};
use crate::storage::{
    CollectionKind, CollectionProperties, CreateOptions, EdgeDefinition, ExecutionRecord,
    ExecutionRegistry, GraphDefinition, GraphStore,
};
use async_trait::async_trait;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;
use uuid::Uuid;

#[derive(Debug, Clone)]
struct MemoryCollection {
    properties: CollectionProperties,
    /// Shard name to owning server, in shard order.
    shards: BTreeMap<String, String>,
    index_fields: Vec<String>,
    vertex_count: u64,
}

#[derive(Debug, Default)]
struct Inner {
    collections: BTreeMap<String, MemoryCollection>,
    graphs: BTreeMap<String, GraphDefinition>,
}

/// In-memory [`GraphStore`] with explicit shard placement, used for
/// single-process mode and tests. Shards of collection `c` are named
/// `c/s000`, `c/s001`, ... so that sorted shard order equals shard index.
#[derive(Debug, Default)]
pub struct MemoryGraphStore {
    inner: Mutex<Inner>,
}

fn shard_name(collection: &str, index: usize) -> String {
    format!("{collection}/s{index:03}")
}

impl MemoryGraphStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner.lock().expect("graph store mutex poisoned")
    }

    /// Seeds a collection with one shard per listed server.
    pub fn add_collection(
        &self,
        name: &str,
        kind: CollectionKind,
        servers: &[&str],
        shard_keys: &[&str],
    ) {
        let shards = servers
            .iter()
            .enumerate()
            .map(|(i, server)| (shard_name(name, i), server.to_string()))
            .collect();
        self.lock().collections.insert(
            name.to_string(),
            MemoryCollection {
                properties: CollectionProperties {
                    kind,
                    number_of_shards: servers.len() as u32,
                    shard_keys: shard_keys.iter().map(|k| k.to_string()).collect(),
                },
                shards,
                index_fields: Vec::new(),
                vertex_count: 0,
            },
        );
    }

    pub fn set_vertex_count(&self, collection: &str, count: u64) {
        if let Some(col) = self.lock().collections.get_mut(collection) {
            col.vertex_count = count;
        }
    }

    pub fn add_graph(
        &self,
        name: &str,
        edge_definitions: Vec<EdgeDefinition>,
        orphan_collections: Vec<String>,
    ) {
        self.lock().graphs.insert(
            name.to_string(),
            GraphDefinition {
                name: name.to_string(),
                edge_definitions,
                orphan_collections,
            },
        );
    }

    pub fn has_collection(&self, name: &str) -> bool {
        self.lock().collections.contains_key(name)
    }

    pub fn has_graph(&self, name: &str) -> bool {
        self.lock().graphs.contains_key(name)
    }

    pub fn collection_names(&self) -> Vec<String> {
        self.lock().collections.keys().cloned().collect()
    }

    pub fn index_fields(&self, collection: &str) -> Vec<String> {
        self.lock()
            .collections
            .get(collection)
            .map(|col| col.index_fields.clone())
            .unwrap_or_default()
    }

    fn create_collection(
        &self,
        name: &str,
        kind: CollectionKind,
        options: CreateOptions,
    ) -> ConductorResult<()> {
        let mut inner = self.lock();
        if inner.collections.contains_key(name) {
            return Err(ConductorError::storage(format!(
                "collection `{name}` already exists"
            )));
        }
        // Co-location: shard i of the new collection lands on the server that
        // owns shard i of the template collection.
        let servers: Vec<String> = match &options.distribute_shards_like {
            Some(template) => {
                let template = inner.collections.get(template).ok_or_else(|| {
                    ConductorError::storage(format!(
                        "distribute_shards_like template `{template}` not found"
                    ))
                })?;
                template.shards.values().cloned().collect()
            }
            None => (0..options.number_of_shards.max(1))
                .map(|_| "localhost".to_string())
                .collect(),
        };
        let shards = servers
            .iter()
            .enumerate()
            .map(|(i, server)| (shard_name(name, i), server.clone()))
            .collect();
        inner.collections.insert(
            name.to_string(),
            MemoryCollection {
                properties: CollectionProperties {
                    kind,
                    number_of_shards: servers.len() as u32,
                    shard_keys: options.shard_keys,
                },
                shards,
                index_fields: Vec::new(),
                vertex_count: 0,
            },
        );
        Ok(())
    }
}

#[async_trait]
impl GraphStore for MemoryGraphStore {
    async fn graph(&self, name: &str) -> ConductorResult<GraphDefinition> {
        self.lock()
            .graphs
            .get(name)
            .cloned()
            .ok_or_else(|| ConductorError::storage(format!("graph `{name}` not found")))
    }

    async fn collection_properties(
        &self,
        graph: &str,
    ) -> ConductorResult<BTreeMap<String, CollectionProperties>> {
        let definition = self.graph(graph).await?;
        let inner = self.lock();
        let mut properties = BTreeMap::new();
        for name in definition.collections() {
            let col = inner.collections.get(&name).ok_or_else(|| {
                ConductorError::storage(format!("collection `{name}` not found"))
            })?;
            properties.insert(name, col.properties.clone());
        }
        Ok(properties)
    }

    async fn collection_shards(
        &self,
        collection: &str,
    ) -> ConductorResult<BTreeMap<String, String>> {
        self.lock()
            .collections
            .get(collection)
            .map(|col| col.shards.clone())
            .ok_or_else(|| ConductorError::storage(format!("collection `{collection}` not found")))
    }

    async fn create_vertex_collection(
        &self,
        name: &str,
        options: CreateOptions,
    ) -> ConductorResult<()> {
        self.create_collection(name, CollectionKind::Vertex, options)
    }

    async fn create_edge_collection(
        &self,
        name: &str,
        options: CreateOptions,
    ) -> ConductorResult<()> {
        self.create_collection(name, CollectionKind::Edge, options)
    }

    async fn ensure_index(&self, collection: &str, field: &str) -> ConductorResult<()> {
        let mut inner = self.lock();
        let col = inner.collections.get_mut(collection).ok_or_else(|| {
            ConductorError::storage(format!("collection `{collection}` not found"))
        })?;
        if !col.index_fields.iter().any(|f| f == field) {
            col.index_fields.push(field.to_string());
        }
        Ok(())
    }

    async fn create_graph(
        &self,
        name: &str,
        edge_definitions: Vec<EdgeDefinition>,
        orphan_collections: Vec<String>,
    ) -> ConductorResult<()> {
        let mut inner = self.lock();
        if inner.graphs.contains_key(name) {
            return Err(ConductorError::storage(format!(
                "graph `{name}` already exists"
            )));
        }
        inner.graphs.insert(
            name.to_string(),
            GraphDefinition {
                name: name.to_string(),
                edge_definitions,
                orphan_collections,
            },
        );
        Ok(())
    }

    async fn drop_graph(&self, name: &str, drop_collections: bool) -> ConductorResult<()> {
        let mut inner = self.lock();
        let definition = inner
            .graphs
            .remove(name)
            .ok_or_else(|| ConductorError::storage(format!("graph `{name}` not found")))?;
        if drop_collections {
            for collection in definition.collections() {
                inner.collections.remove(&collection);
            }
        }
        Ok(())
    }

    async fn vertex_count(&self, graph: &str) -> ConductorResult<u64> {
        let definition = self.graph(graph).await?;
        let inner = self.lock();
        let mut total = 0;
        for name in definition.collections() {
            if let Some(col) = inner.collections.get(&name) {
                if col.properties.kind == CollectionKind::Vertex {
                    total += col.vertex_count;
                }
            }
        }
        Ok(total)
    }
}

/// In-memory [`ExecutionRegistry`] generating UUID execution numbers.
#[derive(Debug, Default)]
pub struct MemoryExecutionRegistry {
    records: Mutex<HashMap<String, ExecutionRecord>>,
}

impl MemoryExecutionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.records.lock().expect("registry mutex poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl ExecutionRegistry for MemoryExecutionRegistry {
    async fn save(&self, record: ExecutionRecord) -> ConductorResult<String> {
        let execution = Uuid::new_v4().to_string();
        self.records
            .lock()
            .expect("registry mutex poisoned")
            .insert(execution.clone(), record);
        Ok(execution)
    }

    async fn globals(&self, execution: &str) -> ConductorResult<Option<Value>> {
        Ok(self
            .records
            .lock()
            .expect("registry mutex poisoned")
            .get(execution)
            .map(|record| record.global_values.clone()))
    }

    async fn update_globals(&self, execution: &str, globals: Value) -> ConductorResult<()> {
        let mut records = self.records.lock().expect("registry mutex poisoned");
        let record = records
            .get_mut(execution)
            .ok_or_else(|| ConductorError::UnknownExecution {
                execution: execution.to_string(),
            })?;
        record.global_values = globals;
        Ok(())
    }

    async fn remove(&self, execution: &str) -> ConductorResult<()> {
        self.records
            .lock()
            .expect("registry mutex poisoned")
            .remove(execution);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn colocated_creation_follows_template_placement() {
        let store = MemoryGraphStore::new();
        store.add_collection(
            "people",
            CollectionKind::Vertex,
            &["alpha", "beta"],
            &["_key"],
        );
        store
            .create_vertex_collection(
                "people_copy",
                CreateOptions {
                    number_of_shards: 2,
                    shard_keys: vec!["_key".to_string()],
                    distribute_shards_like: Some("people".to_string()),
                },
            )
            .await
            .unwrap();

        let original: Vec<String> = store
            .collection_shards("people")
            .await
            .unwrap()
            .into_values()
            .collect();
        let copied: Vec<String> = store
            .collection_shards("people_copy")
            .await
            .unwrap()
            .into_values()
            .collect();
        assert_eq!(original, copied);
    }

    #[tokio::test]
    async fn vertex_count_sums_vertex_collections_only() {
        let store = MemoryGraphStore::new();
        store.add_collection("v1", CollectionKind::Vertex, &["a"], &[]);
        store.add_collection("v2", CollectionKind::Vertex, &["a"], &[]);
        store.add_collection("e", CollectionKind::Edge, &["a"], &[]);
        store.set_vertex_count("v1", 10);
        store.set_vertex_count("v2", 5);
        store.add_graph(
            "g",
            vec![EdgeDefinition {
                collection: "e".to_string(),
                from: vec!["v1".to_string()],
                to: vec!["v2".to_string()],
            }],
            vec![],
        );
        assert_eq!(store.vertex_count("g").await.unwrap(), 15);
    }

    #[tokio::test]
    async fn drop_graph_can_take_collections_with_it() {
        let store = MemoryGraphStore::new();
        store.add_collection("v", CollectionKind::Vertex, &["a"], &[]);
        store.add_collection("e", CollectionKind::Edge, &["a"], &[]);
        store.add_graph(
            "g",
            vec![EdgeDefinition {
                collection: "e".to_string(),
                from: vec!["v".to_string()],
                to: vec!["v".to_string()],
            }],
            vec![],
        );
        store.drop_graph("g", true).await.unwrap();
        assert!(!store.has_graph("g"));
        assert!(!store.has_collection("v"));
        assert!(!store.has_collection("e"));
    }

    #[tokio::test]
    async fn registry_round_trip() {
        let registry = MemoryExecutionRegistry::new();
        let execution = registry
            .save(ExecutionRecord {
                global_values: json!({"graphName": "g"}),
            })
            .await
            .unwrap();
        assert_eq!(
            registry.globals(&execution).await.unwrap(),
            Some(json!({"graphName": "g"}))
        );
        registry
            .update_globals(&execution, json!({"x": 1}))
            .await
            .unwrap();
        assert_eq!(
            registry.globals(&execution).await.unwrap(),
            Some(json!({"x": 1}))
        );
        registry.remove(&execution).await.unwrap();
        assert_eq!(registry.globals(&execution).await.unwrap(), None);
    }
}
