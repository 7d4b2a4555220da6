//! Wall-clock bookkeeping in the per-execution timer namespace
//!
//! `ongoing` marks the start of the current timed interval; `store` closes it
//! under a named sample (milliseconds) and opens the next one.

use crate::error::ConductorResult;
use crate::keyspace::{keys, KeyValueStore};
use chrono::Utc;
use serde_json::json;

pub(crate) async fn start(kv: &dyn KeyValueStore, space: &str) -> ConductorResult<()> {
    kv.set(space, keys::ONGOING, json!(Utc::now().timestamp_millis()))
        .await
}

pub(crate) async fn store(
    kv: &dyn KeyValueStore,
    space: &str,
    title: &str,
) -> ConductorResult<()> {
    let now = Utc::now().timestamp_millis();
    let started = kv
        .get(space, keys::ONGOING)
        .await?
        .and_then(|value| value.as_i64())
        .unwrap_or(now);
    kv.set(space, title, json!(now - started)).await?;
    kv.set(space, keys::ONGOING, json!(now)).await
}

pub(crate) async fn clear(kv: &dyn KeyValueStore, space: &str) -> ConductorResult<()> {
    kv.remove(space, keys::ONGOING).await
}
