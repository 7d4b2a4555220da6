//! Step advance logic
//!
//! Runs exactly once per phase, on the callback that brought the barrier to
//! zero. Exactly one of {next step, final step, cleanup} is chosen, in that
//! order of precedence.

use crate::conductor::{global_space, server_space, Conductor, StepSummary};
use crate::error::ConductorResult;
use crate::keyspace::keys;
use serde_json::json;
use std::sync::Arc;
use tracing::info;

use super::barrier;

impl Conductor {
    /// Advances the execution after the step barrier completed: snapshots the
    /// finished step, resets the accumulators, rebuilds the wait set, runs
    /// the aggregation callback, then decides continue/final/cleanup.
    pub(crate) async fn init_next_step(self: &Arc<Self>, execution: &str) -> ConductorResult<()> {
        let space = global_space(execution);
        let kv = self.kv.as_ref();

        let step = kv.increment(&space, keys::STEP, 1).await? as u64;
        let active = kv
            .get(&space, keys::ACTIVE)
            .await?
            .and_then(|value| value.as_i64())
            .unwrap_or(0);
        let messages = kv
            .get(&space, keys::MESSAGES)
            .await?
            .and_then(|value| value.as_i64())
            .unwrap_or(0);
        let was_final = kv
            .get(&space, keys::FINAL)
            .await?
            .and_then(|value| value.as_bool())
            .unwrap_or(false);
        let data = match kv.get(&space, keys::DATA).await? {
            Some(serde_json::Value::Array(items)) => items,
            _ => Vec::new(),
        };
        let summary = StepSummary {
            active,
            messages,
            data,
            is_final: was_final,
        };
        kv.push(&space, keys::STEP_CONTENT, serde_json::to_value(&summary)?)
            .await?;
        self.prepare_next_step(&space).await?;
        barrier::rebuild(
            kv,
            &server_space(execution),
            &self.topology.participants(),
        )
        .await?;

        if let Some(callback) = self.superstep_callback(execution).await {
            let mut globals = kv
                .get(&space, keys::GLOBALS)
                .await?
                .unwrap_or_else(|| json!({}));
            if !globals.is_object() {
                globals = json!({});
            }
            // The step just completed, visible to the callback.
            globals["step"] = json!(step - 1);
            let globals = callback(globals, &summary);
            kv.set(&space, keys::GLOBALS, globals.clone()).await?;
            // Workers receive globals from the durable record on the next
            // dispatch.
            self.registry.update_globals(execution, globals).await?;
        }

        info!(
            execution,
            step = step - 1,
            active,
            messages,
            "superstep complete"
        );
        if active > 0 || messages > 0 {
            self.start_next_step(execution, None).await
        } else if !was_final && kv.exists(&space, keys::FINAL_STEP).await? {
            kv.set(&space, keys::FINAL, json!(true)).await?;
            self.start_next_step(execution, Some(json!({ "final": true })))
                .await
        } else {
            self.clean_up(execution, None).await
        }
    }
}
