//! Counting, idempotent rendezvous over the per-execution wait set
//!
//! Each phase (step barrier, cleanup barrier) is a fresh wait set: one
//! boolean flag per participant plus a shared countdown. A participant claims
//! its flag with compare-and-swap, so duplicate or retried reports lose the
//! claim and are never counted twice; the countdown reaches zero exactly once
//! per phase.

use crate::error::ConductorResult;
use crate::keyspace::{keys, KeyValueStore};
use serde_json::json;

/// Rebuilds the wait set for a new phase: every participant unreported, the
/// counter at the participant count.
pub(crate) async fn rebuild(
    kv: &dyn KeyValueStore,
    space: &str,
    participants: &[String],
) -> ConductorResult<()> {
    for participant in participants {
        kv.set(space, participant, json!(false)).await?;
    }
    kv.set(space, keys::COUNTER, json!(participants.len() as i64))
        .await
}

/// Whether `participant` is part of the current phase.
pub(crate) async fn is_participant(
    kv: &dyn KeyValueStore,
    space: &str,
    participant: &str,
) -> ConductorResult<bool> {
    kv.exists(space, participant).await
}

/// Flips the participant's flag `false -> true`. Returns false when the flag
/// was already set (a duplicate report); the caller must then skip
/// accumulation entirely.
pub(crate) async fn try_claim(
    kv: &dyn KeyValueStore,
    space: &str,
    participant: &str,
) -> ConductorResult<bool> {
    kv.compare_and_swap(space, participant, json!(false), json!(true))
        .await
}

/// Decrements the phase counter after a successful claim and returns the
/// number of participants still outstanding. Call only after the claimed
/// participant's accumulation is done, so that zero implies all payloads are
/// in.
pub(crate) async fn arrive(kv: &dyn KeyValueStore, space: &str) -> ConductorResult<i64> {
    kv.decrement(space, keys::COUNTER, 1).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keyspace::MemoryKeyValueStore;

    fn participants() -> Vec<String> {
        vec!["s1".to_string(), "s2".to_string(), "s3".to_string()]
    }

    #[tokio::test]
    async fn counter_reaches_zero_exactly_once() {
        let kv = MemoryKeyValueStore::new();
        kv.create_keyspace("w").await.unwrap();
        rebuild(&kv, "w", &participants()).await.unwrap();

        assert!(try_claim(&kv, "w", "s1").await.unwrap());
        assert_eq!(arrive(&kv, "w").await.unwrap(), 2);
        assert!(try_claim(&kv, "w", "s2").await.unwrap());
        assert_eq!(arrive(&kv, "w").await.unwrap(), 1);
        assert!(try_claim(&kv, "w", "s3").await.unwrap());
        assert_eq!(arrive(&kv, "w").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn duplicate_claim_loses() {
        let kv = MemoryKeyValueStore::new();
        kv.create_keyspace("w").await.unwrap();
        rebuild(&kv, "w", &participants()).await.unwrap();

        assert!(try_claim(&kv, "w", "s1").await.unwrap());
        assert!(!try_claim(&kv, "w", "s1").await.unwrap());
    }

    #[tokio::test]
    async fn rebuild_resets_claims_for_the_next_phase() {
        let kv = MemoryKeyValueStore::new();
        kv.create_keyspace("w").await.unwrap();
        rebuild(&kv, "w", &participants()).await.unwrap();
        assert!(try_claim(&kv, "w", "s1").await.unwrap());

        rebuild(&kv, "w", &participants()).await.unwrap();
        assert!(try_claim(&kv, "w", "s1").await.unwrap());
        assert_eq!(arrive(&kv, "w").await.unwrap(), 2);
    }

    #[tokio::test]
    async fn unknown_participant_is_not_in_the_wait_set() {
        let kv = MemoryKeyValueStore::new();
        kv.create_keyspace("w").await.unwrap();
        rebuild(&kv, "w", &participants()).await.unwrap();
        assert!(!is_participant(&kv, "w", "s9").await.unwrap());
        assert!(!try_claim(&kv, "w", "s9").await.unwrap());
    }
}
