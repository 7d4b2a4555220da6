//! One-shot delayed task scheduling
//!
//! The conductor uses this for exactly one thing: the per-execution watchdog
//! timer, armed at dispatch and disarmed the moment the step barrier reaches
//! zero.

use futures::future::BoxFuture;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::JoinHandle;

/// Deferred callback invoked when a scheduled task fires.
pub type TaskCallback = Box<dyn FnOnce() -> BoxFuture<'static, ()> + Send>;

/// Register/unregister of one-shot delayed callbacks, keyed by task id.
pub trait TaskScheduler: Send + Sync {
    /// Schedules `callback` to run once after `delay`. Re-registering an id
    /// replaces the previous task.
    fn register_one_shot(&self, id: &str, delay: Duration, callback: TaskCallback);

    /// Cancels a pending task. Unknown ids are ignored.
    fn unregister(&self, id: &str);
}

#[derive(Debug)]
struct ScheduledTask {
    generation: u64,
    handle: JoinHandle<()>,
}

/// Tokio-backed [`TaskScheduler`]: each task is a spawned sleep that is
/// aborted on unregister and drops its own registry entry after firing.
/// Must be used from within a tokio runtime.
#[derive(Debug, Default)]
pub struct TokioScheduler {
    tasks: Arc<Mutex<HashMap<String, ScheduledTask>>>,
    generations: AtomicU64,
}

impl TokioScheduler {
    pub fn new() -> Self {
        Self::default()
    }
}

impl TaskScheduler for TokioScheduler {
    fn register_one_shot(&self, id: &str, delay: Duration, callback: TaskCallback) {
        let generation = self.generations.fetch_add(1, Ordering::Relaxed);
        let tasks = Arc::clone(&self.tasks);
        let task_id = id.to_string();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            callback().await;
            // Remove the consumed entry, unless a newer registration has
            // already replaced it under the same id.
            let mut tasks = tasks.lock().expect("scheduler mutex poisoned");
            if tasks
                .get(&task_id)
                .is_some_and(|task| task.generation == generation)
            {
                tasks.remove(&task_id);
            }
        });
        let mut tasks = self.tasks.lock().expect("scheduler mutex poisoned");
        if let Some(previous) = tasks.insert(id.to_string(), ScheduledTask { generation, handle })
        {
            previous.handle.abort();
        }
    }

    fn unregister(&self, id: &str) {
        let task = self
            .tasks
            .lock()
            .expect("scheduler mutex poisoned")
            .remove(id);
        if let Some(task) = task {
            task.handle.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicBool;

    #[tokio::test]
    async fn fires_after_delay() {
        let scheduler = TokioScheduler::new();
        let fired = Arc::new(AtomicBool::new(false));
        let flag = fired.clone();
        scheduler.register_one_shot(
            "t",
            Duration::from_millis(5),
            Box::new(move || {
                Box::pin(async move {
                    flag.store(true, Ordering::SeqCst);
                })
            }),
        );
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(fired.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn unregister_cancels_pending_task() {
        let scheduler = TokioScheduler::new();
        let fired = Arc::new(AtomicBool::new(false));
        let flag = fired.clone();
        scheduler.register_one_shot(
            "t",
            Duration::from_millis(30),
            Box::new(move || {
                Box::pin(async move {
                    flag.store(true, Ordering::SeqCst);
                })
            }),
        );
        scheduler.unregister("t");
        tokio::time::sleep(Duration::from_millis(80)).await;
        assert!(!fired.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn fired_task_drops_its_registry_entry() {
        let scheduler = TokioScheduler::new();
        let fired = Arc::new(AtomicBool::new(false));
        let flag = fired.clone();
        scheduler.register_one_shot(
            "t",
            Duration::from_millis(5),
            Box::new(move || {
                Box::pin(async move {
                    flag.store(true, Ordering::SeqCst);
                })
            }),
        );
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(fired.load(Ordering::SeqCst));
        assert!(scheduler
            .tasks
            .lock()
            .expect("scheduler mutex poisoned")
            .is_empty());
    }
}
