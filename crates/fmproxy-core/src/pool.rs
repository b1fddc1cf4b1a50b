//! Model Pool (SPEC_FULL.md §4.9): tracks which models have been used
//! recently so an idle sweeper can reap state associated with models that
//! have gone quiet. Mirrors the mutex-guarded map and periodic-sweep shape
//! of `gproxy-provider-core::credential::pool::CredentialPool`, scaled down
//! to what this proxy needs (no per-entry recovery task, just liveness
//! bookkeeping).

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use tokio::time::Instant;

#[derive(Debug, Clone)]
pub struct PooledModel {
    pub last_used: Instant,
    pub request_count: u64,
}

/// Mutex-guarded map of in-use models. `touch` is the only mutation path
/// and always goes through `entry(...).or_insert_with`, so a model's pool
/// entry is created at most once even under concurrent first-use (spec.md
/// §3's "Pool membership for a model is never concurrently created twice").
pub struct ModelPool {
    entries: Mutex<HashMap<String, PooledModel>>,
    idle_threshold: Duration,
}

impl ModelPool {
    pub fn new(idle_threshold: Duration) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            idle_threshold,
        }
    }

    pub fn touch(&self, model: &str) {
        let mut guard = self.entries.lock().expect("model pool mutex poisoned");
        let entry = guard.entry(model.to_string()).or_insert_with(|| PooledModel {
            last_used: Instant::now(),
            request_count: 0,
        });
        entry.last_used = Instant::now();
        entry.request_count += 1;
    }

    pub fn len(&self) -> usize {
        self.entries.lock().expect("model pool mutex poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn request_count(&self, model: &str) -> Option<u64> {
        self.entries
            .lock()
            .expect("model pool mutex poisoned")
            .get(model)
            .map(|entry| entry.request_count)
    }

    /// Evicts every entry whose idle interval exceeds the configured
    /// threshold. Intended to be called from a `tokio::time::interval` loop
    /// spawned at bootstrap, the way `CredentialPool::spawn_recover_task`
    /// runs its own periodic sweep.
    pub fn sweep_idle(&self) -> usize {
        let mut guard = self.entries.lock().expect("model pool mutex poisoned");
        let before = guard.len();
        guard.retain(|_, entry| entry.last_used.elapsed() <= self.idle_threshold);
        before - guard.len()
    }
}

/// Spawns the periodic idle-sweep task. Returns the `JoinHandle` so the
/// caller can abort it on shutdown.
pub fn spawn_sweeper(pool: std::sync::Arc<ModelPool>, interval: Duration) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            ticker.tick().await;
            let reaped = pool.sweep_idle();
            if reaped > 0 {
                tracing::debug!(reaped, "swept idle model pool entries");
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn touch_creates_entry_once_and_increments_count() {
        let pool = ModelPool::new(Duration::from_secs(600));
        pool.touch("gpt-5-nano");
        pool.touch("gpt-5-nano");
        pool.touch("gpt-5-nano");
        assert_eq!(pool.len(), 1);
        assert_eq!(pool.request_count("gpt-5-nano"), Some(3));
    }

    #[test]
    fn sweep_removes_only_idle_entries() {
        let pool = ModelPool::new(Duration::from_millis(0));
        pool.touch("a");
        std::thread::sleep(Duration::from_millis(5));
        let reaped = pool.sweep_idle();
        assert_eq!(reaped, 1);
        assert!(pool.is_empty());
    }
}
