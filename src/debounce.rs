use std::collections::HashMap;
use std::future::Future;
use std::hash::Hash;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio::task::JoinHandle;

/// Delay that coalesces keystrokes in one cell into a single write.
pub const CELL_EDIT_DEBOUNCE: Duration = Duration::from_millis(500);
/// Delay before formatting rules are re-evaluated and saved.
pub const COLOR_RULE_DEBOUNCE: Duration = Duration::from_millis(150);

struct Pending {
    generation: u64,
    handle: JoinHandle<()>,
}

/// Keyed trailing-edge debouncer on tokio timers.
///
/// Scheduling a task for a key cancels the task still waiting for that key. Different keys
/// run on independent timers. Once a task's delay has elapsed it is no longer cancellable.
pub struct Debouncer<K> {
    delay: Duration,
    pending: Arc<Mutex<HashMap<K, Pending>>>,
    next_generation: Mutex<u64>,
}

impl<K> Debouncer<K>
where
    K: Eq + Hash + Clone + Send + 'static,
{
    pub fn new(delay: Duration) -> Self {
        Debouncer {
            delay,
            pending: Arc::new(Mutex::new(HashMap::new())),
            next_generation: Mutex::new(0),
        }
    }

    pub fn delay(&self) -> Duration {
        self.delay
    }

    /// Must be called from within a tokio runtime.
    pub fn schedule<F>(&self, key: K, task: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let generation = {
            let mut next = self
                .next_generation
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            *next += 1;
            *next
        };

        let mut pending = self.pending.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(previous) = pending.remove(&key) {
            previous.handle.abort();
        }

        let delay = self.delay;
        let registry = Arc::clone(&self.pending);
        let task_key = key.clone();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            {
                let mut pending = registry.lock().unwrap_or_else(PoisonError::into_inner);
                match pending.get(&task_key) {
                    Some(p) if p.generation == generation => {
                        pending.remove(&task_key);
                    }
                    _ => return,
                }
            }
            task.await;
        });
        pending.insert(key, Pending { generation, handle });
    }

    pub fn is_pending(&self, key: &K) -> bool {
        self.pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(key)
    }

    pub fn pending_count(&self) -> usize {
        self.pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Drops every waiting task without running it.
    pub fn cancel_all(&self) {
        let mut pending = self.pending.lock().unwrap_or_else(PoisonError::into_inner);
        for (_, p) in pending.drain() {
            p.handle.abort();
        }
    }
}

impl<K> Drop for Debouncer<K> {
    fn drop(&mut self) {
        if let Ok(mut pending) = self.pending.lock() {
            for (_, p) in pending.drain() {
                p.handle.abort();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test(start_paused = true)]
    async fn later_schedule_replaces_earlier_for_same_key() {
        let debouncer = Debouncer::new(Duration::from_millis(500));
        let runs = Arc::new(AtomicUsize::new(0));
        let last = Arc::new(Mutex::new(0));

        for value in 1..=3 {
            let runs = Arc::clone(&runs);
            let last = Arc::clone(&last);
            debouncer.schedule("A1", async move {
                runs.fetch_add(1, Ordering::SeqCst);
                *last.lock().unwrap() = value;
            });
            tokio::time::sleep(Duration::from_millis(100)).await;
        }

        tokio::time::sleep(Duration::from_millis(600)).await;
        assert_eq!(runs.load(Ordering::SeqCst), 1);
        assert_eq!(*last.lock().unwrap(), 3);
        assert_eq!(debouncer.pending_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn different_keys_fire_independently() {
        let debouncer = Debouncer::new(Duration::from_millis(150));
        let runs = Arc::new(AtomicUsize::new(0));
        for key in ["A1", "B1"] {
            let runs = Arc::clone(&runs);
            debouncer.schedule(key, async move {
                runs.fetch_add(1, Ordering::SeqCst);
            });
        }
        assert!(debouncer.is_pending(&"A1"));
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(runs.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_all_drops_waiting_tasks() {
        let debouncer = Debouncer::new(Duration::from_millis(150));
        let runs = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&runs);
        debouncer.schedule(1, async move {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        debouncer.cancel_all();
        tokio::time::sleep(Duration::from_millis(300)).await;
        assert_eq!(runs.load(Ordering::SeqCst), 0);
    }
}
