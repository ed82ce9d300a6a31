//! Per-session mutation serialization (spec §5 "Shared-resource policy":
//! "Session-level mutation against the store may be serialized by an
//! optional per-session lock keyed by session ID, backed by a sharded
//! map").
//!
//! One run per session at a time; a second run for the same session
//! queues behind a `Semaphore(1)` rather than interleaving writes against
//! the store.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

const SHARD_COUNT: usize = 16;

/// A sharded map of per-session locks. Sharding bounds lock contention on
/// the outer map itself when many distinct sessions are active.
pub struct SessionLockMap {
    shards: Vec<Mutex<HashMap<String, Arc<Semaphore>>>>,
}

impl Default for SessionLockMap {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionLockMap {
    pub fn new() -> Self {
        Self {
            shards: (0..SHARD_COUNT).map(|_| Mutex::new(HashMap::new())).collect(),
        }
    }

    fn shard(&self, session_id: &str) -> &Mutex<HashMap<String, Arc<Semaphore>>> {
        let hash = session_id.bytes().fold(0u64, |acc, b| acc.wrapping_mul(31).wrapping_add(b as u64));
        &self.shards[(hash as usize) % self.shards.len()]
    }

    /// Acquire exclusive access for `session_id`, waiting if another run
    /// holds it. Releases automatically when the returned permit drops.
    pub async fn acquire(&self, session_id: &str) -> OwnedSemaphorePermit {
        let sem = {
            let mut shard = self.shard(session_id).lock();
            shard
                .entry(session_id.to_string())
                .or_insert_with(|| Arc::new(Semaphore::new(1)))
                .clone()
        };
        sem.acquire_owned().await.expect("session semaphore never closed")
    }

    /// Drop any tracked lock that has no holder and no waiter.
    pub fn prune_idle(&self) {
        for shard in &self.shards {
            shard.lock().retain(|_, sem| sem.available_permits() == 0);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    #[tokio::test]
    async fn same_session_serializes() {
        let map = Arc::new(SessionLockMap::new());
        let order = Arc::new(Mutex::new(Vec::new()));

        let permit1 = map.acquire("s1").await;
        let map2 = map.clone();
        let order2 = order.clone();
        let handle = tokio::spawn(async move {
            let _permit = map2.acquire("s1").await;
            order2.lock().push(2);
        });

        tokio::time::sleep(Duration::from_millis(20)).await;
        order.lock().push(1);
        drop(permit1);
        handle.await.unwrap();

        assert_eq!(*order.lock(), vec![1, 2]);
    }

    #[tokio::test]
    async fn different_sessions_run_concurrently() {
        let map = Arc::new(SessionLockMap::new());
        let concurrent = Arc::new(AtomicU32::new(0));
        let max_seen = Arc::new(AtomicU32::new(0));

        let mut handles = Vec::new();
        for id in ["a", "b", "c"] {
            let map = map.clone();
            let concurrent = concurrent.clone();
            let max_seen = max_seen.clone();
            handles.push(tokio::spawn(async move {
                let _permit = map.acquire(id).await;
                let now = concurrent.fetch_add(1, Ordering::SeqCst) + 1;
                max_seen.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(20)).await;
                concurrent.fetch_sub(1, Ordering::SeqCst);
            }));
        }
        for h in handles {
            h.await.unwrap();
        }
        assert!(max_seen.load(Ordering::SeqCst) > 1);
    }
}
