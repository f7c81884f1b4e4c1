use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard};

type LockMap = DashMap<String, Arc<Mutex<()>>>;

/// One async mutex per collection ID. Operations on the same ID are serialized,
/// different IDs proceed independently. An entry lives only while someone holds
/// or waits for it.
#[derive(Debug, Default)]
pub struct IdLocks {
    locks: Arc<LockMap>,
}

/// Held for the duration of one operation on an ID.
#[derive(Debug)]
pub struct IdLockGuard {
    id: String,
    guard: Option<OwnedMutexGuard<()>>,
    locks: Arc<LockMap>,
}

impl Drop for IdLockGuard {
    fn drop(&mut self) {
        // Release first so the map holds the last reference unless someone is waiting.
        drop(self.guard.take());
        self.locks
            .remove_if(&self.id, |_, lock| Arc::strong_count(lock) == 1);
    }
}

impl IdLocks {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn acquire(&self, id: &str) -> IdLockGuard {
        // Clone the Arc out so the map shard is not held across the await.
        let lock = self
            .locks
            .entry(id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        IdLockGuard {
            id: id.to_string(),
            guard: Some(lock.lock_owned().await),
            locks: self.locks.clone(),
        }
    }

    pub fn is_locked(&self, id: &str) -> bool {
        self.locks
            .get(id)
            .is_some_and(|lock| lock.try_lock().is_err())
    }

    /// Number of IDs currently held or waited on.
    pub fn len(&self) -> usize {
        self.locks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_same_id_is_serialized() {
        let locks = Arc::new(IdLocks::new());
        let guard = locks.acquire("alice/devops").await;
        assert!(locks.is_locked("alice/devops"));

        let other = locks.acquire("bob/writing").await;
        drop(other);

        let waiter = {
            let locks = locks.clone();
            tokio::spawn(async move {
                let _guard = locks.acquire("alice/devops").await;
            })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!waiter.is_finished());

        drop(guard);
        waiter.await.unwrap();
        assert!(!locks.is_locked("alice/devops"));
    }

    #[tokio::test]
    async fn test_released_ids_are_forgotten() {
        let locks = IdLocks::new();
        for i in 0..100 {
            let _guard = locks.acquire(&format!("alice/collection-{}", i)).await;
        }
        assert!(locks.is_empty());

        let held = locks.acquire("alice/devops").await;
        assert_eq!(locks.len(), 1);
        drop(held);
        assert!(locks.is_empty());
    }

    #[tokio::test]
    async fn test_entry_survives_while_waiter_is_queued() {
        let locks = Arc::new(IdLocks::new());
        let guard = locks.acquire("alice/devops").await;

        let waiter = {
            let locks = locks.clone();
            tokio::spawn(async move {
                let _guard = locks.acquire("alice/devops").await;
                tokio::time::sleep(Duration::from_millis(20)).await;
            })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;

        drop(guard);
        assert_eq!(locks.len(), 1);
        tokio::time::sleep(Duration::from_millis(5)).await;
        assert!(locks.is_locked("alice/devops"));

        waiter.await.unwrap();
        assert!(locks.is_empty());
    }
}
