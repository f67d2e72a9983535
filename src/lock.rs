// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Distributed per-key lock backed by storage lock records.
//!
//! A lock is a record `{key, owner, expiry}`. Acquisition inserts the record
//! when it is absent or expired, so a crashed holder is reclaimed once its TTL
//! runs out. Every acquisition gets a fresh owner token and release only
//! deletes a record carrying that token. Callers poll until their wait time
//! elapses and then fail with a retryable `LOCK_TIMEOUT`.
//!
//! | Setting | Default |
//! |---------|---------|
//! | Record TTL | 40 s |
//! | Wait (most operations) | 5 s |
//! | Wait (address / proposal creation) | 10 s |

use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{debug, warn};

use crate::error::{ServiceError, ServiceResult};
use crate::storage::Storage;

/// Interval between acquisition attempts while the lock is held elsewhere.
const POLL_INTERVAL: Duration = Duration::from_millis(50);

#[derive(Clone)]
pub struct WalletLock {
    storage: Arc<dyn Storage>,
    ttl: Duration,
}

impl WalletLock {
    pub fn new(storage: Arc<dyn Storage>, ttl: Duration) -> Self {
        Self { storage, ttl }
    }

    /// Acquire `key`, polling for at most `wait`.
    pub async fn acquire(&self, key: &str, wait: Duration) -> ServiceResult<LockGuard> {
        let started = Instant::now();
        let owner = uuid::Uuid::new_v4().to_string();
        loop {
            if self.storage.acquire_lock(key, &owner, self.ttl).await? {
                debug!(lock_key = %key, waited_ms = started.elapsed().as_millis() as u64, "Lock acquired");
                return Ok(LockGuard {
                    storage: self.storage.clone(),
                    key: key.to_string(),
                    owner,
                    released: false,
                });
            }
            if started.elapsed() >= wait {
                return Err(ServiceError::LockTimeout(key.to_string()));
            }
            tokio::time::sleep(POLL_INTERVAL).await;
        }
    }

    /// Run `task` while holding `key`. The lock is released on every exit path.
    pub async fn run_locked<T, F>(&self, key: &str, wait: Duration, task: F) -> ServiceResult<T>
    where
        F: Future<Output = ServiceResult<T>>,
    {
        let guard = self.acquire(key, wait).await?;
        let result = task.await;
        if let Err(e) = guard.release().await {
            warn!(lock_key = %key, error = %e, "Failed to release lock, it will expire");
        }
        result
    }
}

/// Held lock. Dropping it without [`LockGuard::release`] (e.g. when the
/// owning future is cancelled) schedules the release on the runtime.
pub struct LockGuard {
    storage: Arc<dyn Storage>,
    key: String,
    owner: String,
    released: bool,
}

impl LockGuard {
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Release the lock. `Ok(false)` means the record had already expired
    /// and was taken over, so there was nothing of ours to delete.
    pub async fn release(mut self) -> Result<bool, crate::storage::StorageError> {
        self.released = true;
        let released = self.storage.release_lock(&self.key, &self.owner).await?;
        if !released {
            warn!(lock_key = %self.key, "Lock expired before release");
        }
        Ok(released)
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        let storage = self.storage.clone();
        let key = std::mem::take(&mut self.key);
        let owner = std::mem::take(&mut self.owner);
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    if let Err(e) = storage.release_lock(&key, &owner).await {
                        warn!(lock_key = %key, error = %e, "Deferred lock release failed");
                    }
                });
            }
            Err(_) => warn!(lock_key = %key, "No runtime to release lock, it will expire"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorCode;
    use crate::storage::RedbStorage;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn lock(ttl: Duration) -> (tempfile::TempDir, WalletLock) {
        let dir = tempfile::tempdir().unwrap();
        let storage = RedbStorage::open(&dir.path().join("lock.redb")).unwrap();
        (dir, WalletLock::new(Arc::new(storage), ttl))
    }

    #[tokio::test]
    async fn contention_times_out_with_retryable_error() {
        let (_dir, lock) = lock(Duration::from_secs(40));
        let guard = lock.acquire("w1", Duration::from_secs(1)).await.unwrap();

        let err = lock
            .run_locked("w1", Duration::from_millis(120), async { Ok(()) })
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::LockTimeout(ref k) if k == "w1"));
        assert!(err.is_retryable());

        // Other keys are independent.
        lock.run_locked("w2", Duration::ZERO, async { Ok(()) }).await.unwrap();

        guard.release().await.unwrap();
        lock.run_locked("w1", Duration::ZERO, async { Ok(()) }).await.unwrap();
    }

    #[tokio::test]
    async fn released_after_task_error() {
        let (_dir, lock) = lock(Duration::from_secs(40));
        let err = lock
            .run_locked::<(), _>("w1", Duration::ZERO, async {
                Err(ServiceError::client(ErrorCode::TxNotFound))
            })
            .await
            .unwrap_err();
        assert!(err.is_code(ErrorCode::TxNotFound));
        lock.run_locked("w1", Duration::ZERO, async { Ok(()) }).await.unwrap();
    }

    #[tokio::test]
    async fn dropped_guard_releases() {
        let (_dir, lock) = lock(Duration::from_secs(40));
        let guard = lock.acquire("w1", Duration::ZERO).await.unwrap();
        drop(guard);
        lock.acquire("w1", Duration::from_secs(2)).await.unwrap().release().await.unwrap();
    }

    #[tokio::test]
    async fn expired_lock_is_reclaimed() {
        let (_dir, lock) = lock(Duration::from_millis(100));
        let stuck = lock.acquire("w1", Duration::ZERO).await.unwrap();
        std::mem::forget(stuck);
        lock.acquire("w1", Duration::from_secs(2)).await.unwrap();
    }

    #[tokio::test]
    async fn stale_guard_does_not_release_new_holder() {
        let (_dir, lock) = lock(Duration::from_millis(100));
        let stale = lock.acquire("w1", Duration::ZERO).await.unwrap();
        tokio::time::sleep(Duration::from_millis(150)).await;

        let current = lock.acquire("w1", Duration::ZERO).await.unwrap();
        assert!(!stale.release().await.unwrap());

        let err = lock.acquire("w1", Duration::ZERO).await.err().unwrap();
        assert!(matches!(err, ServiceError::LockTimeout(_)));
        assert!(current.release().await.unwrap());
    }

    #[tokio::test]
    async fn tasks_on_same_key_never_overlap() {
        let (_dir, lock) = lock(Duration::from_secs(40));
        let active = Arc::new(AtomicUsize::new(0));
        let overlaps = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..5 {
            let lock = lock.clone();
            let active = active.clone();
            let overlaps = overlaps.clone();
            handles.push(tokio::spawn(async move {
                lock.run_locked("w1", Duration::from_secs(10), async {
                    if active.fetch_add(1, Ordering::SeqCst) > 0 {
                        overlaps.fetch_add(1, Ordering::SeqCst);
                    }
                    tokio::time::sleep(Duration::from_millis(20)).await;
                    active.fetch_sub(1, Ordering::SeqCst);
                    Ok(())
                })
                .await
            }));
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }
        assert_eq!(overlaps.load(Ordering::SeqCst), 0);
    }
}
