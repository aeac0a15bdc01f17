use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use async_trait::async_trait;
use sha2::{Digest, Sha256};
use sqlx::PgPool;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::debug;

use crate::{LockProvider, StoreError};

/// Held lock; released when dropped.
pub struct LockGuard {
    key: String,
    _held: Box<dyn Send>,
}

impl LockGuard {
    pub fn key(&self) -> &str {
        &self.key
    }
}

impl std::fmt::Debug for LockGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LockGuard").field("key", &self.key).finish()
    }
}

/// In-process keyed mutexes. Only exclusive within a single process.
#[derive(Debug, Default)]
pub struct LocalLocks {
    slots: StdMutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl LocalLocks {
    pub fn new() -> Self {
        Self::default()
    }

    fn slot(&self, key: &str) -> Result<Arc<Mutex<()>>, StoreError> {
        let mut slots = self
            .slots
            .lock()
            .map_err(|_| StoreError::Corrupt("lock table poisoned".to_string()))?;
        Ok(slots
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone())
    }
}

#[async_trait]
impl LockProvider for LocalLocks {
    async fn try_acquire(&self, key: &str, wait: Duration) -> Result<Option<LockGuard>, StoreError> {
        let slot = self.slot(key)?;
        let held = match Arc::clone(&slot).try_lock_owned() {
            Ok(guard) => guard,
            Err(_) if wait.is_zero() => return Ok(None),
            Err(_) => match tokio::time::timeout(wait, slot.lock_owned()).await {
                Ok(guard) => guard,
                Err(_) => return Ok(None),
            },
        };
        Ok(Some(LockGuard {
            key: key.to_string(),
            _held: Box::new(held),
        }))
    }
}

/// Maps a lock name onto the 64-bit advisory lock space.
pub fn advisory_key(key: &str) -> i64 {
    let digest = Sha256::digest(key.as_bytes());
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&digest[..8]);
    i64::from_be_bytes(bytes)
}

/// PostgreSQL transaction-scoped advisory locks; exclusive across processes
/// sharing the database. The lock lives as long as its dedicated transaction.
#[derive(Debug, Clone)]
pub struct PgAdvisoryLocks {
    pool: PgPool,
    poll_every: Duration,
}

impl PgAdvisoryLocks {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            poll_every: Duration::from_millis(50),
        }
    }
}

#[async_trait]
impl LockProvider for PgAdvisoryLocks {
    async fn try_acquire(&self, key: &str, wait: Duration) -> Result<Option<LockGuard>, StoreError> {
        let lock_id = advisory_key(key);
        let deadline = Instant::now() + wait;
        loop {
            let mut tx = self.pool.begin().await?;
            let acquired: bool = sqlx::query_scalar("SELECT pg_try_advisory_xact_lock($1)")
                .bind(lock_id)
                .fetch_one(&mut *tx)
                .await?;
            if acquired {
                debug!(key, lock_id, "advisory lock acquired");
                return Ok(Some(LockGuard {
                    key: key.to_string(),
                    _held: Box::new(tx),
                }));
            }
            tx.rollback().await?;

            if Instant::now() + self.poll_every > deadline {
                return Ok(None);
            }
            tokio::time::sleep(self.poll_every).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn local_lock_is_exclusive_until_dropped() {
        let locks = LocalLocks::new();
        let first = locks
            .try_acquire("league:1", Duration::ZERO)
            .await
            .expect("acquire")
            .expect("free");
        assert!(locks
            .try_acquire("league:1", Duration::from_millis(10))
            .await
            .expect("acquire")
            .is_none());
        assert!(locks
            .try_acquire("league:2", Duration::ZERO)
            .await
            .expect("acquire")
            .is_some());

        drop(first);
        assert!(locks
            .try_acquire("league:1", Duration::ZERO)
            .await
            .expect("acquire")
            .is_some());
    }

    #[test]
    fn advisory_keys_are_stable_and_distinct() {
        assert_eq!(advisory_key("league:1"), advisory_key("league:1"));
        assert_ne!(advisory_key("league:1"), advisory_key("league:2"));
    }
}
