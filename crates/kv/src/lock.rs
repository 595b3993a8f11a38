use std::sync::Arc;
use std::time::Duration;

use rand::distributions::Alphanumeric;
use rand::Rng;
use tracing::debug;

use searchlight_core::CrawlError;

use crate::KvStore;

/// Set-if-absent lock with an ownership token and TTL, guarding singleton
/// batch work (rank job, bloom serialization, strategy switch). The TTL
/// bounds how long a crashed holder can block others; long jobs call
/// [`DistributedLock::extend`] as a heartbeat.
pub struct DistributedLock {
    kv: Arc<dyn KvStore>,
    key: String,
    token: String,
    ttl: Duration,
}

impl DistributedLock {
    /// Try to take the named lock. `Ok(None)` means another holder has it.
    pub async fn try_acquire(
        kv: Arc<dyn KvStore>,
        name: &str,
        ttl: Duration,
    ) -> Result<Option<Self>, CrawlError> {
        let token: String = rand::thread_rng()
            .sample_iter(&Alphanumeric)
            .take(16)
            .map(char::from)
            .collect();
        let key = format!("lock:{name}");
        if kv.set_if_absent(&key, &token, Some(ttl)).await? {
            debug!(%key, "lock acquired");
            Ok(Some(Self { kv, key, token, ttl }))
        } else {
            Ok(None)
        }
    }

    /// Acquire or fail with `LockContended` — for callers that treat
    /// contention as "someone else is already doing this".
    pub async fn acquire(
        kv: Arc<dyn KvStore>,
        name: &str,
        ttl: Duration,
    ) -> Result<Self, CrawlError> {
        Self::try_acquire(kv, name, ttl)
            .await?
            .ok_or_else(|| CrawlError::LockContended(name.to_string()))
    }

    /// Heartbeat: push the expiry out by another TTL, but only while we are
    /// still the holder. Returns false when ownership was lost.
    pub async fn extend(&self) -> Result<bool, CrawlError> {
        match self.kv.get(&self.key).await? {
            Some(current) if current == self.token => self.kv.expire(&self.key, self.ttl).await,
            _ => Ok(false),
        }
    }

    /// Release by comparing the token, so a lock that expired and was
    /// re-acquired elsewhere is never deleted by the old holder.
    pub async fn release(self) -> Result<bool, CrawlError> {
        self.kv.delete_if_equals(&self.key, &self.token).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::MemoryKv;

    #[tokio::test]
    async fn second_acquire_fails_until_release() {
        let kv: Arc<dyn KvStore> = Arc::new(MemoryKv::new());
        let lock = DistributedLock::try_acquire(kv.clone(), "rank", Duration::from_secs(10))
            .await
            .unwrap()
            .unwrap();
        assert!(DistributedLock::try_acquire(kv.clone(), "rank", Duration::from_secs(10))
            .await
            .unwrap()
            .is_none());
        assert!(lock.release().await.unwrap());
        assert!(DistributedLock::try_acquire(kv, "rank", Duration::from_secs(10))
            .await
            .unwrap()
            .is_some());
    }

    #[tokio::test]
    async fn stale_holder_cannot_release_new_owner() {
        let kv: Arc<dyn KvStore> = Arc::new(MemoryKv::new());
        let stale = DistributedLock::try_acquire(kv.clone(), "job", Duration::from_millis(5))
            .await
            .unwrap()
            .unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        // TTL elapsed; a new holder takes over
        let fresh = DistributedLock::try_acquire(kv.clone(), "job", Duration::from_secs(10))
            .await
            .unwrap()
            .unwrap();
        assert!(!stale.release().await.unwrap());
        assert!(fresh.extend().await.unwrap());
        assert!(fresh.release().await.unwrap());
    }

    #[tokio::test]
    async fn extend_refreshes_ttl() {
        let kv: Arc<dyn KvStore> = Arc::new(MemoryKv::new());
        let lock = DistributedLock::try_acquire(kv.clone(), "bloom", Duration::from_millis(50))
            .await
            .unwrap()
            .unwrap();
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert!(lock.extend().await.unwrap());
        tokio::time::sleep(Duration::from_millis(30)).await;
        // would have expired without the heartbeat
        assert!(lock.extend().await.unwrap());
    }
}
