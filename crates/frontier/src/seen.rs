use std::sync::Arc;

use growable_bloom_filter::GrowableBloom;
use tokio::sync::RwLock;
use tracing::{info, warn};

use searchlight_core::{url_hash, CrawlError};
use searchlight_kv::KvStore;

const BLOOM_KEY: &str = "bloom:url-seen";
const VISITED_PREFIX: &str = "visited:";

/// Two-layer membership test for crawled URLs. Layer A is an in-process
/// bloom filter (the only process-wide mutable structure, behind a
/// single-writer guard); layer B is the exact set in the shared store.
/// A bloom miss means definitely new; a hit is verified against layer B.
/// Store errors fail closed: the URL counts as seen, trading a lost crawl
/// for never double-crawling.
pub struct UrlSeenFilter {
    bloom: RwLock<GrowableBloom>,
    kv: Arc<dyn KvStore>,
}

impl UrlSeenFilter {
    pub fn new(kv: Arc<dyn KvStore>, capacity: usize, fp_rate: f64) -> Self {
        Self {
            bloom: RwLock::new(GrowableBloom::new(fp_rate, capacity)),
            kv,
        }
    }

    /// Restore the bloom filter after a restart: prefer the serialized
    /// bitset blob, fall back to replaying the exact set.
    pub async fn hydrate(&self) -> Result<(), CrawlError> {
        if let Some(blob) = self.kv.get(BLOOM_KEY).await? {
            match serde_json::from_str::<GrowableBloom>(&blob) {
                Ok(restored) => {
                    *self.bloom.write().await = restored;
                    info!("bloom filter rehydrated from serialized bitset");
                    return Ok(());
                }
                Err(e) => warn!("bloom blob unreadable, rebuilding from exact set: {e}"),
            }
        }
        let visited = self.kv.scan_prefix(VISITED_PREFIX).await?;
        let mut bloom = self.bloom.write().await;
        for (_, url) in &visited {
            bloom.insert(url);
        }
        info!(count = visited.len(), "bloom filter rebuilt from exact set");
        Ok(())
    }

    /// Serialize the bitset into the store; run periodically and before
    /// shutdown, under the bloom-serialization lock.
    pub async fn persist(&self) -> Result<(), CrawlError> {
        let blob = {
            let bloom = self.bloom.read().await;
            serde_json::to_string(&*bloom)
                .map_err(|e| CrawlError::Store(format!("bloom serialize: {e}")))?
        };
        self.kv.set(BLOOM_KEY, &blob).await
    }

    /// Layer A only. `false` means definitely never added.
    pub async fn maybe_contains(&self, url: &str) -> bool {
        self.bloom.read().await.contains(url)
    }

    /// Full two-layer check.
    pub async fn contains(&self, url: &str) -> bool {
        if !self.maybe_contains(url).await {
            return false;
        }
        match self.kv.get(&format!("{VISITED_PREFIX}{}", url_hash(url))).await {
            Ok(hit) => hit.is_some(),
            Err(e) => {
                warn!("seen-filter store error, treating {url} as seen: {e}");
                true
            }
        }
    }

    pub async fn add(&self, url: &str) -> Result<(), CrawlError> {
        self.bloom.write().await.insert(url);
        self.kv
            .set(&format!("{VISITED_PREFIX}{}", url_hash(url)), url)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use searchlight_kv::MemoryKv;

    fn filter(kv: Arc<dyn KvStore>) -> UrlSeenFilter {
        UrlSeenFilter::new(kv, 10_000, 0.01)
    }

    #[tokio::test]
    async fn added_urls_are_always_reported_seen() {
        let kv: Arc<dyn KvStore> = Arc::new(MemoryKv::new());
        let seen = filter(kv);
        for i in 0..500 {
            let url = format!("https://example.com/page/{i}/");
            seen.add(&url).await.unwrap();
            assert!(seen.maybe_contains(&url).await);
            assert!(seen.contains(&url).await);
        }
    }

    #[tokio::test]
    async fn bloom_false_positives_are_caught_by_exact_set() {
        let kv: Arc<dyn KvStore> = Arc::new(MemoryKv::new());
        let seen = filter(kv);
        for i in 0..1000 {
            seen.add(&format!("https://example.com/a/{i}/")).await.unwrap();
        }
        // none of these were added; whatever the bloom claims, the exact
        // set must refute it
        for i in 0..1000 {
            assert!(!seen.contains(&format!("https://example.com/b/{i}/")).await);
        }
    }

    #[tokio::test]
    async fn rehydrates_from_blob() {
        let kv: Arc<dyn KvStore> = Arc::new(MemoryKv::new());
        let seen = filter(kv.clone());
        seen.add("https://example.com/x/").await.unwrap();
        seen.persist().await.unwrap();

        let restored = filter(kv);
        restored.hydrate().await.unwrap();
        assert!(restored.contains("https://example.com/x/").await);
    }

    #[tokio::test]
    async fn rebuilds_from_exact_set_when_blob_missing() {
        let kv: Arc<dyn KvStore> = Arc::new(MemoryKv::new());
        let seen = filter(kv.clone());
        seen.add("https://example.com/y/").await.unwrap();
        // no persist() — blob absent

        let restored = filter(kv);
        restored.hydrate().await.unwrap();
        assert!(restored.maybe_contains("https://example.com/y/").await);
    }
}
