//! Key-value store seam shared by the seen filter, politeness governor,
//! frontier, fingerprint index and result cache. The store is expected to
//! offer ordered lookup, atomic compare-and-set and sorted sets; any backend
//! with those primitives (Redis being the obvious one) can sit behind the
//! trait. The in-process [`MemoryKv`] is the default for single-node runs
//! and tests.

use std::time::Duration;

use async_trait::async_trait;

use searchlight_core::CrawlError;

mod lock;
mod memory;

pub use lock::DistributedLock;
pub use memory::MemoryKv;

#[async_trait]
pub trait KvStore: Send + Sync + 'static {
    async fn get(&self, key: &str) -> Result<Option<String>, CrawlError>;

    async fn set(&self, key: &str, value: &str) -> Result<(), CrawlError>;

    async fn set_with_ttl(
        &self,
        key: &str,
        value: &str,
        ttl: Duration,
    ) -> Result<(), CrawlError>;

    /// Set `key` only when absent. Returns whether the write happened.
    async fn set_if_absent(
        &self,
        key: &str,
        value: &str,
        ttl: Option<Duration>,
    ) -> Result<bool, CrawlError>;

    /// Atomically replace the value iff the current value equals `expected`
    /// (`None` = key must be absent). The token-bucket arithmetic and URL
    /// status transitions are built on this.
    async fn compare_and_swap(
        &self,
        key: &str,
        expected: Option<&str>,
        value: &str,
    ) -> Result<bool, CrawlError>;

    async fn delete(&self, key: &str) -> Result<bool, CrawlError>;

    /// Delete iff the current value equals `expected`; lock release.
    async fn delete_if_equals(&self, key: &str, expected: &str) -> Result<bool, CrawlError>;

    /// Refresh the TTL of an existing key. Returns false when absent.
    async fn expire(&self, key: &str, ttl: Duration) -> Result<bool, CrawlError>;

    /// Atomic float increment; creates the cell at `delta` when absent.
    /// Returns the new value. OPIC cash cells use this.
    async fn incr_by_f64(&self, key: &str, delta: f64) -> Result<f64, CrawlError>;

    /// All live (key, value) pairs under a prefix, in key order.
    async fn scan_prefix(&self, prefix: &str) -> Result<Vec<(String, String)>, CrawlError>;

    // -- sorted set --

    async fn zadd(&self, key: &str, member: &str, score: f64) -> Result<(), CrawlError>;

    /// Pop up to `n` highest-scoring members.
    async fn zpop_max(&self, key: &str, n: usize) -> Result<Vec<(String, f64)>, CrawlError>;

    async fn zrem(&self, key: &str, member: &str) -> Result<bool, CrawlError>;

    async fn zcard(&self, key: &str) -> Result<usize, CrawlError>;

    /// Every (member, score) pair; used for full re-scores.
    async fn zscan(&self, key: &str) -> Result<Vec<(String, f64)>, CrawlError>;
}
