//! Relational store for URL records, the link graph, ranks and domain
//! metadata. Production runs on Postgres; the in-memory backend serves
//! single-process runs and tests.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use searchlight_core::{CrawlError, CrawlStatus, DomainRecord, EdgeRecord, RankRecord, UrlRecord};

mod memory;
mod postgres;

pub use memory::MemoryCrawlStore;
pub use postgres::PgCrawlStore;

#[async_trait]
pub trait CrawlStore: Send + Sync + 'static {
    // -- URL records (one per url_hash) --

    /// Insert a record unless one already exists. Returns whether it was
    /// inserted.
    async fn insert_url(&self, record: &UrlRecord) -> Result<bool, CrawlError>;

    async fn get_url(&self, url_hash: &str) -> Result<Option<UrlRecord>, CrawlError>;

    /// Compare-and-set on status, the guard that makes scheduler replicas
    /// safe. Stamps `last_attempt_at` when moving into `InProgress`.
    async fn cas_status(
        &self,
        url_hash: &str,
        from: CrawlStatus,
        to: CrawlStatus,
    ) -> Result<bool, CrawlError>;

    /// Terminal success: Completed, error cleared, retry count reset.
    async fn complete(&self, url_hash: &str) -> Result<(), CrawlError>;

    /// Failed with the error recorded and the retry count bumped.
    async fn fail(&self, url_hash: &str, error: &str) -> Result<(), CrawlError>;

    /// Blocked (robots or administrative); never retried.
    async fn block(&self, url_hash: &str, reason: &str) -> Result<(), CrawlError>;

    async fn set_next_eligible(
        &self,
        url_hash: &str,
        at: DateTime<Utc>,
    ) -> Result<(), CrawlError>;

    async fn counts_by_status(&self) -> Result<HashMap<CrawlStatus, u64>, CrawlError>;

    /// Failed records still under the retry budget whose last attempt is
    /// older than `cutoff` — the hourly retry scan.
    async fn failed_retryable(
        &self,
        cutoff: DateTime<Utc>,
        max_retries: u32,
        limit: usize,
    ) -> Result<Vec<UrlRecord>, CrawlError>;

    /// Failed -> Pending with a new priority; CAS-guarded.
    async fn requeue_failed(&self, url_hash: &str, priority: f64) -> Result<bool, CrawlError>;

    /// Return InProgress entries whose start stamp is older than `cutoff`
    /// to Pending (the reaper). Returns the requeued records so the caller
    /// can put them back on the frontier.
    async fn requeue_stale(&self, cutoff: DateTime<Utc>) -> Result<Vec<UrlRecord>, CrawlError>;

    // -- edges --

    /// Insert an edge, collapsing duplicates on (source, target). Returns
    /// whether a new edge was recorded.
    async fn insert_edge(&self, edge: &EdgeRecord) -> Result<bool, CrawlError>;

    async fn all_edges(&self) -> Result<Vec<EdgeRecord>, CrawlError>;

    // -- ranks --

    async fn write_ranks(&self, ranks: &[RankRecord]) -> Result<(), CrawlError>;

    async fn get_rank(&self, url: &str) -> Result<Option<RankRecord>, CrawlError>;

    // -- domains --

    /// Fetch-or-create; domains are created on first sighting and never
    /// destroyed.
    async fn ensure_domain(&self, domain: &str) -> Result<DomainRecord, CrawlError>;

    async fn get_domain(&self, domain: &str) -> Result<Option<DomainRecord>, CrawlError>;

    async fn set_domain_blocked(&self, domain: &str, blocked: bool) -> Result<(), CrawlError>;

    async fn set_domain_crawl_delay(&self, domain: &str, delay_ms: u64) -> Result<(), CrawlError>;

    /// Bump attempt/success/failure counters and the last-crawl stamp.
    async fn record_fetch_outcome(&self, domain: &str, success: bool) -> Result<(), CrawlError>;
}
