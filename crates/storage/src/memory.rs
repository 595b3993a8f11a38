use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;

use searchlight_core::{CrawlError, CrawlStatus, DomainRecord, EdgeRecord, RankRecord, UrlRecord};

use crate::CrawlStore;

/// DashMap-backed store for tests and single-process runs. Status CAS is
/// atomic because the entry API pins the shard while the record is edited.
#[derive(Default)]
pub struct MemoryCrawlStore {
    urls: DashMap<String, UrlRecord>,
    edges: DashMap<(String, String), EdgeRecord>,
    ranks: DashMap<String, RankRecord>,
    domains: DashMap<String, DomainRecord>,
}

impl MemoryCrawlStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn update_url(
        &self,
        url_hash: &str,
        f: impl FnOnce(&mut UrlRecord),
    ) -> Result<(), CrawlError> {
        match self.urls.get_mut(url_hash) {
            Some(mut record) => {
                f(&mut record);
                Ok(())
            }
            None => Err(CrawlError::Store(format!("no url record {url_hash}"))),
        }
    }
}

#[async_trait]
impl CrawlStore for MemoryCrawlStore {
    async fn insert_url(&self, record: &UrlRecord) -> Result<bool, CrawlError> {
        match self.urls.entry(record.url_hash.clone()) {
            dashmap::mapref::entry::Entry::Occupied(_) => Ok(false),
            dashmap::mapref::entry::Entry::Vacant(vacant) => {
                vacant.insert(record.clone());
                Ok(true)
            }
        }
    }

    async fn get_url(&self, url_hash: &str) -> Result<Option<UrlRecord>, CrawlError> {
        Ok(self.urls.get(url_hash).map(|r| r.clone()))
    }

    async fn cas_status(
        &self,
        url_hash: &str,
        from: CrawlStatus,
        to: CrawlStatus,
    ) -> Result<bool, CrawlError> {
        match self.urls.get_mut(url_hash) {
            Some(mut record) if record.status == from => {
                record.status = to;
                if to == CrawlStatus::InProgress {
                    record.last_attempt_at = Some(Utc::now());
                }
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn complete(&self, url_hash: &str) -> Result<(), CrawlError> {
        self.update_url(url_hash, |r| {
            r.status = CrawlStatus::Completed;
            r.retry_count = 0;
            r.error = None;
            r.last_attempt_at = Some(Utc::now());
        })
    }

    async fn fail(&self, url_hash: &str, error: &str) -> Result<(), CrawlError> {
        self.update_url(url_hash, |r| {
            r.status = CrawlStatus::Failed;
            r.retry_count += 1;
            r.error = Some(error.to_string());
            r.last_attempt_at = Some(Utc::now());
        })
    }

    async fn block(&self, url_hash: &str, reason: &str) -> Result<(), CrawlError> {
        self.update_url(url_hash, |r| {
            r.status = CrawlStatus::Blocked;
            r.error = Some(reason.to_string());
            r.last_attempt_at = Some(Utc::now());
        })
    }

    async fn set_next_eligible(
        &self,
        url_hash: &str,
        at: DateTime<Utc>,
    ) -> Result<(), CrawlError> {
        self.update_url(url_hash, |r| r.next_eligible_at = Some(at))
    }

    async fn counts_by_status(&self) -> Result<HashMap<CrawlStatus, u64>, CrawlError> {
        let mut counts = HashMap::new();
        for record in self.urls.iter() {
            *counts.entry(record.status).or_insert(0) += 1;
        }
        Ok(counts)
    }

    async fn failed_retryable(
        &self,
        cutoff: DateTime<Utc>,
        max_retries: u32,
        limit: usize,
    ) -> Result<Vec<UrlRecord>, CrawlError> {
        Ok(self
            .urls
            .iter()
            .filter(|r| {
                r.status == CrawlStatus::Failed
                    && r.retry_count < max_retries
                    && r.last_attempt_at.map(|at| at < cutoff).unwrap_or(true)
            })
            .take(limit)
            .map(|r| r.clone())
            .collect())
    }

    async fn requeue_failed(&self, url_hash: &str, priority: f64) -> Result<bool, CrawlError> {
        match self.urls.get_mut(url_hash) {
            Some(mut record) if record.status == CrawlStatus::Failed => {
                record.status = CrawlStatus::Pending;
                record.priority = priority;
                record.next_eligible_at = None;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn requeue_stale(&self, cutoff: DateTime<Utc>) -> Result<Vec<UrlRecord>, CrawlError> {
        let mut requeued = Vec::new();
        for mut record in self.urls.iter_mut() {
            if record.status == CrawlStatus::InProgress
                && record.last_attempt_at.map(|at| at < cutoff).unwrap_or(true)
            {
                record.status = CrawlStatus::Pending;
                requeued.push(record.clone());
            }
        }
        Ok(requeued)
    }

    async fn insert_edge(&self, edge: &EdgeRecord) -> Result<bool, CrawlError> {
        let key = (edge.source_url.clone(), edge.target_url.clone());
        match self.edges.entry(key) {
            dashmap::mapref::entry::Entry::Occupied(_) => Ok(false),
            dashmap::mapref::entry::Entry::Vacant(vacant) => {
                vacant.insert(edge.clone());
                Ok(true)
            }
        }
    }

    async fn all_edges(&self) -> Result<Vec<EdgeRecord>, CrawlError> {
        Ok(self.edges.iter().map(|e| e.clone()).collect())
    }

    async fn write_ranks(&self, ranks: &[RankRecord]) -> Result<(), CrawlError> {
        for rank in ranks {
            self.ranks.insert(rank.url.clone(), rank.clone());
        }
        Ok(())
    }

    async fn get_rank(&self, url: &str) -> Result<Option<RankRecord>, CrawlError> {
        Ok(self.ranks.get(url).map(|r| r.clone()))
    }

    async fn ensure_domain(&self, domain: &str) -> Result<DomainRecord, CrawlError> {
        Ok(self
            .domains
            .entry(domain.to_string())
            .or_insert_with(|| DomainRecord::new(domain))
            .clone())
    }

    async fn get_domain(&self, domain: &str) -> Result<Option<DomainRecord>, CrawlError> {
        Ok(self.domains.get(domain).map(|d| d.clone()))
    }

    async fn set_domain_blocked(&self, domain: &str, blocked: bool) -> Result<(), CrawlError> {
        self.domains
            .entry(domain.to_string())
            .or_insert_with(|| DomainRecord::new(domain))
            .blocked = blocked;
        Ok(())
    }

    async fn set_domain_crawl_delay(&self, domain: &str, delay_ms: u64) -> Result<(), CrawlError> {
        self.domains
            .entry(domain.to_string())
            .or_insert_with(|| DomainRecord::new(domain))
            .crawl_delay_ms = delay_ms;
        Ok(())
    }

    async fn record_fetch_outcome(&self, domain: &str, success: bool) -> Result<(), CrawlError> {
        let mut record = self
            .domains
            .entry(domain.to_string())
            .or_insert_with(|| DomainRecord::new(domain));
        record.attempts += 1;
        if success {
            record.successes += 1;
            record.last_crawled_at = Some(Utc::now());
        } else {
            record.failures += 1;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(url: &str) -> UrlRecord {
        UrlRecord::new(url, url, "example.com", 0, 5.0, None)
    }

    #[tokio::test]
    async fn one_record_per_hash() {
        let store = MemoryCrawlStore::new();
        let r = record("https://example.com/a/");
        assert!(store.insert_url(&r).await.unwrap());
        assert!(!store.insert_url(&r).await.unwrap());
    }

    #[tokio::test]
    async fn cas_only_moves_from_expected_status() {
        let store = MemoryCrawlStore::new();
        let r = record("https://example.com/a/");
        store.insert_url(&r).await.unwrap();
        assert!(store
            .cas_status(&r.url_hash, CrawlStatus::Pending, CrawlStatus::InProgress)
            .await
            .unwrap());
        // a second replica loses the race
        assert!(!store
            .cas_status(&r.url_hash, CrawlStatus::Pending, CrawlStatus::InProgress)
            .await
            .unwrap());
        let stored = store.get_url(&r.url_hash).await.unwrap().unwrap();
        assert!(stored.last_attempt_at.is_some());
    }

    #[tokio::test]
    async fn failed_retry_cycle() {
        let store = MemoryCrawlStore::new();
        let r = record("https://example.com/a/");
        store.insert_url(&r).await.unwrap();
        store.fail(&r.url_hash, "timeout").await.unwrap();
        let eligible = store
            .failed_retryable(Utc::now() + chrono::Duration::seconds(1), 3, 10)
            .await
            .unwrap();
        assert_eq!(eligible.len(), 1);
        assert!(store.requeue_failed(&r.url_hash, 4.0).await.unwrap());
        let stored = store.get_url(&r.url_hash).await.unwrap().unwrap();
        assert_eq!(stored.status, CrawlStatus::Pending);
        assert_eq!(stored.priority, 4.0);
        assert_eq!(stored.retry_count, 1);
    }

    #[tokio::test]
    async fn edges_collapse_duplicates() {
        let store = MemoryCrawlStore::new();
        let edge = EdgeRecord {
            source_url: "https://a.com/".into(),
            target_url: "https://b.com/".into(),
            anchor: Some("b".into()),
            first_seen: Utc::now(),
        };
        assert!(store.insert_edge(&edge).await.unwrap());
        assert!(!store.insert_edge(&edge).await.unwrap());
        assert_eq!(store.all_edges().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn domain_counters_accumulate() {
        let store = MemoryCrawlStore::new();
        store.record_fetch_outcome("example.com", true).await.unwrap();
        store.record_fetch_outcome("example.com", false).await.unwrap();
        let domain = store.get_domain("example.com").await.unwrap().unwrap();
        assert_eq!(domain.attempts, 2);
        assert_eq!(domain.successes, 1);
        assert_eq!(domain.failures, 1);
        assert!(domain.last_crawled_at.is_some());
    }
}
