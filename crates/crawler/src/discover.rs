use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use searchlight_bus::MessageBus;
use searchlight_core::{
    canonicalize, retry, CrawlError, EdgeRecord, LinkDiscoveryBatch, UrlRecord,
    TOPIC_LINK_DISCOVERIES,
};
use searchlight_frontier::{Frontier, FrontierCandidate};
use searchlight_storage::CrawlStore;

use crate::Counters;

/// Consumer of link-discovery batches: normalize, filter, dedup, score,
/// admit to the frontier and record edges. Admissions per source page are
/// bounded to contain fan-out; edges are still recorded past the cap so
/// the link graph stays complete.
pub struct LinkDiscoveryWorker {
    frontier: Arc<Frontier>,
    store: Arc<dyn CrawlStore>,
    bus: Arc<dyn MessageBus>,
    counters: Arc<Counters>,
    max_depth: u32,
    max_admissions_per_page: usize,
}

fn initial_priority(domain: &str, path: &str, depth: u32) -> f64 {
    let mut priority = 5.0;
    if domain.ends_with(".edu") || domain.ends_with(".gov") {
        priority += 2.0;
    }
    if path.contains("/news/") || path.contains("/article/") {
        priority += 1.0;
    }
    (priority - depth as f64).max(1.0)
}

impl LinkDiscoveryWorker {
    pub fn new(
        frontier: Arc<Frontier>,
        store: Arc<dyn CrawlStore>,
        bus: Arc<dyn MessageBus>,
        counters: Arc<Counters>,
        max_depth: u32,
        max_admissions_per_page: usize,
    ) -> Self {
        Self {
            frontier,
            store,
            bus,
            counters,
            max_depth,
            max_admissions_per_page,
        }
    }

    /// Process one batch; returns how many URLs entered the frontier.
    pub async fn process(&self, batch: &LinkDiscoveryBatch) -> Result<usize, CrawlError> {
        let depth = batch.source_depth + 1;
        let mut admitted = 0usize;
        let mut outbound: Vec<String> = Vec::with_capacity(batch.urls.len());

        for link in &batch.urls {
            let canonical = match canonicalize(&link.url) {
                Ok(c) => c,
                Err(_) => {
                    self.counters.invalid_urls.fetch_add(1, Ordering::Relaxed);
                    continue;
                }
            };
            let normalized = canonical.as_str().to_string();
            if normalized == batch.source_url {
                continue;
            }
            outbound.push(normalized.clone());

            // the edge is recorded whether or not the URL is admitted
            self.store
                .insert_edge(&EdgeRecord {
                    source_url: batch.source_url.clone(),
                    target_url: normalized.clone(),
                    anchor: link.anchor.clone(),
                    first_seen: Utc::now(),
                })
                .await?;

            if admitted >= self.max_admissions_per_page || depth > self.max_depth {
                continue;
            }
            let domain_record = self.store.ensure_domain(&canonical.domain).await?;
            if domain_record.blocked {
                continue;
            }

            let pagerank = self.store.get_rank(&normalized).await?.map(|r| r.score);
            let domain_authority = (domain_record.attempts > 0)
                .then(|| domain_record.successes as f64 / domain_record.attempts as f64);

            let candidate = FrontierCandidate {
                url: normalized.clone(),
                domain: canonical.domain.clone(),
                depth,
                pagerank,
                domain_authority,
            };
            if self.frontier.admit(candidate).await? {
                let priority = initial_priority(&canonical.domain, canonical.url.path(), depth);
                let record = UrlRecord::new(
                    &link.url,
                    &normalized,
                    &canonical.domain,
                    depth,
                    priority,
                    Some(batch.source_url.clone()),
                );
                self.store.insert_url(&record).await?;
                admitted += 1;
            }
        }

        // OPIC: completed page's cash flows to its outbound urls
        self.frontier
            .distribute_cash(&batch.source_url, &outbound)
            .await?;

        debug!(
            source = %batch.source_url,
            discovered = batch.urls.len(),
            admitted,
            "link batch processed"
        );
        Ok(admitted)
    }

    pub async fn run(
        self: Arc<Self>,
        worker_id: usize,
        mut shutdown: broadcast::Receiver<()>,
    ) -> Result<(), CrawlError> {
        let mut consumer = self
            .bus
            .consumer(TOPIC_LINK_DISCOVERIES, "link-workers")
            .await?;
        info!(worker_id, "link-discovery worker started");
        loop {
            tokio::select! {
                _ = shutdown.recv() => {
                    info!(worker_id, "link-discovery worker shutting down");
                    return Ok(());
                }
                msg = consumer.next(Duration::from_secs(2)) => {
                    let Some(msg) = msg? else { continue };
                    let Ok(batch) = serde_json::from_str::<LinkDiscoveryBatch>(&msg.payload) else {
                        warn!(worker_id, "unparseable link batch, dropping");
                        consumer.ack(&msg).await?;
                        continue;
                    };
                    match retry::with_backoff("link-batch", 3, || self.process(&batch)).await {
                        Ok(_) => consumer.ack(&msg).await?,
                        Err(e) => {
                            warn!(worker_id, "link batch failed, nacking: {e}");
                            consumer.nack(&msg).await?;
                        }
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn priority_heuristics() {
        assert_eq!(initial_priority("example.com", "/page", 1), 4.0);
        assert_eq!(initial_priority("mit.edu", "/page", 1), 6.0);
        assert_eq!(initial_priority("agency.gov", "/news/today", 1), 7.0);
        // deep links floor at 1
        assert_eq!(initial_priority("example.com", "/p", 9), 1.0);
    }
}
