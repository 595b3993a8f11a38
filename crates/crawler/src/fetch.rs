use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use searchlight_bus::MessageBus;
use searchlight_core::{
    retry, url_hash, CrawlError, DiscoveredLink, DlqEntry, FetchJob, IndexJob,
    LinkDiscoveryBatch, TOPIC_CRAWL_DLQ, TOPIC_INDEX_REQUESTS, TOPIC_LINK_DISCOVERIES,
};
use searchlight_parser::parse_html;
use searchlight_politeness::{PolitenessGovernor, RobotsCache};
use searchlight_storage::CrawlStore;

use crate::client::FetchClient;
use crate::Counters;

const BODY_TEXT_CAP: usize = 100 * 1024;

/// Consumer of the fetch topic: robots gate, polite fetch, parse, emit
/// index and link-discovery jobs, finalize the URL record. Safe to run
/// many per process; the bus hands each partition's messages out one at a
/// time.
pub struct FetchWorker {
    client: Arc<dyn FetchClient>,
    robots: Arc<RobotsCache>,
    governor: Arc<PolitenessGovernor>,
    store: Arc<dyn CrawlStore>,
    bus: Arc<dyn MessageBus>,
    counters: Arc<Counters>,
}

impl FetchWorker {
    pub fn new(
        client: Arc<dyn FetchClient>,
        robots: Arc<RobotsCache>,
        governor: Arc<PolitenessGovernor>,
        store: Arc<dyn CrawlStore>,
        bus: Arc<dyn MessageBus>,
        counters: Arc<Counters>,
    ) -> Self {
        Self {
            client,
            robots,
            governor,
            store,
            bus,
            counters,
        }
    }

    async fn send_to_dlq(&self, job: &FetchJob, error: &str) -> Result<(), CrawlError> {
        let entry = DlqEntry {
            url: job.url.clone(),
            domain: job.domain.clone(),
            error: error.to_string(),
            timestamp: Utc::now(),
        };
        let payload = serde_json::to_string(&entry)
            .map_err(|e| CrawlError::Bus(format!("dlq encode: {e}")))?;
        self.bus.publish(TOPIC_CRAWL_DLQ, &job.domain, payload).await?;
        self.counters.dlq.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    async fn finalize_failure(
        &self,
        job: &FetchJob,
        hash: &str,
        error: &CrawlError,
    ) -> Result<(), CrawlError> {
        self.counters.fetch_failures.fetch_add(1, Ordering::Relaxed);
        self.store.record_fetch_outcome(&job.domain, false).await?;
        if error.is_transient() {
            // counts toward the breaker; the hourly scan will retry
            self.governor.record_failure(&job.domain).await?;
            self.store.fail(hash, &error.to_string()).await?;
        } else {
            self.store.block(hash, &error.to_string()).await?;
            if let CrawlError::HttpStatus(status) = error {
                if (400..500).contains(status) {
                    self.send_to_dlq(job, &error.to_string()).await?;
                }
            }
        }
        Ok(())
    }

    /// Handle one fetch job end to end. All side effects are committed
    /// before the caller acks; an `Err` means "redeliver".
    pub async fn process(&self, job: &FetchJob) -> Result<(), CrawlError> {
        let Ok(url) = url::Url::parse(&job.url) else {
            self.counters.invalid_urls.fetch_add(1, Ordering::Relaxed);
            return Ok(());
        };
        let hash = url_hash(&job.url);
        self.store.ensure_domain(&job.domain).await?;

        // robots gate: a deny is terminal, not a retry
        match self.robots.rules_for(&job.domain, url.scheme()).await {
            Ok(rules) => {
                if let Some(delay_ms) = rules.crawl_delay_ms {
                    self.store
                        .set_domain_crawl_delay(&job.domain, delay_ms)
                        .await?;
                }
                if !rules.is_url_allowed(&url) {
                    debug!(url = %job.url, "blocked by robots.txt");
                    self.counters.blocked.fetch_add(1, Ordering::Relaxed);
                    self.store.block(&hash, "disallowed by robots.txt").await?;
                    return Ok(());
                }
            }
            Err(e) => {
                warn!(url = %job.url, "robots lookup failed, allowing: {e}");
            }
        }

        // in-flight cap held for the duration of the fetch
        let permit = self.governor.fetch_permit(&job.domain).await?;
        let fetched = self.client.get(&url).await;
        drop(permit);

        let response = match fetched {
            Ok(response) => response,
            Err(e) => {
                warn!(url = %job.url, "fetch failed: {e}");
                return self.finalize_failure(job, &hash, &e).await;
            }
        };

        if !(200..300).contains(&response.status) {
            let error = CrawlError::HttpStatus(response.status);
            warn!(url = %job.url, status = response.status, "non-2xx response");
            return self.finalize_failure(job, &hash, &error).await;
        }

        self.governor.record_success(&job.domain).await?;

        if !response.is_html() {
            debug!(url = %job.url, content_type = ?response.content_type, "non-html body");
            self.counters.empty_bodies.fetch_add(1, Ordering::Relaxed);
            self.store.complete(&hash).await?;
            self.store.record_fetch_outcome(&job.domain, true).await?;
            return Ok(());
        }

        let page = parse_html(&response.body, &response.final_url, BODY_TEXT_CAP);

        if page.text.is_empty() && page.links.is_empty() {
            // malformed or empty page: completed with empty content so it
            // is never reprocessed
            self.counters.empty_bodies.fetch_add(1, Ordering::Relaxed);
            self.store.complete(&hash).await?;
            self.store.record_fetch_outcome(&job.domain, true).await?;
            return Ok(());
        }

        let outbound: Vec<String> = page.links.iter().map(|l| l.url.clone()).collect();

        let index_job = IndexJob {
            url: job.url.clone(),
            title: page.title.clone(),
            content: page.text.clone(),
            outbound_links: outbound.clone(),
            domain: job.domain.clone(),
            depth: job.depth,
            crawled_at: Utc::now(),
        };
        let index_payload = serde_json::to_string(&index_job)
            .map_err(|e| CrawlError::Bus(format!("index job encode: {e}")))?;
        self.bus
            .publish(TOPIC_INDEX_REQUESTS, &job.url, index_payload)
            .await?;

        if !page.links.is_empty() {
            let batch = LinkDiscoveryBatch {
                urls: page
                    .links
                    .iter()
                    .map(|l| DiscoveredLink {
                        url: l.url.clone(),
                        anchor: l.anchor.clone(),
                    })
                    .collect(),
                source_url: job.url.clone(),
                source_domain: job.domain.clone(),
                source_depth: job.depth,
            };
            let batch_payload = serde_json::to_string(&batch)
                .map_err(|e| CrawlError::Bus(format!("link batch encode: {e}")))?;
            self.bus
                .publish(TOPIC_LINK_DISCOVERIES, &job.domain, batch_payload)
                .await?;
        }

        self.store.complete(&hash).await?;
        self.store.record_fetch_outcome(&job.domain, true).await?;
        self.counters.fetched.fetch_add(1, Ordering::Relaxed);
        debug!(url = %job.url, links = page.links.len(), "fetched and parsed");
        Ok(())
    }

    /// Consume the fetch topic until shutdown. Store/bus hiccups are
    /// retried in-band; a job that still fails is nacked for bus-level
    /// redelivery.
    pub async fn run(
        self: Arc<Self>,
        worker_id: usize,
        mut shutdown: broadcast::Receiver<()>,
    ) -> Result<(), CrawlError> {
        let mut consumer = self
            .bus
            .consumer(searchlight_core::TOPIC_CRAWL_REQUESTS, "fetch-workers")
            .await?;
        info!(worker_id, "fetch worker started");
        loop {
            tokio::select! {
                _ = shutdown.recv() => {
                    info!(worker_id, "fetch worker shutting down");
                    return Ok(());
                }
                msg = consumer.next(Duration::from_secs(2)) => {
                    let Some(msg) = msg? else { continue };
                    let Ok(job) = serde_json::from_str::<FetchJob>(&msg.payload) else {
                        warn!(worker_id, "unparseable fetch job, dropping");
                        self.counters.invalid_urls.fetch_add(1, Ordering::Relaxed);
                        consumer.ack(&msg).await?;
                        continue;
                    };
                    match retry::with_backoff("fetch-job", 3, || self.process(&job)).await {
                        Ok(()) => consumer.ack(&msg).await?,
                        Err(e) => {
                            warn!(worker_id, url = %job.url, "job failed, nacking: {e}");
                            consumer.nack(&msg).await?;
                        }
                    }
                }
            }
        }
    }
}
