use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use searchlight_bus::MessageBus;
use searchlight_core::config::CrawlerConfig;
use searchlight_core::{
    url_hash, CrawlError, CrawlStatus, FetchJob, TOPIC_CRAWL_REQUESTS,
};
use searchlight_frontier::{Frontier, FrontierCandidate};
use searchlight_politeness::{FetchAdmission, PolitenessGovernor};
use searchlight_storage::CrawlStore;

#[derive(Debug, Default, Clone, Copy)]
pub struct TickSummary {
    pub popped: usize,
    pub published: usize,
    pub deferred: usize,
    pub dropped: usize,
}

/// Timer-driven mover of ready URLs from the frontier to the fetch topic.
/// Replica-safe: the Pending -> InProgress compare-and-set decides which
/// replica owns a URL.
pub struct Scheduler {
    frontier: Arc<Frontier>,
    governor: Arc<PolitenessGovernor>,
    store: Arc<dyn CrawlStore>,
    bus: Arc<dyn MessageBus>,
    config: CrawlerConfig,
}

impl Scheduler {
    pub fn new(
        frontier: Arc<Frontier>,
        governor: Arc<PolitenessGovernor>,
        store: Arc<dyn CrawlStore>,
        bus: Arc<dyn MessageBus>,
        config: CrawlerConfig,
    ) -> Self {
        Self {
            frontier,
            governor,
            store,
            bus,
            config,
        }
    }

    /// One scheduling pass: pop the best entries, ask politeness, publish
    /// or put back with a decayed score.
    pub async fn tick(&self) -> Result<TickSummary, CrawlError> {
        let batch = self.frontier.pop_batch(self.config.schedule_batch_size).await?;
        let mut summary = TickSummary {
            popped: batch.len(),
            ..TickSummary::default()
        };

        for (url, score) in batch {
            let hash = url_hash(&url);
            let Some(record) = self.store.get_url(&hash).await? else {
                self.frontier.forget(&url).await?;
                summary.dropped += 1;
                continue;
            };

            let now = Utc::now();
            if record
                .next_eligible_at
                .map(|at| at > now)
                .unwrap_or(false)
            {
                self.frontier.reinsert_backoff(&url, score).await?;
                summary.deferred += 1;
                continue;
            }

            if let Some(domain) = self.store.get_domain(&record.domain).await? {
                if domain.blocked {
                    self.store.block(&hash, "domain blocked").await?;
                    self.frontier.forget(&url).await?;
                    summary.dropped += 1;
                    continue;
                }
            }

            match self.governor.admit(&record.domain).await? {
                FetchAdmission::Granted => {
                    if self
                        .store
                        .cas_status(&hash, CrawlStatus::Pending, CrawlStatus::InProgress)
                        .await?
                    {
                        let job = FetchJob {
                            url: record.url.clone(),
                            domain: record.domain.clone(),
                            depth: record.depth,
                            priority: record.priority,
                            timestamp: now,
                        };
                        let payload = serde_json::to_string(&job)
                            .map_err(|e| CrawlError::Bus(format!("fetch job encode: {e}")))?;
                        self.bus
                            .publish(TOPIC_CRAWL_REQUESTS, &record.domain, payload)
                            .await?;
                        self.frontier.forget(&url).await?;
                        summary.published += 1;
                    } else {
                        // another replica claimed it, or it is no longer
                        // pending
                        self.frontier.forget(&url).await?;
                        summary.dropped += 1;
                    }
                }
                FetchAdmission::Wait { hint_ms } => {
                    let eligible = now + chrono::Duration::milliseconds(hint_ms as i64);
                    self.store.set_next_eligible(&hash, eligible).await?;
                    self.frontier.reinsert_backoff(&url, score).await?;
                    summary.deferred += 1;
                }
                FetchAdmission::CircuitOpen => {
                    let snapshot = self.governor.breaker_snapshot(&record.domain).await?;
                    debug!(domain = %record.domain, ?snapshot, "circuit open, deferring");
                    let eligible = now + chrono::Duration::seconds(60);
                    self.store.set_next_eligible(&hash, eligible).await?;
                    self.frontier.reinsert_backoff(&url, score).await?;
                    summary.deferred += 1;
                }
            }
        }

        if summary.popped > 0 {
            debug!(
                popped = summary.popped,
                published = summary.published,
                deferred = summary.deferred,
                dropped = summary.dropped,
                "scheduler tick"
            );
        }
        Ok(summary)
    }

    /// Hourly scan: Failed URLs under the retry budget whose last attempt
    /// is old enough go back to Pending with priority decremented
    /// (floor 1), and re-enter the frontier.
    pub async fn retry_scan(&self) -> Result<usize, CrawlError> {
        let cutoff = Utc::now() - chrono::Duration::seconds(self.config.retry_scan_seconds as i64);
        let candidates = self
            .store
            .failed_retryable(cutoff, self.config.max_retries, 1000)
            .await?;
        let mut requeued = 0;
        for record in candidates {
            let priority = (record.priority - 1.0).max(1.0);
            if self.store.requeue_failed(&record.url_hash, priority).await? {
                self.frontier
                    .admit_seed(FrontierCandidate {
                        url: record.url.clone(),
                        domain: record.domain.clone(),
                        depth: record.depth,
                        pagerank: None,
                        domain_authority: None,
                    })
                    .await?;
                requeued += 1;
            }
        }
        if requeued > 0 {
            info!(requeued, "retry scan returned failed urls to pending");
        }
        Ok(requeued)
    }

    /// Re-queue InProgress entries whose start stamp went stale (crashed
    /// or cancelled workers).
    pub async fn reap_stale(&self) -> Result<usize, CrawlError> {
        let cutoff =
            Utc::now() - chrono::Duration::minutes(self.config.stale_in_progress_minutes);
        let stale = self.store.requeue_stale(cutoff).await?;
        for record in &stale {
            self.frontier
                .admit_seed(FrontierCandidate {
                    url: record.url.clone(),
                    domain: record.domain.clone(),
                    depth: record.depth,
                    pagerank: None,
                    domain_authority: None,
                })
                .await?;
        }
        if !stale.is_empty() {
            warn!(count = stale.len(), "reaper requeued stale in-progress urls");
        }
        Ok(stale.len())
    }

    /// Main loop: tick at the configured cadence, retry-scan hourly and
    /// reap on the same timer, until shutdown.
    pub async fn run(self: Arc<Self>, mut shutdown: broadcast::Receiver<()>) {
        let mut tick = tokio::time::interval(Duration::from_secs(
            self.config.scheduler_tick_seconds.max(1),
        ));
        let mut maintenance = tokio::time::interval(Duration::from_secs(
            self.config.retry_scan_seconds.max(60),
        ));
        loop {
            tokio::select! {
                _ = shutdown.recv() => {
                    info!("scheduler shutting down");
                    break;
                }
                _ = tick.tick() => {
                    if let Err(e) = self.tick().await {
                        warn!("scheduler tick failed: {e}");
                    }
                }
                _ = maintenance.tick() => {
                    if let Err(e) = self.retry_scan().await {
                        warn!("retry scan failed: {e}");
                    }
                    if let Err(e) = self.reap_stale().await {
                        warn!("reaper failed: {e}");
                    }
                }
            }
        }
    }
}
