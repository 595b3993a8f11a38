use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use chrono::Utc;
use tokio::sync::{broadcast, Mutex};
use tokio::task::JoinHandle;
use tracing::{info, warn};

use searchlight_bus::{MemoryBus, MessageBus};
use searchlight_core::config::Endpoints;
use searchlight_core::AppConfig;
use searchlight_crawler::{
    Counters, FetchWorker, HttpFetcher, IndexWorker, LinkDiscoveryWorker, Scheduler,
    SitemapExpander,
};
use searchlight_frontier::{Frontier, ScoringStrategy, UrlSeenFilter};
use searchlight_index::{Deduplicator, Indexer, OnDuplicate, SearchIndex};
use searchlight_kv::{DistributedLock, KvStore, MemoryKv};
use searchlight_politeness::{PolitenessGovernor, RobotsCache, SystemClock};
use searchlight_query::QueryService;
use searchlight_rank::PageRankJob;
use searchlight_storage::{CrawlStore, MemoryCrawlStore, PgCrawlStore};

const RANK_CRON_INTERVAL: Duration = Duration::from_secs(7 * 24 * 3600);
const BLOOM_LOCK: &str = "bloom-serialize";

/// Everything a command needs, wired once. Backends come from the
/// environment: a Postgres URL selects the relational store, an index
/// directory the on-disk index; everything else runs in-process.
pub struct App {
    pub config: AppConfig,
    pub kv: Arc<dyn KvStore>,
    pub bus: Arc<dyn MessageBus>,
    pub store: Arc<dyn CrawlStore>,
    pub seen: Arc<UrlSeenFilter>,
    pub frontier: Arc<Frontier>,
    pub governor: Arc<PolitenessGovernor>,
    pub robots: Arc<RobotsCache>,
    pub index: Arc<SearchIndex>,
    pub indexer: Arc<Indexer>,
    pub query: Arc<QueryService>,
    pub rank_job: Arc<PageRankJob>,
    pub counters: Arc<Counters>,
    pub sitemaps: Arc<SitemapExpander>,
    pub dedup: Deduplicator,
    rank_running: Mutex<Option<String>>,
}

impl App {
    pub async fn build(config: AppConfig) -> Result<Arc<Self>> {
        let endpoints = Endpoints::from_env();
        if endpoints.kv_url.is_some() || endpoints.bus_url.is_some() {
            warn!("external kv/bus endpoints configured; this binary ships the in-process backends");
        }

        let kv: Arc<dyn KvStore> = Arc::new(MemoryKv::new());
        let bus: Arc<dyn MessageBus> = Arc::new(MemoryBus::default());

        let store: Arc<dyn CrawlStore> = match &endpoints.database_url {
            Some(url) => {
                let pg = PgCrawlStore::new(url).await?;
                pg.run_migrations().await?;
                Arc::new(pg)
            }
            None => {
                info!("no database url configured, using in-memory crawl store");
                Arc::new(MemoryCrawlStore::new())
            }
        };

        let index_dir: PathBuf = endpoints
            .index_dir
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(&config.general.data_dir).join("index"));
        let index = Arc::new(SearchIndex::open_in_dir(&index_dir)?);

        let seen = Arc::new(UrlSeenFilter::new(
            kv.clone(),
            config.frontier.bloom_capacity,
            config.frontier.bloom_fp_rate,
        ));
        seen.hydrate().await?;

        let strategy = ScoringStrategy::parse(&config.frontier.strategy, &config.frontier)?;
        let frontier = Arc::new(Frontier::new(
            kv.clone(),
            seen.clone(),
            strategy,
            config.general.max_depth,
        ));

        let governor = Arc::new(PolitenessGovernor::new(
            kv.clone(),
            &config.politeness,
            Arc::new(SystemClock),
        ));
        let robots = Arc::new(RobotsCache::new(
            kv.clone(),
            config.general.user_agent.clone(),
            Duration::from_secs(config.politeness.robots_ttl_hours * 3600),
        )?);

        let make_dedup = || {
            Deduplicator::new(
                kv.clone(),
                config.dedup.max_hamming_distance,
                config.dedup.fingerprint_ttl_days,
            )
        };
        let indexer = Arc::new(Indexer::new(
            index.clone(),
            make_dedup(),
            kv.clone(),
            config.indexing.clone(),
            OnDuplicate::parse(&config.dedup.on_duplicate)?,
        ));

        let query = Arc::new(QueryService::new(
            index.clone(),
            kv.clone(),
            config.query.clone(),
        ));
        let dedup = make_dedup();
        let rank_job = Arc::new(PageRankJob::new(store.clone(), index.clone(), kv.clone()));
        let sitemaps = Arc::new(SitemapExpander::new(
            &config.general.user_agent,
            robots.clone(),
            frontier.clone(),
            store.clone(),
        )?);

        Ok(Arc::new(Self {
            config,
            kv,
            bus,
            store,
            seen,
            frontier,
            governor,
            robots,
            index,
            indexer,
            query,
            rank_job,
            counters: Arc::new(Counters::default()),
            sitemaps,
            dedup,
            rank_running: Mutex::new(None),
        }))
    }

    /// Spawn the full crawl pipeline: scheduler, worker fleets, the bloom
    /// persistence loop and the weekly rank cron.
    pub fn spawn_pipeline(
        self: &Arc<Self>,
        shutdown: &broadcast::Sender<()>,
    ) -> Result<Vec<JoinHandle<()>>> {
        let mut handles = Vec::new();

        let scheduler = Arc::new(Scheduler::new(
            self.frontier.clone(),
            self.governor.clone(),
            self.store.clone(),
            self.bus.clone(),
            self.config.crawler.clone(),
        ));
        handles.push(tokio::spawn(scheduler.run(shutdown.subscribe())));

        let client = Arc::new(HttpFetcher::new(
            &self.config.general.user_agent,
            self.config.crawler.fetch_timeout_seconds,
            self.config.crawler.max_redirects,
            self.config.crawler.max_body_size_mb,
        )?);
        let fetch_workers = self
            .config
            .crawler
            .fetch_workers_min
            .clamp(1, self.config.crawler.fetch_workers_max);
        for worker_id in 0..fetch_workers {
            let worker = Arc::new(FetchWorker::new(
                client.clone(),
                self.robots.clone(),
                self.governor.clone(),
                self.store.clone(),
                self.bus.clone(),
                self.counters.clone(),
            ));
            let rx = shutdown.subscribe();
            handles.push(tokio::spawn(async move {
                if let Err(e) = worker.run(worker_id, rx).await {
                    warn!(worker_id, "fetch worker exited: {e}");
                }
            }));
        }

        let discovery_workers = (fetch_workers / 4).max(1);
        for worker_id in 0..discovery_workers {
            let worker = Arc::new(LinkDiscoveryWorker::new(
                self.frontier.clone(),
                self.store.clone(),
                self.bus.clone(),
                self.counters.clone(),
                self.config.general.max_depth,
                self.config.crawler.max_links_per_page,
            ));
            let rx = shutdown.subscribe();
            handles.push(tokio::spawn(async move {
                if let Err(e) = worker.run(worker_id, rx).await {
                    warn!(worker_id, "link-discovery worker exited: {e}");
                }
            }));
        }

        let index_workers = (fetch_workers / 4).max(1);
        for worker_id in 0..index_workers {
            let worker = Arc::new(IndexWorker::new(self.indexer.clone(), self.bus.clone()));
            let rx = shutdown.subscribe();
            handles.push(tokio::spawn(async move {
                if let Err(e) = worker.run(worker_id, rx).await {
                    warn!(worker_id, "index worker exited: {e}");
                }
            }));
        }

        // bloom bitset persistence, under its serialization lock
        {
            let app = self.clone();
            let mut rx = shutdown.subscribe();
            let every = Duration::from_secs(self.config.frontier.bloom_persist_seconds.max(10));
            handles.push(tokio::spawn(async move {
                let mut timer = tokio::time::interval(every);
                loop {
                    tokio::select! {
                        _ = rx.recv() => break,
                        _ = timer.tick() => {
                            if let Err(e) = app.persist_bloom().await {
                                warn!("bloom persistence failed: {e}");
                            }
                        }
                    }
                }
            }));
        }

        // weekly rank cron
        {
            let app = self.clone();
            let mut rx = shutdown.subscribe();
            handles.push(tokio::spawn(async move {
                let start = tokio::time::Instant::now() + RANK_CRON_INTERVAL;
                let mut timer = tokio::time::interval_at(start, RANK_CRON_INTERVAL);
                loop {
                    tokio::select! {
                        _ = rx.recv() => break,
                        _ = timer.tick() => {
                            let id = app.trigger_rank_job().await;
                            info!(job_id = %id, "weekly rank job triggered");
                        }
                    }
                }
            }));
        }

        Ok(handles)
    }

    async fn persist_bloom(&self) -> Result<(), searchlight_core::CrawlError> {
        match DistributedLock::try_acquire(self.kv.clone(), BLOOM_LOCK, Duration::from_secs(60))
            .await?
        {
            Some(lock) => {
                self.seen.persist().await?;
                lock.release().await?;
                Ok(())
            }
            None => Ok(()),
        }
    }

    /// Expand robots-declared sitemaps for the seed domains in the
    /// background.
    pub fn spawn_sitemap_expansion(self: &Arc<Self>, seeds: &[String]) {
        let mut domains: Vec<(String, String)> = Vec::new();
        for raw in seeds {
            if let Ok(canonical) = searchlight_core::canonicalize(raw) {
                let pair = (canonical.domain.clone(), canonical.url.scheme().to_string());
                if !domains.contains(&pair) {
                    domains.push(pair);
                }
            }
        }
        for (domain, scheme) in domains {
            let app = self.clone();
            tokio::spawn(async move {
                match app.sitemaps.expand_domain(&domain, &scheme).await {
                    Ok(admitted) if admitted > 0 => {
                        info!(domain, admitted, "sitemap pages admitted")
                    }
                    Ok(_) => {}
                    Err(e) => warn!(domain, "sitemap expansion failed: {e}"),
                }
            });
        }
    }

    /// Kick off a rank job unless one is already running; returns the job
    /// id either way.
    pub async fn trigger_rank_job(self: &Arc<Self>) -> String {
        let mut running = self.rank_running.lock().await;
        if let Some(id) = running.as_ref() {
            return id.clone();
        }
        let id = format!("rank-{}", Utc::now().timestamp_millis());
        *running = Some(id.clone());
        let app = self.clone();
        tokio::spawn(async move {
            match app.rank_job.run().await {
                Ok(summary) => info!(
                    nodes = summary.nodes,
                    iterations = summary.iterations,
                    "rank job finished"
                ),
                Err(e) => warn!("rank job failed: {e}"),
            }
            *app.rank_running.lock().await = None;
        });
        id
    }
}
