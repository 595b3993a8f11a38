//! The crawl pipeline: scheduler, fetch workers, link-discovery workers
//! and the sitemap expansion flow, glued together over the bus.

pub mod client;
pub mod discover;
pub mod fetch;
pub mod indexing;
pub mod scheduler;
pub mod sitemap;

use std::sync::atomic::AtomicU64;
use std::sync::Arc;

use searchlight_core::{canonicalize, CrawlError, UrlRecord};
use searchlight_frontier::{Frontier, FrontierCandidate};
use searchlight_storage::CrawlStore;

pub use client::{FetchClient, FetchedResponse, HttpFetcher};
pub use discover::LinkDiscoveryWorker;
pub use fetch::FetchWorker;
pub use indexing::IndexWorker;
pub use scheduler::{Scheduler, TickSummary};
pub use sitemap::SitemapExpander;

/// Priority given to operator-submitted seeds.
pub const SEED_PRIORITY: f64 = 10.0;

/// Process-wide event counters, surfaced through the admin stats endpoint.
#[derive(Default)]
pub struct Counters {
    pub fetched: AtomicU64,
    pub fetch_failures: AtomicU64,
    pub blocked: AtomicU64,
    pub empty_bodies: AtomicU64,
    pub invalid_urls: AtomicU64,
    pub dlq: AtomicU64,
}

/// Admit operator seeds at depth 0. Returns how many entered the frontier.
pub async fn seed_urls(
    urls: &[String],
    frontier: &Frontier,
    store: &Arc<dyn CrawlStore>,
) -> Result<usize, CrawlError> {
    let mut admitted = 0;
    for raw in urls {
        let canonical = match canonicalize(raw) {
            Ok(c) => c,
            Err(e) => {
                tracing::warn!(url = %raw, "seed rejected: {e}");
                continue;
            }
        };
        let record =
            UrlRecord::new(raw, canonical.as_str(), &canonical.domain, 0, SEED_PRIORITY, None);
        store.ensure_domain(&canonical.domain).await?;
        store.insert_url(&record).await?;
        let candidate = FrontierCandidate {
            url: canonical.as_str().to_string(),
            domain: canonical.domain.clone(),
            depth: 0,
            pagerank: None,
            domain_authority: None,
        };
        if frontier.admit_seed(candidate).await? {
            admitted += 1;
        }
    }
    Ok(admitted)
}
