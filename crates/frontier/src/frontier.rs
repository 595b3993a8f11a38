use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::{debug, info};

use searchlight_core::{url_hash, CrawlError};
use searchlight_kv::{DistributedLock, KvStore};

use crate::seen::UrlSeenFilter;
use crate::strategy::{ScoreInputs, ScoringStrategy};

pub const FRONTIER_KEY: &str = "frontier";
const META_PREFIX: &str = "frontier:meta:";
const CASH_PREFIX: &str = "opic:cash:";
const STRATEGY_LOCK: &str = "frontier-strategy";

/// A URL proposed for crawling, with whatever ranking signals the caller
/// has at hand. The signals are snapshotted alongside the entry so a
/// strategy switch can re-score residents without chasing other stores.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FrontierCandidate {
    pub url: String,
    pub domain: String,
    pub depth: u32,
    pub pagerank: Option<f64>,
    pub domain_authority: Option<f64>,
}

pub struct Frontier {
    kv: Arc<dyn KvStore>,
    seen: Arc<UrlSeenFilter>,
    strategy: RwLock<ScoringStrategy>,
    max_depth: u32,
}

impl Frontier {
    pub fn new(
        kv: Arc<dyn KvStore>,
        seen: Arc<UrlSeenFilter>,
        strategy: ScoringStrategy,
        max_depth: u32,
    ) -> Self {
        Self {
            kv,
            seen,
            strategy: RwLock::new(strategy),
            max_depth,
        }
    }

    pub async fn strategy_name(&self) -> &'static str {
        self.strategy.read().await.name()
    }

    fn meta_key(url: &str) -> String {
        format!("{META_PREFIX}{}", url_hash(url))
    }

    fn cash_key(url: &str) -> String {
        format!("{CASH_PREFIX}{}", url_hash(url))
    }

    async fn cash_of(&self, url: &str) -> Result<f64, CrawlError> {
        Ok(self
            .kv
            .get(&Self::cash_key(url))
            .await?
            .and_then(|v| v.parse().ok())
            .unwrap_or(0.0))
    }

    async fn score_candidate(
        &self,
        candidate: &FrontierCandidate,
        cash: f64,
    ) -> Option<f64> {
        let strategy = self.strategy.read().await;
        strategy.score(&ScoreInputs {
            url: &candidate.url,
            domain: &candidate.domain,
            depth: candidate.depth,
            max_depth: self.max_depth,
            pagerank: candidate.pagerank,
            domain_authority: candidate.domain_authority,
            cash,
        })
    }

    /// Admit a newly discovered URL: depth gate, seen gate, strategy score.
    /// Returns whether the URL entered the frontier.
    pub async fn admit(&self, candidate: FrontierCandidate) -> Result<bool, CrawlError> {
        if candidate.depth > self.max_depth {
            return Ok(false);
        }
        if self.seen.contains(&candidate.url).await {
            return Ok(false);
        }
        self.insert(candidate).await
    }

    /// Seeds skip the seen gate so a re-seeded URL is crawled again.
    pub async fn admit_seed(&self, candidate: FrontierCandidate) -> Result<bool, CrawlError> {
        self.insert(candidate).await
    }

    async fn insert(&self, candidate: FrontierCandidate) -> Result<bool, CrawlError> {
        // every new URL starts with one unit of cash
        let cash = self.kv.incr_by_f64(&Self::cash_key(&candidate.url), 1.0).await?;
        let Some(score) = self.score_candidate(&candidate, cash).await else {
            debug!(url = %candidate.url, "strategy refused admission");
            return Ok(false);
        };
        self.seen.add(&candidate.url).await?;
        let meta = serde_json::to_string(&candidate)
            .map_err(|e| CrawlError::Store(format!("frontier meta encode: {e}")))?;
        self.kv.set(&Self::meta_key(&candidate.url), &meta).await?;
        self.kv.zadd(FRONTIER_KEY, &candidate.url, score).await?;
        Ok(true)
    }

    /// Pop the `n` highest-scoring URLs. Metadata stays behind until
    /// [`Frontier::forget`] so a politeness rejection can re-insert.
    pub async fn pop_batch(&self, n: usize) -> Result<Vec<(String, f64)>, CrawlError> {
        self.kv.zpop_max(FRONTIER_KEY, n).await
    }

    /// Put a popped entry back with an exponentially decayed score so it
    /// does not immediately shadow fresher work.
    pub async fn reinsert_backoff(&self, url: &str, prior_score: f64) -> Result<(), CrawlError> {
        self.kv.zadd(FRONTIER_KEY, url, prior_score * 0.5).await
    }

    /// Drop an entry's side-state once it is handed to the fetch pipeline.
    pub async fn forget(&self, url: &str) -> Result<(), CrawlError> {
        self.kv.delete(&Self::meta_key(url)).await?;
        Ok(())
    }

    pub async fn len(&self) -> Result<usize, CrawlError> {
        self.kv.zcard(FRONTIER_KEY).await
    }

    pub async fn is_empty(&self) -> Result<bool, CrawlError> {
        Ok(self.len().await? == 0)
    }

    /// OPIC bookkeeping on fetch completion: split the page's cash evenly
    /// over its outbound URLs with atomic increments, then zero the source.
    /// Resident outlinks get their frontier score bumped to the new cash.
    pub async fn distribute_cash(
        &self,
        source_url: &str,
        outbound: &[String],
    ) -> Result<(), CrawlError> {
        if outbound.is_empty() {
            return Ok(());
        }
        let cash = self.cash_of(source_url).await?;
        if cash <= 0.0 {
            return Ok(());
        }
        let share = cash / outbound.len() as f64;
        let opic = matches!(&*self.strategy.read().await, ScoringStrategy::Opic);
        for url in outbound {
            let balance = self.kv.incr_by_f64(&Self::cash_key(url), share).await?;
            if opic && self.kv.get(&Self::meta_key(url)).await?.is_some() {
                self.kv.zadd(FRONTIER_KEY, url, balance).await?;
            }
        }
        self.kv.set(&Self::cash_key(source_url), "0").await?;
        Ok(())
    }

    /// Swap the scoring strategy and re-score every resident entry, under
    /// the distributed strategy lock. Entries the new strategy refuses
    /// (focused whitelist) are evicted.
    pub async fn switch_strategy(&self, next: ScoringStrategy) -> Result<(), CrawlError> {
        let lock =
            DistributedLock::acquire(self.kv.clone(), STRATEGY_LOCK, Duration::from_secs(120))
                .await?;
        let previous = {
            let mut guard = self.strategy.write().await;
            let previous = guard.name();
            *guard = next;
            previous
        };

        let residents = self.kv.zscan(FRONTIER_KEY).await?;
        let mut rescored = 0usize;
        let mut evicted = 0usize;
        for (url, _) in residents {
            let Some(meta) = self.kv.get(&Self::meta_key(&url)).await? else {
                continue;
            };
            let Ok(candidate) = serde_json::from_str::<FrontierCandidate>(&meta) else {
                continue;
            };
            let cash = self.cash_of(&url).await?;
            match self.score_candidate(&candidate, cash).await {
                Some(score) => {
                    self.kv.zadd(FRONTIER_KEY, &url, score).await?;
                    rescored += 1;
                }
                None => {
                    self.kv.zrem(FRONTIER_KEY, &url).await?;
                    self.kv.delete(&Self::meta_key(&url)).await?;
                    evicted += 1;
                }
            }
        }
        let current = self.strategy.read().await.name();
        info!(from = previous, to = current, rescored, evicted, "frontier strategy switched");
        lock.release().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use searchlight_kv::MemoryKv;

    fn candidate(url: &str, depth: u32) -> FrontierCandidate {
        let parsed = url::Url::parse(url).unwrap();
        FrontierCandidate {
            url: url.to_string(),
            domain: parsed.host_str().unwrap().to_string(),
            depth,
            pagerank: None,
            domain_authority: None,
        }
    }

    fn frontier(kv: Arc<dyn KvStore>, strategy: ScoringStrategy) -> Frontier {
        let seen = Arc::new(UrlSeenFilter::new(kv.clone(), 100_000, 0.01));
        Frontier::new(kv, seen, strategy, 10)
    }

    #[tokio::test]
    async fn pops_in_score_order_under_bfs() {
        let kv: Arc<dyn KvStore> = Arc::new(MemoryKv::new());
        let f = frontier(kv, ScoringStrategy::Bfs);
        assert!(f.admit(candidate("https://a.com/deep/", 5)).await.unwrap());
        assert!(f.admit(candidate("https://a.com/shallow/", 1)).await.unwrap());
        assert!(f.admit(candidate("https://a.com/mid/", 3)).await.unwrap());
        let batch = f.pop_batch(3).await.unwrap();
        assert_eq!(batch[0].0, "https://a.com/shallow/");
        assert_eq!(batch[1].0, "https://a.com/mid/");
        assert_eq!(batch[2].0, "https://a.com/deep/");
    }

    #[tokio::test]
    async fn depth_and_seen_gates_hold() {
        let kv: Arc<dyn KvStore> = Arc::new(MemoryKv::new());
        let f = frontier(kv, ScoringStrategy::Bfs);
        assert!(!f.admit(candidate("https://a.com/too-deep/", 11)).await.unwrap());
        assert!(f.admit(candidate("https://a.com/x/", 1)).await.unwrap());
        assert!(!f.admit(candidate("https://a.com/x/", 1)).await.unwrap());
        assert_eq!(f.len().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn reinsert_backoff_halves_score() {
        let kv: Arc<dyn KvStore> = Arc::new(MemoryKv::new());
        let f = frontier(kv, ScoringStrategy::Bfs);
        f.admit(candidate("https://a.com/x/", 0)).await.unwrap();
        let (url, score) = f.pop_batch(1).await.unwrap().remove(0);
        f.reinsert_backoff(&url, score).await.unwrap();
        let (again, decayed) = f.pop_batch(1).await.unwrap().remove(0);
        assert_eq!(again, url);
        assert_eq!(decayed, score * 0.5);
    }

    #[tokio::test]
    async fn opic_cash_flows_to_outlinks() {
        let kv: Arc<dyn KvStore> = Arc::new(MemoryKv::new());
        let f = frontier(kv.clone(), ScoringStrategy::Opic);
        f.admit(candidate("https://a.com/source/", 0)).await.unwrap();
        f.admit(candidate("https://a.com/t1/", 1)).await.unwrap();
        f.admit(candidate("https://a.com/t2/", 1)).await.unwrap();
        f.distribute_cash(
            "https://a.com/source/",
            &["https://a.com/t1/".into(), "https://a.com/t2/".into()],
        )
        .await
        .unwrap();
        // each target started with cash 1 and received half the source's 1
        let batch = f.pop_batch(3).await.unwrap();
        let t1 = batch.iter().find(|(u, _)| u.ends_with("/t1/")).unwrap();
        assert!((t1.1 - 1.5).abs() < 1e-9);
        // source cash zeroed: a second distribution moves nothing
        f.distribute_cash("https://a.com/source/", &["https://a.com/t1/".into()])
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn strategy_switch_rescores_residents() {
        let kv: Arc<dyn KvStore> = Arc::new(MemoryKv::new());
        let f = frontier(kv, ScoringStrategy::Bfs);
        // shallow page, no rank signal
        f.admit(candidate("https://plain.org/top/", 1)).await.unwrap();
        // deep page with a strong rank signal
        let mut ranked = candidate("https://ranked.org/deep/page/", 8);
        ranked.pagerank = Some(0.9);
        ranked.domain_authority = Some(0.9);
        f.admit(ranked).await.unwrap();

        // BFS favors the shallow entry...
        let peek = f.pop_batch(1).await.unwrap().remove(0);
        assert_eq!(peek.0, "https://plain.org/top/");
        f.reinsert_backoff(&peek.0, peek.1 * 2.0).await.unwrap(); // restore original score

        // ...best-first favors the ranked one
        f.switch_strategy(ScoringStrategy::BestFirst).await.unwrap();
        let top = f.pop_batch(1).await.unwrap().remove(0);
        assert_eq!(top.0, "https://ranked.org/deep/page/");
    }

    #[tokio::test]
    async fn switch_to_focused_evicts_off_whitelist_entries() {
        let kv: Arc<dyn KvStore> = Arc::new(MemoryKv::new());
        let f = frontier(kv, ScoringStrategy::Bfs);
        f.admit(candidate("https://example.com/keep/", 1)).await.unwrap();
        f.admit(candidate("https://other.org/drop/", 1)).await.unwrap();
        f.switch_strategy(ScoringStrategy::Focused {
            keywords: vec![],
            whitelist: vec!["example.com".into()],
        })
        .await
        .unwrap();
        assert_eq!(f.len().await.unwrap(), 1);
        let rest = f.pop_batch(1).await.unwrap();
        assert_eq!(rest[0].0, "https://example.com/keep/");
    }
}
