//! Batch PageRank over the link graph: cron-triggered, globally single
//! instance via the distributed lock, reading the flat edge table into an
//! in-memory graph and writing scores back to the rank table and the
//! document index.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tracing::info;

use searchlight_core::{url_hash, CrawlError, RankRecord};
use searchlight_index::SearchIndex;
use searchlight_kv::{DistributedLock, KvStore};
use searchlight_storage::CrawlStore;

pub const DEFAULT_DAMPING: f64 = 0.85;
pub const DEFAULT_TOLERANCE: f64 = 1e-4;
pub const DEFAULT_MAX_ITERATIONS: u32 = 100;
const LOCK_NAME: &str = "pagerank";
const LOCK_TTL: Duration = Duration::from_secs(600);

/// One power-iteration run. Dangling nodes spread their mass uniformly so
/// the total stays 1; iteration stops when the largest per-node delta
/// drops under `tolerance`. The returned vector is normalized to sum to 1.
pub fn compute(
    out_edges: &[Vec<usize>],
    damping: f64,
    tolerance: f64,
    max_iterations: u32,
) -> (Vec<f64>, u32) {
    let n = out_edges.len();
    if n == 0 {
        return (Vec::new(), 0);
    }
    let uniform = 1.0 / n as f64;
    let mut scores = vec![uniform; n];
    let mut iterations = 0;

    for iteration in 0..max_iterations {
        let mut next = vec![(1.0 - damping) * uniform; n];
        let mut dangling_mass = 0.0;
        for (v, outs) in out_edges.iter().enumerate() {
            if outs.is_empty() {
                dangling_mass += scores[v];
            } else {
                let share = damping * scores[v] / outs.len() as f64;
                for &u in outs {
                    next[u] += share;
                }
            }
        }
        let dangling_share = damping * dangling_mass * uniform;
        for cell in &mut next {
            *cell += dangling_share;
        }

        let delta = scores
            .iter()
            .zip(&next)
            .map(|(a, b)| (a - b).abs())
            .fold(0.0, f64::max);
        scores = next;
        iterations = iteration + 1;
        if delta < tolerance {
            break;
        }
    }

    let total: f64 = scores.iter().sum();
    if total > 0.0 {
        for score in &mut scores {
            *score /= total;
        }
    }
    (scores, iterations)
}

#[derive(Debug, Clone)]
pub struct RankJobSummary {
    pub nodes: usize,
    pub edges: usize,
    pub iterations: u32,
    pub joined_documents: usize,
}

pub struct PageRankJob {
    store: Arc<dyn CrawlStore>,
    index: Arc<SearchIndex>,
    kv: Arc<dyn KvStore>,
    damping: f64,
    tolerance: f64,
    max_iterations: u32,
}

impl PageRankJob {
    pub fn new(store: Arc<dyn CrawlStore>, index: Arc<SearchIndex>, kv: Arc<dyn KvStore>) -> Self {
        Self {
            store,
            index,
            kv,
            damping: DEFAULT_DAMPING,
            tolerance: DEFAULT_TOLERANCE,
            max_iterations: DEFAULT_MAX_ITERATIONS,
        }
    }

    /// Run one ranking pass. Fails fast with `LockContended` when another
    /// instance is already running; the next cron trigger will retry.
    /// Edges written during the run are picked up by the next one.
    pub async fn run(&self) -> Result<RankJobSummary, CrawlError> {
        let lock = DistributedLock::acquire(self.kv.clone(), LOCK_NAME, LOCK_TTL).await?;

        let edges = self.store.all_edges().await?;
        let mut ids: HashMap<String, usize> = HashMap::new();
        let mut urls: Vec<String> = Vec::new();
        let mut intern = |url: &str, urls: &mut Vec<String>, ids: &mut HashMap<String, usize>| {
            *ids.entry(url.to_string()).or_insert_with(|| {
                urls.push(url.to_string());
                urls.len() - 1
            })
        };
        let mut out_edges: Vec<Vec<usize>> = Vec::new();
        let mut inbound: Vec<u64> = Vec::new();
        for edge in &edges {
            let s = intern(&edge.source_url, &mut urls, &mut ids);
            let t = intern(&edge.target_url, &mut urls, &mut ids);
            let max_node = s.max(t);
            if out_edges.len() <= max_node {
                out_edges.resize(max_node + 1, Vec::new());
                inbound.resize(max_node + 1, 0);
            }
            out_edges[s].push(t);
            inbound[t] += 1;
        }
        info!(nodes = urls.len(), edges = edges.len(), "link graph loaded");

        let (scores, iterations) = compute(
            &out_edges,
            self.damping,
            self.tolerance,
            self.max_iterations,
        );
        lock.extend().await?;

        let now = Utc::now();
        let ranks: Vec<RankRecord> = urls
            .iter()
            .enumerate()
            .map(|(i, url)| RankRecord {
                url: url.clone(),
                score: scores.get(i).copied().unwrap_or(0.0),
                inbound: inbound.get(i).copied().unwrap_or(0),
                outbound: out_edges.get(i).map(|o| o.len() as u64).unwrap_or(0),
                calculated_at: now,
            })
            .collect();
        self.store.write_ranks(&ranks).await?;

        // join scores back onto the documents so queries read rank from
        // one place
        let mut joined = 0usize;
        for rank in &ranks {
            if self
                .index
                .update_rank(&url_hash(&rank.url), rank.score, rank.inbound)
                .await?
            {
                joined += 1;
            }
        }

        let summary = RankJobSummary {
            nodes: urls.len(),
            edges: edges.len(),
            iterations,
            joined_documents: joined,
        };
        info!(
            nodes = summary.nodes,
            iterations = summary.iterations,
            joined = summary.joined_documents,
            "rank job complete"
        );
        lock.release().await?;
        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    fn sum(scores: &[f64]) -> f64 {
        scores.iter().sum()
    }

    #[test]
    fn conserves_total_mass() {
        let graph = vec![vec![1], vec![2], vec![0], vec![2], vec![]];
        let (scores, _) = compute(&graph, 0.85, 1e-6, 100);
        assert!((sum(&scores) - 1.0).abs() < 1e-6);
        for score in &scores {
            assert!(*score > 0.0 && *score < 1.0);
        }
    }

    #[test]
    fn dangling_nodes_do_not_leak_mass() {
        // node 1 is dangling
        let graph = vec![vec![1], vec![]];
        let (scores, _) = compute(&graph, 0.85, 1e-6, 100);
        assert!((sum(&scores) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn five_node_graph_ranks_c_highest_d_lowest() {
        // A=0, B=1, C=2, D=3: A->B, A->C, B->C, C->A, D->C
        let graph = vec![vec![1, 2], vec![2], vec![0], vec![2]];
        let (scores, iterations) = compute(&graph, 0.85, 1e-9, 50);
        assert!(iterations <= 50);
        let c = scores[2];
        let d = scores[3];
        assert!(c > scores[0] && c > scores[1] && c > d, "scores: {scores:?}");
        assert!(d < scores[0] && d < scores[1], "scores: {scores:?}");
    }

    /// Dense reference formulation: x' = (1-d)/n + d * (M x + dangling/n),
    /// iterated to fixpoint.
    fn reference(out_edges: &[Vec<usize>], damping: f64, rounds: u32) -> Vec<f64> {
        let n = out_edges.len();
        let mut x = vec![1.0 / n as f64; n];
        for _ in 0..rounds {
            let mut next = vec![0.0; n];
            let mut dangling = 0.0;
            for (v, outs) in out_edges.iter().enumerate() {
                if outs.is_empty() {
                    dangling += x[v];
                }
            }
            for u in 0..n {
                let mut incoming = 0.0;
                for (v, outs) in out_edges.iter().enumerate() {
                    if outs.contains(&u) {
                        incoming += x[v] / outs.len() as f64;
                    }
                }
                next[u] = (1.0 - damping) / n as f64
                    + damping * (incoming + dangling / n as f64);
            }
            x = next;
        }
        x
    }

    #[test]
    fn converges_on_large_strongly_connected_graph() {
        let n = 1000;
        let mut rng = StdRng::seed_from_u64(7);
        // ring for strong connectivity plus random chords
        let mut graph: Vec<Vec<usize>> = (0..n).map(|i| vec![(i + 1) % n]).collect();
        for _ in 0..4000 {
            let from = rng.gen_range(0..n);
            let to = rng.gen_range(0..n);
            if from != to && !graph[from].contains(&to) {
                graph[from].push(to);
            }
        }

        let (scores, iterations) = compute(&graph, 0.85, 1e-4, 100);
        assert!(iterations <= 100);
        assert!((sum(&scores) - 1.0).abs() < 1e-6);

        let expected = reference(&graph, 0.85, 200);
        let total: f64 = expected.iter().sum();
        for (got, want) in scores.iter().zip(expected.iter().map(|w| w / total)) {
            assert!((got - want).abs() < 1e-3, "got {got}, want {want}");
        }
    }
}
