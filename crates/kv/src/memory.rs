use std::sync::Mutex;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use priority_queue::PriorityQueue;

use searchlight_core::CrawlError;

use crate::KvStore;

/// Score wrapper so f64 priorities can live in the priority queue
/// (higher score = popped first).
#[derive(Debug, Clone, Copy)]
struct Score(f64);

impl PartialEq for Score {
    fn eq(&self, other: &Self) -> bool {
        self.0.to_bits() == other.0.to_bits()
    }
}

impl Eq for Score {}

impl PartialOrd for Score {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Score {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.0.partial_cmp(&other.0).unwrap_or(std::cmp::Ordering::Equal)
    }
}

struct ValueEntry {
    value: String,
    expires_at: Option<Instant>,
}

impl ValueEntry {
    fn live(&self) -> bool {
        self.expires_at.map(|at| at > Instant::now()).unwrap_or(true)
    }
}

/// In-process backend. Plain keys live in a `DashMap` with lazy expiry;
/// sorted sets are priority queues behind a per-set mutex. CAS operations
/// rely on the entry API pinning the shard for the duration of the edit.
#[derive(Default)]
pub struct MemoryKv {
    values: DashMap<String, ValueEntry>,
    zsets: DashMap<String, Mutex<PriorityQueue<String, Score>>>,
}

impl MemoryKv {
    pub fn new() -> Self {
        Self::default()
    }

    fn with_zset<T>(
        &self,
        key: &str,
        f: impl FnOnce(&mut PriorityQueue<String, Score>) -> T,
    ) -> Result<T, CrawlError> {
        let set = self
            .zsets
            .entry(key.to_string())
            .or_insert_with(|| Mutex::new(PriorityQueue::new()));
        let mut guard = set
            .lock()
            .map_err(|_| CrawlError::Store("sorted set lock poisoned".into()))?;
        Ok(f(&mut guard))
    }
}

#[async_trait]
impl KvStore for MemoryKv {
    async fn get(&self, key: &str) -> Result<Option<String>, CrawlError> {
        Ok(self
            .values
            .get(key)
            .filter(|e| e.live())
            .map(|e| e.value.clone()))
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), CrawlError> {
        self.values.insert(
            key.to_string(),
            ValueEntry {
                value: value.to_string(),
                expires_at: None,
            },
        );
        Ok(())
    }

    async fn set_with_ttl(
        &self,
        key: &str,
        value: &str,
        ttl: Duration,
    ) -> Result<(), CrawlError> {
        self.values.insert(
            key.to_string(),
            ValueEntry {
                value: value.to_string(),
                expires_at: Some(Instant::now() + ttl),
            },
        );
        Ok(())
    }

    async fn set_if_absent(
        &self,
        key: &str,
        value: &str,
        ttl: Option<Duration>,
    ) -> Result<bool, CrawlError> {
        let entry = ValueEntry {
            value: value.to_string(),
            expires_at: ttl.map(|t| Instant::now() + t),
        };
        match self.values.entry(key.to_string()) {
            Entry::Occupied(mut occupied) => {
                if occupied.get().live() {
                    Ok(false)
                } else {
                    occupied.insert(entry);
                    Ok(true)
                }
            }
            Entry::Vacant(vacant) => {
                vacant.insert(entry);
                Ok(true)
            }
        }
    }

    async fn compare_and_swap(
        &self,
        key: &str,
        expected: Option<&str>,
        value: &str,
    ) -> Result<bool, CrawlError> {
        match self.values.entry(key.to_string()) {
            Entry::Occupied(mut occupied) => {
                let current = occupied.get();
                let live_value = current.live().then(|| current.value.as_str());
                if live_value == expected {
                    let expires_at = if current.live() {
                        current.expires_at
                    } else {
                        None
                    };
                    occupied.insert(ValueEntry {
                        value: value.to_string(),
                        expires_at,
                    });
                    Ok(true)
                } else {
                    Ok(false)
                }
            }
            Entry::Vacant(vacant) => {
                if expected.is_none() {
                    vacant.insert(ValueEntry {
                        value: value.to_string(),
                        expires_at: None,
                    });
                    Ok(true)
                } else {
                    Ok(false)
                }
            }
        }
    }

    async fn delete(&self, key: &str) -> Result<bool, CrawlError> {
        Ok(self.values.remove(key).is_some())
    }

    async fn delete_if_equals(&self, key: &str, expected: &str) -> Result<bool, CrawlError> {
        match self.values.entry(key.to_string()) {
            Entry::Occupied(occupied) => {
                if occupied.get().live() && occupied.get().value == expected {
                    occupied.remove();
                    Ok(true)
                } else {
                    Ok(false)
                }
            }
            Entry::Vacant(_) => Ok(false),
        }
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<bool, CrawlError> {
        match self.values.get_mut(key) {
            Some(mut entry) if entry.live() => {
                entry.expires_at = Some(Instant::now() + ttl);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn incr_by_f64(&self, key: &str, delta: f64) -> Result<f64, CrawlError> {
        match self.values.entry(key.to_string()) {
            Entry::Occupied(mut occupied) => {
                let current = if occupied.get().live() {
                    occupied.get().value.parse::<f64>().unwrap_or(0.0)
                } else {
                    0.0
                };
                let next = current + delta;
                occupied.insert(ValueEntry {
                    value: next.to_string(),
                    expires_at: None,
                });
                Ok(next)
            }
            Entry::Vacant(vacant) => {
                vacant.insert(ValueEntry {
                    value: delta.to_string(),
                    expires_at: None,
                });
                Ok(delta)
            }
        }
    }

    async fn scan_prefix(&self, prefix: &str) -> Result<Vec<(String, String)>, CrawlError> {
        let mut out: Vec<(String, String)> = self
            .values
            .iter()
            .filter(|e| e.key().starts_with(prefix) && e.value().live())
            .map(|e| (e.key().clone(), e.value().value.clone()))
            .collect();
        out.sort_by(|a, b| a.0.cmp(&b.0));
        Ok(out)
    }

    async fn zadd(&self, key: &str, member: &str, score: f64) -> Result<(), CrawlError> {
        self.with_zset(key, |set| {
            set.push(member.to_string(), Score(score));
        })
    }

    async fn zpop_max(&self, key: &str, n: usize) -> Result<Vec<(String, f64)>, CrawlError> {
        self.with_zset(key, |set| {
            let mut out = Vec::with_capacity(n.min(set.len()));
            for _ in 0..n {
                match set.pop() {
                    Some((member, score)) => out.push((member, score.0)),
                    None => break,
                }
            }
            out
        })
    }

    async fn zrem(&self, key: &str, member: &str) -> Result<bool, CrawlError> {
        self.with_zset(key, |set| set.remove(member).is_some())
    }

    async fn zcard(&self, key: &str) -> Result<usize, CrawlError> {
        self.with_zset(key, |set| set.len())
    }

    async fn zscan(&self, key: &str) -> Result<Vec<(String, f64)>, CrawlError> {
        self.with_zset(key, |set| {
            set.iter().map(|(m, s)| (m.clone(), s.0)).collect()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn cas_respects_expected_value() {
        let kv = MemoryKv::new();
        assert!(kv.compare_and_swap("k", None, "a").await.unwrap());
        assert!(!kv.compare_and_swap("k", None, "b").await.unwrap());
        assert!(!kv.compare_and_swap("k", Some("x"), "b").await.unwrap());
        assert!(kv.compare_and_swap("k", Some("a"), "b").await.unwrap());
        assert_eq!(kv.get("k").await.unwrap().as_deref(), Some("b"));
    }

    #[tokio::test]
    async fn ttl_expiry_makes_keys_vanish() {
        let kv = MemoryKv::new();
        kv.set_with_ttl("k", "v", Duration::from_millis(10))
            .await
            .unwrap();
        assert!(kv.get("k").await.unwrap().is_some());
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(kv.get("k").await.unwrap().is_none());
        // expired slot can be re-claimed by set_if_absent
        assert!(kv.set_if_absent("k", "w", None).await.unwrap());
    }

    #[tokio::test]
    async fn sorted_set_pops_highest_first() {
        let kv = MemoryKv::new();
        kv.zadd("f", "low", 1.0).await.unwrap();
        kv.zadd("f", "high", 9.0).await.unwrap();
        kv.zadd("f", "mid", 5.0).await.unwrap();
        let popped = kv.zpop_max("f", 2).await.unwrap();
        assert_eq!(popped[0].0, "high");
        assert_eq!(popped[1].0, "mid");
        assert_eq!(kv.zcard("f").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn zadd_updates_score_in_place() {
        let kv = MemoryKv::new();
        kv.zadd("f", "a", 1.0).await.unwrap();
        kv.zadd("f", "a", 7.0).await.unwrap();
        assert_eq!(kv.zcard("f").await.unwrap(), 1);
        let (member, score) = kv.zpop_max("f", 1).await.unwrap().remove(0);
        assert_eq!(member, "a");
        assert_eq!(score, 7.0);
    }

    #[tokio::test]
    async fn incr_accumulates() {
        let kv = MemoryKv::new();
        assert_eq!(kv.incr_by_f64("cash", 1.0).await.unwrap(), 1.0);
        assert_eq!(kv.incr_by_f64("cash", 0.5).await.unwrap(), 1.5);
    }

    #[tokio::test]
    async fn scan_prefix_is_ordered() {
        let kv = MemoryKv::new();
        kv.set("visited:b", "1").await.unwrap();
        kv.set("visited:a", "1").await.unwrap();
        kv.set("other:c", "1").await.unwrap();
        let hits = kv.scan_prefix("visited:").await.unwrap();
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].0, "visited:a");
    }
}
