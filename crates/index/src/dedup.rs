use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::debug;

use searchlight_core::CrawlError;
use searchlight_kv::KvStore;

use crate::simhash::{hamming, SimHashTable};

const FINGERPRINT_PREFIX: &str = "simhash:";

/// What to do with the losing copy of a near-duplicate pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OnDuplicate {
    Reject,
    Merge,
}

impl OnDuplicate {
    pub fn parse(s: &str) -> Result<Self, CrawlError> {
        match s {
            "reject" => Ok(OnDuplicate::Reject),
            "merge" => Ok(OnDuplicate::Merge),
            other => Err(CrawlError::Config(format!("unknown dedup mode {other}"))),
        }
    }
}

/// Fingerprint record as stored under `simhash:<doc_id>`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FingerprintEntry {
    pub url: String,
    pub fingerprint: u64,
}

#[derive(Debug, Clone)]
pub struct DuplicateHit {
    pub doc_id: String,
    pub url: String,
    pub fingerprint: u64,
    pub distance: u32,
}

/// Fingerprint store and near-duplicate lookup. Entries expire after the
/// configured number of days so stale fingerprints stop vetoing fresh
/// content.
pub struct Deduplicator {
    kv: Arc<dyn KvStore>,
    max_distance: u32,
    ttl: Duration,
}

impl Deduplicator {
    pub fn new(kv: Arc<dyn KvStore>, max_distance: u32, ttl_days: u64) -> Self {
        Self {
            kv,
            max_distance,
            ttl: Duration::from_secs(ttl_days.max(1) * 24 * 3600),
        }
    }

    fn key(doc_id: &str) -> String {
        format!("{FINGERPRINT_PREFIX}{doc_id}")
    }

    pub async fn store(
        &self,
        doc_id: &str,
        url: &str,
        fingerprint: u64,
    ) -> Result<(), CrawlError> {
        let entry = FingerprintEntry {
            url: url.to_string(),
            fingerprint,
        };
        let encoded = serde_json::to_string(&entry)
            .map_err(|e| CrawlError::Store(format!("fingerprint encode: {e}")))?;
        self.kv.set_with_ttl(&Self::key(doc_id), &encoded, self.ttl).await
    }

    pub async fn remove(&self, doc_id: &str) -> Result<(), CrawlError> {
        self.kv.delete(&Self::key(doc_id)).await?;
        Ok(())
    }

    /// Closest stored fingerprint within the Hamming budget, excluding the
    /// document itself. Fingerprint 0 (too-short content) never matches.
    pub async fn find_duplicate(
        &self,
        fingerprint: u64,
        self_url: &str,
    ) -> Result<Option<DuplicateHit>, CrawlError> {
        if fingerprint == 0 {
            return Ok(None);
        }
        let entries = self.kv.scan_prefix(FINGERPRINT_PREFIX).await?;
        let mut best: Option<DuplicateHit> = None;
        for (key, raw) in entries {
            let Ok(entry) = serde_json::from_str::<FingerprintEntry>(&raw) else {
                continue;
            };
            if entry.url == self_url || entry.fingerprint == 0 {
                continue;
            }
            let distance = hamming(fingerprint, entry.fingerprint);
            if distance <= self.max_distance
                && best.as_ref().map(|b| distance < b.distance).unwrap_or(true)
            {
                best = Some(DuplicateHit {
                    doc_id: key.trim_start_matches(FINGERPRINT_PREFIX).to_string(),
                    url: entry.url,
                    fingerprint: entry.fingerprint,
                    distance,
                });
            }
        }
        if let Some(hit) = &best {
            debug!(url = %self_url, duplicate_of = %hit.url, distance = hit.distance, "near-duplicate");
        }
        Ok(best)
    }

    /// Batch sweep: group every stored fingerprint into near-duplicate
    /// clusters (connected components under Hamming <= max_distance).
    /// Returns groups of more than one document, each as (doc_id, url).
    pub async fn sweep(&self) -> Result<Vec<Vec<(String, String)>>, CrawlError> {
        let entries: Vec<(String, FingerprintEntry)> = self
            .kv
            .scan_prefix(FINGERPRINT_PREFIX)
            .await?
            .into_iter()
            .filter_map(|(key, raw)| {
                let entry = serde_json::from_str::<FingerprintEntry>(&raw).ok()?;
                Some((key.trim_start_matches(FINGERPRINT_PREFIX).to_string(), entry))
            })
            .filter(|(_, e)| e.fingerprint != 0)
            .collect();

        let mut table = SimHashTable::default();
        for (i, (_, entry)) in entries.iter().enumerate() {
            table.insert(entry.fingerprint, i);
        }

        let mut parent: Vec<usize> = (0..entries.len()).collect();
        fn find(parent: &mut Vec<usize>, i: usize) -> usize {
            if parent[i] != i {
                let root = find(parent, parent[i]);
                parent[i] = root;
            }
            parent[i]
        }
        for (i, (_, entry)) in entries.iter().enumerate() {
            for j in table.neighbors(entry.fingerprint, self.max_distance) {
                let (a, b) = (find(&mut parent, i), find(&mut parent, j));
                if a != b {
                    parent[a] = b;
                }
            }
        }

        let mut groups: std::collections::HashMap<usize, Vec<(String, String)>> =
            std::collections::HashMap::new();
        for (i, (doc_id, entry)) in entries.iter().enumerate() {
            let root = find(&mut parent, i);
            groups
                .entry(root)
                .or_default()
                .push((doc_id.clone(), entry.url.clone()));
        }
        Ok(groups.into_values().filter(|g| g.len() > 1).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use searchlight_kv::MemoryKv;

    fn dedup() -> Deduplicator {
        Deduplicator::new(Arc::new(MemoryKv::new()), 3, 30)
    }

    #[tokio::test]
    async fn finds_near_duplicates_excluding_self() {
        let d = dedup();
        d.store("a", "https://a.com/", 0b1111_0000).await.unwrap();
        d.store("b", "https://b.com/", 0b1111_0001).await.unwrap();

        // identical lookup for a's own url ignores a's entry
        let hit = d.find_duplicate(0b1111_0000, "https://a.com/").await.unwrap();
        assert_eq!(hit.unwrap().url, "https://b.com/");

        // far-away fingerprint finds nothing
        assert!(d
            .find_duplicate(u64::MAX, "https://c.com/")
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn zero_fingerprint_never_matches() {
        let d = dedup();
        d.store("a", "https://a.com/", 0).await.unwrap();
        assert!(d.find_duplicate(0, "https://b.com/").await.unwrap().is_none());
        assert!(d.find_duplicate(1, "https://b.com/").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn sweep_groups_connected_components() {
        let d = dedup();
        d.store("a", "https://a.com/", 0b0000_0000_1111).await.unwrap();
        d.store("b", "https://b.com/", 0b0000_0000_1110).await.unwrap();
        d.store("c", "https://c.com/", u64::MAX).await.unwrap();
        let groups = d.sweep().await.unwrap();
        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].len(), 2);
    }
}
