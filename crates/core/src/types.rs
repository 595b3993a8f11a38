use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub const TOPIC_CRAWL_REQUESTS: &str = "crawl-requests";
pub const TOPIC_INDEX_REQUESTS: &str = "index-requests";
pub const TOPIC_LINK_DISCOVERIES: &str = "link-discoveries";
pub const TOPIC_CRAWL_DLQ: &str = "crawl-dlq";

/// Crawl lifecycle of a URL. Transitions form a DAG with a single retry
/// edge: Failed -> Pending while retry_count < max_retries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CrawlStatus {
    Pending,
    InProgress,
    Completed,
    Failed,
    Blocked,
}

impl CrawlStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CrawlStatus::Pending => "PENDING",
            CrawlStatus::InProgress => "IN_PROGRESS",
            CrawlStatus::Completed => "COMPLETED",
            CrawlStatus::Failed => "FAILED",
            CrawlStatus::Blocked => "BLOCKED",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "PENDING" => Some(CrawlStatus::Pending),
            "IN_PROGRESS" => Some(CrawlStatus::InProgress),
            "COMPLETED" => Some(CrawlStatus::Completed),
            "FAILED" => Some(CrawlStatus::Failed),
            "BLOCKED" => Some(CrawlStatus::Blocked),
            _ => None,
        }
    }
}

impl std::fmt::Display for CrawlStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One record per url_hash (SHA-256 of the normalized URL).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UrlRecord {
    pub url_hash: String,
    pub raw_url: String,
    pub url: String,
    pub domain: String,
    pub depth: u32,
    pub priority: f64,
    pub status: CrawlStatus,
    pub retry_count: u32,
    pub last_attempt_at: Option<DateTime<Utc>>,
    pub next_eligible_at: Option<DateTime<Utc>>,
    pub source_url: Option<String>,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl UrlRecord {
    pub fn new(
        raw_url: impl Into<String>,
        url: impl Into<String>,
        domain: impl Into<String>,
        depth: u32,
        priority: f64,
        source_url: Option<String>,
    ) -> Self {
        let url = url.into();
        Self {
            url_hash: crate::normalize::url_hash(&url),
            raw_url: raw_url.into(),
            url,
            domain: domain.into(),
            depth,
            priority,
            status: CrawlStatus::Pending,
            retry_count: 0,
            last_attempt_at: None,
            next_eligible_at: None,
            source_url,
            error: None,
            created_at: Utc::now(),
        }
    }
}

/// A link-graph edge. Immutable once inserted; multi-edges are collapsed
/// by (source, target).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EdgeRecord {
    pub source_url: String,
    pub target_url: String,
    pub anchor: Option<String>,
    pub first_seen: DateTime<Utc>,
}

/// Per-domain politeness settings and aggregate counters. Created on first
/// sighting, never destroyed. `blocked` is administrative; the circuit
/// breaker is tracked separately and both must allow a fetch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DomainRecord {
    pub domain: String,
    pub crawl_delay_ms: u64,
    pub max_concurrent: u32,
    pub blocked: bool,
    pub attempts: u64,
    pub successes: u64,
    pub failures: u64,
    pub last_crawled_at: Option<DateTime<Utc>>,
}

impl DomainRecord {
    pub fn new(domain: impl Into<String>) -> Self {
        Self {
            domain: domain.into(),
            crawl_delay_ms: 0,
            max_concurrent: 5,
            blocked: false,
            attempts: 0,
            successes: 0,
            failures: 0,
            last_crawled_at: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RankRecord {
    pub url: String,
    pub score: f64,
    pub inbound: u64,
    pub outbound: u64,
    pub calculated_at: DateTime<Utc>,
}

/// Document as stored in the inverted index.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredDocument {
    pub doc_id: String,
    pub url: String,
    pub title: String,
    pub snippet: String,
    pub content: String,
    pub tokens: Vec<String>,
    pub outbound_links: Vec<String>,
    pub domain: String,
    pub crawl_depth: u32,
    pub page_rank: f64,
    pub inbound_link_count: u64,
    pub last_crawled: DateTime<Utc>,
    pub last_indexed: DateTime<Utc>,
    pub content_length: u64,
    pub simhash: u64,
}

/// Payload of `crawl-requests` (key = domain).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FetchJob {
    pub url: String,
    pub domain: String,
    pub depth: u32,
    pub priority: f64,
    pub timestamp: DateTime<Utc>,
}

/// Payload of `index-requests` (key = url).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexJob {
    pub url: String,
    pub title: Option<String>,
    pub content: String,
    pub outbound_links: Vec<String>,
    pub domain: String,
    pub depth: u32,
    pub crawled_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiscoveredLink {
    pub url: String,
    pub anchor: Option<String>,
}

/// Payload of `link-discoveries` (key = source domain, so per-domain dedup
/// work lands on one consumer).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LinkDiscoveryBatch {
    pub urls: Vec<DiscoveredLink>,
    pub source_url: String,
    pub source_domain: String,
    pub source_depth: u32,
}

/// Payload of `crawl-dlq`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DlqEntry {
    pub url: String,
    pub domain: String,
    pub error: String,
    pub timestamp: DateTime<Utc>,
}
