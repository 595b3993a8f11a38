use serde::Deserialize;

#[derive(Debug, Deserialize, Clone, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub general: GeneralConfig,
    #[serde(default)]
    pub crawler: CrawlerConfig,
    #[serde(default)]
    pub politeness: PolitenessConfig,
    #[serde(default)]
    pub frontier: FrontierConfig,
    #[serde(default)]
    pub dedup: DedupConfig,
    #[serde(default)]
    pub indexing: IndexingConfig,
    #[serde(default)]
    pub query: QueryConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct GeneralConfig {
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
    #[serde(default = "default_max_depth")]
    pub max_depth: u32,
    #[serde(default = "default_data_dir")]
    pub data_dir: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct CrawlerConfig {
    #[serde(default = "default_tick_seconds")]
    pub scheduler_tick_seconds: u64,
    #[serde(default = "default_schedule_batch")]
    pub schedule_batch_size: usize,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_fetch_timeout")]
    pub fetch_timeout_seconds: u64,
    #[serde(default = "default_max_redirects")]
    pub max_redirects: u32,
    #[serde(default = "default_max_body_mb")]
    pub max_body_size_mb: usize,
    #[serde(default = "default_fetch_workers_min")]
    pub fetch_workers_min: usize,
    #[serde(default = "default_fetch_workers_max")]
    pub fetch_workers_max: usize,
    #[serde(default = "default_retry_scan_seconds")]
    pub retry_scan_seconds: u64,
    #[serde(default = "default_reaper_minutes")]
    pub stale_in_progress_minutes: i64,
    #[serde(default = "default_max_links_per_page")]
    pub max_links_per_page: usize,
}

#[derive(Debug, Deserialize, Clone)]
pub struct PolitenessConfig {
    #[serde(default = "default_bucket_capacity")]
    pub bucket_capacity: f64,
    #[serde(default = "default_refill_per_second")]
    pub refill_per_second: f64,
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent_per_domain: u32,
    #[serde(default = "default_failure_threshold")]
    pub breaker_failure_threshold: u32,
    #[serde(default = "default_success_threshold")]
    pub breaker_success_threshold: u32,
    #[serde(default = "default_cooldown_seconds")]
    pub breaker_cooldown_seconds: u64,
    #[serde(default = "default_robots_ttl_hours")]
    pub robots_ttl_hours: u64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct FrontierConfig {
    #[serde(default = "default_strategy")]
    pub strategy: String,
    #[serde(default = "default_bloom_capacity")]
    pub bloom_capacity: usize,
    #[serde(default = "default_bloom_fp")]
    pub bloom_fp_rate: f64,
    #[serde(default = "default_bloom_persist_seconds")]
    pub bloom_persist_seconds: u64,
    #[serde(default)]
    pub focus_keywords: Vec<String>,
    #[serde(default)]
    pub focus_whitelist: Vec<String>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DedupConfig {
    #[serde(default = "default_hamming")]
    pub max_hamming_distance: u32,
    #[serde(default = "default_on_duplicate")]
    pub on_duplicate: String,
    #[serde(default = "default_fingerprint_ttl_days")]
    pub fingerprint_ttl_days: u64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct IndexingConfig {
    #[serde(default = "default_snippet_len")]
    pub snippet_max_chars: usize,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: usize,
    #[serde(default = "default_tokenize_input_kib")]
    pub tokenize_input_kib: usize,
    #[serde(default = "default_body_cap_kib")]
    pub body_cap_kib: usize,
}

#[derive(Debug, Deserialize, Clone)]
pub struct QueryConfig {
    #[serde(default = "default_cache_minutes")]
    pub cache_ttl_minutes: u64,
    #[serde(default = "default_page_size")]
    pub default_page_size: usize,
    #[serde(default = "default_max_page_size")]
    pub max_page_size: usize,
    #[serde(default = "default_domain_cap")]
    pub per_domain_cap: usize,
}

/// Endpoints come from the environment rather than the config file, so the
/// same image runs against different backends.
#[derive(Debug, Clone)]
pub struct Endpoints {
    pub kv_url: Option<String>,
    pub bus_url: Option<String>,
    pub database_url: Option<String>,
    pub index_dir: Option<String>,
}

impl Endpoints {
    pub fn from_env() -> Self {
        Self {
            kv_url: std::env::var("SEARCHLIGHT_KV_URL").ok(),
            bus_url: std::env::var("SEARCHLIGHT_BUS_URL").ok(),
            database_url: std::env::var("SEARCHLIGHT_DATABASE_URL").ok(),
            index_dir: std::env::var("SEARCHLIGHT_INDEX_DIR").ok(),
        }
    }
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            user_agent: default_user_agent(),
            max_depth: default_max_depth(),
            data_dir: default_data_dir(),
        }
    }
}

impl Default for CrawlerConfig {
    fn default() -> Self {
        Self {
            scheduler_tick_seconds: default_tick_seconds(),
            schedule_batch_size: default_schedule_batch(),
            max_retries: default_max_retries(),
            fetch_timeout_seconds: default_fetch_timeout(),
            max_redirects: default_max_redirects(),
            max_body_size_mb: default_max_body_mb(),
            fetch_workers_min: default_fetch_workers_min(),
            fetch_workers_max: default_fetch_workers_max(),
            retry_scan_seconds: default_retry_scan_seconds(),
            stale_in_progress_minutes: default_reaper_minutes(),
            max_links_per_page: default_max_links_per_page(),
        }
    }
}

impl Default for PolitenessConfig {
    fn default() -> Self {
        Self {
            bucket_capacity: default_bucket_capacity(),
            refill_per_second: default_refill_per_second(),
            max_concurrent_per_domain: default_max_concurrent(),
            breaker_failure_threshold: default_failure_threshold(),
            breaker_success_threshold: default_success_threshold(),
            breaker_cooldown_seconds: default_cooldown_seconds(),
            robots_ttl_hours: default_robots_ttl_hours(),
        }
    }
}

impl Default for FrontierConfig {
    fn default() -> Self {
        Self {
            strategy: default_strategy(),
            bloom_capacity: default_bloom_capacity(),
            bloom_fp_rate: default_bloom_fp(),
            bloom_persist_seconds: default_bloom_persist_seconds(),
            focus_keywords: Vec::new(),
            focus_whitelist: Vec::new(),
        }
    }
}

impl Default for DedupConfig {
    fn default() -> Self {
        Self {
            max_hamming_distance: default_hamming(),
            on_duplicate: default_on_duplicate(),
            fingerprint_ttl_days: default_fingerprint_ttl_days(),
        }
    }
}

impl Default for IndexingConfig {
    fn default() -> Self {
        Self {
            snippet_max_chars: default_snippet_len(),
            max_tokens: default_max_tokens(),
            tokenize_input_kib: default_tokenize_input_kib(),
            body_cap_kib: default_body_cap_kib(),
        }
    }
}

impl Default for QueryConfig {
    fn default() -> Self {
        Self {
            cache_ttl_minutes: default_cache_minutes(),
            default_page_size: default_page_size(),
            max_page_size: default_max_page_size(),
            per_domain_cap: default_domain_cap(),
        }
    }
}

fn default_user_agent() -> String {
    "SearchlightBot".to_string()
}
fn default_max_depth() -> u32 {
    10
}
fn default_data_dir() -> String {
    "data".to_string()
}
fn default_tick_seconds() -> u64 {
    10
}
fn default_schedule_batch() -> usize {
    100
}
fn default_max_retries() -> u32 {
    3
}
fn default_fetch_timeout() -> u64 {
    15
}
fn default_max_redirects() -> u32 {
    5
}
fn default_max_body_mb() -> usize {
    5
}
fn default_fetch_workers_min() -> usize {
    20
}
fn default_fetch_workers_max() -> usize {
    100
}
fn default_retry_scan_seconds() -> u64 {
    3600
}
fn default_reaper_minutes() -> i64 {
    30
}
fn default_max_links_per_page() -> usize {
    50
}
fn default_bucket_capacity() -> f64 {
    10.0
}
fn default_refill_per_second() -> f64 {
    1.0
}
fn default_max_concurrent() -> u32 {
    5
}
fn default_failure_threshold() -> u32 {
    5
}
fn default_success_threshold() -> u32 {
    3
}
fn default_cooldown_seconds() -> u64 {
    60
}
fn default_robots_ttl_hours() -> u64 {
    24
}
fn default_strategy() -> String {
    "bfs".to_string()
}
fn default_bloom_capacity() -> usize {
    10_000_000
}
fn default_bloom_fp() -> f64 {
    0.01
}
fn default_bloom_persist_seconds() -> u64 {
    300
}
fn default_hamming() -> u32 {
    3
}
fn default_on_duplicate() -> String {
    "reject".to_string()
}
fn default_fingerprint_ttl_days() -> u64 {
    30
}
fn default_snippet_len() -> usize {
    200
}
fn default_max_tokens() -> usize {
    10_000
}
fn default_tokenize_input_kib() -> usize {
    50
}
fn default_body_cap_kib() -> usize {
    100
}
fn default_cache_minutes() -> u64 {
    30
}
fn default_page_size() -> usize {
    10
}
fn default_max_page_size() -> usize {
    50
}
fn default_domain_cap() -> usize {
    3
}
