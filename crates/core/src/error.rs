use thiserror::Error;

#[derive(Error, Debug)]
pub enum CrawlError {
    #[error("network error: {0}")]
    Network(String),

    #[error("timeout after {0}s")]
    Timeout(u64),

    #[error("invalid URL: {0}")]
    InvalidUrl(String),

    #[error("parse error: {0}")]
    Parse(String),

    #[error("store error: {0}")]
    Store(String),

    #[error("bus error: {0}")]
    Bus(String),

    #[error("index error: {0}")]
    Index(String),

    #[error("config error: {0}")]
    Config(String),

    #[error("http status {0}")]
    HttpStatus(u16),

    #[error("lock held elsewhere: {0}")]
    LockContended(String),

    #[error("body too large: {size} bytes (max {max})")]
    BodyTooLarge { size: usize, max: usize },

    #[error("{0}")]
    Other(#[from] anyhow::Error),
}

impl CrawlError {
    /// Whether a failed fetch with this error should be retried later.
    /// DNS failures, timeouts, 5xx and 429 count as transient; other 4xx,
    /// robots denials and malformed input are terminal.
    pub fn is_transient(&self) -> bool {
        match self {
            CrawlError::Network(_) | CrawlError::Timeout(_) => true,
            CrawlError::HttpStatus(status) => *status == 429 || *status >= 500,
            CrawlError::Store(_) | CrawlError::Bus(_) | CrawlError::Index(_) => true,
            _ => false,
        }
    }
}
