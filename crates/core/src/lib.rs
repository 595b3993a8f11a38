pub mod config;
pub mod error;
pub mod normalize;
pub mod retry;
pub mod types;

pub use config::AppConfig;
pub use error::CrawlError;
pub use normalize::{canonicalize, url_hash, CanonicalUrl};
pub use types::*;
