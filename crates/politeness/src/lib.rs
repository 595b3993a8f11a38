//! Per-domain politeness: robots.txt rules, a token bucket, a circuit
//! breaker and a concurrency cap. A fetch goes out only when every
//! sub-contract admits it.

pub mod breaker;
pub mod bucket;
pub mod clock;
pub mod robots;

use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use searchlight_core::config::PolitenessConfig;
use searchlight_core::CrawlError;
use searchlight_kv::KvStore;

pub use breaker::{BreakerSnapshot, CircuitBreaker, CircuitState};
pub use bucket::{Admission, TokenBucket};
pub use clock::{Clock, ManualClock, SystemClock};
pub use robots::{RobotsCache, RobotsRules};

/// Outcome of asking for permission to schedule a fetch against a domain.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum FetchAdmission {
    Granted,
    /// Not now; try again after the hint.
    Wait { hint_ms: u64 },
    /// The domain's breaker is open.
    CircuitOpen,
}

pub struct PolitenessGovernor {
    bucket: TokenBucket,
    breaker: CircuitBreaker,
    semaphores: DashMap<String, Arc<Semaphore>>,
    max_concurrent: usize,
}

impl PolitenessGovernor {
    pub fn new(kv: Arc<dyn KvStore>, config: &PolitenessConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            bucket: TokenBucket::new(
                kv.clone(),
                config.bucket_capacity,
                config.refill_per_second,
                clock.clone(),
            ),
            breaker: CircuitBreaker::new(
                kv,
                config.breaker_failure_threshold,
                config.breaker_success_threshold,
                config.breaker_cooldown_seconds * 1000,
                clock,
            ),
            semaphores: DashMap::new(),
            max_concurrent: config.max_concurrent_per_domain as usize,
        }
    }

    /// Scheduler-side admission: breaker first, then a token. The
    /// concurrency cap is enforced where the fetch actually runs, via
    /// [`PolitenessGovernor::fetch_permit`].
    pub async fn admit(&self, domain: &str) -> Result<FetchAdmission, CrawlError> {
        if !self.breaker.allow(domain).await? {
            return Ok(FetchAdmission::CircuitOpen);
        }
        match self.bucket.try_acquire(domain, 1.0).await? {
            Admission::Granted => Ok(FetchAdmission::Granted),
            Admission::Wait { hint_ms } => Ok(FetchAdmission::Wait { hint_ms }),
        }
    }

    fn semaphore(&self, domain: &str) -> Arc<Semaphore> {
        self.semaphores
            .entry(domain.to_string())
            .or_insert_with(|| Arc::new(Semaphore::new(self.max_concurrent)))
            .clone()
    }

    /// Held for the duration of an in-flight fetch; at most
    /// `max_concurrent_per_domain` exist per domain at any moment.
    pub async fn fetch_permit(&self, domain: &str) -> Result<OwnedSemaphorePermit, CrawlError> {
        self.semaphore(domain)
            .acquire_owned()
            .await
            .map_err(|_| CrawlError::Network("semaphore closed".into()))
    }

    pub async fn record_success(&self, domain: &str) -> Result<(), CrawlError> {
        self.breaker.record_success(domain).await
    }

    pub async fn record_failure(&self, domain: &str) -> Result<(), CrawlError> {
        self.breaker.record_failure(domain).await
    }

    pub async fn breaker_snapshot(&self, domain: &str) -> Result<BreakerSnapshot, CrawlError> {
        self.breaker.snapshot(domain).await
    }

    /// Current token count and the wait hint a single-token request would
    /// get right now; the admin rate-limit endpoint reads this.
    pub async fn bucket_status(&self, domain: &str) -> Result<(f64, u64), CrawlError> {
        self.bucket.status(domain).await
    }

    /// Admin reset: forget bucket and breaker state for a domain.
    pub async fn reset(&self, domain: &str) -> Result<(), CrawlError> {
        self.bucket.reset(domain).await?;
        self.breaker.reset(domain).await?;
        self.semaphores.remove(domain);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use searchlight_kv::MemoryKv;

    fn governor(clock: Arc<dyn Clock>) -> PolitenessGovernor {
        let config = PolitenessConfig::default();
        PolitenessGovernor::new(Arc::new(MemoryKv::new()), &config, clock)
    }

    #[tokio::test]
    async fn grants_until_bucket_dry_then_hints() {
        let clock = Arc::new(ManualClock::new(1_000_000));
        let gov = governor(clock.clone());
        for _ in 0..10 {
            assert_eq!(gov.admit("example.com").await.unwrap(), FetchAdmission::Granted);
        }
        match gov.admit("example.com").await.unwrap() {
            FetchAdmission::Wait { hint_ms } => assert!(hint_ms > 0 && hint_ms <= 1000),
            other => panic!("expected wait, got {other:?}"),
        }
        // a second later one token has refilled
        clock.advance(1000);
        assert_eq!(gov.admit("example.com").await.unwrap(), FetchAdmission::Granted);
    }

    #[tokio::test]
    async fn open_breaker_blocks_admission() {
        let clock = Arc::new(ManualClock::new(1_000_000));
        let gov = governor(clock.clone());
        for _ in 0..5 {
            gov.record_failure("bad.test").await.unwrap();
        }
        assert_eq!(gov.admit("bad.test").await.unwrap(), FetchAdmission::CircuitOpen);
        // unaffected domain still admitted
        assert_eq!(gov.admit("good.test").await.unwrap(), FetchAdmission::Granted);
    }

    #[tokio::test]
    async fn concurrency_cap_limits_permits() {
        let clock = Arc::new(ManualClock::new(0));
        let gov = governor(clock);
        let mut permits = Vec::new();
        for _ in 0..5 {
            permits.push(gov.fetch_permit("example.com").await.unwrap());
        }
        // sixth would block; prove it by polling with a timeout
        let blocked = tokio::time::timeout(
            std::time::Duration::from_millis(20),
            gov.fetch_permit("example.com"),
        )
        .await;
        assert!(blocked.is_err());
        drop(permits);
        assert!(gov.fetch_permit("example.com").await.is_ok());
    }
}
