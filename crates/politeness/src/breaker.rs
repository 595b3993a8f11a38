use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::info;

use searchlight_core::CrawlError;
use searchlight_kv::KvStore;

use crate::clock::Clock;

const CAS_ATTEMPTS: u32 = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BreakerSnapshot {
    pub state: CircuitState,
    pub consecutive_failures: u32,
    pub consecutive_successes: u32,
    pub opened_at_ms: i64,
}

impl BreakerSnapshot {
    fn closed() -> Self {
        Self {
            state: CircuitState::Closed,
            consecutive_failures: 0,
            consecutive_successes: 0,
            opened_at_ms: 0,
        }
    }
}

/// Per-domain circuit breaker stored under `circuit:<domain>`.
///
/// CLOSED -> OPEN after `failure_threshold` consecutive failures,
/// OPEN -> HALF_OPEN once the cooldown has elapsed (checked on the next
/// admission attempt), HALF_OPEN -> CLOSED after `success_threshold`
/// consecutive successes, HALF_OPEN -> OPEN on any failure. Transitions are
/// serialized per domain by compare-and-swap on the cell.
pub struct CircuitBreaker {
    kv: Arc<dyn KvStore>,
    failure_threshold: u32,
    success_threshold: u32,
    cooldown_ms: i64,
    clock: Arc<dyn Clock>,
}

impl CircuitBreaker {
    pub fn new(
        kv: Arc<dyn KvStore>,
        failure_threshold: u32,
        success_threshold: u32,
        cooldown_ms: u64,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            kv,
            failure_threshold: failure_threshold.max(1),
            success_threshold: success_threshold.max(1),
            cooldown_ms: cooldown_ms as i64,
            clock,
        }
    }

    fn key(domain: &str) -> String {
        format!("circuit:{domain}")
    }

    async fn load(&self, key: &str) -> Result<(Option<String>, BreakerSnapshot), CrawlError> {
        let raw = self.kv.get(key).await?;
        let cell = raw
            .as_deref()
            .and_then(|r| serde_json::from_str(r).ok())
            .unwrap_or_else(BreakerSnapshot::closed);
        Ok((raw, cell))
    }

    async fn store(
        &self,
        key: &str,
        prev_raw: Option<&str>,
        cell: &BreakerSnapshot,
    ) -> Result<bool, CrawlError> {
        let next = serde_json::to_string(cell)
            .map_err(|e| CrawlError::Store(format!("breaker cell encode: {e}")))?;
        self.kv.compare_and_swap(key, prev_raw, &next).await
    }

    /// Whether a fetch may go out. An OPEN breaker whose cooldown elapsed
    /// flips to HALF_OPEN here and admits the probe.
    pub async fn allow(&self, domain: &str) -> Result<bool, CrawlError> {
        let key = Self::key(domain);
        for _ in 0..CAS_ATTEMPTS {
            let (raw, cell) = self.load(&key).await?;
            match cell.state {
                CircuitState::Closed | CircuitState::HalfOpen => return Ok(true),
                CircuitState::Open => {
                    if self.clock.now_ms() - cell.opened_at_ms < self.cooldown_ms {
                        return Ok(false);
                    }
                    let probe = BreakerSnapshot {
                        state: CircuitState::HalfOpen,
                        consecutive_failures: 0,
                        consecutive_successes: 0,
                        opened_at_ms: cell.opened_at_ms,
                    };
                    if self.store(&key, raw.as_deref(), &probe).await? {
                        info!(domain, "circuit half-open, probing");
                        return Ok(true);
                    }
                }
            }
        }
        Ok(false)
    }

    pub async fn record_failure(&self, domain: &str) -> Result<(), CrawlError> {
        let key = Self::key(domain);
        for _ in 0..CAS_ATTEMPTS {
            let (raw, mut cell) = self.load(&key).await?;
            match cell.state {
                CircuitState::Closed => {
                    cell.consecutive_failures += 1;
                    cell.consecutive_successes = 0;
                    if cell.consecutive_failures >= self.failure_threshold {
                        cell.state = CircuitState::Open;
                        cell.opened_at_ms = self.clock.now_ms();
                        info!(domain, failures = cell.consecutive_failures, "circuit opened");
                    }
                }
                CircuitState::HalfOpen => {
                    cell.state = CircuitState::Open;
                    cell.opened_at_ms = self.clock.now_ms();
                    cell.consecutive_failures = 0;
                    cell.consecutive_successes = 0;
                    info!(domain, "probe failed, circuit re-opened");
                }
                CircuitState::Open => return Ok(()),
            }
            if self.store(&key, raw.as_deref(), &cell).await? {
                return Ok(());
            }
        }
        Err(CrawlError::Store(format!(
            "breaker cell for {domain} contended"
        )))
    }

    pub async fn record_success(&self, domain: &str) -> Result<(), CrawlError> {
        let key = Self::key(domain);
        for _ in 0..CAS_ATTEMPTS {
            let (raw, mut cell) = self.load(&key).await?;
            match cell.state {
                CircuitState::Closed => {
                    if cell.consecutive_failures == 0 {
                        return Ok(());
                    }
                    cell.consecutive_failures = 0;
                }
                CircuitState::HalfOpen => {
                    cell.consecutive_successes += 1;
                    if cell.consecutive_successes >= self.success_threshold {
                        cell = BreakerSnapshot::closed();
                        info!(domain, "circuit closed");
                    }
                }
                // success report racing an open breaker; stale, ignore
                CircuitState::Open => return Ok(()),
            }
            if self.store(&key, raw.as_deref(), &cell).await? {
                return Ok(());
            }
        }
        Err(CrawlError::Store(format!(
            "breaker cell for {domain} contended"
        )))
    }

    pub async fn snapshot(&self, domain: &str) -> Result<BreakerSnapshot, CrawlError> {
        Ok(self.load(&Self::key(domain)).await?.1)
    }

    pub async fn reset(&self, domain: &str) -> Result<(), CrawlError> {
        self.kv.delete(&Self::key(domain)).await?;
        Ok(())
    }
}
