use std::future::Future;
use std::time::Duration;

use rand::Rng;
use tracing::warn;

use crate::error::CrawlError;

/// Backoff schedule for in-band store retries: 100ms, 400ms, 1.6s, each with
/// up to 20% jitter.
const BASE_DELAY_MS: u64 = 100;
const BACKOFF_FACTOR: u64 = 4;
const JITTER_FRACTION: f64 = 0.2;

pub fn backoff_delay(attempt: u32) -> Duration {
    let base = BASE_DELAY_MS * BACKOFF_FACTOR.pow(attempt);
    let jitter = rand::thread_rng().gen_range(0.0..JITTER_FRACTION);
    Duration::from_millis((base as f64 * (1.0 + jitter)) as u64)
}

/// Run `op` up to `attempts` times, sleeping with exponential backoff between
/// failures. Only transient errors are retried; the final error is returned
/// unchanged so the caller can decide whether to ack.
pub async fn with_backoff<T, F, Fut>(
    what: &str,
    attempts: u32,
    mut op: F,
) -> Result<T, CrawlError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, CrawlError>>,
{
    let mut attempt = 0;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(err) if attempt + 1 < attempts && err.is_transient() => {
                let delay = backoff_delay(attempt);
                warn!(%what, attempt, delay_ms = delay.as_millis() as u64, "retrying: {err}");
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(err) => return Err(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test]
    async fn retries_transient_then_succeeds() {
        let calls = AtomicU32::new(0);
        let result = with_backoff("test", 3, || {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 2 {
                    Err(CrawlError::Store("down".into()))
                } else {
                    Ok(42)
                }
            }
        })
        .await;
        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn does_not_retry_terminal_errors() {
        let calls = AtomicU32::new(0);
        let result: Result<(), _> = with_backoff("test", 3, || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(CrawlError::InvalidUrl("x".into())) }
        })
        .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn delays_grow_exponentially() {
        assert!(backoff_delay(0) >= Duration::from_millis(100));
        assert!(backoff_delay(1) >= Duration::from_millis(400));
        assert!(backoff_delay(2) >= Duration::from_millis(1600));
        assert!(backoff_delay(2) < Duration::from_millis(2000));
    }
}
