//! Generic resilience wrapper for outbound HTTP calls: a token-bucket rate
//! limiter plus a circuit breaker plus retry-with-jittered-backoff, shared
//! by every probe/scanner that talks to an external service over HTTP
//! (VirusTotal in particular — see `crate::vt`).

pub mod circuit_breaker;
pub mod rate_limiter;

pub use circuit_breaker::{CircuitBreaker, CircuitState};
pub use rate_limiter::TokenBucket;

use rand::Rng;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

/// Tunables for a single outbound endpoint's resilience behavior.
#[derive(Debug, Clone)]
pub struct ResilienceConfig {
    pub timeout: Duration,
    pub max_retries: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
    pub circuit_breaker_threshold: u32,
    pub circuit_breaker_timeout: Duration,
    pub rate_limit_rps: u32,
    pub rate_limit_burst: u32,
}

impl Default for ResilienceConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            max_retries: 3,
            initial_backoff: Duration::from_millis(200),
            max_backoff: Duration::from_secs(10),
            circuit_breaker_threshold: 5,
            circuit_breaker_timeout: Duration::from_secs(60),
            rate_limit_rps: 4,
            rate_limit_burst: 8,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ResilientCallError {
    #[error("circuit breaker open")]
    CircuitOpen,
    #[error("rate limit exceeded")]
    RateLimitExceeded,
    #[error("request timed out")]
    Timeout,
    #[error("exhausted {0} retries")]
    MaxRetriesExceeded(u32),
    #[error("request error: {0}")]
    Request(#[from] reqwest::Error),
}

/// Wraps a `reqwest::Client` with the rate limiter / circuit breaker / retry
/// loop used by `enrich/resilient_client.rs` in the teacher, generalized so
/// any async call returning `Result<T, reqwest::Error>`-ish outcome can be
/// wrapped uniformly.
pub struct ResilientGate {
    config: ResilienceConfig,
    rate_limiter: Arc<Mutex<TokenBucket>>,
    circuit_breaker: Arc<Mutex<CircuitBreaker>>,
}

impl ResilientGate {
    pub fn new(config: ResilienceConfig) -> Self {
        let rate_limiter = TokenBucket::new(config.rate_limit_burst, config.rate_limit_rps);
        let circuit_breaker = CircuitBreaker::new(
            config.circuit_breaker_threshold,
            config.circuit_breaker_timeout,
        );
        Self {
            config,
            rate_limiter: Arc::new(Mutex::new(rate_limiter)),
            circuit_breaker: Arc::new(Mutex::new(circuit_breaker)),
        }
    }

    /// Run `attempt` under the gate, retrying on retryable errors with
    /// exponential backoff and jitter, up to `max_retries` times.
    pub async fn call<T, F, Fut>(&self, mut attempt: F) -> Result<T, ResilientCallError>
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = Result<T, reqwest::Error>>,
    {
        {
            let mut cb = self.circuit_breaker.lock().await;
            if !cb.can_attempt() {
                return Err(ResilientCallError::CircuitOpen);
            }
        }

        let mut backoff = self.config.initial_backoff;
        let mut last_err: Option<reqwest::Error> = None;

        for attempt_no in 0..=self.config.max_retries {
            {
                let mut bucket = self.rate_limiter.lock().await;
                if !bucket.try_acquire(1) {
                    return Err(ResilientCallError::RateLimitExceeded);
                }
            }

            match tokio::time::timeout(self.config.timeout, attempt()).await {
                Ok(Ok(value)) => {
                    self.circuit_breaker.lock().await.record_success();
                    return Ok(value);
                }
                Ok(Err(e)) => {
                    let retryable = is_retryable(&e);
                    last_err = Some(e);
                    if !retryable || attempt_no == self.config.max_retries {
                        self.circuit_breaker.lock().await.record_failure();
                        break;
                    }
                }
                Err(_elapsed) => {
                    self.circuit_breaker.lock().await.record_failure();
                    if attempt_no == self.config.max_retries {
                        return Err(ResilientCallError::Timeout);
                    }
                }
            }

            let jitter_ms = rand::thread_rng().gen_range(0..=50);
            tokio::time::sleep(backoff + Duration::from_millis(jitter_ms)).await;
            backoff = std::cmp::min(backoff * 2, self.config.max_backoff);
        }

        match last_err {
            Some(e) => Err(ResilientCallError::Request(e)),
            None => Err(ResilientCallError::MaxRetriesExceeded(self.config.max_retries)),
        }
    }
}

fn is_retryable(err: &reqwest::Error) -> bool {
    if err.is_timeout() || err.is_connect() {
        return true;
    }
    if let Some(status) = err.status() {
        return status.is_server_error() || status.as_u16() == 429 || status.as_u16() == 408;
    }
    false
}

#[cfg(test)]
#[cfg(feature = "unit-tests")]
mod tests {
    use super::*;

    #[tokio::test]
    async fn gate_returns_ok_without_retry_on_success() {
        let gate = ResilientGate::new(ResilienceConfig::default());
        let calls = std::sync::atomic::AtomicU32::new(0);
        let result: Result<u32, ResilientCallError> = gate
            .call(|| {
                calls.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
                async { Ok::<u32, reqwest::Error>(42) }
            })
            .await;
        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.load(std::sync::atomic::Ordering::SeqCst), 1);
    }
}
