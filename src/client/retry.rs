//! Exponential backoff around a fallible async request.
//!
//! The delay before retry `n` (1-based) is `factor * 2^(n - 1)`, so the default
//! policy waits 3s, 6s, 12s, ... between its seven attempts.

use crate::client::error::DarkskyError;
use log::{error, warn};
use std::future::Future;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Backoff {
    /// Total number of attempts, including the first one.
    pub max_tries: u32,
    /// Multiplier applied to the exponential series.
    pub factor: Duration,
}

impl Backoff {
    pub const fn new(max_tries: u32, factor: Duration) -> Self {
        Self { max_tries, factor }
    }

    pub fn delay(&self, retry: u32) -> Duration {
        let exponent = retry.saturating_sub(1).min(16);
        self.factor.saturating_mul(1u32 << exponent)
    }
}

impl Default for Backoff {
    fn default() -> Self {
        Self::new(7, Duration::from_secs(3))
    }
}

/// Runs `operation` until it succeeds, fails with an error `should_retry` rejects,
/// or the policy runs out of attempts. The last error is returned in the latter case.
pub async fn with_backoff<T, F, Fut, P>(
    backoff: &Backoff,
    should_retry: P,
    mut operation: F,
) -> Result<T, DarkskyError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, DarkskyError>>,
    P: Fn(&DarkskyError) -> bool,
{
    let max_tries = backoff.max_tries.max(1);
    let mut attempt = 1;
    loop {
        match operation().await {
            Ok(value) => return Ok(value),
            Err(e) if should_retry(&e) && attempt < max_tries => {
                let delay = backoff.delay(attempt);
                warn!(
                    "Attempt {}/{} failed: {}. Retrying in {:?}",
                    attempt, max_tries, e, delay
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(e) => {
                if should_retry(&e) {
                    error!("Giving up after {} attempts: {}", attempt, e);
                }
                return Err(e);
            }
        }
    }
}
