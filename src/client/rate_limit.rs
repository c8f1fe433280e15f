use log::info;
use std::collections::VecDeque;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;

/// Allows at most `max_calls` acquisitions in any rolling window of length `period`.
///
/// Callers that would exceed the budget are put to sleep until the oldest call in the
/// window ages out.
pub struct RateLimiter {
    max_calls: usize,
    period: Duration,
    calls: Mutex<VecDeque<Instant>>,
}

impl RateLimiter {
    pub fn new(max_calls: usize, period: Duration) -> Self {
        Self {
            max_calls: max_calls.max(1),
            period,
            calls: Mutex::new(VecDeque::with_capacity(max_calls)),
        }
    }

    pub async fn acquire(&self) {
        let mut calls = self.calls.lock().await;

        if calls.len() >= self.max_calls {
            if let Some(oldest) = calls.pop_front() {
                let ready_at = oldest + self.period;
                if ready_at > Instant::now() {
                    info!(
                        "Rate limit of {} requests per {:?} reached, waiting {:?}",
                        self.max_calls,
                        self.period,
                        ready_at - Instant::now()
                    );
                    tokio::time::sleep_until(ready_at).await;
                }
            }
        }

        calls.push_back(Instant::now());
    }
}

impl Default for RateLimiter {
    /// Dark Sky's budget: 800 requests per minute.
    fn default() -> Self {
        Self::new(800, Duration::from_secs(60))
    }
}
