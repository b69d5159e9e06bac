use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::Instant;

/// Enforces a minimum spacing between outbound requests, derived from a
/// requests-per-minute budget.
///
/// Owns the crawler's single piece of shared mutable state: the time of the
/// last request. The crawl itself is sequential, so the mutex is uncontended;
/// it exists so the client stays `Send + Sync` and a future parallel-view
/// port can share one limiter instance across tasks.
pub struct RateLimiter {
    min_interval: Duration,
    last: Mutex<Option<Instant>>,
}

impl RateLimiter {
    pub fn new(requests_per_minute: u32) -> Self {
        let rpm = requests_per_minute.max(1);
        Self {
            min_interval: Duration::from_secs_f64(60.0 / rpm as f64),
            last: Mutex::new(None),
        }
    }

    /// Sleep until the minimum interval since the previous request has
    /// elapsed, then claim the current slot.
    pub async fn wait_turn(&self) {
        let mut last = self.last.lock().await;
        if let Some(prev) = *last {
            let elapsed = prev.elapsed();
            if elapsed < self.min_interval {
                tokio::time::sleep(self.min_interval - elapsed).await;
            }
        }
        *last = Some(Instant::now());
    }
}
