// Retry control for the transport loop.
//
// The decision lives in a pure function over (status, headers, attempt) so
// the timing rules are testable without a network; the transport loop only
// sleeps for whatever duration comes back.

use std::time::Duration;

use reqwest::header::HeaderMap;

/// Standard header carrying a delta-seconds wait.
const RETRY_AFTER: &str = "retry-after";
/// Platform-specific header carrying an absolute unix reset time.
const RATE_LIMIT_RESET: &str = "x-ratelimit-reset";

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub backoff_seed: Duration,
    pub backoff_cap: Duration,
    /// Fixed cooldown for a 429 that carries no usable wait header.
    pub rate_limit_cooldown: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 8,
            backoff_seed: Duration::from_secs_f64(1.5),
            backoff_cap: Duration::from_secs(60),
            rate_limit_cooldown: Duration::from_secs(30),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryStep {
    Wait(Duration),
    GiveUp,
}

impl RetryPolicy {
    pub fn is_retryable(status: u16) -> bool {
        matches!(status, 429 | 502 | 503 | 504)
    }

    /// Exponential backoff for the given 0-based attempt, capped.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let secs = self.backoff_seed.as_secs_f64() * 2f64.powi(attempt.min(30) as i32);
        Duration::from_secs_f64(secs.min(self.backoff_cap.as_secs_f64()))
    }

    /// Decide how to handle a retryable status. `now_unix` is the current
    /// unix time in seconds, used against absolute reset headers.
    ///
    /// 429 prefers the server-directed wait (`Retry-After` delta, then the
    /// absolute rate-limit reset, then a fixed cooldown) and never retries
    /// immediately. 502/503/504 back off exponentially.
    pub fn decide(&self, status: u16, headers: &HeaderMap, attempt: u32, now_unix: f64) -> RetryStep {
        if attempt + 1 >= self.max_attempts {
            return RetryStep::GiveUp;
        }
        if status == 429 {
            if let Some(wait) = retry_after(headers) {
                return RetryStep::Wait(wait);
            }
            if let Some(wait) = reset_wait(headers, now_unix) {
                return RetryStep::Wait(wait);
            }
            return RetryStep::Wait(self.rate_limit_cooldown);
        }
        RetryStep::Wait(self.backoff(attempt))
    }

    /// Network-level failures use the same backoff schedule.
    pub fn on_network_error(&self, attempt: u32) -> RetryStep {
        if attempt + 1 >= self.max_attempts {
            return RetryStep::GiveUp;
        }
        RetryStep::Wait(self.backoff(attempt))
    }
}

/// `Retry-After: <seconds>`. The HTTP-date form is rare enough upstream that
/// it falls through to the reset header instead.
fn retry_after(headers: &HeaderMap) -> Option<Duration> {
    let raw = headers.get(RETRY_AFTER)?.to_str().ok()?;
    let secs: f64 = raw.trim().parse().ok()?;
    if secs < 0.0 {
        return None;
    }
    Some(Duration::from_secs_f64(secs))
}

/// `X-RateLimit-Reset: <unix seconds>`: wait until that absolute time,
/// never less than one second.
fn reset_wait(headers: &HeaderMap, now_unix: f64) -> Option<Duration> {
    let raw = headers.get(RATE_LIMIT_RESET)?.to_str().ok()?;
    let reset: f64 = raw.trim().parse().ok()?;
    Some(Duration::from_secs_f64((reset - now_unix).max(1.0)))
}
