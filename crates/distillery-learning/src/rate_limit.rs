//! Per-tenant token bucket for feedback submissions.
//!
//! Each tenant starts with `capacity` tokens, refilled continuously at
//! `capacity / window`. Buckets live in process memory; losing them only
//! resets everyone's allowance, so buckets that have refilled completely are
//! dropped whenever a new tenant arrives.

use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};
use std::time::{Duration, Instant};

use distillery_core::AppConfig;

const DEFAULT_CAPACITY: u32 = 10;
const DEFAULT_WINDOW_SECS: u64 = 60;

#[derive(Debug, Clone, Copy)]
struct Bucket {
    tokens: f64,
    refilled_at: Instant,
}

#[derive(Debug)]
pub struct FeedbackRateLimiter {
    capacity: u32,
    window: Duration,
    buckets: Mutex<HashMap<String, Bucket>>,
}

impl Default for FeedbackRateLimiter {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY, Duration::from_secs(DEFAULT_WINDOW_SECS))
    }
}

impl FeedbackRateLimiter {
    #[must_use]
    pub fn new(capacity: u32, window: Duration) -> Self {
        Self {
            capacity: capacity.max(1),
            window: if window.is_zero() {
                Duration::from_secs(DEFAULT_WINDOW_SECS)
            } else {
                window
            },
            buckets: Mutex::new(HashMap::new()),
        }
    }

    #[must_use]
    pub fn from_app_config(config: &AppConfig) -> Self {
        Self::new(
            config.feedback_rate_limit,
            Duration::from_secs(config.feedback_rate_window_secs),
        )
    }

    fn refill_per_sec(&self) -> f64 {
        f64::from(self.capacity) / self.window.as_secs_f64()
    }

    /// Take one token for `tenant_id`.
    ///
    /// # Errors
    ///
    /// Returns the wait until a token is available, in whole seconds (at least 1).
    pub fn check(&self, tenant_id: &str) -> Result<(), u64> {
        self.check_at(tenant_id, Instant::now())
    }

    /// [`check`](Self::check) against an explicit clock.
    ///
    /// # Errors
    ///
    /// See [`check`](Self::check).
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    pub fn check_at(&self, tenant_id: &str, now: Instant) -> Result<(), u64> {
        let capacity = f64::from(self.capacity);
        let rate = self.refill_per_sec();
        let mut buckets = self.buckets.lock().unwrap_or_else(PoisonError::into_inner);
        if !buckets.contains_key(tenant_id) {
            buckets.retain(|_, b| {
                let elapsed = now.saturating_duration_since(b.refilled_at).as_secs_f64();
                b.tokens + elapsed * rate < capacity
            });
        }
        let bucket = buckets.entry(tenant_id.to_string()).or_insert(Bucket {
            tokens: capacity,
            refilled_at: now,
        });

        let elapsed = now.saturating_duration_since(bucket.refilled_at).as_secs_f64();
        bucket.tokens = (bucket.tokens + elapsed * rate).min(capacity);
        bucket.refilled_at = bucket.refilled_at.max(now);

        if bucket.tokens >= 1.0 {
            bucket.tokens -= 1.0;
            return Ok(());
        }

        let wait_secs = ((1.0 - bucket.tokens) * self.window.as_secs_f64() / capacity)
            .ceil()
            .max(1.0);
        let retry_after = (wait_secs as u64).min(self.window.as_secs().max(1));
        tracing::warn!(tenant_id, retry_after, "feedback rate limit exceeded");
        Err(retry_after)
    }

    /// Forget every bucket.
    pub fn reset(&self) {
        self.buckets
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }
}
