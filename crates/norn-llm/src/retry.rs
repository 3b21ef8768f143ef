//! Retry policy with deterministic exponential backoff.
//!
//! The delay for attempt `i` is `min(cap, base * 2^i + jitter(i))`. The
//! jitter term is a pure function of the policy seed and the attempt index,
//! so a policy computes the same schedule on every evaluation and tests can
//! assert on delays without touching a clock.

use std::time::Duration;

use async_trait::async_trait;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Mixing constant for deriving a per-attempt rng seed.
const ATTEMPT_SEED_MIX: u64 = 0x9e37_79b9_7f4a_7c15;

/// Bounded exponential backoff schedule for a retry loop.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total attempts, including the first. Values below 1 behave as 1.
    pub max_attempts: u32,

    /// Delay before the second attempt.
    pub base: Duration,

    /// Upper bound on any single delay.
    pub cap: Duration,

    /// Upper bound on the jitter term added to each delay.
    pub jitter: Duration,

    /// Seed for the deterministic jitter sequence.
    pub seed: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base: Duration::from_millis(500),
            cap: Duration::from_secs(30),
            jitter: Duration::from_millis(250),
            seed: 0,
        }
    }
}

impl RetryPolicy {
    /// Set the attempt budget.
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    /// Set the base delay.
    pub fn with_base(mut self, base: Duration) -> Self {
        self.base = base;
        self
    }

    /// Set the delay cap.
    pub fn with_cap(mut self, cap: Duration) -> Self {
        self.cap = cap;
        self
    }

    /// Set the jitter bound.
    pub fn with_jitter(mut self, jitter: Duration) -> Self {
        self.jitter = jitter;
        self
    }

    /// Seed the jitter sequence. Production callers pass entropy; tests pin
    /// a constant.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    /// Delay to sleep after failed attempt `attempt` (zero-based).
    pub fn delay(&self, attempt: u32) -> Duration {
        let exp = self
            .base
            .saturating_mul(2u32.saturating_pow(attempt.min(31)));
        exp.saturating_add(self.jitter_for(attempt)).min(self.cap)
    }

    fn jitter_for(&self, attempt: u32) -> Duration {
        let bound_ms = self.jitter.as_millis() as u64;
        if bound_ms == 0 {
            return Duration::ZERO;
        }

        let mut rng = StdRng::seed_from_u64(
            self.seed ^ u64::from(attempt).wrapping_mul(ATTEMPT_SEED_MIX),
        );
        Duration::from_millis(rng.random_range(0..=bound_ms))
    }
}

/// Sleep abstraction so retry loops are testable without real delays.
#[async_trait]
pub trait Sleeper: Send + Sync {
    async fn sleep(&self, duration: Duration);
}

/// Production sleeper backed by the tokio timer.
#[derive(Debug, Default, Clone, Copy)]
pub struct TokioSleeper;

#[async_trait]
impl Sleeper for TokioSleeper {
    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

/// Sleeper that records requested delays instead of waiting.
#[derive(Debug, Default)]
pub struct RecordingSleeper {
    delays: std::sync::Mutex<Vec<Duration>>,
}

impl RecordingSleeper {
    pub fn new() -> Self {
        Self::default()
    }

    /// Delays requested so far, in order.
    pub fn recorded(&self) -> Vec<Duration> {
        self.delays.lock().unwrap().clone()
    }
}

#[async_trait]
impl Sleeper for RecordingSleeper {
    async fn sleep(&self, duration: Duration) {
        self.delays.lock().unwrap().push(duration);
    }
}
