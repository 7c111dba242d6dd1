//! Backoff strategies for calculating retry delays.
//!
//! A strategy maps a 1-based attempt index to a non-negative wait duration.
//! All strategies are cheap to clone and safe to share between threads;
//! [`BackoffStrategy::Jittered`] draws its random factor from the calling
//! thread's generator.

use std::time::Duration;

use rand::Rng;

/// Default multiplier for exponential growth.
pub const DEFAULT_MULTIPLIER: f64 = 2.0;

/// Default cap applied to computed delays.
pub const DEFAULT_MAX_DELAY: Duration = Duration::from_secs(60);

/// Default jitter factor for [`BackoffStrategy::Jittered`].
pub const DEFAULT_JITTER_FACTOR: f64 = 0.1;

/// Backoff strategy for calculating retry delays.
#[derive(Debug, Clone, PartialEq)]
pub enum BackoffStrategy {
    /// Fixed delay between retries.
    Fixed { delay: Duration },
    /// Linear backoff: `attempt * increment`, capped at `max_delay`.
    Linear { increment: Duration, max_delay: Duration },
    /// Exponential backoff: `initial_delay * multiplier^(attempt - 1)`,
    /// capped at `max_delay`.
    Exponential { initial_delay: Duration, multiplier: f64, max_delay: Duration },
    /// Exponential backoff with a uniform random factor drawn from
    /// `[1 - jitter_factor, 1 + jitter_factor]`, clamped at zero.
    Jittered {
        initial_delay: Duration,
        multiplier: f64,
        max_delay: Duration,
        jitter_factor: f64,
    },
}

impl Default for BackoffStrategy {
    /// Exponential backoff starting at 100 ms, doubling, capped at 60 s.
    fn default() -> Self {
        BackoffStrategy::exponential(Duration::from_millis(100), DEFAULT_MULTIPLIER, DEFAULT_MAX_DELAY)
    }
}

impl BackoffStrategy {
    /// Fixed delay for every retry.
    pub fn fixed(delay: Duration) -> Self {
        BackoffStrategy::Fixed { delay }
    }

    /// Linear backoff with the given increment, capped at `max_delay`.
    pub fn linear(increment: Duration, max_delay: Duration) -> Self {
        BackoffStrategy::Linear { increment, max_delay }
    }

    /// Exponential backoff with an explicit multiplier and cap.
    pub fn exponential(initial_delay: Duration, multiplier: f64, max_delay: Duration) -> Self {
        BackoffStrategy::Exponential { initial_delay, multiplier, max_delay }
    }

    /// Jittered exponential backoff.
    pub fn jittered(
        initial_delay: Duration,
        multiplier: f64,
        max_delay: Duration,
        jitter_factor: f64,
    ) -> Self {
        BackoffStrategy::Jittered { initial_delay, multiplier, max_delay, jitter_factor }
    }

    /// Calculate the delay for the given 1-based attempt index.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        match self {
            BackoffStrategy::Fixed { delay } => *delay,
            BackoffStrategy::Linear { increment, max_delay } => {
                increment.saturating_mul(attempt).min(*max_delay)
            }
            BackoffStrategy::Exponential { initial_delay, multiplier, max_delay } => {
                exponential_delay(*initial_delay, *multiplier, *max_delay, attempt)
            }
            BackoffStrategy::Jittered { initial_delay, multiplier, max_delay, jitter_factor } => {
                let delay = exponential_delay(*initial_delay, *multiplier, *max_delay, attempt);
                apply_jitter(delay, *jitter_factor)
            }
        }
    }
}

/// `initial * multiplier^(attempt - 1)`, capped. Attempt 0 yields the
/// initial delay unchanged.
fn exponential_delay(
    initial_delay: Duration,
    multiplier: f64,
    max_delay: Duration,
    attempt: u32,
) -> Duration {
    if attempt == 0 {
        return initial_delay;
    }

    let delay_ms = initial_delay.as_millis() as f64 * multiplier.powi(attempt as i32 - 1);
    let capped_ms = delay_ms.min(max_delay.as_millis() as f64);
    Duration::from_millis(capped_ms.max(0.0) as u64)
}

fn apply_jitter(delay: Duration, jitter_factor: f64) -> Duration {
    if jitter_factor == 0.0 {
        return delay;
    }

    let mut rng = rand::thread_rng();
    let factor: f64 = rng.gen_range(-jitter_factor..=jitter_factor);
    let jittered_ms = delay.as_millis() as f64 * (1.0 + factor);
    Duration::from_millis(jittered_ms.max(0.0) as u64)
}
