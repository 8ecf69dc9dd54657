//! Exponential backoff with jitter.
//!
//! The delay before retry `n` (1-based) is `2^n` seconds plus a uniformly
//! distributed jitter in `[0, 1000)` milliseconds, so the first retry waits
//! 2–3 s, the second 4–5 s, and so on.

use rand::Rng;
use std::time::Duration;

/// Base unit multiplied by `2^retry_number`.
pub const BASE_DELAY_MS: u64 = 1000;

/// Exclusive upper bound of the random jitter added to every delay.
pub const MAX_JITTER_MS: u64 = 1000;

/// Delay before the `retry_number`-th retry (1 for the first retry).
///
/// Usable on its own, independent of any in-flight operation.
///
/// ```
/// use retry_request::get_next_retry_delay;
///
/// let delay = get_next_retry_delay(1).as_millis();
/// assert!((2000..3000).contains(&delay));
/// ```
pub fn get_next_retry_delay(retry_number: u32) -> Duration {
    let exponential = 2u64
        .saturating_pow(retry_number)
        .saturating_mul(BASE_DELAY_MS);
    let jitter = rand::rng().random_range(0..MAX_JITTER_MS);
    Duration::from_millis(exponential.saturating_add(jitter))
}

/// Strategy computing the wait before a retry.
pub trait Backoff: Send + Sync {
    /// Delay before the `retry_number`-th retry (1-based).
    fn delay(&self, retry_number: u32) -> Duration;
}

/// The default strategy; delegates to [`get_next_retry_delay`].
#[derive(Debug, Clone, Copy, Default)]
pub struct ExponentialJitter;

impl Backoff for ExponentialJitter {
    fn delay(&self, retry_number: u32) -> Duration {
        get_next_retry_delay(retry_number)
    }
}

/// Constant delay between retries.
#[derive(Debug, Clone, Copy)]
pub struct FixedDelay(pub Duration);

impl Backoff for FixedDelay {
    fn delay(&self, _retry_number: u32) -> Duration {
        self.0
    }
}
