//! Bounded retry with a fixed delay between attempts

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};

/// Attempt cap and fixed inter-attempt delay
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetrySpec {
    pub max_attempts: u32,
    pub delay: Duration,
}

impl RetrySpec {
    pub const fn new(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts,
            delay,
        }
    }
}

impl Default for RetrySpec {
    /// Policy used for every Steam call: 3 attempts, 5 seconds apart
    fn default() -> Self {
        Self::new(3, Duration::from_millis(5000))
    }
}

/// Run `operation` until it succeeds or `spec.max_attempts` calls have failed.
///
/// Attempts are strictly sequential. The last error is returned unchanged.
pub async fn retry<T, E, F, Fut>(spec: RetrySpec, mut operation: F) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Display,
{
    let mut remaining = spec.max_attempts.max(1);
    let mut attempt = 1u32;

    loop {
        match operation().await {
            Ok(value) => {
                if attempt > 1 {
                    debug!("Succeeded on attempt {}", attempt);
                }
                return Ok(value);
            }
            Err(e) if remaining > 1 => {
                warn!(
                    "Attempt {} failed: {} (retrying in {}ms)",
                    attempt,
                    e,
                    spec.delay.as_millis()
                );
                remaining -= 1;
                attempt += 1;
                tokio::time::sleep(spec.delay).await;
            }
            Err(e) => {
                warn!("Attempt {} failed: {} (giving up)", attempt, e);
                return Err(e);
            }
        }
    }
}
