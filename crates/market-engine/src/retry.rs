//! Bounded retry of atomic units that lose a write-lock race.
//!
//! ```text
//! attempt 1 ──► Busy ──► sleep(next_backoff) ──► attempt 2 ──► Busy ──► ...
//!                                                              │
//!                            attempts == max ◄─────────────────┘
//!                                   │
//!                                   ▼
//!                  CoreError::ConcurrentUpdateConflict { attempts }
//! ```
//!
//! Each attempt starts a fresh transaction, so nothing from a failed attempt
//! is ever visible. Pauses come from an [`ExponentialBackoff`] seeded with
//! `retry_backoff_ms`; jitter keeps competing checkouts from waking together.
//! The attempt count, not elapsed time, decides when to give up.

use std::future::Future;
use std::time::Duration;

use backoff::backoff::Backoff;
use backoff::ExponentialBackoff;
use tracing::{debug, warn};

use crate::config::CheckoutSettings;
use crate::error::EngineResult;
use market_core::CoreError;

/// Runs `unit` until it succeeds, fails with a non-retryable error, or
/// `max_commit_attempts` is reached.
pub(crate) async fn with_retry<T, F, Fut>(
    operation: &'static str,
    policy: &CheckoutSettings,
    mut unit: F,
) -> EngineResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = EngineResult<T>>,
{
    let max_attempts = policy.max_commit_attempts.max(1);
    let mut backoff = lock_backoff(policy);
    let mut attempt = 1;

    loop {
        match unit().await {
            Ok(value) => {
                if attempt > 1 {
                    debug!(operation, attempt, "Succeeded after retry");
                }
                return Ok(value);
            }
            Err(err) if err.is_retryable() => {
                if attempt >= max_attempts {
                    warn!(operation, attempts = attempt, error = %err, "Giving up after lock contention");
                    return Err(CoreError::ConcurrentUpdateConflict { attempts: attempt }.into());
                }
                let delay = backoff.next_backoff().unwrap_or(backoff.max_interval);
                debug!(operation, attempt, ?delay, error = %err, "Retrying after lock contention");
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(err) => return Err(err),
        }
    }
}

/// Pacing for one call of [`with_retry`]. Intervals top out at 64× the base.
fn lock_backoff(policy: &CheckoutSettings) -> ExponentialBackoff {
    let initial = Duration::from_millis(policy.retry_backoff_ms);
    ExponentialBackoff {
        current_interval: initial,
        initial_interval: initial,
        max_interval: initial * 64,
        multiplier: 2.0,
        max_elapsed_time: None,
        ..Default::default()
    }
}
