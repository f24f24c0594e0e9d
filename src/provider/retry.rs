//! Retry policy for vendor rate limits.
//!
//! A [`RetryPolicy`] says how many attempts a vendor call gets and how long
//! to wait between them. [`execute`] drives one call through the explicit
//! [`RetryState`] machine:
//!
//! ```text
//! Attempting(n) ──ok──▶ Succeeded
//!      │
//!      ├─429, n < max──▶ Backoff(n, delay) ──sleep──▶ Attempting(n+1)
//!      ├─429, n = max──▶ ExhaustedRetries
//!      └─other error──▶ returned as-is (never retried)
//! ```
//!
//! Only HTTP 429 is retried. Auth failures and bad requests will not get
//! better by waiting, and transport errors are left to the caller's
//! per-image isolation.

use crate::error::PetitionError;
use crate::provider::ProviderKind;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, warn};

/// How the wait grows between attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Backoff {
    /// Retry immediately.
    None,
    /// Wait `attempt × step_ms` after attempt `attempt` (1-based).
    Linear { step_ms: u64 },
    /// Wait `base_ms × 2^(attempt-1)` after attempt `attempt`.
    Exponential { base_ms: u64 },
}

/// Attempts and backoff for one vendor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Total attempts including the first. `1` disables retrying.
    pub max_attempts: u32,
    pub backoff: Backoff,
}

impl RetryPolicy {
    /// One attempt; a 429 is surfaced immediately.
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            backoff: Backoff::None,
        }
    }

    /// `max_attempts` attempts, waiting `attempt × step` in between.
    pub fn linear(max_attempts: u32, step: Duration) -> Self {
        Self {
            max_attempts,
            backoff: Backoff::Linear {
                step_ms: step.as_millis() as u64,
            },
        }
    }

    /// `max_attempts` attempts, doubling from `base` in between.
    pub fn exponential(max_attempts: u32, base: Duration) -> Self {
        Self {
            max_attempts,
            backoff: Backoff::Exponential {
                base_ms: base.as_millis() as u64,
            },
        }
    }

    /// Whether a 429 may be retried at all.
    pub fn retries(&self) -> bool {
        self.max_attempts > 1
    }

    /// Wait after the given failed attempt (1-based).
    pub fn delay_after(&self, attempt: u32) -> Duration {
        match self.backoff {
            Backoff::None => Duration::ZERO,
            Backoff::Linear { step_ms } => {
                Duration::from_millis(step_ms.saturating_mul(u64::from(attempt)))
            }
            Backoff::Exponential { base_ms } => {
                let factor = 2u64.saturating_pow(attempt.saturating_sub(1));
                Duration::from_millis(base_ms.saturating_mul(factor))
            }
        }
    }

    /// Sum of every wait a fully exhausted run would incur.
    pub fn total_backoff(&self) -> Duration {
        (1..self.max_attempts).map(|a| self.delay_after(a)).sum()
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::none()
    }
}

/// State of one call under a [`RetryPolicy`].
#[derive(Debug)]
pub enum RetryState<T> {
    Attempting { attempt: u32 },
    Backoff { attempt: u32, delay: Duration },
    Succeeded(T),
    ExhaustedRetries(PetitionError),
}

/// Run `op` under `policy`, retrying only on [`PetitionError::RateLimited`].
///
/// `op` receives the 1-based attempt number. When a multi-attempt policy
/// runs out, the last rate-limit error is wrapped in
/// [`PetitionError::RetriesExhausted`]; with a single-attempt policy the
/// plain `RateLimited` error is returned.
pub async fn execute<T, F, Fut>(
    policy: &RetryPolicy,
    provider: ProviderKind,
    mut op: F,
) -> Result<T, PetitionError>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, PetitionError>>,
{
    let max = policy.max_attempts.max(1);
    let mut state = RetryState::Attempting { attempt: 1 };

    loop {
        state = match state {
            RetryState::Attempting { attempt } => match op(attempt).await {
                Ok(value) => RetryState::Succeeded(value),
                Err(e) if e.is_rate_limited() && attempt < max => RetryState::Backoff {
                    attempt,
                    delay: policy.delay_after(attempt),
                },
                Err(e) if e.is_rate_limited() && max > 1 => {
                    RetryState::ExhaustedRetries(PetitionError::RetriesExhausted {
                        provider,
                        attempts: attempt,
                        last: Box::new(e),
                    })
                }
                Err(e) => return Err(e),
            },
            RetryState::Backoff { attempt, delay } => {
                warn!(
                    "{}: rate limited, retry {}/{} after {}ms",
                    provider,
                    attempt,
                    max - 1,
                    delay.as_millis()
                );
                sleep(delay).await;
                RetryState::Attempting {
                    attempt: attempt + 1,
                }
            }
            RetryState::Succeeded(value) => return Ok(value),
            RetryState::ExhaustedRetries(e) => {
                debug!("{}: retry policy exhausted", provider);
                return Err(e);
            }
        };
    }
}
