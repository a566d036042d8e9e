//! Convergence polling for eventually-consistent platform state
//!
//! The billing platform applies clock advances and the resulting subscription
//! transitions asynchronously. Callers fetch, check, sleep and re-fetch until
//! the state they expect shows up or the attempt ceiling is reached. Whether
//! running out of attempts is fatal is decided by the caller.

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;

/// Interval and attempt ceiling for one wait
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollConfig {
    /// Delay between fetches; zero polls back-to-back
    pub interval: Duration,
    /// Re-fetches allowed after the initial fetch
    pub max_attempts: u32,
}

impl PollConfig {
    pub fn new(interval: Duration, max_attempts: u32) -> Self {
        Self {
            interval,
            max_attempts,
        }
    }

    /// Subscription status: 60 attempts, 2s apart
    pub fn subscription_status() -> Self {
        Self::new(Duration::from_millis(2000), 60)
    }

    /// Test clock readiness: 400 back-to-back attempts
    pub fn clock_ready() -> Self {
        Self::new(Duration::ZERO, 400)
    }
}

/// How a wait ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollOutcome<T> {
    /// The predicate held for `value` after `attempts` re-fetches
    Converged { value: T, attempts: u32 },
    /// The ceiling was hit; `last` is the final observation
    Exhausted { last: T, attempts: u32 },
}

impl<T> PollOutcome<T> {
    pub fn is_converged(&self) -> bool {
        matches!(self, PollOutcome::Converged { .. })
    }

    pub fn attempts(&self) -> u32 {
        match self {
            PollOutcome::Converged { attempts, .. } | PollOutcome::Exhausted { attempts, .. } => {
                *attempts
            }
        }
    }

    /// The observed value, whether or not it satisfied the predicate
    pub fn into_inner(self) -> T {
        match self {
            PollOutcome::Converged { value, .. } => value,
            PollOutcome::Exhausted { last, .. } => last,
        }
    }
}

/// Suspends between polls; swapped out in tests to avoid real delays.
#[async_trait]
pub trait Sleeper: Send + Sync {
    async fn sleep(&self, duration: Duration);
}

/// Sleeps on the tokio timer
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioSleeper;

#[async_trait]
impl Sleeper for TokioSleeper {
    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

/// Fetch with `getter` until `predicate` holds or `config.max_attempts`
/// re-fetches have been made.
///
/// The first fetch happens before any sleep, so state that already matches is
/// returned without waiting. Errors from `getter` are returned as-is.
pub async fn wait_for_condition<T, E, G, Fut, P>(
    mut getter: G,
    predicate: P,
    config: &PollConfig,
    sleeper: &dyn Sleeper,
) -> Result<PollOutcome<T>, E>
where
    G: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    P: Fn(&T) -> bool,
{
    let mut value = getter().await?;
    let mut attempt = 0;

    while !predicate(&value) {
        if attempt >= config.max_attempts {
            tracing::debug!(attempts = attempt, "Poll attempts exhausted");
            return Ok(PollOutcome::Exhausted {
                last: value,
                attempts: attempt,
            });
        }

        if !config.interval.is_zero() {
            sleeper.sleep(config.interval).await;
        }

        attempt += 1;
        tracing::trace!(attempt = attempt, max_attempts = config.max_attempts, "Polling");
        value = getter().await?;
    }

    Ok(PollOutcome::Converged {
        value,
        attempts: attempt,
    })
}
