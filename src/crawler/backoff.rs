//! Rate/backoff controller
//!
//! Every remote call goes through [`Backoff::call`] or [`Backoff::run`], which:
//! - pauses until the quota resets when the remote reports it nearly spent
//! - retries transient failures with capped exponential backoff
//! - gives up after a fixed number of attempts with `FetchError::Exhausted`
//!
//! A `Retry-After` hint pauses until it elapses; a zero hint gets the
//! ordinary exponential delay instead.
//!
//! Permanent failures are returned on the first attempt.

use crate::client::{FetchError, RateSnapshot, Response};
use crate::config::RateConfig;
use crate::crawler::FetchTask;
use chrono::{DateTime, Utc};
use std::future::Future;
use std::sync::Mutex;
use std::time::Duration;

/// Retry and quota policy
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Total attempts per call, including the first
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub jitter: bool,

    /// Pause before calling once remaining quota is at or below this
    pub safety_buffer: u64,

    /// Added to the reported reset time before resuming
    pub reset_buffer: Duration,
}

impl RetryPolicy {
    /// Delay before retrying after failed attempt number `attempt` (1-based)
    ///
    /// `base * 2^(attempt - 1)`, capped at `max_delay`. With jitter enabled
    /// up to half the delay again is added before capping.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(31);
        let delay = self
            .base_delay
            .saturating_mul(1u32 << exponent)
            .min(self.max_delay);

        if self.jitter {
            delay
                .mul_f64(1.0 + rand::random::<f64>() * 0.5)
                .min(self.max_delay)
        } else {
            delay
        }
    }
}

impl From<&RateConfig> for RetryPolicy {
    fn from(config: &RateConfig) -> Self {
        Self {
            max_attempts: config.max_retries.max(1),
            base_delay: Duration::from_millis(config.backoff_base_ms),
            max_delay: Duration::from_millis(config.max_backoff_ms),
            jitter: config.jitter,
            safety_buffer: config.safety_buffer,
            reset_buffer: Duration::from_secs(config.reset_buffer_secs),
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from(&RateConfig::default())
    }
}

/// Last quota the remote reported
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RateState {
    pub remaining: Option<u64>,
    pub reset_at: Option<DateTime<Utc>>,
}

impl RateState {
    fn observe(&mut self, snapshot: RateSnapshot) {
        self.remaining = Some(snapshot.remaining);
        self.reset_at = snapshot.reset_at;
    }

    /// Time to wait before the next call, if the quota is nearly spent
    fn pause_needed(&self, now: DateTime<Utc>, safety_buffer: u64) -> Option<Duration> {
        match (self.remaining, self.reset_at) {
            (Some(remaining), Some(reset_at)) if remaining <= safety_buffer && reset_at > now => {
                (reset_at - now).to_std().ok()
            }
            _ => None,
        }
    }
}

/// Shared retry and rate-limit controller
#[derive(Debug)]
pub struct Backoff {
    policy: RetryPolicy,
    state: Mutex<RateState>,
}

impl Backoff {
    pub fn new(policy: RetryPolicy) -> Self {
        Self {
            policy,
            state: Mutex::new(RateState::default()),
        }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Current view of the remote quota
    pub fn rate_state(&self) -> RateState {
        *self.lock_state()
    }

    /// Records a quota snapshot reported outside of [`Backoff::call`]
    pub fn observe(&self, snapshot: RateSnapshot) {
        self.lock_state().observe(snapshot);
    }

    fn lock_state(&self) -> std::sync::MutexGuard<'_, RateState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Runs `op` under the retry and quota policy
    ///
    /// # Arguments
    ///
    /// * `label` - Names the call in logs
    /// * `op` - Produces one attempt; called again for each retry
    ///
    /// # Returns
    ///
    /// * `Ok(T)` - The body of the first successful attempt
    /// * `Err(FetchError::Exhausted)` - Every attempt failed transiently
    /// * `Err(other)` - The first permanent failure
    pub async fn call<T, F, Fut>(&self, label: &str, op: F) -> Result<T, FetchError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<Response<T>, FetchError>>,
    {
        self.attempt(label, self.policy.max_attempts, op).await.0
    }

    /// Runs `op` for `task`, spending the task's own retry budget
    ///
    /// `task.retries_remaining` is reduced by the attempts made, so a task
    /// handed back after exhaustion carries zero.
    pub async fn run<T, F, Fut>(&self, task: &mut FetchTask, op: F) -> Result<T, FetchError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<Response<T>, FetchError>>,
    {
        let label = task.to_string();
        let (result, attempts) = self.attempt(&label, task.retries_remaining, op).await;
        task.retries_remaining = task.retries_remaining.saturating_sub(attempts);
        result
    }

    async fn attempt<T, F, Fut>(
        &self,
        label: &str,
        budget: u32,
        mut op: F,
    ) -> (Result<T, FetchError>, u32)
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<Response<T>, FetchError>>,
    {
        let budget = budget.max(1);
        let mut attempt = 0;

        loop {
            self.wait_for_quota(label).await;
            attempt += 1;

            let err = match op().await {
                Ok(response) => {
                    if let Some(snapshot) = response.rate {
                        self.observe(snapshot);
                    }
                    return (Ok(response.body), attempt);
                }
                Err(err) if err.is_transient() => err,
                Err(err) => return (Err(err), attempt),
            };

            if attempt >= budget {
                tracing::warn!("{}: giving up after {} attempts: {}", label, attempt, err);
                let exhausted = FetchError::Exhausted {
                    attempts: attempt,
                    last: Box::new(err),
                };
                return (Err(exhausted), attempt);
            }

            // A zero hint says nothing about when the quota returns
            let hint = match &err {
                FetchError::RateLimited {
                    retry_after: Some(retry_after),
                    ..
                } if !retry_after.is_zero() => Some(*retry_after),
                _ => None,
            };

            if let Some(retry_after) = hint {
                // The quota wait at the top of the loop covers the pause
                let reset_at = chrono::Duration::from_std(retry_after)
                    .ok()
                    .and_then(|d| Utc::now().checked_add_signed(d));
                let mut state = self.lock_state();
                state.remaining = Some(0);
                state.reset_at = reset_at;
                tracing::warn!("{}: rate limited, retry after {:?}", label, retry_after);
                continue;
            }

            let delay = self.policy.delay_for(attempt);
            tracing::warn!(
                "{}: attempt {}/{} failed ({}), retrying in {:?}",
                label,
                attempt,
                budget,
                err,
                delay
            );
            tokio::time::sleep(delay).await;
        }
    }

    async fn wait_for_quota(&self, label: &str) {
        let pause = self
            .rate_state()
            .pause_needed(Utc::now(), self.policy.safety_buffer);

        if let Some(pause) = pause {
            let total = pause + self.policy.reset_buffer;
            tracing::warn!(
                "{}: rate limit almost reached, sleeping {:.1}s until reset",
                label,
                total.as_secs_f64()
            );
            tokio::time::sleep(total).await;
            *self.lock_state() = RateState::default();
        }
    }
}
