//! Retry policy, backoff calculation, and the retry executor.
//!
//! [`RetryPolicy`] controls how many times a provider call is attempted,
//! how long to wait between attempts, and which error kinds are worth
//! retrying. [`execute`] runs an attempt closure under a policy.
//!
//! Backoff timing is a pure function of (attempt, policy) plus a
//! [`JitterSource`], so tests can pin the random factor.

use std::future::Future;
use std::time::Duration;

use rand::Rng;
use tracing::{debug, warn};

use crate::error::{HuginnError, ProviderError, ProviderErrorKind};
use crate::telemetry;
use crate::types::ProviderKind;

/// Retry behaviour for one provider.
///
/// ```rust
/// # use huginn::RetryPolicy;
/// # use std::time::Duration;
/// let policy = RetryPolicy::new()
///     .max_attempts(5)
///     .base_delay(Duration::from_millis(200))
///     .jitter_ratio(0.1);
/// assert_eq!(policy.delay_for_attempt(2), Duration::from_millis(400));
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Maximum number of attempts (including the first). 1 = no retry. Default: 3.
    pub max_attempts: u32,
    /// Delay after the first failed attempt. Default: 500ms.
    pub base_delay: Duration,
    /// Cap on any single delay. Default: 30s.
    pub max_delay: Duration,
    /// Delays are scaled by a random factor in `[1 - ratio, 1 + ratio]`. Default: 0.2.
    pub jitter_ratio: f64,
    /// Error kinds that are retried; everything else propagates immediately.
    pub retryable: Vec<ProviderErrorKind>,
    /// Upper bound on a single attempt. Default: 60s.
    pub attempt_timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(30),
            jitter_ratio: 0.2,
            retryable: ProviderErrorKind::DEFAULT_RETRYABLE.to_vec(),
            attempt_timeout: Duration::from_secs(60),
        }
    }
}

impl RetryPolicy {
    pub fn new() -> Self {
        Self::default()
    }

    /// A policy that makes exactly one attempt.
    pub fn disabled() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    pub fn max_attempts(mut self, n: u32) -> Self {
        self.max_attempts = n.max(1);
        self
    }

    pub fn base_delay(mut self, delay: Duration) -> Self {
        self.base_delay = delay;
        self
    }

    pub fn max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    pub fn jitter_ratio(mut self, ratio: f64) -> Self {
        self.jitter_ratio = ratio.clamp(0.0, 1.0);
        self
    }

    pub fn retryable(mut self, kinds: impl IntoIterator<Item = ProviderErrorKind>) -> Self {
        self.retryable = kinds.into_iter().collect();
        self
    }

    pub fn attempt_timeout(mut self, timeout: Duration) -> Self {
        self.attempt_timeout = timeout;
        self
    }

    pub fn is_retryable(&self, kind: ProviderErrorKind) -> bool {
        self.retryable.contains(&kind)
    }

    /// Un-jittered backoff after failed attempt number `attempt` (1-based):
    /// `min(max_delay, base_delay * 2^(attempt-1))`.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1);
        self.base_delay
            .saturating_mul(2u32.saturating_pow(exponent))
            .min(self.max_delay)
    }

    /// The actual sleep before the next attempt.
    ///
    /// A server `Retry-After` hint replaces the computed backoff (still
    /// capped at `max_delay`); otherwise the capped backoff is scaled by
    /// jitter, so a capped delay still spreads across `max_delay * factor`.
    pub fn effective_delay(
        &self,
        attempt: u32,
        retry_after: Option<Duration>,
        jitter: &dyn JitterSource,
    ) -> Duration {
        if let Some(hint) = retry_after {
            return hint.min(self.max_delay);
        }
        let base = self.delay_for_attempt(attempt);
        let factor = jitter.factor(self.jitter_ratio);
        Duration::try_from_secs_f64(base.as_secs_f64() * factor.max(0.0))
            .unwrap_or(Duration::MAX)
    }
}

// ============================================================================
// Jitter
// ============================================================================

/// Random source for backoff jitter.
pub trait JitterSource: Send + Sync {
    /// A multiplier in `[1 - ratio, 1 + ratio]`.
    fn factor(&self, ratio: f64) -> f64;
}

/// Uniform jitter from the thread-local RNG.
#[derive(Debug, Clone, Copy, Default)]
pub struct ThreadRngJitter;

impl JitterSource for ThreadRngJitter {
    fn factor(&self, ratio: f64) -> f64 {
        if ratio <= 0.0 {
            return 1.0;
        }
        rand::thread_rng().gen_range(1.0 - ratio..=1.0 + ratio)
    }
}

/// Always returns the same factor, clamped into the allowed range.
#[derive(Debug, Clone, Copy)]
pub struct FixedJitter(pub f64);

impl JitterSource for FixedJitter {
    fn factor(&self, ratio: f64) -> f64 {
        self.0.clamp(1.0 - ratio, 1.0 + ratio)
    }
}

// ============================================================================
// Executor
// ============================================================================

/// Run `attempt` under `policy`.
///
/// Each call of `attempt` receives the 1-based attempt number and is bounded
/// by `policy.attempt_timeout`; an attempt that overruns is a `Timeout`
/// whatever the transport would have said. Kinds outside
/// `policy.retryable` return [`HuginnError::Provider`] at once. Running out
/// of attempts returns [`HuginnError::RetriesExhausted`] holding the last
/// failure.
pub async fn execute<F, Fut, T>(
    policy: &RetryPolicy,
    provider: ProviderKind,
    jitter: &dyn JitterSource,
    mut attempt: F,
) -> Result<T, HuginnError>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, ProviderError>>,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut n = 1;
    loop {
        let outcome = match tokio::time::timeout(policy.attempt_timeout, attempt(n)).await {
            Ok(outcome) => outcome,
            Err(_) => Err(ProviderError::new(
                ProviderErrorKind::Timeout,
                provider,
                format!("attempt exceeded {:?}", policy.attempt_timeout),
            )),
        };

        let err = match outcome {
            Ok(value) => return Ok(value),
            Err(err) => err,
        };

        if !policy.is_retryable(err.kind) {
            debug!(provider = %provider, kind = %err.kind, attempt = n, "non-retryable error");
            return Err(HuginnError::Provider(err));
        }
        if n >= max_attempts {
            return Err(HuginnError::RetriesExhausted {
                attempts: n,
                last: err,
            });
        }

        let delay = policy.effective_delay(n, err.retry_after, jitter);
        metrics::counter!(telemetry::RETRIES_TOTAL,
            "provider" => provider.as_str(),
            "kind" => err.kind.as_str(),
        )
        .increment(1);
        warn!(
            provider = %provider,
            attempt = n,
            max_attempts,
            delay_ms = delay.as_millis() as u64,
            error = %err,
            "retrying after transient error"
        );
        tokio::time::sleep(delay).await;
        n += 1;
    }
}
