use std::{fmt, future::Future, sync::Arc, time::Duration};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{ServiceError, is_retriable_network_error};

pub type ShouldRetryFn<E> = Arc<dyn Fn(&E, u32) -> bool + Send + Sync>;
pub type OnRetryFn<E> = Arc<dyn Fn(RetryAttempt<'_, E>) + Send + Sync>;

/// Tunable numbers of a retry policy.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RetrySettings {
    /// Total invocations, including the first one.
    pub attempts: u32,
    pub initial_delay_ms: u64,
    pub max_delay_ms: u64,
    pub backoff_factor: f64,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            attempts: 3,
            initial_delay_ms: 250,
            max_delay_ms: 2_000,
            backoff_factor: 2.0,
        }
    }
}

/// Payload handed to the `on_retry` hook before each backoff sleep.
#[derive(Debug)]
pub struct RetryAttempt<'a, E> {
    /// Number of the attempt that just failed (starting at 1).
    pub attempt: u32,
    pub delay: Duration,
    pub error: &'a E,
}

/// Backoff policy used by [`retry_async`].
pub struct RetryPolicy<E = ServiceError> {
    settings: RetrySettings,
    should_retry: ShouldRetryFn<E>,
    on_retry: Option<OnRetryFn<E>>,
}

impl<E> RetryPolicy<E> {
    /// Build a policy from `settings` and a retry predicate.
    ///
    /// `attempts` is raised to at least 1 and a backoff factor below 1.0 (or
    /// not finite) becomes 1.0.
    pub fn new(settings: RetrySettings, should_retry: ShouldRetryFn<E>) -> Self {
        let mut settings = settings;
        settings.attempts = settings.attempts.max(1);
        if !settings.backoff_factor.is_finite() || settings.backoff_factor < 1.0 {
            settings.backoff_factor = 1.0;
        }
        Self {
            settings,
            should_retry,
            on_retry: None,
        }
    }

    /// Replace the retry predicate. It receives the error and the 1-based attempt.
    pub fn with_should_retry<F>(mut self, should_retry: F) -> Self
    where
        F: Fn(&E, u32) -> bool + Send + Sync + 'static,
    {
        self.should_retry = Arc::new(should_retry);
        self
    }

    /// Observability hook invoked after deciding to retry and before sleeping.
    pub fn with_on_retry<F>(mut self, on_retry: F) -> Self
    where
        F: Fn(RetryAttempt<'_, E>) + Send + Sync + 'static,
    {
        self.on_retry = Some(Arc::new(on_retry));
        self
    }

    /// Settings after clamping.
    pub fn settings(&self) -> RetrySettings {
        self.settings
    }

    /// Total invocations allowed, including the first.
    pub fn attempts(&self) -> u32 {
        self.settings.attempts
    }

    /// Delay to wait after failed attempt `attempt` (1-based), before the next one.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(i32::MAX as u32) as i32;
        let scaled =
            self.settings.initial_delay_ms as f64 * self.settings.backoff_factor.powi(exponent);
        let bounded = scaled.round().min(self.settings.max_delay_ms as f64);
        Duration::from_millis(bounded as u64)
    }

    fn should_retry(&self, error: &E, attempt: u32) -> bool {
        (self.should_retry)(error, attempt)
    }
}

impl<E> RetryPolicy<E>
where
    E: AsRef<ServiceError> + 'static,
{
    /// Policy using the generic network-error heuristic.
    pub fn from_settings(settings: RetrySettings) -> Self {
        Self::new(
            settings,
            Arc::new(|error: &E, _attempt: u32| {
                is_retriable_network_error(error.as_ref())
            }),
        )
    }
}

impl<E> Default for RetryPolicy<E>
where
    E: AsRef<ServiceError> + 'static,
{
    fn default() -> Self {
        Self::from_settings(RetrySettings::default())
    }
}

impl<E> Clone for RetryPolicy<E> {
    fn clone(&self) -> Self {
        Self {
            settings: self.settings,
            should_retry: Arc::clone(&self.should_retry),
            on_retry: self.on_retry.clone(),
        }
    }
}

impl<E> fmt::Debug for RetryPolicy<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryPolicy")
            .field("settings", &self.settings)
            .field("on_retry", &self.on_retry.is_some())
            .finish_non_exhaustive()
    }
}

/// Run `operation` until it succeeds, the policy refuses a retry, or the
/// attempt budget is spent. The last error is returned unchanged.
///
/// The engine does not deduplicate side effects: `operation` must be safe to
/// invoke more than once.
pub async fn retry_async<T, E, F, Fut>(mut operation: F, policy: &RetryPolicy<E>) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: fmt::Display,
{
    let attempts = policy.attempts();
    let mut attempt: u32 = 1;

    loop {
        let error = match operation().await {
            Ok(value) => return Ok(value),
            Err(error) => error,
        };

        if attempt >= attempts || !policy.should_retry(&error, attempt) {
            debug!(attempt, attempts, error = %error, "giving up on operation");
            return Err(error);
        }

        let delay = policy.delay_for_attempt(attempt);
        debug!(
            attempt,
            delay_ms = delay.as_millis() as u64,
            error = %error,
            "operation failed; backing off"
        );
        if let Some(on_retry) = &policy.on_retry {
            on_retry(RetryAttempt {
                attempt,
                delay,
                error: &error,
            });
        }

        tokio::time::sleep(delay).await;
        attempt += 1;
    }
}
