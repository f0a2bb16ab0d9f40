//! Retry policies and the retrying loader decorator.

use async_trait::async_trait;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use tracing::{debug, warn};

use super::BackoffStrategy;
use crate::classify::ErrorKind;
use crate::{HttpError, Result};

type Predicate = Arc<dyn Fn(&HttpError) -> bool + Send + Sync>;

/// Which errors to retry, how often, and how long to wait in between.
///
/// Predicates are checked in the order they were added; the first one that
/// matches names the reason for the retry in the logs.
#[derive(Clone)]
pub struct RetryPolicy {
    predicates: Vec<(String, Predicate)>,
    max_attempts: u32,
    backoff: BackoffStrategy,
}

impl fmt::Debug for RetryPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryPolicy")
            .field(
                "predicates",
                &self.predicates.iter().map(|(name, _)| name).collect::<Vec<_>>(),
            )
            .field("max_attempts", &self.max_attempts)
            .field("backoff", &self.backoff)
            .finish()
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::builder().retry_on_transient().build()
    }
}

impl RetryPolicy {
    /// Create a new policy builder.
    pub fn builder() -> RetryPolicyBuilder {
        RetryPolicyBuilder::default()
    }

    /// Total attempts allowed, including the first.
    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Name of the first predicate matching `error`.
    pub fn matching_predicate(&self, error: &HttpError) -> Option<&str> {
        self.predicates
            .iter()
            .find(|(_, predicate)| predicate(error))
            .map(|(name, _)| name.as_str())
    }

    /// Whether another attempt should follow the `attempt`th failure.
    pub fn should_retry(&self, attempt: u32, error: &HttpError) -> bool {
        attempt < self.max_attempts && self.matching_predicate(error).is_some()
    }

    /// Run `operation` until it succeeds or the policy gives up.
    pub async fn call<T, F, Fut>(&self, mut operation: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut attempt = 0;
        loop {
            attempt += 1;
            let error = match operation().await {
                Ok(value) => return Ok(value),
                Err(e) => e,
            };

            let Some(reason) = self.matching_predicate(&error) else {
                return Err(error);
            };
            if attempt >= self.max_attempts {
                warn!(attempt, reason, error = %error, "Giving up after retries");
                return Err(error);
            }

            let delay = self.backoff.delay_for_attempt(attempt);
            debug!(
                attempt,
                reason,
                delay_ms = delay.as_millis() as u64,
                error = %error,
                "Retrying"
            );
            tokio::time::sleep(delay).await;
        }
    }
}

/// Builder for [`RetryPolicy`].
pub struct RetryPolicyBuilder {
    policy: RetryPolicy,
}

impl Default for RetryPolicyBuilder {
    fn default() -> Self {
        Self {
            policy: RetryPolicy {
                predicates: Vec::new(),
                max_attempts: 3,
                backoff: BackoffStrategy::default(),
            },
        }
    }
}

impl RetryPolicyBuilder {
    /// Retry errors matching `predicate`.
    pub fn retry_if<F>(mut self, name: impl Into<String>, predicate: F) -> Self
    where
        F: Fn(&HttpError) -> bool + Send + Sync + 'static,
    {
        self.policy.predicates.push((name.into(), Arc::new(predicate)));
        self
    }

    /// Retry timeouts and connection failures.
    pub fn retry_on_transient(self) -> Self {
        self.retry_if("transient", HttpError::is_transient)
    }

    /// Retry classified errors of `kind`.
    pub fn retry_on_kind(self, kind: ErrorKind) -> Self {
        self.retry_if(kind.as_str(), move |e| e.kind() == Some(kind))
    }

    /// Retry responses with a 5xx status.
    pub fn retry_on_server_error(self) -> Self {
        self.retry_if("server-error", |e| {
            e.status_code().is_some_and(|s| s.is_server_error())
        })
    }

    /// Set the total number of attempts.
    pub fn max_attempts(mut self, max: u32) -> Self {
        self.policy.max_attempts = max.max(1);
        self
    }

    /// Set the backoff schedule.
    pub fn backoff(mut self, backoff: BackoffStrategy) -> Self {
        self.policy.backoff = backoff;
        self
    }

    /// Build the policy.
    pub fn build(self) -> RetryPolicy {
        self.policy
    }
}

/// Loads a value for a key.
#[async_trait]
pub trait Loader<K, V>: Send + Sync
where
    K: Send + Sync,
{
    /// Load the value for `key`.
    async fn load(&self, key: &K) -> Result<V>;
}

/// Wraps a [`Loader`] so failed loads are retried according to a policy.
#[derive(Debug, Clone)]
pub struct RetryingLoader<L> {
    inner: L,
    policy: RetryPolicy,
}

impl<L> RetryingLoader<L> {
    /// Wrap `inner`.
    pub fn new(inner: L, policy: RetryPolicy) -> Self {
        Self { inner, policy }
    }

    /// The wrapped loader.
    pub fn inner(&self) -> &L {
        &self.inner
    }
}

#[async_trait]
impl<K, V, L> Loader<K, V> for RetryingLoader<L>
where
    K: Send + Sync,
    V: Send,
    L: Loader<K, V>,
{
    async fn load(&self, key: &K) -> Result<V> {
        self.policy.call(|| self.inner.load(key)).await
    }
}
