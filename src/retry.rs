//! Retrying API calls through eventual-consistency and throttling errors.
//!
//! [`retry`] is the primitive: the operation itself decides whether a failure
//! is retryable. The `retry_when*` helpers adapt plain
//! `Result<T, ProviderError>` operations by deciding retryability from the
//! error, most often through the [`classify`](crate::classify) table.

use std::future::Future;
use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::classify::{self, Phase, ServiceErrors};
use crate::error::ProviderError;
use crate::timeouts::deadline_after;
use crate::waiter::{sleep_or_cancel, with_jitter};

/// How long propagation errors (IAM roles, instance profiles, security
/// groups that were just created) are retried.
pub const PROPAGATION_TIMEOUT: Duration = Duration::from_secs(2 * 60);

/// Smallest backoff between attempts.
const MIN_INTERVAL: Duration = Duration::from_millis(500);

/// Largest backoff between attempts.
const MAX_INTERVAL: Duration = Duration::from_secs(10);

/// The outcome of a failed attempt.
#[derive(Debug)]
pub enum RetryError {
    /// Try again after backing off.
    Retryable(ProviderError),
    /// Give up immediately.
    NonRetryable(ProviderError),
}

impl RetryError {
    pub fn retryable(err: impl Into<ProviderError>) -> Self {
        Self::Retryable(err.into())
    }

    pub fn non_retryable(err: impl Into<ProviderError>) -> Self {
        Self::NonRetryable(err.into())
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Retryable(_))
    }

    pub fn into_inner(self) -> ProviderError {
        match self {
            Self::Retryable(err) | Self::NonRetryable(err) => err,
        }
    }
}

impl From<ProviderError> for RetryError {
    fn from(err: ProviderError) -> Self {
        Self::NonRetryable(err)
    }
}

/// Call `op` until it succeeds, fails non-retryably, or `timeout` elapses.
///
/// After the deadline passes one final attempt is made; if that also fails
/// retryably the result is a timeout carrying its error.
pub async fn retry<T, F, Fut>(
    timeout: Duration,
    cancel: &CancellationToken,
    mut op: F,
) -> Result<T, ProviderError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, RetryError>>,
{
    let deadline = deadline_after(timeout);
    let mut interval = MIN_INTERVAL;
    let mut attempt = 0u32;

    loop {
        if cancel.is_cancelled() {
            return Err(ProviderError::Cancelled("retry cancelled".to_string()));
        }
        attempt += 1;

        let err = match op().await {
            Ok(value) => return Ok(value),
            Err(RetryError::NonRetryable(err)) => return Err(err),
            Err(RetryError::Retryable(err)) => err,
        };

        let now = Instant::now();
        if now >= deadline {
            debug!(attempt, error = %err, "retry deadline passed");
            return Err(ProviderError::Timeout {
                what: "retryable operation".to_string(),
                last_state: None,
                last_error: Some(Box::new(err)),
            });
        }

        let delay = with_jitter(interval).min(deadline - now);
        debug!(attempt, error = %err, delay_ms = delay.as_millis() as u64, "retrying");
        sleep_or_cancel(delay, cancel, "retry").await?;
        interval = (interval * 2).min(MAX_INTERVAL);
    }
}

/// Retry `op` while `predicate` accepts its error.
pub async fn retry_when<T, F, Fut, P>(
    timeout: Duration,
    cancel: &CancellationToken,
    mut op: F,
    predicate: P,
) -> Result<T, ProviderError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, ProviderError>>,
    P: Fn(&ProviderError) -> bool,
{
    let predicate = &predicate;
    retry(timeout, cancel, move || {
        let fut = op();
        async move {
            fut.await.map_err(|err| {
                if predicate(&err) {
                    RetryError::Retryable(err)
                } else {
                    RetryError::NonRetryable(err)
                }
            })
        }
    })
    .await
}

/// Retry while the object is not visible yet, as right after a create.
pub async fn retry_when_not_found<T, F, Fut>(
    timeout: Duration,
    cancel: &CancellationToken,
    op: F,
) -> Result<T, ProviderError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, ProviderError>>,
{
    retry_when(timeout, cancel, op, ProviderError::is_not_found).await
}

/// Retry while the API returns one of `codes`.
pub async fn retry_when_api_codes<T, F, Fut>(
    timeout: Duration,
    cancel: &CancellationToken,
    codes: &[&str],
    op: F,
) -> Result<T, ProviderError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, ProviderError>>,
{
    retry_when(timeout, cancel, op, |err| {
        err.api_error()
            .is_some_and(|api| codes.contains(&api.code.as_str()))
    })
    .await
}

/// Retry `service` propagation errors for up to [`PROPAGATION_TIMEOUT`].
pub async fn retry_on_propagation<T, F, Fut>(
    service: &str,
    cancel: &CancellationToken,
    op: F,
) -> Result<T, ProviderError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, ProviderError>>,
{
    let errors = ServiceErrors::for_service(service);
    retry_when(PROPAGATION_TIMEOUT, cancel, op, |err| {
        err.api_error().is_some_and(|api| errors.is_propagation(api))
    })
    .await
}

/// Retry whatever the classifier considers retryable during `phase`.
///
/// Propagation errors stop being retried once [`PROPAGATION_TIMEOUT`] has
/// passed, even if `timeout` is longer.
pub async fn retry_classified<T, F, Fut>(
    timeout: Duration,
    phase: Phase,
    cancel: &CancellationToken,
    op: F,
) -> Result<T, ProviderError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, ProviderError>>,
{
    retry_classified_for(ServiceErrors::generic(), timeout, phase, cancel, op).await
}

/// [`retry_classified`] with `service`'s own not-found and propagation
/// codes taken into account.
pub async fn retry_classified_for<T, F, Fut>(
    service: &ServiceErrors,
    timeout: Duration,
    phase: Phase,
    cancel: &CancellationToken,
    op: F,
) -> Result<T, ProviderError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, ProviderError>>,
{
    let start = Instant::now();
    retry_when(timeout, cancel, op, |err| match err.root() {
        ProviderError::NotFound(_) => phase == Phase::Settling,
        ProviderError::Api(api) if service.is_not_found(api) => phase == Phase::Settling,
        ProviderError::Api(api) if service.is_propagation(api) => {
            start.elapsed() < PROPAGATION_TIMEOUT
        }
        ProviderError::Api(api) => classify::classify(api).is_retryable(phase),
        _ => false,
    })
    .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    fn throttled() -> ProviderError {
        ProviderError::api("Throttling", "Rate exceeded")
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_until_success() {
        let calls = AtomicU32::new(0);
        let result = retry(Duration::from_secs(60), &CancellationToken::new(), || {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 3 {
                    Err(RetryError::retryable(throttled()))
                } else {
                    Ok("done")
                }
            }
        })
        .await
        .unwrap();

        assert_eq!(result, "done");
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_non_retryable_returns_immediately() {
        let calls = AtomicU32::new(0);
        let err = retry::<(), _, _>(Duration::from_secs(60), &CancellationToken::new(), || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(RetryError::non_retryable(ProviderError::api("AccessDenied", "no"))) }
        })
        .await
        .unwrap_err();

        assert_eq!(err.api_error().unwrap().code, "AccessDenied");
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_carries_last_error() {
        let start = Instant::now();
        let err = retry::<(), _, _>(Duration::from_secs(5), &CancellationToken::new(), || async {
            Err(RetryError::retryable(throttled()))
        })
        .await
        .unwrap_err();

        assert!(err.is_timeout());
        assert!(err.to_string().contains("last error: Throttling: Rate exceeded"));
        assert!(start.elapsed() >= Duration::from_secs(5));
        assert!(start.elapsed() < Duration::from_secs(6));
    }

    #[tokio::test(start_paused = true)]
    async fn test_final_attempt_after_deadline() {
        // Fails until the deadline has passed, then succeeds on the last try.
        let start = Instant::now();
        let result = retry(Duration::from_secs(3), &CancellationToken::new(), || {
            let late = start.elapsed() >= Duration::from_secs(3);
            async move {
                if late {
                    Ok(42)
                } else {
                    Err(RetryError::retryable(throttled()))
                }
            }
        })
        .await
        .unwrap();
        assert_eq!(result, 42);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancellation() {
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(2)).await;
            trigger.cancel();
        });

        let err = retry::<(), _, _>(Duration::from_secs(600), &cancel, || async {
            Err(RetryError::retryable(throttled()))
        })
        .await
        .unwrap_err();
        assert!(err.is_cancelled());
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_when_not_found() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();
        let result = retry_when_not_found(Duration::from_secs(60), &CancellationToken::new(), || {
            let n = counter.fetch_add(1, Ordering::SeqCst);
            async move {
                if n == 0 {
                    Err(ProviderError::api("InvalidVpcID.NotFound", "not yet"))
                } else {
                    Ok("vpc-1")
                }
            }
        })
        .await
        .unwrap();
        assert_eq!(result, "vpc-1");
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_when_api_codes() {
        let calls = AtomicU32::new(0);
        let err = retry_when_api_codes::<(), _, _>(
            Duration::from_secs(60),
            &CancellationToken::new(),
            &["InvalidParameterValue"],
            || {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    if n == 0 {
                        Err(ProviderError::api("InvalidParameterValue", "not ready"))
                    } else {
                        Err(ProviderError::api("ValidationError", "bad"))
                    }
                }
            },
        )
        .await
        .unwrap_err();
        assert_eq!(err.api_error().unwrap().code, "ValidationError");
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_on_propagation_is_bounded() {
        let start = Instant::now();
        let err = retry_on_propagation::<(), _, _>("iam", &CancellationToken::new(), || async {
            Err(ProviderError::api("MalformedPolicyDocument", "Invalid principal"))
        })
        .await
        .unwrap_err();
        assert!(err.is_timeout());
        assert!(start.elapsed() >= PROPAGATION_TIMEOUT);
        assert!(start.elapsed() < PROPAGATION_TIMEOUT + Duration::from_secs(1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_classified_by_phase() {
        let op = || async { Err::<(), _>(ProviderError::api("InvalidSubnetID.NotFound", "gone")) };

        let err = retry_classified(
            Duration::from_secs(10),
            Phase::Steady,
            &CancellationToken::new(),
            op,
        )
        .await
        .unwrap_err();
        assert!(err.is_not_found());

        let err = retry_classified(
            Duration::from_secs(10),
            Phase::Settling,
            &CancellationToken::new(),
            op,
        )
        .await
        .unwrap_err();
        assert!(err.is_timeout());
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_classified_uses_service_not_found_messages() {
        let elasticache = ServiceErrors::for_service("elasticache");
        let op = || async {
            Err::<(), _>(ProviderError::api(
                "InvalidParameterValue",
                "Cache cluster c-1 does not exist",
            ))
        };

        let err = retry_classified_for(
            elasticache,
            Duration::from_secs(10),
            Phase::Settling,
            &CancellationToken::new(),
            op,
        )
        .await
        .unwrap_err();
        assert!(err.is_timeout());

        // Without the table the same error is terminal on the first attempt.
        let err = retry_classified(
            Duration::from_secs(10),
            Phase::Settling,
            &CancellationToken::new(),
            op,
        )
        .await
        .unwrap_err();
        assert_eq!(err.api_error().unwrap().code, "InvalidParameterValue");
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_classified_propagation_window() {
        let start = Instant::now();
        let err = retry_classified(
            Duration::from_secs(20 * 60),
            Phase::Steady,
            &CancellationToken::new(),
            || async { Err::<(), _>(ProviderError::api("DependencyViolation", "in use")) },
        )
        .await
        .unwrap_err();
        // Once the window closes the propagation error is terminal.
        assert_eq!(err.api_error().unwrap().code, "DependencyViolation");
        assert!(!err.is_timeout());
        assert!(start.elapsed() >= PROPAGATION_TIMEOUT);
        assert!(start.elapsed() < Duration::from_secs(3 * 60));
    }
}
