//! State-change waiters.
//!
//! Most AWS mutations are asynchronous: the API accepts the request and the
//! object then moves through a series of statuses (`pending`, `creating`,
//! `available`, ...). A [`StateChangeConf`] polls a refresh function with
//! exponential backoff until the status lands in the target set, and turns
//! everything else (timeouts, unexpected statuses, repeated not-found,
//! cancellation) into a [`ProviderError`]. Throttled or conflicting refreshes
//! are polled again until the deadline.

use std::future::Future;
use std::time::Duration;

use rand::Rng;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use crate::classify::{self, ErrorClass};
use crate::error::ProviderError;
use crate::timeouts::deadline_after;

/// First poll interval before backoff.
pub const INITIAL_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Upper bound for the poll interval.
pub const MAX_POLL_INTERVAL: Duration = Duration::from_secs(10);

/// Fraction of the poll interval added as random jitter, at most.
const JITTER: f64 = 0.1;

/// The outcome of one refresh: `None` when the object does not exist,
/// otherwise the object and its status.
pub type Refreshed<T> = Option<(T, String)>;

/// Configuration for waiting on a status transition.
#[derive(Debug, Clone)]
pub struct StateChangeConf<F> {
    what: String,
    pending: Vec<String>,
    target: Vec<String>,
    refresh: F,
    timeout: Duration,
    min_timeout: Duration,
    delay: Duration,
    not_found_checks: u32,
    continuous_target_occurence: u32,
    not_found_is_target: bool,
}

impl<F> StateChangeConf<F> {
    /// Wait on `what` (used in errors and logs) using `refresh`.
    pub fn new(what: impl Into<String>, refresh: F) -> Self {
        Self {
            what: what.into(),
            pending: Vec::new(),
            target: Vec::new(),
            refresh,
            timeout: crate::timeouts::DEFAULT_TIMEOUT,
            min_timeout: Duration::ZERO,
            delay: Duration::ZERO,
            not_found_checks: 20,
            continuous_target_occurence: 1,
            not_found_is_target: false,
        }
    }

    /// Statuses that mean "keep waiting". When empty, any non-target status
    /// is tolerated.
    pub fn pending(mut self, states: &[&str]) -> Self {
        self.pending = states.iter().map(|s| s.to_string()).collect();
        self
    }

    /// Statuses that end the wait successfully.
    pub fn target(mut self, states: &[&str]) -> Self {
        self.target = states.iter().map(|s| s.to_string()).collect();
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Minimum interval between polls.
    pub fn min_timeout(mut self, min_timeout: Duration) -> Self {
        self.min_timeout = min_timeout;
        self
    }

    /// Delay before the first poll.
    pub fn delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Consecutive not-found results tolerated before giving up.
    pub fn not_found_checks(mut self, checks: u32) -> Self {
        self.not_found_checks = checks;
        self
    }

    /// Consecutive target observations required. 0 is treated as 1.
    pub fn continuous_target_occurence(mut self, occurrences: u32) -> Self {
        self.continuous_target_occurence = occurrences.max(1);
        self
    }

    /// Treat not-found as reaching the target (deletion waits).
    pub fn not_found_is_target(mut self) -> Self {
        self.not_found_is_target = true;
        self
    }

    /// Poll until the target is reached.
    ///
    /// Returns the object from the final refresh, or `None` when the wait
    /// ended because the object is gone and that counts as the target.
    pub async fn wait_for_state<T, Fut>(
        &self,
        cancel: &CancellationToken,
    ) -> Result<Option<T>, ProviderError>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<Refreshed<T>, ProviderError>>,
    {
        let deadline = deadline_after(self.timeout);
        let not_found_is_target = self.not_found_is_target || self.target.is_empty();
        let mut wait = INITIAL_POLL_INTERVAL;
        let mut not_found_tick = 0u32;
        let mut target_occurence = 0u32;
        let mut last_state: Option<String> = None;

        debug!(what = %self.what, pending = ?self.pending, target = ?self.target, "waiting for state");

        if !self.delay.is_zero() {
            sleep_or_cancel(self.delay.min(self.timeout), cancel, &self.what).await?;
        }

        loop {
            if cancel.is_cancelled() {
                return Err(cancelled(&self.what));
            }
            if Instant::now() >= deadline {
                return Err(ProviderError::timeout(self.what.clone(), last_state));
            }

            match (self.refresh)().await {
                Err(e) if is_transient(&e) => {
                    target_occurence = 0;
                    debug!(what = %self.what, error = %e, "transient refresh error, polling again");
                }
                Err(e) => return Err(e),
                Ok(None) => {
                    target_occurence = 0;
                    if not_found_is_target {
                        debug!(what = %self.what, "object is gone");
                        return Ok(None);
                    }
                    not_found_tick += 1;
                    if not_found_tick > self.not_found_checks {
                        return Err(ProviderError::NotFound(format!(
                            "couldn't find {} ({} retries)",
                            self.what, self.not_found_checks
                        )));
                    }
                    trace!(what = %self.what, not_found_tick, "object not found yet");
                }
                Ok(Some((value, state))) => {
                    not_found_tick = 0;
                    trace!(what = %self.what, state = %state, "refreshed");

                    if self.target.contains(&state) {
                        target_occurence += 1;
                        if target_occurence >= self.continuous_target_occurence {
                            debug!(what = %self.what, state = %state, "reached target state");
                            return Ok(Some(value));
                        }
                    } else if self.pending.is_empty() || self.pending.contains(&state) {
                        target_occurence = 0;
                    } else {
                        return Err(ProviderError::UnexpectedState {
                            state,
                            expected: self.target.clone(),
                        });
                    }
                    last_state = Some(state);
                }
            }

            let remaining = deadline.saturating_duration_since(Instant::now());
            let interval = self.poll_interval(wait);
            if target_occurence == 0 {
                wait = wait.saturating_mul(2).min(MAX_POLL_INTERVAL);
            }
            sleep_or_cancel(interval.min(remaining), cancel, &self.what).await?;
        }
    }

    fn poll_interval(&self, wait: Duration) -> Duration {
        with_jitter(wait.min(MAX_POLL_INTERVAL).max(self.min_timeout))
    }
}

/// Refresh errors worth another poll rather than ending the wait.
fn is_transient(err: &ProviderError) -> bool {
    err.api_error().is_some_and(|api| {
        matches!(
            classify::classify(api),
            ErrorClass::Throttling | ErrorClass::ConcurrentModification
        )
    })
}

/// Add up to 10% random jitter to `base`.
pub(crate) fn with_jitter(base: Duration) -> Duration {
    let jitter = rand::thread_rng().gen_range(0.0..=JITTER);
    base + base.mul_f64(jitter)
}

/// Wait until `refresh` reports the object gone.
///
/// Any status the object reports while it still exists is tolerated.
pub async fn wait_until_deleted<T, F, Fut>(
    what: &str,
    refresh: F,
    timeout: Duration,
    cancel: &CancellationToken,
) -> Result<(), ProviderError>
where
    F: Fn() -> Fut,
    Fut: Future<Output = Result<Refreshed<T>, ProviderError>>,
{
    StateChangeConf::new(what, refresh)
        .timeout(timeout)
        .not_found_is_target()
        .wait_for_state(cancel)
        .await
        .map(|_| ())
}

fn cancelled(what: &str) -> ProviderError {
    ProviderError::Cancelled(format!("wait for {} cancelled", what))
}

/// Sleep for `duration` unless `cancel` fires first.
pub(crate) async fn sleep_or_cancel(
    duration: Duration,
    cancel: &CancellationToken,
    what: &str,
) -> Result<(), ProviderError> {
    tokio::select! {
        _ = tokio::time::sleep(duration) => Ok(()),
        _ = cancel.cancelled() => Err(cancelled(what)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::{Arc, Mutex};

    type Step = Result<Refreshed<&'static str>, ProviderError>;

    /// A refresh function replaying `steps`, repeating the last one forever.
    fn scripted(
        steps: Vec<Step>,
    ) -> (
        Arc<Mutex<u32>>,
        impl Fn() -> std::future::Ready<Step>,
    ) {
        let calls = Arc::new(Mutex::new(0u32));
        let queue = Arc::new(Mutex::new(VecDeque::from(steps)));
        let counter = calls.clone();
        let refresh = move || {
            *counter.lock().unwrap() += 1;
            let mut queue = queue.lock().unwrap();
            let step = match queue.front() {
                Some(Ok(v)) if queue.len() == 1 => Ok(v.clone()),
                _ => queue.pop_front().expect("refresh called after terminal step"),
            };
            std::future::ready(step)
        };
        (calls, refresh)
    }

    fn status(s: &'static str) -> Step {
        Ok(Some((s, s.to_string())))
    }

    #[tokio::test(start_paused = true)]
    async fn test_not_found_tolerance_then_target() {
        let (calls, refresh) = scripted(vec![
            Ok(None),
            Ok(None),
            Ok(None),
            status("pending"),
            status("pending"),
            status("available"),
        ]);

        let result = StateChangeConf::new("instance i-1", refresh)
            .pending(&["pending"])
            .target(&["available"])
            .not_found_checks(3)
            .timeout(Duration::from_secs(60))
            .wait_for_state(&CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(result, Some("available"));
        assert_eq!(*calls.lock().unwrap(), 6);
    }

    #[tokio::test(start_paused = true)]
    async fn test_not_found_budget_exhausted() {
        let (_, refresh) = scripted(vec![Ok(None)]);
        let err = StateChangeConf::new("instance i-1", refresh)
            .pending(&["pending"])
            .target(&["available"])
            .not_found_checks(2)
            .wait_for_state(&CancellationToken::new())
            .await
            .unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test(start_paused = true)]
    async fn test_throttled_refresh_keeps_polling() {
        let (calls, refresh) = scripted(vec![
            status("pending"),
            Err(ProviderError::api("Throttling", "Rate exceeded")),
            Err(ProviderError::api("ConcurrentModificationException", "A conflicting operation is in progress")),
            status("available"),
        ]);

        let result = StateChangeConf::new("bucket b-1", refresh)
            .pending(&["pending"])
            .target(&["available"])
            .wait_for_state(&CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(result, Some("available"));
        assert_eq!(*calls.lock().unwrap(), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_carries_last_state() {
        let (_, refresh) = scripted(vec![status("pending")]);
        let start = Instant::now();
        let err = StateChangeConf::new("volume vol-1", refresh)
            .pending(&["pending"])
            .target(&["available"])
            .timeout(Duration::from_secs(30))
            .wait_for_state(&CancellationToken::new())
            .await
            .unwrap_err();

        assert!(err.is_timeout());
        assert!(err.to_string().contains("last state: 'pending'"));
        assert!(start.elapsed() >= Duration::from_secs(30));
        assert!(start.elapsed() < Duration::from_secs(31));
    }

    #[tokio::test(start_paused = true)]
    async fn test_terminates_within_one_poll_interval() {
        let (_, refresh) = scripted(vec![
            status("pending"),
            status("pending"),
            status("pending"),
            status("available"),
        ]);
        let start = Instant::now();
        StateChangeConf::new("db", refresh)
            .pending(&["pending"])
            .target(&["available"])
            .wait_for_state(&CancellationToken::new())
            .await
            .unwrap();
        // 100ms + 200ms + 400ms of polling, each with at most 10% jitter.
        assert!(start.elapsed() <= Duration::from_millis(770));
    }

    #[tokio::test(start_paused = true)]
    async fn test_unexpected_state() {
        let (_, refresh) = scripted(vec![status("pending"), status("failed")]);
        let err = StateChangeConf::new("db", refresh)
            .pending(&["pending"])
            .target(&["available"])
            .wait_for_state(&CancellationToken::new())
            .await
            .unwrap_err();
        match err {
            ProviderError::UnexpectedState { state, expected } => {
                assert_eq!(state, "failed");
                assert_eq!(expected, vec!["available".to_string()]);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_continuous_target_occurence_resets_on_flap() {
        let (calls, refresh) = scripted(vec![
            status("available"),
            status("pending"),
            status("available"),
            status("available"),
            status("available"),
        ]);
        StateChangeConf::new("cluster", refresh)
            .pending(&["pending"])
            .target(&["available"])
            .continuous_target_occurence(3)
            .wait_for_state(&CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(*calls.lock().unwrap(), 5);
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_occurence_still_requires_target() {
        let (calls, refresh) = scripted(vec![status("pending"), status("available")]);
        StateChangeConf::new("cluster", refresh)
            .pending(&["pending"])
            .target(&["available"])
            .continuous_target_occurence(0)
            .wait_for_state(&CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(*calls.lock().unwrap(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_until_deleted() {
        let (_, refresh) = scripted(vec![status("deleting"), status("deleting"), Ok(None)]);
        wait_until_deleted("bucket b", refresh, Duration::from_secs(60), &CancellationToken::new())
            .await
            .unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_refresh_error_is_terminal() {
        let (calls, refresh) = scripted(vec![
            status("pending"),
            Err(ProviderError::api("AccessDenied", "no")),
        ]);
        let err = StateChangeConf::new("db", refresh)
            .pending(&["pending"])
            .target(&["available"])
            .wait_for_state(&CancellationToken::new())
            .await
            .unwrap_err();
        assert_eq!(err.api_error().map(|e| e.code.as_str()), Some("AccessDenied"));
        assert_eq!(*calls.lock().unwrap(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancellation_interrupts_sleep() {
        let (_, refresh) = scripted(vec![status("pending")]);
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(5)).await;
            trigger.cancel();
        });

        let start = Instant::now();
        let err = StateChangeConf::new("db", refresh)
            .pending(&["pending"])
            .target(&["available"])
            .timeout(Duration::from_secs(600))
            .wait_for_state(&cancel)
            .await
            .unwrap_err();
        assert!(err.is_cancelled());
        assert!(start.elapsed() < Duration::from_secs(6));
    }

    #[tokio::test(start_paused = true)]
    async fn test_min_timeout_floors_interval() {
        let (_, refresh) = scripted(vec![status("pending"), status("available")]);
        let start = Instant::now();
        StateChangeConf::new("db", refresh)
            .pending(&["pending"])
            .target(&["available"])
            .min_timeout(Duration::from_secs(5))
            .wait_for_state(&CancellationToken::new())
            .await
            .unwrap();
        assert!(start.elapsed() >= Duration::from_secs(5));
    }
}
