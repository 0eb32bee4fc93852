//! Bounded retries and polling for the lifecycle handlers.
//!
//! One budget covers the whole invocation, cloud calls included, so the
//! handler always has time left to answer the response URL.

use std::cell::Cell;
use std::time::{Duration, Instant};

use backon::{BackoffBuilder, ExponentialBackoff, ExponentialBuilder};
use serde_json::json;

use crate::error::{CloudError, HandlerError};
use crate::logging::log_handler_info;

/// Lambda timeout configured on the function.
pub const INVOCATION_TIMEOUT: Duration = Duration::from_secs(600);
/// Time kept back for sending the response.
pub const RESPONSE_RESERVE: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    pub min_delay: Duration,
    pub max_delay: Duration,
    pub max_attempts: usize,
    pub poll_interval: Duration,
    pub budget: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            min_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(20),
            max_attempts: 8,
            poll_interval: Duration::from_secs(5),
            budget: INVOCATION_TIMEOUT - RESPONSE_RESERVE,
        }
    }
}

impl RetryPolicy {
    /// Default policy with the budget cut to what is left of the invocation.
    pub fn for_remaining(remaining: Duration) -> Self {
        Self {
            budget: remaining.saturating_sub(RESPONSE_RESERVE),
            ..Self::default()
        }
    }

    fn backoff(&self) -> ExponentialBackoff {
        ExponentialBuilder::default()
            .with_min_delay(self.min_delay)
            .with_max_delay(self.max_delay)
            .with_factor(2.0)
            .with_max_times(self.max_attempts)
            .build()
    }
}

pub trait Sleeper {
    fn sleep(&self, duration: Duration);
}

/// Blocks the worker thread; handlers run synchronously inside the Lambda
/// runtime's multi-threaded executor.
pub struct ThreadSleeper;

impl Sleeper for ThreadSleeper {
    fn sleep(&self, duration: Duration) {
        tokio::task::block_in_place(|| std::thread::sleep(duration));
    }
}

pub struct Retrier<'a> {
    policy: RetryPolicy,
    sleeper: &'a dyn Sleeper,
    started: Instant,
    slept: Cell<Duration>,
}

impl<'a> Retrier<'a> {
    pub fn new(policy: RetryPolicy, sleeper: &'a dyn Sleeper) -> Self {
        Self {
            policy,
            sleeper,
            started: Instant::now(),
            slept: Cell::new(Duration::ZERO),
        }
    }

    /// Wall-clock time since construction, or the sleeps charged so far when
    /// those are larger (a sleeper that does not block).
    pub fn spent(&self) -> Duration {
        self.started.elapsed().max(self.slept.get())
    }

    pub fn remaining(&self) -> Duration {
        self.policy.budget.saturating_sub(self.spent())
    }

    fn sleep(&self, duration: Duration) {
        self.sleeper.sleep(duration);
        self.slept.set(self.slept.get() + duration);
    }

    /// Fixed wait, e.g. for IAM changes to propagate.
    pub fn pause(&self, reason: &str, duration: Duration) -> Result<(), HandlerError> {
        if duration > self.remaining() {
            return Err(HandlerError::Timeout(reason.to_string()));
        }
        log_handler_info(
            "pause",
            json!({
                "reason": reason,
                "duration_ms": duration.as_millis(),
            }),
        );
        self.sleep(duration);
        Ok(())
    }

    /// Runs `call`, retrying transient failures with exponential backoff
    /// until it succeeds, fails permanently, or the attempts or budget run
    /// out. The last error is returned in the latter case.
    pub fn run<T>(
        &self,
        operation: &str,
        mut call: impl FnMut() -> Result<T, CloudError>,
    ) -> Result<T, CloudError> {
        let mut delays = self.policy.backoff();
        loop {
            match call() {
                Ok(value) => return Ok(value),
                Err(error) if error.is_transient() => {
                    let Some(delay) = delays.next() else {
                        return Err(error);
                    };
                    if delay > self.remaining() {
                        return Err(error);
                    }
                    log_handler_info(
                        "retrying",
                        json!({
                            "operation": operation,
                            "error": error.to_string(),
                            "delay_ms": delay.as_millis(),
                        }),
                    );
                    self.sleep(delay);
                }
                Err(error) => return Err(error),
            }
        }
    }

    /// Polls `probe` every poll interval until it reports `true`.
    pub fn wait_until(
        &self,
        description: &str,
        mut probe: impl FnMut() -> Result<bool, CloudError>,
    ) -> Result<(), HandlerError> {
        loop {
            if self.run(description, &mut probe)? {
                return Ok(());
            }
            let interval = self.policy.poll_interval;
            if interval > self.remaining() {
                return Err(HandlerError::Timeout(description.to_string()));
            }
            self.sleep(interval);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use crate::error::CloudErrorKind;

    use super::*;

    struct RecordingSleeper {
        sleeps: Mutex<Vec<Duration>>,
    }

    impl RecordingSleeper {
        fn new() -> Self {
            Self {
                sleeps: Mutex::new(Vec::new()),
            }
        }

        fn sleeps(&self) -> Vec<Duration> {
            self.sleeps.lock().expect("poisoned mutex").clone()
        }
    }

    impl Sleeper for RecordingSleeper {
        fn sleep(&self, duration: Duration) {
            self.sleeps.lock().expect("poisoned mutex").push(duration);
        }
    }

    fn throttled() -> CloudError {
        CloudError::new(CloudErrorKind::Throttled, "CreateTable", "slow down")
    }

    #[test]
    fn retries_transient_errors_with_growing_delays() {
        let sleeper = RecordingSleeper::new();
        let retrier = Retrier::new(RetryPolicy::default(), &sleeper);
        let mut calls = 0;

        let value = retrier
            .run("CreateTable", || {
                calls += 1;
                if calls < 4 {
                    Err(throttled())
                } else {
                    Ok(calls)
                }
            })
            .expect("eventually succeeds");

        assert_eq!(value, 4);
        let sleeps = sleeper.sleeps();
        assert_eq!(sleeps.len(), 3);
        assert!(sleeps.windows(2).all(|pair| pair[0] <= pair[1]));
        assert_eq!(retrier.spent(), sleeps.iter().sum::<Duration>());
    }

    #[test]
    fn permanent_errors_are_not_retried() {
        let sleeper = RecordingSleeper::new();
        let retrier = Retrier::new(RetryPolicy::default(), &sleeper);

        let error = retrier
            .run::<()>("DeleteTable", || {
                Err(CloudError::new(CloudErrorKind::Other, "DeleteTable", "denied"))
            })
            .expect_err("fails");
        assert_eq!(error.kind, CloudErrorKind::Other);
        assert!(sleeper.sleeps().is_empty());
    }

    #[test]
    fn budget_stops_retries() {
        let sleeper = RecordingSleeper::new();
        let policy = RetryPolicy {
            budget: Duration::from_secs(2),
            max_attempts: 100,
            ..RetryPolicy::default()
        };
        let retrier = Retrier::new(policy, &sleeper);

        let error = retrier
            .run::<()>("CreatePipeline", || Err(throttled()))
            .expect_err("budget exhausted");
        assert_eq!(error.kind, CloudErrorKind::Throttled);
        assert!(retrier.spent() <= Duration::from_secs(2));
    }

    #[test]
    fn wait_until_polls_and_times_out() {
        let sleeper = RecordingSleeper::new();
        let retrier = Retrier::new(RetryPolicy::default(), &sleeper);
        let mut polls = 0;
        retrier
            .wait_until("table to become active", || {
                polls += 1;
                Ok(polls == 3)
            })
            .expect("becomes ready");
        assert_eq!(sleeper.sleeps(), vec![Duration::from_secs(5); 2]);

        let short = Retrier::new(
            RetryPolicy {
                budget: Duration::from_secs(12),
                ..RetryPolicy::default()
            },
            &sleeper,
        );
        let error = short
            .wait_until("pipeline deletion", || Ok(false))
            .expect_err("never ready");
        assert!(matches!(error, HandlerError::Timeout(ref what) if what == "pipeline deletion"));
        assert!(short.remaining() < Duration::from_secs(5));
    }

    #[test]
    fn time_inside_calls_counts_against_budget() {
        let sleeper = RecordingSleeper::new();
        let policy = RetryPolicy {
            min_delay: Duration::from_millis(1),
            budget: Duration::from_millis(50),
            ..RetryPolicy::default()
        };
        let retrier = Retrier::new(policy, &sleeper);

        let error = retrier
            .run::<()>("CreatePipeline", || {
                std::thread::sleep(Duration::from_millis(80));
                Err(throttled())
            })
            .expect_err("budget spent inside the call");
        assert_eq!(error.kind, CloudErrorKind::Throttled);
        assert!(sleeper.sleeps().is_empty());
        assert_eq!(retrier.remaining(), Duration::ZERO);
        assert!(retrier.spent() >= Duration::from_millis(80));
    }

    #[test]
    fn remaining_budget_leaves_room_for_response() {
        let policy = RetryPolicy::for_remaining(Duration::from_secs(100));
        assert_eq!(policy.budget, Duration::from_secs(70));
        assert_eq!(
            RetryPolicy::for_remaining(Duration::from_secs(10)).budget,
            Duration::ZERO
        );
    }
}
