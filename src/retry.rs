use crate::error::StepError;
use std::time::Duration;
use tracing::{debug, warn};

type ShouldRetry = Box<dyn Fn(&StepError, u32) -> bool + Send + Sync>;
type GetDelay = Box<dyn Fn(u32) -> Duration + Send + Sync>;
type OnRetry = Box<dyn Fn(u32, &StepError) + Send + Sync>;

#[derive(Debug, Clone, PartialEq)]
pub struct RetryOptions {
    /// Total attempts, including the first one.
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub exponential: bool,
}

impl RetryOptions {
    pub fn new(max_retries: u32, base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_retries,
            base_delay,
            max_delay,
            exponential: true,
        }
    }

    /// Wait `base_delay` between every attempt.
    pub fn flat(mut self) -> Self {
        self.exponential = false;
        self
    }
}

/// Partial override for [`RetryPolicy::set_strategy`]. Unset fields keep the
/// current behavior.
#[derive(Default)]
pub struct RetryStrategy {
    pub should_retry: Option<ShouldRetry>,
    pub get_delay: Option<GetDelay>,
}

impl RetryStrategy {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn should_retry(mut self, f: impl Fn(&StepError, u32) -> bool + Send + Sync + 'static) -> Self {
        self.should_retry = Some(Box::new(f));
        self
    }

    pub fn get_delay(mut self, f: impl Fn(u32) -> Duration + Send + Sync + 'static) -> Self {
        self.get_delay = Some(Box::new(f));
        self
    }
}

/// Bounded retries with backoff for transient collaborator failures.
///
/// By default only [`StepError::is_retryable`] errors are retried, and the
/// wait grows as `base_delay * 2^(attempt-1)` capped at `max_delay`.
pub struct RetryPolicy {
    options: RetryOptions,
    should_retry: ShouldRetry,
    get_delay: GetDelay,
    on_retry: Option<OnRetry>,
}

impl RetryPolicy {
    pub fn new(options: RetryOptions) -> Self {
        let max_retries = options.max_retries;
        let RetryOptions {
            base_delay,
            max_delay,
            exponential,
            ..
        } = options.clone();

        Self {
            options,
            should_retry: Box::new(move |err, attempt| err.is_retryable() && attempt < max_retries),
            get_delay: Box::new(move |attempt| {
                if exponential {
                    let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
                    base_delay.saturating_mul(factor).min(max_delay)
                } else {
                    base_delay
                }
            }),
            on_retry: None,
        }
    }

    /// Register a callback that fires before each wait, with the attempt
    /// number that just failed.
    pub fn on_retry(mut self, cb: impl Fn(u32, &StepError) + Send + Sync + 'static) -> Self {
        self.on_retry = Some(Box::new(cb));
        self
    }

    pub fn set_strategy(&mut self, strategy: RetryStrategy) {
        if let Some(f) = strategy.should_retry {
            self.should_retry = f;
        }
        if let Some(f) = strategy.get_delay {
            self.get_delay = f;
        }
    }

    pub fn options(&self) -> &RetryOptions {
        &self.options
    }

    /// Delay the current strategy would wait after `attempt` failed.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        (self.get_delay)(attempt)
    }

    /// Run `op` until it succeeds, the strategy declines, or attempts run
    /// out. The last error is returned as-is.
    pub fn execute<T>(
        &self,
        mut op: impl FnMut() -> Result<T, StepError>,
    ) -> Result<T, StepError> {
        let max_attempts = self.options.max_retries.max(1);
        let mut attempt = 0;

        loop {
            let err = match op() {
                Ok(value) => return Ok(value),
                Err(err) => err,
            };
            attempt += 1;

            if attempt >= max_attempts || !(self.should_retry)(&err, attempt) {
                warn!(attempt, error = %err, "giving up");
                return Err(err);
            }

            let delay = (self.get_delay)(attempt);
            debug!(attempt, ?delay, error = %err, "retrying");
            if let Some(cb) = &self.on_retry {
                cb(attempt, &err);
            }
            std::thread::sleep(delay);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    fn options(max: u32) -> RetryOptions {
        RetryOptions::new(max, Duration::from_millis(1), Duration::from_millis(5))
    }

    #[test]
    fn succeeds_first_try() {
        let policy = RetryPolicy::new(options(3));
        let mut calls = 0;
        let out = policy.execute(|| {
            calls += 1;
            Ok::<_, StepError>(7)
        });
        assert_eq!(out.unwrap(), 7);
        assert_eq!(calls, 1);
    }

    #[test]
    fn permanent_network_failure_exhausts_attempts() {
        let retries = Arc::new(Mutex::new(Vec::new()));
        let retries_clone = Arc::clone(&retries);
        let policy = RetryPolicy::new(options(3)).on_retry(move |attempt, _err| {
            retries_clone.lock().unwrap().push(attempt);
        });

        let mut calls = 0;
        let err = policy
            .execute(|| -> Result<(), StepError> {
                calls += 1;
                Err(StepError::network("connection reset"))
            })
            .unwrap_err();

        assert_eq!(calls, 3);
        assert_eq!(err, StepError::network("connection reset"));
        assert_eq!(*retries.lock().unwrap(), vec![1, 2]);
    }

    #[test]
    fn recovers_after_transient_failure() {
        let policy = RetryPolicy::new(options(3));
        let mut calls = 0;
        let out = policy.execute(|| {
            calls += 1;
            if calls == 1 {
                Err(StepError::other("request timeout"))
            } else {
                Ok("done")
            }
        });
        assert_eq!(out.unwrap(), "done");
        assert_eq!(calls, 2);
    }

    #[test]
    fn non_transient_error_is_not_retried() {
        let fired = Arc::new(Mutex::new(0));
        let fired_clone = Arc::clone(&fired);
        let policy = RetryPolicy::new(options(5)).on_retry(move |_, _| {
            *fired_clone.lock().unwrap() += 1;
        });

        let mut calls = 0;
        let err = policy
            .execute(|| -> Result<(), StepError> {
                calls += 1;
                Err(StepError::invalid("bad request"))
            })
            .unwrap_err();

        assert_eq!(calls, 1);
        assert_eq!(err, StepError::invalid("bad request"));
        assert_eq!(*fired.lock().unwrap(), 0);
    }

    #[test]
    fn zero_max_retries_still_attempts_once() {
        let policy = RetryPolicy::new(options(0));
        let mut calls = 0;
        let _ = policy.execute(|| -> Result<(), StepError> {
            calls += 1;
            Err(StepError::network("x"))
        });
        assert_eq!(calls, 1);
    }

    // --- delays ---

    #[test]
    fn exponential_delay_is_capped() {
        let policy = RetryPolicy::new(RetryOptions::new(
            10,
            Duration::from_millis(100),
            Duration::from_millis(1000),
        ));
        assert_eq!(policy.delay_for(1), Duration::from_millis(100));
        assert_eq!(policy.delay_for(2), Duration::from_millis(200));
        assert_eq!(policy.delay_for(3), Duration::from_millis(400));
        assert_eq!(policy.delay_for(5), Duration::from_millis(1000));
    }

    #[test]
    fn flat_delay() {
        let policy = RetryPolicy::new(
            RetryOptions::new(10, Duration::from_millis(100), Duration::from_millis(1000)).flat(),
        );
        assert_eq!(policy.delay_for(1), Duration::from_millis(100));
        assert_eq!(policy.delay_for(4), Duration::from_millis(100));
    }

    // --- set_strategy ---

    #[test]
    fn strategy_override_is_partial() {
        let mut policy = RetryPolicy::new(RetryOptions::new(
            4,
            Duration::from_millis(100),
            Duration::from_millis(1000),
        ));
        policy.set_strategy(RetryStrategy::new().should_retry(|_, _| true));

        // delay function untouched
        assert_eq!(policy.delay_for(2), Duration::from_millis(200));

        policy.set_strategy(RetryStrategy::new().get_delay(|_| Duration::ZERO));
        let mut calls = 0;
        let _ = policy.execute(|| -> Result<(), StepError> {
            calls += 1;
            Err(StepError::invalid("normally fatal"))
        });
        assert_eq!(calls, 4);
    }
}
