//! Bounded retry with exponential backoff and jitter.

use std::time::Duration;

use rand::Rng;

use super::provider::DataError;

/// Retry policy for upstream calls: a fixed number of total attempts with
/// exponential backoff between them.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Total attempts, including the first (not "retries after").
    pub attempts: u32,
    /// Backoff base: attempt N waits `base_wait * 2^(N-1)` before retrying.
    pub base_wait: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 2,
            base_wait: Duration::from_millis(800),
        }
    }
}

impl RetryPolicy {
    pub fn new(attempts: u32, base_wait: Duration) -> Self {
        Self {
            attempts: attempts.max(1),
            base_wait,
        }
    }

    /// Backoff before retry number `attempt` (1-based): exponential in the
    /// attempt index plus uniform jitter in `[0, base_wait / 2]`.
    fn backoff(&self, attempt: u32) -> Duration {
        let exp = self.base_wait * 2u32.saturating_pow(attempt - 1);
        let jitter_cap = self.base_wait.as_secs_f64() * 0.5;
        let jitter = rand::thread_rng().gen_range(0.0..=jitter_cap);
        exp + Duration::from_secs_f64(jitter)
    }
}

/// Run `call` up to `policy.attempts` times, sleeping between attempts via
/// the injected `sleep`. Exhausting all attempts wraps the final error in
/// `DataError::RetriesExhausted`.
///
/// `sleep` is a parameter so tests can record the backoff schedule instead
/// of actually waiting; production call sites pass `std::thread::sleep`.
pub fn call_with_retry<T>(
    policy: &RetryPolicy,
    mut sleep: impl FnMut(Duration),
    mut call: impl FnMut() -> Result<T, DataError>,
) -> Result<T, DataError> {
    let mut last_error = None;
    for attempt in 1..=policy.attempts {
        match call() {
            Ok(value) => return Ok(value),
            Err(err) => {
                if attempt < policy.attempts {
                    sleep(policy.backoff(attempt));
                }
                last_error = Some(err);
            }
        }
    }
    Err(DataError::RetriesExhausted {
        attempts: policy.attempts,
        source: Box::new(last_error.unwrap_or_else(|| {
            DataError::ResponseFormat("retry loop ran zero attempts".into())
        })),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;

    #[test]
    fn first_attempt_success_never_sleeps() {
        let sleeps = RefCell::new(Vec::new());
        let result = call_with_retry(
            &RetryPolicy::new(3, Duration::from_millis(100)),
            |d| sleeps.borrow_mut().push(d),
            || Ok::<_, DataError>(42),
        );
        assert_eq!(result.unwrap(), 42);
        assert!(sleeps.borrow().is_empty());
    }

    #[test]
    fn succeeds_on_third_attempt_with_nondecreasing_backoff() {
        let sleeps = RefCell::new(Vec::new());
        let calls = RefCell::new(0u32);
        let result = call_with_retry(
            &RetryPolicy::new(3, Duration::from_millis(100)),
            |d| sleeps.borrow_mut().push(d),
            || {
                *calls.borrow_mut() += 1;
                if *calls.borrow() < 3 {
                    Err(DataError::NetworkUnreachable("connection reset".into()))
                } else {
                    Ok(7)
                }
            },
        );
        assert_eq!(result.unwrap(), 7);
        assert_eq!(*calls.borrow(), 3);

        let sleeps = sleeps.borrow();
        assert_eq!(sleeps.len(), 2);
        assert!(sleeps[0] <= sleeps[1], "backoff must not decrease");
        // Jitter is capped at base/2, so each sleep stays within its band.
        assert!(sleeps[0] >= Duration::from_millis(100));
        assert!(sleeps[0] <= Duration::from_millis(150));
        assert!(sleeps[1] >= Duration::from_millis(200));
        assert!(sleeps[1] <= Duration::from_millis(250));
    }

    #[test]
    fn exhaustion_wraps_final_error() {
        let result: Result<(), _> = call_with_retry(
            &RetryPolicy::new(2, Duration::from_millis(1)),
            |_| {},
            || Err(DataError::ResponseFormat("bad payload".into())),
        );
        match result.unwrap_err() {
            DataError::RetriesExhausted { attempts, source } => {
                assert_eq!(attempts, 2);
                assert!(source.to_string().contains("bad payload"));
            }
            other => panic!("expected RetriesExhausted, got {other}"),
        }
    }
}
