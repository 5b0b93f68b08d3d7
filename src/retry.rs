//! Bounded retry around a single adapter call.

use std::time::Duration;

use crate::error::KiraError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            backoff: Duration::from_secs(3),
        }
    }
}

#[derive(Debug)]
pub enum RetryOutcome<T> {
    Completed { value: T, attempts: u32 },
    /// Every attempt failed transiently; the caller skips the word.
    Exhausted { attempts: u32, last_error: KiraError },
}

impl<T> RetryOutcome<T> {
    pub fn is_exhausted(&self) -> bool {
        matches!(self, RetryOutcome::Exhausted { .. })
    }

    pub fn attempts(&self) -> u32 {
        match self {
            RetryOutcome::Completed { attempts, .. } | RetryOutcome::Exhausted { attempts, .. } => {
                *attempts
            }
        }
    }

    pub fn into_value(self) -> Option<T> {
        match self {
            RetryOutcome::Completed { value, .. } => Some(value),
            RetryOutcome::Exhausted { .. } => None,
        }
    }
}

/// Runs `call` until it succeeds, fails non-transiently, or `max_attempts`
/// transient failures in a row have been seen.
///
/// Non-transient errors are returned as `Err` without another attempt. Exhaustion
/// is not an error: it comes back as [`RetryOutcome::Exhausted`].
pub fn run_with_retry<T>(
    policy: &RetryPolicy,
    mut call: impl FnMut() -> Result<T, KiraError>,
) -> Result<RetryOutcome<T>, KiraError> {
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 0u32;
    loop {
        attempt += 1;
        match call() {
            Ok(value) => {
                return Ok(RetryOutcome::Completed {
                    value,
                    attempts: attempt,
                });
            }
            Err(err) if err.is_transient() => {
                tracing::warn!("attempt {attempt}/{max_attempts} failed: {err}");
                if attempt >= max_attempts {
                    return Ok(RetryOutcome::Exhausted {
                        attempts: attempt,
                        last_error: err,
                    });
                }
                std::thread::sleep(policy.backoff);
            }
            Err(err) => return Err(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    fn quick(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            backoff: Duration::ZERO,
        }
    }

    #[test]
    fn always_transient_exhausts_after_max_attempts() {
        let mut calls = 0;
        let outcome = run_with_retry::<()>(&quick(3), || {
            calls += 1;
            Err(KiraError::TransientNetwork("connection reset".to_string()))
        })
        .unwrap();
        assert_eq!(calls, 3);
        assert!(outcome.is_exhausted());
        assert_eq!(outcome.attempts(), 3);
    }

    #[test]
    fn recovers_after_transient_failures() {
        let mut calls = 0;
        let outcome = run_with_retry(&quick(5), || {
            calls += 1;
            if calls < 3 {
                Err(KiraError::TransientNetwork("timeout".to_string()))
            } else {
                Ok(calls)
            }
        })
        .unwrap();
        assert_eq!(outcome.attempts(), 3);
        assert_eq!(outcome.into_value(), Some(3));
    }

    #[test]
    fn fatal_errors_are_not_retried() {
        let mut calls = 0;
        let result = run_with_retry::<()>(&quick(5), || {
            calls += 1;
            Err(KiraError::MalformedResponse {
                source_name: "PRIDE".to_string(),
                message: "expected object".to_string(),
            })
        });
        assert_eq!(calls, 1);
        assert_matches!(result, Err(KiraError::MalformedResponse { .. }));
    }
}
