//! Retry loop: run a closure until success or policy says stop.

use crate::engine::EngineError;

use super::policy::{ErrorKind, RetryDecision, RetryPolicy};

/// Result of a retried operation plus how many attempts it took.
#[derive(Debug)]
pub struct RetryOutcome<T> {
    pub result: Result<T, EngineError>,
    pub attempts: u32,
}

/// Classify an engine error for retry decisions.
pub fn classify(e: &EngineError) -> ErrorKind {
    match e {
        EngineError::Unavailable(_) => ErrorKind::Permanent,
        EngineError::Init(_) | EngineError::Protocol(_) => ErrorKind::Transient,
        EngineError::Run(_) => ErrorKind::Permanent,
    }
}

/// Runs a closure until it succeeds or the retry policy says to stop.
/// On retryable failure, sleeps for the backoff duration then tries again.
pub fn run_with_retry<T, F>(policy: &RetryPolicy, mut f: F) -> RetryOutcome<T>
where
    F: FnMut() -> Result<T, EngineError>,
{
    let mut attempt = 1u32;
    loop {
        match f() {
            Ok(v) => {
                return RetryOutcome {
                    result: Ok(v),
                    attempts: attempt,
                }
            }
            Err(e) => match policy.decide(attempt, classify(&e)) {
                RetryDecision::NoRetry => {
                    return RetryOutcome {
                        result: Err(e),
                        attempts: attempt,
                    }
                }
                RetryDecision::RetryAfter(d) => {
                    tracing::warn!(attempt, delay_ms = d.as_millis() as u64, "retrying after: {}", e);
                    std::thread::sleep(d);
                    attempt += 1;
                }
            },
        }
    }
}
