//! Retry and backoff policy for engine loads.
//!
//! Loading weights can fail transiently (driver hiccup, worker crash during
//! start-up) or permanently (checkpoint missing). This module classifies
//! engine errors and decides backoff so the arbiter retries only the former.

mod policy;
mod run;

pub use policy::{ErrorKind, RetryDecision, RetryPolicy};
pub use run::{classify, run_with_retry, RetryOutcome};
