//! Retry and backoff policy.
//!
//! This module encapsulates error classification (timeouts, throttling,
//! connection failures) and backoff decisions so that the notifier and the
//! result reconciler share a consistent policy.

mod classify;
mod error;
mod policy;
mod run;

pub use classify::{classify_curl_error, classify_delivery, classify_http_status};
pub use error::DeliveryError;
pub use policy::{ErrorKind, RetryDecision, RetryPolicy};
pub use run::run_with_retry;
