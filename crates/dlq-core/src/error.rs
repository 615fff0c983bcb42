//! Error types surfaced by the queue API.

use thiserror::Error;

/// Why a request was not admitted. The `Display` text is shown to the submitter.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Rejection {
    #[error("site {site} does not support format {format}")]
    Unroutable { site: String, format: String },
    #[error("site {0} is not active")]
    SiteInactive(String),
    #[error("no proxy available for site {0}")]
    NoProxy(String),
    #[error("queue for group {0} is full, try later")]
    GroupFull(String),
    #[error("queue for site {0} is full, try later")]
    SiteFull(String),
    #[error("you already have too many queued downloads for {0}")]
    UserFull(String),
    #[error("this download is already queued or running")]
    Duplicate,
    #[error("invalid request: {0}")]
    Invalid(String),
}

/// Failure of a queue operation.
#[derive(Debug, Error)]
pub enum QueueError {
    /// Not admitted; not retried by the system.
    #[error(transparent)]
    Rejected(#[from] Rejection),
    /// Infrastructure is temporarily unavailable; the caller may retry.
    #[error("service unavailable: {0}")]
    Unavailable(String),
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl QueueError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, QueueError::Unavailable(_))
    }
}
