//! Error of one notification POST, kept typed so retries can be classified.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum DeliveryError {
    /// Transport failure (timeout, refused connection, DNS).
    #[error(transparent)]
    Curl(#[from] curl::Error),
    /// Endpoint answered with something other than 200.
    #[error("endpoint answered HTTP {0}")]
    Http(u32),
    /// Payload could not be serialized.
    #[error("encode payload: {0}")]
    Encode(String),
    /// The blocking task running the transfer failed.
    #[error("transfer task failed: {0}")]
    Join(String),
}
