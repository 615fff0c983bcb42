//! Outbound notifications: task status updates and final results.
//!
//! The scheduler only depends on the [`Notifier`] trait. [`HttpNotifier`]
//! POSTs JSON to the configured endpoint; [`NullNotifier`] accepts nothing,
//! which leaves results persisted until a notifier is configured.

mod http;

use async_trait::async_trait;

use crate::task::{ResultMessage, StatusMessage};

pub use http::HttpNotifier;

#[async_trait]
pub trait Notifier: Send + Sync {
    /// Best-effort progress update. Returns true when accepted.
    async fn send_status(&self, status: &StatusMessage) -> bool;

    /// Deliver a final result. Returns true when accepted; false keeps the
    /// result row for redelivery.
    async fn send_result(&self, result: &ResultMessage) -> bool;
}

/// Notifier used when no endpoint is configured.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullNotifier;

#[async_trait]
impl Notifier for NullNotifier {
    async fn send_status(&self, _status: &StatusMessage) -> bool {
        false
    }

    async fn send_result(&self, result: &ResultMessage) -> bool {
        tracing::debug!(task_id = result.task_id, "no notifier configured; result kept");
        false
    }
}
