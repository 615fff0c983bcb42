//! JSON-over-HTTP notifier using libcurl on the blocking pool.

use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Serialize;

use super::Notifier;
use crate::config::NotifyConfig;
use crate::retry::{classify_delivery, run_with_retry, DeliveryError, RetryPolicy};
use crate::task::{ResultMessage, StatusMessage};

/// POSTs status updates to `{base}download/status` and results to `{base}download/done`.
#[derive(Debug, Clone)]
pub struct HttpNotifier {
    status_url: String,
    done_url: String,
    policy: RetryPolicy,
    timeout: Option<Duration>,
}

impl HttpNotifier {
    pub fn new(base_url: &str, policy: RetryPolicy, timeout: Option<Duration>) -> Result<Self> {
        let mut base = base_url.trim().to_string();
        if !base.ends_with('/') {
            base.push('/');
        }
        let base = url::Url::parse(&base)
            .with_context(|| format!("invalid notify base url: {base_url}"))?;
        Ok(Self {
            status_url: base.join("download/status")?.to_string(),
            done_url: base.join("download/done")?.to_string(),
            policy,
            timeout,
        })
    }

    /// Build from config; None when no base URL is set.
    pub fn from_config(cfg: &NotifyConfig) -> Result<Option<Self>> {
        let Some(base) = cfg.base_url.as_deref().filter(|b| !b.trim().is_empty()) else {
            return Ok(None);
        };
        let policy = cfg
            .retry
            .as_ref()
            .map(RetryPolicy::from)
            .unwrap_or_default();
        let timeout = (cfg.timeout_secs > 0).then(|| Duration::from_secs(cfg.timeout_secs));
        Self::new(base, policy, timeout).map(Some)
    }

    pub fn status_url(&self) -> &str {
        &self.status_url
    }

    pub fn done_url(&self) -> &str {
        &self.done_url
    }

    async fn deliver<T: Serialize>(&self, url: &str, payload: &T) -> Result<(), DeliveryError> {
        let body = serde_json::to_vec(payload).map_err(|e| DeliveryError::Encode(e.to_string()))?;
        run_with_retry(&self.policy, classify_delivery, || {
            let url = url.to_string();
            let body = body.clone();
            let timeout = self.timeout;
            async move {
                tokio::task::spawn_blocking(move || post_json(&url, &body, timeout))
                    .await
                    .map_err(|e| DeliveryError::Join(e.to_string()))?
            }
        })
        .await
    }
}

/// One blocking POST. Only HTTP 200 counts as accepted.
fn post_json(url: &str, body: &[u8], timeout: Option<Duration>) -> Result<(), DeliveryError> {
    let mut easy = curl::easy::Easy::new();
    easy.url(url)?;
    easy.post(true)?;
    easy.post_fields_copy(body)?;
    easy.connect_timeout(Duration::from_secs(10))?;
    if let Some(t) = timeout {
        easy.timeout(t)?;
    }

    let mut list = curl::easy::List::new();
    list.append("Content-Type: application/json")?;
    easy.http_headers(list)?;

    {
        let mut transfer = easy.transfer();
        transfer.write_function(|data| Ok(data.len()))?;
        transfer.perform()?;
    }

    let code = easy.response_code()?;
    if code != 200 {
        return Err(DeliveryError::Http(code));
    }
    Ok(())
}

#[async_trait]
impl Notifier for HttpNotifier {
    async fn send_status(&self, status: &StatusMessage) -> bool {
        match self.deliver(&self.status_url, status).await {
            Ok(()) => true,
            Err(e) => {
                tracing::debug!(task_id = status.task_id, "status delivery failed: {}", e);
                false
            }
        }
    }

    async fn send_result(&self, result: &ResultMessage) -> bool {
        match self.deliver(&self.done_url, result).await {
            Ok(()) => {
                tracing::debug!(task_id = result.task_id, "result delivered");
                true
            }
            Err(e) => {
                tracing::warn!(task_id = result.task_id, "result delivery failed: {}", e);
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RetryConfig;

    #[test]
    fn endpoints_joined_onto_base() {
        let n = HttpNotifier::new("http://bot:8080/api", RetryPolicy::default(), None).unwrap();
        assert_eq!(n.status_url(), "http://bot:8080/api/download/status");
        assert_eq!(n.done_url(), "http://bot:8080/api/download/done");

        let n = HttpNotifier::new("http://bot:8080/", RetryPolicy::default(), None).unwrap();
        assert_eq!(n.done_url(), "http://bot:8080/download/done");
    }

    #[test]
    fn invalid_base_rejected() {
        assert!(HttpNotifier::new("not a url", RetryPolicy::default(), None).is_err());
    }

    #[test]
    fn from_config_optional() {
        assert!(HttpNotifier::from_config(&NotifyConfig::default())
            .unwrap()
            .is_none());

        let cfg = NotifyConfig {
            base_url: Some("http://bot/".to_string()),
            timeout_secs: 5,
            retry: Some(RetryConfig {
                max_attempts: 2,
                ..RetryConfig::default()
            }),
        };
        let n = HttpNotifier::from_config(&cfg).unwrap().unwrap();
        assert_eq!(n.policy.max_attempts, 2);
        assert_eq!(n.timeout, Some(Duration::from_secs(5)));
    }

    #[tokio::test]
    async fn unreachable_endpoint_reports_failure() {
        let policy = RetryPolicy {
            max_attempts: 2,
            base_delay: Duration::from_millis(1),
            ..RetryPolicy::default()
        };
        // Port 9 on loopback: connection refused.
        let n = HttpNotifier::new("http://127.0.0.1:9/", policy, Some(Duration::from_secs(2))).unwrap();
        let req = crate::task::TaskRequest::new(1, "example.org", "https://example.org/a");
        let result = ResultMessage::for_request(1, &req, crate::task::TaskStatus::Done, "ok");
        assert!(!n.send_result(&result).await);
    }
}
