//! Control protocol between `dlq serve` and its clients.
//!
//! One JSON [`ControlRequest`] per line in, one [`ControlResponse`] per line
//! out, over a Unix socket in the XDG state directory.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::QueueError;
use crate::task::{TaskId, TaskRequest};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "cmd", rename_all = "snake_case")]
pub enum ControlRequest {
    Add { request: TaskRequest },
    Cancel { task_id: TaskId },
    Export,
    Check { site: String },
    /// Active and auth-requiring sites.
    Sites,
    /// Finished-task counts per site.
    Stats,
    /// Re-read the config file and apply its queue section.
    Reload,
    StartTasks,
    StopTasks,
    StartResults,
    StopResults,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ControlResponse {
    pub ok: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Set when the failure is temporary and the same request may succeed later.
    #[serde(default)]
    pub retryable: bool,
}

impl ControlResponse {
    pub fn ok(data: impl Serialize) -> Self {
        match serde_json::to_value(data) {
            Ok(Value::Null) => Self::empty(),
            Ok(v) => Self {
                ok: true,
                data: Some(v),
                error: None,
                retryable: false,
            },
            Err(e) => Self::error(format!("serialize response: {e}")),
        }
    }

    pub fn empty() -> Self {
        Self {
            ok: true,
            data: None,
            error: None,
            retryable: false,
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            ok: false,
            data: None,
            error: Some(message.into()),
            retryable: false,
        }
    }
}

impl From<QueueError> for ControlResponse {
    fn from(e: QueueError) -> Self {
        let retryable = e.is_retryable();
        Self {
            retryable,
            ..Self::error(format!("{e:#}"))
        }
    }
}

/// Default path for the control socket (same XDG state dir as the DB).
pub fn default_control_socket_path() -> std::io::Result<PathBuf> {
    let dir = xdg::BaseDirectories::with_prefix("dlq")?.get_state_home();
    Ok(dir.join("control.sock"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Rejection;

    #[test]
    fn request_wire_format() {
        let line = serde_json::to_string(&ControlRequest::Cancel { task_id: 3 }).unwrap();
        assert_eq!(line, r#"{"cmd":"cancel","task_id":3}"#);

        let parsed: ControlRequest = serde_json::from_str(r#"{"cmd":"start_tasks"}"#).unwrap();
        assert_eq!(parsed, ControlRequest::StartTasks);

        let add: ControlRequest = serde_json::from_str(
            r#"{"cmd":"add","request":{"user_id":1,"site":"example.org","url":"https://example.org/x"}}"#,
        )
        .unwrap();
        assert!(matches!(add, ControlRequest::Add { request } if request.user_id == 1));
    }

    #[test]
    fn responses_from_errors() {
        let r = ControlResponse::from(QueueError::Rejected(Rejection::Duplicate));
        assert!(!r.ok);
        assert!(!r.retryable);
        assert_eq!(r.error.as_deref(), Some("this download is already queued or running"));

        let r = ControlResponse::from(QueueError::Unavailable("db timeout".into()));
        assert!(r.retryable);

        assert_eq!(ControlResponse::ok(()), ControlResponse::empty());
        assert_eq!(ControlResponse::ok(7).data, Some(serde_json::json!(7)));
    }
}
