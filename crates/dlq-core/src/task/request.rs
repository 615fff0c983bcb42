use serde::{Deserialize, Serialize};

use crate::error::Rejection;

/// Task identifier, assigned by the task database on first admission.
pub type TaskId = i64;

/// Submitting user.
pub type UserId = i64;

/// Where notifications about a task are delivered. Copied verbatim into every
/// status and result message.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Route {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bot_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub web_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chat_id: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message_id: Option<i64>,
}

/// A request to fetch content from a site. Immutable once admitted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_id: Option<TaskId>,
    pub user_id: UserId,
    #[serde(flatten)]
    pub route: Route,
    pub site: String,
    pub url: String,
    /// First chapter to fetch (0 = from the beginning).
    #[serde(default)]
    pub start: u32,
    /// Last chapter to fetch (0 = to the end).
    #[serde(default)]
    pub end: u32,
    #[serde(default = "default_format")]
    pub format: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub login: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
    #[serde(default)]
    pub images: bool,
    #[serde(default)]
    pub cover: bool,
    /// Explicit proxy; empty = direct or site default.
    #[serde(default)]
    pub proxy: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hashtags: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filename: Option<String>,
}

fn default_format() -> String {
    "fb2".to_string()
}

impl TaskRequest {
    pub fn new(user_id: UserId, site: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            task_id: None,
            user_id,
            route: Route::default(),
            site: site.into(),
            url: url.into(),
            start: 0,
            end: 0,
            format: default_format(),
            login: None,
            password: None,
            images: false,
            cover: false,
            proxy: String::new(),
            hashtags: None,
            filename: None,
        }
    }

    /// Two requests are duplicates when they would produce the same download
    /// for the same user.
    pub fn is_duplicate_of(&self, other: &TaskRequest) -> bool {
        self.user_id == other.user_id
            && self.url == other.url
            && self.start == other.start
            && self.end == other.end
            && self.images == other.images
    }

    /// Basic shape checks done before routing.
    pub fn validate(&self) -> Result<(), Rejection> {
        if self.site.trim().is_empty() {
            return Err(Rejection::Invalid("site is empty".to_string()));
        }
        let parsed = url::Url::parse(&self.url)
            .map_err(|e| Rejection::Invalid(format!("bad url {}: {e}", self.url)))?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(Rejection::Invalid(format!(
                "unsupported url scheme: {}",
                parsed.scheme()
            )));
        }
        if self.end != 0 && self.start > self.end {
            return Err(Rejection::Invalid(format!(
                "chapter range {}..{} is reversed",
                self.start, self.end
            )));
        }
        Ok(())
    }

    /// Copy safe to export: credentials removed.
    pub fn redacted(&self) -> Self {
        let mut copy = self.clone();
        if copy.password.is_some() {
            copy.password = Some("***".to_string());
        }
        copy
    }
}
