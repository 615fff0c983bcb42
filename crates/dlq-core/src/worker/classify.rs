//! Turn a failed download into the text shown to the user.

use std::fmt;

/// Upper bound on the raw error excerpt, in characters.
const EXCERPT_LIMIT: usize = 2000;

/// Known failure shapes recognized in the downloader's log.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// The site banned or throttled us.
    Banned,
    /// Saved credentials were rejected.
    Auth,
    /// The site stopped answering.
    Timeout,
    Other,
}

impl FailureKind {
    /// Markers are matched against downloader output, which may be in English
    /// or Russian depending on the downloader build.
    pub fn detect(dbg_log: &str) -> Self {
        let log = dbg_log.to_lowercase();
        if ["got banned", "получен бан", "429 too many requests"]
            .iter()
            .any(|m| log.contains(m))
        {
            FailureKind::Banned
        } else if ["authorization failed", "не удалось авторизоваться"]
            .iter()
            .any(|m| log.contains(m))
        {
            FailureKind::Auth
        } else if log.contains("httpclient.timeout") {
            FailureKind::Timeout
        } else {
            FailureKind::Other
        }
    }

    fn hint(self) -> Option<&'static str> {
        match self {
            FailureKind::Banned => Some("got banned, try later"),
            FailureKind::Auth => Some("authorization failed, check saved credentials"),
            FailureKind::Timeout => Some("site is not responding, try later"),
            FailureKind::Other => None,
        }
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.hint().unwrap_or("unknown failure"))
    }
}

/// Escape text for embedding in an HTML `<pre>` block.
pub fn escape_error_text(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '&' => out.push_str("&amp;"),
            '"' | '\'' => out.push_str("&quot;"),
            c => out.push(c),
        }
    }
    out
}

/// User-facing message for a failed task: a short hint for known failures,
/// otherwise an escaped, truncated excerpt of the error.
pub fn classify_failure(dbg_log: &str, err: &str) -> String {
    let mut message = String::from("An error occurred");
    if let Some(hint) = FailureKind::detect(dbg_log).hint() {
        message.push_str(": ");
        message.push_str(hint);
        return message;
    }
    if !err.trim().is_empty() {
        let excerpt: String = escape_error_text(err).chars().take(EXCERPT_LIMIT).collect();
        message.push_str("\n<pre>\n");
        message.push_str(&excerpt);
        message.push_str("\n</pre>");
    }
    message
}
