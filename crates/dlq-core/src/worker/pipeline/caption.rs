//! Book metadata from the downloader's JSON and the caption built from it.

use std::fs;

use anyhow::{Context, Result};
use serde_json::Value;

use super::WorkItem;

/// Longest chapter title kept in the caption, in characters.
const CHAPTER_TITLE_LIMIT: usize = 200;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BookInfo {
    pub title: String,
    pub url: String,
    /// Main author's name, used for file names.
    pub author: String,
    /// Author entries as rendered in the caption (linked when a URL is known).
    pub authors: Vec<String>,
    pub series_name: String,
    pub series_url: String,
    pub chapters_total: u32,
    pub chapters_valid: u32,
    pub first_chapter: String,
    pub last_chapter: String,
    /// Raw names (authors, series) that become hashtags.
    pub tags: Vec<String>,
}

fn squash(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn clip(text: String) -> String {
    if text.chars().count() <= CHAPTER_TITLE_LIMIT {
        return text;
    }
    let mut out: String = text.chars().take(CHAPTER_TITLE_LIMIT - 3).collect();
    out.push_str("...");
    out
}

fn str_field<'a>(v: &'a Value, key: &str) -> Option<&'a str> {
    v.get(key).and_then(Value::as_str).filter(|s| !s.is_empty())
}

fn linked(name: &str, url: Option<&str>) -> String {
    match url {
        Some(url) => format!("<a href=\"{url}\">{name}</a>"),
        None => name.to_string(),
    }
}

impl BookInfo {
    /// Parse the `json_lite` metadata. Missing fields stay empty.
    pub fn from_json(json: &Value) -> Self {
        let mut info = BookInfo::default();
        if let Some(title) = str_field(json, "Title") {
            info.title = squash(title);
        }
        if let Some(url) = str_field(json, "Url") {
            info.url = url.to_string();
        }

        let author = json.get("Author").into_iter();
        let coauthors = json
            .get("CoAuthors")
            .and_then(Value::as_array)
            .into_iter()
            .flatten();
        for (i, a) in author.chain(coauthors).enumerate() {
            let Some(name) = str_field(a, "Name").map(squash) else {
                continue;
            };
            if i == 0 {
                info.author = name.clone();
            }
            info.authors.push(linked(&name, str_field(a, "Url")));
            info.tags.push(name);
        }

        if let Some(series) = json.get("Seria") {
            if let Some(name) = str_field(series, "Name") {
                info.series_name = squash(name);
                info.series_url = str_field(series, "Url").unwrap_or("").to_string();
                info.tags.push(info.series_name.clone());
            }
        }

        for chapter in json
            .get("Chapters")
            .and_then(Value::as_array)
            .into_iter()
            .flatten()
        {
            let Some(title) = str_field(chapter, "Title") else {
                continue;
            };
            info.chapters_total += 1;
            if chapter.get("IsValid").and_then(Value::as_bool).unwrap_or(false) {
                info.chapters_valid += 1;
                let title = clip(squash(title));
                if info.first_chapter.is_empty() {
                    info.first_chapter = title.clone();
                }
                info.last_chapter = title;
            }
        }
        info
    }

    /// Chapter line: the last chapter, plus the range and completeness when relevant.
    pub fn chapters_line(&self, start: u32, end: u32) -> String {
        let mut base = self.last_chapter.clone();
        if self.chapters_valid > 1 {
            base = format!("up to: \"{base}\"");
        }
        let mut suffix = String::new();
        if self.chapters_total > 0 {
            match (start, end) {
                (0, 0) => {}
                (s, 0) => suffix = format!("{s} - {}", s + self.chapters_total),
                (0, _) => suffix = format!("1 - {}", self.chapters_total),
                (s, e) => suffix = format!("{s} - {e}"),
            }
        }
        if self.chapters_valid < self.chapters_total {
            if suffix.is_empty() {
                suffix = format!("{} / {}", self.chapters_valid, self.chapters_total);
            } else {
                suffix.push_str(&format!(" / {}", self.chapters_total));
            }
        }
        if suffix.is_empty() {
            base
        } else {
            format!("{base} [{suffix}]")
        }
    }
}

/// Hashtags in the requested style: `bf` keeps word breaks as underscores,
/// `gf` glues words and lowercases. Anything else disables hashtags.
pub fn hashtags(tags: &[String], style: Option<&str>) -> Vec<String> {
    let keep = |c: char| c.is_alphanumeric();
    match style {
        Some("bf") => tags
            .iter()
            .map(|t| {
                let words: Vec<String> = t
                    .split(|c: char| !keep(c))
                    .filter(|w| !w.is_empty())
                    .map(str::to_string)
                    .collect();
                format!("#{}", words.join("_"))
            })
            .collect(),
        Some("gf") => tags
            .iter()
            .map(|t| format!("#{}", t.chars().filter(|c| keep(*c)).collect::<String>().to_lowercase()))
            .collect(),
        _ => Vec::new(),
    }
}

pub(super) fn read_metadata(item: &mut WorkItem) -> Result<()> {
    let Some(path) = item.metadata.as_ref() else {
        return Ok(());
    };
    let raw = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    match serde_json::from_str::<Value>(&raw) {
        Ok(json) => item.book = BookInfo::from_json(&json),
        Err(e) => tracing::debug!(task_id = item.job.task_id, "unreadable book metadata: {}", e),
    }
    Ok(())
}

pub(super) fn build_caption(item: &mut WorkItem) -> Result<()> {
    let book = &item.book;
    let req = &item.job.request;
    let mut caption = String::new();

    if !book.title.is_empty() {
        let url = (!book.url.is_empty()).then_some(book.url.as_str());
        caption.push_str(&linked(&book.title, url));
        caption.push('\n');
    }
    match book.authors.len() {
        0 => {}
        1 => caption.push_str(&format!("Author: {}\n", book.authors[0])),
        _ => caption.push_str(&format!("Authors: {}\n", book.authors.join(", "))),
    }
    if !book.series_name.is_empty() {
        let url = (!book.series_url.is_empty()).then_some(book.series_url.as_str());
        caption.push_str(&format!("Series: {}\n", linked(&book.series_name, url)));
    }
    if book.chapters_total > 0 {
        caption.push_str(&format!("\n{}\n", book.chapters_line(req.start, req.end)));
    }
    let tags = hashtags(&book.tags, req.hashtags.as_deref());
    if !tags.is_empty() {
        caption.push_str(&format!("\n{}", tags.join(" ")));
    }

    item.result.text = caption.trim_end().to_string();
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample() -> Value {
        json!({
            "Title": "The   Long\nRoad",
            "Url": "https://example.org/b/1",
            "Author": {"Name": "Ann Writer", "Url": "https://example.org/a/1"},
            "CoAuthors": [{"Name": "Bob Helper"}],
            "Seria": {"Name": "Roads", "Number": 2},
            "Chapters": [
                {"Title": "One", "IsValid": true},
                {"Title": "Two", "IsValid": false},
                {"Title": "Three", "IsValid": true},
                {"Title": "", "IsValid": true}
            ]
        })
    }

    #[test]
    fn metadata_parsed() {
        let info = BookInfo::from_json(&sample());
        assert_eq!(info.title, "The Long Road");
        assert_eq!(info.author, "Ann Writer");
        assert_eq!(
            info.authors,
            vec![
                "<a href=\"https://example.org/a/1\">Ann Writer</a>".to_string(),
                "Bob Helper".to_string()
            ]
        );
        assert_eq!(info.series_name, "Roads");
        assert_eq!(info.chapters_total, 3);
        assert_eq!(info.chapters_valid, 2);
        assert_eq!(info.first_chapter, "One");
        assert_eq!(info.last_chapter, "Three");
        assert_eq!(info.tags, vec!["Ann Writer", "Bob Helper", "Roads"]);
    }

    #[test]
    fn chapter_line_variants() {
        let info = BookInfo::from_json(&sample());
        assert_eq!(info.chapters_line(0, 0), "up to: \"Three\" [2 / 3]");
        assert_eq!(info.chapters_line(2, 4), "up to: \"Three\" [2 - 4 / 3]");
    }

    #[test]
    fn hashtag_styles() {
        let tags = vec!["Ann Writer".to_string(), "Roads-2".to_string()];
        assert_eq!(hashtags(&tags, Some("bf")), vec!["#Ann_Writer", "#Roads_2"]);
        assert_eq!(hashtags(&tags, Some("gf")), vec!["#annwriter", "#roads2"]);
        assert!(hashtags(&tags, None).is_empty());
    }

    #[test]
    fn long_chapter_titles_clipped() {
        let clipped = clip("x".repeat(300));
        assert_eq!(clipped.chars().count(), CHAPTER_TITLE_LIMIT);
        assert!(clipped.ends_with("..."));
    }
}
