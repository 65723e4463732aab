//! Contracts for the external crawler and search collaborators, boundary
//! validation of their payloads, and HTTP / fixture-backed implementations.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tof_core::{Intent, Thread};
use tof_storage::{FetchError, Url};
use tracing::warn;

mod fixture;
mod http;
mod links;

pub use fixture::{FixtureCrawler, StaticSearchEngine};
pub use http::{HttpSearchClient, HttpThreadCrawler};
pub use links::{normalize_link, parse_search_links};

pub const CRATE_NAME: &str = "tof-adapters";

const PERMALINK_BASE: &str = "https://www.reddit.com";

#[derive(Debug, Error)]
pub enum CollaboratorError {
    #[error("collaborator unavailable: {0}")]
    Unavailable(String),
    #[error("collaborator rate limited: {0}")]
    RateLimited(String),
    #[error("collaborator timed out after {0:?}")]
    Timeout(Duration),
    #[error("invalid collaborator payload: {0}")]
    InvalidPayload(String),
    #[error("unknown source: {0}")]
    UnknownSource(String),
}

impl From<FetchError> for CollaboratorError {
    fn from(err: FetchError) -> Self {
        match err {
            FetchError::RateLimited { url } => CollaboratorError::RateLimited(url),
            other => CollaboratorError::Unavailable(other.to_string()),
        }
    }
}

/// A thread record that passed boundary validation; every field is present.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CrawledThread {
    pub external_id: String,
    pub title: String,
    pub body: String,
    pub permalink: String,
    pub upvotes: i64,
    pub comment_count: i64,
    pub intent: Intent,
}

impl CrawledThread {
    pub fn into_thread(self, source: &str, crawled_at: DateTime<Utc>) -> Thread {
        Thread {
            id: Thread::natural_id(source, &self.external_id),
            source: source.to_string(),
            external_id: self.external_id,
            title: self.title,
            body: self.body,
            permalink: self.permalink,
            upvotes: self.upvotes,
            comment_count: self.comment_count,
            intent: self.intent,
            crawled_at,
        }
    }
}

/// Record shape as emitted by the crawling service. Field names vary between
/// service versions, hence the aliases.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawThreadRecord {
    #[serde(default, alias = "id")]
    pub external_id: Option<String>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default, alias = "selftext")]
    pub body: Option<String>,
    #[serde(default, alias = "url")]
    pub permalink: Option<String>,
    #[serde(default, alias = "score", alias = "ups")]
    pub upvotes: Option<i64>,
    #[serde(default, alias = "num_comments")]
    pub comment_count: Option<i64>,
    #[serde(default)]
    pub intent: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RecordError {
    #[error("record has no external id")]
    MissingId,
    #[error("record {0} has no title")]
    MissingTitle(String),
    #[error("record {0} has no usable permalink")]
    BadPermalink(String),
}

fn non_blank(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

impl RawThreadRecord {
    pub fn validate(self) -> Result<CrawledThread, RecordError> {
        let external_id = non_blank(self.external_id).ok_or(RecordError::MissingId)?;
        let title =
            non_blank(self.title).ok_or_else(|| RecordError::MissingTitle(external_id.clone()))?;
        let permalink = non_blank(self.permalink)
            .and_then(|p| absolutize_permalink(&p))
            .ok_or_else(|| RecordError::BadPermalink(external_id.clone()))?;
        let intent = self
            .intent
            .as_deref()
            .and_then(|i| i.parse::<Intent>().ok())
            .unwrap_or(Intent::Unknown);

        Ok(CrawledThread {
            external_id,
            title,
            body: self.body.unwrap_or_default(),
            permalink,
            upvotes: self.upvotes.unwrap_or(0),
            comment_count: self.comment_count.unwrap_or(0).max(0),
            intent,
        })
    }
}

fn absolutize_permalink(raw: &str) -> Option<String> {
    let url = if raw.starts_with('/') {
        Url::parse(PERMALINK_BASE).ok()?.join(raw).ok()?
    } else {
        Url::parse(raw).ok()?
    };
    matches!(url.scheme(), "http" | "https").then(|| url.to_string())
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum CrawlerPayload {
    Wrapped { threads: Vec<serde_json::Value> },
    Bare(Vec<serde_json::Value>),
}

/// Decode a crawler response body. A malformed document fails the source;
/// individual malformed records are dropped and logged.
pub fn parse_crawler_payload(source: &str, body: &[u8]) -> Result<Vec<CrawledThread>, CollaboratorError> {
    let payload: CrawlerPayload = serde_json::from_slice(body)
        .map_err(|e| CollaboratorError::InvalidPayload(format!("{source}: {e}")))?;
    let records = match payload {
        CrawlerPayload::Wrapped { threads } => threads,
        CrawlerPayload::Bare(threads) => threads,
    };

    let mut out = Vec::with_capacity(records.len());
    for value in records {
        let validated = serde_json::from_value::<RawThreadRecord>(value)
            .map_err(|e| e.to_string())
            .and_then(|raw| raw.validate().map_err(|e| e.to_string()));
        match validated {
            Ok(thread) => out.push(thread),
            Err(reason) => warn!(source, %reason, "dropping malformed thread record"),
        }
    }
    Ok(out)
}

#[async_trait]
pub trait ThreadCrawler: Send + Sync {
    fn name(&self) -> &str;

    /// Threads currently observable in `source`. One call per source per crawl pass.
    async fn fetch_threads(&self, source: &str) -> Result<Vec<CrawledThread>, CollaboratorError>;
}

#[async_trait]
pub trait SearchEngine: Send + Sync {
    fn name(&self) -> &str;

    /// Result links for `query`, best rank first.
    async fn search(&self, query: &str) -> Result<Vec<String>, CollaboratorError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validation_fills_defaults_and_absolutizes_permalinks() {
        let raw = RawThreadRecord {
            external_id: Some(" abc123 ".into()),
            title: Some("Which NAS for Plex?".into()),
            permalink: Some("/r/homelab/comments/abc123/which_nas/".into()),
            intent: Some("comparison".into()),
            ..Default::default()
        };
        let thread = raw.validate().unwrap();
        assert_eq!(thread.external_id, "abc123");
        assert_eq!(
            thread.permalink,
            "https://www.reddit.com/r/homelab/comments/abc123/which_nas/"
        );
        assert_eq!(thread.intent, Intent::Comparison);
        assert_eq!(thread.upvotes, 0);
        assert_eq!(thread.body, "");
    }

    #[test]
    fn validation_rejects_incomplete_records() {
        let missing_title = RawThreadRecord {
            external_id: Some("x".into()),
            permalink: Some("https://www.reddit.com/r/a/comments/x/".into()),
            ..Default::default()
        };
        assert_eq!(
            missing_title.validate().unwrap_err(),
            RecordError::MissingTitle("x".into())
        );

        let bad_link = RawThreadRecord {
            external_id: Some("y".into()),
            title: Some("t".into()),
            permalink: Some("ftp://example.com/y".into()),
            ..Default::default()
        };
        assert_eq!(bad_link.validate().unwrap_err(), RecordError::BadPermalink("y".into()));
        assert_eq!(
            RawThreadRecord::default().validate().unwrap_err(),
            RecordError::MissingId
        );
    }

    #[test]
    fn unknown_intent_labels_fall_back_to_unknown() {
        let raw = RawThreadRecord {
            external_id: Some("z".into()),
            title: Some("t".into()),
            permalink: Some("https://www.reddit.com/r/a/comments/z/".into()),
            intent: Some("rant".into()),
            ..Default::default()
        };
        assert_eq!(raw.validate().unwrap().intent, Intent::Unknown);
    }

    #[test]
    fn payload_parsing_drops_only_malformed_records() {
        let body = br#"{
            "threads": [
                {"id": "a1", "title": "Best budget NAS?", "selftext": "Looking at Synology",
                 "permalink": "/r/homelab/comments/a1/", "score": 42, "num_comments": 7,
                 "intent": "QUESTION"},
                {"id": "a2", "selftext": "no title here", "permalink": "/r/homelab/comments/a2/"},
                {"id": 17}
            ]
        }"#;
        let threads = parse_crawler_payload("homelab", body).unwrap();
        assert_eq!(threads.len(), 1);
        assert_eq!(threads[0].upvotes, 42);
        assert_eq!(threads[0].comment_count, 7);
        assert_eq!(threads[0].intent, Intent::Question);
    }

    #[test]
    fn payload_parsing_accepts_bare_arrays_and_rejects_garbage() {
        let bare = br#"[{"external_id": "b1", "title": "t", "url": "https://www.reddit.com/r/x/comments/b1/"}]"#;
        assert_eq!(parse_crawler_payload("x", bare).unwrap().len(), 1);
        let err = parse_crawler_payload("x", b"<html>").unwrap_err();
        assert!(matches!(err, CollaboratorError::InvalidPayload(_)));
    }

    #[test]
    fn crawled_thread_maps_to_natural_key_id() {
        let crawled = CrawledThread {
            external_id: "a1".into(),
            title: "t".into(),
            body: String::new(),
            permalink: "https://www.reddit.com/r/homelab/comments/a1/".into(),
            upvotes: 1,
            comment_count: 0,
            intent: Intent::Review,
        };
        let thread = crawled.into_thread("homelab", Utc::now());
        assert_eq!(thread.id, Thread::natural_id("homelab", "a1"));
        assert_eq!(thread.source, "homelab");
    }
}
