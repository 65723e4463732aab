//! Core domain model for TOF: threads, affiliate programs, SERP checks,
//! opportunities and crawl history.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

pub mod query;

pub use query::{
    OpportunityFilter, OpportunityListing, OpportunityQuery, OpportunitySortField, Page,
    PageRequest, Queryable, SortOrder, SortSpec, ThreadFilter, ThreadQuery, ThreadSortField,
};

pub const CRATE_NAME: &str = "tof-core";

/// Namespace for every deterministic id derived from a natural key.
const TOF_NAMESPACE: Uuid = Uuid::from_u128(0x6f1c_2a94_3b7e_4d25_9c8a_51e0_7d3f_b842);

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown {kind} value: {value}")]
pub struct ParseEnumError {
    pub kind: &'static str,
    pub value: String,
}

/// Coarse communicative purpose of a thread, pre-classified by the crawler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Intent {
    Discovery,
    Comparison,
    Question,
    Review,
    Other,
    #[default]
    Unknown,
}

impl Intent {
    pub const ALL: [Intent; 6] = [
        Intent::Discovery,
        Intent::Comparison,
        Intent::Question,
        Intent::Review,
        Intent::Other,
        Intent::Unknown,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Intent::Discovery => "DISCOVERY",
            Intent::Comparison => "COMPARISON",
            Intent::Question => "QUESTION",
            Intent::Review => "REVIEW",
            Intent::Other => "OTHER",
            Intent::Unknown => "UNKNOWN",
        }
    }
}

impl fmt::Display for Intent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Intent {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Intent::ALL
            .into_iter()
            .find(|i| i.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| ParseEnumError {
                kind: "intent",
                value: s.to_string(),
            })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RecommendedAction {
    Comment,
    Watch,
    Skip,
}

impl RecommendedAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            RecommendedAction::Comment => "COMMENT",
            RecommendedAction::Watch => "WATCH",
            RecommendedAction::Skip => "SKIP",
        }
    }
}

impl fmt::Display for RecommendedAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RecommendedAction {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        [
            RecommendedAction::Comment,
            RecommendedAction::Watch,
            RecommendedAction::Skip,
        ]
        .into_iter()
        .find(|a| a.as_str().eq_ignore_ascii_case(s.trim()))
        .ok_or_else(|| ParseEnumError {
            kind: "action",
            value: s.to_string(),
        })
    }
}

/// A public discussion thread observed by a crawl pass.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Thread {
    pub id: Uuid,
    pub source: String,
    pub external_id: String,
    pub title: String,
    pub body: String,
    pub permalink: String,
    pub upvotes: i64,
    pub comment_count: i64,
    pub intent: Intent,
    pub crawled_at: DateTime<Utc>,
}

impl Thread {
    /// Stable id for the `(source, external_id)` natural key; re-crawls upsert onto it.
    pub fn natural_id(source: &str, external_id: &str) -> Uuid {
        Uuid::new_v5(
            &TOF_NAMESPACE,
            format!("thread:{}:{}", source.to_ascii_lowercase(), external_id).as_bytes(),
        )
    }
}

/// Reference data describing one tracked affiliate program.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AffiliateProgram {
    pub id: Uuid,
    pub name: String,
    pub link: String,
    #[serde(default)]
    pub promo_code: Option<String>,
    #[serde(default)]
    pub keywords: Vec<String>,
}

impl AffiliateProgram {
    pub fn new(name: impl Into<String>, link: impl Into<String>, keywords: Vec<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            link: link.into(),
            promo_code: None,
            keywords,
        }
    }

    /// Case-insensitive substring match of any keyword against `haystack_lower`,
    /// which must already be lowercased.
    pub fn matches_text(&self, haystack_lower: &str) -> bool {
        self.keywords
            .iter()
            .map(|k| k.trim().to_lowercase())
            .filter(|k| !k.is_empty())
            .any(|k| haystack_lower.contains(&k))
    }
}

/// Outcome of one search-rank check for a thread.
///
/// `position` is `None` when the thread was checked and not found in the scanned
/// result window; a thread that was never checked has no `SerpResult` at all.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SerpResult {
    pub id: Uuid,
    pub thread_id: Uuid,
    pub query: String,
    pub position: Option<u32>,
    pub ranked: bool,
    pub checked_at: DateTime<Utc>,
}

impl SerpResult {
    pub fn natural_id(thread_id: Uuid, query: &str) -> Uuid {
        Uuid::new_v5(
            &TOF_NAMESPACE,
            format!("serp:{}:{}", thread_id, query).as_bytes(),
        )
    }

    pub fn new(
        thread_id: Uuid,
        query: impl Into<String>,
        position: Option<u32>,
        top_n: u32,
        checked_at: DateTime<Utc>,
    ) -> Self {
        let query = query.into();
        let position = position.filter(|p| *p > 0);
        Self {
            id: Self::natural_id(thread_id, &query),
            thread_id,
            ranked: position.is_some_and(|p| p <= top_n),
            query,
            position,
            checked_at,
        }
    }
}

/// Scored recommendation derived from a thread plus its affiliate/SERP signals.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Opportunity {
    pub id: Uuid,
    pub thread_id: Uuid,
    pub score: f64,
    pub intent: Intent,
    pub matched_programs: Vec<Uuid>,
    pub serp_match: bool,
    pub action: RecommendedAction,
    #[serde(default)]
    pub manual_override: bool,
    pub computed_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Opportunity {
    pub fn natural_id(thread_id: Uuid) -> Uuid {
        Uuid::new_v5(&TOF_NAMESPACE, format!("opportunity:{thread_id}").as_bytes())
    }
}

/// Operator edit applied to an opportunity outside of a refresh.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OpportunityPatch {
    #[serde(default)]
    pub action: Option<RecommendedAction>,
    #[serde(default)]
    pub score: Option<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CrawlStatus {
    Running,
    Succeeded,
    Partial,
    Failed,
}

impl CrawlStatus {
    /// Overall status for a finished pass.
    pub fn from_counts(successes: usize, failures: usize) -> Self {
        match (successes, failures) {
            (_, 0) if successes > 0 => CrawlStatus::Succeeded,
            (0, _) => CrawlStatus::Failed,
            _ => CrawlStatus::Partial,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            CrawlStatus::Running => "RUNNING",
            CrawlStatus::Succeeded => "SUCCEEDED",
            CrawlStatus::Partial => "PARTIAL",
            CrawlStatus::Failed => "FAILED",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CrawlTrigger {
    Manual,
    Scheduled,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceOutcome {
    pub source: String,
    pub succeeded: bool,
    pub thread_count: usize,
    #[serde(default)]
    pub error: Option<String>,
}

/// One crawl pass. Created RUNNING at crawl start and finalized at crawl end by
/// the orchestrator that owns it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CrawlHistory {
    pub id: Uuid,
    pub sources: Vec<String>,
    pub trigger: CrawlTrigger,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub outcomes: Vec<SourceOutcome>,
    pub success_count: usize,
    pub failure_count: usize,
    pub thread_count: usize,
    pub status: CrawlStatus,
    #[serde(default)]
    pub error: Option<String>,
}

impl CrawlHistory {
    pub fn start(sources: Vec<String>, trigger: CrawlTrigger, started_at: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            sources,
            trigger,
            started_at,
            finished_at: None,
            outcomes: Vec::new(),
            success_count: 0,
            failure_count: 0,
            thread_count: 0,
            status: CrawlStatus::Running,
            error: None,
        }
    }

    pub fn record(&mut self, outcome: SourceOutcome) {
        if outcome.succeeded {
            self.success_count += 1;
            self.thread_count += outcome.thread_count;
        } else {
            self.failure_count += 1;
        }
        self.outcomes.push(outcome);
    }

    pub fn finish(&mut self, finished_at: DateTime<Utc>) {
        self.finished_at = Some(finished_at);
        self.status = CrawlStatus::from_counts(self.success_count, self.failure_count);
    }

    /// Finalize as FAILED regardless of per-source outcomes.
    pub fn abort(&mut self, finished_at: DateTime<Utc>, error: impl Into<String>) {
        self.finished_at = Some(finished_at);
        self.status = CrawlStatus::Failed;
        self.error = Some(error.into());
    }
}

/// Process-local scheduler mode as reported by `status()`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SchedulerMode {
    Stopped,
    Scheduled,
    Running,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn natural_ids_are_stable_per_key() {
        assert_eq!(
            Thread::natural_id("homelab", "abc123"),
            Thread::natural_id("HomeLab", "abc123")
        );
        assert_ne!(
            Thread::natural_id("homelab", "abc123"),
            Thread::natural_id("selfhosted", "abc123")
        );
        let thread_id = Thread::natural_id("homelab", "abc123");
        assert_eq!(
            SerpResult::natural_id(thread_id, "best nas"),
            SerpResult::natural_id(thread_id, "best nas")
        );
        assert_ne!(
            SerpResult::natural_id(thread_id, "best nas"),
            SerpResult::natural_id(thread_id, "cheap nas")
        );
    }

    #[test]
    fn intent_parses_case_insensitively() {
        assert_eq!("comparison".parse::<Intent>().unwrap(), Intent::Comparison);
        assert_eq!(" REVIEW ".parse::<Intent>().unwrap(), Intent::Review);
        assert!("shopping".parse::<Intent>().is_err());
        let json = serde_json::to_string(&Intent::Discovery).unwrap();
        assert_eq!(json, "\"DISCOVERY\"");
    }

    #[test]
    fn serp_ranked_flag_follows_top_n() {
        let thread_id = Uuid::new_v4();
        let now = Utc::now();
        assert!(SerpResult::new(thread_id, "q", Some(10), 10, now).ranked);
        assert!(!SerpResult::new(thread_id, "q", Some(11), 10, now).ranked);
        let missing = SerpResult::new(thread_id, "q", None, 10, now);
        assert!(!missing.ranked);
        assert_eq!(missing.position, None);
        let zero = SerpResult::new(thread_id, "q", Some(0), 10, now);
        assert_eq!(zero.position, None);
    }

    #[test]
    fn crawl_status_from_counts() {
        assert_eq!(CrawlStatus::from_counts(3, 0), CrawlStatus::Succeeded);
        assert_eq!(CrawlStatus::from_counts(2, 1), CrawlStatus::Partial);
        assert_eq!(CrawlStatus::from_counts(0, 3), CrawlStatus::Failed);
        assert_eq!(CrawlStatus::from_counts(0, 0), CrawlStatus::Failed);
    }

    #[test]
    fn history_record_accumulates_only_successful_threads() {
        let mut history = CrawlHistory::start(
            vec!["a".into(), "b".into()],
            CrawlTrigger::Manual,
            Utc::now(),
        );
        history.record(SourceOutcome {
            source: "a".into(),
            succeeded: true,
            thread_count: 4,
            error: None,
        });
        history.record(SourceOutcome {
            source: "b".into(),
            succeeded: false,
            thread_count: 0,
            error: Some("timeout".into()),
        });
        history.finish(Utc::now());
        assert_eq!(history.status, CrawlStatus::Partial);
        assert_eq!(history.thread_count, 4);
        assert_eq!((history.success_count, history.failure_count), (1, 1));
    }
}
