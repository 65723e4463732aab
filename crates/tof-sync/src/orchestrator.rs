use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tof_adapters::{CollaboratorError, ThreadCrawler};
use tof_core::{CrawlHistory, CrawlTrigger, SourceOutcome, Thread};
use tof_storage::Store;
use tracing::{info, info_span, warn, Instrument};

use crate::error::EngineError;

/// Per-source crawler timeouts.
#[derive(Debug, Clone)]
pub struct SourceTimeouts {
    pub default: Duration,
    pub per_source: HashMap<String, Duration>,
}

impl Default for SourceTimeouts {
    fn default() -> Self {
        Self {
            default: Duration::from_secs(60),
            per_source: HashMap::new(),
        }
    }
}

impl SourceTimeouts {
    pub fn for_source(&self, source: &str) -> Duration {
        self.per_source.get(source).copied().unwrap_or(self.default)
    }
}

/// Runs one crawl pass over a list of sources and records it as a
/// `CrawlHistory`. Single-flight is the scheduler's job, not this type's.
pub struct CrawlOrchestrator {
    store: Arc<dyn Store>,
    crawler: Arc<dyn ThreadCrawler>,
    timeouts: SourceTimeouts,
}

impl CrawlOrchestrator {
    pub fn new(store: Arc<dyn Store>, crawler: Arc<dyn ThreadCrawler>, timeouts: SourceTimeouts) -> Self {
        Self {
            store,
            crawler,
            timeouts,
        }
    }

    /// Trims and lowercases source ids and drops repeats, keeping first-seen order.
    pub fn validate_sources(sources: &[String]) -> Result<Vec<String>, EngineError> {
        if sources.is_empty() {
            return Err(EngineError::validation("at least one source is required"));
        }
        let mut seen = HashSet::new();
        let mut normalized = Vec::with_capacity(sources.len());
        for source in sources {
            let source = source.trim().to_lowercase();
            if source.is_empty() {
                return Err(EngineError::validation("source identifiers must not be blank"));
            }
            if source.contains(['/', '\\']) || source.contains("..") {
                return Err(EngineError::validation(format!(
                    "source identifier {source:?} must not contain path separators or '..'"
                )));
            }
            if seen.insert(source.clone()) {
                normalized.push(source);
            }
        }
        Ok(normalized)
    }

    pub async fn run_crawl(
        &self,
        sources: &[String],
        trigger: CrawlTrigger,
    ) -> Result<CrawlHistory, EngineError> {
        let sources = Self::validate_sources(sources)?;
        let mut history = CrawlHistory::start(sources.clone(), trigger, Utc::now());
        self.store.insert_crawl_history(&history).await?;

        let span = info_span!("crawl_pass", crawl_id = %history.id, trigger = ?trigger, crawler = self.crawler.name());
        self.run_pass(&sources, &mut history).instrument(span).await?;
        Ok(history)
    }

    async fn run_pass(&self, sources: &[String], history: &mut CrawlHistory) -> Result<(), EngineError> {
        info!(sources = sources.len(), "crawl pass started");

        let mut collected: Vec<Thread> = Vec::new();
        for source in sources {
            let limit = self.timeouts.for_source(source);
            let fetched = tokio::time::timeout(limit, self.crawler.fetch_threads(source))
                .await
                .map_err(|_| CollaboratorError::Timeout(limit))
                .and_then(|result| result);

            match fetched {
                Ok(threads) => {
                    let crawled_at = Utc::now();
                    history.record(SourceOutcome {
                        source: source.clone(),
                        succeeded: true,
                        thread_count: threads.len(),
                        error: None,
                    });
                    collected.extend(threads.into_iter().map(|t| t.into_thread(source, crawled_at)));
                }
                Err(err) => {
                    warn!(source = %source, error = %err, "source failed during crawl pass");
                    history.record(SourceOutcome {
                        source: source.clone(),
                        succeeded: false,
                        thread_count: 0,
                        error: Some(err.to_string()),
                    });
                }
            }
        }

        if let Err(err) = self.store.upsert_threads(&collected).await {
            history.abort(Utc::now(), err.to_string());
            if let Err(update_err) = self.store.update_crawl_history(history).await {
                warn!(error = %update_err, "could not record aborted crawl pass");
            }
            return Err(err.into());
        }

        history.finish(Utc::now());
        self.store.update_crawl_history(history).await?;
        info!(
            status = history.status.as_str(),
            succeeded = history.success_count,
            failed = history.failure_count,
            threads = history.thread_count,
            "crawl pass finished"
        );
        Ok(())
    }
}
