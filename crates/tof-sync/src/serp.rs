use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tof_adapters::{normalize_link, CollaboratorError, SearchEngine};
use tof_core::{SerpResult, Thread};
use tof_storage::{Store, Url};
use tracing::{info, warn};
use uuid::Uuid;

use crate::error::EngineError;

#[derive(Debug, Clone, Copy)]
pub struct SerpSettings {
    /// Positions `1..=top_n` count as ranked.
    pub top_n: u32,
    /// How many leading results are scanned for the thread's permalink.
    pub result_window: usize,
    pub timeout: Duration,
}

impl Default for SerpSettings {
    fn default() -> Self {
        Self {
            top_n: 10,
            result_window: 50,
            timeout: Duration::from_secs(20),
        }
    }
}

/// `site:<host of the permalink> <title>`, or the bare title when the
/// permalink has no host.
pub fn default_query(thread: &Thread) -> String {
    let host = Url::parse(&thread.permalink)
        .ok()
        .and_then(|u| u.host_str().map(str::to_ascii_lowercase));
    match host {
        Some(host) => {
            let host = ["www.", "old.", "m."]
                .iter()
                .find_map(|p| host.strip_prefix(p))
                .unwrap_or(&host);
            format!("site:{host} {}", thread.title.trim())
        }
        None => thread.title.trim().to_string(),
    }
}

/// 1-indexed position of `permalink` among the first `window` links.
pub fn find_position(links: &[String], permalink: &str, window: usize) -> Option<u32> {
    let target = normalize_link(permalink);
    links
        .iter()
        .take(window)
        .position(|link| normalize_link(link) == target)
        .and_then(|idx| u32::try_from(idx + 1).ok())
}

pub struct SerpChecker {
    store: Arc<dyn Store>,
    search: Arc<dyn SearchEngine>,
    settings: SerpSettings,
}

impl SerpChecker {
    pub fn new(store: Arc<dyn Store>, search: Arc<dyn SearchEngine>, settings: SerpSettings) -> Self {
        Self {
            store,
            search,
            settings,
        }
    }

    pub fn settings(&self) -> SerpSettings {
        self.settings
    }

    /// Look the thread up in search and record where it ranks. A failed search
    /// leaves previously stored results untouched.
    pub async fn check_position(
        &self,
        thread_id: Uuid,
        query: Option<&str>,
    ) -> Result<SerpResult, EngineError> {
        if let Some(q) = query {
            if q.trim().is_empty() {
                return Err(EngineError::validation("search query must not be blank"));
            }
        }
        let thread = self
            .store
            .get_thread(thread_id)
            .await?
            .ok_or_else(|| EngineError::not_found("thread", thread_id))?;
        let query = query
            .map(|q| q.trim().to_string())
            .unwrap_or_else(|| default_query(&thread));

        let links = tokio::time::timeout(self.settings.timeout, self.search.search(&query))
            .await
            .map_err(|_| CollaboratorError::Timeout(self.settings.timeout))
            .and_then(|result| result)
            .map_err(|err| {
                warn!(%thread_id, query = %query, engine = self.search.name(), error = %err, "serp lookup failed");
                EngineError::ExternalUnavailable {
                    collaborator: "search",
                    reason: err.to_string(),
                }
            })?;

        let position = find_position(&links, &thread.permalink, self.settings.result_window);
        let result = SerpResult::new(thread.id, query, position, self.settings.top_n, Utc::now());
        let stored = self.store.upsert_serp_result(result).await?;
        info!(
            %thread_id,
            query = %stored.query,
            position = ?stored.position,
            ranked = stored.ranked,
            "serp position recorded"
        );
        Ok(stored)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use tof_adapters::StaticSearchEngine;
    use tof_core::Intent;
    use tof_storage::MemoryStore;

    struct DownSearch;

    #[async_trait]
    impl SearchEngine for DownSearch {
        fn name(&self) -> &str {
            "down"
        }

        async fn search(&self, _query: &str) -> Result<Vec<String>, CollaboratorError> {
            Err(CollaboratorError::RateLimited("https://serp.local/search".into()))
        }
    }

    fn thread() -> Thread {
        Thread {
            id: Thread::natural_id("homelab", "h1"),
            source: "homelab".into(),
            external_id: "h1".into(),
            title: "Best NAS for Plex?".into(),
            body: String::new(),
            permalink: "https://www.reddit.com/r/homelab/comments/h1/best_nas_for_plex/".into(),
            upvotes: 10,
            comment_count: 2,
            intent: Intent::Question,
            crawled_at: Utc::now(),
        }
    }

    fn links_with_target_at(position: usize) -> Vec<String> {
        (1..=position)
            .map(|i| {
                if i == position {
                    "http://old.reddit.com/r/homelab/comments/h1/best_nas_for_plex".to_string()
                } else {
                    format!("https://example.com/result/{i}")
                }
            })
            .collect()
    }

    async fn store_with_thread() -> Arc<MemoryStore> {
        let store = Arc::new(MemoryStore::new());
        store.upsert_threads(&[thread()]).await.unwrap();
        store
    }

    #[test]
    fn default_query_uses_permalink_host_and_title() {
        assert_eq!(default_query(&thread()), "site:reddit.com Best NAS for Plex?");
    }

    #[test]
    fn positions_are_one_indexed_within_the_window() {
        let links = links_with_target_at(4);
        let permalink = &thread().permalink;
        assert_eq!(find_position(&links, permalink, 50), Some(4));
        assert_eq!(find_position(&links, permalink, 3), None);
    }

    #[tokio::test]
    async fn repeated_checks_update_one_row() {
        let store = store_with_thread().await;
        let query = default_query(&thread());
        let search = Arc::new(StaticSearchEngine::default().with_results(&query, links_with_target_at(3)));
        let checker = SerpChecker::new(store.clone(), search, SerpSettings::default());

        let first = checker.check_position(thread().id, None).await.unwrap();
        let second = checker.check_position(thread().id, None).await.unwrap();
        assert_eq!(first.id, second.id);
        assert_eq!(second.position, Some(3));
        assert!(second.ranked);
        assert_eq!(store.serp_results_for_thread(thread().id).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn results_outside_top_n_are_found_but_not_ranked() {
        let store = store_with_thread().await;
        let search = Arc::new(StaticSearchEngine::default().with_results("nas", links_with_target_at(12)));
        let checker = SerpChecker::new(store, search, SerpSettings::default());

        let result = checker.check_position(thread().id, Some("nas")).await.unwrap();
        assert_eq!(result.position, Some(12));
        assert!(!result.ranked);

        let missing = checker.check_position(thread().id, Some("nothing")).await.unwrap();
        assert_eq!(missing.position, None);
        assert!(!missing.ranked);
    }

    #[tokio::test]
    async fn search_failures_keep_previous_results() {
        let store = store_with_thread().await;
        let query = default_query(&thread());
        let ok = SerpChecker::new(
            store.clone(),
            Arc::new(StaticSearchEngine::default().with_results(&query, links_with_target_at(2))),
            SerpSettings::default(),
        );
        let before = ok.check_position(thread().id, None).await.unwrap();

        let down = SerpChecker::new(store.clone(), Arc::new(DownSearch), SerpSettings::default());
        let err = down.check_position(thread().id, None).await.unwrap_err();
        assert!(matches!(err, EngineError::ExternalUnavailable { collaborator: "search", .. }));
        assert_eq!(store.serp_results_for_thread(thread().id).await.unwrap(), vec![before]);
    }

    #[tokio::test]
    async fn unknown_threads_and_blank_queries_are_rejected() {
        let store = store_with_thread().await;
        let checker = SerpChecker::new(store, Arc::new(StaticSearchEngine::default()), SerpSettings::default());

        let missing = checker.check_position(Uuid::new_v4(), None).await.unwrap_err();
        assert!(matches!(missing, EngineError::NotFound { entity: "thread", .. }));

        let blank = checker.check_position(thread().id, Some("   ")).await.unwrap_err();
        assert!(matches!(blank, EngineError::Validation(_)));
    }
}
