use std::collections::HashMap;
use std::path::{Path, PathBuf};

use anyhow::Context;
use async_trait::async_trait;

use crate::{parse_crawler_payload, CollaboratorError, CrawledThread, SearchEngine, ThreadCrawler};

/// Crawler backed by `<root>/<source>/threads.json`, used for local runs and tests.
#[derive(Debug, Clone)]
pub struct FixtureCrawler {
    root: PathBuf,
}

impl FixtureCrawler {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Fixture path for `source`, or `None` when the id would step outside the root.
    pub fn path_for(&self, source: &str) -> Option<PathBuf> {
        let escapes = source.is_empty()
            || source.contains(['/', '\\'])
            || source.contains("..");
        (!escapes).then(|| self.root.join(source).join("threads.json"))
    }
}

#[async_trait]
impl ThreadCrawler for FixtureCrawler {
    fn name(&self) -> &str {
        "fixture-crawler"
    }

    async fn fetch_threads(&self, source: &str) -> Result<Vec<CrawledThread>, CollaboratorError> {
        let path = self
            .path_for(source)
            .ok_or_else(|| CollaboratorError::UnknownSource(source.to_string()))?;
        let bytes = match tokio::fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(CollaboratorError::UnknownSource(source.to_string()));
            }
            Err(e) => {
                return Err(CollaboratorError::Unavailable(format!("{}: {e}", path.display())));
            }
        };
        parse_crawler_payload(source, &bytes)
    }
}

fn query_key(query: &str) -> String {
    query.split_whitespace().collect::<Vec<_>>().join(" ").to_lowercase()
}

/// Search engine answering from a fixed query → links table. Unknown queries
/// return no results. Keys compare case- and whitespace-insensitively.
#[derive(Debug, Clone, Default)]
pub struct StaticSearchEngine {
    results: HashMap<String, Vec<String>>,
}

impl StaticSearchEngine {
    pub fn new(results: HashMap<String, Vec<String>>) -> Self {
        Self {
            results: results
                .into_iter()
                .map(|(query, links)| (query_key(&query), links))
                .collect(),
        }
    }

    pub fn with_results(mut self, query: &str, links: Vec<String>) -> Self {
        self.results.insert(query_key(query), links);
        self
    }

    /// Load a JSON object mapping each query to its ordered result links.
    pub fn from_fixture_file(path: &Path) -> anyhow::Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("reading {}", path.display()))?;
        let results: HashMap<String, Vec<String>> =
            serde_json::from_str(&text).with_context(|| format!("parsing {}", path.display()))?;
        Ok(Self::new(results))
    }
}

#[async_trait]
impl SearchEngine for StaticSearchEngine {
    fn name(&self) -> &str {
        "static-search"
    }

    async fn search(&self, query: &str) -> Result<Vec<String>, CollaboratorError> {
        Ok(self.results.get(&query_key(query)).cloned().unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn static_search_ignores_case_and_spacing() {
        let engine = StaticSearchEngine::default()
            .with_results("site:reddit.com Best NAS", vec!["https://example.com/a".into()]);
        let hits = engine.search("  SITE:reddit.com   best nas ").await.unwrap();
        assert_eq!(hits, vec!["https://example.com/a".to_string()]);
        assert!(engine.search("something else").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn missing_fixture_directory_is_an_unknown_source() {
        let crawler = FixtureCrawler::new("/nonexistent/fixtures");
        let err = crawler.fetch_threads("homelab").await.unwrap_err();
        assert!(matches!(err, CollaboratorError::UnknownSource(s) if s == "homelab"));
    }

    #[tokio::test]
    async fn source_ids_cannot_leave_the_fixture_root() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("fixtures");
        std::fs::create_dir_all(&root).unwrap();
        std::fs::write(dir.path().join("threads.json"), br#"{"threads": []}"#).unwrap();

        let crawler = FixtureCrawler::new(&root);
        for source in ["..", "../fixtures", "a/b", "a\\b"] {
            assert!(crawler.path_for(source).is_none(), "{source}");
            let err = crawler.fetch_threads(source).await.unwrap_err();
            assert!(matches!(err, CollaboratorError::UnknownSource(_)), "{source}");
        }
    }

    #[tokio::test]
    async fn fixture_threads_are_read_from_the_source_directory() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("homelab")).unwrap();
        std::fs::write(dir.path().join("homelab").join("threads.json"), br#"{"threads": []}"#)
            .unwrap();

        let crawler = FixtureCrawler::new(dir.path());
        let threads = crawler.fetch_threads("homelab").await.unwrap();
        assert!(threads.is_empty());
    }
}
