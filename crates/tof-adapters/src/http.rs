use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use tof_storage::{HttpFetcher, PayloadArchive, Url};
use tracing::{debug, warn};

use crate::{parse_crawler_payload, parse_search_links, CollaboratorError, CrawledThread, SearchEngine, ThreadCrawler};

/// Client for the crawling service: `GET {base}/sources/{source}/threads`.
#[derive(Debug, Clone)]
pub struct HttpThreadCrawler {
    http: Arc<HttpFetcher>,
    base_url: Url,
    archive: Option<PayloadArchive>,
}

impl HttpThreadCrawler {
    pub fn new(http: Arc<HttpFetcher>, base_url: &str) -> Result<Self, CollaboratorError> {
        let base_url = Url::parse(base_url)
            .map_err(|e| CollaboratorError::InvalidPayload(format!("crawler url {base_url}: {e}")))?;
        if base_url.cannot_be_a_base() {
            return Err(CollaboratorError::InvalidPayload(format!(
                "crawler url {base_url} cannot be a base"
            )));
        }
        Ok(Self {
            http,
            base_url,
            archive: None,
        })
    }

    /// Keep a copy of every raw crawler response under the archive root.
    pub fn with_archive(mut self, archive: PayloadArchive) -> Self {
        self.archive = Some(archive);
        self
    }

    pub fn threads_url(&self, source: &str) -> Url {
        let mut url = self.base_url.clone();
        if let Ok(mut segments) = url.path_segments_mut() {
            segments.pop_if_empty().extend(["sources", source, "threads"]);
        }
        url
    }
}

#[async_trait]
impl ThreadCrawler for HttpThreadCrawler {
    fn name(&self) -> &str {
        "http-crawler"
    }

    async fn fetch_threads(&self, source: &str) -> Result<Vec<CrawledThread>, CollaboratorError> {
        let url = self.threads_url(source);
        let response = self.http.get("crawler", &url).await?;

        if let Some(archive) = &self.archive {
            match archive.archive(source, Utc::now(), "json", &response.body).await {
                Ok(stored) => debug!(
                    source,
                    path = %stored.relative_path.display(),
                    deduplicated = stored.deduplicated,
                    "archived crawler payload"
                ),
                Err(err) => warn!(source, error = %err, "failed to archive crawler payload"),
            }
        }

        parse_crawler_payload(source, &response.body)
    }
}

/// Client for the SERP lookup service: `GET {endpoint}?q=<query>`, answering
/// either JSON or an HTML result page.
#[derive(Debug, Clone)]
pub struct HttpSearchClient {
    http: Arc<HttpFetcher>,
    endpoint: String,
}

impl HttpSearchClient {
    pub fn new(http: Arc<HttpFetcher>, endpoint: impl Into<String>) -> Self {
        Self {
            http,
            endpoint: endpoint.into(),
        }
    }

    pub fn search_url(&self, query: &str) -> Result<Url, CollaboratorError> {
        Url::parse_with_params(&self.endpoint, &[("q", query)])
            .map_err(|e| CollaboratorError::InvalidPayload(format!("search url {}: {e}", self.endpoint)))
    }
}

#[async_trait]
impl SearchEngine for HttpSearchClient {
    fn name(&self) -> &str {
        "http-search"
    }

    async fn search(&self, query: &str) -> Result<Vec<String>, CollaboratorError> {
        let url = self.search_url(query)?;
        let response = self.http.get("search", &url).await?;
        parse_search_links(response.content_type.as_deref(), &response.body)
    }
}
