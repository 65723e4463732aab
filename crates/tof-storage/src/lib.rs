//! Storage collaborator for TOF plus the outbound HTTP plumbing shared by the
//! crawler and search clients.
//!
//! Every entity supports get-by-id, filtered listing, create/upsert, update and
//! delete. An absent id is reported as `None`/`false`, never as an error.

use async_trait::async_trait;
use thiserror::Error;
use tof_core::{
    AffiliateProgram, CrawlHistory, Opportunity, OpportunityFilter, OpportunityListing,
    OpportunityQuery, Page, SerpResult, Thread, ThreadFilter, ThreadQuery,
};
use uuid::Uuid;

mod archive;
mod fetch;
mod memory;
mod postgres;

pub use archive::{ArchivedPayload, PayloadArchive};
pub use fetch::{
    classify_reqwest_error, classify_status, BackoffPolicy, FetchError, FetchedResponse,
    HttpClientConfig, HttpFetcher, RetryDisposition, SimpleTokenBucket, TokenBucketConfig,
};
pub use memory::MemoryStore;
pub use postgres::PgStore;
pub use reqwest::Url;

pub const CRATE_NAME: &str = "tof-storage";

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("{entity} references missing thread {thread_id}")]
    MissingThread {
        entity: &'static str,
        thread_id: Uuid,
    },
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),
    #[error("row encoding error: {0}")]
    Encoding(#[from] serde_json::Error),
}

#[async_trait]
pub trait Store: Send + Sync {
    /// Insert or replace threads keyed by their `(source, external_id)` id.
    async fn upsert_threads(&self, threads: &[Thread]) -> Result<usize, StoreError>;
    async fn get_thread(&self, id: Uuid) -> Result<Option<Thread>, StoreError>;
    async fn list_threads(&self, query: &ThreadQuery) -> Result<Page<Thread>, StoreError>;
    async fn count_threads(&self, filter: &ThreadFilter) -> Result<usize, StoreError>;
    async fn all_threads(&self) -> Result<Vec<Thread>, StoreError>;
    /// Deletes the thread together with its SERP results and opportunity.
    async fn delete_thread(&self, id: Uuid) -> Result<bool, StoreError>;

    async fn create_program(&self, program: AffiliateProgram) -> Result<AffiliateProgram, StoreError>;
    async fn get_program(&self, id: Uuid) -> Result<Option<AffiliateProgram>, StoreError>;
    async fn list_programs(&self) -> Result<Vec<AffiliateProgram>, StoreError>;
    async fn update_program(
        &self,
        program: AffiliateProgram,
    ) -> Result<Option<AffiliateProgram>, StoreError>;
    async fn delete_program(&self, id: Uuid) -> Result<bool, StoreError>;

    /// Insert or replace the result for `(thread_id, query)`.
    async fn upsert_serp_result(&self, result: SerpResult) -> Result<SerpResult, StoreError>;
    /// Results for one thread, most recently checked first.
    async fn serp_results_for_thread(&self, thread_id: Uuid) -> Result<Vec<SerpResult>, StoreError>;
    async fn all_serp_results(&self) -> Result<Vec<SerpResult>, StoreError>;
    async fn delete_serp_result(&self, id: Uuid) -> Result<bool, StoreError>;

    /// Insert or replace the single opportunity for `opportunity.thread_id`.
    async fn upsert_opportunity(&self, opportunity: Opportunity) -> Result<Opportunity, StoreError>;
    async fn get_opportunity(&self, id: Uuid) -> Result<Option<Opportunity>, StoreError>;
    async fn opportunity_for_thread(&self, thread_id: Uuid) -> Result<Option<Opportunity>, StoreError>;
    async fn all_opportunities(&self) -> Result<Vec<Opportunity>, StoreError>;
    async fn list_opportunities(
        &self,
        query: &OpportunityQuery,
    ) -> Result<Page<OpportunityListing>, StoreError>;
    async fn count_opportunities(&self, filter: &OpportunityFilter) -> Result<usize, StoreError>;
    /// Replaces an existing row; `None` when the id is unknown.
    async fn update_opportunity(
        &self,
        opportunity: Opportunity,
    ) -> Result<Option<Opportunity>, StoreError>;
    async fn delete_opportunity(&self, id: Uuid) -> Result<bool, StoreError>;

    async fn insert_crawl_history(&self, history: &CrawlHistory) -> Result<(), StoreError>;
    async fn update_crawl_history(&self, history: &CrawlHistory) -> Result<bool, StoreError>;
    async fn get_crawl_history(&self, id: Uuid) -> Result<Option<CrawlHistory>, StoreError>;
    /// Most recent first.
    async fn list_crawl_history(&self, limit: usize) -> Result<Vec<CrawlHistory>, StoreError>;
}
