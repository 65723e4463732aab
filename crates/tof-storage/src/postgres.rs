use std::time::Duration;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use tof_core::query::{count_matching, run_query};
use tof_core::{
    AffiliateProgram, CrawlHistory, Opportunity, OpportunityFilter, OpportunityListing,
    OpportunityQuery, Page, SerpResult, Thread, ThreadFilter, ThreadQuery,
};
use tracing::info;
use uuid::Uuid;

use crate::{Store, StoreError};

/// Postgres-backed store. Each entity is kept as a JSONB document next to the
/// columns that carry its natural key; filtering and ordering reuse the shared
/// query engine so both stores answer listings identically.
#[derive(Debug, Clone)]
pub struct PgStore {
    pool: PgPool,
}

fn decode<T: DeserializeOwned>(value: serde_json::Value) -> Result<T, StoreError> {
    Ok(serde_json::from_value(value)?)
}

fn decode_all<T: DeserializeOwned>(values: Vec<serde_json::Value>) -> Result<Vec<T>, StoreError> {
    values.into_iter().map(decode).collect()
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections.max(1))
            .acquire_timeout(Duration::from_secs(5))
            .connect(database_url)
            .await?;
        Ok(Self { pool })
    }

    pub async fn migrate(&self) -> Result<(), StoreError> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        info!("database migrations applied");
        Ok(())
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    async fn listings(&self) -> Result<Vec<OpportunityListing>, StoreError> {
        let rows = sqlx::query_as::<_, (serde_json::Value, serde_json::Value)>(
            "SELECT o.data_json, t.data_json FROM opportunities o \
             JOIN threads t ON t.id = o.thread_id",
        )
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter()
            .map(|(opportunity, thread)| {
                Ok(OpportunityListing {
                    opportunity: decode(opportunity)?,
                    thread: decode(thread)?,
                })
            })
            .collect()
    }

    async fn thread_exists(&self, id: Uuid) -> Result<bool, StoreError> {
        let found = sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM threads WHERE id = $1")
            .bind(id)
            .fetch_one(&self.pool)
            .await?;
        Ok(found > 0)
    }
}

#[async_trait]
impl Store for PgStore {
    async fn upsert_threads(&self, threads: &[Thread]) -> Result<usize, StoreError> {
        let mut tx = self.pool.begin().await?;
        for thread in threads {
            let mut thread = thread.clone();
            thread.id = Thread::natural_id(&thread.source, &thread.external_id);
            sqlx::query(
                "INSERT INTO threads (id, source, external_id, crawled_at, data_json) \
                 VALUES ($1, $2, $3, $4, $5) \
                 ON CONFLICT (id) DO UPDATE \
                 SET source = EXCLUDED.source, crawled_at = EXCLUDED.crawled_at, \
                 data_json = EXCLUDED.data_json",
            )
            .bind(thread.id)
            .bind(&thread.source)
            .bind(&thread.external_id)
            .bind(thread.crawled_at)
            .bind(serde_json::to_value(&thread)?)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(threads.len())
    }

    async fn get_thread(&self, id: Uuid) -> Result<Option<Thread>, StoreError> {
        sqlx::query_scalar::<_, serde_json::Value>("SELECT data_json FROM threads WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .map(decode)
            .transpose()
    }

    async fn list_threads(&self, query: &ThreadQuery) -> Result<Page<Thread>, StoreError> {
        let threads = self.all_threads().await?;
        Ok(run_query(threads, &query.filter, &query.sort, query.page))
    }

    async fn count_threads(&self, filter: &ThreadFilter) -> Result<usize, StoreError> {
        let threads = self.all_threads().await?;
        Ok(count_matching(threads.iter(), filter))
    }

    async fn all_threads(&self) -> Result<Vec<Thread>, StoreError> {
        let rows = sqlx::query_scalar::<_, serde_json::Value>("SELECT data_json FROM threads")
            .fetch_all(&self.pool)
            .await?;
        decode_all(rows)
    }

    async fn delete_thread(&self, id: Uuid) -> Result<bool, StoreError> {
        let result = sqlx::query("DELETE FROM threads WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn create_program(&self, program: AffiliateProgram) -> Result<AffiliateProgram, StoreError> {
        sqlx::query("INSERT INTO affiliate_programs (id, name, data_json) VALUES ($1, $2, $3)")
            .bind(program.id)
            .bind(&program.name)
            .bind(serde_json::to_value(&program)?)
            .execute(&self.pool)
            .await?;
        Ok(program)
    }

    async fn get_program(&self, id: Uuid) -> Result<Option<AffiliateProgram>, StoreError> {
        sqlx::query_scalar::<_, serde_json::Value>(
            "SELECT data_json FROM affiliate_programs WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?
        .map(decode)
        .transpose()
    }

    async fn list_programs(&self) -> Result<Vec<AffiliateProgram>, StoreError> {
        let rows = sqlx::query_scalar::<_, serde_json::Value>(
            "SELECT data_json FROM affiliate_programs ORDER BY name, id",
        )
        .fetch_all(&self.pool)
        .await?;
        decode_all(rows)
    }

    async fn update_program(
        &self,
        program: AffiliateProgram,
    ) -> Result<Option<AffiliateProgram>, StoreError> {
        let result = sqlx::query("UPDATE affiliate_programs SET name = $2, data_json = $3 WHERE id = $1")
            .bind(program.id)
            .bind(&program.name)
            .bind(serde_json::to_value(&program)?)
            .execute(&self.pool)
            .await?;
        Ok((result.rows_affected() > 0).then_some(program))
    }

    async fn delete_program(&self, id: Uuid) -> Result<bool, StoreError> {
        let result = sqlx::query("DELETE FROM affiliate_programs WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn upsert_serp_result(&self, result: SerpResult) -> Result<SerpResult, StoreError> {
        if !self.thread_exists(result.thread_id).await? {
            return Err(StoreError::MissingThread {
                entity: "serp result",
                thread_id: result.thread_id,
            });
        }
        let mut result = result;
        result.id = SerpResult::natural_id(result.thread_id, &result.query);
        sqlx::query(
            "INSERT INTO serp_results (id, thread_id, query, checked_at, data_json) \
             VALUES ($1, $2, $3, $4, $5) \
             ON CONFLICT (thread_id, query) DO UPDATE \
             SET checked_at = EXCLUDED.checked_at, data_json = EXCLUDED.data_json",
        )
        .bind(result.id)
        .bind(result.thread_id)
        .bind(&result.query)
        .bind(result.checked_at)
        .bind(serde_json::to_value(&result)?)
        .execute(&self.pool)
        .await?;
        Ok(result)
    }

    async fn serp_results_for_thread(&self, thread_id: Uuid) -> Result<Vec<SerpResult>, StoreError> {
        let rows = sqlx::query_scalar::<_, serde_json::Value>(
            "SELECT data_json FROM serp_results WHERE thread_id = $1 ORDER BY checked_at DESC, id",
        )
        .bind(thread_id)
        .fetch_all(&self.pool)
        .await?;
        decode_all(rows)
    }

    async fn all_serp_results(&self) -> Result<Vec<SerpResult>, StoreError> {
        let rows = sqlx::query_scalar::<_, serde_json::Value>("SELECT data_json FROM serp_results")
            .fetch_all(&self.pool)
            .await?;
        decode_all(rows)
    }

    async fn delete_serp_result(&self, id: Uuid) -> Result<bool, StoreError> {
        let result = sqlx::query("DELETE FROM serp_results WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn upsert_opportunity(&self, opportunity: Opportunity) -> Result<Opportunity, StoreError> {
        if !self.thread_exists(opportunity.thread_id).await? {
            return Err(StoreError::MissingThread {
                entity: "opportunity",
                thread_id: opportunity.thread_id,
            });
        }
        let mut opportunity = opportunity;
        opportunity.id = Opportunity::natural_id(opportunity.thread_id);
        sqlx::query(
            "INSERT INTO opportunities (id, thread_id, score, data_json) VALUES ($1, $2, $3, $4) \
             ON CONFLICT (thread_id) DO UPDATE \
             SET score = EXCLUDED.score, data_json = EXCLUDED.data_json",
        )
        .bind(opportunity.id)
        .bind(opportunity.thread_id)
        .bind(opportunity.score)
        .bind(serde_json::to_value(&opportunity)?)
        .execute(&self.pool)
        .await?;
        Ok(opportunity)
    }

    async fn get_opportunity(&self, id: Uuid) -> Result<Option<Opportunity>, StoreError> {
        sqlx::query_scalar::<_, serde_json::Value>("SELECT data_json FROM opportunities WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .map(decode)
            .transpose()
    }

    async fn opportunity_for_thread(&self, thread_id: Uuid) -> Result<Option<Opportunity>, StoreError> {
        sqlx::query_scalar::<_, serde_json::Value>(
            "SELECT data_json FROM opportunities WHERE thread_id = $1",
        )
        .bind(thread_id)
        .fetch_optional(&self.pool)
        .await?
        .map(decode)
        .transpose()
    }

    async fn all_opportunities(&self) -> Result<Vec<Opportunity>, StoreError> {
        let rows = sqlx::query_scalar::<_, serde_json::Value>("SELECT data_json FROM opportunities")
            .fetch_all(&self.pool)
            .await?;
        decode_all(rows)
    }

    async fn list_opportunities(
        &self,
        query: &OpportunityQuery,
    ) -> Result<Page<OpportunityListing>, StoreError> {
        let listings = self.listings().await?;
        Ok(run_query(listings, &query.filter, &query.sort, query.page))
    }

    async fn count_opportunities(&self, filter: &OpportunityFilter) -> Result<usize, StoreError> {
        let listings = self.listings().await?;
        Ok(count_matching(listings.iter(), filter))
    }

    async fn update_opportunity(
        &self,
        opportunity: Opportunity,
    ) -> Result<Option<Opportunity>, StoreError> {
        let result = sqlx::query(
            "UPDATE opportunities SET score = $3, data_json = $4 WHERE id = $1 AND thread_id = $2",
        )
        .bind(opportunity.id)
        .bind(opportunity.thread_id)
        .bind(opportunity.score)
        .bind(serde_json::to_value(&opportunity)?)
        .execute(&self.pool)
        .await?;
        Ok((result.rows_affected() > 0).then_some(opportunity))
    }

    async fn delete_opportunity(&self, id: Uuid) -> Result<bool, StoreError> {
        let result = sqlx::query("DELETE FROM opportunities WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn insert_crawl_history(&self, history: &CrawlHistory) -> Result<(), StoreError> {
        sqlx::query("INSERT INTO crawl_history (id, started_at, status, data_json) VALUES ($1, $2, $3, $4)")
            .bind(history.id)
            .bind(history.started_at)
            .bind(history.status.as_str())
            .bind(serde_json::to_value(history)?)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn update_crawl_history(&self, history: &CrawlHistory) -> Result<bool, StoreError> {
        let result = sqlx::query("UPDATE crawl_history SET status = $2, data_json = $3 WHERE id = $1")
            .bind(history.id)
            .bind(history.status.as_str())
            .bind(serde_json::to_value(history)?)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn get_crawl_history(&self, id: Uuid) -> Result<Option<CrawlHistory>, StoreError> {
        sqlx::query_scalar::<_, serde_json::Value>("SELECT data_json FROM crawl_history WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .map(decode)
            .transpose()
    }

    async fn list_crawl_history(&self, limit: usize) -> Result<Vec<CrawlHistory>, StoreError> {
        let rows = sqlx::query_scalar::<_, serde_json::Value>(
            "SELECT data_json FROM crawl_history ORDER BY started_at DESC, id LIMIT $1",
        )
        .bind(i64::try_from(limit).unwrap_or(i64::MAX))
        .fetch_all(&self.pool)
        .await?;
        decode_all(rows)
    }
}
