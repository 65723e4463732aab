use std::collections::BTreeMap;

use async_trait::async_trait;
use tof_core::query::{count_matching, run_query};
use tof_core::{
    AffiliateProgram, CrawlHistory, Opportunity, OpportunityFilter, OpportunityListing,
    OpportunityQuery, Page, SerpResult, Thread, ThreadFilter, ThreadQuery,
};
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::{Store, StoreError};

#[derive(Debug, Default)]
struct Tables {
    threads: BTreeMap<Uuid, Thread>,
    programs: BTreeMap<Uuid, AffiliateProgram>,
    serp_results: BTreeMap<Uuid, SerpResult>,
    opportunities: BTreeMap<Uuid, Opportunity>,
    crawl_history: BTreeMap<Uuid, CrawlHistory>,
}

impl Tables {
    fn listings(&self) -> Vec<OpportunityListing> {
        self.opportunities
            .values()
            .filter_map(|o| {
                self.threads.get(&o.thread_id).map(|t| OpportunityListing {
                    opportunity: o.clone(),
                    thread: t.clone(),
                })
            })
            .collect()
    }
}

/// Process-local store. Rows are replaced whole under a write lock, so readers
/// observe either the previous or the new version of a row.
#[derive(Debug, Default)]
pub struct MemoryStore {
    tables: RwLock<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn upsert_threads(&self, threads: &[Thread]) -> Result<usize, StoreError> {
        let mut tables = self.tables.write().await;
        for thread in threads {
            let mut thread = thread.clone();
            thread.id = Thread::natural_id(&thread.source, &thread.external_id);
            tables.threads.insert(thread.id, thread);
        }
        Ok(threads.len())
    }

    async fn get_thread(&self, id: Uuid) -> Result<Option<Thread>, StoreError> {
        Ok(self.tables.read().await.threads.get(&id).cloned())
    }

    async fn list_threads(&self, query: &ThreadQuery) -> Result<Page<Thread>, StoreError> {
        let tables = self.tables.read().await;
        Ok(run_query(
            tables.threads.values().cloned(),
            &query.filter,
            &query.sort,
            query.page,
        ))
    }

    async fn count_threads(&self, filter: &ThreadFilter) -> Result<usize, StoreError> {
        let tables = self.tables.read().await;
        Ok(count_matching(tables.threads.values(), filter))
    }

    async fn all_threads(&self) -> Result<Vec<Thread>, StoreError> {
        Ok(self.tables.read().await.threads.values().cloned().collect())
    }

    async fn delete_thread(&self, id: Uuid) -> Result<bool, StoreError> {
        let mut tables = self.tables.write().await;
        if tables.threads.remove(&id).is_none() {
            return Ok(false);
        }
        tables.serp_results.retain(|_, r| r.thread_id != id);
        tables.opportunities.retain(|_, o| o.thread_id != id);
        Ok(true)
    }

    async fn create_program(&self, program: AffiliateProgram) -> Result<AffiliateProgram, StoreError> {
        let mut tables = self.tables.write().await;
        tables.programs.insert(program.id, program.clone());
        Ok(program)
    }

    async fn get_program(&self, id: Uuid) -> Result<Option<AffiliateProgram>, StoreError> {
        Ok(self.tables.read().await.programs.get(&id).cloned())
    }

    async fn list_programs(&self) -> Result<Vec<AffiliateProgram>, StoreError> {
        let mut programs = self
            .tables
            .read()
            .await
            .programs
            .values()
            .cloned()
            .collect::<Vec<_>>();
        programs.sort_by(|a, b| a.name.cmp(&b.name).then_with(|| a.id.cmp(&b.id)));
        Ok(programs)
    }

    async fn update_program(
        &self,
        program: AffiliateProgram,
    ) -> Result<Option<AffiliateProgram>, StoreError> {
        let mut tables = self.tables.write().await;
        match tables.programs.get_mut(&program.id) {
            Some(existing) => {
                *existing = program.clone();
                Ok(Some(program))
            }
            None => Ok(None),
        }
    }

    async fn delete_program(&self, id: Uuid) -> Result<bool, StoreError> {
        Ok(self.tables.write().await.programs.remove(&id).is_some())
    }

    async fn upsert_serp_result(&self, result: SerpResult) -> Result<SerpResult, StoreError> {
        let mut tables = self.tables.write().await;
        if !tables.threads.contains_key(&result.thread_id) {
            return Err(StoreError::MissingThread {
                entity: "serp result",
                thread_id: result.thread_id,
            });
        }
        let mut result = result;
        result.id = SerpResult::natural_id(result.thread_id, &result.query);
        tables.serp_results.insert(result.id, result.clone());
        Ok(result)
    }

    async fn serp_results_for_thread(&self, thread_id: Uuid) -> Result<Vec<SerpResult>, StoreError> {
        let mut results = self
            .tables
            .read()
            .await
            .serp_results
            .values()
            .filter(|r| r.thread_id == thread_id)
            .cloned()
            .collect::<Vec<_>>();
        results.sort_by(|a, b| b.checked_at.cmp(&a.checked_at).then_with(|| a.id.cmp(&b.id)));
        Ok(results)
    }

    async fn all_serp_results(&self) -> Result<Vec<SerpResult>, StoreError> {
        Ok(self.tables.read().await.serp_results.values().cloned().collect())
    }

    async fn delete_serp_result(&self, id: Uuid) -> Result<bool, StoreError> {
        Ok(self.tables.write().await.serp_results.remove(&id).is_some())
    }

    async fn upsert_opportunity(&self, opportunity: Opportunity) -> Result<Opportunity, StoreError> {
        let mut tables = self.tables.write().await;
        if !tables.threads.contains_key(&opportunity.thread_id) {
            return Err(StoreError::MissingThread {
                entity: "opportunity",
                thread_id: opportunity.thread_id,
            });
        }
        let mut opportunity = opportunity;
        opportunity.id = Opportunity::natural_id(opportunity.thread_id);
        tables.opportunities.insert(opportunity.id, opportunity.clone());
        Ok(opportunity)
    }

    async fn get_opportunity(&self, id: Uuid) -> Result<Option<Opportunity>, StoreError> {
        Ok(self.tables.read().await.opportunities.get(&id).cloned())
    }

    async fn opportunity_for_thread(&self, thread_id: Uuid) -> Result<Option<Opportunity>, StoreError> {
        self.get_opportunity(Opportunity::natural_id(thread_id)).await
    }

    async fn all_opportunities(&self) -> Result<Vec<Opportunity>, StoreError> {
        Ok(self.tables.read().await.opportunities.values().cloned().collect())
    }

    async fn list_opportunities(
        &self,
        query: &OpportunityQuery,
    ) -> Result<Page<OpportunityListing>, StoreError> {
        let listings = self.tables.read().await.listings();
        Ok(run_query(listings, &query.filter, &query.sort, query.page))
    }

    async fn count_opportunities(&self, filter: &OpportunityFilter) -> Result<usize, StoreError> {
        let listings = self.tables.read().await.listings();
        Ok(count_matching(listings.iter(), filter))
    }

    async fn update_opportunity(
        &self,
        opportunity: Opportunity,
    ) -> Result<Option<Opportunity>, StoreError> {
        let mut tables = self.tables.write().await;
        match tables.opportunities.get_mut(&opportunity.id) {
            Some(existing) if existing.thread_id == opportunity.thread_id => {
                *existing = opportunity.clone();
                Ok(Some(opportunity))
            }
            _ => Ok(None),
        }
    }

    async fn delete_opportunity(&self, id: Uuid) -> Result<bool, StoreError> {
        Ok(self.tables.write().await.opportunities.remove(&id).is_some())
    }

    async fn insert_crawl_history(&self, history: &CrawlHistory) -> Result<(), StoreError> {
        let mut tables = self.tables.write().await;
        tables.crawl_history.insert(history.id, history.clone());
        Ok(())
    }

    async fn update_crawl_history(&self, history: &CrawlHistory) -> Result<bool, StoreError> {
        let mut tables = self.tables.write().await;
        match tables.crawl_history.get_mut(&history.id) {
            Some(existing) => {
                *existing = history.clone();
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn get_crawl_history(&self, id: Uuid) -> Result<Option<CrawlHistory>, StoreError> {
        Ok(self.tables.read().await.crawl_history.get(&id).cloned())
    }

    async fn list_crawl_history(&self, limit: usize) -> Result<Vec<CrawlHistory>, StoreError> {
        let mut rows = self
            .tables
            .read()
            .await
            .crawl_history
            .values()
            .cloned()
            .collect::<Vec<_>>();
        rows.sort_by(|a, b| b.started_at.cmp(&a.started_at).then_with(|| a.id.cmp(&b.id)));
        rows.truncate(limit);
        Ok(rows)
    }
}
