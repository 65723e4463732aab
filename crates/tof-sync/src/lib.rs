//! Crawl scheduling and opportunity scoring for TOF, plus the `Engine` facade
//! the transport layer talks to.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tof_adapters::{SearchEngine, ThreadCrawler};
use tof_core::{
    AffiliateProgram, CrawlHistory, Opportunity, OpportunityFilter, OpportunityListing,
    OpportunityPatch, OpportunityQuery, Page, PageRequest, RecommendedAction, SchedulerMode, SerpResult, Thread,
    ThreadFilter, ThreadQuery,
};
use tof_storage::Store;
use tracing::info;
use uuid::Uuid;

mod bootstrap;
pub mod config;
pub mod error;
pub mod orchestrator;
pub mod report;
pub mod scheduler;
pub mod scoring;
pub mod serp;

pub use bootstrap::{engine_from_config, engine_from_env, open_store};
pub use config::{SourceConfig, SourceRegistry, SyncConfig};
pub use error::EngineError;
pub use orchestrator::{CrawlOrchestrator, SourceTimeouts};
pub use report::{ReportManifest, ReportSummary};
pub use scheduler::{Cadence, CrawlScheduler};
pub use scoring::{OverridePolicy, ScoringConfig, ScoringEngine, ScoringThresholds, Signal};
pub use serp::{SerpChecker, SerpSettings};

pub const CRATE_NAME: &str = "tof-sync";

const DASHBOARD_TOP_N: usize = 5;

#[derive(Debug, Clone)]
pub struct EngineSettings {
    pub default_sources: Vec<String>,
    pub cadence: Cadence,
    pub source_timeouts: SourceTimeouts,
    pub serp: SerpSettings,
    pub scoring: ScoringConfig,
    pub override_policy: OverridePolicy,
    pub refresh_check_serp: bool,
    pub reports_dir: PathBuf,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            default_sources: Vec::new(),
            cadence: Cadence::Interval(Duration::from_secs(3600)),
            source_timeouts: SourceTimeouts::default(),
            serp: SerpSettings::default(),
            scoring: ScoringConfig::default(),
            override_policy: OverridePolicy::default(),
            refresh_check_serp: false,
            reports_dir: PathBuf::from("./artifacts/reports"),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SchedulerStatus {
    /// True while the periodic trigger is armed or a pass is in flight.
    pub running: bool,
    pub mode: SchedulerMode,
    pub cadence: String,
}

/// Operator-supplied fields of an affiliate program.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ProgramInput {
    pub name: String,
    pub link: String,
    #[serde(default)]
    pub promo_code: Option<String>,
    #[serde(default)]
    pub keywords: Vec<String>,
}

impl ProgramInput {
    fn validate(self) -> Result<Self, EngineError> {
        let name = self.name.trim().to_string();
        let link = self.link.trim().to_string();
        if name.is_empty() {
            return Err(EngineError::validation("program name must not be blank"));
        }
        if link.is_empty() {
            return Err(EngineError::validation("program link must not be blank"));
        }
        let keywords = self
            .keywords
            .into_iter()
            .map(|k| k.trim().to_string())
            .filter(|k| !k.is_empty())
            .collect::<Vec<_>>();
        if keywords.is_empty() {
            return Err(EngineError::validation("program needs at least one keyword"));
        }
        Ok(Self {
            name,
            link,
            promo_code: self.promo_code.filter(|c| !c.trim().is_empty()),
            keywords,
        })
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct DashboardSummary {
    pub scheduler: SchedulerStatus,
    pub threads: usize,
    pub opportunities: usize,
    pub comment: usize,
    pub watch: usize,
    pub skip: usize,
    pub top: Vec<OpportunityListing>,
    pub last_crawl: Option<CrawlHistory>,
}

pub struct Engine {
    store: Arc<dyn Store>,
    scheduler: Arc<CrawlScheduler>,
    serp: Arc<SerpChecker>,
    scoring: ScoringEngine,
    reports_dir: PathBuf,
}

impl Engine {
    pub fn new(
        store: Arc<dyn Store>,
        crawler: Arc<dyn ThreadCrawler>,
        search: Arc<dyn SearchEngine>,
        settings: EngineSettings,
    ) -> Self {
        let orchestrator = Arc::new(CrawlOrchestrator::new(
            store.clone(),
            crawler,
            settings.source_timeouts,
        ));
        let scheduler = Arc::new(CrawlScheduler::new(
            orchestrator,
            settings.default_sources,
            settings.cadence,
        ));
        let serp = Arc::new(SerpChecker::new(store.clone(), search, settings.serp));
        let mut scoring = ScoringEngine::new(store.clone(), settings.scoring, settings.override_policy);
        if settings.refresh_check_serp {
            scoring = scoring.with_serp_backfill(serp.clone());
        }
        Self {
            store,
            scheduler,
            serp,
            scoring,
            reports_dir: settings.reports_dir,
        }
    }

    pub fn store(&self) -> &Arc<dyn Store> {
        &self.store
    }

    pub fn scheduler(&self) -> &Arc<CrawlScheduler> {
        &self.scheduler
    }

    pub fn scoring(&self) -> &ScoringEngine {
        &self.scoring
    }

    pub async fn start_scheduler(&self) -> Result<bool, EngineError> {
        self.scheduler.start().await
    }

    pub async fn stop_scheduler(&self) -> bool {
        self.scheduler.stop().await
    }

    pub fn scheduler_status(&self) -> SchedulerStatus {
        let mode = self.scheduler.status();
        SchedulerStatus {
            running: mode != SchedulerMode::Stopped,
            mode,
            cadence: self.scheduler.cadence().to_string(),
        }
    }

    pub async fn run_crawler_now(&self, sources: Option<Vec<String>>) -> Result<CrawlHistory, EngineError> {
        self.scheduler.run_now(sources).await
    }

    pub async fn refresh_opportunities(&self) -> Result<usize, EngineError> {
        self.scoring.refresh_all().await
    }

    pub async fn check_serp_position(
        &self,
        thread_id: Uuid,
        query: Option<&str>,
    ) -> Result<SerpResult, EngineError> {
        self.serp.check_position(thread_id, query).await
    }

    pub async fn list_threads(&self, query: &ThreadQuery) -> Result<Page<Thread>, EngineError> {
        Ok(self.store.list_threads(query).await?)
    }

    pub async fn count_threads(&self, filter: &ThreadFilter) -> Result<usize, EngineError> {
        Ok(self.store.count_threads(filter).await?)
    }

    pub async fn get_thread(&self, id: Uuid) -> Result<Thread, EngineError> {
        self.store
            .get_thread(id)
            .await?
            .ok_or_else(|| EngineError::not_found("thread", id))
    }

    pub async fn thread_serp_results(&self, thread_id: Uuid) -> Result<Vec<SerpResult>, EngineError> {
        self.get_thread(thread_id).await?;
        Ok(self.store.serp_results_for_thread(thread_id).await?)
    }

    pub async fn list_opportunities(
        &self,
        query: &OpportunityQuery,
    ) -> Result<Page<OpportunityListing>, EngineError> {
        if let (Some(min), Some(max)) = (query.filter.score_min, query.filter.score_max) {
            if min > max {
                return Err(EngineError::validation(format!(
                    "score_min {min} is greater than score_max {max}"
                )));
            }
        }
        Ok(self.store.list_opportunities(query).await?)
    }

    pub async fn count_opportunities(&self, filter: &OpportunityFilter) -> Result<usize, EngineError> {
        Ok(self.store.count_opportunities(filter).await?)
    }

    pub async fn get_opportunity(&self, id: Uuid) -> Result<OpportunityListing, EngineError> {
        let opportunity = self
            .store
            .get_opportunity(id)
            .await?
            .ok_or_else(|| EngineError::not_found("opportunity", id))?;
        let thread = self.get_thread(opportunity.thread_id).await?;
        Ok(OpportunityListing { opportunity, thread })
    }

    /// Manual edit; the row is flagged so a `preserve-manual` refresh keeps it.
    pub async fn update_opportunity(
        &self,
        id: Uuid,
        patch: OpportunityPatch,
    ) -> Result<Opportunity, EngineError> {
        if patch.action.is_none() && patch.score.is_none() {
            return Err(EngineError::validation("patch must set action or score"));
        }
        if patch.score.is_some_and(|s| !s.is_finite()) {
            return Err(EngineError::validation("score must be a finite number"));
        }
        let mut opportunity = self
            .store
            .get_opportunity(id)
            .await?
            .ok_or_else(|| EngineError::not_found("opportunity", id))?;
        if let Some(action) = patch.action {
            opportunity.action = action;
        }
        if let Some(score) = patch.score {
            opportunity.score = score;
        }
        opportunity.manual_override = true;
        opportunity.updated_at = Utc::now();

        let updated = self
            .store
            .update_opportunity(opportunity)
            .await?
            .ok_or_else(|| EngineError::not_found("opportunity", id))?;
        info!(opportunity_id = %id, action = updated.action.as_str(), score = updated.score, "opportunity edited");
        Ok(updated)
    }

    pub async fn delete_opportunity(&self, id: Uuid) -> Result<(), EngineError> {
        if self.store.delete_opportunity(id).await? {
            Ok(())
        } else {
            Err(EngineError::not_found("opportunity", id))
        }
    }

    pub async fn list_programs(&self) -> Result<Vec<AffiliateProgram>, EngineError> {
        Ok(self.store.list_programs().await?)
    }

    pub async fn get_program(&self, id: Uuid) -> Result<AffiliateProgram, EngineError> {
        self.store
            .get_program(id)
            .await?
            .ok_or_else(|| EngineError::not_found("program", id))
    }

    pub async fn create_program(&self, input: ProgramInput) -> Result<AffiliateProgram, EngineError> {
        let input = input.validate()?;
        let mut program = AffiliateProgram::new(input.name, input.link, input.keywords);
        program.promo_code = input.promo_code;
        Ok(self.store.create_program(program).await?)
    }

    pub async fn update_program(
        &self,
        id: Uuid,
        input: ProgramInput,
    ) -> Result<AffiliateProgram, EngineError> {
        let input = input.validate()?;
        let program = AffiliateProgram {
            id,
            name: input.name,
            link: input.link,
            promo_code: input.promo_code,
            keywords: input.keywords,
        };
        self.store
            .update_program(program)
            .await?
            .ok_or_else(|| EngineError::not_found("program", id))
    }

    pub async fn delete_program(&self, id: Uuid) -> Result<(), EngineError> {
        if self.store.delete_program(id).await? {
            Ok(())
        } else {
            Err(EngineError::not_found("program", id))
        }
    }

    pub async fn list_crawl_history(&self, limit: usize) -> Result<Vec<CrawlHistory>, EngineError> {
        Ok(self.store.list_crawl_history(limit.clamp(1, 500)).await?)
    }

    pub async fn get_crawl_history(&self, id: Uuid) -> Result<CrawlHistory, EngineError> {
        self.store
            .get_crawl_history(id)
            .await?
            .ok_or_else(|| EngineError::not_found("crawl history", id))
    }

    pub async fn dashboard(&self) -> Result<DashboardSummary, EngineError> {
        let by_action = |action| OpportunityFilter {
            action: Some(action),
            ..Default::default()
        };
        let top = self
            .store
            .list_opportunities(&OpportunityQuery {
                filter: by_action(RecommendedAction::Comment),
                page: PageRequest::new(Some(DASHBOARD_TOP_N), None),
                ..Default::default()
            })
            .await?;

        Ok(DashboardSummary {
            scheduler: self.scheduler_status(),
            threads: self.store.count_threads(&ThreadFilter::default()).await?,
            opportunities: self
                .store
                .count_opportunities(&OpportunityFilter::default())
                .await?,
            comment: top.total,
            watch: self
                .store
                .count_opportunities(&by_action(RecommendedAction::Watch))
                .await?,
            skip: self
                .store
                .count_opportunities(&by_action(RecommendedAction::Skip))
                .await?,
            top: top.items,
            last_crawl: self.store.list_crawl_history(1).await?.into_iter().next(),
        })
    }

    pub async fn export_report(&self) -> anyhow::Result<ReportSummary> {
        report::export_report(self.store.as_ref(), &self.reports_dir, Utc::now()).await
    }

    pub async fn shutdown(&self) {
        self.scheduler.shutdown().await;
    }
}
