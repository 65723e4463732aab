use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tof_adapters::{
    FixtureCrawler, HttpSearchClient, HttpThreadCrawler, SearchEngine, StaticSearchEngine,
    ThreadCrawler,
};
use tof_storage::{HttpClientConfig, HttpFetcher, MemoryStore, PayloadArchive, PgStore, Store};
use tracing::{info, warn};

use crate::config::{load_program_seeds, SourceRegistry, SyncConfig};
use crate::orchestrator::SourceTimeouts;
use crate::scheduler::Cadence;
use crate::scoring::ScoringConfig;
use crate::serp::SerpSettings;
use crate::{Engine, EngineSettings};

/// Postgres when `DATABASE_URL` is set (migrated on open), otherwise an
/// in-memory store.
pub async fn open_store(config: &SyncConfig) -> Result<Arc<dyn Store>> {
    match &config.database_url {
        Some(url) => {
            let store = PgStore::connect(url, 10)
                .await
                .context("connecting to postgres")?;
            store.migrate().await.context("running migrations")?;
            info!("using postgres store");
            Ok(Arc::new(store))
        }
        None => {
            info!("DATABASE_URL not set; using in-memory store");
            Ok(Arc::new(MemoryStore::new()))
        }
    }
}

async fn seed_programs(store: &dyn Store, config: &SyncConfig) -> Result<()> {
    let path = config.programs_path();
    if !path.is_file() || !store.list_programs().await?.is_empty() {
        return Ok(());
    }
    let seeds = load_program_seeds(&path)?;
    let count = seeds.len();
    for program in seeds {
        store.create_program(program).await?;
    }
    info!(count, path = %path.display(), "seeded affiliate programs");
    Ok(())
}

fn build_collaborators(
    config: &SyncConfig,
) -> Result<(Arc<dyn ThreadCrawler>, Arc<dyn SearchEngine>)> {
    let http = if config.crawler_url.is_some() || config.search_url.is_some() {
        Some(Arc::new(
            HttpFetcher::new(HttpClientConfig {
                timeout: Duration::from_secs(config.http_timeout_secs),
                user_agent: Some(config.user_agent.clone()),
                ..Default::default()
            })
            .context("building http client")?,
        ))
    } else {
        None
    };

    let crawler: Arc<dyn ThreadCrawler> = match (&config.crawler_url, &http) {
        (Some(url), Some(http)) => Arc::new(
            HttpThreadCrawler::new(http.clone(), url)?
                .with_archive(PayloadArchive::new(config.artifacts_dir.join("raw"))),
        ),
        _ => Arc::new(FixtureCrawler::new(config.fixtures_dir())),
    };

    let search: Arc<dyn SearchEngine> = match (&config.search_url, &http) {
        (Some(url), Some(http)) => Arc::new(HttpSearchClient::new(http.clone(), url.clone())),
        _ => {
            let path = config.fixtures_dir().join("serp.json");
            if path.is_file() {
                Arc::new(StaticSearchEngine::from_fixture_file(&path)?)
            } else {
                warn!(path = %path.display(), "no search endpoint or fixture; serp checks will find nothing");
                Arc::new(StaticSearchEngine::default())
            }
        }
    };

    info!(crawler = crawler.name(), search = search.name(), "collaborators selected");
    Ok((crawler, search))
}

pub async fn engine_from_config(config: &SyncConfig) -> Result<Engine> {
    let store = open_store(config).await?;
    seed_programs(store.as_ref(), config).await?;

    let registry = if config.sources_path().is_file() {
        SourceRegistry::load(&config.sources_path())?
    } else {
        warn!(path = %config.sources_path().display(), "no source registry; crawls need explicit sources");
        SourceRegistry { sources: Vec::new() }
    };
    let scoring = if config.scoring_path().is_file() {
        ScoringConfig::load(&config.scoring_path())?
    } else {
        ScoringConfig::default()
    };

    let (crawler, search) = build_collaborators(config)?;
    let cadence = match &config.crawl_cron {
        Some(expr) => Cadence::Cron(expr.clone()),
        None => Cadence::Interval(config.crawl_interval()),
    };

    let engine = Engine::new(
        store,
        crawler,
        search,
        EngineSettings {
            default_sources: registry.enabled_sources(),
            cadence,
            source_timeouts: SourceTimeouts {
                default: Duration::from_secs(config.source_timeout_secs),
                per_source: registry.timeout_overrides(),
            },
            serp: SerpSettings {
                top_n: config.serp_top_n,
                result_window: config.serp_result_window,
                timeout: Duration::from_secs(config.search_timeout_secs),
            },
            scoring,
            override_policy: config.override_policy,
            refresh_check_serp: config.refresh_check_serp,
            reports_dir: config.reports_dir(),
        },
    );

    if config.scheduler_autostart {
        engine.start_scheduler().await.context("starting crawl scheduler")?;
    }
    Ok(engine)
}

pub async fn engine_from_env() -> Result<Engine> {
    engine_from_config(&SyncConfig::from_env()).await
}
