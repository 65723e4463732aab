use std::sync::Arc;

use anyhow::{bail, Result};
use clap::{Parser, Subcommand};
use tof_sync::{engine_from_config, open_store, Engine, SyncConfig};
use tracing::warn;
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

#[derive(Debug, Parser)]
#[command(name = "tof-cli")]
#[command(about = "Thread Opportunity Finder command-line interface")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Run one crawl pass, then refresh opportunities.
    Crawl {
        /// Sources to crawl; defaults to the enabled sources in sources.yaml.
        sources: Vec<String>,
    },
    /// Recompute every opportunity from stored threads.
    Refresh,
    /// Check where a thread ranks in search results.
    Serp {
        thread_id: Uuid,
        #[arg(long)]
        query: Option<String>,
    },
    /// Serve the JSON API and dashboard.
    Serve,
    /// Apply Postgres migrations.
    Migrate,
    /// Export parquet, daily brief and manifest for the current opportunities.
    Report {
        /// Crawl and refresh first.
        #[arg(long)]
        crawl: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    let config = SyncConfig::from_env();

    match cli.command.unwrap_or(Commands::Crawl { sources: Vec::new() }) {
        Commands::Crawl { sources } => {
            let engine = engine_from_config(&config).await?;
            crawl_and_refresh(&engine, sources).await?;
            engine.shutdown().await;
        }
        Commands::Refresh => {
            warn_if_ephemeral(&config);
            let engine = engine_from_config(&config).await?;
            let refreshed = engine.refresh_opportunities().await?;
            println!("refresh complete: opportunities={refreshed}");
        }
        Commands::Serp { thread_id, query } => {
            warn_if_ephemeral(&config);
            let engine = engine_from_config(&config).await?;
            let result = engine.check_serp_position(thread_id, query.as_deref()).await?;
            let position = result
                .position
                .map(|p| p.to_string())
                .unwrap_or_else(|| "not found".into());
            println!(
                "serp check: thread={} query={:?} position={} ranked={}",
                result.thread_id, result.query, position, result.ranked
            );
        }
        Commands::Serve => {
            let port = config.web_port;
            let engine = Arc::new(engine_from_config(&config).await?);
            tof_web::serve(engine, port).await?;
        }
        Commands::Migrate => {
            if config.database_url.is_none() {
                bail!("DATABASE_URL must be set to run migrations");
            }
            open_store(&config).await?;
            println!("migrations applied");
        }
        Commands::Report { crawl } => {
            if !crawl {
                warn_if_ephemeral(&config);
            }
            let engine = engine_from_config(&config).await?;
            if crawl {
                crawl_and_refresh(&engine, Vec::new()).await?;
            }
            let summary = engine.export_report().await?;
            println!(
                "report written: dir={} opportunities={}",
                summary.report_dir.display(),
                summary.opportunities
            );
        }
    }

    Ok(())
}

async fn crawl_and_refresh(engine: &Engine, sources: Vec<String>) -> Result<()> {
    let sources = (!sources.is_empty()).then_some(sources);
    let history = engine.run_crawler_now(sources).await?;
    println!(
        "crawl complete: id={} status={} succeeded={} failed={} threads={}",
        history.id,
        history.status.as_str(),
        history.success_count,
        history.failure_count,
        history.thread_count
    );
    for outcome in history.outcomes.iter().filter(|o| !o.succeeded) {
        println!(
            "  {} failed: {}",
            outcome.source,
            outcome.error.as_deref().unwrap_or("unknown error")
        );
    }
    let refreshed = engine.refresh_opportunities().await?;
    println!("refresh complete: opportunities={refreshed}");
    Ok(())
}

fn warn_if_ephemeral(config: &SyncConfig) {
    if config.database_url.is_none() {
        warn!("DATABASE_URL is not set; the in-memory store starts empty for this command");
    }
}
