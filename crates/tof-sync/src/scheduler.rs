//! Periodic and on-demand crawl execution with a single-flight guarantee.
//!
//! `armed` mirrors whether a periodic job is installed and `running` whether a
//! crawl pass is in flight. Both are atomics so `status()` never waits on the
//! lock that serializes `start`/`stop`. The only way to begin a pass is to win
//! the compare-and-swap on `running`; a timer tick that loses is dropped.

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use tof_core::{CrawlHistory, CrawlTrigger, SchedulerMode};
use tokio::sync::Mutex;
use tokio_cron_scheduler::{Job, JobScheduler};
use tracing::{info, warn};
use uuid::Uuid;

use crate::error::EngineError;
use crate::orchestrator::CrawlOrchestrator;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Cadence {
    Interval(Duration),
    /// Cron expression in the seconds-first form tokio-cron-scheduler accepts.
    Cron(String),
}

impl fmt::Display for Cadence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Cadence::Interval(every) => write!(f, "every {}s", every.as_secs()),
            Cadence::Cron(expr) => write!(f, "cron '{expr}'"),
        }
    }
}

struct ArmedTimer {
    scheduler: JobScheduler,
    job_id: Uuid,
}

/// Clears the in-flight flag when a pass ends, including on error or panic.
struct RunGuard<'a>(&'a AtomicBool);

impl<'a> RunGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| RunGuard(flag))
    }
}

impl Drop for RunGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

pub struct CrawlScheduler {
    orchestrator: Arc<CrawlOrchestrator>,
    default_sources: Vec<String>,
    cadence: Cadence,
    armed: AtomicBool,
    running: AtomicBool,
    timer: Mutex<Option<ArmedTimer>>,
}

fn scheduled_tick(scheduler: Weak<CrawlScheduler>) -> Pin<Box<dyn Future<Output = ()> + Send>> {
    Box::pin(async move {
        if let Some(scheduler) = scheduler.upgrade() {
            scheduler.tick().await;
        }
    })
}

impl CrawlScheduler {
    pub fn new(
        orchestrator: Arc<CrawlOrchestrator>,
        default_sources: Vec<String>,
        cadence: Cadence,
    ) -> Self {
        Self {
            orchestrator,
            default_sources,
            cadence,
            armed: AtomicBool::new(false),
            running: AtomicBool::new(false),
            timer: Mutex::new(None),
        }
    }

    pub fn cadence(&self) -> &Cadence {
        &self.cadence
    }

    pub fn default_sources(&self) -> &[String] {
        &self.default_sources
    }

    pub fn status(&self) -> SchedulerMode {
        if self.running.load(Ordering::Acquire) {
            SchedulerMode::Running
        } else if self.armed.load(Ordering::Acquire) {
            SchedulerMode::Scheduled
        } else {
            SchedulerMode::Stopped
        }
    }

    /// Arm the periodic trigger. `false` when already armed or a pass is in flight.
    pub async fn start(self: &Arc<Self>) -> Result<bool, EngineError> {
        let mut timer = self.timer.lock().await;
        if timer.is_some() || self.running.load(Ordering::Acquire) {
            return Ok(false);
        }

        let scheduler = JobScheduler::new().await?;
        let job_id = scheduler.add(self.build_job()?).await?;
        scheduler.start().await?;

        *timer = Some(ArmedTimer { scheduler, job_id });
        self.armed.store(true, Ordering::Release);
        info!(cadence = %self.cadence, "crawl scheduler armed");
        Ok(true)
    }

    /// Disarm the periodic trigger. `false` when it was not armed. A pass that
    /// is already in flight runs to completion.
    pub async fn stop(&self) -> bool {
        let mut timer = self.timer.lock().await;
        let Some(mut armed) = timer.take() else {
            return false;
        };
        self.armed.store(false, Ordering::Release);

        if let Err(err) = armed.scheduler.remove(&armed.job_id).await {
            warn!(error = %err, "removing crawl job failed");
        }
        if let Err(err) = armed.scheduler.shutdown().await {
            warn!(error = %err, "shutting down job scheduler failed");
        }
        info!("crawl scheduler stopped");
        true
    }

    /// Run one pass now, over `sources` or the configured defaults. Rejected
    /// with `CrawlInProgress` while another pass is in flight; the timer is
    /// left as it was.
    pub async fn run_now(&self, sources: Option<Vec<String>>) -> Result<CrawlHistory, EngineError> {
        self.execute(CrawlTrigger::Manual, sources).await
    }

    /// Body of one timer firing. Returns `None` when the tick was dropped
    /// because a pass was in flight, the timer was disarmed, or the pass failed.
    pub async fn tick(&self) -> Option<CrawlHistory> {
        if !self.armed.load(Ordering::Acquire) {
            return None;
        }
        match self.execute(CrawlTrigger::Scheduled, None).await {
            Ok(history) => Some(history),
            Err(EngineError::CrawlInProgress) => {
                warn!("scheduled tick skipped; a crawl pass is already in flight");
                None
            }
            Err(err) => {
                warn!(error = %err, "scheduled crawl pass failed");
                None
            }
        }
    }

    pub async fn shutdown(&self) {
        self.stop().await;
    }

    async fn execute(
        &self,
        trigger: CrawlTrigger,
        sources: Option<Vec<String>>,
    ) -> Result<CrawlHistory, EngineError> {
        let _guard = RunGuard::acquire(&self.running).ok_or(EngineError::CrawlInProgress)?;
        let sources = sources.unwrap_or_else(|| self.default_sources.clone());
        self.orchestrator.run_crawl(&sources, trigger).await
    }

    fn build_job(self: &Arc<Self>) -> Result<Job, EngineError> {
        let weak = Arc::downgrade(self);
        let job = match &self.cadence {
            Cadence::Interval(every) => {
                let weak = weak.clone();
                Job::new_repeated_async(*every, move |_uuid, _lock| scheduled_tick(weak.clone()))?
            }
            Cadence::Cron(expr) => {
                Job::new_async(expr.as_str(), move |_uuid, _lock| scheduled_tick(weak.clone()))?
            }
        };
        Ok(job)
    }
}
