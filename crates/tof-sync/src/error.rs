use thiserror::Error;
use tof_storage::StoreError;
use tokio_cron_scheduler::JobSchedulerError;
use uuid::Uuid;

/// Failure of one engine operation. Nothing here is fatal to the process; a
/// start/stop that finds the scheduler already in the target state is reported
/// as `false`, not as an error.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("invalid request: {0}")]
    Validation(String),
    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: Uuid },
    #[error("{collaborator} unavailable: {reason}")]
    ExternalUnavailable {
        collaborator: &'static str,
        reason: String,
    },
    #[error("a crawl pass is already in flight")]
    CrawlInProgress,
    #[error("scheduler error: {0}")]
    Scheduler(#[from] JobSchedulerError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("configuration error: {0}")]
    Config(String),
}

impl EngineError {
    pub fn not_found(entity: &'static str, id: Uuid) -> Self {
        EngineError::NotFound { entity, id }
    }

    pub fn validation(message: impl Into<String>) -> Self {
        EngineError::Validation(message.into())
    }

    /// Short machine-readable code used by the transport layer.
    pub fn code(&self) -> &'static str {
        match self {
            EngineError::Validation(_) => "validation_error",
            EngineError::NotFound { .. } => "not_found",
            EngineError::ExternalUnavailable { .. } => "external_unavailable",
            EngineError::CrawlInProgress => "crawl_in_progress",
            EngineError::Scheduler(_) => "scheduler_error",
            EngineError::Store(_) => "storage_error",
            EngineError::Config(_) => "config_error",
        }
    }
}
