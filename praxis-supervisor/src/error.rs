//! Error types for campaign supervision

use thiserror::Error;

/// Result type for supervisor operations
pub type Result<T> = std::result::Result<T, SupervisorError>;

/// Error types for the campaign runner
#[derive(Debug, Error)]
pub enum SupervisorError {
    #[error("Supervisor error: {0}")]
    Supervisor(String),

    #[error("Campaign index error: {0}")]
    CampaignIndex(String),

    #[error("Orchestrator error: {0}")]
    Orchestrator(String),

    #[error("Cancelled")]
    Cancelled,

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl From<praxis_core::error::PraxisError> for SupervisorError {
    fn from(err: praxis_core::error::PraxisError) -> Self {
        SupervisorError::Other(anyhow::anyhow!("{}", err))
    }
}
