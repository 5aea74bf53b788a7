//! Error types for Praxis operations

/// Result type for Praxis operations
pub type Result<T> = std::result::Result<T, PraxisError>;

/// Error types for the Praxis substrate
#[derive(Debug, thiserror::Error)]
pub enum PraxisError {
    /// Shard-related errors
    #[error("Shard error: {0}")]
    Shard(String),

    /// Fact base operation failed
    #[error("Fact base error: {0}")]
    FactBase(String),

    /// Routing failed
    #[error("Routing error: {0}")]
    Routing(String),

    /// Tool execution failed
    #[error("Tool error: {0}")]
    Tool(String),

    /// Tool execution exceeded its deadline
    #[error("Tool call timed out after {0:?}")]
    ToolTimeout(std::time::Duration),

    /// LLM client failure
    #[error("LLM error: {0}")]
    Llm(String),

    /// Cost guard refused the operation
    #[error("Budget exhausted: {0}")]
    BudgetExhausted(String),

    /// A learned rule was rejected by the repair pipeline
    #[error("Rule rejected: {reason}; validation errors: {errors:?}")]
    RuleRejected {
        /// Why the repair loop gave up
        reason: String,
        /// Validation errors accumulated on the final attempt
        errors: Vec<String>,
    },

    /// Configuration error
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Operation was cancelled by the enclosing context
    #[error("Cancelled")]
    Cancelled,

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Generic error
    #[error("{0}")]
    Other(String),
}

impl From<String> for PraxisError {
    fn from(s: String) -> Self {
        PraxisError::Other(s)
    }
}

impl From<&str> for PraxisError {
    fn from(s: &str) -> Self {
        PraxisError::Other(s.to_string())
    }
}

impl From<anyhow::Error> for PraxisError {
    fn from(err: anyhow::Error) -> Self {
        PraxisError::Other(err.to_string())
    }
}
