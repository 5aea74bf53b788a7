//! LLM client abstraction
//!
//! Autopoiesis and rule repair are the only consumers; both drive the model
//! through a fixed system prompt plus a task prompt and parse the textual
//! reply themselves.

use async_trait::async_trait;

use crate::error::Result;

/// Trait for LLM client implementations.
#[async_trait]
pub trait LlmClient: Send + Sync {
    /// Complete `user_prompt` under `system_prompt` and return the raw text.
    async fn complete_with_system(&self, system_prompt: &str, user_prompt: &str)
        -> Result<String>;

    /// Get model information
    fn model_info(&self) -> ModelInfo {
        ModelInfo {
            provider: "unknown".to_string(),
            model_name: "unknown".to_string(),
        }
    }
}

/// Model information
#[derive(Debug, Clone)]
pub struct ModelInfo {
    pub provider: String,
    pub model_name: String,
}

/// Stub LLM client for unwired deployments (returns an error).
///
/// Shards that can run without a model (the router with autopoiesis
/// disabled) accept this; anything that actually needs completions surfaces
/// the configuration error instead of hanging.
pub struct StubLlm;

#[async_trait]
impl LlmClient for StubLlm {
    async fn complete_with_system(
        &self,
        _system_prompt: &str,
        _user_prompt: &str,
    ) -> Result<String> {
        Err(crate::error::PraxisError::Llm(
            "LLM client not configured. Implement the LlmClient trait for your model".to_string(),
        ))
    }

    fn model_info(&self) -> ModelInfo {
        ModelInfo {
            provider: "stub".to_string(),
            model_name: "none".to_string(),
        }
    }
}

pub mod ollama;

pub use ollama::OllamaClient;

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_stub_client_errors() {
        let client = StubLlm;
        let result = client.complete_with_system("system", "user").await;
        assert!(result.is_err());
        assert_eq!(client.model_info().provider, "stub");
    }
}
