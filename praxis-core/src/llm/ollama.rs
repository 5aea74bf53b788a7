//! Ollama LLM client implementation

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::{PraxisError, Result};
use crate::llm::{LlmClient, ModelInfo};

/// Ollama LLM client (local, free, runs on your machine).
pub struct OllamaClient {
    client: reqwest::Client,
    model: String,
    base_url: String,
}

impl OllamaClient {
    /// Create a new Ollama client.
    ///
    /// # Arguments
    ///
    /// * `model` - Model name (e.g., "qwen3:14b")
    /// * `base_url` - Base URL for the Ollama API (defaults to "http://localhost:11434")
    pub fn new(model: impl Into<String>, base_url: Option<impl Into<String>>) -> Self {
        Self {
            client: reqwest::Client::new(),
            model: model.into(),
            base_url: base_url
                .map(|u| u.into())
                .unwrap_or_else(|| "http://localhost:11434".to_string()),
        }
    }

    /// Create from environment variables.
    ///
    /// Reads from:
    /// - `OLLAMA_MODEL` - Model name (optional, defaults to "qwen3:14b")
    /// - `OLLAMA_BASE_URL` - Base URL (optional, defaults to "http://localhost:11434")
    pub fn from_env(model: Option<impl Into<String>>) -> Result<Self> {
        let model = model
            .map(|m| m.into())
            .or_else(|| std::env::var("OLLAMA_MODEL").ok())
            .unwrap_or_else(|| "qwen3:14b".to_string());

        let base_url = std::env::var("OLLAMA_BASE_URL")
            .unwrap_or_else(|_| "http://localhost:11434".to_string());

        Ok(Self::new(model, Some(base_url)))
    }

    /// Get the model name.
    pub fn model(&self) -> &str {
        &self.model
    }
}

#[derive(Serialize)]
struct OllamaRequest {
    model: String,
    messages: Vec<OllamaMessage>,
    stream: bool,
}

#[derive(Serialize)]
struct OllamaMessage {
    role: String,
    content: String,
}

#[derive(Deserialize)]
struct OllamaResponse {
    message: OllamaMessageResponse,
    #[serde(default)]
    #[allow(dead_code)]
    done: bool,
}

#[derive(Deserialize)]
struct OllamaMessageResponse {
    #[allow(dead_code)]
    role: String,
    content: String,
    #[serde(default)]
    thinking: Option<String>,
}

#[async_trait]
impl LlmClient for OllamaClient {
    async fn complete_with_system(
        &self,
        system_prompt: &str,
        user_prompt: &str,
    ) -> Result<String> {
        let request = OllamaRequest {
            model: self.model.clone(),
            messages: vec![
                OllamaMessage {
                    role: "system".to_string(),
                    content: system_prompt.to_string(),
                },
                OllamaMessage {
                    role: "user".to_string(),
                    content: user_prompt.to_string(),
                },
            ],
            stream: false,
        };

        let url = format!("{}/api/chat", self.base_url);

        let response = self
            .client
            .post(&url)
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                PraxisError::Llm(format!(
                    "Failed to send request to Ollama: {}. Make sure Ollama is running.",
                    e
                ))
            })?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(PraxisError::Llm(format!(
                "Ollama API error ({}): {}",
                status, text
            )));
        }

        let body: OllamaResponse = response
            .json()
            .await
            .map_err(|e| PraxisError::Llm(format!("Failed to parse Ollama response: {}", e)))?;

        let mut content = body.message.content.trim().to_string();
        if content.is_empty() {
            if let Some(thinking) = body.message.thinking {
                content = thinking.trim().to_string();
            }
        }

        Ok(content)
    }

    fn model_info(&self) -> ModelInfo {
        ModelInfo {
            provider: "ollama".to_string(),
            model_name: self.model.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_creation() {
        let client = OllamaClient::new("qwen3:14b", None::<String>);
        assert_eq!(client.model(), "qwen3:14b");
        assert_eq!(client.model_info().provider, "ollama");
    }
}
