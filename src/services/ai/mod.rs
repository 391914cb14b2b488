pub mod groq;
pub mod json;
pub mod ollama;
pub mod retry;
pub mod tools;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Message {
    pub role: String,
    pub content: String,
}

impl Message {
    pub fn user(content: &str) -> Self {
        Self {
            role: "user".to_string(),
            content: content.to_string(),
        }
    }

    pub fn assistant(content: &str) -> Self {
        Self {
            role: "assistant".to_string(),
            content: content.to_string(),
        }
    }
}

/// A function the model may call instead of (or alongside) replying.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    pub parameters: serde_json::Value,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolCall {
    pub name: String,
    pub arguments: serde_json::Value,
}

#[derive(Debug, Clone)]
pub struct GenerationRequest {
    pub model: String,
    pub system_prompt: String,
    pub messages: Vec<Message>,
    pub max_tokens: u32,
    pub temperature: f32,
    /// Non-empty puts the provider in tool mode.
    pub tools: Vec<ToolDefinition>,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq)]
pub struct TokenUsage {
    pub input: u32,
    pub output: u32,
    pub total: u32,
}

impl TokenUsage {
    pub fn new(input: u32, output: u32) -> Self {
        Self {
            input,
            output,
            total: input + output,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct Generation {
    pub content: String,
    pub tool_calls: Vec<ToolCall>,
    pub usage: TokenUsage,
    pub stop_reason: Option<String>,
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum AiError {
    #[error("provider returned {status}: {message}")]
    Status { status: u16, message: String },

    #[error("transport error: {0}")]
    Transport(String),

    #[error("invalid response: {0}")]
    InvalidResponse(String),
}

impl AiError {
    /// Error for a non-success response. The body may be JSON from the
    /// provider or an HTML page from a proxy in front of it.
    pub fn from_status(status: u16, body: &str) -> Self {
        let parsed: Option<serde_json::Value> = serde_json::from_str(body).ok();
        let message = parsed
            .as_ref()
            .and_then(|data| {
                data["error"]["message"]
                    .as_str()
                    .or_else(|| data["error"].as_str())
            })
            .map(|s| s.to_string())
            .unwrap_or_else(|| {
                let text: String = body.trim().chars().take(200).collect();
                if text.is_empty() {
                    "empty response body".to_string()
                } else {
                    text
                }
            });
        AiError::Status { status, message }
    }

    /// Only rate limiting and server-side failures are worth another attempt.
    pub fn is_retryable(&self) -> bool {
        match self {
            AiError::Status { status, .. } => *status == 429 || *status >= 500,
            _ => false,
        }
    }
}

#[async_trait]
pub trait LlmProvider: Send + Sync {
    async fn generate(&self, request: &GenerationRequest) -> Result<Generation, AiError>;
}

/// USD cost of one generation given per-million-token rates.
pub fn estimate_cost(usage: &TokenUsage, input_per_mtok: f64, output_per_mtok: f64) -> f64 {
    (usage.input as f64 * input_per_mtok + usage.output as f64 * output_per_mtok) / 1_000_000.0
}
