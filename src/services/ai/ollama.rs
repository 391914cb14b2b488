use async_trait::async_trait;
use serde_json::json;

use super::{AiError, Generation, GenerationRequest, LlmProvider, TokenUsage, ToolCall};

pub struct OllamaProvider {
    url: String,
    client: reqwest::Client,
}

impl OllamaProvider {
    pub fn new(url: String) -> Self {
        Self {
            url,
            client: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl LlmProvider for OllamaProvider {
    async fn generate(&self, request: &GenerationRequest) -> Result<Generation, AiError> {
        let mut ollama_messages = vec![json!({
            "role": "system",
            "content": request.system_prompt,
        })];

        for msg in &request.messages {
            ollama_messages.push(json!({
                "role": msg.role,
                "content": msg.content,
            }));
        }

        let mut body = json!({
            "model": request.model,
            "messages": ollama_messages,
            "stream": false,
            "options": {
                "temperature": request.temperature,
                "num_predict": request.max_tokens,
            },
        });

        if !request.tools.is_empty() {
            let tools: Vec<serde_json::Value> = request
                .tools
                .iter()
                .map(|t| {
                    json!({
                        "type": "function",
                        "function": {
                            "name": t.name,
                            "description": t.description,
                            "parameters": t.parameters,
                        }
                    })
                })
                .collect();
            body["tools"] = json!(tools);
        }

        let resp = self
            .client
            .post(format!("{}/api/chat", self.url))
            .json(&body)
            .send()
            .await
            .map_err(|e| AiError::Transport(e.to_string()))?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(AiError::from_status(status.as_u16(), &body));
        }

        let data: serde_json::Value = resp
            .json()
            .await
            .map_err(|e| AiError::InvalidResponse(format!("failed to parse Ollama response: {e}")))?;

        let content = data["message"]["content"].as_str().unwrap_or_default().to_string();
        let tool_calls: Vec<ToolCall> = data["message"]["tool_calls"]
            .as_array()
            .map(|calls| {
                calls
                    .iter()
                    .filter_map(|c| {
                        Some(ToolCall {
                            name: c["function"]["name"].as_str()?.to_string(),
                            arguments: c["function"]["arguments"].clone(),
                        })
                    })
                    .collect()
            })
            .unwrap_or_default();

        if content.is_empty() && tool_calls.is_empty() {
            return Err(AiError::InvalidResponse(
                "missing content in Ollama response".to_string(),
            ));
        }

        Ok(Generation {
            content,
            tool_calls,
            usage: TokenUsage::new(
                data["prompt_eval_count"].as_u64().unwrap_or(0) as u32,
                data["eval_count"].as_u64().unwrap_or(0) as u32,
            ),
            stop_reason: data["done_reason"].as_str().map(|s| s.to_string()),
        })
    }
}
