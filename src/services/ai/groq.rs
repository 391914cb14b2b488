use async_trait::async_trait;
use serde_json::json;

use super::{AiError, Generation, GenerationRequest, LlmProvider, TokenUsage, ToolCall};

const GROQ_URL: &str = "https://api.groq.com/openai/v1/chat/completions";

/// OpenAI-compatible chat completions client (Groq by default).
pub struct GroqProvider {
    api_key: String,
    url: String,
    client: reqwest::Client,
}

impl GroqProvider {
    pub fn new(api_key: String) -> Self {
        Self::with_url(api_key, GROQ_URL.to_string())
    }

    pub fn with_url(api_key: String, url: String) -> Self {
        Self {
            api_key,
            url,
            client: reqwest::Client::new(),
        }
    }
}

fn build_body(request: &GenerationRequest) -> serde_json::Value {
    let mut chat_messages = vec![json!({
        "role": "system",
        "content": request.system_prompt,
    })];

    for msg in &request.messages {
        chat_messages.push(json!({
            "role": msg.role,
            "content": msg.content,
        }));
    }

    let mut body = json!({
        "model": request.model,
        "messages": chat_messages,
        "max_tokens": request.max_tokens,
        "temperature": request.temperature,
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
        body["tool_choice"] = json!("auto");
    }

    body
}

fn parse_response(data: &serde_json::Value) -> Result<Generation, AiError> {
    let choice = &data["choices"][0];
    if choice.is_null() {
        return Err(AiError::InvalidResponse("missing choices in response".to_string()));
    }

    let message = &choice["message"];
    let content = message["content"].as_str().unwrap_or_default().to_string();

    // Arguments arrive as a JSON-encoded string.
    let tool_calls = message["tool_calls"]
        .as_array()
        .map(|calls| {
            calls
                .iter()
                .filter_map(|c| {
                    let name = c["function"]["name"].as_str()?.to_string();
                    let arguments = match &c["function"]["arguments"] {
                        serde_json::Value::String(s) => serde_json::from_str(s).unwrap_or(json!({})),
                        other => other.clone(),
                    };
                    Some(ToolCall { name, arguments })
                })
                .collect::<Vec<_>>()
        })
        .unwrap_or_default();

    if content.is_empty() && tool_calls.is_empty() {
        return Err(AiError::InvalidResponse("empty completion".to_string()));
    }

    let usage = TokenUsage::new(
        data["usage"]["prompt_tokens"].as_u64().unwrap_or(0) as u32,
        data["usage"]["completion_tokens"].as_u64().unwrap_or(0) as u32,
    );

    Ok(Generation {
        content,
        tool_calls,
        usage,
        stop_reason: choice["finish_reason"].as_str().map(|s| s.to_string()),
    })
}

#[async_trait]
impl LlmProvider for GroqProvider {
    async fn generate(&self, request: &GenerationRequest) -> Result<Generation, AiError> {
        let resp = self
            .client
            .post(&self.url)
            .bearer_auth(&self.api_key)
            .json(&build_body(request))
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
            .map_err(|e| AiError::InvalidResponse(format!("failed to parse response: {e}")))?;

        parse_response(&data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::ai::tools::booking_tools;
    use crate::services::ai::Message;

    fn request(tools: bool) -> GenerationRequest {
        GenerationRequest {
            model: "llama-3.3-70b-versatile".into(),
            system_prompt: "be nice".into(),
            messages: vec![Message::user("hi")],
            max_tokens: 100,
            temperature: 0.5,
            tools: if tools { booking_tools() } else { vec![] },
        }
    }

    #[test]
    fn test_body_without_tools() {
        let body = build_body(&request(false));
        assert_eq!(body["messages"][0]["role"], "system");
        assert_eq!(body["messages"][1]["content"], "hi");
        assert_eq!(body["max_tokens"], 100);
        assert!(body.get("tools").is_none());
    }

    #[test]
    fn test_body_with_tools() {
        let body = build_body(&request(true));
        assert_eq!(body["tools"][0]["type"], "function");
        assert_eq!(body["tools"][0]["function"]["name"], "select_time_slot");
        assert_eq!(body["tool_choice"], "auto");
    }

    #[test]
    fn test_parse_text_response() {
        let data = json!({
            "choices": [{"message": {"content": "Hello!"}, "finish_reason": "stop"}],
            "usage": {"prompt_tokens": 12, "completion_tokens": 3}
        });
        let generation = parse_response(&data).unwrap();
        assert_eq!(generation.content, "Hello!");
        assert_eq!(generation.usage.total, 15);
        assert_eq!(generation.stop_reason.as_deref(), Some("stop"));
    }

    #[test]
    fn test_parse_tool_call_response() {
        let data = json!({
            "choices": [{
                "message": {
                    "content": null,
                    "tool_calls": [{
                        "type": "function",
                        "function": {"name": "select_time_slot", "arguments": "{\"slot_index\":2}"}
                    }]
                },
                "finish_reason": "tool_calls"
            }]
        });
        let generation = parse_response(&data).unwrap();
        assert!(generation.content.is_empty());
        assert_eq!(generation.tool_calls[0].name, "select_time_slot");
        assert_eq!(generation.tool_calls[0].arguments["slot_index"], 2);
    }

    #[test]
    fn test_parse_empty_is_error() {
        assert!(parse_response(&json!({"choices": []})).is_err());
        assert!(parse_response(&json!({"choices": [{"message": {"content": ""}}]})).is_err());
    }
}
