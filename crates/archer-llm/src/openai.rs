use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::client::LlmClient;
use crate::types::{ChatMessage, ChatRequest, ChatResponse, ChatUsage, LlmCallError, MessageRole};

const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

/// Chat-completions client for any OpenAI-compatible endpoint. One
/// concrete HTTP provider for the LLM Caller contract; other providers
/// implement [`LlmClient`] the same way without touching the rest of the
/// engine.
pub struct OpenAiClient {
    http: reqwest::Client,
    api_key: String,
    base_url: String,
}

impl OpenAiClient {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            api_key: api_key.into(),
            base_url: DEFAULT_BASE_URL.to_string(),
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }
}

#[derive(Serialize)]
struct WireMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Serialize)]
struct WireRequest<'a> {
    model: &'a str,
    messages: Vec<WireMessage<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
}

#[derive(Deserialize)]
struct WireResponse {
    choices: Vec<WireChoice>,
    #[serde(default)]
    usage: Option<WireUsage>,
}

#[derive(Deserialize)]
struct WireChoice {
    message: WireResponseMessage,
    finish_reason: Option<String>,
}

#[derive(Deserialize)]
struct WireResponseMessage {
    content: Option<String>,
}

#[derive(Deserialize, Default)]
struct WireUsage {
    #[serde(default)]
    prompt_tokens: u64,
    #[serde(default)]
    completion_tokens: u64,
    #[serde(default)]
    total_tokens: u64,
}

fn role_str(role: MessageRole) -> &'static str {
    match role {
        MessageRole::System => "system",
        MessageRole::User => "user",
        MessageRole::Assistant => "assistant",
    }
}

fn extract_refusal(body: &Value) -> Option<String> {
    body.get("error")
        .and_then(|e| e.get("message"))
        .and_then(Value::as_str)
        .map(str::to_string)
}

/// Builds the wire request body for one `ChatRequest`. Pure and
/// allocation-free beyond the owned `Vec` of messages, so it is testable
/// without a network round-trip.
fn build_wire_request(request: &ChatRequest) -> WireRequest<'_> {
    let wire_messages = request
        .messages
        .iter()
        .map(|m| WireMessage {
            role: role_str(m.role),
            content: m.content.as_str(),
        })
        .collect();

    WireRequest {
        model: &request.model,
        messages: wire_messages,
        max_tokens: request.max_tokens,
        temperature: request.temperature,
    }
}

/// Maps a non-2xx response body to the appropriate `LlmCallError`: a
/// fatal `HttpStatus` for 401/403 auth failures, `ModelRefused` when the
/// provider's `error.message` is present, and `HttpStatus` with the raw
/// body otherwise.
fn build_error_response(status: u16, body_text: &str) -> LlmCallError {
    if let Ok(body) = serde_json::from_str::<Value>(body_text) {
        if let Some(message) = extract_refusal(&body) {
            if status == 401 || status == 403 {
                return LlmCallError::HttpStatus { status, body: message };
            }
            return LlmCallError::ModelRefused(message);
        }
    }
    LlmCallError::HttpStatus {
        status,
        body: body_text.to_string(),
    }
}

/// Parses a successful chat-completions response body into a
/// `ChatResponse`. Pure text-in, struct-out so it can be exercised with
/// fixture bodies instead of a live call.
fn parse_success_response(body_text: &str) -> Result<ChatResponse, LlmCallError> {
    let parsed: WireResponse = serde_json::from_str(body_text)?;
    let choice = parsed
        .choices
        .into_iter()
        .next()
        .ok_or_else(|| LlmCallError::InvalidResponse("empty choices array".to_string()))?;

    let content = choice.message.content.unwrap_or_default();
    if content.trim().is_empty() {
        return Err(LlmCallError::InvalidResponse(
            "model returned empty content".to_string(),
        ));
    }

    let usage = parsed
        .usage
        .map(|u| ChatUsage {
            input_tokens: u.prompt_tokens,
            output_tokens: u.completion_tokens,
            total_tokens: u.total_tokens,
        })
        .unwrap_or_default();

    Ok(ChatResponse {
        content,
        finish_reason: choice.finish_reason,
        usage,
    })
}

#[async_trait]
impl LlmClient for OpenAiClient {
    async fn complete(&self, request: ChatRequest) -> Result<ChatResponse, LlmCallError> {
        if self.api_key.is_empty() {
            return Err(LlmCallError::MissingApiKey);
        }

        let wire_request = build_wire_request(&request);

        let response = self
            .http
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&wire_request)
            .send()
            .await?;

        let status = response.status();
        let body_text = response.text().await?;

        if !status.is_success() {
            return Err(build_error_response(status.as_u16(), &body_text));
        }

        parse_success_response(&body_text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_request() -> ChatRequest {
        ChatRequest::new("gpt-4o-mini", vec![ChatMessage::system("be terse"), ChatMessage::user("hi")])
            .with_temperature(0.2)
            .with_max_tokens(128)
    }

    #[test]
    fn build_wire_request_carries_roles_and_optional_fields() {
        let request = sample_request();
        let wire = build_wire_request(&request);

        assert_eq!(wire.model, "gpt-4o-mini");
        assert_eq!(wire.messages.len(), 2);
        assert_eq!(wire.messages[0].role, "system");
        assert_eq!(wire.messages[0].content, "be terse");
        assert_eq!(wire.messages[1].role, "user");
        assert_eq!(wire.temperature, Some(0.2));
        assert_eq!(wire.max_tokens, Some(128));
    }

    #[test]
    fn build_wire_request_omits_absent_optional_fields_from_the_wire_json() {
        let request = ChatRequest::new("gpt-4o-mini", vec![ChatMessage::user("hi")]);
        let wire = build_wire_request(&request);
        let value = serde_json::to_value(&wire).expect("serializes");

        assert!(value.get("max_tokens").is_none());
        assert!(value.get("temperature").is_none());
    }

    #[test]
    fn parse_success_response_extracts_content_finish_reason_and_usage() {
        let body = serde_json::json!({
            "choices": [{
                "message": { "content": "a crisp summary" },
                "finish_reason": "stop"
            }],
            "usage": { "prompt_tokens": 10, "completion_tokens": 4, "total_tokens": 14 }
        })
        .to_string();

        let response = parse_success_response(&body).expect("parses");
        assert_eq!(response.content, "a crisp summary");
        assert_eq!(response.finish_reason.as_deref(), Some("stop"));
        assert_eq!(response.usage.input_tokens, 10);
        assert_eq!(response.usage.output_tokens, 4);
        assert_eq!(response.usage.total_tokens, 14);
    }

    #[test]
    fn parse_success_response_defaults_usage_when_absent() {
        let body = serde_json::json!({
            "choices": [{ "message": { "content": "ok" }, "finish_reason": null }]
        })
        .to_string();

        let response = parse_success_response(&body).expect("parses");
        assert_eq!(response.usage, ChatUsage::default());
    }

    #[test]
    fn parse_success_response_rejects_empty_choices() {
        let body = serde_json::json!({ "choices": [] }).to_string();
        let error = parse_success_response(&body).unwrap_err();
        assert!(matches!(error, LlmCallError::InvalidResponse(_)));
    }

    #[test]
    fn parse_success_response_rejects_blank_content() {
        let body = serde_json::json!({
            "choices": [{ "message": { "content": "   " }, "finish_reason": "stop" }]
        })
        .to_string();

        let error = parse_success_response(&body).unwrap_err();
        assert!(matches!(error, LlmCallError::InvalidResponse(_)));
    }

    #[test]
    fn build_error_response_maps_401_to_fatal_http_status_with_refusal_message() {
        let body = serde_json::json!({ "error": { "message": "invalid api key" } }).to_string();
        let error = build_error_response(401, &body);

        match error {
            LlmCallError::HttpStatus { status, body } => {
                assert_eq!(status, 401);
                assert_eq!(body, "invalid api key");
            }
            other => panic!("expected HttpStatus, got {other:?}"),
        }
    }

    #[test]
    fn build_error_response_maps_403_to_fatal_http_status_with_refusal_message() {
        let body = serde_json::json!({ "error": { "message": "forbidden" } }).to_string();
        let error = build_error_response(403, &body);

        match error {
            LlmCallError::HttpStatus { status, body } => {
                assert_eq!(status, 403);
                assert_eq!(body, "forbidden");
            }
            other => panic!("expected HttpStatus, got {other:?}"),
        }
    }

    #[test]
    fn build_error_response_maps_non_auth_refusal_to_model_refused() {
        let body = serde_json::json!({ "error": { "message": "content policy violation" } }).to_string();
        let error = build_error_response(400, &body);

        match error {
            LlmCallError::ModelRefused(message) => assert_eq!(message, "content policy violation"),
            other => panic!("expected ModelRefused, got {other:?}"),
        }
    }

    #[test]
    fn build_error_response_falls_back_to_raw_body_when_unparseable() {
        let error = build_error_response(500, "internal server error");
        match error {
            LlmCallError::HttpStatus { status, body } => {
                assert_eq!(status, 500);
                assert_eq!(body, "internal server error");
            }
            other => panic!("expected HttpStatus, got {other:?}"),
        }
    }
}
