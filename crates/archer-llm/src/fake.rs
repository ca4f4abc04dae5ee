use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;

use crate::client::LlmClient;
use crate::types::{ChatRequest, ChatResponse, ChatUsage, LlmCallError};

/// Replays a fixed script of responses, one per call, falling back to a
/// constant once exhausted. Used across the workspace wherever a test
/// needs a deterministic stand-in for a real provider.
pub struct ScriptedLlmClient {
    outputs: Mutex<VecDeque<String>>,
    fallback: String,
}

impl ScriptedLlmClient {
    pub fn new(lines: Vec<impl Into<String>>) -> Self {
        Self {
            outputs: Mutex::new(lines.into_iter().map(Into::into).collect()),
            fallback: "fallback response".to_string(),
        }
    }

    pub fn with_fallback(mut self, fallback: impl Into<String>) -> Self {
        self.fallback = fallback.into();
        self
    }
}

#[async_trait]
impl LlmClient for ScriptedLlmClient {
    async fn complete(&self, _request: ChatRequest) -> Result<ChatResponse, LlmCallError> {
        let mut outputs = self.outputs.lock().expect("scripted client mutex poisoned");
        let content = outputs.pop_front().unwrap_or_else(|| self.fallback.clone());
        Ok(ChatResponse {
            content,
            finish_reason: Some("stop".to_string()),
            usage: ChatUsage::default(),
        })
    }
}

/// Always fails with the given error, for exercising failure paths
/// (`TRANSPORT`, `MODEL_REFUSED`, etc.) without a network dependency.
pub struct FailingLlmClient {
    pub make_error: Box<dyn Fn() -> LlmCallError + Send + Sync>,
}

#[async_trait]
impl LlmClient for FailingLlmClient {
    async fn complete(&self, _request: ChatRequest) -> Result<ChatResponse, LlmCallError> {
        Err((self.make_error)())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ChatMessage, ChatRequest};

    #[tokio::test]
    async fn replays_script_then_falls_back() {
        let client = ScriptedLlmClient::new(vec!["first", "second"]);
        let request = ChatRequest::new("gpt-4o-mini", vec![ChatMessage::user("hi")]);

        let first = client.complete(request.clone()).await.unwrap();
        let second = client.complete(request.clone()).await.unwrap();
        let third = client.complete(request).await.unwrap();

        assert_eq!(first.content, "first");
        assert_eq!(second.content, "second");
        assert_eq!(third.content, "fallback response");
    }
}
