use async_trait::async_trait;

use crate::types::{ChatRequest, ChatResponse, LlmCallError};

/// Provider-agnostic LLM Caller contract. Implementations own
/// their own transport, auth, and response parsing; retry/backoff is
/// layered on top via [`RetryingLlmClient`] rather than baked into every
/// provider.
#[async_trait]
pub trait LlmClient: Send + Sync {
    async fn complete(&self, request: ChatRequest) -> Result<ChatResponse, LlmCallError>;
}
