//! LLM Caller: a provider-agnostic completion client with bounded
//! exponential-backoff retry on top.

mod client;
mod fake;
mod openai;
mod retry;
mod retrying;
mod types;

pub use client::LlmClient;
pub use fake::{FailingLlmClient, ScriptedLlmClient};
pub use openai::OpenAiClient;
pub use retry::{
    is_retryable_http_error, next_backoff_ms, next_backoff_ms_with_jitter, parse_retry_after_ms,
    provider_retry_delay_ms, should_retry_status, BASE_BACKOFF_MS,
};
pub use retrying::{RetryPolicy, RetryingLlmClient};
pub use types::{ChatMessage, ChatRequest, ChatResponse, ChatUsage, LlmCallError, MessageRole};
