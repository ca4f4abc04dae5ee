use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::warn;

use crate::client::LlmClient;
use crate::retry::{next_backoff_ms_with_jitter, should_retry_status};
use crate::types::{ChatRequest, ChatResponse, LlmCallError};

/// Retry policy applied on top of any [`LlmClient`], configured from
/// `llm_max_attempts`/`llm_per_attempt_timeout_seconds`.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: usize,
    pub per_attempt_timeout: Duration,
    pub jitter_enabled: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            per_attempt_timeout: Duration::from_secs(60),
            jitter_enabled: true,
        }
    }
}

/// Wraps an inner [`LlmClient`] with bounded exponential backoff retry for
/// `TRANSPORT`/`MALFORMED`-class failures. `AUTH` and `MODEL_REFUSED`
/// failures are not retried; they are always fatal.
pub struct RetryingLlmClient {
    inner: Arc<dyn LlmClient>,
    policy: RetryPolicy,
}

impl RetryingLlmClient {
    pub fn new(inner: Arc<dyn LlmClient>, policy: RetryPolicy) -> Self {
        Self { inner, policy }
    }
}

fn is_retriable(error: &LlmCallError) -> bool {
    match error {
        LlmCallError::Http(e) => e.is_timeout() || e.is_connect() || e.is_request() || e.is_body(),
        LlmCallError::HttpStatus { status, .. } => should_retry_status(*status),
        LlmCallError::InvalidResponse(_) => true,
        LlmCallError::Serde(_) => true,
        LlmCallError::MissingApiKey
        | LlmCallError::ModelRefused(_)
        | LlmCallError::RetriesExhausted { .. } => false,
    }
}

#[async_trait]
impl LlmClient for RetryingLlmClient {
    async fn complete(&self, request: ChatRequest) -> Result<ChatResponse, LlmCallError> {
        let mut last_error: Option<LlmCallError> = None;

        for attempt in 0..self.policy.max_attempts {
            let attempt_future = self.inner.complete(request.clone());
            let outcome = tokio::time::timeout(self.policy.per_attempt_timeout, attempt_future).await;

            let result = match outcome {
                Ok(result) => result,
                Err(_) => Err(LlmCallError::InvalidResponse(format!(
                    "llm call exceeded per-attempt timeout of {:?}",
                    self.policy.per_attempt_timeout
                ))),
            };

            match result {
                Ok(response) => return Ok(response),
                Err(error) if is_retriable(&error) && attempt + 1 < self.policy.max_attempts => {
                    let delay_ms = next_backoff_ms_with_jitter(attempt, self.policy.jitter_enabled);
                    warn!(attempt, delay_ms, error = %error, "llm call failed, retrying");
                    tokio::time::sleep(Duration::from_millis(delay_ms)).await;
                    last_error = Some(error);
                }
                Err(error) => return Err(error_or_exhausted(error, attempt + 1, last_error)),
            }
        }

        Err(LlmCallError::RetriesExhausted {
            attempts: self.policy.max_attempts,
            last_error: last_error.map(|e| e.to_string()).unwrap_or_default(),
        })
    }
}

fn error_or_exhausted(
    error: LlmCallError,
    attempts: usize,
    last_error: Option<LlmCallError>,
) -> LlmCallError {
    if is_retriable(&error) {
        LlmCallError::RetriesExhausted {
            attempts,
            last_error: last_error.unwrap_or(error).to_string(),
        }
    } else {
        error
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;

    use super::*;
    use crate::types::{ChatMessage, ChatUsage};

    struct FlakyThenOkClient {
        failures_remaining: AtomicUsize,
    }

    #[async_trait]
    impl LlmClient for FlakyThenOkClient {
        async fn complete(&self, _request: ChatRequest) -> Result<ChatResponse, LlmCallError> {
            if self.failures_remaining.fetch_sub(1, Ordering::SeqCst) > 0 {
                return Err(LlmCallError::HttpStatus {
                    status: 503,
                    body: "unavailable".to_string(),
                });
            }
            Ok(ChatResponse {
                content: "ok".to_string(),
                finish_reason: Some("stop".to_string()),
                usage: ChatUsage::default(),
            })
        }
    }

    struct AlwaysAuthFailClient;

    #[async_trait]
    impl LlmClient for AlwaysAuthFailClient {
        async fn complete(&self, _request: ChatRequest) -> Result<ChatResponse, LlmCallError> {
            Err(LlmCallError::MissingApiKey)
        }
    }

    fn request() -> ChatRequest {
        ChatRequest::new("gpt-4o-mini", vec![ChatMessage::user("hello")])
    }

    #[tokio::test]
    async fn retries_transient_failures_until_success() {
        let inner = Arc::new(FlakyThenOkClient {
            failures_remaining: AtomicUsize::new(2),
        });
        let client = RetryingLlmClient::new(inner, RetryPolicy::default());
        let response = client.complete(request()).await.expect("eventual success");
        assert_eq!(response.content, "ok");
    }

    #[tokio::test]
    async fn gives_up_after_max_attempts() {
        let inner = Arc::new(FlakyThenOkClient {
            failures_remaining: AtomicUsize::new(10),
        });
        let client = RetryingLlmClient::new(
            inner,
            RetryPolicy {
                max_attempts: 3,
                per_attempt_timeout: Duration::from_secs(1),
                jitter_enabled: false,
            },
        );
        let error = client.complete(request()).await.unwrap_err();
        assert!(matches!(error, LlmCallError::RetriesExhausted { attempts: 3, .. }));
    }

    #[tokio::test]
    async fn does_not_retry_fatal_auth_errors() {
        let inner = Arc::new(AlwaysAuthFailClient);
        let client = RetryingLlmClient::new(inner, RetryPolicy::default());
        let error = client.complete(request()).await.unwrap_err();
        assert!(matches!(error, LlmCallError::MissingApiKey));
    }
}
