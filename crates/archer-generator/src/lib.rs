//! Content Generator: applies a single prompt to a single input, returning
//! generated content. Pluggable behind the [`ContentGenerator`] trait so a
//! domain-specific generator can be swapped in without touching the
//! control loop.

use std::sync::Arc;

use async_trait::async_trait;

use archer_llm::{ChatMessage, ChatRequest, LlmClient, LlmCallError};
use archer_types::{ArcherError, ArcherResult, Prompt};

const DEFAULT_GENERATION_TEMPERATURE: f32 = 0.7;
const INPUT_SLOT: &str = "{input}";

/// Operation contract for generating content from a prompt and an input.
/// A domain generator may take structured input instead of the `{input}`
/// slot, as long as it exposes this same signature.
#[async_trait]
pub trait ContentGenerator: Send + Sync {
    async fn generate(&self, prompt_content: &str, input_data: &str) -> ArcherResult<String>;
}

/// Default generator: single `{input}` slot substitution followed by one
/// LLM call at a fixed generation temperature.
pub struct DefaultContentGenerator {
    client: Arc<dyn LlmClient>,
    model_id: String,
    temperature: f32,
}

impl DefaultContentGenerator {
    pub fn new(client: Arc<dyn LlmClient>, model_id: impl Into<String>) -> Self {
        Self {
            client,
            model_id: model_id.into(),
            temperature: DEFAULT_GENERATION_TEMPERATURE,
        }
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }
}

fn substitute_slot(prompt_content: &str, input_data: &str) -> ArcherResult<String> {
    if !Prompt::has_single_input_slot(prompt_content) {
        return Err(ArcherError::SlotMissing);
    }
    Ok(prompt_content.replacen(INPUT_SLOT, input_data, 1))
}

fn map_llm_error(error: LlmCallError) -> ArcherError {
    match error {
        LlmCallError::MissingApiKey => ArcherError::Auth("missing API key".to_string()),
        LlmCallError::HttpStatus { status, body } if status == 401 || status == 403 => {
            ArcherError::Auth(body)
        }
        LlmCallError::HttpStatus { status, body } => {
            ArcherError::Transport(format!("status {status}: {body}"))
        }
        LlmCallError::Http(e) => ArcherError::Transport(e.to_string()),
        LlmCallError::ModelRefused(message) => ArcherError::ModelRefused(message),
        LlmCallError::Serde(e) => ArcherError::Malformed(e.to_string()),
        LlmCallError::InvalidResponse(message) => ArcherError::Malformed(message),
        LlmCallError::RetriesExhausted { attempts, last_error } => {
            ArcherError::Transport(format!("exhausted {attempts} attempts: {last_error}"))
        }
    }
}

#[async_trait]
impl ContentGenerator for DefaultContentGenerator {
    async fn generate(&self, prompt_content: &str, input_data: &str) -> ArcherResult<String> {
        let rendered = substitute_slot(prompt_content, input_data)?;

        let request = ChatRequest::new(self.model_id.clone(), vec![ChatMessage::user(rendered)])
            .with_temperature(self.temperature);

        let response = self.client.complete(request).await.map_err(map_llm_error)?;
        Ok(response.content.trim_end().to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use archer_llm::ScriptedLlmClient;

    #[tokio::test]
    async fn generates_content_by_substituting_the_input_slot() {
        let client = Arc::new(ScriptedLlmClient::new(vec!["a crisp summary  \n"]));
        let generator = DefaultContentGenerator::new(client, "gpt-4o-mini");

        let content = generator
            .generate("Summarize this article: {input}", "a long article")
            .await
            .expect("generation succeeds");

        assert_eq!(content, "a crisp summary");
    }

    #[tokio::test]
    async fn fails_with_slot_missing_before_any_llm_call() {
        let client = Arc::new(ScriptedLlmClient::new(vec!["should never be used"]));
        let generator = DefaultContentGenerator::new(client, "gpt-4o-mini");

        let error = generator
            .generate("Summarize this article.", "a long article")
            .await
            .unwrap_err();

        assert!(matches!(error, ArcherError::SlotMissing));
    }

    #[tokio::test]
    async fn fails_with_slot_missing_when_slot_appears_more_than_once() {
        let client = Arc::new(ScriptedLlmClient::new(vec!["unused"]));
        let generator = DefaultContentGenerator::new(client, "gpt-4o-mini");

        let error = generator
            .generate("{input} and also {input}", "x")
            .await
            .unwrap_err();

        assert!(matches!(error, ArcherError::SlotMissing));
    }
}
