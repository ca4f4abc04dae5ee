//! Prompt Optimizer: synthesizes new prompt variants from a parent prompt
//! plus aggregated feedback, enforcing slot-preservation. Each variant is
//! requested with its own independent LLM call at a higher temperature,
//! rather than one call asked to produce several variants at once.

mod diversity;

use std::collections::BTreeSet;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::warn;

use archer_llm::{ChatMessage, ChatRequest, LlmCallError, LlmClient};
use archer_types::{ArcherError, ArcherResult, Prompt};

use diversity::is_near_duplicate;

const DEFAULT_OPTIMIZER_TEMPERATURE: f32 = 0.9;

const REPAIR_INSTRUCTION: &str =
    "Your previous revision dropped the required {input} placeholder. Revise again, keeping the literal text \"{input}\" exactly once.";

/// Result of one `optimize` call: the accepted variants plus a count of
/// each reason a requested variant was discarded, so callers (the
/// Control Loop's `CycleReport.failures`) can distinguish a
/// `SLOT_MISSING` discard from a diversity discard instead of only
/// seeing `accepted.len() < num_variants`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct OptimizeOutcome {
    pub accepted: Vec<Prompt>,
    pub slot_missing_discards: u32,
    pub near_duplicate_discards: u32,
}

/// Operation contract for the Prompt Optimizer.
#[async_trait]
pub trait PromptOptimizer: Send + Sync {
    async fn optimize(
        &self,
        parent: &Prompt,
        aggregated_feedback: &[String],
        purpose: &str,
        num_variants: usize,
    ) -> ArcherResult<OptimizeOutcome>;
}

pub struct DefaultPromptOptimizer {
    client: Arc<dyn LlmClient>,
    model_id: String,
    temperature: f32,
}

impl DefaultPromptOptimizer {
    pub fn new(client: Arc<dyn LlmClient>, model_id: impl Into<String>) -> Self {
        Self {
            client,
            model_id: model_id.into(),
            temperature: DEFAULT_OPTIMIZER_TEMPERATURE,
        }
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    fn build_prompt(&self, parent: &Prompt, deduped_feedback: &[String], purpose: &str) -> String {
        let mut prompt = String::new();
        prompt.push_str("You revise prompt templates for a text-generation task.\n\n");
        prompt.push_str("Current prompt:\n");
        prompt.push_str(&parent.content);
        prompt.push_str("\n\n");

        if let Some(score) = parent.score {
            prompt.push_str(&format!("Its current average score is {score:.2} (out of 5).\n"));
        }

        if !deduped_feedback.is_empty() {
            prompt.push_str("Feedback collected from its evaluations:\n");
            for item in deduped_feedback {
                prompt.push_str("- ");
                prompt.push_str(item);
                prompt.push('\n');
            }
        }

        prompt.push_str(&format!(
            "\nPurpose to retain: {purpose}\n\n\
             Write one improved revision of the prompt. It MUST contain the literal text \
             \"{{input}}\" exactly once, and must still serve the stated purpose. \
             Respond with only the revised prompt text, nothing else."
        ));
        prompt
    }

    async fn call(&self, prompt: String) -> ArcherResult<String> {
        let request = ChatRequest::new(self.model_id.clone(), vec![ChatMessage::user(prompt)])
            .with_temperature(self.temperature);
        self.client.complete(request).await.map(|r| r.content).map_err(map_llm_error)
    }
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

fn dedupe_feedback(feedback: &[String]) -> Vec<String> {
    let mut seen = BTreeSet::new();
    let mut unique = Vec::new();
    for item in feedback {
        let trimmed = item.trim();
        if trimmed.is_empty() || !seen.insert(trimmed.to_string()) {
            continue;
        }
        unique.push(trimmed.to_string());
    }
    unique
}

#[async_trait]
impl PromptOptimizer for DefaultPromptOptimizer {
    async fn optimize(
        &self,
        parent: &Prompt,
        aggregated_feedback: &[String],
        purpose: &str,
        num_variants: usize,
    ) -> ArcherResult<OptimizeOutcome> {
        let deduped_feedback = dedupe_feedback(aggregated_feedback);
        let prompt_text = self.build_prompt(parent, &deduped_feedback, purpose);

        let mut outcome = OptimizeOutcome::default();
        let mut accepted_texts: Vec<String> = Vec::new();

        for _ in 0..num_variants {
            let first_attempt = self.call(prompt_text.clone()).await?;
            let variant_text = if Prompt::has_single_input_slot(&first_attempt) {
                Some(first_attempt)
            } else {
                warn!("optimizer variant missing {{input}} slot, attempting one repair call");
                let repair_prompt = format!(
                    "{REPAIR_INSTRUCTION}\n\nPrevious revision:\n{first_attempt}"
                );
                let repaired = self.call(repair_prompt).await?;
                if Prompt::has_single_input_slot(&repaired) {
                    Some(repaired)
                } else {
                    None
                }
            };

            let Some(variant_text) = variant_text else {
                outcome.slot_missing_discards += 1;
                continue;
            };

            let mut comparison_set: Vec<&str> = vec![parent.content.as_str()];
            comparison_set.extend(accepted_texts.iter().map(String::as_str));
            if is_near_duplicate(&variant_text, &comparison_set) {
                outcome.near_duplicate_discards += 1;
                continue;
            }

            accepted_texts.push(variant_text.clone());
            outcome.accepted.push(parent.derive_child(variant_text));
        }

        Ok(outcome)
    }
}
