//! Rubric Evaluator: invokes the LLM with a scoring instruction and
//! parses the response into a structured [`EvaluationResult`].

mod parser;

use std::sync::Arc;

use async_trait::async_trait;
use tracing::warn;

use archer_llm::{ChatMessage, ChatRequest, LlmCallError, LlmClient};
use archer_types::{ArcherError, ArcherResult, EvaluationResult};

use parser::parse_evaluator_response;

const DEFAULT_EVALUATOR_TEMPERATURE: f32 = 0.2;
const MAX_CONTEXT_PASSAGES: usize = 5;
const MAX_CONTEXT_CHARS: usize = 8000;

const RESPONSE_TEMPLATE_INSTRUCTION: &str = concat!(
    "Respond using exactly this template, with no other text:\n",
    "SCORE: <integer 1-5>\n",
    "FEEDBACK: <one or two sentences>\n",
    "IMPROVED_OUTPUT: <a revised version of the output>",
);

const REPAIR_INSTRUCTION: &str =
    "Your previous response did not match the required template. Please restate your answer in the exact template below, and nothing else.";

/// Operation contract for the Rubric Evaluator.
#[async_trait]
pub trait RubricEvaluator: Send + Sync {
    async fn evaluate(
        &self,
        input_data: &str,
        generated_content: &str,
        rubric_text: &str,
        context: &[String],
    ) -> ArcherResult<EvaluationResult>;
}

pub struct DefaultRubricEvaluator {
    client: Arc<dyn LlmClient>,
    model_id: String,
    temperature: f32,
}

impl DefaultRubricEvaluator {
    pub fn new(client: Arc<dyn LlmClient>, model_id: impl Into<String>) -> Self {
        Self {
            client,
            model_id: model_id.into(),
            temperature: DEFAULT_EVALUATOR_TEMPERATURE,
        }
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    fn build_prompt(
        &self,
        input_data: &str,
        generated_content: &str,
        rubric_text: &str,
        context: &[String],
    ) -> String {
        let mut prompt = String::new();
        prompt.push_str(
            "You are a strict evaluator. Judge the generated output against the rubric below.\n\n",
        );
        prompt.push_str("RUBRIC:\n");
        prompt.push_str(rubric_text);
        prompt.push_str("\n\nINPUT:\n");
        prompt.push_str(input_data);
        prompt.push_str("\n\nGENERATED OUTPUT:\n");
        prompt.push_str(generated_content);

        let bounded_context = bound_context(context);
        if !bounded_context.is_empty() {
            prompt.push_str("\n\nCONTEXT:\n");
            prompt.push_str(&bounded_context);
        }

        prompt.push_str("\n\n");
        prompt.push_str(RESPONSE_TEMPLATE_INSTRUCTION);
        prompt
    }

    async fn call(&self, prompt: String) -> ArcherResult<String> {
        let request = ChatRequest::new(self.model_id.clone(), vec![ChatMessage::user(prompt)])
            .with_temperature(self.temperature);
        self.client.complete(request).await.map(|r| r.content).map_err(map_llm_error)
    }
}

fn bound_context(context: &[String]) -> String {
    let mut joined = String::new();
    for passage in context.iter().take(MAX_CONTEXT_PASSAGES) {
        if joined.len() + passage.len() > MAX_CONTEXT_CHARS {
            let remaining = MAX_CONTEXT_CHARS.saturating_sub(joined.len());
            joined.push_str(&passage.chars().take(remaining).collect::<String>());
            break;
        }
        if !joined.is_empty() {
            joined.push_str("\n---\n");
        }
        joined.push_str(passage);
    }
    joined
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
impl RubricEvaluator for DefaultRubricEvaluator {
    async fn evaluate(
        &self,
        input_data: &str,
        generated_content: &str,
        rubric_text: &str,
        context: &[String],
    ) -> ArcherResult<EvaluationResult> {
        let prompt = self.build_prompt(input_data, generated_content, rubric_text, context);
        let first_response = self.call(prompt).await?;

        if let Some(parsed) = parse_evaluator_response(&first_response) {
            return Ok(to_evaluation_result(parsed));
        }

        warn!("evaluator response failed to parse, attempting one repair call");
        let repair_prompt = format!(
            "{REPAIR_INSTRUCTION}\n\nOriginal response:\n{first_response}\n\n{RESPONSE_TEMPLATE_INSTRUCTION}"
        );
        let repaired_response = self.call(repair_prompt).await?;

        match parse_evaluator_response(&repaired_response) {
            Some(parsed) => Ok(to_evaluation_result(parsed)),
            None => Ok(EvaluationResult::ParseError { raw: repaired_response }),
        }
    }
}

fn to_evaluation_result(parsed: parser::ParsedResponse) -> EvaluationResult {
    let score = parsed.score.round() as u8;
    if parsed.coerced {
        EvaluationResult::Coerced {
            score,
            feedback: parsed.feedback,
            improved_output: parsed.improved_output,
        }
    } else {
        EvaluationResult::Scored {
            score,
            feedback: parsed.feedback,
            improved_output: parsed.improved_output,
        }
    }
}
