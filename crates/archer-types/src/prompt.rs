use chrono::{DateTime, Utc};
use uuid::Uuid;

/// Stable prompt identity. A prompt row is never mutated in place once
/// persisted; updates append a new `PromptPerformance` snapshot or a new
/// prompt row with `parent_id` set.
pub type PromptId = Uuid;

/// In-memory view of a prompt. The Database Adapter is the owner of
/// record; this struct is reconciled against storage after every cycle.
#[derive(Debug, Clone, PartialEq)]
pub struct Prompt {
    pub id: PromptId,
    pub content: String,
    pub generation: u32,
    pub score: Option<f64>,
    pub feedback: Option<String>,
    pub survived: bool,
    pub parent_id: Option<PromptId>,
    pub model_id: String,
    pub created_at: DateTime<Utc>,
}

impl Prompt {
    /// Creates a generation-0 prompt. Only `derive_child` may create a
    /// prompt at a later generation.
    pub fn new(content: impl Into<String>, model_id: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            content: content.into(),
            generation: 0,
            score: None,
            feedback: None,
            survived: false,
            parent_id: None,
            model_id: model_id.into(),
            created_at: Utc::now(),
        }
    }

    /// Replaces score/feedback in memory (last-writer-wins). Callers are
    /// responsible for also persisting a `PromptPerformance` row so the
    /// history remains recoverable.
    pub fn attach_score(&mut self, score: Option<f64>, feedback: Option<String>) {
        self.score = score;
        self.feedback = feedback;
    }

    pub fn mark_survived(&mut self, survived: bool) {
        self.survived = survived;
    }

    /// The only way to create a generation>0 prompt.
    pub fn derive_child(&self, new_content: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            content: new_content.into(),
            generation: self.generation + 1,
            score: None,
            feedback: None,
            survived: false,
            parent_id: Some(self.id),
            model_id: self.model_id.clone(),
            created_at: Utc::now(),
        }
    }

    /// Whether `content` contains exactly one `{input}` slot occurrence.
    pub fn has_single_input_slot(content: &str) -> bool {
        content.matches("{input}").count() == 1
    }
}

/// Append-only performance snapshot (`prompt_performance` table).
#[derive(Debug, Clone, PartialEq)]
pub struct PromptPerformance {
    pub prompt_id: PromptId,
    pub avg_score: Option<f64>,
    pub survived: bool,
    pub recorded_at: DateTime<Utc>,
}

impl PromptPerformance {
    pub fn new(prompt_id: PromptId, avg_score: Option<f64>, survived: bool) -> Self {
        Self {
            prompt_id,
            avg_score,
            survived,
            recorded_at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::Prompt;

    #[test]
    fn derive_child_bumps_generation_and_links_parent() {
        let parent = Prompt::new("Summarize: {input}", "gpt-4o-mini");
        let child = parent.derive_child("Summarize concisely: {input}");

        assert_eq!(child.generation, parent.generation + 1);
        assert_eq!(child.parent_id, Some(parent.id));
        assert_ne!(child.id, parent.id);
    }

    #[test]
    fn slot_detection_requires_exactly_one_occurrence() {
        assert!(Prompt::has_single_input_slot("Summarize: {input}"));
        assert!(!Prompt::has_single_input_slot("Summarize this."));
        assert!(!Prompt::has_single_input_slot("{input} and {input} again"));
    }

    #[test]
    fn attach_score_is_last_writer_wins_in_memory() {
        let mut prompt = Prompt::new("Summarize: {input}", "gpt-4o-mini");
        prompt.attach_score(Some(3.0), Some("ok".to_string()));
        prompt.attach_score(Some(4.5), Some("better".to_string()));

        assert_eq!(prompt.score, Some(4.5));
        assert_eq!(prompt.feedback.as_deref(), Some("better"));
    }
}
