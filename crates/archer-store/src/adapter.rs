use async_trait::async_trait;
use chrono::{DateTime, Utc};

use archer_types::{ArcherResult, Evaluation, EvaluationId, EvaluationResult, LineageLink, OutputId, Prompt, PromptId};

/// One row of `get_current_data_for_annotation`: the minimal view a
/// human annotator needs to judge an output, including the AI evaluation
/// already on file so the human can confirm or override it.
#[derive(Debug, Clone, PartialEq)]
pub struct AnnotationItem {
    pub output_id: OutputId,
    pub input: String,
    pub content: String,
    pub prompt_id: PromptId,
    pub ai_evaluation: Option<Evaluation>,
}

/// One row of `get_performance_metrics`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GenerationMetrics {
    pub generation: u32,
    pub mean_score: Option<f64>,
    pub best_score: Option<f64>,
    pub survival_ratio: f64,
    pub prompt_count: u32,
}

/// One row of `get_prompt_history` (spec §4.3, §4.7).
#[derive(Debug, Clone, PartialEq)]
pub struct PromptHistoryEntry {
    pub generation: u32,
    pub prompt_id: PromptId,
    pub parent_id: Option<PromptId>,
    pub content_excerpt: String,
    pub mean_score: Option<f64>,
}

/// Persistence and lineage layer (spec §4.3). The sole owner of record
/// for every entity in the data model; in-memory `Prompt` views held by
/// the control loop are reconciled against this after every cycle.
#[async_trait]
pub trait DatabaseAdapter: Send + Sync {
    async fn store_prompt(
        &self,
        content: &str,
        model: &str,
        purpose: &str,
        generation: u32,
        parent_id: Option<PromptId>,
    ) -> ArcherResult<PromptId>;

    /// Append-only performance snapshot; re-running with identical
    /// arguments appends a new row rather than updating in place
    /// (spec §4.3 property 6 — idempotence means "no duplicate side
    /// effects beyond a fresh row", not "no new row").
    async fn update_prompt_performance(
        &self,
        prompt_id: PromptId,
        avg_score: Option<f64>,
        survived: bool,
    ) -> ArcherResult<()>;

    async fn store_generated_content(
        &self,
        input_data: &str,
        content: &str,
        prompt_id: PromptId,
        round_num: u32,
    ) -> ArcherResult<OutputId>;

    async fn store_evaluation(
        &self,
        output_id: OutputId,
        result: EvaluationResult,
        is_human: bool,
        evaluator_id: &str,
    ) -> ArcherResult<EvaluationId>;

    /// Equivalent to `store_evaluation(..., is_human = true)` (spec §4.3).
    async fn store_human_feedback(
        &self,
        output_id: OutputId,
        result: EvaluationResult,
        evaluator_id: &str,
    ) -> ArcherResult<EvaluationId> {
        self.store_evaluation(output_id, result, true, evaluator_id).await
    }

    async fn record_lineage(&self, link: LineageLink) -> ArcherResult<()>;

    async fn get_current_data_for_annotation(
        &self,
        round_num: u32,
        limit: u32,
    ) -> ArcherResult<Vec<AnnotationItem>>;

    /// Ordered by (mean_score desc, evaluation_count desc, created_at
    /// asc) per spec §4.3.
    async fn get_current_best_prompts(&self, top_n: u32) -> ArcherResult<Vec<Prompt>>;

    /// Fetches exactly the given prompts, ranked by the same rule as
    /// [`DatabaseAdapter::get_current_best_prompts`]. The Control Loop's
    /// `SELECT_ACTIVE` uses this to re-rank the candidate pool it carries
    /// from the previous cycle's `COMMIT_GENERATION` (spec §4.8) — a
    /// pool that may mix surviving parents from generation g-1 with
    /// freshly derived variants at generation g, so ranking by
    /// generation-number alone would not work.
    async fn get_prompts_by_ids(&self, ids: &[PromptId]) -> ArcherResult<Vec<Prompt>>;

    async fn get_performance_metrics(&self, max_rounds: u32) -> ArcherResult<Vec<GenerationMetrics>>;

    async fn get_prompt_history(&self) -> ArcherResult<Vec<PromptHistoryEntry>>;
}

pub(crate) fn now() -> DateTime<Utc> {
    Utc::now()
}
