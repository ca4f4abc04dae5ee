use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use uuid::Uuid;

use archer_types::{
    ArcherResult, Evaluation, EvaluationId, EvaluationResult, GeneratedOutput, LineageLink, OutputId,
    Prompt, PromptId, PromptPerformance,
};

use crate::adapter::{now, AnnotationItem, DatabaseAdapter, GenerationMetrics, PromptHistoryEntry};
use crate::aggregate::{mean_score_for_prompt, performance_metrics, rank_best_prompts, rank_prompts_by_id};

#[derive(Default)]
struct State {
    prompts: Vec<Prompt>,
    purposes: HashMap<PromptId, String>,
    performance: Vec<PromptPerformance>,
    outputs: Vec<GeneratedOutput>,
    evaluations: Vec<Evaluation>,
    lineage: Vec<LineageLink>,
}

/// Non-persistent `DatabaseAdapter` backed by a single mutex-guarded
/// in-memory state. Used for fast deterministic tests across the
/// workspace.
#[derive(Default)]
pub struct InMemoryStore {
    state: Mutex<State>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, State> {
        self.state.lock().expect("in-memory store mutex poisoned")
    }
}

#[async_trait]
impl DatabaseAdapter for InMemoryStore {
    async fn store_prompt(
        &self,
        content: &str,
        model: &str,
        purpose: &str,
        generation: u32,
        parent_id: Option<PromptId>,
    ) -> ArcherResult<PromptId> {
        let mut state = self.lock();
        let id = Uuid::new_v4();
        let prompt = Prompt {
            id,
            content: content.to_string(),
            generation,
            score: None,
            feedback: None,
            survived: false,
            parent_id,
            model_id: model.to_string(),
            created_at: now(),
        };
        state.prompts.push(prompt);
        state.purposes.insert(id, purpose.to_string());
        Ok(id)
    }

    async fn update_prompt_performance(
        &self,
        prompt_id: PromptId,
        avg_score: Option<f64>,
        survived: bool,
    ) -> ArcherResult<()> {
        let mut state = self.lock();
        state
            .performance
            .push(PromptPerformance::new(prompt_id, avg_score, survived));
        if let Some(prompt) = state.prompts.iter_mut().find(|p| p.id == prompt_id) {
            let feedback = prompt.feedback.clone();
            prompt.attach_score(avg_score, feedback);
            prompt.mark_survived(survived);
        }
        Ok(())
    }

    async fn store_generated_content(
        &self,
        input_data: &str,
        content: &str,
        prompt_id: PromptId,
        round_num: u32,
    ) -> ArcherResult<OutputId> {
        let mut state = self.lock();
        let output = GeneratedOutput::new(prompt_id, input_data, content, round_num);
        let id = output.id;
        state.outputs.push(output);
        Ok(id)
    }

    async fn store_evaluation(
        &self,
        output_id: OutputId,
        result: EvaluationResult,
        is_human: bool,
        evaluator_id: &str,
    ) -> ArcherResult<EvaluationId> {
        let mut state = self.lock();
        let evaluation = Evaluation::new(output_id, result, is_human, evaluator_id);
        let id = evaluation.id;
        state.evaluations.push(evaluation);
        Ok(id)
    }

    async fn record_lineage(&self, link: LineageLink) -> ArcherResult<()> {
        self.lock().lineage.push(link);
        Ok(())
    }

    async fn get_current_data_for_annotation(
        &self,
        round_num: u32,
        limit: u32,
    ) -> ArcherResult<Vec<AnnotationItem>> {
        let state = self.lock();
        let mut items: Vec<AnnotationItem> = state
            .outputs
            .iter()
            .filter(|o| o.round_num == round_num)
            .take(limit as usize)
            .map(|o| {
                let ai_evaluation = state
                    .evaluations
                    .iter()
                    .find(|e| e.output_id == o.id && !e.is_human)
                    .cloned();
                AnnotationItem {
                    output_id: o.id,
                    input: o.input_data.clone(),
                    content: o.content.clone(),
                    prompt_id: o.prompt_id,
                    ai_evaluation,
                }
            })
            .collect();
        items.sort_by_key(|item| item.output_id);
        Ok(items)
    }

    async fn get_current_best_prompts(&self, top_n: u32) -> ArcherResult<Vec<Prompt>> {
        let state = self.lock();
        Ok(rank_best_prompts(&state.prompts, &state.outputs, &state.evaluations, top_n))
    }

    async fn get_prompts_by_ids(&self, ids: &[PromptId]) -> ArcherResult<Vec<Prompt>> {
        let state = self.lock();
        Ok(rank_prompts_by_id(&state.prompts, &state.outputs, &state.evaluations, ids))
    }

    async fn get_performance_metrics(&self, max_rounds: u32) -> ArcherResult<Vec<GenerationMetrics>> {
        let state = self.lock();
        Ok(performance_metrics(
            &state.prompts,
            &state.outputs,
            &state.evaluations,
            max_rounds,
        ))
    }

    async fn get_prompt_history(&self) -> ArcherResult<Vec<PromptHistoryEntry>> {
        let state = self.lock();
        let mut entries: Vec<PromptHistoryEntry> = state
            .prompts
            .iter()
            .map(|p| {
                let excerpt: String = p.content.chars().take(80).collect();
                PromptHistoryEntry {
                    generation: p.generation,
                    prompt_id: p.id,
                    parent_id: p.parent_id,
                    content_excerpt: excerpt,
                    mean_score: mean_score_for_prompt(&state.outputs, &state.evaluations, p.id).0,
                }
            })
            .collect();
        entries.sort_by(|a, b| a.generation.cmp(&b.generation).then(a.prompt_id.cmp(&b.prompt_id)));
        Ok(entries)
    }
}
