use std::cmp::Ordering;

use archer_types::{effective_evaluation, Evaluation, GeneratedOutput, OutputId, Prompt, PromptId};

use crate::adapter::GenerationMetrics;

/// Shared aggregation logic for both `InMemoryStore` and `SqliteStore` —
/// both load their rows into these plain slices and compute identically,
/// so "best prompts" ordering and generation metrics can never drift
/// between the two adapters.
pub fn effective_score_for_output(evaluations: &[Evaluation], output_id: OutputId) -> Option<f64> {
    let for_output: Vec<Evaluation> = evaluations
        .iter()
        .filter(|e| e.output_id == output_id)
        .cloned()
        .collect();
    effective_evaluation(&for_output).and_then(|e| e.effective_score())
}

/// Returns (mean_score, contributing_evaluation_count) for a prompt.
pub fn mean_score_for_prompt(
    outputs: &[GeneratedOutput],
    evaluations: &[Evaluation],
    prompt_id: PromptId,
) -> (Option<f64>, usize) {
    let scores: Vec<f64> = outputs
        .iter()
        .filter(|o| o.prompt_id == prompt_id)
        .filter_map(|o| effective_score_for_output(evaluations, o.id))
        .collect();

    if scores.is_empty() {
        (None, 0)
    } else {
        let sum: f64 = scores.iter().sum();
        (Some(round2(sum / scores.len() as f64)), scores.len())
    }
}

pub fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// Ranks prompts by (mean_score desc, evaluation_count desc, created_at
/// asc), nulls sorting after any numeric score.
pub fn rank_best_prompts(
    prompts: &[Prompt],
    outputs: &[GeneratedOutput],
    evaluations: &[Evaluation],
    top_n: u32,
) -> Vec<Prompt> {
    let mut ranked: Vec<(Prompt, Option<f64>, usize)> = prompts
        .iter()
        .map(|p| {
            let (mean, count) = mean_score_for_prompt(outputs, evaluations, p.id);
            (p.clone(), mean, count)
        })
        .collect();

    ranked.sort_by(|a, b| match (b.1, a.1) {
        (Some(bs), Some(as_)) => bs
            .partial_cmp(&as_)
            .unwrap_or(Ordering::Equal)
            .then_with(|| b.2.cmp(&a.2))
            .then_with(|| a.0.created_at.cmp(&b.0.created_at)),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => b.2.cmp(&a.2).then_with(|| a.0.created_at.cmp(&b.0.created_at)),
    });

    ranked
        .into_iter()
        .take(top_n as usize)
        .map(|(mut p, mean, _)| {
            p.score = mean;
            p
        })
        .collect()
}

/// Same ranking rule as [`rank_best_prompts`], scoped to a specific id
/// set instead of the whole table — used by the Control Loop's
/// `SELECT_ACTIVE` to re-rank its carried-over candidate pool without
/// requiring a separate comparator.
pub fn rank_prompts_by_id(
    prompts: &[Prompt],
    outputs: &[GeneratedOutput],
    evaluations: &[Evaluation],
    ids: &[PromptId],
) -> Vec<Prompt> {
    let filtered: Vec<Prompt> = prompts.iter().filter(|p| ids.contains(&p.id)).cloned().collect();
    let count = filtered.len() as u32;
    rank_best_prompts(&filtered, outputs, evaluations, count)
}

pub fn performance_metrics(
    prompts: &[Prompt],
    outputs: &[GeneratedOutput],
    evaluations: &[Evaluation],
    max_rounds: u32,
) -> Vec<GenerationMetrics> {
    let mut generations: Vec<u32> = prompts.iter().map(|p| p.generation).collect();
    generations.sort_unstable();
    generations.dedup();

    let mut metrics: Vec<GenerationMetrics> = generations
        .into_iter()
        .map(|generation| {
            let prompts_in_gen: Vec<&Prompt> = prompts.iter().filter(|p| p.generation == generation).collect();
            let scores: Vec<f64> = prompts_in_gen
                .iter()
                .filter_map(|p| mean_score_for_prompt(outputs, evaluations, p.id).0)
                .collect();

            let mean_score = if scores.is_empty() {
                None
            } else {
                Some(round2(scores.iter().sum::<f64>() / scores.len() as f64))
            };
            let best_score = scores
                .iter()
                .cloned()
                .fold(None, |acc: Option<f64>, s| Some(acc.map_or(s, |a| a.max(s))))
                .map(round2);
            let survived_count = prompts_in_gen.iter().filter(|p| p.survived).count();
            let prompt_count = prompts_in_gen.len();
            let survival_ratio = if prompt_count == 0 {
                0.0
            } else {
                survived_count as f64 / prompt_count as f64
            };

            GenerationMetrics {
                generation,
                mean_score,
                best_score,
                survival_ratio,
                prompt_count: prompt_count as u32,
            }
        })
        .collect();

    metrics.sort_by_key(|m| std::cmp::Reverse(m.generation));
    metrics.truncate(max_rounds as usize);
    metrics
}
