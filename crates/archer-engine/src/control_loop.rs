use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tracing::warn;

use archer_evaluator::RubricEvaluator;
use archer_generator::ContentGenerator;
use archer_llm::next_backoff_ms_with_jitter;
use archer_optimizer::PromptOptimizer;
use archer_store::DatabaseAdapter;
use archer_types::{ArcherError, ArcherResult, LineageLink, Prompt, PromptId};

use crate::config::ArcherConfig;
use crate::cancellation::CancellationToken;
use crate::human_gate::HumanGate;
use crate::report::{record_failure, CycleReport, FailureEntry, Stage};
use crate::sampler::InputSampler;

const STORE_MAX_ATTEMPTS: usize = 3;

struct LoopState {
    generation: u32,
    active_ids: Vec<PromptId>,
}

/// Orchestrates one cycle of generation, evaluation and selection over a
/// population of prompts. Holds the current generation counter and the
/// candidate pool carried forward from the previous `COMMIT_GENERATION`;
/// every other component it calls is stateless per invocation.
pub struct ControlLoop {
    generator: Arc<dyn ContentGenerator>,
    evaluator: Arc<dyn RubricEvaluator>,
    optimizer: Arc<dyn PromptOptimizer>,
    adapter: Arc<dyn DatabaseAdapter>,
    config: ArcherConfig,
    model_id: String,
    purpose: String,
    rubric_text: String,
    context: Vec<String>,
    evaluator_id: String,
    state: Mutex<LoopState>,
}

impl ControlLoop {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        generator: Arc<dyn ContentGenerator>,
        evaluator: Arc<dyn RubricEvaluator>,
        optimizer: Arc<dyn PromptOptimizer>,
        adapter: Arc<dyn DatabaseAdapter>,
        config: ArcherConfig,
        model_id: impl Into<String>,
        purpose: impl Into<String>,
        rubric_text: impl Into<String>,
        context: Vec<String>,
        evaluator_id: impl Into<String>,
    ) -> Self {
        Self {
            generator,
            evaluator,
            optimizer,
            adapter,
            config,
            model_id: model_id.into(),
            purpose: purpose.into(),
            rubric_text: rubric_text.into(),
            context,
            evaluator_id: evaluator_id.into(),
            state: Mutex::new(LoopState {
                generation: 0,
                active_ids: Vec::new(),
            }),
        }
    }

    pub fn generation(&self) -> u32 {
        self.state.lock().expect("control loop mutex poisoned").generation
    }

    pub fn active_ids(&self) -> Vec<PromptId> {
        self.state.lock().expect("control loop mutex poisoned").active_ids.clone()
    }

    /// Persists the initial, generation-0 population and adopts it as the
    /// active candidate set. Every seed must already carry the `{input}`
    /// slot; a missing slot here is a configuration error, not a
    /// discardable per-variant failure.
    pub async fn seed(&self, contents: &[String]) -> ArcherResult<Vec<PromptId>> {
        let mut ids = Vec::with_capacity(contents.len());
        for content in contents {
            if !Prompt::has_single_input_slot(content) {
                return Err(ArcherError::SlotMissing);
            }
            let id = self
                .adapter
                .store_prompt(content, &self.model_id, &self.purpose, 0, None)
                .await?;
            ids.push(id);
        }

        let mut state = self.state.lock().expect("control loop mutex poisoned");
        state.generation = 0;
        state.active_ids = ids.clone();
        Ok(ids)
    }

    async fn select_active(&self, max_prompts_per_cycle: u32) -> ArcherResult<Vec<Prompt>> {
        let ids = { self.state.lock().expect("control loop mutex poisoned").active_ids.clone() };
        let ranked = self.adapter.get_prompts_by_ids(&ids).await?;
        for prompt in &ranked {
            if !Prompt::has_single_input_slot(&prompt.content) {
                return Err(ArcherError::SlotMissing);
            }
        }
        Ok(ranked.into_iter().take(max_prompts_per_cycle as usize).collect())
    }

    #[allow(clippy::too_many_arguments)]
    async fn forward_pass(
        &self,
        active: &[Prompt],
        input_sampler: &dyn InputSampler,
        num_simulations_per_prompt: u32,
        round_num: u32,
        cancellation: &CancellationToken,
        deadline: Option<Instant>,
        failures: &mut Vec<FailureEntry>,
    ) -> ArcherResult<ForwardPassOutcome> {
        let mut schedule: Vec<Prompt> = Vec::new();
        for prompt in active {
            for _ in 0..num_simulations_per_prompt {
                schedule.push(prompt.clone());
            }
        }

        let mut outputs_produced = 0u32;
        let mut evaluations_recorded = 0u32;
        let mut stop = ForwardPassStop::Completed;
        let chunk_size = self.config.llm_concurrency_limit.max(1);

        for chunk in schedule.chunks(chunk_size) {
            if cancellation.is_cancelled() {
                stop = ForwardPassStop::Cancelled;
                break;
            }
            if deadline.is_some_and(|d| Instant::now() >= d) {
                stop = ForwardPassStop::BudgetExceeded;
                break;
            }

            let mut pairs = Vec::with_capacity(chunk.len());
            for prompt in chunk {
                match input_sampler.next_input().await {
                    Some(input) => pairs.push((prompt.clone(), input)),
                    None => break,
                }
            }
            let exhausted = pairs.len() < chunk.len();
            if pairs.is_empty() {
                break;
            }

            let mut handles = Vec::with_capacity(pairs.len());
            for (prompt, input) in pairs {
                let generator = Arc::clone(&self.generator);
                let evaluator = Arc::clone(&self.evaluator);
                let adapter = Arc::clone(&self.adapter);
                let rubric_text = self.rubric_text.clone();
                let context = self.context.clone();
                let evaluator_id = self.evaluator_id.clone();
                handles.push(tokio::spawn(async move {
                    run_pair(generator, evaluator, adapter, prompt, input, round_num, &rubric_text, &context, &evaluator_id).await
                }));
            }

            for handle in handles {
                match handle.await {
                    Ok(Ok(())) => {
                        outputs_produced += 1;
                        evaluations_recorded += 1;
                    }
                    Ok(Err(error)) => {
                        record_failure(failures, Stage::ForwardPass, error.kind());
                    }
                    Err(join_error) => {
                        record_failure(failures, Stage::ForwardPass, "TRANSPORT");
                        warn!(%join_error, "forward pass task panicked");
                    }
                }
            }

            if exhausted {
                break;
            }
        }

        Ok(ForwardPassOutcome {
            outputs_produced,
            evaluations_recorded,
            stop,
        })
    }

    async fn backward_pass(
        &self,
        active: &[Prompt],
        round_num: u32,
        num_variants: usize,
        failures: &mut Vec<FailureEntry>,
    ) -> ArcherResult<BackwardPassOutcome> {
        let ids: Vec<PromptId> = active.iter().map(|p| p.id).collect();
        let ranked = self.adapter.get_prompts_by_ids(&ids).await?;

        let limit = annotation_query_limit(active.len(), self.config.num_simulations_per_prompt);
        let items = self.adapter.get_current_data_for_annotation(round_num, limit).await?;

        let mut feedback_by_prompt: HashMap<PromptId, Vec<String>> = HashMap::new();
        for item in &items {
            if let Some(evaluation) = &item.ai_evaluation {
                if !evaluation.result.is_parse_error() {
                    let feedback = evaluation.result.feedback();
                    if !feedback.is_empty() {
                        feedback_by_prompt.entry(item.prompt_id).or_default().push(feedback.to_string());
                    }
                }
            }
        }

        let survivor_count = if ranked.is_empty() {
            0
        } else {
            ((ranked.len() as f64 * self.config.survivor_fraction).ceil() as usize)
                .max(1)
                .min(ranked.len())
        };

        let mut survivors = Vec::new();
        let mut non_survivors = Vec::new();
        for (index, prompt) in ranked.into_iter().enumerate() {
            if index < survivor_count {
                survivors.push(prompt);
            } else {
                non_survivors.push(prompt);
            }
        }

        let all_scores: Vec<f64> = survivors.iter().chain(non_survivors.iter()).filter_map(|p| p.score).collect();
        let mean_score = mean_of(&all_scores);
        let best_score = all_scores.iter().cloned().fold(None, |acc: Option<f64>, s| Some(acc.map_or(s, |a| a.max(s))));

        let empty_feedback: Vec<String> = Vec::new();
        let mut variants = Vec::new();
        for survivor in &survivors {
            let feedback = feedback_by_prompt.get(&survivor.id).unwrap_or(&empty_feedback);
            let outcome = self.optimizer.optimize(survivor, feedback, &self.purpose, num_variants).await?;
            for _ in 0..outcome.slot_missing_discards {
                record_failure(failures, Stage::BackwardPass, "SLOT_MISSING");
            }
            variants.extend(outcome.accepted);
        }

        Ok(BackwardPassOutcome {
            survivors,
            non_survivors,
            variants,
            mean_score,
            best_score: best_score.map(round2),
        })
    }

    async fn commit_generation(
        &self,
        round_num: u32,
        survivors: Vec<Prompt>,
        non_survivors: Vec<Prompt>,
        variants: Vec<Prompt>,
    ) -> ArcherResult<(Vec<PromptId>, u32)> {
        for survivor in &survivors {
            self.adapter.update_prompt_performance(survivor.id, survivor.score, true).await?;
        }
        for prompt in &non_survivors {
            self.adapter.update_prompt_performance(prompt.id, prompt.score, false).await?;
        }

        let mut persisted_variants = Vec::with_capacity(variants.len());
        for variant in &variants {
            let parent_id = variant.parent_id.expect("optimizer variants always carry a parent_id");
            let id = self
                .adapter
                .store_prompt(&variant.content, &variant.model_id, &self.purpose, variant.generation, Some(parent_id))
                .await?;
            self.adapter.record_lineage(LineageLink::new(id, parent_id)).await?;
            persisted_variants.push(Prompt {
                id,
                ..variant.clone()
            });
        }

        let mut candidates: Vec<(Prompt, bool)> = survivors.into_iter().map(|p| (p, true)).collect();
        candidates.extend(persisted_variants.into_iter().map(|p| (p, false)));

        candidates.sort_by(|(a, a_is_parent), (b, b_is_parent)| {
            b_is_parent
                .cmp(a_is_parent)
                .then_with(|| match (b.score, a.score) {
                    (Some(bs), Some(as_)) => bs.partial_cmp(&as_).unwrap_or(Ordering::Equal),
                    (Some(_), None) => Ordering::Less,
                    (None, Some(_)) => Ordering::Greater,
                    (None, None) => Ordering::Equal,
                })
                .then_with(|| a.created_at.cmp(&b.created_at))
        });
        candidates.truncate(self.config.max_prompts_per_cycle as usize);

        let next_ids: Vec<PromptId> = candidates.into_iter().map(|(p, _)| p.id).collect();
        Ok((next_ids, round_num + 1))
    }

    /// Runs one full `SELECT_ACTIVE -> FORWARD_PASS -> (HUMAN_GATE) ->
    /// BACKWARD_PASS -> COMMIT_GENERATION` cycle and returns a report of
    /// what happened. Commits atomically: on cancellation or a blown wall
    /// clock budget, no survivor flag is set and the generation counter
    /// does not advance.
    #[allow(clippy::too_many_arguments)]
    pub async fn run_cycle(
        &self,
        input_sampler: &dyn InputSampler,
        num_variants: u32,
        num_simulations_per_prompt: u32,
        max_prompts_per_cycle: u32,
        human_gate: Option<&dyn HumanGate>,
        cancellation: &CancellationToken,
    ) -> ArcherResult<CycleReport> {
        let round_num = self.generation();
        let mut failures: Vec<FailureEntry> = Vec::new();

        let active = self.select_active(max_prompts_per_cycle).await?;
        let prompts_evaluated = active.len() as u32;

        let deadline = self
            .config
            .cycle_wall_budget_seconds
            .map(|secs| Instant::now() + Duration::from_secs(secs));

        let forward_outcome = self
            .forward_pass(
                &active,
                input_sampler,
                num_simulations_per_prompt,
                round_num,
                cancellation,
                deadline,
                &mut failures,
            )
            .await?;

        let short_circuit_kind = match forward_outcome.stop {
            ForwardPassStop::Cancelled => Some("CANCELLED"),
            ForwardPassStop::BudgetExceeded => Some("BUDGET_EXCEEDED"),
            ForwardPassStop::Completed => None,
        };

        if let Some(kind) = short_circuit_kind {
            record_failure(&mut failures, Stage::ForwardPass, kind);
            return Ok(CycleReport {
                generation: round_num,
                prompts_evaluated,
                outputs_produced: forward_outcome.outputs_produced,
                evaluations_recorded: forward_outcome.evaluations_recorded,
                mean_score: None,
                best_score: None,
                survivors: 0,
                new_variants: 0,
                committed: false,
                failures,
            });
        }

        if self.config.human_gate {
            if let Some(gate) = human_gate {
                let limit = annotation_query_limit(active.len(), num_simulations_per_prompt);
                let items = self.adapter.get_current_data_for_annotation(round_num, limit).await?;
                gate.await_feedback(self.adapter.as_ref(), &items).await?;
            }
        }

        let backward_outcome = self
            .backward_pass(&active, round_num, num_variants as usize, &mut failures)
            .await?;
        let survivors_count = backward_outcome.survivors.len() as u32;
        let new_variants_count = backward_outcome.variants.len() as u32;
        let mean_score = backward_outcome.mean_score;
        let best_score = backward_outcome.best_score;

        let (next_ids, new_generation) = self
            .commit_generation(
                round_num,
                backward_outcome.survivors,
                backward_outcome.non_survivors,
                backward_outcome.variants,
            )
            .await?;

        {
            let mut state = self.state.lock().expect("control loop mutex poisoned");
            state.generation = new_generation;
            state.active_ids = next_ids;
        }

        Ok(CycleReport {
            generation: round_num,
            prompts_evaluated,
            outputs_produced: forward_outcome.outputs_produced,
            evaluations_recorded: forward_outcome.evaluations_recorded,
            mean_score,
            best_score,
            survivors: survivors_count,
            new_variants: new_variants_count,
            committed: true,
            failures,
        })
    }

    /// Repeatedly invokes [`ControlLoop::run_cycle`] with the configured
    /// defaults until `num_cycles` cycles complete, a cycle fails to
    /// commit (cancellation or budget exhaustion), or the best score
    /// stops improving by more than `early_stop_epsilon`.
    pub async fn run_training_loop(
        &self,
        input_sampler: &dyn InputSampler,
        num_cycles: u32,
        human_gate: Option<&dyn HumanGate>,
        cancellation: &CancellationToken,
    ) -> ArcherResult<Vec<CycleReport>> {
        let mut reports = Vec::with_capacity(num_cycles as usize);
        let mut previous_best: Option<f64> = None;

        for _ in 0..num_cycles {
            let report = self
                .run_cycle(
                    input_sampler,
                    self.config.num_variants_per_survivor,
                    self.config.num_simulations_per_prompt,
                    self.config.max_prompts_per_cycle,
                    human_gate,
                    cancellation,
                )
                .await?;

            let stop_early = self.config.early_stop_epsilon > 0.0
                && matches!(
                    (previous_best, report.best_score),
                    (Some(prev), Some(current)) if current - prev <= self.config.early_stop_epsilon
                );

            if report.best_score.is_some() {
                previous_best = report.best_score;
            }

            let committed = report.committed;
            reports.push(report);

            if !committed || stop_early {
                break;
            }
        }

        Ok(reports)
    }
}

enum ForwardPassStop {
    Completed,
    Cancelled,
    BudgetExceeded,
}

struct ForwardPassOutcome {
    outputs_produced: u32,
    evaluations_recorded: u32,
    stop: ForwardPassStop,
}

struct BackwardPassOutcome {
    survivors: Vec<Prompt>,
    non_survivors: Vec<Prompt>,
    variants: Vec<Prompt>,
    mean_score: Option<f64>,
    best_score: Option<f64>,
}

fn annotation_query_limit(active_len: usize, num_simulations_per_prompt: u32) -> u32 {
    (active_len as u32).saturating_mul(num_simulations_per_prompt.max(1)).saturating_mul(2).max(1)
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

fn mean_of(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        None
    } else {
        Some(round2(values.iter().sum::<f64>() / values.len() as f64))
    }
}

#[allow(clippy::too_many_arguments)]
async fn run_pair(
    generator: Arc<dyn ContentGenerator>,
    evaluator: Arc<dyn RubricEvaluator>,
    adapter: Arc<dyn DatabaseAdapter>,
    prompt: Prompt,
    input: String,
    round_num: u32,
    rubric_text: &str,
    context: &[String],
    evaluator_id: &str,
) -> ArcherResult<()> {
    let content = generator.generate(&prompt.content, &input).await?;
    let output_id = with_store_retry(|| adapter.store_generated_content(&input, &content, prompt.id, round_num)).await?;
    let result = evaluator.evaluate(&input, &content, rubric_text, context).await?;
    with_store_retry(|| adapter.store_evaluation(output_id, result.clone(), false, evaluator_id)).await?;
    Ok(())
}

async fn with_store_retry<T, F, Fut>(mut op: F) -> ArcherResult<T>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = ArcherResult<T>>,
{
    let mut attempt = 0usize;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(ArcherError::Store(message)) if attempt + 1 < STORE_MAX_ATTEMPTS => {
                let delay_ms = next_backoff_ms_with_jitter(attempt, true);
                warn!(attempt, delay_ms, error = %message, "store operation failed, retrying");
                tokio::time::sleep(Duration::from_millis(delay_ms)).await;
                attempt += 1;
            }
            Err(error) => return Err(error),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use archer_evaluator::DefaultRubricEvaluator;
    use archer_generator::DefaultContentGenerator;
    use archer_llm::ScriptedLlmClient;
    use archer_optimizer::DefaultPromptOptimizer;
    use archer_store::InMemoryStore;
    use crate::sampler::VecInputSampler;

    fn build_loop(
        generator_script: Vec<&str>,
        evaluator_script: Vec<&str>,
        optimizer_script: Vec<&str>,
        config: ArcherConfig,
    ) -> ControlLoop {
        let generator = Arc::new(DefaultContentGenerator::new(
            Arc::new(ScriptedLlmClient::new(generator_script)),
            "gpt-4o-mini",
        ));
        let evaluator = Arc::new(DefaultRubricEvaluator::new(
            Arc::new(ScriptedLlmClient::new(evaluator_script)),
            "gpt-4o-mini",
        ));
        let optimizer = Arc::new(DefaultPromptOptimizer::new(
            Arc::new(ScriptedLlmClient::new(optimizer_script)),
            "gpt-4o-mini",
        ));
        let adapter = Arc::new(InMemoryStore::new());

        ControlLoop::new(
            generator,
            evaluator,
            optimizer,
            adapter,
            config,
            "gpt-4o-mini",
            "summarization",
            "Judge clarity and faithfulness to the input.",
            Vec::new(),
            "ai-judge",
        )
    }

    #[tokio::test]
    async fn s1_single_cycle_happy_path() {
        let control_loop = build_loop(
            vec!["A cat sat down."],
            vec!["SCORE: 4\nFEEDBACK: concise\nIMPROVED_OUTPUT: A cat was sitting."],
            vec!["Summarize briefly: {input}", "Summarize succinctly: {input}"],
            ArcherConfig {
                num_simulations_per_prompt: 1,
                max_prompts_per_cycle: 4,
                num_variants_per_survivor: 2,
                survivor_fraction: 1.0,
                ..ArcherConfig::default()
            },
        );

        control_loop.seed(&["Summarize: {input}".to_string()]).await.unwrap();
        let sampler = VecInputSampler::new(vec!["The cat sat."]);
        let cancellation = CancellationToken::new();

        let report = control_loop
            .run_cycle(&sampler, 2, 1, 4, None, &cancellation)
            .await
            .unwrap();

        assert_eq!(report.outputs_produced, 1);
        assert_eq!(report.evaluations_recorded, 1);
        assert_eq!(report.mean_score, Some(4.0));
        assert_eq!(report.survivors, 1);
        assert_eq!(report.new_variants, 2);
        assert!(report.committed);
        assert!(report.failures.is_empty());
        assert_eq!(control_loop.generation(), 1);
        assert_eq!(control_loop.active_ids().len(), 3);
    }

    #[tokio::test]
    async fn s4_slot_missing_variant_is_discarded_and_reported() {
        let control_loop = build_loop(
            vec!["A cat sat down."],
            vec!["SCORE: 4\nFEEDBACK: concise\nIMPROVED_OUTPUT: x"],
            vec![
                "Summarize the passage.",
                "Summarize the passage without any placeholder.",
                "Summarize tightly: {input}",
            ],
            ArcherConfig {
                num_simulations_per_prompt: 1,
                max_prompts_per_cycle: 4,
                num_variants_per_survivor: 2,
                survivor_fraction: 1.0,
                ..ArcherConfig::default()
            },
        );

        control_loop.seed(&["Summarize: {input}".to_string()]).await.unwrap();
        let sampler = VecInputSampler::new(vec!["The cat sat."]);
        let cancellation = CancellationToken::new();

        let report = control_loop
            .run_cycle(&sampler, 2, 1, 4, None, &cancellation)
            .await
            .unwrap();

        assert_eq!(report.new_variants, 1);
        assert_eq!(
            report.failures,
            vec![crate::report::FailureEntry {
                stage: Stage::BackwardPass,
                kind: "SLOT_MISSING".to_string(),
                count: 1,
            }]
        );
    }

    #[tokio::test]
    async fn s5_cancellation_stops_forward_pass_without_committing() {
        let control_loop = build_loop(
            vec!["out"],
            vec!["SCORE: 3\nFEEDBACK: ok\nIMPROVED_OUTPUT: x"],
            vec!["unused: {input}"],
            ArcherConfig {
                num_simulations_per_prompt: 3,
                max_prompts_per_cycle: 4,
                llm_concurrency_limit: 1,
                ..ArcherConfig::default()
            },
        );

        control_loop
            .seed(&[
                "A: {input}".to_string(),
                "B: {input}".to_string(),
                "C: {input}".to_string(),
                "D: {input}".to_string(),
            ])
            .await
            .unwrap();

        struct CancelAfterFive {
            inner: VecInputSampler,
            cancellation: CancellationToken,
            drawn: std::sync::atomic::AtomicUsize,
        }

        #[async_trait::async_trait]
        impl InputSampler for CancelAfterFive {
            async fn next_input(&self) -> Option<String> {
                let drawn = self.drawn.fetch_add(1, std::sync::atomic::Ordering::SeqCst) + 1;
                if drawn == 5 {
                    self.cancellation.cancel();
                }
                self.inner.next_input().await
            }
        }

        let cancellation = CancellationToken::new();
        let sampler = CancelAfterFive {
            inner: VecInputSampler::new(vec!["i"; 12]),
            cancellation: cancellation.clone(),
            drawn: std::sync::atomic::AtomicUsize::new(0),
        };

        let report = control_loop
            .run_cycle(&sampler, 3, 3, 4, None, &cancellation)
            .await
            .unwrap();

        assert_eq!(report.outputs_produced, 5);
        assert_eq!(report.evaluations_recorded, 5);
        assert!(!report.committed);
        assert_eq!(control_loop.generation(), 0);
        assert!(report.failures.iter().any(|f| f.kind == "CANCELLED"));
    }

    #[tokio::test]
    async fn budget_exceeded_stops_before_any_pair_and_does_not_commit() {
        let control_loop = build_loop(
            vec!["out"],
            vec!["SCORE: 3\nFEEDBACK: ok\nIMPROVED_OUTPUT: x"],
            vec!["unused: {input}"],
            ArcherConfig {
                num_simulations_per_prompt: 1,
                max_prompts_per_cycle: 4,
                cycle_wall_budget_seconds: Some(0),
                ..ArcherConfig::default()
            },
        );

        control_loop.seed(&["A: {input}".to_string()]).await.unwrap();
        let sampler = VecInputSampler::new(vec!["i"]);
        let cancellation = CancellationToken::new();

        tokio::time::sleep(Duration::from_millis(5)).await;

        let report = control_loop
            .run_cycle(&sampler, 2, 1, 4, None, &cancellation)
            .await
            .unwrap();

        assert_eq!(report.outputs_produced, 0);
        assert!(!report.committed);
        assert!(report.failures.iter().any(|f| f.kind == "BUDGET_EXCEEDED"));
    }

    #[tokio::test]
    async fn s6_human_override_changes_survival_aggregate() {
        let control_loop = build_loop(
            vec!["out-1", "out-2"],
            vec![
                "SCORE: 5\nFEEDBACK: great\nIMPROVED_OUTPUT: x",
                "SCORE: 1\nFEEDBACK: bad\nIMPROVED_OUTPUT: y",
            ],
            vec!["variant one: {input}", "variant two: {input}"],
            ArcherConfig {
                num_simulations_per_prompt: 1,
                max_prompts_per_cycle: 4,
                num_variants_per_survivor: 1,
                survivor_fraction: 0.5,
                human_gate: true,
                ..ArcherConfig::default()
            },
        );

        let ids = control_loop
            .seed(&["A: {input}".to_string(), "B: {input}".to_string()])
            .await
            .unwrap();
        let sampler = VecInputSampler::new(vec!["i1", "i2"]);
        let cancellation = CancellationToken::new();

        // Override the AI score of the second output, which would
        // otherwise make prompt B the sole survivor.
        struct FlipGate;
        #[async_trait::async_trait]
        impl HumanGate for FlipGate {
            async fn await_feedback(
                &self,
                adapter: &dyn DatabaseAdapter,
                items: &[archer_store::AnnotationItem],
            ) -> ArcherResult<()> {
                for item in items {
                    if let Some(eval) = &item.ai_evaluation {
                        if eval.result.score() == Some(1) {
                            adapter
                                .store_human_feedback(
                                    item.output_id,
                                    archer_types::EvaluationResult::Scored {
                                        score: 5,
                                        feedback: "human says great".to_string(),
                                        improved_output: "y".to_string(),
                                    },
                                    "annotator-1",
                                )
                                .await?;
                        }
                    }
                }
                Ok(())
            }
        }

        let gate = FlipGate;
        let report = control_loop
            .run_cycle(&sampler, 1, 1, 4, Some(&gate), &cancellation)
            .await
            .unwrap();

        assert_eq!(report.survivors, 1);
        assert!(ids.len() == 2);
    }
}
