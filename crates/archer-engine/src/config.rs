use serde::{Deserialize, Serialize};

/// Explicit configuration record for a [`crate::ControlLoop`], constructed
/// at startup and passed in rather than read from global/env state.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ArcherConfig {
    pub generator_temperature: f32,
    pub evaluator_temperature: f32,
    pub optimizer_temperature: f32,
    pub num_simulations_per_prompt: u32,
    pub max_prompts_per_cycle: u32,
    pub num_variants_per_survivor: u32,
    pub survivor_fraction: f64,
    pub human_gate: bool,
    pub cycle_wall_budget_seconds: Option<u64>,
    pub llm_max_attempts: usize,
    pub llm_per_attempt_timeout_seconds: u64,
    /// Concurrency limit per model for in-flight LLM calls.
    pub llm_concurrency_limit: usize,
    /// `run_training_loop`'s early-stop threshold. `0.0` disables early
    /// stopping.
    pub early_stop_epsilon: f64,
}

impl Default for ArcherConfig {
    fn default() -> Self {
        Self {
            generator_temperature: 0.7,
            evaluator_temperature: 0.2,
            optimizer_temperature: 0.9,
            num_simulations_per_prompt: 3,
            max_prompts_per_cycle: 4,
            num_variants_per_survivor: 3,
            survivor_fraction: 0.5,
            human_gate: false,
            cycle_wall_budget_seconds: None,
            llm_max_attempts: 3,
            llm_per_attempt_timeout_seconds: 60,
            llm_concurrency_limit: 8,
            early_stop_epsilon: 0.0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_spec_section_six() {
        let config = ArcherConfig::default();
        assert_eq!(config.generator_temperature, 0.7);
        assert_eq!(config.evaluator_temperature, 0.2);
        assert_eq!(config.optimizer_temperature, 0.9);
        assert_eq!(config.num_simulations_per_prompt, 3);
        assert_eq!(config.max_prompts_per_cycle, 4);
        assert_eq!(config.num_variants_per_survivor, 3);
        assert_eq!(config.survivor_fraction, 0.5);
        assert!(!config.human_gate);
        assert_eq!(config.cycle_wall_budget_seconds, None);
        assert_eq!(config.llm_max_attempts, 3);
        assert_eq!(config.llm_per_attempt_timeout_seconds, 60);
        assert_eq!(config.llm_concurrency_limit, 8);
        assert_eq!(config.early_stop_epsilon, 0.0);
    }
}
