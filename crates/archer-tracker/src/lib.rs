//! Performance Tracker: derives per-generation aggregates and per-prompt
//! lineage series from stored evaluations. No I/O beyond the single
//! Database Adapter read each operation performs; everything past that
//! read is a pure function, independently testable.

use std::collections::HashMap;
use std::sync::Arc;

use archer_store::{DatabaseAdapter, GenerationMetrics, PromptHistoryEntry};
use archer_types::{ArcherResult, PromptId};

/// One ancestor in a `lineage_series` walk, root-first.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LineageEntry {
    pub prompt_id: PromptId,
    pub generation: u32,
    pub mean_score: Option<f64>,
}

pub struct PerformanceTracker {
    adapter: Arc<dyn DatabaseAdapter>,
}

impl PerformanceTracker {
    pub fn new(adapter: Arc<dyn DatabaseAdapter>) -> Self {
        Self { adapter }
    }

    pub async fn per_generation_metrics(&self, max_rounds: u32) -> ArcherResult<Vec<GenerationMetrics>> {
        self.adapter.get_performance_metrics(max_rounds).await
    }

    /// Walks ancestors of `prompt_id` from root to `prompt_id`, bounded by
    /// `max_depth` generations so a corrupted parent chain cannot recurse
    /// unboundedly.
    pub async fn lineage_series(&self, prompt_id: PromptId, max_depth: u32) -> ArcherResult<Vec<LineageEntry>> {
        let history = self.adapter.get_prompt_history().await?;
        Ok(lineage_series_from_history(&history, prompt_id, max_depth))
    }
}

fn lineage_series_from_history(
    history: &[PromptHistoryEntry],
    prompt_id: PromptId,
    max_depth: u32,
) -> Vec<LineageEntry> {
    let by_id: HashMap<PromptId, &PromptHistoryEntry> =
        history.iter().map(|entry| (entry.prompt_id, entry)).collect();

    let mut chain = Vec::new();
    let mut current = by_id.get(&prompt_id).copied();
    let mut depth = 0u32;

    while let Some(entry) = current {
        chain.push(LineageEntry {
            prompt_id: entry.prompt_id,
            generation: entry.generation,
            mean_score: entry.mean_score,
        });
        depth += 1;
        if depth >= max_depth {
            break;
        }
        current = entry.parent_id.and_then(|parent_id| by_id.get(&parent_id).copied());
    }

    chain.reverse();
    chain
}
