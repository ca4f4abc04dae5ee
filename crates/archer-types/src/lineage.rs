use uuid::Uuid;

use crate::prompt::PromptId;

/// An edge in the prompt ancestry graph (`PromptLineage`). Persisted
/// alongside each derived prompt so `archer-tracker` can walk ancestry
/// without re-deriving it from `Prompt.parent_id` joins.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LineageLink {
    pub child_id: PromptId,
    pub parent_id: PromptId,
    pub generation_delta: i64,
}

impl LineageLink {
    pub fn new(child_id: PromptId, parent_id: PromptId) -> Self {
        Self {
            child_id,
            parent_id,
            generation_delta: 1,
        }
    }

    /// A lineage link only ever records a direct parent/child step; the
    /// Prompt Optimizer never derives a prompt more than one generation
    /// removed from its parent.
    pub fn validate(&self) -> bool {
        self.generation_delta == 1 && self.child_id != self.parent_id
    }
}

/// Placeholder used when an ancestry edge is known but the parent row
/// itself was pruned from the active set (`lineage_series`'s `max_depth`
/// bound) — distinguishes "no parent" from "parent beyond the walked
/// depth".
pub const TRUNCATED_ANCESTOR: Uuid = Uuid::nil();
