use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::prompt::PromptId;

pub type OutputId = Uuid;

/// A single (prompt, input) rendering. Immutable once persisted.
#[derive(Debug, Clone, PartialEq)]
pub struct GeneratedOutput {
    pub id: OutputId,
    pub prompt_id: PromptId,
    pub input_data: String,
    pub content: String,
    pub round_num: u32,
    pub created_at: DateTime<Utc>,
}

impl GeneratedOutput {
    pub fn new(
        prompt_id: PromptId,
        input_data: impl Into<String>,
        content: impl Into<String>,
        round_num: u32,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            prompt_id,
            input_data: input_data.into(),
            content: content.into(),
            round_num,
            created_at: Utc::now(),
        }
    }
}
