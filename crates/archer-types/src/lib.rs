//! Shared data model for Archer: the `Prompt`, `GeneratedOutput`,
//! `Evaluation` and `LineageLink` entities plus the common error surface.
//! Every other crate in the workspace depends on this one and nothing
//! else depends on them.

mod error;
mod evaluation;
mod lineage;
mod output;
mod prompt;

pub use error::{ArcherError, ArcherResult};
pub use evaluation::{effective_evaluation, Evaluation, EvaluationId, EvaluationResult};
pub use lineage::{LineageLink, TRUNCATED_ANCESTOR};
pub use output::{GeneratedOutput, OutputId};
pub use prompt::{Prompt, PromptId, PromptPerformance};
