use std::collections::HashMap;

use async_trait::async_trait;

use archer_store::{AnnotationItem, DatabaseAdapter};
use archer_types::{ArcherResult, EvaluationResult, OutputId};

/// External collaborator: the human annotation surface. The control loop
/// suspends forward progress, hands the round's outputs to this gate, and
/// resumes once it returns — by which point any human corrections have
/// already been written back via `store_human_feedback`.
#[async_trait]
pub trait HumanGate: Send + Sync {
    async fn await_feedback(
        &self,
        adapter: &dyn DatabaseAdapter,
        items: &[AnnotationItem],
    ) -> ArcherResult<()>;
}

/// A scripted human reviewer for tests: applies a fixed map of
/// `output_id -> (result, evaluator_id)` to whichever annotation items
/// match, leaving the rest untouched.
#[derive(Default)]
pub struct ScriptedHumanGate {
    feedback: HashMap<OutputId, (EvaluationResult, String)>,
}

impl ScriptedHumanGate {
    pub fn new(feedback: Vec<(OutputId, EvaluationResult, String)>) -> Self {
        Self {
            feedback: feedback.into_iter().map(|(id, result, evaluator)| (id, (result, evaluator))).collect(),
        }
    }
}

#[async_trait]
impl HumanGate for ScriptedHumanGate {
    async fn await_feedback(
        &self,
        adapter: &dyn DatabaseAdapter,
        items: &[AnnotationItem],
    ) -> ArcherResult<()> {
        for item in items {
            if let Some((result, evaluator_id)) = self.feedback.get(&item.output_id) {
                adapter
                    .store_human_feedback(item.output_id, result.clone(), evaluator_id)
                    .await?;
            }
        }
        Ok(())
    }
}
