use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::output::OutputId;

pub type EvaluationId = Uuid;

/// Tagged sum type over the possible outcomes of the Rubric Evaluator's
/// parse step. All downstream aggregates pattern-match over this
/// exhaustively instead of inspecting a string flag.
#[derive(Debug, Clone, PartialEq)]
pub enum EvaluationResult {
    /// Cleanly parsed, in-range integer score.
    Scored {
        score: u8,
        feedback: String,
        improved_output: String,
    },
    /// Parsed, but the score had to be clamped to 1..5 or rounded from a
    /// non-integer / spelled-out value.
    Coerced {
        score: u8,
        feedback: String,
        improved_output: String,
    },
    /// Unparseable after the one repair attempt.
    ParseError { raw: String },
}

impl EvaluationResult {
    pub fn score(&self) -> Option<u8> {
        match self {
            EvaluationResult::Scored { score, .. } | EvaluationResult::Coerced { score, .. } => {
                Some(*score)
            }
            EvaluationResult::ParseError { .. } => None,
        }
    }

    pub fn feedback(&self) -> &str {
        match self {
            EvaluationResult::Scored { feedback, .. } | EvaluationResult::Coerced { feedback, .. } => {
                feedback
            }
            EvaluationResult::ParseError { .. } => "parse_error",
        }
    }

    pub fn improved_output(&self) -> &str {
        match self {
            EvaluationResult::Scored { improved_output, .. }
            | EvaluationResult::Coerced { improved_output, .. } => improved_output,
            EvaluationResult::ParseError { .. } => "",
        }
    }

    pub fn is_coerced(&self) -> bool {
        matches!(self, EvaluationResult::Coerced { .. })
    }

    pub fn is_parse_error(&self) -> bool {
        matches!(self, EvaluationResult::ParseError { .. })
    }
}

/// A structured judgement over a `GeneratedOutput`. Multiple evaluations
/// per output are allowed (one AI evaluation plus zero or more human
/// evaluations); see [`effective_evaluation`] for which one counts for
/// aggregation.
#[derive(Debug, Clone, PartialEq)]
pub struct Evaluation {
    pub id: EvaluationId,
    pub output_id: OutputId,
    pub result: EvaluationResult,
    pub is_human: bool,
    pub evaluator_id: String,
    pub created_at: DateTime<Utc>,
}

impl Evaluation {
    pub fn new(
        output_id: OutputId,
        result: EvaluationResult,
        is_human: bool,
        evaluator_id: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            output_id,
            result,
            is_human,
            evaluator_id: evaluator_id.into(),
            created_at: Utc::now(),
        }
    }

    pub fn effective_score(&self) -> Option<f64> {
        self.result.score().map(f64::from)
    }
}

/// Picks the "effective" evaluation for an output out of all evaluations
/// recorded against it: the most recent human evaluation when any human
/// evaluation exists, otherwise the AI evaluation.
pub fn effective_evaluation(evaluations: &[Evaluation]) -> Option<&Evaluation> {
    let mut humans: Vec<&Evaluation> = evaluations.iter().filter(|e| e.is_human).collect();
    if !humans.is_empty() {
        humans.sort_by_key(|e| e.created_at);
        return humans.last().copied();
    }
    evaluations.iter().find(|e| !e.is_human)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scored(score: u8) -> EvaluationResult {
        EvaluationResult::Scored {
            score,
            feedback: "ok".to_string(),
            improved_output: "better".to_string(),
        }
    }

    #[test]
    fn effective_evaluation_prefers_latest_human_over_ai() {
        let output_id = Uuid::new_v4();
        let ai = Evaluation::new(output_id, scored(5), false, "ai-judge");
        let mut human_old = Evaluation::new(output_id, scored(1), true, "annotator-1");
        let mut human_new = Evaluation::new(output_id, scored(2), true, "annotator-2");

        human_old.created_at = ai.created_at - chrono::Duration::seconds(10);
        human_new.created_at = ai.created_at + chrono::Duration::seconds(10);

        let evaluations = vec![ai, human_old, human_new.clone()];
        let effective = effective_evaluation(&evaluations).expect("effective evaluation");
        assert_eq!(effective.id, human_new.id);
        assert_eq!(effective.effective_score(), Some(2.0));
    }

    #[test]
    fn effective_evaluation_falls_back_to_ai_when_no_human_present() {
        let output_id = Uuid::new_v4();
        let ai = Evaluation::new(output_id, scored(4), false, "ai-judge");
        let evaluations = vec![ai.clone()];
        let effective = effective_evaluation(&evaluations).expect("effective evaluation");
        assert_eq!(effective.id, ai.id);
    }

    #[test]
    fn parse_error_has_no_score_and_is_excluded_from_aggregates() {
        let output_id = Uuid::new_v4();
        let evaluation = Evaluation::new(
            output_id,
            EvaluationResult::ParseError {
                raw: "it was fine".to_string(),
            },
            false,
            "ai-judge",
        );
        assert_eq!(evaluation.effective_score(), None);
        assert_eq!(evaluation.result.feedback(), "parse_error");
    }
}
