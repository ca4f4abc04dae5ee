use serde::{Deserialize, Serialize};

/// Which control-loop transition a failure was recorded against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Stage {
    SelectActive,
    ForwardPass,
    HumanGate,
    BackwardPass,
    CommitGeneration,
}

/// One row of `CycleReport.failures`: a (stage, kind) pair plus how many
/// times it occurred this cycle. Kinds are the stable tags from
/// `ArcherError::kind`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailureEntry {
    pub stage: Stage,
    pub kind: String,
    pub count: u32,
}

/// Result of one `run_cycle` call. `committed` is true only when the next
/// generation's survivors and variants were durably persisted and the
/// generation counter advanced; every other field is best-effort partial
/// reporting even on a short-circuited cycle.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CycleReport {
    pub generation: u32,
    pub prompts_evaluated: u32,
    pub outputs_produced: u32,
    pub evaluations_recorded: u32,
    pub mean_score: Option<f64>,
    pub best_score: Option<f64>,
    pub survivors: u32,
    pub new_variants: u32,
    pub committed: bool,
    pub failures: Vec<FailureEntry>,
}

/// Increments the count for an existing `(stage, kind)` entry, or appends
/// a new one at count 1.
pub fn record_failure(failures: &mut Vec<FailureEntry>, stage: Stage, kind: &str) {
    if let Some(entry) = failures.iter_mut().find(|f| f.stage == stage && f.kind == kind) {
        entry.count += 1;
    } else {
        failures.push(FailureEntry {
            stage,
            kind: kind.to_string(),
            count: 1,
        });
    }
}
