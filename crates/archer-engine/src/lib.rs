//! Control Loop: orchestrates the evolutionary cycle that ties the
//! Content Generator, Rubric Evaluator, Prompt Optimizer and Database
//! Adapter together into `run_cycle`/`run_training_loop`.

mod cancellation;
mod config;
mod control_loop;
mod human_gate;
mod report;
mod sampler;

pub use cancellation::CancellationToken;
pub use config::ArcherConfig;
pub use control_loop::ControlLoop;
pub use human_gate::{HumanGate, ScriptedHumanGate};
pub use report::{record_failure, CycleReport, FailureEntry, Stage};
pub use sampler::{CyclicInputSampler, InputSampler, VecInputSampler};

use tracing::level_filters::LevelFilter;
use tracing_subscriber::EnvFilter;

/// Installs a compact, target-free `tracing` subscriber at a default
/// level of `WARN`, overridable via `RUST_LOG`. Intended for binaries
/// embedding this crate; library code never calls this itself.
pub fn init_tracing() {
    let env_filter = EnvFilter::builder()
        .with_default_directive(LevelFilter::WARN.into())
        .from_env_lossy();

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .compact()
        .init();
}
