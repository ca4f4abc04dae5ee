use thiserror::Error;

/// Error surface shared by every Archer crate.
///
/// Variants map 1:1 onto the error kinds enumerated in the core design:
/// `TRANSPORT`, `AUTH`, `MODEL_REFUSED`, `MALFORMED`, `PARSE`,
/// `SLOT_MISSING`, `STORE`, `CANCELLED`, `BUDGET_EXCEEDED`.
#[derive(Debug, Error)]
pub enum ArcherError {
    #[error("transport error: {0}")]
    Transport(String),
    #[error("authentication error: {0}")]
    Auth(String),
    #[error("model refused: {0}")]
    ModelRefused(String),
    #[error("malformed model response: {0}")]
    Malformed(String),
    #[error("evaluator response could not be parsed: {0}")]
    Parse(String),
    #[error("prompt is missing the required {{input}} slot")]
    SlotMissing,
    #[error("database adapter error: {0}")]
    Store(String),
    #[error("cycle cancelled")]
    Cancelled,
    #[error("cycle wall-clock budget exceeded")]
    BudgetExceeded,
}

impl ArcherError {
    /// Stable, lower_snake_case kind tag used in `CycleReport.failures`.
    pub fn kind(&self) -> &'static str {
        match self {
            ArcherError::Transport(_) => "TRANSPORT",
            ArcherError::Auth(_) => "AUTH",
            ArcherError::ModelRefused(_) => "MODEL_REFUSED",
            ArcherError::Malformed(_) => "MALFORMED",
            ArcherError::Parse(_) => "PARSE",
            ArcherError::SlotMissing => "SLOT_MISSING",
            ArcherError::Store(_) => "STORE",
            ArcherError::Cancelled => "CANCELLED",
            ArcherError::BudgetExceeded => "BUDGET_EXCEEDED",
        }
    }

    /// Whether the enclosing stage should retry this failure.
    pub fn retriable(&self) -> bool {
        matches!(
            self,
            ArcherError::Transport(_) | ArcherError::Malformed(_) | ArcherError::Store(_)
        )
    }
}

pub type ArcherResult<T> = Result<T, ArcherError>;
