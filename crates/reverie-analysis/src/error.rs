use reverie_core::ErrorKind;
use reverie_models::ModelError;
use thiserror::Error;

#[derive(Debug, Clone, Error)]
pub enum AnalysisError {
    /// Empty (or whitespace-only) input; no signal row is ever created.
    #[error("input is empty")]
    EmptyInput,

    /// Chunker configuration rejected (overlap must stay below the budget).
    #[error("invalid chunking parameters: {0}")]
    InvalidChunking(String),

    /// Every extractor failed; nothing was derived. Partial failures do not
    /// take this path — they degrade to an incomplete signal record.
    #[error("analysis failed for every extractor: {0}")]
    TotalFailure(String),

    /// The analysis queue is full and this fingerprint is not in flight.
    #[error("analysis queue is full")]
    Overloaded,

    /// Deadline elapsed or the caller cancelled the chain.
    #[error("analysis cancelled")]
    Cancelled,

    #[error(transparent)]
    Model(#[from] ModelError),
}

impl AnalysisError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            AnalysisError::EmptyInput | AnalysisError::InvalidChunking(_) => {
                ErrorKind::InputInvalid
            }
            AnalysisError::TotalFailure(_) => ErrorKind::ModelFault,
            AnalysisError::Overloaded => ErrorKind::Overloaded,
            AnalysisError::Cancelled => ErrorKind::Cancelled,
            AnalysisError::Model(e) => e.kind(),
        }
    }
}
