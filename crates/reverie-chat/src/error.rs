use reverie_analysis::AnalysisError;
use reverie_core::ErrorKind;
use reverie_models::ModelError;
use reverie_store::StoreError;
use reverie_vector::VectorError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ChatError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("message analysis failed: {0}")]
    Analysis(#[from] AnalysisError),

    /// The generation model failed; no assistant turn was persisted.
    #[error("generation failed: {0}")]
    Generation(ModelError),

    #[error(transparent)]
    Vector(#[from] VectorError),
}

impl ChatError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ChatError::Store(e) => e.kind(),
            ChatError::Analysis(e) => e.kind(),
            ChatError::Generation(e) => e.kind(),
            ChatError::Vector(e) => e.kind(),
        }
    }
}
