//! Mapping from per-subsystem errors onto the engine's public error type.
//!
//! Every subsystem error exposes its [`reverie_core::ErrorKind`]; crossing
//! the engine boundary attaches a fresh correlation id and logs it with the
//! structured context so external reports can be traced back.

use reverie_core::EngineError;
use tracing::error;

/// Trait implemented for every subsystem error that knows its kind.
pub(crate) trait KindedError: std::fmt::Display {
    fn error_kind(&self) -> reverie_core::ErrorKind;
}

macro_rules! kinded {
    ($($ty:ty),+ $(,)?) => {$(
        impl KindedError for $ty {
            fn error_kind(&self) -> reverie_core::ErrorKind {
                self.kind()
            }
        }
    )+};
}

kinded!(
    reverie_store::StoreError,
    reverie_analysis::AnalysisError,
    reverie_chat::ChatError,
    reverie_cache::error::CacheError,
    reverie_vector::VectorError,
    reverie_models::ModelError,
    reverie_analytics::AnalyticsError,
);

/// Wrap a subsystem error, minting a correlation id and logging it.
pub(crate) fn engine_err<E: KindedError>(e: E) -> EngineError {
    let err = EngineError::new(e.error_kind(), e.to_string());
    error!(
        kind = err.kind.code(),
        correlation = %err.correlation,
        "{}",
        err.message
    );
    err
}
