//! The entry-analysis pipeline: bounded-length chunking, per-chunk signal
//! extraction through the model runner, weighted aggregation into a
//! per-document [`reverie_core::signal::SignalRecord`], fingerprint-based
//! single-flight coordination, and the bounded worker pool that applies
//! backpressure.

pub mod aggregate;
pub mod chunker;
pub mod error;
pub mod extract;
pub mod fingerprint;
pub mod pipeline;
pub mod pool;

pub use chunker::{Chunk, Chunker};
pub use error::AnalysisError;
pub use fingerprint::{canonicalize, fingerprint, FingerprintCoordinator};
pub use pipeline::AnalysisPipeline;
pub use pool::AnalysisPool;
