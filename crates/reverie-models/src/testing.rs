//! Test-support backends: a backend that always faults and one that records
//! its inputs. Kept in the library (not behind `cfg(test)`) so integration
//! suites in other crates can inject them through
//! [`crate::runner::ModelRunner::register`].

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use async_trait::async_trait;

use crate::backend::{InferenceBackend, ModelError, ModelInput, ModelOutput};

/// Fails every call with a device-style `ModelFault`.
pub struct FailingBackend {
    message: String,
}

impl FailingBackend {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

#[async_trait]
impl InferenceBackend for FailingBackend {
    fn name(&self) -> &str {
        "failing"
    }

    async fn infer(&self, _input: &ModelInput) -> Result<ModelOutput, ModelError> {
        Err(ModelError::Fault(self.message.clone()))
    }
}

/// Returns a fixed output and records how it was called.
pub struct CountingBackend {
    output: ModelOutput,
    calls: AtomicU64,
    last_input_len: AtomicUsize,
}

impl CountingBackend {
    pub fn new(output: ModelOutput) -> Self {
        Self {
            output,
            calls: AtomicU64::new(0),
            last_input_len: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> u64 {
        self.calls.load(Ordering::Relaxed)
    }

    /// Character length of the most recent guarded input.
    pub fn last_input_len(&self) -> usize {
        self.last_input_len.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl InferenceBackend for CountingBackend {
    fn name(&self) -> &str {
        "counting"
    }

    async fn infer(&self, input: &ModelInput) -> Result<ModelOutput, ModelError> {
        self.calls.fetch_add(1, Ordering::Relaxed);
        self.last_input_len
            .store(input.guarded_text().chars().count(), Ordering::Relaxed);
        Ok(self.output.clone())
    }
}
