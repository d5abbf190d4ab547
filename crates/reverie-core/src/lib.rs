//! Shared foundation for the Reverie engine: identifiers, the signal domain
//! model, the error taxonomy, and configuration loading.
//!
//! Every other crate in the workspace depends on this one; nothing here
//! performs I/O beyond reading the configuration file.

pub mod config;
pub mod error;
pub mod signal;
pub mod types;

pub use error::{EngineError, ErrorKind, Result};
