//! IoT Quality Engine Library
//!
//! Exposes the engine plus the adapters used by the binaries and tests.
//! The engine itself performs no I/O; `input` and `store` sit at its boundary.

pub mod engine;
pub mod input;
pub mod store;

pub use engine::{EngineConfig, EngineError, Pipeline, RawReading, RunOutput, RunSummary};
