//! Test doubles for the orchestrator's collaborators
//!
//! Used by unit tests, the integration tests under `tests/` and the
//! benchmarks.

pub mod mocks;

pub use mocks::{MockLanguageModel, MockOperation, MockResolver, RecordingConfirmation};
