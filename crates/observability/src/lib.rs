//! Tracing and logging setup shared by every process that hosts the engine.

pub mod tracing;

pub use crate::tracing::{LogConfig, LogFormat, init, init_for_tests, init_with};
