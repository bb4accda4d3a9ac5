//! Deterministic, pure logic behind the release orchestrator.
//!
//! Core modules must be free of I/O side effects: environment resolution,
//! task planning and combination enumeration all operate on in-memory data.

pub mod env;
pub mod matrix;
pub mod plan;
pub mod types;
