//! Side-effecting adapters: configuration, environment, processes and the
//! collaborators driven through them.

pub mod artifacts;
pub mod config;
pub mod container;
pub mod environment;
pub mod git;
pub mod process;
pub mod python;
