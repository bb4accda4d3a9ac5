//! Release pipeline orchestrator.
//!
//! Sequences python packaging, container image builds and publication as a
//! graph of memoized tasks, and install-checks built packages across every
//! combination of their optional dependency groups. The architecture keeps a
//! strict separation:
//!
//! - **[`core`]**: Pure, deterministic logic (environment resolution, task
//!   planning, combination enumeration). No I/O.
//! - **[`io`]**: Side-effecting adapters (config, process execution, container
//!   engine, python tooling, git). Collaborators run behind
//!   [`io::process::ProcessRunner`] so tests can script them.
//!
//! Orchestration modules ([`tasks`], [`validate`], [`goals`], [`lifecycle`])
//! bind the two together for the CLI.

pub mod core;
pub mod error;
pub mod exit_codes;
pub mod goals;
pub mod io;
pub mod lifecycle;
pub mod logging;
pub mod tasks;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
pub mod validate;
