//! Top-level run driver.
//!
//! A run plans the requested goals, sweeps stale transient containers, adds
//! the registry prelude and follow-ups for automated runs, and tears down
//! transient containers exactly once on the way out, whatever happened.

use std::sync::Arc;

use anyhow::Result;
use tracing::{debug, info, instrument, warn};

use crate::error::CleanupError;
use crate::goals::{AUTOMATED_PRELUDE, Components, automated_followups, declare_release_tasks};
use crate::io::container::ContainerEngine;
use crate::io::environment::is_automated;
use crate::tasks::TaskGraph;

/// What a successful run did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunSummary {
    /// Tasks executed, in completion order.
    pub executed: Vec<String>,
    pub automated: bool,
}

/// Scoped ownership of transient containers.
///
/// Acquiring sweeps leftovers from earlier runs; releasing (or dropping)
/// kills whatever this run left behind. Both are best effort.
pub struct CleanupGuard {
    engine: Arc<ContainerEngine>,
    released: bool,
}

impl CleanupGuard {
    pub fn acquire(engine: Arc<ContainerEngine>) -> Self {
        sweep(&engine, "stale container sweep");
        Self {
            engine,
            released: false,
        }
    }

    pub fn release(mut self) {
        self.teardown();
    }

    fn teardown(&mut self) {
        if self.released {
            return;
        }
        self.released = true;
        sweep(&self.engine, "container teardown");
    }
}

impl Drop for CleanupGuard {
    fn drop(&mut self) {
        self.teardown();
    }
}

fn sweep(engine: &ContainerEngine, phase: &str) {
    match engine.kill_transient() {
        Ok(killed) => debug!(phase, killed, "transient containers cleared"),
        Err(err) => warn!(phase, error = %CleanupError(err), "ignoring cleanup failure"),
    }
}

pub struct LifecycleCoordinator {
    graph: TaskGraph,
    engine: Arc<ContainerEngine>,
    automated: bool,
}

impl LifecycleCoordinator {
    pub fn new(components: &Components) -> Result<Self> {
        let mut graph = TaskGraph::new();
        declare_release_tasks(&mut graph, components)?;
        Ok(Self {
            graph,
            engine: components.engine.clone(),
            automated: is_automated(&components.env),
        })
    }

    pub fn graph(&self) -> &TaskGraph {
        &self.graph
    }

    pub fn is_automated(&self) -> bool {
        self.automated
    }

    /// Every task a run of `goals` would execute, in order.
    pub fn plan(&self, goals: &[&str]) -> Result<Vec<String>> {
        let mut roots: Vec<&str> = Vec::new();
        if self.automated {
            roots.extend(AUTOMATED_PRELUDE);
        }
        roots.extend(goals);
        if self.automated {
            roots.extend(goals.iter().flat_map(|goal| automated_followups(goal)));
        }
        self.graph.plan(&roots)
    }

    /// Run `goals` inside a cleanup scope.
    ///
    /// Unknown goals and dependency cycles are reported before anything runs.
    /// Otherwise teardown happens exactly once and never replaces the primary
    /// error.
    #[instrument(skip(self), fields(automated = self.automated))]
    pub fn run(&self, goals: &[&str]) -> Result<RunSummary> {
        self.plan(goals)?;
        let guard = CleanupGuard::acquire(self.engine.clone());
        let result = self.run_phases(goals);
        guard.release();
        result
    }

    fn run_phases(&self, goals: &[&str]) -> Result<RunSummary> {
        let mut executed = Vec::new();
        if self.automated {
            executed.extend(self.graph.run(AUTOMATED_PRELUDE)?);
        }
        executed.extend(self.graph.run(goals)?);
        if self.automated {
            for goal in goals {
                let followups = automated_followups(goal);
                if !followups.is_empty() {
                    executed.extend(self.graph.run(followups)?);
                }
            }
        }
        info!(tasks = executed.len(), "run finished");
        Ok(RunSummary {
            executed,
            automated: self.automated,
        })
    }
}
