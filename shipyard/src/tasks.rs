//! Named, memoized units of release work and the engine that runs them.
//!
//! A [`TaskGraph`] owns every declared [`Task`]. `run` plans the requested
//! goals up front (unknown names and cycles fail before any action starts),
//! then executes each task at most once for the lifetime of the graph.
//! Serial dependency groups run in listed order; parallel groups run on scoped
//! threads. The first failing action stops any further task from starting.

use std::collections::HashMap;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, OnceLock};
use std::thread;
use std::time::Instant;

use anyhow::{Result, anyhow};
use tracing::{debug, info, instrument, warn};

use crate::core::plan::{DepGroup, DepMode, PlanNode, execution_order};
use crate::error::{ConfigurationError, TaskFailed};

/// Zero-argument task body. Collaborators are captured when the task is declared.
pub type Action = Arc<dyn Fn() -> Result<()> + Send + Sync>;

/// A named unit of work with ordered prerequisite groups.
pub struct Task {
    name: String,
    description: String,
    groups: Vec<DepGroup>,
    action: Action,
    /// Set once the action has run; holds whether it succeeded.
    completed: OnceLock<bool>,
    /// Held while deciding whether to run the action.
    gate: Mutex<()>,
}

impl Task {
    pub fn new<F>(name: &str, description: &str, action: F) -> Self
    where
        F: Fn() -> Result<()> + Send + Sync + 'static,
    {
        Self {
            name: name.to_string(),
            description: description.to_string(),
            groups: Vec::new(),
            action: Arc::new(action),
            completed: OnceLock::new(),
            gate: Mutex::new(()),
        }
    }

    /// A task that only aggregates its prerequisites.
    pub fn group(name: &str, description: &str) -> Self {
        Self::new(name, description, || Ok(()))
    }

    /// Prerequisites that run one after another, in the listed order.
    pub fn serial<I, S>(self, tasks: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.with_group(DepMode::Serial, tasks)
    }

    /// Prerequisites that may run concurrently with each other.
    pub fn parallel<I, S>(self, tasks: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.with_group(DepMode::Parallel, tasks)
    }

    fn with_group<I, S>(mut self, mode: DepMode, tasks: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.groups.push(DepGroup {
            mode,
            tasks: tasks.into_iter().map(Into::into).collect(),
        });
        self
    }

    pub fn description(&self) -> &str {
        &self.description
    }
}

impl PlanNode for Task {
    fn name(&self) -> &str {
        &self.name
    }

    fn groups(&self) -> &[DepGroup] {
        &self.groups
    }
}

impl fmt::Debug for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Task")
            .field("name", &self.name)
            .field("groups", &self.groups)
            .field("completed", &self.completed.get())
            .finish_non_exhaustive()
    }
}

/// Declared tasks, in declaration order.
#[derive(Debug, Default)]
pub struct TaskGraph {
    tasks: Vec<Task>,
    index: HashMap<String, usize>,
}

/// Shared state for one `run` invocation.
struct RunState<'g> {
    graph: &'g TaskGraph,
    aborted: AtomicBool,
    failure: Mutex<Option<anyhow::Error>>,
    executed: Mutex<Vec<String>>,
}

impl TaskGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn declare(&mut self, task: Task) -> Result<()> {
        if self.index.contains_key(&task.name) {
            return Err(ConfigurationError::DuplicateTask(task.name.clone()).into());
        }
        self.index.insert(task.name.clone(), self.tasks.len());
        self.tasks.push(task);
        Ok(())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    /// Whether the task's action has already run successfully.
    pub fn completed(&self, name: &str) -> bool {
        self.get(name)
            .is_some_and(|task| task.completed.get() == Some(&true))
    }

    /// Task names and descriptions, in declaration order.
    pub fn describe(&self) -> impl Iterator<Item = (&str, &str)> {
        self.tasks
            .iter()
            .map(|task| (task.name.as_str(), task.description.as_str()))
    }

    /// Order in which `run(names)` would start tasks when nothing runs concurrently.
    pub fn plan(&self, names: &[&str]) -> Result<Vec<String>> {
        execution_order(&self.tasks, names)
    }

    /// Run the named tasks and all their transitive prerequisites.
    ///
    /// Returns the tasks executed by this call, in completion order. Tasks
    /// completed by an earlier call are skipped.
    #[instrument(skip(self))]
    pub fn run(&self, names: &[&str]) -> Result<Vec<String>> {
        let planned = self.plan(names)?;
        debug!(?planned, "task plan");

        let state = RunState {
            graph: self,
            aborted: AtomicBool::new(false),
            failure: Mutex::new(None),
            executed: Mutex::new(Vec::new()),
        };
        for name in names {
            if state.ensure(name).is_err() {
                break;
            }
        }

        let failure = state
            .failure
            .lock()
            .map_err(|_| anyhow!("task failure slot poisoned"))?
            .take();
        if let Some(err) = failure {
            return Err(err);
        }
        if state.aborted.load(Ordering::SeqCst) {
            return Err(anyhow!("task graph aborted"));
        }
        state
            .executed
            .into_inner()
            .map_err(|_| anyhow!("executed task list poisoned"))
    }

    fn get(&self, name: &str) -> Option<&Task> {
        self.index.get(name).map(|&i| &self.tasks[i])
    }
}

/// Marker returned up the recursion once the run is aborted.
struct Aborted;

fn panic_message(payload: &(dyn std::any::Any + Send)) -> &str {
    payload
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| payload.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("non-string panic payload")
}

impl RunState<'_> {
    fn ensure(&self, name: &str) -> Result<(), Aborted> {
        // Planning already rejected unknown names.
        let Some(task) = self.graph.get(name) else {
            return Err(Aborted);
        };
        match task.completed.get() {
            Some(true) => return Ok(()),
            Some(false) => {
                self.record_failure(anyhow!(TaskFailed {
                    task: task.name.clone(),
                }));
                return Err(Aborted);
            }
            None => {}
        }

        for group in &task.groups {
            match group.mode {
                DepMode::Serial => {
                    for dep in &group.tasks {
                        self.ensure(dep)?;
                    }
                }
                DepMode::Parallel => self.ensure_parallel(&group.tasks)?,
            }
        }

        // Concurrent requests for the same task block on the gate until the
        // single execution finishes. A task skipped after an abort stays unset.
        let _gate = task.gate.lock().map_err(|_| Aborted)?;
        let ok = match task.completed.get() {
            Some(&ok) => ok,
            None if self.aborted.load(Ordering::SeqCst) => {
                debug!(task = %task.name, "skipping task after earlier failure");
                return Err(Aborted);
            }
            None => *task.completed.get_or_init(|| self.execute(task)),
        };
        if ok { Ok(()) } else { Err(Aborted) }
    }

    fn ensure_parallel(&self, deps: &[String]) -> Result<(), Aborted> {
        if deps.len() <= 1 {
            return deps.iter().try_for_each(|dep| self.ensure(dep));
        }
        let results: Vec<Result<(), Aborted>> = thread::scope(|scope| {
            let handles: Vec<_> = deps
                .iter()
                .map(|dep| (dep, scope.spawn(move || self.ensure(dep))))
                .collect();
            handles
                .into_iter()
                .map(|(dep, handle)| {
                    handle.join().unwrap_or_else(|_| {
                        self.record_failure(anyhow!("task '{dep}' panicked").context(TaskFailed {
                            task: dep.clone(),
                        }));
                        Err(Aborted)
                    })
                })
                .collect()
        });
        results.into_iter().collect()
    }

    fn execute(&self, task: &Task) -> bool {
        println!("==> {}", task.name);
        info!(task = %task.name, "task started");
        let start = Instant::now();
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| (task.action)()))
            .unwrap_or_else(|payload| Err(anyhow!("panicked: {}", panic_message(&*payload))));
        match outcome {
            Ok(()) => {
                info!(task = %task.name, elapsed_ms = start.elapsed().as_millis() as u64, "task finished");
                if let Ok(mut executed) = self.executed.lock() {
                    executed.push(task.name.clone());
                }
                true
            }
            Err(err) => {
                warn!(task = %task.name, err = %format!("{err:#}"), "task failed");
                self.record_failure(err.context(TaskFailed {
                    task: task.name.clone(),
                }));
                false
            }
        }
    }

    /// Abort the run, keeping only the first failure.
    fn record_failure(&self, err: anyhow::Error) {
        self.aborted.store(true, Ordering::SeqCst);
        if let Ok(mut slot) = self.failure.lock() {
            slot.get_or_insert(err);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    use super::*;
    use crate::error::{CycleDetectedError, find_in_chain};

    type Log = Arc<Mutex<Vec<String>>>;

    fn recording(name: &str, log: &Log) -> Task {
        let log = Arc::clone(log);
        let label = name.to_string();
        Task::new(name, "test task", move || {
            log.lock().expect("log").push(label.clone());
            Ok(())
        })
    }

    fn failing(name: &str, log: &Log) -> Task {
        let log = Arc::clone(log);
        let label = name.to_string();
        Task::new(name, "test task", move || {
            log.lock().expect("log").push(label.clone());
            Err(anyhow!("exit status 1"))
        })
    }

    fn entries(log: &Log) -> Vec<String> {
        log.lock().expect("log").clone()
    }

    #[test]
    fn shared_prerequisite_runs_once() {
        let log = Log::default();
        let mut graph = TaskGraph::new();
        graph.declare(recording("c", &log)).expect("declare");
        graph.declare(recording("a", &log).serial(["c"])).expect("declare");
        graph.declare(recording("b", &log).serial(["c"])).expect("declare");

        let executed = graph.run(&["a", "b"]).expect("run");
        assert_eq!(entries(&log), vec!["c", "a", "b"]);
        assert_eq!(executed, vec!["c", "a", "b"]);
        assert!(graph.completed("c"));
    }

    #[test]
    fn completed_tasks_are_not_rerun_by_later_calls() {
        let log = Log::default();
        let mut graph = TaskGraph::new();
        graph.declare(recording("env", &log)).expect("declare");
        graph
            .declare(recording("package", &log).serial(["env"]))
            .expect("declare");

        graph.run(&["env"]).expect("first");
        let executed = graph.run(&["package"]).expect("second");
        assert_eq!(executed, vec!["package"]);
        assert_eq!(entries(&log), vec!["env", "package"]);
    }

    #[test]
    fn cycle_fails_before_any_action() {
        let log = Log::default();
        let mut graph = TaskGraph::new();
        graph.declare(recording("a", &log).serial(["b"])).expect("declare");
        graph.declare(recording("b", &log).serial(["a"])).expect("declare");

        let err = graph.run(&["a"]).unwrap_err();
        assert!(find_in_chain::<CycleDetectedError>(&err).is_some());
        assert!(entries(&log).is_empty());
    }

    #[test]
    fn duplicate_declaration_is_rejected() {
        let log = Log::default();
        let mut graph = TaskGraph::new();
        graph.declare(recording("a", &log)).expect("declare");
        let err = graph.declare(recording("a", &log)).unwrap_err();
        assert_eq!(
            err.downcast_ref::<ConfigurationError>(),
            Some(&ConfigurationError::DuplicateTask("a".to_string()))
        );
    }

    #[test]
    fn failure_stops_remaining_tasks_and_names_task() {
        let log = Log::default();
        let mut graph = TaskGraph::new();
        graph.declare(recording("setup", &log)).expect("declare");
        graph.declare(failing("package", &log)).expect("declare");
        graph.declare(recording("publish", &log)).expect("declare");
        graph
            .declare(Task::group("release", "all").serial(["setup", "package", "publish"]))
            .expect("declare");

        let err = graph.run(&["release"]).unwrap_err();
        assert_eq!(entries(&log), vec!["setup", "package"]);
        let failed = find_in_chain::<TaskFailed>(&err).expect("task failed");
        assert_eq!(failed.task, "package");
        assert!(format!("{err:#}").contains("exit status 1"));
        assert!(!graph.completed("package"));
        assert!(!graph.completed("release"));
    }

    #[test]
    fn previously_failed_task_fails_again_without_rerunning() {
        let log = Log::default();
        let mut graph = TaskGraph::new();
        graph.declare(failing("a", &log)).expect("declare");

        assert!(graph.run(&["a"]).is_err());
        let err = graph.run(&["a"]).unwrap_err();
        assert_eq!(find_in_chain::<TaskFailed>(&err).map(|t| t.task.as_str()), Some("a"));
        assert_eq!(entries(&log), vec!["a"]);
    }

    #[test]
    fn failure_in_first_goal_skips_later_goals() {
        let log = Log::default();
        let mut graph = TaskGraph::new();
        graph.declare(failing("a", &log)).expect("declare");
        graph.declare(recording("b", &log)).expect("declare");

        assert!(graph.run(&["a", "b"]).is_err());
        assert_eq!(entries(&log), vec!["a"]);
    }

    #[test]
    fn parallel_group_completes_before_dependent() {
        let log = Log::default();
        let mut graph = TaskGraph::new();
        for name in ["x", "y", "z"] {
            graph.declare(recording(name, &log)).expect("declare");
        }
        graph
            .declare(recording("join", &log).parallel(["x", "y", "z"]))
            .expect("declare");

        graph.run(&["join"]).expect("run");
        let seen = entries(&log);
        assert_eq!(seen.len(), 4);
        assert_eq!(seen.last().map(String::as_str), Some("join"));
    }

    #[test]
    fn parallel_siblings_sharing_a_prerequisite_run_it_once() {
        let counter = Arc::new(AtomicUsize::new(0));
        let mut graph = TaskGraph::new();
        let shared_counter = Arc::clone(&counter);
        graph
            .declare(Task::new("shared", "slow shared step", move || {
                thread::sleep(Duration::from_millis(20));
                shared_counter.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }))
            .expect("declare");
        graph
            .declare(Task::group("left", "l").serial(["shared"]))
            .expect("declare");
        graph
            .declare(Task::group("right", "r").serial(["shared"]))
            .expect("declare");
        graph
            .declare(Task::group("top", "t").parallel(["left", "right"]))
            .expect("declare");

        graph.run(&["top"]).expect("run");
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn failure_in_parallel_group_stops_dependent_and_names_task() {
        let log = Log::default();
        let mut graph = TaskGraph::new();
        graph.declare(recording("wheel", &log)).expect("declare");
        graph.declare(failing("sdist", &log)).expect("declare");
        graph
            .declare(recording("publish", &log).parallel(["wheel", "sdist"]))
            .expect("declare");

        let err = graph.run(&["publish"]).unwrap_err();
        assert_eq!(find_in_chain::<TaskFailed>(&err).map(|t| t.task.as_str()), Some("sdist"));
        assert!(!entries(&log).contains(&"publish".to_string()));
        assert!(!graph.completed("publish"));
    }

    #[test]
    fn panic_in_parallel_group_is_a_failure() {
        let log = Log::default();
        let mut graph = TaskGraph::new();
        graph.declare(recording("ok", &log)).expect("declare");
        graph
            .declare(Task::new("boom", "panics", || panic!("helper image vanished")))
            .expect("declare");
        graph
            .declare(recording("top", &log).parallel(["ok", "boom"]))
            .expect("declare");

        let err = graph.run(&["top"]).unwrap_err();
        assert_eq!(find_in_chain::<TaskFailed>(&err).map(|t| t.task.as_str()), Some("boom"));
        assert!(format!("{err:#}").contains("helper image vanished"));
        assert!(!entries(&log).contains(&"top".to_string()));
        assert!(!graph.completed("top"));
    }

    #[test]
    fn task_skipped_after_abort_can_run_later() {
        let log = Log::default();
        let mut graph = TaskGraph::new();
        graph.declare(failing("a", &log)).expect("declare");
        graph.declare(recording("b", &log)).expect("declare");
        graph
            .declare(Task::group("both", "a then b").serial(["a", "b"]))
            .expect("declare");

        assert!(graph.run(&["both"]).is_err());
        let executed = graph.run(&["b"]).expect("b never ran, so it is not failed");
        assert_eq!(executed, vec!["b"]);
        assert_eq!(entries(&log), vec!["a", "b"]);
    }

    #[test]
    fn describe_keeps_declaration_order() {
        let log = Log::default();
        let mut graph = TaskGraph::new();
        graph.declare(recording("b", &log)).expect("declare");
        graph.declare(recording("a", &log)).expect("declare");
        let names: Vec<&str> = graph.describe().map(|(name, _)| name).collect();
        assert_eq!(names, vec!["b", "a"]);
    }
}
