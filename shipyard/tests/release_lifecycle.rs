//! End-to-end release runs against scripted collaborators.
//!
//! Drives the library the way the CLI does, with every container engine and
//! python call answered by a `ScriptedRunner`.

use std::sync::Arc;

use shipyard::error::{CombinationFailed, ConfigurationError, TaskFailed, find_in_chain};
use shipyard::exit_codes;
use shipyard::goals::Components;
use shipyard::io::config::ShipyardConfig;
use shipyard::io::process::CommandSpec;
use shipyard::lifecycle::LifecycleCoordinator;
use shipyard::test_support::{ScriptedRunner, TestProject, release_env};

fn coordinator(runner: &Arc<ScriptedRunner>, project: &TestProject) -> LifecycleCoordinator {
    let components = Components::new(
        runner.clone(),
        &ShipyardConfig::default(),
        project.path(),
        Arc::new(release_env(None)),
    )
    .expect("components");
    LifecycleCoordinator::new(&components).expect("coordinator")
}

fn dependencies_of(spec: &CommandSpec) -> Option<String> {
    spec.args
        .iter()
        .find_map(|a| a.strip_prefix("DEPENDENCIES=").map(str::to_string))
}

fn is_checker_build(spec: &CommandSpec) -> bool {
    dependencies_of(spec).is_some()
}

fn is_sweep(spec: &CommandSpec) -> bool {
    spec.has_args_prefix(&["ps"])
}

#[test]
fn failing_combination_stops_matrix_and_still_cleans_up() {
    let project = TestProject::new().expect("project");
    project.add_release_artifacts().expect("artifacts");
    let runner = Arc::new(ScriptedRunner::new());
    runner.fail_when(
        |spec| dependencies_of(spec).as_deref() == Some("[testing]"),
        "ERROR: No matching distribution found for pytest-iotics",
    );

    let err = coordinator(&runner, &project)
        .run(&["check-packages"])
        .unwrap_err();

    let failed = find_in_chain::<CombinationFailed>(&err).expect("combination context");
    assert_eq!(failed.artifact, "iotics.host.lib-1.0.0-py3-none-any.whl");
    assert_eq!(failed.combination, "[testing]");
    assert_eq!((failed.index, failed.total), (2, 3));
    assert_eq!(
        find_in_chain::<TaskFailed>(&err).map(|t| t.task.as_str()),
        Some("check-packages")
    );
    let message = format!("{err:#}");
    assert!(message.contains("iotics.host.lib-1.0.0-py3-none-any.whl"));
    assert!(message.contains("No matching distribution found for pytest-iotics"));
    assert_eq!(exit_codes::for_error(&err), exit_codes::VALIDATION);

    let attempted: Vec<String> = runner.calls().iter().filter_map(dependencies_of).collect();
    assert_eq!(attempted, vec!["[builder]", "[testing]"]);

    let calls = runner.calls();
    assert_eq!(runner.count_matching(is_sweep), 2);
    assert!(is_sweep(calls.first().expect("first call")));
    assert!(is_sweep(calls.last().expect("last call")));
}

#[test]
fn all_combinations_pass_for_both_artifacts() {
    let project = TestProject::new().expect("project");
    project.add_release_artifacts().expect("artifacts");
    let runner = Arc::new(ScriptedRunner::new());

    let summary = coordinator(&runner, &project)
        .run(&["check-packages"])
        .expect("run");
    assert_eq!(summary.executed, vec!["check-packages"]);

    let attempted: Vec<String> = runner.calls().iter().filter_map(dependencies_of).collect();
    assert_eq!(
        attempted,
        vec![
            "[builder]",
            "[testing]",
            "[builder,testing]",
            "[builder]",
            "[testing]",
            "[builder,testing]",
        ]
    );
}

#[test]
fn missing_artifact_is_configuration_error_without_builds() {
    let project = TestProject::new().expect("project");
    let runner = Arc::new(ScriptedRunner::new());

    let err = coordinator(&runner, &project)
        .run(&["check-packages"])
        .unwrap_err();
    assert!(find_in_chain::<ConfigurationError>(&err).is_some());
    assert_eq!(exit_codes::for_error(&err), exit_codes::INVALID);
    assert_eq!(runner.count_matching(is_checker_build), 0);
    assert_eq!(runner.count_matching(is_sweep), 2);
}

#[test]
fn duplicate_artifacts_are_configuration_error_without_builds() {
    let project = TestProject::new().expect("project");
    project.add_release_artifacts().expect("artifacts");
    project
        .add_artifact("iotics.host.lib-1.0.1-py3-none-any.whl")
        .expect("artifact");
    let runner = Arc::new(ScriptedRunner::new());

    let err = coordinator(&runner, &project)
        .run(&["check-packages"])
        .unwrap_err();
    match find_in_chain::<ConfigurationError>(&err) {
        Some(ConfigurationError::ArtifactCount { found, .. }) => assert_eq!(found.len(), 2),
        other => panic!("unexpected error {other:?}"),
    }
    assert_eq!(runner.count_matching(is_checker_build), 0);
}

#[test]
fn package_then_check_runs_each_task_once() {
    let project = TestProject::new().expect("project");
    project.add_release_artifacts().expect("artifacts");
    let runner = Arc::new(ScriptedRunner::new());

    let summary = coordinator(&runner, &project)
        .run(&["build-and-package", "package", "check-packages"])
        .expect("run");
    assert_eq!(
        summary.executed,
        vec![
            "package-environment-setup",
            "package",
            "build-and-package",
            "check-packages",
        ]
    );
    assert_eq!(
        runner.count_matching(|spec| spec.program == "./build_all.sh"),
        1
    );
}
