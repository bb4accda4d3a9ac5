//! CLI tests for goal listing, planning and argument errors.
//!
//! Spawns the shipyard binary with a scrubbed environment and checks exit
//! codes. None of these runs reaches a collaborator process.

use std::path::Path;
use std::process::{Command, Output};

use shipyard::exit_codes;
use shipyard::test_support::release_vars;

fn shipyard(root: &Path, args: &[&str], vars: &[(String, String)]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_shipyard"))
        .env_clear()
        .envs(vars.iter().map(|(k, v)| (k.as_str(), v.as_str())))
        .current_dir(root)
        .arg("--root")
        .arg(root)
        .args(args)
        .output()
        .expect("spawn shipyard")
}

fn stdout(output: &Output) -> String {
    String::from_utf8_lossy(&output.stdout).into_owned()
}

#[test]
fn list_prints_goals_without_environment() {
    let temp = tempfile::tempdir().expect("tempdir");
    let output = shipyard(temp.path(), &["list"], &[]);
    assert_eq!(output.status.code(), Some(exit_codes::OK));
    let listing = stdout(&output);
    assert!(listing.contains("check-packages"));
    assert!(listing.contains("build-and-publish-image"));
}

#[test]
fn unknown_goal_is_invalid() {
    let temp = tempfile::tempdir().expect("tempdir");
    let output = shipyard(temp.path(), &["--manual", "deploy"], &release_vars());
    assert_eq!(output.status.code(), Some(exit_codes::INVALID));
    assert!(String::from_utf8_lossy(&output.stderr).contains("unknown task 'deploy'"));
}

#[test]
fn no_goals_is_invalid() {
    let temp = tempfile::tempdir().expect("tempdir");
    let output = shipyard(temp.path(), &[], &release_vars());
    assert_eq!(output.status.code(), Some(exit_codes::INVALID));
}

#[test]
fn missing_required_variable_is_invalid() {
    let temp = tempfile::tempdir().expect("tempdir");
    let vars: Vec<_> = release_vars()
        .into_iter()
        .filter(|(k, _)| k != "PIP_INDEX_URL")
        .collect();
    let output = shipyard(temp.path(), &["--manual", "--dry-run", "package"], &vars);
    assert_eq!(output.status.code(), Some(exit_codes::INVALID));
    assert!(String::from_utf8_lossy(&output.stderr).contains("PIP_INDEX_URL"));
}

#[test]
fn automated_dry_run_plans_prelude_and_git_tag() {
    let temp = tempfile::tempdir().expect("tempdir");
    let mut vars = release_vars();
    vars.push(("GO_SERVER_URL".to_string(), "https://ci.example".to_string()));
    vars.push(("GO_PIPELINE_LABEL".to_string(), "5.0.1".to_string()));
    let output = shipyard(
        temp.path(),
        &["--dry-run", "build-and-publish-image"],
        &vars,
    );
    assert_eq!(output.status.code(), Some(exit_codes::OK));
    let plan = stdout(&output);
    assert!(plan.contains("automated run"));
    assert!(plan.contains("1. container-init"));
    assert!(plan.contains("2. login"));
    assert!(plan.trim_end().ends_with("git-tag"));
}

#[test]
fn env_masks_secrets() {
    let temp = tempfile::tempdir().expect("tempdir");
    let output = shipyard(temp.path(), &["--manual", "env"], &release_vars());
    assert_eq!(output.status.code(), Some(exit_codes::OK));
    let rendered = stdout(&output);
    assert!(rendered.contains("VERSION=dev"));
    assert!(rendered.contains("TWINE_USERNAME=builder"));
    assert!(!rendered.contains("s3cret"));
}

#[test]
fn user_env_file_supplies_missing_variables() {
    let temp = tempfile::tempdir().expect("tempdir");
    std::fs::write(
        temp.path().join(".env"),
        "PIP_INDEX_URL=https://from-file.example/simple\n",
    )
    .expect("write .env");
    let vars: Vec<_> = release_vars()
        .into_iter()
        .filter(|(k, _)| k != "PIP_INDEX_URL")
        .collect();
    let output = shipyard(temp.path(), &["--manual", "env"], &vars);
    assert_eq!(output.status.code(), Some(exit_codes::OK));
    assert!(stdout(&output).contains("DOCKER_BUILD_ARGS=PIP_INDEX_URL=https://from-file.example/simple"));
}

#[test]
fn invalid_config_is_invalid() {
    let temp = tempfile::tempdir().expect("tempdir");
    std::fs::write(temp.path().join("shipyard.toml"), "[validation]\nflags = []\n")
        .expect("write config");
    let output = shipyard(temp.path(), &["list"], &[]);
    assert_eq!(output.status.code(), Some(exit_codes::INVALID));
}
