//! The release task set and the collaborators its actions drive.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Result;

use crate::core::env::FinalizedEnvironment;
use crate::io::config::ShipyardConfig;
use crate::io::container::{ContainerEngine, ImageBuild, parse_build_args};
use crate::io::environment::{DOCKER_BUILD_ARGS, NEXUS_PASSWORD, NEXUS_USERNAME, VERSION};
use crate::io::git::Git;
use crate::io::process::ProcessRunner;
use crate::io::python::PythonPackager;
use crate::tasks::{Task, TaskGraph};
use crate::validate::ArtifactValidator;

pub const CONTAINER_INIT: &str = "container-init";
pub const LOGIN: &str = "login";
pub const KILL_CONTAINERS: &str = "kill-containers";
pub const BUILD_IMAGE: &str = "build-image";
pub const TAG_IMAGE: &str = "tag-image";
pub const PUSH_IMAGE: &str = "push-image";
pub const BUILD_AND_PUBLISH_IMAGE: &str = "build-and-publish-image";
pub const GIT_TAG: &str = "git-tag";
pub const PACKAGE_ENVIRONMENT_SETUP: &str = "package-environment-setup";
pub const PACKAGE: &str = "package";
pub const BUILD_AND_PACKAGE: &str = "build-and-package";
pub const PUBLISH: &str = "publish";
pub const CLEAN: &str = "clean";
pub const CHECK_PACKAGES: &str = "check-packages";

/// Tasks every automated run performs before the requested goals.
pub const AUTOMATED_PRELUDE: &[&str] = &[CONTAINER_INIT, LOGIN];

/// Tasks an automated run performs after `goal` succeeds.
pub fn automated_followups(goal: &str) -> &'static [&'static str] {
    match goal {
        BUILD_AND_PUBLISH_IMAGE => &[GIT_TAG],
        _ => &[],
    }
}

/// Collaborators shared by the task actions, constructed once per run.
pub struct Components {
    pub env: Arc<FinalizedEnvironment>,
    pub engine: Arc<ContainerEngine>,
    pub python: Arc<PythonPackager>,
    pub validator: Arc<ArtifactValidator>,
    pub git: Arc<Git>,
    pub dockerfile: PathBuf,
}

impl Components {
    pub fn new(
        runner: Arc<dyn ProcessRunner>,
        cfg: &ShipyardConfig,
        root: &Path,
        env: Arc<FinalizedEnvironment>,
    ) -> Result<Self> {
        let engine = Arc::new(ContainerEngine::new(
            runner.clone(),
            cfg.container.clone(),
            root,
        ));
        let validator = ArtifactValidator::new(engine.clone(), cfg, root, &env)?;
        Ok(Self {
            python: Arc::new(PythonPackager::new(runner.clone(), cfg.python.clone(), root)),
            git: Arc::new(Git::new(runner, root, &cfg.ci.git_remote)),
            validator: Arc::new(validator),
            dockerfile: cfg.container.dockerfile.clone(),
            engine,
            env,
        })
    }
}

/// Declare every release goal on `graph`.
pub fn declare_release_tasks(graph: &mut TaskGraph, c: &Components) -> Result<()> {
    let engine = c.engine.clone();
    graph.declare(Task::new(
        CONTAINER_INIT,
        "Check the container engine is reachable",
        move || engine.init(),
    ))?;

    let (engine, env) = (c.engine.clone(), c.env.clone());
    graph.declare(Task::new(LOGIN, "Log in to the image registry", move || {
        engine.login(env.require(NEXUS_USERNAME)?, env.require(NEXUS_PASSWORD)?)
    }))?;

    let engine = c.engine.clone();
    graph.declare(Task::new(
        KILL_CONTAINERS,
        "Kill running transient containers",
        move || engine.kill_transient().map(|_| ()),
    ))?;

    let (engine, env, dockerfile) = (c.engine.clone(), c.env.clone(), c.dockerfile.clone());
    graph.declare(
        Task::new(BUILD_IMAGE, "Build the release image", move || {
            let build = ImageBuild {
                tag: engine.local_image(env.require(VERSION)?),
                dockerfile: dockerfile.clone(),
                context: PathBuf::from("."),
                build_args: parse_build_args(env.require(DOCKER_BUILD_ARGS)?),
            };
            engine.build(&build)
        })
        .serial([KILL_CONTAINERS]),
    )?;

    let (engine, env) = (c.engine.clone(), c.env.clone());
    graph.declare(Task::new(
        TAG_IMAGE,
        "Tag the release image for the registry",
        move || {
            let version = env.require(VERSION)?;
            engine.tag(&engine.local_image(version), &engine.remote_image(version))
        },
    ))?;

    let (engine, env) = (c.engine.clone(), c.env.clone());
    graph.declare(Task::new(
        PUSH_IMAGE,
        "Push the release image to the registry",
        move || engine.push(&engine.remote_image(env.require(VERSION)?)),
    ))?;

    graph.declare(
        Task::group(BUILD_AND_PUBLISH_IMAGE, "Build, tag and push the release image")
            .serial([BUILD_IMAGE, TAG_IMAGE, PUSH_IMAGE]),
    )?;

    let (git, env) = (c.git.clone(), c.env.clone());
    graph.declare(Task::new(GIT_TAG, "Tag and push the release commit", move || {
        git.tag_release(env.require(VERSION)?).map(|_| ())
    }))?;

    let python = c.python.clone();
    graph.declare(Task::new(
        PACKAGE_ENVIRONMENT_SETUP,
        "Create the virtualenv and install build requirements",
        move || python.setup_environment(),
    ))?;

    let python = c.python.clone();
    graph.declare(Task::new(PACKAGE, "Build the python packages", move || {
        python.package()
    }))?;

    graph.declare(
        Task::group(BUILD_AND_PACKAGE, "Set up the build environment, then package")
            .serial([PACKAGE_ENVIRONMENT_SETUP, PACKAGE]),
    )?;

    let python = c.python.clone();
    graph.declare(Task::new(
        PUBLISH,
        "Upload the built packages to the package index",
        move || python.publish().map(|_| ()),
    ))?;

    let python = c.python.clone();
    graph.declare(Task::new(CLEAN, "Remove build outputs", move || {
        python.clean().map(|_| ())
    }))?;

    let validator = c.validator.clone();
    graph.declare(Task::new(
        CHECK_PACKAGES,
        "Install-check every artifact across the dependency matrix",
        move || validator.check_packages().map(|_| ()),
    ))?;

    Ok(())
}
