//! Typed child process invocation for collaborators.
//!
//! Commands are built as argument vectors ([`CommandSpec`]), never as shell
//! strings. Every collaborator call goes through the [`ProcessRunner`] seam so
//! orchestration can be tested with scripted outcomes.

use std::fmt;
use std::io::{Read, Write};
use std::path::PathBuf;
use std::process::{Command, Stdio};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use tracing::{debug, error, info, instrument, warn};
use wait_timeout::ChildExt;

use crate::core::env::FinalizedEnvironment;
use crate::error::ExternalProcessError;

/// Bytes of stderr kept in an [`ExternalProcessError`].
const ERROR_TAIL_BYTES: usize = 2_000;

/// Bytes written to a child's stdin. Never printed.
#[derive(Clone, PartialEq, Eq)]
pub struct StdinPayload(Vec<u8>);

impl fmt::Debug for StdinPayload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "StdinPayload({} bytes)", self.0.len())
    }
}

/// A program invocation: program, argument list, extra environment, workdir.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    pub program: String,
    pub args: Vec<String>,
    pub envs: Vec<(String, String)>,
    pub current_dir: Option<PathBuf>,
    pub stdin: Option<StdinPayload>,
}

impl CommandSpec {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            envs: Vec::new(),
            current_dir: None,
            stdin: None,
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.envs.push((key.into(), value.into()));
        self
    }

    pub fn current_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.current_dir = Some(dir.into());
        self
    }

    pub fn stdin(mut self, input: impl Into<Vec<u8>>) -> Self {
        self.stdin = Some(StdinPayload(input.into()));
        self
    }

    /// True if `args` starts with `prefix`.
    pub fn has_args_prefix(&self, prefix: &[&str]) -> bool {
        self.args.len() >= prefix.len() && self.args.iter().zip(prefix).all(|(a, p)| a == p)
    }

    pub fn has_arg(&self, arg: &str) -> bool {
        self.args.iter().any(|a| a == arg)
    }
}

impl fmt::Display for CommandSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.program)?;
        for arg in &self.args {
            if arg.is_empty() || arg.contains(char::is_whitespace) {
                write!(f, " '{arg}'")?;
            } else {
                write!(f, " {arg}")?;
            }
        }
        Ok(())
    }
}

/// Captured child process result.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProcessOutput {
    /// `None` when killed by a signal.
    pub code: Option<i32>,
    pub success: bool,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
    pub timed_out: bool,
}

impl ProcessOutput {
    pub fn ok(stdout: impl Into<Vec<u8>>) -> Self {
        Self {
            code: Some(0),
            success: true,
            stdout: stdout.into(),
            ..Self::default()
        }
    }

    pub fn failed(code: i32, stderr: impl Into<Vec<u8>>) -> Self {
        Self {
            code: Some(code),
            success: false,
            stderr: stderr.into(),
            ..Self::default()
        }
    }

    pub fn stdout_lossy(&self) -> String {
        String::from_utf8_lossy(&self.stdout).into_owned()
    }
}

/// Executes collaborator processes. Blocks until the child exits.
pub trait ProcessRunner: Send + Sync {
    fn run(&self, spec: &CommandSpec) -> Result<ProcessOutput>;
}

impl<R: ProcessRunner + ?Sized> ProcessRunner for Arc<R> {
    fn run(&self, spec: &CommandSpec) -> Result<ProcessOutput> {
        (**self).run(spec)
    }
}

/// Run `spec` and turn a non-zero exit into an [`ExternalProcessError`].
pub fn run_checked(runner: &dyn ProcessRunner, spec: &CommandSpec) -> Result<ProcessOutput> {
    let output = runner.run(spec)?;
    if output.success {
        return Ok(output);
    }
    warn!(command = %spec, exit_code = ?output.code, timed_out = output.timed_out, "command failed");
    let source = if output.stderr.is_empty() {
        &output.stdout
    } else {
        &output.stderr
    };
    Err(ExternalProcessError {
        program: spec.program.clone(),
        args: spec.args.clone(),
        code: output.code,
        timed_out: output.timed_out,
        stderr: error_tail(source),
    }
    .into())
}

fn error_tail(bytes: &[u8]) -> String {
    let text = String::from_utf8_lossy(bytes);
    let text = text.trim();
    if text.len() <= ERROR_TAIL_BYTES {
        return text.to_string();
    }
    let mut start = text.len() - ERROR_TAIL_BYTES;
    while !text.is_char_boundary(start) {
        start += 1;
    }
    format!("...{}", &text[start..])
}

/// Runs real child processes with the finalized environment applied.
#[derive(Debug, Clone)]
pub struct SystemRunner {
    env: Arc<FinalizedEnvironment>,
    timeout: Option<Duration>,
    output_limit_bytes: usize,
    echo: bool,
}

impl SystemRunner {
    pub fn new(
        env: Arc<FinalizedEnvironment>,
        timeout: Option<Duration>,
        output_limit_bytes: usize,
    ) -> Self {
        Self {
            env,
            timeout,
            output_limit_bytes,
            echo: true,
        }
    }

    /// Stop mirroring child output to this process's stdout/stderr.
    pub fn quiet(mut self) -> Self {
        self.echo = false;
        self
    }
}

impl ProcessRunner for SystemRunner {
    #[instrument(skip_all, fields(program = %spec.program))]
    fn run(&self, spec: &CommandSpec) -> Result<ProcessOutput> {
        info!(command = %spec, "running");
        let mut cmd = Command::new(&spec.program);
        cmd.args(&spec.args)
            .envs(self.env.vars())
            .envs(spec.envs.iter().map(|(k, v)| (k.as_str(), v.as_str())));
        if let Some(dir) = &spec.current_dir {
            cmd.current_dir(dir);
        }
        run_command(
            cmd,
            spec.stdin.as_ref().map(|p| p.0.as_slice()),
            self.timeout,
            self.output_limit_bytes,
            self.echo,
        )
        .with_context(|| format!("run `{spec}`"))
    }
}

/// Run a command, optionally bounded by `timeout`, capturing stdout/stderr
/// without risking pipe deadlocks.
///
/// Output is read concurrently while the child runs. `output_limit_bytes` bounds
/// how much of each stream is kept in memory; the rest is drained and dropped.
/// With `echo`, each chunk is also mirrored to this process's stdout/stderr.
fn run_command(
    mut cmd: Command,
    stdin: Option<&[u8]>,
    timeout: Option<Duration>,
    output_limit_bytes: usize,
    echo: bool,
) -> Result<ProcessOutput> {
    if stdin.is_some() {
        cmd.stdin(Stdio::piped());
    } else {
        cmd.stdin(Stdio::null());
    }
    cmd.stdout(Stdio::piped()).stderr(Stdio::piped());

    debug!("spawning child process");
    let mut child = match cmd.spawn() {
        Ok(c) => c,
        Err(e) => {
            error!(err = %e, "failed to spawn command");
            return Err(e).context("spawn command");
        }
    };

    if let Some(input) = stdin {
        let mut child_stdin = child
            .stdin
            .take()
            .ok_or_else(|| anyhow!("stdin was not piped"))?;
        child_stdin.write_all(input).context("write stdin")?;
    }

    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| anyhow!("stdout was not piped"))?;
    let stderr = child
        .stderr
        .take()
        .ok_or_else(|| anyhow!("stderr was not piped"))?;

    let stdout_handle = thread::spawn(move || {
        read_stream_limited(stdout, output_limit_bytes, echo.then(std::io::stdout))
    });
    let stderr_handle = thread::spawn(move || {
        read_stream_limited(stderr, output_limit_bytes, echo.then(std::io::stderr))
    });

    let mut timed_out = false;
    let status = match timeout {
        None => child.wait().context("wait for command")?,
        Some(limit) => match child.wait_timeout(limit).context("wait for command")? {
            Some(status) => status,
            None => {
                warn!(timeout_secs = limit.as_secs(), "command timed out, killing");
                timed_out = true;
                child.kill().context("kill command")?;
                child.wait().context("wait command after kill")?
            }
        },
    };

    let (stdout, stdout_truncated) = join_output(stdout_handle).context("join stdout")?;
    let (stderr, stderr_truncated) = join_output(stderr_handle).context("join stderr")?;

    if stdout_truncated > 0 || stderr_truncated > 0 {
        debug!(stdout_truncated, stderr_truncated, "captured output truncated");
    }

    debug!(exit_code = ?status.code(), timed_out, "command finished");
    Ok(ProcessOutput {
        code: status.code(),
        success: status.success() && !timed_out,
        stdout,
        stderr,
        timed_out,
    })
}

fn join_output(handle: thread::JoinHandle<Result<(Vec<u8>, usize)>>) -> Result<(Vec<u8>, usize)> {
    match handle.join() {
        Ok(result) => result,
        Err(_) => Err(anyhow!("output reader thread panicked")),
    }
}

fn read_stream_limited<R: Read, W: Write>(
    mut reader: R,
    limit: usize,
    mut echo: Option<W>,
) -> Result<(Vec<u8>, usize)> {
    let mut buf = Vec::new();
    let mut truncated = 0usize;
    let mut chunk = [0u8; 8192];

    loop {
        let n = reader.read(&mut chunk).context("read output")?;
        if n == 0 {
            break;
        }
        if let Some(out) = echo.as_mut()
            && let Err(e) = out.write_all(&chunk[..n]).and_then(|()| out.flush())
        {
            warn!(err = %e, "failed to mirror child output");
        }
        let remaining = limit.saturating_sub(buf.len());
        if remaining > 0 {
            let keep = n.min(remaining);
            buf.extend_from_slice(&chunk[..keep]);
            truncated += n.saturating_sub(keep);
        } else {
            truncated += n;
        }
    }

    Ok((buf, truncated))
}
