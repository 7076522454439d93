// src/exec/runner.rs

//! Child process runner with per-call timeouts.
//!
//! Every failure mode (spawn error, non-zero exit, timeout) comes back as a
//! [`CommandOutput`] value rather than an error, so callers can record it in
//! run history the same way they record a normal exit.

use std::collections::BTreeMap;
use std::future::Future;
use std::pin::Pin;
use std::process::Stdio;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::process::{Child, Command};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::borg::BorgCommand;

/// How long to wait for the output pipes to reach EOF once the child has
/// exited or been killed.
const PIPE_DRAIN_GRACE: Duration = Duration::from_secs(1);

/// Exit code reported when no real exit status exists (spawn failure,
/// timeout, killed by signal).
pub const SYNTHETIC_EXIT_CODE: i32 = -1;

/// A command to execute, with its environment overlay and time budget.
#[derive(Clone)]
pub struct CommandSpec {
    pub program: String,
    pub args: Vec<String>,
    /// Merged onto the inherited parent environment; entries here win.
    pub env: BTreeMap<String, String>,
    pub stdin: Option<String>,
    pub timeout: Duration,
}

impl std::fmt::Debug for CommandSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Values in `env` may be secrets.
        f.debug_struct("CommandSpec")
            .field("program", &self.program)
            .field("args", &self.args)
            .field("env_keys", &self.env.keys().collect::<Vec<_>>())
            .field("stdin", &self.stdin.as_ref().map(|s| s.len()))
            .field("timeout", &self.timeout)
            .finish()
    }
}

impl CommandSpec {
    pub fn new(program: impl Into<String>, timeout: Duration) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            env: BTreeMap::new(),
            stdin: None,
            timeout,
        }
    }

    /// Run `script` through the platform shell.
    pub fn shell(script: &str, timeout: Duration) -> Self {
        let (program, flag) = if cfg!(windows) { ("cmd", "/C") } else { ("sh", "-c") };
        let mut spec = Self::new(program, timeout);
        spec.args = vec![flag.to_string(), script.to_string()];
        spec
    }

    pub fn from_borg(cmd: BorgCommand, timeout: Duration) -> Self {
        Self {
            program: cmd.program,
            args: cmd.args,
            env: cmd.env,
            stdin: None,
            timeout,
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    pub fn stdin(mut self, input: impl Into<String>) -> Self {
        self.stdin = Some(input.into());
        self
    }
}

/// Captured result of a finished (or abandoned) child process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandOutput {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
    /// `true` iff the process exited with code zero.
    pub success: bool,
    pub timed_out: bool,
}

impl CommandOutput {
    pub fn from_exit(exit_code: i32, stdout: String, stderr: String) -> Self {
        Self {
            exit_code,
            stdout,
            stderr,
            success: exit_code == 0,
            timed_out: false,
        }
    }

    pub fn spawn_failure(program: &str, err: &std::io::Error) -> Self {
        Self {
            exit_code: SYNTHETIC_EXIT_CODE,
            stdout: String::new(),
            stderr: format!("failed to spawn '{program}': {err}"),
            success: false,
            timed_out: false,
        }
    }

    pub fn timeout(program: &str, timeout: Duration, stdout: String, stderr: String) -> Self {
        let mut stderr = stderr;
        if !stderr.is_empty() && !stderr.ends_with('\n') {
            stderr.push('\n');
        }
        stderr.push_str(&format!(
            "'{program}' timed out after {} and was killed",
            format_duration(timeout)
        ));
        Self {
            exit_code: SYNTHETIC_EXIT_CODE,
            stdout,
            stderr,
            success: false,
            timed_out: true,
        }
    }

    /// `stdout` followed by `stderr`, as stored in run logs.
    pub fn combined(&self) -> String {
        let mut out = self.stdout.clone();
        out.push_str(&self.stderr);
        out
    }
}

/// Render a duration the way config files spell it (`90s`, `5m`, `1h`).
pub fn format_duration(d: Duration) -> String {
    let secs = d.as_secs();
    if d.subsec_millis() != 0 || secs == 0 {
        format!("{}ms", d.as_millis())
    } else if secs % 3600 == 0 {
        format!("{}h", secs / 3600)
    } else if secs % 60 == 0 {
        format!("{}m", secs / 60)
    } else {
        format!("{secs}s")
    }
}

/// Abstraction over how commands are executed.
///
/// Production code uses [`TokioProcessRunner`]; tests can substitute a runner
/// that records invocations and returns canned output.
pub trait ProcessRunner: Send + Sync {
    fn run(&self, spec: CommandSpec) -> Pin<Box<dyn Future<Output = CommandOutput> + Send + '_>>;
}

/// Runs commands as real child processes via `tokio::process`.
#[derive(Debug, Clone, Default)]
pub struct TokioProcessRunner;

impl TokioProcessRunner {
    pub fn new() -> Self {
        Self
    }
}

impl ProcessRunner for TokioProcessRunner {
    fn run(&self, spec: CommandSpec) -> Pin<Box<dyn Future<Output = CommandOutput> + Send + '_>> {
        Box::pin(run_command(spec))
    }
}

/// Run a single command to completion or until its timeout elapses.
///
/// On unix the child leads its own process group, so a timeout kills
/// everything it started, not just the immediate child.
pub async fn run_command(spec: CommandSpec) -> CommandOutput {
    debug!(
        program = %spec.program,
        subcommand = spec.args.first().map(String::as_str).unwrap_or(""),
        timeout = %format_duration(spec.timeout),
        "starting child process"
    );

    let mut cmd = Command::new(&spec.program);
    cmd.args(&spec.args)
        .envs(&spec.env)
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .stdin(if spec.stdin.is_some() {
            Stdio::piped()
        } else {
            Stdio::null()
        })
        .kill_on_drop(true);
    #[cfg(unix)]
    cmd.process_group(0);

    let child = match cmd.spawn() {
        Ok(child) => child,
        Err(err) => {
            warn!(program = %spec.program, error = %err, "failed to spawn child process");
            return CommandOutput::spawn_failure(&spec.program, &err);
        }
    };

    match supervise(child, &spec).await {
        Ok(output) => output,
        Err(err) => {
            warn!(program = %spec.program, error = %err, "child process supervision failed");
            CommandOutput {
                exit_code: SYNTHETIC_EXIT_CODE,
                stdout: String::new(),
                stderr: format!("{err:#}"),
                success: false,
                timed_out: false,
            }
        }
    }
}

async fn supervise(mut child: Child, spec: &CommandSpec) -> Result<CommandOutput> {
    if let (Some(input), Some(mut stdin)) = (spec.stdin.clone(), child.stdin.take()) {
        tokio::spawn(async move {
            if let Err(e) = stdin.write_all(input.as_bytes()).await {
                debug!(error = %e, "writing child stdin failed");
            }
            // Dropping `stdin` closes the pipe so the child sees EOF.
        });
    }

    let stdout = PipeReader::spawn(child.stdout.take());
    let stderr = PipeReader::spawn(child.stderr.take());

    tokio::select! {
        status_res = child.wait() => {
            let status = status_res
                .with_context(|| format!("waiting for '{}'", spec.program))?;
            // A background process started by the child can inherit the
            // pipes and hold them open long after the child itself exited.
            let (stdout, stderr) = tokio::join!(
                PipeReader::finish(stdout, PIPE_DRAIN_GRACE, &spec.program),
                PipeReader::finish(stderr, PIPE_DRAIN_GRACE, &spec.program),
            );
            let code = status.code().unwrap_or(SYNTHETIC_EXIT_CODE);

            debug!(
                program = %spec.program,
                exit_code = code,
                success = status.success(),
                "child process exited"
            );

            Ok(CommandOutput::from_exit(code, stdout, stderr))
        }

        _ = tokio::time::sleep(spec.timeout) => {
            info!(
                program = %spec.program,
                timeout = %format_duration(spec.timeout),
                "child process exceeded its timeout; killing"
            );
            kill_process_group(&child, &spec.program);
            if let Err(e) = child.kill().await {
                warn!(program = %spec.program, error = %e, "failed to kill timed-out child process");
            }

            let (stdout, stderr) = tokio::join!(
                PipeReader::finish(stdout, PIPE_DRAIN_GRACE, &spec.program),
                PipeReader::finish(stderr, PIPE_DRAIN_GRACE, &spec.program),
            );
            Ok(CommandOutput::timeout(&spec.program, spec.timeout, stdout, stderr))
        }
    }
}

/// SIGKILL the child's process group. The child is the group leader, so this
/// reaches every descendant that did not move itself to another group.
#[cfg(unix)]
fn kill_process_group(child: &Child, program: &str) {
    use nix::sys::signal::{Signal, killpg};
    use nix::unistd::Pid;

    let Some(pid) = child.id() else {
        return;
    };
    match killpg(Pid::from_raw(pid as i32), Signal::SIGKILL) {
        Ok(()) => debug!(program, pgid = pid, "killed child process group"),
        Err(e) => debug!(program, pgid = pid, error = %e, "failed to kill child process group"),
    }
}

#[cfg(not(unix))]
fn kill_process_group(_child: &Child, _program: &str) {}

/// Reads one output pipe into a buffer that stays readable even if the
/// reader has to be abandoned before EOF.
struct PipeReader {
    captured: Arc<Mutex<Vec<u8>>>,
    task: JoinHandle<std::io::Result<()>>,
}

impl PipeReader {
    fn spawn<R>(pipe: Option<R>) -> Option<Self>
    where
        R: AsyncRead + Unpin + Send + 'static,
    {
        let mut pipe = pipe?;
        let captured = Arc::new(Mutex::new(Vec::new()));
        let sink = captured.clone();
        let task = tokio::spawn(async move {
            let mut chunk = [0u8; 8192];
            loop {
                let n = pipe.read(&mut chunk).await?;
                if n == 0 {
                    return Ok(());
                }
                sink.lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .extend_from_slice(&chunk[..n]);
            }
        });
        Some(Self { captured, task })
    }

    /// Wait up to `grace` for EOF, then return whatever was captured.
    async fn finish(reader: Option<Self>, grace: Duration, program: &str) -> String {
        let Some(mut reader) = reader else {
            return String::new();
        };
        match tokio::time::timeout(grace, &mut reader.task).await {
            Ok(Ok(Ok(()))) => {}
            Ok(Ok(Err(e))) => debug!(program, error = %e, "reading child output failed"),
            Ok(Err(e)) => warn!(program, error = %e, "output reader task failed"),
            Err(_) => {
                reader.task.abort();
                warn!(program, "output pipe still open after the child finished; a background process may hold it");
            }
        }
        let bytes = reader.captured.lock().unwrap_or_else(PoisonError::into_inner);
        String::from_utf8_lossy(&bytes).into_owned()
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::time::Instant;

    #[tokio::test]
    async fn captures_stdout_and_stderr() {
        let spec = CommandSpec::shell("echo out; echo err >&2", Duration::from_secs(5));
        let out = run_command(spec).await;
        assert!(out.success);
        assert_eq!(out.exit_code, 0);
        assert_eq!(out.stdout, "out\n");
        assert_eq!(out.stderr, "err\n");
    }

    #[tokio::test]
    async fn non_zero_exit_is_failure() {
        let out = run_command(CommandSpec::shell("echo boom >&2; exit 3", Duration::from_secs(5))).await;
        assert!(!out.success);
        assert!(!out.timed_out);
        assert_eq!(out.exit_code, 3);
        assert_eq!(out.stderr, "boom\n");
    }

    #[tokio::test]
    async fn env_overlay_wins_over_parent() {
        let spec = CommandSpec::shell("printf %s \"$PATH_MARKER-$HOME\"", Duration::from_secs(5))
            .env("PATH_MARKER", "overlay")
            .env("HOME", "/overlay-home");
        let out = run_command(spec).await;
        assert_eq!(out.stdout, "overlay-/overlay-home");
    }

    #[tokio::test]
    async fn stdin_is_forwarded() {
        let spec = CommandSpec::new("cat", Duration::from_secs(5)).stdin("hello");
        let out = run_command(spec).await;
        assert!(out.success);
        assert_eq!(out.stdout, "hello");
    }

    #[tokio::test]
    async fn spawn_failure_is_reported_as_data() {
        let spec = CommandSpec::new("/definitely/not/a/binary", Duration::from_secs(5));
        let out = run_command(spec).await;
        assert!(!out.success);
        assert_eq!(out.exit_code, SYNTHETIC_EXIT_CODE);
        assert!(out.stderr.contains("failed to spawn"));
    }

    #[tokio::test]
    async fn timeout_kills_child() {
        let started = Instant::now();
        let spec = CommandSpec::new("sleep", Duration::from_millis(200)).arg("10");
        let out = run_command(spec).await;

        assert!(out.timed_out);
        assert!(!out.success);
        assert!(out.stderr.contains("timed out after 200ms"));
        assert!(started.elapsed() < Duration::from_secs(3));
    }

    #[tokio::test]
    async fn background_process_holding_stdout_does_not_block() {
        let started = Instant::now();
        let spec = CommandSpec::shell("sleep 20 & echo started", Duration::from_secs(10));
        let out = run_command(spec).await;

        assert!(started.elapsed() < Duration::from_secs(5), "took {:?}", started.elapsed());
        assert!(out.success);
        assert!(!out.timed_out);
        assert_eq!(out.stdout, "started\n");
    }

    /// Whether `pid` is a live (non-zombie) process.
    #[cfg(target_os = "linux")]
    fn is_alive(pid: &str) -> bool {
        match std::fs::read_to_string(format!("/proc/{pid}/stat")) {
            // state is the first field after the parenthesised command name
            Ok(stat) => stat
                .rsplit_once(')')
                .and_then(|(_, rest)| rest.split_whitespace().next())
                .is_some_and(|state| state != "Z" && state != "X"),
            Err(_) => false,
        }
    }

    #[cfg(target_os = "linux")]
    #[tokio::test]
    async fn timeout_kills_every_process_the_child_started() {
        let spec = CommandSpec::shell("sleep 37 & echo $!; wait", Duration::from_millis(500));
        let out = run_command(spec).await;

        assert!(out.timed_out);
        let grandchild = out.stdout.trim().to_string();
        assert!(!grandchild.is_empty(), "no pid printed: {out:?}");

        let deadline = Instant::now() + Duration::from_secs(2);
        while is_alive(&grandchild) && Instant::now() < deadline {
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert!(!is_alive(&grandchild), "sleep {grandchild} survived the timeout");
    }

    #[test]
    fn durations_render_in_config_units() {
        assert_eq!(format_duration(Duration::from_secs(3600)), "1h");
        assert_eq!(format_duration(Duration::from_secs(600)), "10m");
        assert_eq!(format_duration(Duration::from_secs(90)), "90s");
        assert_eq!(format_duration(Duration::from_millis(1500)), "1500ms");
    }
}
