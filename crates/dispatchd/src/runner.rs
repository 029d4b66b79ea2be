//! Process runner for worker invocations.
//!
//! The controller only sees the `ProcessRunner` trait: start a command with an
//! environment overlay, wait at most `timeout`, and hand back exit code,
//! stdout and stderr. `ShellRunner` is the production implementation and runs
//! the command line through `sh -c`.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tokio::io::AsyncReadExt;
use tokio::process::Command;
use tokio::task::JoinHandle;
use tokio::time::{timeout, Instant};
use tracing::{debug, info, warn};

/// Interval between heartbeat log messages while a worker is running.
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);

/// Timeout for capturing stdout/stderr after the process exits or is killed.
///
/// Normally I/O completes immediately after process death. This bounds the
/// wait when a process outside the worker's group still holds a pipe.
const IO_CAPTURE_TIMEOUT: Duration = Duration::from_secs(5);

/// Maximum bytes to capture from each of stdout and stderr.
const MAX_OUTPUT_BYTES: usize = 50 * 1024 * 1024;

#[derive(Debug, Error)]
pub enum RunnerError {
    #[error("failed to start process: {0}")]
    Spawn(std::io::Error),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, RunnerError>;

/// A single command invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    /// Full shell command line.
    pub command: String,
    /// Variables layered over the inherited environment.
    pub env: BTreeMap<String, String>,
    /// Hard deadline; the process is killed when it expires.
    pub timeout: Duration,
}

/// What a finished (or killed) process left behind.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProcessOutput {
    /// `None` when the process was killed or ended by a signal.
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
    pub timed_out: bool,
}

/// Collaborator that executes worker command lines.
#[async_trait]
pub trait ProcessRunner: Send + Sync {
    async fn run(&self, spec: &CommandSpec) -> Result<ProcessOutput>;
}

/// How the process wait loop terminated.
enum ProcessOutcome {
    Completed(std::process::ExitStatus),
    TimedOut,
}

/// Bytes captured so far from one output stream.
type SharedBuf = Arc<Mutex<Vec<u8>>>;

/// A running reader task and the buffer it fills.
struct Capture {
    task: JoinHandle<std::io::Result<()>>,
    buf: SharedBuf,
}

impl Capture {
    fn spawn<R>(reader: R) -> Self
    where
        R: tokio::io::AsyncRead + Unpin + Send + 'static,
    {
        let buf = SharedBuf::default();
        let task = tokio::spawn(read_bounded(reader, MAX_OUTPUT_BYTES, Arc::clone(&buf)));
        Self { task, buf }
    }
}

fn lock(buf: &SharedBuf) -> MutexGuard<'_, Vec<u8>> {
    buf.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Read from an async reader into `buf`, keeping at most `max_bytes`.
///
/// Bytes land in `buf` as they arrive so a reader that never sees EOF still
/// leaves its partial output behind. Anything past the limit is drained so
/// the child never blocks on a full pipe.
async fn read_bounded<R: tokio::io::AsyncRead + Unpin>(
    mut reader: R,
    max_bytes: usize,
    buf: SharedBuf,
) -> std::io::Result<()> {
    let mut chunk = [0u8; 8192];

    loop {
        let n = reader.read(&mut chunk).await?;
        if n == 0 {
            break;
        }

        let full = {
            let mut out = lock(&buf);
            let remaining = max_bytes.saturating_sub(out.len());
            out.extend_from_slice(&chunk[..n.min(remaining)]);
            remaining == 0
        };
        if full {
            warn!(max_bytes, "output exceeded limit, truncating");
            while reader.read(&mut chunk).await? > 0 {}
            break;
        }
    }

    Ok(())
}

/// Wait for a capture task and return what it read, logging (not failing)
/// when it breaks or outlives `IO_CAPTURE_TIMEOUT`.
async fn collect(capture: Option<Capture>, stream: &'static str) -> Vec<u8> {
    let Some(Capture { mut task, buf }) = capture else {
        return Vec::new();
    };
    match timeout(IO_CAPTURE_TIMEOUT, &mut task).await {
        Ok(Ok(Ok(()))) => {}
        Ok(Ok(Err(err))) => warn!(stream, error = %err, "output capture failed"),
        Ok(Err(err)) => warn!(stream, error = %err, "output capture task panicked"),
        Err(_) => {
            warn!(stream, "output capture timed out; keeping partial output");
            task.abort();
        }
    }
    let out = std::mem::take(&mut *lock(&buf));
    out
}

/// SIGKILL the worker's process group. The worker is spawned as a group
/// leader, so this also takes down grandchildren still holding its pipes.
#[cfg(unix)]
fn kill_process_group(pid: Option<u32>) {
    use nix::errno::Errno;
    use nix::sys::signal::{killpg, Signal};
    use nix::unistd::Pid;

    let Some(pid) = pid.and_then(|p| i32::try_from(p).ok()) else {
        return;
    };
    match killpg(Pid::from_raw(pid), Signal::SIGKILL) {
        Ok(()) | Err(Errno::ESRCH) => {}
        Err(err) => warn!(pid, error = %err, "failed to kill worker process group"),
    }
}

#[cfg(not(unix))]
fn kill_process_group(_pid: Option<u32>) {}

/// Runs command lines with `sh -c`.
#[derive(Debug, Clone)]
pub struct ShellRunner {
    shell: PathBuf,
    working_dir: Option<PathBuf>,
    heartbeat: Duration,
}

impl Default for ShellRunner {
    fn default() -> Self {
        Self {
            shell: PathBuf::from("sh"),
            working_dir: None,
            heartbeat: HEARTBEAT_INTERVAL,
        }
    }
}

impl ShellRunner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run commands from `dir` instead of the current directory.
    pub fn with_working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    pub fn with_heartbeat(mut self, interval: Duration) -> Self {
        self.heartbeat = interval;
        self
    }
}

#[async_trait]
impl ProcessRunner for ShellRunner {
    async fn run(&self, spec: &CommandSpec) -> Result<ProcessOutput> {
        let mut cmd = Command::new(&self.shell);
        cmd.arg("-c")
            .arg(&spec.command)
            .envs(&spec.env)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = &self.working_dir {
            cmd.current_dir(dir);
        }
        #[cfg(unix)]
        cmd.process_group(0);

        debug!(
            timeout_ms = spec.timeout.as_millis() as u64,
            env_vars = spec.env.len(),
            "spawning worker process"
        );

        let mut child = cmd.spawn().map_err(RunnerError::Spawn)?;
        let pid = child.id();

        let stdout_capture = child.stdout.take().map(Capture::spawn);
        let stderr_capture = child.stderr.take().map(Capture::spawn);

        let started = Instant::now();

        let outcome = loop {
            let elapsed = started.elapsed();

            if elapsed >= spec.timeout {
                warn!(
                    timeout_ms = spec.timeout.as_millis() as u64,
                    "worker timed out; killing"
                );
                kill_process_group(pid);
                if let Err(err) = child.kill().await {
                    warn!(error = %err, "failed to kill timed-out worker");
                }
                let _ = child.wait().await;
                break ProcessOutcome::TimedOut;
            }

            let sleep_duration = self.heartbeat.min(spec.timeout.saturating_sub(elapsed));

            tokio::select! {
                result = child.wait() => {
                    break ProcessOutcome::Completed(result?);
                }
                () = tokio::time::sleep(sleep_duration) => {
                    if started.elapsed() < spec.timeout {
                        info!(
                            elapsed_sec = started.elapsed().as_secs(),
                            timeout_sec = spec.timeout.as_secs(),
                            "worker still running"
                        );
                    }
                }
            }
        };

        // Reap anything the worker left running in its group; the pipes then
        // close and both captures finish promptly.
        kill_process_group(pid);
        let (stdout, stderr) = tokio::join!(
            collect(stdout_capture, "stdout"),
            collect(stderr_capture, "stderr")
        );

        let (exit_code, timed_out) = match outcome {
            ProcessOutcome::Completed(status) => (status.code(), false),
            ProcessOutcome::TimedOut => (None, true),
        };

        Ok(ProcessOutput {
            exit_code,
            stdout: String::from_utf8_lossy(&stdout).into_owned(),
            stderr: String::from_utf8_lossy(&stderr).into_owned(),
            timed_out,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec(command: &str, timeout: Duration) -> CommandSpec {
        CommandSpec {
            command: command.to_string(),
            env: BTreeMap::new(),
            timeout,
        }
    }

    #[tokio::test]
    async fn captures_stdout_and_exit_code() {
        let runner = ShellRunner::new();
        let output = runner
            .run(&spec("echo hello", Duration::from_secs(5)))
            .await
            .unwrap();
        assert_eq!(output.exit_code, Some(0));
        assert_eq!(output.stdout, "hello\n");
        assert!(output.stderr.is_empty());
        assert!(!output.timed_out);
    }

    #[tokio::test]
    async fn captures_stderr_and_non_zero_exit() {
        let runner = ShellRunner::new();
        let output = runner
            .run(&spec("echo oops >&2; exit 3", Duration::from_secs(5)))
            .await
            .unwrap();
        assert_eq!(output.exit_code, Some(3));
        assert_eq!(output.stderr, "oops\n");
    }

    #[tokio::test]
    async fn applies_environment_overlay() {
        let runner = ShellRunner::new();
        let mut spec = spec("printf '%s' \"$DISPATCH_TEST_VAR\"", Duration::from_secs(5));
        spec.env
            .insert("DISPATCH_TEST_VAR".to_string(), "from-overlay".to_string());
        let output = runner.run(&spec).await.unwrap();
        assert_eq!(output.stdout, "from-overlay");
    }

    #[tokio::test]
    async fn kills_process_after_timeout() {
        let runner = ShellRunner::new();
        let started = std::time::Instant::now();
        let output = runner
            .run(&spec("echo partial; exec sleep 10", Duration::from_millis(200)))
            .await
            .unwrap();
        assert!(output.timed_out);
        assert_eq!(output.exit_code, None);
        assert!(started.elapsed() < Duration::from_secs(5));
        assert_eq!(output.stdout, "partial\n");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn timeout_kills_background_children_and_keeps_partial_output() {
        let dir = tempfile::TempDir::new().unwrap();
        let runner = ShellRunner::new().with_working_dir(dir.path());
        let started = std::time::Instant::now();
        let output = runner
            .run(&spec(
                "(sleep 1; echo late > late.txt) & echo partial; sleep 30; echo after",
                Duration::from_millis(200),
            ))
            .await
            .unwrap();

        assert!(output.timed_out);
        assert_eq!(output.exit_code, None);
        assert_eq!(output.stdout, "partial\n");
        assert!(started.elapsed() < Duration::from_secs(3));

        tokio::time::sleep(Duration::from_millis(1500)).await;
        assert!(!dir.path().join("late.txt").exists());
    }

    #[tokio::test]
    async fn collect_keeps_bytes_read_before_timeout() {
        let buf = SharedBuf::default();
        lock(&buf).extend_from_slice(b"partial");
        let task = tokio::spawn(std::future::pending::<std::io::Result<()>>());
        let capture = Capture {
            task,
            buf: Arc::clone(&buf),
        };

        tokio::time::pause();
        let bytes = collect(Some(capture), "stdout").await;
        assert_eq!(bytes, b"partial");
    }

    #[tokio::test]
    async fn heartbeat_shorter_than_timeout_still_completes() {
        let runner = ShellRunner::new().with_heartbeat(Duration::from_millis(20));
        let output = runner
            .run(&spec("sleep 0.1; echo done", Duration::from_secs(5)))
            .await
            .unwrap();
        assert_eq!(output.exit_code, Some(0));
        assert_eq!(output.stdout, "done\n");
    }

    #[tokio::test]
    async fn missing_shell_is_spawn_error() {
        let runner = ShellRunner {
            shell: PathBuf::from("/nonexistent/shell"),
            ..ShellRunner::default()
        };
        let err = runner
            .run(&spec("true", Duration::from_secs(1)))
            .await
            .unwrap_err();
        assert!(matches!(err, RunnerError::Spawn(_)));
    }

    #[tokio::test]
    async fn runs_in_working_dir() {
        let dir = tempfile::TempDir::new().unwrap();
        std::fs::write(dir.path().join("marker.txt"), "here").unwrap();
        let runner = ShellRunner::new().with_working_dir(dir.path());
        let output = runner
            .run(&spec("cat marker.txt", Duration::from_secs(5)))
            .await
            .unwrap();
        assert_eq!(output.stdout, "here");
    }

    #[tokio::test]
    async fn read_bounded_truncates_at_limit() {
        let data = b"abcdefghij".to_vec();
        let buf = SharedBuf::default();
        read_bounded(&data[..], 4, Arc::clone(&buf)).await.unwrap();
        assert_eq!(*lock(&buf), b"abcd");
    }
}
