//! Encoder process runner.
//!
//! A process is always started against a [`LockContext`]: the context's token
//! kills the process, and the context learns when the process has been
//! reaped. stdout is handed to the caller as the stream source while stderr
//! is drained on its own task from the moment the process starts, so a chatty
//! encoder can never block on a full error pipe.

use std::fmt;
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::time::Duration;

use thiserror::Error;
use tokio::io::AsyncReadExt;
use tokio::process::{Child, ChildStderr, ChildStdout, Command};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::args::Args;
use crate::locking::{AttachedProcess, LockContext, LockError};

/// Bytes of stderr kept for the failure report. Output past this is still
/// read, then discarded.
pub const STDERR_CAPTURE_LIMIT: usize = 64 * 1024;

/// How long to wait for stderr to close once the process has exited.
const STDERR_GRACE: Duration = Duration::from_secs(2);

/// Errors raised while starting an encoder process.
#[derive(Debug, Error)]
pub enum ProcessError {
    /// The encoder binary could not be spawned.
    #[error("failed to start {program}: {source}")]
    Spawn {
        /// Program that was executed
        program: String,
        /// Underlying I/O error
        #[source]
        source: std::io::Error,
    },

    /// A standard stream of the child was not piped.
    #[error("{stream} of {program} is not available")]
    PipeUnavailable {
        /// Program that was executed
        program: String,
        /// `stdout` or `stderr`
        stream: &'static str,
    },

    /// The lock context refused the process.
    #[error("cannot attach process: {0}")]
    AttachRefused(#[from] LockError),

    /// A short-lived run did not finish in time.
    #[error("{program} did not finish within {limit:?}")]
    TimedOut {
        /// Program that was executed
        program: String,
        /// Time allowed
        limit: Duration,
    },
}

/// Failure of a process that started successfully.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailureReport {
    /// Full command line that was run
    pub command: String,
    /// Exit code, `None` when terminated by a signal
    pub exit_code: Option<i32>,
    /// Captured stderr, trimmed
    pub stderr: String,
}

impl fmt::Display for FailureReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.exit_code {
            Some(code) => write!(f, "exit code {code}")?,
            None => f.write_str("killed by signal")?,
        }
        write!(f, " running `{}`: {}", self.command, self.stderr)
    }
}

/// How a started process ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcessOutcome {
    /// Exited successfully
    Completed,
    /// Killed deliberately, or exited non-zero without saying why
    Terminated,
    /// Exited non-zero with an error message
    Failed(FailureReport),
}

impl ProcessOutcome {
    /// Returns true for the runtime failure case.
    pub fn is_failure(&self) -> bool {
        matches!(self, ProcessOutcome::Failed(_))
    }
}

/// Encoder executable plus an optional wrapper command.
///
/// With a wrapper such as `nice -n 10`, the process run is
/// `nice -n 10 <program> <args...>`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Encoder {
    program: PathBuf,
    wrapper: Vec<String>,
}

impl Encoder {
    /// Creates an encoder that runs `program` directly.
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            wrapper: Vec::new(),
        }
    }

    /// Runs the encoder through `wrapper`; the first element is the program
    /// actually executed.
    pub fn with_wrapper<I, S>(mut self, wrapper: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.wrapper = wrapper.into_iter().map(Into::into).collect();
        self
    }

    /// Returns the encoder program.
    pub fn program(&self) -> &Path {
        &self.program
    }

    /// Returns the full command line for `args`, for logs and reports.
    pub fn command_line(&self, args: &Args) -> String {
        let mut parts: Vec<String> = self.wrapper.clone();
        parts.push(self.program.to_string_lossy().into_owned());
        parts.extend(args.as_slice().iter().cloned());
        parts.join(" ")
    }

    fn command(&self, args: &Args) -> Command {
        let mut command = match self.wrapper.split_first() {
            Some((wrapper, rest)) => {
                let mut command = Command::new(wrapper);
                command.args(rest).arg(&self.program);
                command
            }
            None => Command::new(&self.program),
        };
        command
            .args(args.as_slice())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        command
    }

    fn executable(&self) -> String {
        self.wrapper
            .first()
            .cloned()
            .unwrap_or_else(|| self.program.to_string_lossy().into_owned())
    }

    /// Starts a long-running encoder bound to `context`.
    ///
    /// Spawning, pipe setup and attachment are the start step: any failure
    /// there is returned as an error and nothing keeps running. After that the
    /// process is supervised in the background until it exits or the
    /// context's token is cancelled, whichever comes first.
    ///
    /// # Errors
    ///
    /// - `ProcessError::Spawn` - the binary could not be executed
    /// - `ProcessError::PipeUnavailable` - stdout or stderr was not piped
    /// - `ProcessError::AttachRefused` - the context was already released or
    ///   already owns a process
    pub fn start(&self, context: &LockContext, args: &Args) -> Result<RunningProcess, ProcessError> {
        let command_line = self.command_line(args);
        debug!("Starting encoder: {}", command_line);

        let mut child = self.command(args).spawn().map_err(|source| ProcessError::Spawn {
            program: self.executable(),
            source,
        })?;

        let stdout = child.stdout.take().ok_or_else(|| ProcessError::PipeUnavailable {
            program: self.executable(),
            stream: "stdout",
        })?;
        let stderr = child.stderr.take().ok_or_else(|| ProcessError::PipeUnavailable {
            program: self.executable(),
            stream: "stderr",
        })?;
        let stderr_task = tokio::spawn(drain_stderr(stderr));

        let pid = child.id();
        let (exited_tx, exited_rx) = watch::channel(false);
        let (outcome_tx, outcome_rx) = watch::channel(None);

        // On refusal `child` is dropped here and killed.
        context.attach_process(AttachedProcess::new(pid, exited_rx))?;

        tokio::spawn(supervise(
            child,
            stderr_task,
            context.token().clone(),
            command_line,
            exited_tx,
            outcome_tx,
        ));

        Ok(RunningProcess {
            stdout: Some(stdout),
            pid,
            token: context.token().clone(),
            outcome: outcome_rx,
        })
    }

    /// Runs the encoder to completion and reports whether it succeeded.
    ///
    /// Used for short capability checks. Output is discarded.
    ///
    /// # Errors
    ///
    /// - `ProcessError::Spawn` - the binary could not be executed
    /// - `ProcessError::TimedOut` - the run exceeded `limit`; the process is killed
    pub async fn run_check(&self, args: &Args, limit: Duration) -> Result<bool, ProcessError> {
        let mut command = self.command(args);
        command.stdout(Stdio::null()).stderr(Stdio::null());

        let mut child = command.spawn().map_err(|source| ProcessError::Spawn {
            program: self.executable(),
            source,
        })?;

        match tokio::time::timeout(limit, child.wait()).await {
            Ok(Ok(status)) => Ok(status.success()),
            Ok(Err(source)) => Err(ProcessError::Spawn {
                program: self.executable(),
                source,
            }),
            Err(_) => Err(ProcessError::TimedOut {
                program: self.executable(),
                limit,
            }),
        }
    }
}

/// A started encoder process.
///
/// Owns the stdout pipe until [`take_stdout`](Self::take_stdout) hands it to
/// the stream. The process itself lives on its supervisor task.
pub struct RunningProcess {
    stdout: Option<ChildStdout>,
    pid: Option<u32>,
    token: CancellationToken,
    outcome: watch::Receiver<Option<ProcessOutcome>>,
}

impl RunningProcess {
    /// Returns the OS process id.
    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    /// Takes the stdout pipe. Returns `None` on the second call.
    pub fn take_stdout(&mut self) -> Option<ChildStdout> {
        self.stdout.take()
    }

    /// Kills the process by cancelling its lock context.
    pub fn terminate(&self) {
        self.token.cancel();
    }

    /// Returns the outcome if the process has already exited.
    pub fn outcome(&self) -> Option<ProcessOutcome> {
        self.outcome.borrow().clone()
    }

    /// Returns a handle that resolves to the outcome.
    pub fn outcome_handle(&self) -> OutcomeHandle {
        OutcomeHandle {
            outcome: self.outcome.clone(),
        }
    }

    /// Waits for the process to exit.
    pub async fn wait(&self) -> ProcessOutcome {
        self.outcome_handle().wait().await
    }
}

impl fmt::Debug for RunningProcess {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RunningProcess")
            .field("pid", &self.pid)
            .field("outcome", &*self.outcome.borrow())
            .finish()
    }
}

/// Detached view of a process outcome.
#[derive(Debug, Clone)]
pub struct OutcomeHandle {
    outcome: watch::Receiver<Option<ProcessOutcome>>,
}

impl OutcomeHandle {
    /// Waits for the process to exit.
    ///
    /// A supervisor that vanished without reporting reads as terminated.
    pub async fn wait(&self) -> ProcessOutcome {
        let mut outcome = self.outcome.clone();
        match outcome.wait_for(Option::is_some).await {
            Ok(outcome) => outcome.clone().unwrap_or(ProcessOutcome::Terminated),
            Err(_) => ProcessOutcome::Terminated,
        }
    }
}

async fn supervise(
    mut child: Child,
    mut stderr_task: JoinHandle<String>,
    token: CancellationToken,
    command_line: String,
    exited: watch::Sender<bool>,
    outcome_tx: watch::Sender<Option<ProcessOutcome>>,
) {
    let (status, killed) = tokio::select! {
        biased;
        status = child.wait() => (status, false),
        _ = token.cancelled() => {
            if let Err(e) = child.start_kill() {
                debug!("Encoder already gone when killing: {}", e);
            }
            let status = child.wait().await;
            let killed = ended_by_kill(&status);
            (status, killed)
        }
    };

    let stderr = match tokio::time::timeout(STDERR_GRACE, &mut stderr_task).await {
        Ok(Ok(stderr)) => stderr,
        Ok(Err(e)) => {
            warn!("stderr reader task failed: {}", e);
            String::new()
        }
        Err(_) => {
            stderr_task.abort();
            String::new()
        }
    };

    let outcome = match status {
        Ok(status) => classify(status, killed, stderr, command_line),
        Err(e) => {
            error!("Failed to wait for encoder `{}`: {}", command_line, e);
            ProcessOutcome::Failed(FailureReport {
                command: command_line,
                exit_code: None,
                stderr: e.to_string(),
            })
        }
    };

    match &outcome {
        ProcessOutcome::Completed => info!("Encoder finished"),
        ProcessOutcome::Terminated => debug!("Encoder terminated"),
        ProcessOutcome::Failed(report) => error!("Encoder failed with {}", report),
    }

    outcome_tx.send_replace(Some(outcome));
    exited.send_replace(true);
}

/// Whether a process we just signalled actually died from the signal.
///
/// The process may have exited on its own between closing its pipes and the
/// kill, in which case its exit code still counts.
#[cfg(unix)]
fn ended_by_kill(status: &std::io::Result<ExitStatus>) -> bool {
    use std::os::unix::process::ExitStatusExt;

    status.as_ref().map_or(true, |status| status.signal().is_some())
}

#[cfg(not(unix))]
fn ended_by_kill(_status: &std::io::Result<ExitStatus>) -> bool {
    true
}

/// Sorts an exit into completion, expected termination or failure.
///
/// `killed` is set only when the supervisor itself killed the process; a
/// token cancelled after the process had already exited does not count. A
/// non-zero exit with nothing on stderr is treated as a termination too.
fn classify(
    status: ExitStatus,
    killed: bool,
    stderr: String,
    command_line: String,
) -> ProcessOutcome {
    if status.success() {
        if !stderr.is_empty() {
            warn!("Encoder reported while succeeding: {}", stderr);
        }
        return ProcessOutcome::Completed;
    }
    if killed || stderr.is_empty() {
        return ProcessOutcome::Terminated;
    }
    ProcessOutcome::Failed(FailureReport {
        command: command_line,
        exit_code: status.code(),
        stderr,
    })
}

async fn drain_stderr(mut stderr: ChildStderr) -> String {
    let mut captured = Vec::new();
    let mut buffer = [0u8; 4096];

    loop {
        match stderr.read(&mut buffer).await {
            Ok(0) => break,
            Ok(n) => {
                let room = STDERR_CAPTURE_LIMIT.saturating_sub(captured.len());
                captured.extend_from_slice(&buffer[..n.min(room)]);
            }
            Err(e) => {
                debug!("Stopped reading encoder stderr: {}", e);
                break;
            }
        }
    }

    String::from_utf8_lossy(&captured).trim().to_string()
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tokio::io::AsyncReadExt;

    use super::*;
    use crate::locking::LockManager;

    fn script(body: &str) -> Encoder {
        Encoder::new("encoder").with_wrapper(["sh", "-c", body])
    }

    async fn context(manager: &LockManager) -> LockContext {
        manager
            .acquire_read(&CancellationToken::new(), "/media/test.mkv")
            .await
            .unwrap()
    }

    #[test]
    fn test_command_line_includes_wrapper() {
        let encoder = Encoder::new("ffmpeg").with_wrapper(["nice", "-n", "10"]);
        let args = Args::new().hide_banner().output("pipe:");
        assert_eq!(
            encoder.command_line(&args),
            "nice -n 10 ffmpeg -hide_banner pipe:"
        );
    }

    #[test]
    fn test_classify_outcomes() {
        use std::os::unix::process::ExitStatusExt;

        let ok = ExitStatus::from_raw(0);
        let failed = ExitStatus::from_raw(1 << 8);

        assert_eq!(
            classify(ok, false, String::new(), "x".into()),
            ProcessOutcome::Completed
        );
        assert_eq!(
            classify(failed, true, "boom".into(), "x".into()),
            ProcessOutcome::Terminated
        );
        assert_eq!(
            classify(failed, false, String::new(), "x".into()),
            ProcessOutcome::Terminated
        );
        let outcome = classify(failed, false, "boom".into(), "x".into());
        assert_eq!(
            outcome,
            ProcessOutcome::Failed(FailureReport {
                command: "x".into(),
                exit_code: Some(1),
                stderr: "boom".into(),
            })
        );
    }

    #[tokio::test]
    async fn test_stdout_is_streamed() {
        let manager = LockManager::new();
        let context = context(&manager).await;
        let mut process = script("printf 'hello'")
            .start(&context, &Args::new())
            .unwrap();

        let mut output = String::new();
        process
            .take_stdout()
            .unwrap()
            .read_to_string(&mut output)
            .await
            .unwrap();
        assert_eq!(output, "hello");
        assert_eq!(process.wait().await, ProcessOutcome::Completed);
    }

    #[tokio::test]
    async fn test_stderr_failure_is_reported() {
        let manager = LockManager::new();
        let context = context(&manager).await;
        let process = script("echo 'Invalid data found' >&2; exit 3")
            .start(&context, &Args::new())
            .unwrap();

        match process.wait().await {
            ProcessOutcome::Failed(report) => {
                assert_eq!(report.exit_code, Some(3));
                assert_eq!(report.stderr, "Invalid data found");
            }
            other => panic!("expected failure, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_failure_kept_when_cancelled_after_exit() {
        let manager = LockManager::new();
        let context = context(&manager).await;
        let mut process = script("printf partial; echo 'Invalid data found' >&2; exit 1")
            .start(&context, &Args::new())
            .unwrap();

        let mut output = String::new();
        process
            .take_stdout()
            .unwrap()
            .read_to_string(&mut output)
            .await
            .unwrap();
        assert_eq!(output, "partial");

        // The reader goes away as soon as it sees EOF.
        context.cancel();
        match process.wait().await {
            ProcessOutcome::Failed(report) => {
                assert_eq!(report.exit_code, Some(1));
                assert_eq!(report.stderr, "Invalid data found");
            }
            other => panic!("expected failure, got {other:?}"),
        }
    }

    #[test]
    fn test_ended_by_kill() {
        use std::os::unix::process::ExitStatusExt;

        assert!(ended_by_kill(&Ok(ExitStatus::from_raw(9))));
        assert!(!ended_by_kill(&Ok(ExitStatus::from_raw(1 << 8))));
        assert!(ended_by_kill(&Err(std::io::Error::other("wait failed"))));
    }

    #[tokio::test]
    async fn test_large_stderr_does_not_block() {
        let manager = LockManager::new();
        let context = context(&manager).await;
        // Well past the pipe buffer and the capture limit.
        let process = script("head -c 300000 /dev/zero | tr '\\0' 'e' >&2; printf done")
            .start(&context, &Args::new())
            .unwrap();

        let outcome = tokio::time::timeout(Duration::from_secs(10), process.wait())
            .await
            .unwrap();
        assert_eq!(outcome, ProcessOutcome::Completed);
    }

    #[tokio::test]
    async fn test_cancellation_kills_and_suppresses() {
        let manager = LockManager::new();
        let context = context(&manager).await;
        let process = script("echo starting >&2; exec sleep 30")
            .start(&context, &Args::new())
            .unwrap();

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(context.cancel_and_wait().await);
        assert_eq!(process.outcome(), Some(ProcessOutcome::Terminated));
    }

    #[tokio::test]
    async fn test_spawn_failure_is_start_error() {
        let manager = LockManager::new();
        let context = context(&manager).await;
        let result = Encoder::new("/nonexistent/kino-encoder").start(&context, &Args::new());
        assert!(matches!(result, Err(ProcessError::Spawn { .. })));
        assert!(context.process().is_none());
    }

    #[tokio::test]
    async fn test_second_process_is_refused() {
        let manager = LockManager::new();
        let context = context(&manager).await;
        let encoder = script("exec sleep 30");
        let _first = encoder.start(&context, &Args::new()).unwrap();

        let second = encoder.start(&context, &Args::new());
        assert!(matches!(
            second,
            Err(ProcessError::AttachRefused(LockError::ProcessAlreadyAttached { .. }))
        ));
        context.cancel_and_wait().await;
    }

    #[tokio::test]
    async fn test_run_check() {
        assert!(script("exit 0").run_check(&Args::new(), Duration::from_secs(5)).await.unwrap());
        assert!(!script("exit 1").run_check(&Args::new(), Duration::from_secs(5)).await.unwrap());
        assert!(matches!(
            script("exec sleep 30")
                .run_check(&Args::new(), Duration::from_millis(50))
                .await,
            Err(ProcessError::TimedOut { .. })
        ));
    }
}
