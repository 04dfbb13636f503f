//! Process runner for wrapped recon tools.
//!
//! Runs a [`CommandLine`] via `tokio::process::Command` (never a shell) under a
//! hard wall-clock deadline. stdout and stderr are drained concurrently into
//! shared buffers so output captured before a timeout is preserved. On unix the
//! child leads its own process group; timeout and cancellation signal the whole
//! group (SIGTERM, then SIGKILL after the grace window) so no descendant
//! outlives the request.

use std::collections::HashMap;
use std::process::{ExitStatus, Stdio};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::{Child, Command};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::cli::command::CommandLine;
use crate::error::{RC_LAUNCH, RC_TIMEOUT, RC_TOOL_MISSING};

/// Return code for a run aborted because the gateway is shutting down.
pub const RC_CANCELLED: i32 = 130;

const READ_CHUNK: usize = 8192;

/// How a run ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// Process exited on its own with this code.
    Exited(i32),
    /// Process was killed by a signal we did not send.
    Signaled(i32),
    /// Deadline reached; the process group was terminated.
    TimedOut(Duration),
    /// Shutdown requested while the process was running.
    Cancelled,
    /// Executable could not be resolved.
    NotFound,
    /// Spawn or wait failed for another reason.
    LaunchFailed(String),
}

/// Captured result of one child-process run.
#[derive(Debug, Clone)]
pub struct Execution {
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub stdout: String,
    pub stderr: String,
    /// Set when either stream hit the capture cap.
    pub truncated: bool,
    pub outcome: Outcome,
}

impl Execution {
    /// Return code reported in the envelope.
    pub fn return_code(&self) -> i32 {
        match &self.outcome {
            Outcome::Exited(code) => *code,
            Outcome::Signaled(signal) => 128 + signal,
            Outcome::TimedOut(_) => RC_TIMEOUT,
            Outcome::Cancelled => RC_CANCELLED,
            Outcome::NotFound => RC_TOOL_MISSING,
            Outcome::LaunchFailed(_) => RC_LAUNCH,
        }
    }

    /// Whether the child actually ran, so its output is worth parsing.
    pub fn produced_output(&self) -> bool {
        matches!(
            self.outcome,
            Outcome::Exited(_) | Outcome::Signaled(_) | Outcome::TimedOut(_) | Outcome::Cancelled
        )
    }
}

/// Executes built command lines with deadline, grace window and capture cap.
#[derive(Debug, Clone)]
pub struct ProcessRunner {
    kill_grace: Duration,
    output_cap: Option<usize>,
}

impl Default for ProcessRunner {
    fn default() -> Self {
        Self::new(Duration::from_secs(2), None)
    }
}

impl ProcessRunner {
    pub fn new(kill_grace: Duration, output_cap: Option<usize>) -> Self {
        Self {
            kill_grace,
            output_cap,
        }
    }

    /// Run `command` to completion, deadline or cancellation.
    ///
    /// Never fails: spawn errors are reported through [`Outcome`]. The task is
    /// suspended while the child runs, so other requests keep being served.
    pub async fn run(
        &self,
        command: &CommandLine,
        timeout: Duration,
        env: &HashMap<String, String>,
        cancel: &CancellationToken,
    ) -> Execution {
        let mut cmd = Command::new(command.program());
        cmd.args(command.arguments())
            .envs(env)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        #[cfg(unix)]
        cmd.process_group(0);

        let started_at = Utc::now();
        let started = Instant::now();

        let mut child = match cmd.spawn() {
            Ok(child) => child,
            Err(e) => {
                let outcome = if e.kind() == std::io::ErrorKind::NotFound {
                    Outcome::NotFound
                } else {
                    Outcome::LaunchFailed(e.to_string())
                };
                tracing::warn!(
                    command = %command.program(),
                    error = %e,
                    "failed to launch tool"
                );
                return Execution {
                    started_at,
                    finished_at: Utc::now(),
                    stdout: String::new(),
                    stderr: String::new(),
                    truncated: false,
                    outcome,
                };
            }
        };

        let mut group = GroupGuard::new(child.id());
        let stdout_reader = child.stdout.take().map(|p| PipeReader::spawn(p, self.output_cap));
        let stderr_reader = child.stderr.take().map(|p| PipeReader::spawn(p, self.output_cap));

        let outcome = tokio::select! {
            status = child.wait() => match status {
                Ok(status) => exit_outcome(status),
                Err(e) => Outcome::LaunchFailed(e.to_string()),
            },
            _ = tokio::time::sleep(timeout) => {
                tracing::warn!(
                    command = %command.program(),
                    timeout_secs = %timeout.as_secs_f64(),
                    "tool exceeded deadline, terminating process group"
                );
                self.terminate(&mut child, &group).await;
                Outcome::TimedOut(timeout)
            }
            _ = cancel.cancelled() => {
                tracing::info!(command = %command.program(), "cancelling tool run");
                self.terminate(&mut child, &group).await;
                Outcome::Cancelled
            }
        };
        group.disarm();
        let finished_at = Utc::now();

        let (stdout, stdout_truncated) = finish_reader(stdout_reader, self.kill_grace, &group).await;
        let (stderr, stderr_truncated) = finish_reader(stderr_reader, self.kill_grace, &group).await;

        let execution = Execution {
            started_at,
            finished_at,
            stdout,
            stderr,
            truncated: stdout_truncated || stderr_truncated,
            outcome,
        };
        tracing::info!(
            command = %command,
            exit_code = %execution.return_code(),
            duration_ms = %started.elapsed().as_millis(),
            "tool invocation"
        );
        execution
    }

    /// SIGTERM the group, wait out the grace window, then SIGKILL and reap.
    async fn terminate(&self, child: &mut Child, group: &GroupGuard) {
        group.signal(Signal::Term);
        match tokio::time::timeout(self.kill_grace, child.wait()).await {
            Ok(_) => {
                // Leader is gone; sweep any member that ignored SIGTERM.
                group.signal(Signal::Kill);
            }
            Err(_) => {
                group.signal(Signal::Kill);
                if let Err(e) = child.kill().await {
                    tracing::debug!(error = %e, "kill after grace window failed");
                }
            }
        }
    }
}

fn exit_outcome(status: ExitStatus) -> Outcome {
    if let Some(code) = status.code() {
        return Outcome::Exited(code);
    }
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            return Outcome::Signaled(signal);
        }
    }
    Outcome::Exited(-1)
}

#[derive(Debug, Clone, Copy)]
enum Signal {
    Term,
    Kill,
}

/// Owns the child's process group until the child is reaped. Dropping an armed
/// guard (e.g. the request future was cancelled) SIGKILLs the whole group.
struct GroupGuard {
    pgid: Option<u32>,
    armed: bool,
}

impl GroupGuard {
    fn new(pgid: Option<u32>) -> Self {
        Self { pgid, armed: true }
    }

    fn disarm(&mut self) {
        self.armed = false;
    }

    #[cfg(unix)]
    fn signal(&self, signal: Signal) {
        let Some(pgid) = self.pgid else { return };
        let signo = match signal {
            Signal::Term => libc::SIGTERM,
            Signal::Kill => libc::SIGKILL,
        };
        // SAFETY: killpg only delivers a signal; an empty group yields ESRCH.
        let rc = unsafe { libc::killpg(pgid as libc::pid_t, signo) };
        if rc != 0 {
            tracing::debug!(
                pgid = %pgid,
                signal = ?signal,
                error = %std::io::Error::last_os_error(),
                "killpg failed"
            );
        }
    }

    #[cfg(not(unix))]
    fn signal(&self, _signal: Signal) {}
}

impl Drop for GroupGuard {
    fn drop(&mut self) {
        if self.armed {
            self.signal(Signal::Kill);
        }
    }
}

#[derive(Default)]
struct Captured {
    bytes: Vec<u8>,
    truncated: bool,
}

/// Background task draining one pipe into a shared buffer.
struct PipeReader {
    handle: JoinHandle<()>,
    buf: Arc<Mutex<Captured>>,
}

impl PipeReader {
    fn spawn<R>(mut reader: R, cap: Option<usize>) -> Self
    where
        R: AsyncRead + Unpin + Send + 'static,
    {
        let buf = Arc::new(Mutex::new(Captured::default()));
        let shared = buf.clone();
        let handle = tokio::spawn(async move {
            let mut chunk = vec![0u8; READ_CHUNK];
            loop {
                let n = match reader.read(&mut chunk).await {
                    Ok(0) | Err(_) => break,
                    Ok(n) => n,
                };
                let mut captured = shared.lock().unwrap_or_else(|e| e.into_inner());
                let room = match cap {
                    Some(cap) => cap.saturating_sub(captured.bytes.len()).min(n),
                    None => n,
                };
                captured.bytes.extend_from_slice(&chunk[..room]);
                if room < n {
                    // Keep draining so the child never blocks on a full pipe.
                    captured.truncated = true;
                }
            }
        });
        Self { handle, buf }
    }
}

/// Wait briefly for a reader to hit EOF, then take whatever it captured.
///
/// A descendant that escaped the process group can hold the pipe open; in
/// that case the group is swept and the reader abandoned after `wait`.
async fn finish_reader(
    reader: Option<PipeReader>,
    wait: Duration,
    group: &GroupGuard,
) -> (String, bool) {
    let Some(mut reader) = reader else {
        return (String::new(), false);
    };
    if tokio::time::timeout(wait, &mut reader.handle).await.is_err() {
        group.signal(Signal::Kill);
        reader.handle.abort();
    }
    let captured = std::mem::take(&mut *reader.buf.lock().unwrap_or_else(|e| e.into_inner()));
    let mut text = String::from_utf8_lossy(&captured.bytes).into_owned();
    if captured.truncated {
        text.push_str(&format!("\n[output truncated at {} bytes]", captured.bytes.len()));
    }
    (text, captured.truncated)
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    fn sh(script: &str) -> CommandLine {
        CommandLine::new("sh").arg("-c").arg(script)
    }

    fn runner() -> ProcessRunner {
        ProcessRunner::new(Duration::from_millis(300), None)
    }

    async fn run(runner: &ProcessRunner, cmd: &CommandLine, timeout: Duration) -> Execution {
        runner
            .run(cmd, timeout, &HashMap::new(), &CancellationToken::new())
            .await
    }

    #[cfg(target_os = "linux")]
    fn process_alive(pid: u32) -> bool {
        match std::fs::read_to_string(format!("/proc/{}/stat", pid)) {
            // State follows the parenthesised command name; zombies count as gone.
            Ok(stat) => stat
                .rsplit(')')
                .next()
                .map(|rest| {
                    let state = rest.trim_start();
                    !(state.starts_with('Z') || state.starts_with('X'))
                })
                .unwrap_or(false),
            Err(_) => false,
        }
    }

    #[tokio::test]
    async fn test_captures_stdout_and_exit_code() {
        let exec = run(&runner(), &CommandLine::new("echo").arg("hello"), Duration::from_secs(5)).await;
        assert_eq!(exec.outcome, Outcome::Exited(0));
        assert_eq!(exec.return_code(), 0);
        assert_eq!(exec.stdout, "hello\n");
        assert_eq!(exec.stderr, "");
        assert!(exec.finished_at >= exec.started_at);
        assert!(!exec.truncated);
    }

    #[tokio::test]
    async fn test_nonzero_exit_and_stderr() {
        let exec = run(
            &runner(),
            &sh("echo out; echo err >&2; exit 3"),
            Duration::from_secs(5),
        )
        .await;
        assert_eq!(exec.outcome, Outcome::Exited(3));
        assert_eq!(exec.stdout, "out\n");
        assert_eq!(exec.stderr, "err\n");
        assert!(exec.produced_output());
    }

    #[tokio::test]
    async fn test_missing_binary() {
        let exec = run(
            &runner(),
            &CommandLine::new("recon-definitely-not-installed-xyz"),
            Duration::from_secs(5),
        )
        .await;
        assert_eq!(exec.outcome, Outcome::NotFound);
        assert_eq!(exec.return_code(), RC_TOOL_MISSING);
        assert!(!exec.produced_output());
        assert!(exec.finished_at >= exec.started_at);
    }

    #[tokio::test]
    async fn test_timeout_keeps_partial_output() {
        let started = Instant::now();
        let exec = run(&runner(), &sh("echo partial; sleep 30"), Duration::from_millis(500)).await;
        assert_eq!(exec.outcome, Outcome::TimedOut(Duration::from_millis(500)));
        assert_eq!(exec.return_code(), RC_TIMEOUT);
        assert_eq!(exec.stdout, "partial\n");
        assert!(started.elapsed() < Duration::from_secs(10));
    }

    #[tokio::test]
    async fn test_sigterm_ignored_escalates_to_sigkill() {
        let started = Instant::now();
        let exec = run(
            &runner(),
            &sh("trap '' TERM; echo ready; sleep 30"),
            Duration::from_millis(300),
        )
        .await;
        assert!(matches!(exec.outcome, Outcome::TimedOut(_)));
        assert_eq!(exec.stdout, "ready\n");
        assert!(started.elapsed() < Duration::from_secs(10));
    }

    #[cfg(target_os = "linux")]
    #[tokio::test]
    async fn test_timeout_leaves_no_orphans() {
        let exec = run(
            &runner(),
            &sh("sleep 30 & echo $!; wait"),
            Duration::from_millis(500),
        )
        .await;
        assert!(matches!(exec.outcome, Outcome::TimedOut(_)));
        let pid: u32 = exec.stdout.trim().parse().expect("background pid");

        let deadline = Instant::now() + Duration::from_secs(3);
        while process_alive(pid) && Instant::now() < deadline {
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        assert!(!process_alive(pid), "background sleep {} survived timeout", pid);
    }

    #[tokio::test]
    async fn test_output_cap_truncates() {
        let runner = ProcessRunner::new(Duration::from_millis(300), Some(4));
        let exec = run(&runner, &sh("printf 0123456789"), Duration::from_secs(5)).await;
        assert_eq!(exec.outcome, Outcome::Exited(0));
        assert!(exec.truncated);
        assert!(exec.stdout.starts_with("0123\n[output truncated at 4 bytes]"));
    }

    #[tokio::test]
    async fn test_env_passed_to_child() {
        let mut env = HashMap::new();
        env.insert("RECON_RUNNER_TEST".to_string(), "from-config".to_string());
        let exec = runner()
            .run(
                &sh("printf \"$RECON_RUNNER_TEST\""),
                Duration::from_secs(5),
                &env,
                &CancellationToken::new(),
            )
            .await;
        assert_eq!(exec.stdout, "from-config");
    }

    #[tokio::test]
    async fn test_cancellation_terminates_child() {
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(200)).await;
            trigger.cancel();
        });
        let exec = runner()
            .run(&sh("sleep 30"), Duration::from_secs(30), &HashMap::new(), &cancel)
            .await;
        assert_eq!(exec.outcome, Outcome::Cancelled);
        assert_eq!(exec.return_code(), RC_CANCELLED);
    }

    #[tokio::test]
    async fn test_killed_by_foreign_signal() {
        let exec = run(&runner(), &sh("kill -9 $$"), Duration::from_secs(5)).await;
        assert_eq!(exec.outcome, Outcome::Signaled(9));
        assert_eq!(exec.return_code(), 137);
    }

    #[tokio::test]
    async fn test_concurrent_runs_do_not_serialize() {
        let runner = runner();
        let cmd = sh("sleep 1");
        let started = Instant::now();
        let runs = (0..3).map(|_| run(&runner, &cmd, Duration::from_secs(10)));
        let results = futures::future::join_all(runs).await;
        assert!(results.iter().all(|e| e.outcome == Outcome::Exited(0)));
        assert!(
            started.elapsed() < Duration::from_millis(2800),
            "three 1s runs took {:?}",
            started.elapsed()
        );
    }

    #[tokio::test]
    async fn test_independent_deadlines() {
        let runner = runner();
        let slow = sh("sleep 30");
        let quick = sh("echo done");
        let (timed_out, finished) = tokio::join!(
            run(&runner, &slow, Duration::from_millis(300)),
            run(&runner, &quick, Duration::from_secs(5)),
        );
        assert!(matches!(timed_out.outcome, Outcome::TimedOut(_)));
        assert_eq!(finished.outcome, Outcome::Exited(0));
        assert_eq!(finished.stdout, "done\n");
    }
}
