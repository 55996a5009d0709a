// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 avaflow contributors

//! Process runner
//!
//! Spawns an external tool, buffers a bounded tail of its output, and
//! enforces a deadline. A timed-out or cancelled process is killed together
//! with its process group and reaped before the runner returns.

use std::collections::{HashMap, VecDeque};
use std::path::Path;
use std::process::Stdio;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::{Child, Command};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::errors::StepError;

/// Default number of bytes kept from the end of each output stream
pub const DEFAULT_TAIL_BYTES: usize = 16 * 1024;

/// How long to wait for output pipes to close after the process is gone
const PIPE_DRAIN_GRACE: Duration = Duration::from_secs(2);

/// Keeps only the last `limit` bytes written to it
#[derive(Debug)]
pub struct TailBuffer {
    buf: VecDeque<u8>,
    limit: usize,
    truncated: bool,
}

impl TailBuffer {
    pub fn new(limit: usize) -> Self {
        Self {
            buf: VecDeque::with_capacity(limit.min(8 * 1024)),
            limit,
            truncated: false,
        }
    }

    pub fn push(&mut self, chunk: &[u8]) {
        if chunk.len() >= self.limit {
            self.truncated |= chunk.len() > self.limit || !self.buf.is_empty();
            self.buf.clear();
            self.buf.extend(&chunk[chunk.len() - self.limit..]);
            return;
        }

        let overflow = (self.buf.len() + chunk.len()).saturating_sub(self.limit);
        if overflow > 0 {
            self.buf.drain(..overflow);
            self.truncated = true;
        }
        self.buf.extend(chunk);
    }

    /// Whether any bytes were discarded
    pub fn truncated(&self) -> bool {
        self.truncated
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// Lossy UTF-8 view of the retained bytes
    pub fn to_string_lossy(&self) -> String {
        let (head, tail) = self.buf.as_slices();
        let mut bytes = Vec::with_capacity(head.len() + tail.len());
        bytes.extend_from_slice(head);
        bytes.extend_from_slice(tail);
        String::from_utf8_lossy(&bytes).into_owned()
    }
}

/// Captured result of a process that ran to completion
#[derive(Debug, Clone)]
pub struct CommandOutput {
    /// Exit code (-1 when terminated by a signal)
    pub exit_code: i32,
    /// Tail of standard output
    pub stdout: String,
    /// Tail of standard error
    pub stderr: String,
    /// Wall-clock duration
    pub duration: Duration,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

enum Outcome {
    Exited(std::io::Result<std::process::ExitStatus>),
    DeadlineExceeded,
    Cancelled,
}

/// Runs external executables with deadlines and bounded output capture
#[derive(Debug, Clone)]
pub struct ProcessRunner {
    tail_bytes: usize,
}

impl ProcessRunner {
    /// Create a runner that keeps `tail_bytes` of each output stream
    pub fn new(tail_bytes: usize) -> Self {
        Self { tail_bytes }
    }

    /// Run `executable` in `working_dir` until it exits, the deadline passes,
    /// or `cancel` fires.
    ///
    /// A nonzero exit code is returned as `Ok`; the caller decides what it
    /// means. Failing to start the process is a [`StepError::Launch`].
    pub async fn run(
        &self,
        executable: &str,
        args: &[String],
        env: &HashMap<String, String>,
        working_dir: &Path,
        deadline: Duration,
        cancel: &CancellationToken,
    ) -> Result<CommandOutput, StepError> {
        if !working_dir.is_dir() {
            return Err(StepError::Launch {
                executable: executable.to_string(),
                reason: format!(
                    "working directory '{}' does not exist",
                    working_dir.display()
                ),
            });
        }

        let mut cmd = Command::new(executable);
        cmd.args(args)
            .current_dir(working_dir)
            .envs(env)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        // Own process group, so a timeout can take down the whole tree.
        #[cfg(unix)]
        cmd.process_group(0);

        let start = Instant::now();
        let mut child = cmd.spawn().map_err(|e| StepError::Launch {
            executable: executable.to_string(),
            reason: e.to_string(),
        })?;

        debug!(
            "spawned '{}' (pid {:?}) in {}",
            executable,
            child.id(),
            working_dir.display()
        );

        let stdout = Arc::new(Mutex::new(TailBuffer::new(self.tail_bytes)));
        let stderr = Arc::new(Mutex::new(TailBuffer::new(self.tail_bytes)));
        let readers = [
            child
                .stdout
                .take()
                .map(|pipe| spawn_tail_reader(pipe, Arc::clone(&stdout))),
            child
                .stderr
                .take()
                .map(|pipe| spawn_tail_reader(pipe, Arc::clone(&stderr))),
        ];

        let outcome = tokio::select! {
            status = child.wait() => Outcome::Exited(status),
            _ = tokio::time::sleep(deadline) => Outcome::DeadlineExceeded,
            _ = cancel.cancelled() => Outcome::Cancelled,
        };

        if !matches!(outcome, Outcome::Exited(_)) {
            terminate(&mut child).await;
        }

        drain_readers(readers).await;
        let elapsed = start.elapsed();
        let stdout = snapshot(&stdout);
        let stderr = snapshot(&stderr);

        match outcome {
            Outcome::Exited(Ok(status)) => Ok(CommandOutput {
                exit_code: status.code().unwrap_or(-1),
                stdout,
                stderr,
                duration: elapsed,
            }),
            Outcome::Exited(Err(e)) => Err(StepError::Unexpected {
                message: format!("waiting for '{}' failed: {}", executable, e),
            }),
            Outcome::DeadlineExceeded => {
                warn!(
                    "'{}' exceeded its {:.0}s deadline; killed",
                    executable,
                    deadline.as_secs_f64()
                );
                Err(StepError::Timeout {
                    elapsed,
                    stdout_tail: stdout,
                    stderr_tail: stderr,
                })
            }
            Outcome::Cancelled => Err(StepError::Cancelled { elapsed }),
        }
    }
}

impl Default for ProcessRunner {
    fn default() -> Self {
        Self::new(DEFAULT_TAIL_BYTES)
    }
}

fn spawn_tail_reader<R>(mut pipe: R, sink: Arc<Mutex<TailBuffer>>) -> JoinHandle<()>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut chunk = [0u8; 8192];
        loop {
            match pipe.read(&mut chunk).await {
                Ok(0) => break,
                Ok(n) => {
                    if let Ok(mut tail) = sink.lock() {
                        tail.push(&chunk[..n]);
                    }
                }
                Err(e) => {
                    debug!("output pipe read failed: {}", e);
                    break;
                }
            }
        }
    })
}

/// Wait for the output readers, but never longer than the grace period:
/// a detached grandchild may hold a pipe open indefinitely.
async fn drain_readers(readers: [Option<JoinHandle<()>>; 2]) {
    for reader in readers.into_iter().flatten() {
        let abort = reader.abort_handle();
        if tokio::time::timeout(PIPE_DRAIN_GRACE, reader).await.is_err() {
            abort.abort();
        }
    }
}

fn snapshot(tail: &Mutex<TailBuffer>) -> String {
    tail.lock().map(|t| t.to_string_lossy()).unwrap_or_default()
}

/// Kill the child's process group, then kill and reap the child itself.
async fn terminate(child: &mut Child) {
    #[cfg(unix)]
    if let Some(pid) = child.id() {
        let group = format!("-{}", pid);
        let killed = Command::new("kill")
            .args(["-s", "KILL", "--", &group])
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await;
        match killed {
            Ok(status) if !status.success() => {
                debug!("kill exited with {} for process group {}", status, pid);
            }
            Ok(_) => {}
            Err(e) => {
                warn!(
                    "could not signal process group {}; descendants may survive: {}",
                    pid, e
                );
            }
        }
    }

    if let Err(e) = child.kill().await {
        warn!("failed to kill child process: {}", e);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn sh(script: &str) -> Vec<String> {
        vec!["-c".to_string(), script.to_string()]
    }

    #[test]
    fn test_tail_buffer_keeps_last_bytes() {
        let mut tail = TailBuffer::new(5);
        tail.push(b"abc");
        assert!(!tail.truncated());
        tail.push(b"defg");
        assert_eq!(tail.to_string_lossy(), "cdefg");
        assert!(tail.truncated());

        tail.push(b"0123456789");
        assert_eq!(tail.to_string_lossy(), "56789");
        assert_eq!(tail.len(), 5);
    }

    #[test]
    fn test_tail_buffer_zero_limit_stores_nothing() {
        let mut tail = TailBuffer::new(0);
        tail.push(b"hello");
        assert!(tail.is_empty());
        assert!(tail.truncated());
    }

    #[tokio::test]
    async fn test_run_captures_output_and_exit_code() {
        let dir = TempDir::new().unwrap();
        let runner = ProcessRunner::default();
        let output = runner
            .run(
                "sh",
                &sh("echo out; echo err >&2; exit 3"),
                &HashMap::new(),
                dir.path(),
                Duration::from_secs(10),
                &CancellationToken::new(),
            )
            .await
            .unwrap();

        assert_eq!(output.exit_code, 3);
        assert!(!output.success());
        assert_eq!(output.stdout.trim(), "out");
        assert_eq!(output.stderr.trim(), "err");
    }

    #[tokio::test]
    async fn test_run_passes_env_and_working_dir() {
        let dir = TempDir::new().unwrap();
        let mut env = HashMap::new();
        env.insert("AVAFLOW_TEST_VALUE".to_string(), "hair".to_string());

        let output = ProcessRunner::default()
            .run(
                "sh",
                &sh("printf '%s' \"$AVAFLOW_TEST_VALUE\" > marker.txt"),
                &env,
                dir.path(),
                Duration::from_secs(10),
                &CancellationToken::new(),
            )
            .await
            .unwrap();

        assert!(output.success());
        let marker = std::fs::read_to_string(dir.path().join("marker.txt")).unwrap();
        assert_eq!(marker, "hair");
    }

    #[tokio::test]
    async fn test_output_is_truncated_to_tail() {
        let dir = TempDir::new().unwrap();
        let output = ProcessRunner::new(16)
            .run(
                "sh",
                &sh("i=0; while [ $i -lt 200 ]; do printf 'line-%03d\\n' $i; i=$((i+1)); done"),
                &HashMap::new(),
                dir.path(),
                Duration::from_secs(10),
                &CancellationToken::new(),
            )
            .await
            .unwrap();

        assert_eq!(output.stdout.len(), 16);
        assert!(output.stdout.ends_with("line-199\n"));
    }

    #[tokio::test]
    async fn test_deadline_kills_process() {
        let dir = TempDir::new().unwrap();
        let start = Instant::now();
        let err = ProcessRunner::default()
            .run(
                "sh",
                &sh("echo $$ > pid.txt; sleep 30"),
                &HashMap::new(),
                dir.path(),
                Duration::from_millis(300),
                &CancellationToken::new(),
            )
            .await
            .unwrap_err();

        assert!(matches!(err, StepError::Timeout { .. }));
        assert!(err.elapsed().unwrap() >= Duration::from_millis(300));
        assert!(start.elapsed() < Duration::from_secs(10));

        // The shell's pid must no longer exist once the runner returns.
        let pid = std::fs::read_to_string(dir.path().join("pid.txt")).unwrap();
        let alive = std::process::Command::new("kill")
            .args(["-0", pid.trim()])
            .stderr(Stdio::null())
            .status()
            .unwrap();
        assert!(!alive.success());
    }

    /// State letter from `/proc/<pid>/stat`, or None once the pid is gone
    #[cfg(target_os = "linux")]
    fn proc_state(pid: &str) -> Option<char> {
        let stat = std::fs::read_to_string(format!("/proc/{}/stat", pid)).ok()?;
        let after_comm = &stat[stat.rfind(')')? + 1..];
        after_comm.trim_start().chars().next()
    }

    #[cfg(target_os = "linux")]
    #[tokio::test]
    async fn test_deadline_kills_descendants() {
        let dir = TempDir::new().unwrap();
        let err = ProcessRunner::default()
            .run(
                "sh",
                &sh("sleep 30 & echo $! > gc.pid; wait"),
                &HashMap::new(),
                dir.path(),
                Duration::from_millis(300),
                &CancellationToken::new(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, StepError::Timeout { .. }));

        let pid = std::fs::read_to_string(dir.path().join("gc.pid")).unwrap();
        let pid = pid.trim();

        // The orphaned grandchild is reaped by init; allow it a moment.
        let deadline = Instant::now() + Duration::from_secs(2);
        let mut state = proc_state(pid);
        while matches!(state, Some(s) if s != 'Z') && Instant::now() < deadline {
            tokio::time::sleep(Duration::from_millis(20)).await;
            state = proc_state(pid);
        }
        assert!(
            matches!(state, None | Some('Z')),
            "grandchild {} still running in state {:?}",
            pid,
            state
        );
    }

    #[tokio::test]
    async fn test_cancel_stops_process() {
        let dir = TempDir::new().unwrap();
        let token = CancellationToken::new();
        let trigger = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(200)).await;
            trigger.cancel();
        });

        let err = ProcessRunner::default()
            .run(
                "sh",
                &sh("sleep 30"),
                &HashMap::new(),
                dir.path(),
                Duration::from_secs(60),
                &token,
            )
            .await
            .unwrap_err();

        assert!(matches!(err, StepError::Cancelled { .. }));
    }

    #[tokio::test]
    async fn test_missing_executable_is_launch_failure() {
        let dir = TempDir::new().unwrap();
        let err = ProcessRunner::default()
            .run(
                "avaflow-definitely-not-installed",
                &[],
                &HashMap::new(),
                dir.path(),
                Duration::from_secs(5),
                &CancellationToken::new(),
            )
            .await
            .unwrap_err();

        assert_eq!(err.kind(), "launch_failure");
    }

    #[tokio::test]
    async fn test_missing_working_dir_is_launch_failure() {
        let dir = TempDir::new().unwrap();
        let err = ProcessRunner::default()
            .run(
                "sh",
                &sh("true"),
                &HashMap::new(),
                &dir.path().join("missing"),
                Duration::from_secs(5),
                &CancellationToken::new(),
            )
            .await
            .unwrap_err();

        match err {
            StepError::Launch { reason, .. } => assert!(reason.contains("does not exist")),
            other => panic!("expected launch failure, got {:?}", other),
        }
    }
}
