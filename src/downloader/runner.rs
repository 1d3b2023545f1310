use std::io;
use std::process::Stdio;
use std::fmt;

use async_trait::async_trait;
use colored::Colorize;
use error_stack::{IntoReport, Report, ResultExt};
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tokio::sync::mpsc;

use crate::downloader::command::SyncInvocation;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunnerError {
    /// The external downloader binary is not on PATH.
    NotInstalled,
    /// The run exceeded its wall clock budget and the child was killed.
    Timeout { secs: u64 },
    /// Spawning or waiting on the child failed for another reason.
    Io,
}

impl fmt::Display for RunnerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunnerError::NotInstalled => {
                f.write_str("scdl not found. Please install scdl first.")
            }
            RunnerError::Timeout { secs } => {
                write!(f, "Sync timed out after {} seconds", secs)
            }
            RunnerError::Io => f.write_str("Failed to run the external downloader"),
        }
    }
}

impl std::error::Error for RunnerError {}

pub type RunnerResult<T> = error_stack::Result<T, RunnerError>;

/// Captured output of one completed scdl run. A nonzero exit code is not a
/// runner error; callers decide what to do with it.
#[derive(Debug, Clone, Default)]
pub struct ProcessOutput {
    pub code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl ProcessOutput {
    pub fn success(&self) -> bool {
        self.code == Some(0)
    }

    /// stderr with a fallback to stdout, for failure messages.
    pub fn error_detail(&self) -> String {
        if !self.stderr.trim().is_empty() {
            self.stderr.trim_end().to_string()
        } else if !self.stdout.trim().is_empty() {
            self.stdout.trim_end().to_string()
        } else {
            "Unknown error".to_string()
        }
    }

    /// Both streams, for pattern scanning by the reconciler.
    pub fn combined(&self) -> String {
        let mut combined = String::with_capacity(self.stdout.len() + self.stderr.len() + 1);
        combined.push_str(&self.stdout);
        combined.push_str(&self.stderr);
        combined
    }
}

/// Seam between the orchestrator and the real subprocess, so syncs can be
/// tested against a stub.
#[async_trait]
pub trait ProcessRunner: Send + Sync {
    async fn run(&self, invocation: &SyncInvocation) -> RunnerResult<ProcessOutput>;
}

#[derive(Debug, Clone, Copy)]
enum OutputStream {
    Stdout,
    Stderr,
}

fn spawn_line_reader<R>(
    stream: R,
    source: OutputStream,
    tx: mpsc::Sender<(OutputStream, String)>,
) -> tokio::task::JoinHandle<()>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut lines = BufReader::new(stream).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            if tx.send((source, line)).await.is_err() {
                break;
            }
        }
    })
}

/// Runs scdl as a child process without any shell interpretation of the
/// arguments. stdout and stderr are drained concurrently while the process
/// runs, so a chatty download can never fill a pipe and stall.
pub struct ScdlRunner {
    /// Echo every output line as it arrives (debug mode).
    pub echo_output: bool,
}

impl ScdlRunner {
    pub fn new(echo_output: bool) -> Self {
        Self { echo_output }
    }
}

#[async_trait]
impl ProcessRunner for ScdlRunner {
    async fn run(&self, invocation: &SyncInvocation) -> RunnerResult<ProcessOutput> {
        let mut child = Command::new(&invocation.program)
            .args(&invocation.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|err| match err.kind() {
                io::ErrorKind::NotFound => Report::new(RunnerError::NotInstalled),
                _ => Report::new(RunnerError::Io)
                    .attach_printable(format!("Failed to spawn {}: {}", invocation.program, err)),
            })?;

        let stdout = child.stdout.take().ok_or(RunnerError::Io).into_report()?;
        let stderr = child.stderr.take().ok_or(RunnerError::Io).into_report()?;

        let (tx, mut rx) = mpsc::channel::<(OutputStream, String)>(64);
        let stdout_reader = spawn_line_reader(stdout, OutputStream::Stdout, tx.clone());
        let stderr_reader = spawn_line_reader(stderr, OutputStream::Stderr, tx);

        let mut stdout_buf = String::new();
        let mut stderr_buf = String::new();
        let echo_output = self.echo_output;

        let waited = tokio::time::timeout(invocation.timeout, async {
            // The channel closes once both readers hit EOF, which happens
            // when the child exits and its pipes are released.
            while let Some((source, line)) = rx.recv().await {
                if echo_output {
                    eprintln!("{}", line.dimmed());
                }
                match source {
                    OutputStream::Stdout => {
                        stdout_buf.push_str(&line);
                        stdout_buf.push('\n');
                    }
                    OutputStream::Stderr => {
                        stderr_buf.push_str(&line);
                        stderr_buf.push('\n');
                    }
                }
            }
            child.wait().await
        })
        .await;

        match waited {
            Ok(wait_result) => {
                let status = wait_result
                    .into_report()
                    .attach_printable("Failed waiting for the downloader to exit")
                    .change_context(RunnerError::Io)?;
                let _ = stdout_reader.await;
                let _ = stderr_reader.await;
                Ok(ProcessOutput {
                    code: status.code(),
                    stdout: stdout_buf,
                    stderr: stderr_buf,
                })
            }
            Err(_) => {
                // Hard cancellation boundary: kill the child and its
                // readers before reporting. Partial downloads stay on disk.
                let _ = child.start_kill();
                let _ = child.wait().await;
                stdout_reader.abort();
                stderr_reader.abort();
                Err(Report::new(RunnerError::Timeout {
                    secs: invocation.timeout.as_secs(),
                }))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn invocation(program: &str, args: &[&str], timeout: Duration) -> SyncInvocation {
        SyncInvocation {
            program: program.to_string(),
            args: args.iter().map(|arg| arg.to_string()).collect(),
            timeout,
        }
    }

    #[tokio::test]
    async fn missing_binary_reports_not_installed() {
        let runner = ScdlRunner::new(false);
        let invocation = invocation(
            "scdl-sync-no-such-binary",
            &[],
            Duration::from_secs(5),
        );
        let err = runner.run(&invocation).await.unwrap_err();
        assert_eq!(*err.current_context(), RunnerError::NotInstalled);
    }

    #[tokio::test]
    async fn captures_exit_code_and_both_streams() {
        let runner = ScdlRunner::new(false);
        let invocation = invocation(
            "sh",
            &["-c", "echo downloaded; echo warning 1>&2; exit 3"],
            Duration::from_secs(5),
        );
        let output = runner.run(&invocation).await.unwrap();
        assert_eq!(output.code, Some(3));
        assert!(!output.success());
        assert!(output.stdout.contains("downloaded"));
        assert!(output.stderr.contains("warning"));
        assert_eq!(output.error_detail(), "warning");
    }

    #[tokio::test]
    async fn zero_exit_is_success() {
        let runner = ScdlRunner::new(false);
        let invocation = invocation("sh", &["-c", "exit 0"], Duration::from_secs(5));
        let output = runner.run(&invocation).await.unwrap();
        assert!(output.success());
        assert_eq!(output.error_detail(), "Unknown error");
    }

    #[tokio::test]
    async fn timeout_kills_the_child() {
        let runner = ScdlRunner::new(false);
        let invocation = invocation("sleep", &["30"], Duration::from_millis(200));
        let err = runner.run(&invocation).await.unwrap_err();
        assert!(matches!(
            err.current_context(),
            RunnerError::Timeout { .. }
        ));
    }
}
