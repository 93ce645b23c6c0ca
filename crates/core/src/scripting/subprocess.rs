//! Shared subprocess management.
//!
//! Callers build a [`tokio::process::Command`] with program and arguments;
//! [`run_command`] applies the working directory, captures stdout/stderr,
//! and waits for exit.

use std::path::PathBuf;
use std::process::Stdio;
use std::time::{Duration, Instant};

use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;

/// Maximum stdout or stderr size captured per stream (10 MiB).
const MAX_OUTPUT_BYTES: usize = 10 * 1024 * 1024;

/// Execution context for one child process.
#[derive(Debug, Clone, Default)]
pub struct ProcessInput {
    /// Working directory for the child process (inherits if `None`).
    pub working_directory: Option<PathBuf>,
    /// Wall-clock limit; `None` waits for as long as the child runs.
    pub timeout: Option<Duration>,
}

/// Captured result of a child process that ran to exit.
#[derive(Debug, Clone)]
pub struct ProcessOutput {
    pub stdout: String,
    pub stderr: String,
    /// Process exit code (`-1` if killed by signal).
    pub exit_code: i32,
    pub duration_ms: u64,
}

impl ProcessOutput {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }

    /// Diagnostic text for failure reports: stderr, or stdout when stderr
    /// is empty.
    pub fn diagnostics(&self) -> &str {
        if self.stderr.trim().is_empty() {
            &self.stdout
        } else {
            &self.stderr
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ProcessError {
    #[error("Failed to spawn or wait for process: {0}")]
    Io(#[from] std::io::Error),

    #[error("Process timed out after {elapsed_ms}ms")]
    Timeout { elapsed_ms: u64 },
}

/// Spawn `cmd`, capture output, and wait for exit.
///
/// A non-zero exit is NOT an error here; inspect
/// [`ProcessOutput::exit_code`]. The child is killed if the timeout fires.
pub async fn run_command(
    cmd: &mut Command,
    input: ProcessInput,
) -> Result<ProcessOutput, ProcessError> {
    cmd.stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    if let Some(dir) = &input.working_directory {
        cmd.current_dir(dir);
    }

    let start = Instant::now();
    let mut child = cmd.spawn()?;

    let stdout_task = tokio::spawn(read_capped(child.stdout.take(), MAX_OUTPUT_BYTES));
    let stderr_task = tokio::spawn(read_capped(child.stderr.take(), MAX_OUTPUT_BYTES));

    let status = match input.timeout {
        Some(limit) => match tokio::time::timeout(limit, child.wait()).await {
            Ok(status) => status?,
            Err(_elapsed) => {
                stdout_task.abort();
                stderr_task.abort();
                return Err(ProcessError::Timeout {
                    elapsed_ms: start.elapsed().as_millis() as u64,
                });
            }
        },
        None => child.wait().await?,
    };

    let duration_ms = start.elapsed().as_millis() as u64;
    let stdout_bytes = stdout_task.await.unwrap_or_default();
    let stderr_bytes = stderr_task.await.unwrap_or_default();

    Ok(ProcessOutput {
        stdout: String::from_utf8_lossy(&stdout_bytes).into_owned(),
        stderr: String::from_utf8_lossy(&stderr_bytes).into_owned(),
        exit_code: status.code().unwrap_or(-1),
        duration_ms,
    })
}

/// Read a stream to EOF, keeping at most `cap` bytes.
///
/// Bytes past the cap are read and discarded so the writer never sees a
/// closed pipe.
async fn read_capped<R: AsyncRead + Unpin>(handle: Option<R>, cap: usize) -> Vec<u8> {
    let mut buf = Vec::new();
    let Some(mut h) = handle else {
        return buf;
    };

    let mut chunk = [0u8; 8192];
    loop {
        match h.read(&mut chunk).await {
            Ok(0) | Err(_) => break,
            Ok(n) => {
                let keep = n.min(cap.saturating_sub(buf.len()));
                buf.extend_from_slice(&chunk[..keep]);
            }
        }
    }
    buf
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    fn sh(script: &str) -> Command {
        let mut cmd = Command::new("sh");
        cmd.arg("-c").arg(script);
        cmd
    }

    #[tokio::test]
    async fn captures_stdout_and_exit_code() {
        let output = run_command(&mut sh("echo hello"), ProcessInput::default())
            .await
            .expect("run");
        assert!(output.success());
        assert_eq!(output.stdout.trim(), "hello");
    }

    #[tokio::test]
    async fn nonzero_exit_is_reported_not_raised() {
        let output = run_command(&mut sh("echo boom >&2; exit 3"), ProcessInput::default())
            .await
            .expect("run");
        assert_eq!(output.exit_code, 3);
        assert_eq!(output.diagnostics().trim(), "boom");
    }

    #[tokio::test]
    async fn diagnostics_fall_back_to_stdout() {
        let output = run_command(&mut sh("echo only-stdout; exit 1"), ProcessInput::default())
            .await
            .expect("run");
        assert_eq!(output.diagnostics().trim(), "only-stdout");
    }

    #[tokio::test]
    async fn working_directory_applies() {
        let dir = tempfile::tempdir().expect("tempdir");
        let input = ProcessInput {
            working_directory: Some(dir.path().to_path_buf()),
            ..Default::default()
        };
        let output = run_command(&mut sh("touch marker; pwd"), input)
            .await
            .expect("run");
        assert!(output.success());
        assert!(dir.path().join("marker").exists());
    }

    #[tokio::test]
    async fn stdin_is_closed() {
        let output = run_command(&mut sh("cat; echo done"), ProcessInput::default())
            .await
            .expect("run");
        assert_eq!(output.stdout.trim(), "done");
    }

    #[tokio::test]
    async fn read_capped_truncates_and_drains() {
        let data = vec![7u8; 20_000];
        let kept = read_capped(Some(&data[..]), 100).await;
        assert_eq!(kept, vec![7u8; 100]);

        let none: Vec<u8> = read_capped(None::<&[u8]>, 100).await;
        assert!(none.is_empty());
    }

    #[tokio::test]
    async fn oversized_stderr_does_not_break_pipe() {
        let script = format!(
            "head -c {} /dev/zero >&2; echo finished",
            MAX_OUTPUT_BYTES + 1024 * 1024
        );
        let output = run_command(&mut sh(&script), ProcessInput::default())
            .await
            .expect("run");
        assert!(output.success(), "exit code {}", output.exit_code);
        assert_eq!(output.stdout.trim(), "finished");
        assert_eq!(output.stderr.len(), MAX_OUTPUT_BYTES);
    }

    #[tokio::test]
    async fn timeout_kills_child() {
        let input = ProcessInput {
            timeout: Some(Duration::from_millis(200)),
            ..Default::default()
        };
        let result = run_command(&mut sh("sleep 30"), input).await;
        assert_matches!(result, Err(ProcessError::Timeout { .. }));
    }

    #[tokio::test]
    async fn missing_program_is_io_error() {
        let mut cmd = Command::new("/nonexistent/engine-binary");
        let result = run_command(&mut cmd, ProcessInput::default()).await;
        assert_matches!(result, Err(ProcessError::Io(_)));
    }
}
