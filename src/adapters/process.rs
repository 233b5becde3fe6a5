//! Bounded-capture subprocess runner shared by all adapters

use crate::adapters::context::ExecContext;
use std::process::Stdio;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::io::AsyncReadExt;
use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Captured outcome of one external process
#[derive(Debug, Clone)]
pub struct ProcessOutput {
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
    /// Either stream hit the capture bound
    pub truncated: bool,
    pub duration: Duration,
}

/// Ways a process invocation can fail before producing an exit code
#[derive(Debug, Clone, Error)]
pub enum ProcessError {
    #[error("executable '{0}' not found")]
    NotFound(String),

    #[error("permission denied executing '{0}'")]
    PermissionDenied(String),

    #[error("timed out after {0}s")]
    TimedOut(u64),

    #[error("cancelled")]
    Cancelled,

    #[error("failed to run process: {0}")]
    Spawn(String),
}

/// Run one external tool to completion.
///
/// Stdout and stderr are captured in full up to the context's per-stream
/// cap; beyond the cap the streams keep draining (so the child never
/// blocks on a full pipe) but the excess is dropped and the output is
/// flagged truncated. On timeout or cancellation the child is killed.
pub async fn run_tool(
    program: &str,
    args: &[String],
    ctx: &ExecContext,
    timeout: Duration,
    cancel: &CancellationToken,
) -> Result<ProcessOutput, ProcessError> {
    debug!(program, ?args, timeout_secs = timeout.as_secs(), "spawning tool");
    let started = Instant::now();

    let mut command = Command::new(program);
    command
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    for (key, value) in &ctx.env {
        command.env(key, value);
    }
    if let Some(cwd) = &ctx.cwd {
        command.current_dir(cwd);
    }

    let mut child = command.spawn().map_err(|e| match e.kind() {
        std::io::ErrorKind::NotFound => ProcessError::NotFound(program.to_string()),
        std::io::ErrorKind::PermissionDenied => ProcessError::PermissionDenied(program.to_string()),
        _ => ProcessError::Spawn(e.to_string()),
    })?;

    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| ProcessError::Spawn("stdout not captured".to_string()))?;
    let stderr = child
        .stderr
        .take()
        .ok_or_else(|| ProcessError::Spawn("stderr not captured".to_string()))?;

    let cap = ctx.output_cap;
    let stdout_task = tokio::spawn(read_capped(stdout, cap));
    let stderr_task = tokio::spawn(read_capped(stderr, cap));

    let status = tokio::select! {
        status = child.wait() => {
            status.map_err(|e| ProcessError::Spawn(e.to_string()))?
        }
        _ = tokio::time::sleep(timeout) => {
            let _ = child.start_kill();
            let _ = child.wait().await;
            stdout_task.abort();
            stderr_task.abort();
            return Err(ProcessError::TimedOut(timeout.as_secs()));
        }
        _ = cancel.cancelled() => {
            let _ = child.start_kill();
            let _ = child.wait().await;
            stdout_task.abort();
            stderr_task.abort();
            return Err(ProcessError::Cancelled);
        }
    };

    let (stdout, stdout_truncated) = stdout_task
        .await
        .map_err(|e| ProcessError::Spawn(e.to_string()))?;
    let (stderr, stderr_truncated) = stderr_task
        .await
        .map_err(|e| ProcessError::Spawn(e.to_string()))?;

    let output = ProcessOutput {
        exit_code: status.code(),
        stdout,
        stderr,
        truncated: stdout_truncated || stderr_truncated,
        duration: started.elapsed(),
    };
    debug!(
        program,
        exit_code = ?output.exit_code,
        duration_ms = output.duration.as_millis() as u64,
        truncated = output.truncated,
        "tool exited"
    );
    Ok(output)
}

/// Read a stream to EOF, keeping at most `cap` bytes.
async fn read_capped<R>(mut reader: R, cap: usize) -> (String, bool)
where
    R: AsyncReadExt + Unpin,
{
    let mut buf: Vec<u8> = Vec::new();
    let mut chunk = [0u8; 8192];
    let mut truncated = false;

    loop {
        match reader.read(&mut chunk).await {
            Ok(0) => break,
            Ok(n) => {
                if buf.len() < cap {
                    let take = n.min(cap - buf.len());
                    buf.extend_from_slice(&chunk[..take]);
                    if take < n {
                        truncated = true;
                    }
                } else {
                    truncated = true;
                }
            }
            Err(_) => break,
        }
    }

    (String::from_utf8_lossy(&buf).into_owned(), truncated)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::config::AgentConfig;

    fn ctx() -> ExecContext {
        ExecContext::from_config(&AgentConfig::default())
    }

    #[tokio::test]
    async fn test_captures_stdout_and_exit_code() {
        let cancel = CancellationToken::new();
        let output = run_tool(
            "sh",
            &["-c".to_string(), "echo hello; exit 3".to_string()],
            &ctx(),
            Duration::from_secs(10),
            &cancel,
        )
        .await
        .unwrap();
        assert_eq!(output.exit_code, Some(3));
        assert_eq!(output.stdout.trim(), "hello");
        assert!(!output.truncated);
    }

    #[tokio::test]
    async fn test_captures_stderr() {
        let cancel = CancellationToken::new();
        let output = run_tool(
            "sh",
            &["-c".to_string(), "echo oops >&2".to_string()],
            &ctx(),
            Duration::from_secs(10),
            &cancel,
        )
        .await
        .unwrap();
        assert_eq!(output.stderr.trim(), "oops");
    }

    #[tokio::test]
    async fn test_missing_binary_is_not_found() {
        let cancel = CancellationToken::new();
        let err = run_tool(
            "shipgate-no-such-binary",
            &[],
            &ctx(),
            Duration::from_secs(5),
            &cancel,
        )
        .await
        .unwrap_err();
        assert!(matches!(err, ProcessError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_timeout_kills_and_reports() {
        let cancel = CancellationToken::new();
        let started = Instant::now();
        let err = run_tool(
            "sleep",
            &["30".to_string()],
            &ctx(),
            Duration::from_secs(1),
            &cancel,
        )
        .await
        .unwrap_err();
        assert!(matches!(err, ProcessError::TimedOut(1)));
        assert!(started.elapsed() < Duration::from_millis(1500));
    }

    #[tokio::test]
    async fn test_cancellation_kills_process() {
        let cancel = CancellationToken::new();
        let child_cancel = cancel.clone();
        let handle = tokio::spawn(async move {
            run_tool(
                "sleep",
                &["30".to_string()],
                &ExecContext::from_config(&AgentConfig::default()),
                Duration::from_secs(60),
                &child_cancel,
            )
            .await
        });
        tokio::time::sleep(Duration::from_millis(100)).await;
        cancel.cancel();
        let err = handle.await.unwrap().unwrap_err();
        assert!(matches!(err, ProcessError::Cancelled));
    }

    #[tokio::test]
    async fn test_output_is_capped() {
        let mut ctx = ctx();
        ctx.output_cap = 64;
        let cancel = CancellationToken::new();
        let output = run_tool(
            "sh",
            &[
                "-c".to_string(),
                "head -c 4096 /dev/zero | tr '\\0' 'x'".to_string(),
            ],
            &ctx,
            Duration::from_secs(10),
            &cancel,
        )
        .await
        .unwrap();
        assert_eq!(output.stdout.len(), 64);
        assert!(output.truncated);
    }
}
