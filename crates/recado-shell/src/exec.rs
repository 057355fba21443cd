//! One-shot command execution.
//!
//! Commands are spawned directly from their token list — no shell is ever
//! involved, so operators in arguments are inert strings. Stdin is closed,
//! the working directory is pinned to the project root, and the child is
//! killed on timeout.

use std::process::Stdio;
use std::time::{Duration, Instant};

use tokio::process::Command;
use tracing::debug;

use crate::error::{Result, ShellError};
use crate::truncate::{truncate_output, INTERNAL_MAX_CHARS, MODEL_MAX_CHARS};
use crate::types::ExecResult;

/// Hard upper bound on any command timeout.
pub const MAX_TIMEOUT_SECS: u64 = 300;

/// Run `command` synchronously and capture its output.
///
/// The caller is expected to have validated the command already — this
/// function only enforces mechanics (no shell, timeout, truncation).
pub async fn run_command(command: &str, timeout_secs: u64, cwd: &str) -> Result<ExecResult> {
    let tokens = shlex::split(command).ok_or_else(|| ShellError::CommandBlocked {
        reason: "command could not be tokenized".to_string(),
    })?;
    if tokens.is_empty() {
        return Err(ShellError::CommandBlocked {
            reason: "empty command".to_string(),
        });
    }

    let timeout = timeout_secs.min(MAX_TIMEOUT_SECS);
    debug!(command, timeout, "exec");

    let started = Instant::now();
    let child = Command::new(&tokens[0])
        .args(&tokens[1..])
        .current_dir(cwd)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| ShellError::Spawn(e.to_string()))?;

    let output = match tokio::time::timeout(Duration::from_secs(timeout), child.wait_with_output())
        .await
    {
        Ok(out) => out?,
        Err(_) => {
            // kill_on_drop reaps the child when the future is dropped.
            return Err(ShellError::Timeout { secs: timeout });
        }
    };

    let stdout = clamp(String::from_utf8_lossy(&output.stdout).into_owned());
    let stderr = clamp(String::from_utf8_lossy(&output.stderr).into_owned());

    Ok(ExecResult {
        exit_code: output.status.code().unwrap_or(-1),
        stdout: truncate_output(&stdout, MODEL_MAX_CHARS),
        stderr: truncate_output(&stderr, MODEL_MAX_CHARS),
        duration_ms: started.elapsed().as_millis() as u64,
    })
}

/// Cap a stream at the internal buffer limit before model-level truncation.
fn clamp(s: String) -> String {
    if s.len() <= INTERNAL_MAX_CHARS {
        s
    } else {
        truncate_output(&s, INTERNAL_MAX_CHARS)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn echo_captures_stdout_and_exit_code() {
        let r = run_command("echo hola", 10, ".").await.unwrap();
        assert_eq!(r.exit_code, 0);
        assert_eq!(r.stdout.trim(), "hola");
        assert!(r.stderr.is_empty());
    }

    #[tokio::test]
    async fn operators_are_inert_without_a_shell() {
        // Without a shell, "&&" is just an argument to echo.
        let r = run_command("echo a && echo b", 10, ".").await.unwrap();
        assert_eq!(r.stdout.trim(), "a && echo b");
    }

    #[tokio::test]
    async fn timeout_kills_the_child() {
        let err = run_command("sleep 30", 1, ".").await.unwrap_err();
        assert!(matches!(err, ShellError::Timeout { secs: 1 }));
    }

    #[tokio::test]
    async fn missing_binary_is_a_spawn_error() {
        let err = run_command("definitely-not-a-binary-xyz", 5, ".").await.unwrap_err();
        assert!(matches!(err, ShellError::Spawn(_)));
    }
}
