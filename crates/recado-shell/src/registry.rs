//! Background process registry.
//!
//! Processes started in background mode are tracked here and shared between
//! their creator session (which polls and appends) and the GC loop (which
//! may observe and terminate). All mutation of the map goes through one
//! short-lived lock.

use std::collections::HashMap;
use std::process::Stdio;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tokio::io::AsyncReadExt;
use tokio::process::Command;
use tracing::{info, warn};

use crate::error::{Result, ShellError};
use crate::truncate::INTERNAL_MAX_CHARS;
use crate::types::{PollResult, ProcessId, ProcessInfo};

/// System-wide cap on concurrent background processes.
pub const MAX_BACKGROUND: usize = 5;
/// Absolute age after which a still-running process is killed.
pub const MAX_AGE: Duration = Duration::from_secs(30 * 60);
/// Terminated records are dropped after this long.
pub const CLEANUP_AGE: Duration = Duration::from_secs(10 * 60);
/// GC cadence.
pub const GC_INTERVAL: Duration = Duration::from_secs(5 * 60);

/// Output + exit state mutated by the reader/waiter tasks.
#[derive(Default)]
struct ProcShared {
    stdout: String,
    stderr: String,
    exit_code: Option<i32>,
    terminated_at: Option<Instant>,
}

struct ProcRecord {
    command: String,
    owner: String,
    started_at: String,
    started: Instant,
    pid: Option<u32>,
    stdout_offset: usize,
    stderr_offset: usize,
    shared: Arc<Mutex<ProcShared>>,
}

/// Registry of all background processes. Process-wide singleton.
pub struct ProcessRegistry {
    procs: Mutex<HashMap<ProcessId, ProcRecord>>,
}

impl ProcessRegistry {
    pub fn new() -> Self {
        Self {
            procs: Mutex::new(HashMap::new()),
        }
    }

    /// Spawn `command` in the background. Rejects when `MAX_BACKGROUND`
    /// processes are already running.
    pub fn spawn(&self, command: &str, cwd: &str, owner: &str) -> Result<ProcessId> {
        let tokens = shlex::split(command).ok_or_else(|| ShellError::CommandBlocked {
            reason: "command could not be tokenized".to_string(),
        })?;
        if tokens.is_empty() {
            return Err(ShellError::CommandBlocked {
                reason: "empty command".to_string(),
            });
        }

        let mut procs = self.procs.lock().unwrap();
        let running = procs
            .values()
            .filter(|p| p.shared.lock().unwrap().exit_code.is_none())
            .count();
        if running >= MAX_BACKGROUND {
            return Err(ShellError::TooManyProcesses {
                limit: MAX_BACKGROUND,
            });
        }

        let mut child = Command::new(&tokens[0])
            .args(&tokens[1..])
            .current_dir(cwd)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| ShellError::Spawn(e.to_string()))?;

        let id = ProcessId::new();
        let pid = child.id();
        let shared = Arc::new(Mutex::new(ProcShared::default()));

        if let Some(stdout) = child.stdout.take() {
            tokio::spawn(pump(stdout, Arc::clone(&shared), StreamKind::Stdout));
        }
        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(pump(stderr, Arc::clone(&shared), StreamKind::Stderr));
        }
        {
            let shared = Arc::clone(&shared);
            tokio::spawn(async move {
                let code = match child.wait().await {
                    Ok(status) => status.code().unwrap_or(-1),
                    Err(_) => -1,
                };
                let mut s = shared.lock().unwrap();
                s.exit_code = Some(code);
                s.terminated_at = Some(Instant::now());
            });
        }

        info!(process_id = %id, command, pid, "background process started");
        procs.insert(
            id.clone(),
            ProcRecord {
                command: command.to_string(),
                owner: owner.to_string(),
                started_at: chrono::Utc::now().to_rfc3339(),
                started: Instant::now(),
                pid,
                stdout_offset: 0,
                stderr_offset: 0,
                shared,
            },
        );
        Ok(id)
    }

    pub fn list(&self) -> Vec<ProcessInfo> {
        let procs = self.procs.lock().unwrap();
        procs
            .iter()
            .map(|(id, p)| {
                let s = p.shared.lock().unwrap();
                ProcessInfo {
                    id: id.clone(),
                    command: p.command.clone(),
                    started_at: p.started_at.clone(),
                    running: s.exit_code.is_none(),
                    exit_code: s.exit_code,
                }
            })
            .collect()
    }

    /// Incremental output since the previous poll, plus exit status once the
    /// process has terminated.
    pub fn poll(&self, id: &ProcessId) -> Result<PollResult> {
        let mut procs = self.procs.lock().unwrap();
        let rec = procs
            .get_mut(id)
            .ok_or_else(|| ShellError::ProcessNotFound { id: id.to_string() })?;
        let s = rec.shared.lock().unwrap();
        let stdout = s.stdout[rec.stdout_offset.min(s.stdout.len())..].to_string();
        let stderr = s.stderr[rec.stderr_offset.min(s.stderr.len())..].to_string();
        let exit_code = s.exit_code;
        drop(s);
        rec.stdout_offset += stdout.len();
        rec.stderr_offset += stderr.len();
        Ok(PollResult {
            id: id.clone(),
            stdout,
            stderr,
            exit_code,
        })
    }

    /// Tail of the full captured output (both streams), up to `limit` chars.
    pub fn log(&self, id: &ProcessId, limit: usize) -> Result<String> {
        let procs = self.procs.lock().unwrap();
        let rec = procs
            .get(id)
            .ok_or_else(|| ShellError::ProcessNotFound { id: id.to_string() })?;
        let s = rec.shared.lock().unwrap();
        let combined = if s.stderr.is_empty() {
            s.stdout.clone()
        } else {
            format!("{}\n--- stderr ---\n{}", s.stdout, s.stderr)
        };
        let start = combined.len().saturating_sub(limit);
        let mut at = start;
        while at < combined.len() && !combined.is_char_boundary(at) {
            at += 1;
        }
        Ok(combined[at..].to_string())
    }

    /// SIGTERM the process, escalating to SIGKILL after a short grace
    /// period if it has not exited.
    pub fn kill(&self, id: &ProcessId) -> Result<()> {
        let (pid, shared) = {
            let procs = self.procs.lock().unwrap();
            let rec = procs
                .get(id)
                .ok_or_else(|| ShellError::ProcessNotFound { id: id.to_string() })?;
            (rec.pid, Arc::clone(&rec.shared))
        };
        let Some(pid) = pid else {
            return Ok(());
        };
        if shared.lock().unwrap().exit_code.is_some() {
            return Ok(());
        }
        // SAFETY: plain signal send to a pid we spawned.
        unsafe {
            libc::kill(pid as i32, libc::SIGTERM);
        }
        info!(process_id = %id, pid, "sent SIGTERM");
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(2)).await;
            if shared.lock().unwrap().exit_code.is_none() {
                warn!(pid, "escalating to SIGKILL");
                unsafe {
                    libc::kill(pid as i32, libc::SIGKILL);
                }
            }
        });
        Ok(())
    }

    /// One GC pass: kill over-age processes, drop stale terminated records.
    /// Returns (killed, removed) for logging.
    pub fn gc_tick(&self) -> (usize, usize) {
        let over_age: Vec<ProcessId> = {
            let procs = self.procs.lock().unwrap();
            procs
                .iter()
                .filter(|(_, p)| {
                    p.started.elapsed() > MAX_AGE && p.shared.lock().unwrap().exit_code.is_none()
                })
                .map(|(id, _)| id.clone())
                .collect()
        };
        for id in &over_age {
            warn!(process_id = %id, "killing over-age background process");
            let _ = self.kill(id);
        }

        let mut procs = self.procs.lock().unwrap();
        let before = procs.len();
        procs.retain(|_, p| {
            let s = p.shared.lock().unwrap();
            match s.terminated_at {
                Some(t) => t.elapsed() < CLEANUP_AGE,
                None => true,
            }
        });
        (over_age.len(), before - procs.len())
    }

    /// Kill everything still running — called on shutdown.
    pub fn kill_all(&self) {
        let ids: Vec<ProcessId> = {
            let procs = self.procs.lock().unwrap();
            procs.keys().cloned().collect()
        };
        for id in ids {
            let _ = self.kill(&id);
        }
    }

    /// Snapshot owner of a process (for audit attribution).
    pub fn owner(&self, id: &ProcessId) -> Option<String> {
        let procs = self.procs.lock().unwrap();
        procs.get(id).map(|p| p.owner.clone())
    }
}

impl Default for ProcessRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Periodic GC loop. Runs until the process exits.
pub async fn run_gc(registry: Arc<ProcessRegistry>) {
    let mut tick = tokio::time::interval(GC_INTERVAL);
    loop {
        tick.tick().await;
        let (killed, removed) = registry.gc_tick();
        if killed > 0 || removed > 0 {
            info!(killed, removed, "process registry gc");
        }
    }
}

enum StreamKind {
    Stdout,
    Stderr,
}

/// Drain one child stream into the shared buffer, capped at the internal
/// limit — further output is discarded, not buffered.
async fn pump(
    mut stream: impl tokio::io::AsyncRead + Unpin,
    shared: Arc<Mutex<ProcShared>>,
    kind: StreamKind,
) {
    let mut buf = [0u8; 4096];
    loop {
        match stream.read(&mut buf).await {
            Ok(0) | Err(_) => break,
            Ok(n) => {
                let chunk = String::from_utf8_lossy(&buf[..n]).into_owned();
                let mut s = shared.lock().unwrap();
                let target = match kind {
                    StreamKind::Stdout => &mut s.stdout,
                    StreamKind::Stderr => &mut s.stderr,
                };
                if target.len() < INTERNAL_MAX_CHARS {
                    let room = INTERNAL_MAX_CHARS - target.len();
                    if chunk.len() <= room {
                        target.push_str(&chunk);
                    } else {
                        let mut end = room;
                        while end > 0 && !chunk.is_char_boundary(end) {
                            end -= 1;
                        }
                        target.push_str(&chunk[..end]);
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn poll_is_incremental_and_reports_exit() {
        let reg = ProcessRegistry::new();
        let id = reg.spawn("echo fondo", ".", "h").unwrap();
        // Give the reader and waiter tasks time to drain the pipe.
        tokio::time::sleep(Duration::from_millis(300)).await;

        let first = reg.poll(&id).unwrap();
        assert_eq!(first.stdout.trim(), "fondo");
        assert_eq!(first.exit_code, Some(0));

        let second = reg.poll(&id).unwrap();
        assert!(second.stdout.is_empty());
        assert_eq!(second.exit_code, Some(0));
    }

    #[tokio::test]
    async fn concurrency_cap_is_enforced() {
        let reg = ProcessRegistry::new();
        let mut ids = Vec::new();
        for _ in 0..MAX_BACKGROUND {
            ids.push(reg.spawn("sleep 5", ".", "h").unwrap());
        }
        let err = reg.spawn("sleep 5", ".", "h").unwrap_err();
        assert!(matches!(err, ShellError::TooManyProcesses { limit: 5 }));
        for id in &ids {
            reg.kill(id).unwrap();
        }
    }

    #[tokio::test]
    async fn kill_terminates_a_sleeper() {
        let reg = ProcessRegistry::new();
        let id = reg.spawn("sleep 30", ".", "h").unwrap();
        reg.kill(&id).unwrap();
        tokio::time::sleep(Duration::from_millis(500)).await;
        let poll = reg.poll(&id).unwrap();
        assert!(poll.exit_code.is_some());
    }

    #[tokio::test]
    async fn unknown_process_is_an_error() {
        let reg = ProcessRegistry::new();
        let err = reg.poll(&ProcessId::from("missing")).unwrap_err();
        assert!(matches!(err, ShellError::ProcessNotFound { .. }));
    }
}
