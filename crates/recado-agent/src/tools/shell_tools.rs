//! Shell tools (category: shell), gated by the `write_enabled` flag.
//!
//! Validation happens in the policy layer before these handlers run; here
//! we only enforce the feature flag and the mechanics.

use std::sync::Arc;

use async_trait::async_trait;

use recado_shell::exec::run_command;
use recado_shell::registry::ProcessRegistry;
use recado_shell::types::ProcessId;

use super::{Tool, ToolResult};

pub struct RunCommandTool {
    pub processes: Arc<ProcessRegistry>,
    pub write_enabled: bool,
    pub cwd: String,
}

#[async_trait]
impl Tool for RunCommandTool {
    fn name(&self) -> &str {
        "run_command"
    }
    fn description(&self) -> &str {
        "Run a shell command in the project directory (no shell operators)"
    }
    fn parameters(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "command": { "type": "string" },
                "timeout_secs": { "type": "integer", "default": 30 },
                "background": {
                    "type": "boolean",
                    "default": false,
                    "description": "Run detached; poll with manage_process"
                }
            },
            "required": ["command"]
        })
    }
    async fn execute(&self, args: serde_json::Value) -> ToolResult {
        if !self.write_enabled {
            return ToolResult::error("shell tools are disabled (write_enabled = false)");
        }
        let command = match args.get("command").and_then(|v| v.as_str()) {
            Some(c) if !c.trim().is_empty() => c,
            _ => return ToolResult::error("missing command"),
        };
        let background = args
            .get("background")
            .and_then(|v| v.as_bool())
            .unwrap_or(false);

        if background {
            return match self.processes.spawn(command, &self.cwd, "shell") {
                Ok(id) => ToolResult::success(format!(
                    "Started background process {id} (poll it with manage_process)"
                )),
                Err(e) => ToolResult::error(e.to_string()),
            };
        }

        let timeout = args
            .get("timeout_secs")
            .and_then(|v| v.as_u64())
            .unwrap_or(30);
        match run_command(command, timeout, &self.cwd).await {
            Ok(r) => {
                let mut out = format!("exit code: {}\n{}", r.exit_code, r.stdout);
                if !r.stderr.is_empty() {
                    out.push_str(&format!("\nstderr:\n{}", r.stderr));
                }
                if r.exit_code == 0 {
                    ToolResult::success(out)
                } else {
                    ToolResult::error(out)
                }
            }
            Err(e) => ToolResult::error(e.to_string()),
        }
    }
}

pub struct ManageProcessTool {
    pub processes: Arc<ProcessRegistry>,
    pub write_enabled: bool,
}

#[async_trait]
impl Tool for ManageProcessTool {
    fn name(&self) -> &str {
        "manage_process"
    }
    fn description(&self) -> &str {
        "List, poll, read logs of, or kill background processes"
    }
    fn parameters(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "action": { "type": "string", "enum": ["list", "poll", "log", "kill"] },
                "process_id": { "type": "string" },
                "limit": { "type": "integer", "default": 2000 }
            },
            "required": ["action"]
        })
    }
    async fn execute(&self, args: serde_json::Value) -> ToolResult {
        if !self.write_enabled {
            return ToolResult::error("shell tools are disabled (write_enabled = false)");
        }
        let action = args.get("action").and_then(|v| v.as_str()).unwrap_or("");
        let id = args
            .get("process_id")
            .and_then(|v| v.as_str())
            .map(ProcessId::from);

        match action {
            "list" => {
                let procs = self.processes.list();
                if procs.is_empty() {
                    return ToolResult::success("No background processes");
                }
                let lines: Vec<String> = procs
                    .iter()
                    .map(|p| {
                        format!(
                            "{} — `{}` {} (started {})",
                            p.id,
                            p.command,
                            match p.exit_code {
                                Some(code) => format!("exited {code}"),
                                None => "running".to_string(),
                            },
                            p.started_at
                        )
                    })
                    .collect();
                ToolResult::success(lines.join("\n"))
            }
            "poll" => {
                let Some(id) = id else {
                    return ToolResult::error("poll needs process_id");
                };
                match self.processes.poll(&id) {
                    Ok(p) => {
                        let mut out = String::new();
                        if !p.stdout.is_empty() {
                            out.push_str(&p.stdout);
                        }
                        if !p.stderr.is_empty() {
                            out.push_str(&format!("\nstderr:\n{}", p.stderr));
                        }
                        if out.is_empty() {
                            out.push_str("(no new output)");
                        }
                        if let Some(code) = p.exit_code {
                            out.push_str(&format!("\nprocess exited with code {code}"));
                        }
                        ToolResult::success(out)
                    }
                    Err(e) => ToolResult::error(e.to_string()),
                }
            }
            "log" => {
                let Some(id) = id else {
                    return ToolResult::error("log needs process_id");
                };
                let limit = args.get("limit").and_then(|v| v.as_u64()).unwrap_or(2000) as usize;
                match self.processes.log(&id, limit) {
                    Ok(text) => ToolResult::success(if text.is_empty() {
                        "(no output yet)".to_string()
                    } else {
                        text
                    }),
                    Err(e) => ToolResult::error(e.to_string()),
                }
            }
            "kill" => {
                let Some(id) = id else {
                    return ToolResult::error("kill needs process_id");
                };
                match self.processes.kill(&id) {
                    Ok(()) => ToolResult::success(format!("Sent SIGTERM to {id}")),
                    Err(e) => ToolResult::error(e.to_string()),
                }
            }
            other => ToolResult::error(format!("unknown action: {other}")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn disabled_flag_blocks_everything() {
        let tool = RunCommandTool {
            processes: Arc::new(ProcessRegistry::new()),
            write_enabled: false,
            cwd: ".".to_string(),
        };
        let r = tool.execute(serde_json::json!({"command": "echo hi"})).await;
        assert!(!r.success);
        assert!(r.content.contains("disabled"));
    }

    #[tokio::test]
    async fn oneshot_returns_exit_code_and_output() {
        let tool = RunCommandTool {
            processes: Arc::new(ProcessRegistry::new()),
            write_enabled: true,
            cwd: ".".to_string(),
        };
        let r = tool.execute(serde_json::json!({"command": "echo hola"})).await;
        assert!(r.success);
        assert!(r.content.contains("exit code: 0"));
        assert!(r.content.contains("hola"));
    }

    #[tokio::test]
    async fn background_then_poll() {
        let processes = Arc::new(ProcessRegistry::new());
        let run = RunCommandTool {
            processes: Arc::clone(&processes),
            write_enabled: true,
            cwd: ".".to_string(),
        };
        let manage = ManageProcessTool {
            processes,
            write_enabled: true,
        };
        let r = run
            .execute(serde_json::json!({"command": "echo fondo", "background": true}))
            .await;
        assert!(r.success);
        let id = r.content.split_whitespace().nth(3).unwrap().to_string();
        tokio::time::sleep(std::time::Duration::from_millis(300)).await;
        let p = manage
            .execute(serde_json::json!({"action": "poll", "process_id": id}))
            .await;
        assert!(p.success);
        assert!(p.content.contains("fondo"));
        assert!(p.content.contains("exited with code 0"));
    }
}
