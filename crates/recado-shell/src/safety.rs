//! Command validation for AI agent shell access.
//!
//! Decides BEFORE execution whether a command runs, is refused, or needs a
//! human in the loop. The goal is not an airtight sandbox — that requires
//! OS-level namespacing — but to catch the footgun patterns an LLM might
//! emit and to route everything ambiguous through approval.
//!
//! Decision order:
//!   1. Tokenize without a shell. Unparseable input → deny.
//!   2. Base token on the denylist, or the full string matching a dangerous
//!      pattern → deny with a reason.
//!   3. Any shell operator (`|`, `>>`, `&&`, `||`, `;`, `$(`, `` ` ``) →
//!      ask. Operators would only take effect under a shell we never spawn,
//!      but a command that wants them is already suspicious.
//!   4. Base token on the configured allowlist → allow.
//!   5. Everything else → ask.

use serde::Serialize;

/// Outcome of validating one command string.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase", tag = "decision")]
pub enum CommandDecision {
    Allow,
    Deny { reason: String },
    Ask { reason: String },
}

/// Base commands that are never run, regardless of arguments.
const DENY_BASES: &[&str] = &[
    "rm", "sudo", "chmod", "chown", "mkfs", "dd", "shutdown", "reboot", "systemctl", "mount",
    "umount",
];

/// `(substring_pattern, reason)` pairs checked against the lowercased full
/// command string. First match wins.
const DENY_PATTERNS: &[(&str, &str)] = &[
    ("rm -rf", "recursive forced removal"),
    ("> /dev/", "writes directly to a device node"),
    (":(){", "fork bomb"),
    ("/etc/passwd", "touches the system password file"),
    ("/etc/shadow", "touches the system shadow file"),
    ("mkfs", "creates a filesystem, wiping existing data"),
    ("| sh", "pipes content into a shell interpreter"),
    ("| bash", "pipes content into a shell interpreter"),
    ("kill -9 1", "kills PID 1"),
];

/// Shell operators that chain or redirect execution.
const SHELL_OPERATORS: &[&str] = &["|", ">>", ">", "&&", "||", ";", "$(", "`"];

/// Validate `command` against the denylist, operator scan, and `allowlist`.
pub fn validate_command(command: &str, allowlist: &[String]) -> CommandDecision {
    let trimmed = command.trim();
    if trimmed.is_empty() {
        return CommandDecision::Deny {
            reason: "empty command".to_string(),
        };
    }

    // 1. Tokenize without a shell. shlex rejects unbalanced quoting — if we
    // can't parse it, we don't run it.
    let tokens = match shlex::split(trimmed) {
        Some(t) if !t.is_empty() => t,
        _ => {
            return CommandDecision::Deny {
                reason: "command could not be tokenized".to_string(),
            }
        }
    };

    let lower = trimmed.to_lowercase();
    let base = tokens[0]
        .rsplit('/')
        .next()
        .unwrap_or(&tokens[0])
        .to_lowercase();

    // 2. Denylist: base token, then full-string patterns.
    if DENY_BASES.contains(&base.as_str()) {
        return CommandDecision::Deny {
            reason: format!("{base} is not allowed"),
        };
    }
    for (pattern, reason) in DENY_PATTERNS {
        if lower.contains(pattern) {
            return CommandDecision::Deny {
                reason: format!("{reason} (matched `{pattern}`)"),
            };
        }
    }

    // 3. Shell operators force approval.
    if let Some(op) = SHELL_OPERATORS.iter().find(|op| lower.contains(**op)) {
        return CommandDecision::Ask {
            reason: format!("contains shell operator `{op}`"),
        };
    }

    // 4. Allowlisted base commands run directly.
    if allowlist.iter().any(|a| a.eq_ignore_ascii_case(&base)) {
        return CommandDecision::Allow;
    }

    // 5. Unknown commands need a human.
    CommandDecision::Ask {
        reason: format!("{base} is not on the allowlist"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn allow() -> Vec<String> {
        ["git", "ls", "cat", "grep", "pytest", "echo", "python"]
            .iter()
            .map(|s| s.to_string())
            .collect()
    }

    // --- Allow path ---

    #[test]
    fn allowlisted_plain_command_passes() {
        assert_eq!(validate_command("git status --short", &allow()), CommandDecision::Allow);
        assert_eq!(validate_command("ls -la /tmp", &allow()), CommandDecision::Allow);
    }

    #[test]
    fn allowlist_matches_basename_of_absolute_path() {
        assert_eq!(validate_command("/usr/bin/git log", &allow()), CommandDecision::Allow);
    }

    // --- Deny path ---

    #[test]
    fn deny_rm_rf_root() {
        let d = validate_command("rm -rf /", &allow());
        assert!(matches!(d, CommandDecision::Deny { .. }));
    }

    #[test]
    fn deny_sudo() {
        let d = validate_command("sudo apt update", &allow());
        assert!(matches!(d, CommandDecision::Deny { ref reason } if reason.contains("sudo")));
    }

    #[test]
    fn deny_base_is_case_insensitive() {
        assert!(matches!(
            validate_command("SUDO apt update", &allow()),
            CommandDecision::Deny { .. }
        ));
    }

    #[test]
    fn deny_device_redirect_even_with_allowlisted_base() {
        // "echo" is allowlisted but "> /dev/" is a denylist pattern, which is
        // checked before the allowlist ever applies.
        let d = validate_command("echo x > /dev/sda", &allow());
        assert!(matches!(d, CommandDecision::Deny { .. }));
    }

    #[test]
    fn deny_unbalanced_quotes() {
        let d = validate_command("echo 'unterminated", &allow());
        assert!(matches!(d, CommandDecision::Deny { ref reason } if reason.contains("tokenized")));
    }

    #[test]
    fn deny_etc_passwd() {
        assert!(matches!(
            validate_command("cat /etc/passwd", &allow()),
            CommandDecision::Deny { .. }
        ));
    }

    // --- Ask path ---

    #[test]
    fn operators_downgrade_allowlisted_command_to_ask() {
        let d = validate_command("grep -r foo . | wc -l", &allow());
        assert!(matches!(d, CommandDecision::Ask { .. }));
        let d = validate_command("echo hi && echo bye", &allow());
        assert!(matches!(d, CommandDecision::Ask { .. }));
    }

    #[test]
    fn unknown_command_asks() {
        let d = validate_command("terraform apply", &allow());
        assert!(matches!(d, CommandDecision::Ask { ref reason } if reason.contains("terraform")));
    }

    #[test]
    fn command_substitution_asks() {
        assert!(matches!(
            validate_command("echo $(whoami)", &allow()),
            CommandDecision::Ask { .. }
        ));
    }
}
