//! Tool-call loop detection for the reactive agent mode.
//!
//! A ring buffer of the last 20 `(tool_name, params_hash)` observations
//! feeds two detectors: plain repetition (warn at 3, circuit-break at 5)
//! and A→B→A→B ping-pong alternation (warn at length 4).

use std::collections::VecDeque;

use tracing::warn;

const WINDOW: usize = 20;
const REPEAT_WARN: usize = 3;
const REPEAT_BREAK: usize = 5;
const PINGPONG_LEN: usize = 4;

/// What the caller must do after an observation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoopAction {
    Continue,
    /// Inject a warning system message into the next round.
    Warn { detector: &'static str, message: String },
    /// Abort the session with status failed.
    CircuitBreak { detector: &'static str },
}

#[derive(Default)]
pub struct LoopDetector {
    window: VecDeque<(String, u64)>,
}

impl LoopDetector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one call and evaluate the detectors. The break takes priority
    /// over a warning when both would fire.
    pub fn observe(&mut self, session_id: &str, tool: &str, params_hash: u64) -> LoopAction {
        self.window.push_back((tool.to_string(), params_hash));
        if self.window.len() > WINDOW {
            self.window.pop_front();
        }

        let entry = (tool.to_string(), params_hash);
        let repeats = self.window.iter().filter(|e| **e == entry).count();
        if repeats >= REPEAT_BREAK {
            warn!(
                session_id,
                detector = "genericRepeat",
                action = "circuit_breaker",
                tool,
                repeats,
                "loop detected — aborting session"
            );
            return LoopAction::CircuitBreak {
                detector: "genericRepeat",
            };
        }
        if repeats >= REPEAT_WARN {
            warn!(
                session_id,
                detector = "genericRepeat",
                action = "warn",
                tool,
                repeats,
                "repeated identical tool call"
            );
            return LoopAction::Warn {
                detector: "genericRepeat",
                message: format!(
                    "You have called `{tool}` with identical arguments {repeats} times. \
                     Change your approach instead of repeating it."
                ),
            };
        }

        if self.window.len() >= PINGPONG_LEN {
            let tail: Vec<&(String, u64)> = self.window.iter().rev().take(PINGPONG_LEN).collect();
            let a = tail[0];
            let b = tail[1];
            if a != b && tail[2] == a && tail[3] == b {
                warn!(
                    session_id,
                    detector = "pingPong",
                    action = "warn",
                    first = %a.0,
                    second = %b.0,
                    "alternating tool-call pattern"
                );
                return LoopAction::Warn {
                    detector: "pingPong",
                    message: format!(
                        "You are alternating between `{}` and `{}` without progress. \
                         Step back and try something different.",
                        b.0, a.0
                    ),
                };
            }
        }

        LoopAction::Continue
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn obs(d: &mut LoopDetector, tool: &str, hash: u64) -> LoopAction {
        d.observe("s1", tool, hash)
    }

    #[test]
    fn third_identical_call_warns_fifth_breaks() {
        let mut d = LoopDetector::new();
        assert_eq!(obs(&mut d, "list_source_files", 7), LoopAction::Continue);
        assert_eq!(obs(&mut d, "list_source_files", 7), LoopAction::Continue);
        assert!(matches!(
            obs(&mut d, "list_source_files", 7),
            LoopAction::Warn { detector: "genericRepeat", .. }
        ));
        assert!(matches!(
            obs(&mut d, "list_source_files", 7),
            LoopAction::Warn { .. }
        ));
        assert!(matches!(
            obs(&mut d, "list_source_files", 7),
            LoopAction::CircuitBreak { detector: "genericRepeat" }
        ));
    }

    #[test]
    fn same_tool_different_args_does_not_trip() {
        let mut d = LoopDetector::new();
        for hash in 0..10u64 {
            assert_eq!(obs(&mut d, "read_source_file", hash), LoopAction::Continue);
        }
    }

    #[test]
    fn ping_pong_alternation_warns() {
        let mut d = LoopDetector::new();
        assert_eq!(obs(&mut d, "a", 1), LoopAction::Continue);
        assert_eq!(obs(&mut d, "b", 2), LoopAction::Continue);
        assert_eq!(obs(&mut d, "a", 1), LoopAction::Continue);
        assert!(matches!(
            obs(&mut d, "b", 2),
            LoopAction::Warn { detector: "pingPong", .. }
        ));
    }

    #[test]
    fn window_is_bounded() {
        let mut d = LoopDetector::new();
        obs(&mut d, "x", 1);
        obs(&mut d, "x", 1);
        // Push the two old entries out of the window entirely.
        for i in 0..WINDOW as u64 {
            obs(&mut d, "other", 100 + i);
        }
        // The counter restarts — no stale memory of the old calls.
        assert_eq!(obs(&mut d, "x", 1), LoopAction::Continue);
    }
}
