//! Human-in-the-loop rendezvous.
//!
//! One pending request per handle: an agent-side caller blocks in
//! `request_user_approval` while the dispatcher routes the user's next
//! message through `resolve`. The dispatcher consults `resolve` before any
//! pipeline work, so an approval answer never becomes a new conversation
//! turn.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::Notify;
use tracing::{info, warn};

use crate::messaging::MessagingClient;

/// Sentinel returned when the user does not answer in time.
pub const TIMEOUT_SENTINEL: &str = "TIMEOUT";

/// Default wait for a human answer.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(120);

struct Pending {
    notify: Arc<Notify>,
    slot: Arc<Mutex<Option<String>>>,
}

/// Per-handle single-shot request/response coordinator.
#[derive(Default)]
pub struct HitlCoordinator {
    pending: DashMap<String, Pending>,
}

impl HitlCoordinator {
    pub fn new() -> Self {
        Self::default()
    }

    /// True when a request is pending for `handle`.
    pub fn is_waiting(&self, handle: &str) -> bool {
        self.pending.contains_key(handle)
    }

    /// Send `question` to the user and block until they answer or the
    /// timeout elapses. Returns the answer text, or `TIMEOUT_SENTINEL`.
    pub async fn request_user_approval(
        &self,
        handle: &str,
        question: &str,
        messaging: &dyn MessagingClient,
        timeout: Duration,
    ) -> String {
        let notify = Arc::new(Notify::new());
        let slot: Arc<Mutex<Option<String>>> = Arc::new(Mutex::new(None));
        self.pending.insert(
            handle.to_string(),
            Pending {
                notify: Arc::clone(&notify),
                slot: Arc::clone(&slot),
            },
        );

        if let Err(e) = messaging.send_message(handle, question).await {
            warn!(error = %e, handle, "failed to deliver approval question");
        }

        let answer = match tokio::time::timeout(timeout, notify.notified()).await {
            Ok(_) => slot
                .lock()
                .unwrap()
                .take()
                .unwrap_or_else(|| TIMEOUT_SENTINEL.to_string()),
            Err(_) => {
                warn!(handle, "approval request timed out");
                TIMEOUT_SENTINEL.to_string()
            }
        };

        self.pending.remove(handle);
        answer
    }

    /// Deposit `text` as the answer for a pending request. Returns `true`
    /// when the message was consumed (and must not reach the pipeline).
    pub fn resolve(&self, handle: &str, text: &str) -> bool {
        let Some(pending) = self.pending.get(handle) else {
            return false;
        };
        let mut slot = pending.slot.lock().unwrap();
        if slot.is_some() {
            // Already answered; later messages flow to the pipeline.
            return false;
        }
        *slot = Some(text.to_string());
        pending.notify.notify_one();
        info!(handle, "hitl request resolved");
        true
    }
}

/// Whether a free-form user answer counts as approval. `/approve` and
/// `/reject` map here too — they are sugar over the same rendezvous.
pub fn is_affirmative(text: &str) -> bool {
    let t = text.trim().trim_start_matches('/').to_lowercase();
    matches!(
        t.as_str(),
        "approve" | "approved" | "yes" | "y" | "ok" | "si" | "sí" | "dale" | "aprobar" | "apruebo"
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::Mutex as StdMutex;

    struct RecordingMessenger {
        sent: StdMutex<Vec<(String, String)>>,
    }

    #[async_trait]
    impl MessagingClient for RecordingMessenger {
        async fn send_message(
            &self,
            to: &str,
            text: &str,
        ) -> recado_core::Result<Option<String>> {
            self.sent
                .lock()
                .unwrap()
                .push((to.to_string(), text.to_string()));
            Ok(Some("ext-1".to_string()))
        }
    }

    fn messenger() -> RecordingMessenger {
        RecordingMessenger {
            sent: StdMutex::new(Vec::new()),
        }
    }

    #[tokio::test]
    async fn answer_reaches_the_waiting_caller() {
        let hitl = Arc::new(HitlCoordinator::new());
        let msg = messenger();

        let waiter = {
            let hitl = Arc::clone(&hitl);
            tokio::spawn(async move {
                hitl.request_user_approval("h", "Run `sudo apt update`?", &messenger(), Duration::from_secs(5))
                    .await
            })
        };
        // Wait until the request is registered.
        for _ in 0..50 {
            if hitl.is_waiting("h") {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(hitl.resolve("h", "Aprobar"));
        assert_eq!(waiter.await.unwrap(), "Aprobar");
        assert!(!hitl.is_waiting("h"));
        drop(msg);
    }

    #[tokio::test]
    async fn timeout_returns_sentinel_and_clears_state() {
        let hitl = HitlCoordinator::new();
        let answer = hitl
            .request_user_approval("h", "?", &messenger(), Duration::from_millis(50))
            .await;
        assert_eq!(answer, TIMEOUT_SENTINEL);
        assert!(!hitl.is_waiting("h"));
        // After timeout the next message is NOT consumed.
        assert!(!hitl.resolve("h", "yes"));
    }

    #[tokio::test]
    async fn resolve_without_pending_is_a_noop() {
        let hitl = HitlCoordinator::new();
        assert!(!hitl.resolve("h", "hola"));
    }

    #[test]
    fn affirmative_classification() {
        for yes in ["Aprobar", "yes", "/approve", "sí", "ok", "dale"] {
            assert!(is_affirmative(yes), "{yes}");
        }
        for no in ["no", "/reject", "rechazar", "stop", "TIMEOUT"] {
            assert!(!is_affirmative(no), "{no}");
        }
    }
}
