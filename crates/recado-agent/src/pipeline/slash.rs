//! Slash-command handling, intercepted before the pipeline.

use std::sync::Arc;

use tracing::info;

use crate::hitl::is_affirmative;
use crate::state::RuntimeState;

/// Handle a `/command`. Returns the reply to send, or `None` when the
/// command produced no user-visible output.
pub async fn handle_command(state: &Arc<RuntimeState>, handle: &str, text: &str) -> Option<String> {
    let command = text.split_whitespace().next().unwrap_or(text);
    match command {
        "/agent" => {
            let objective = text.trim_start_matches("/agent").trim().to_string();
            if objective.is_empty() {
                return Some("Uso: /agent <objetivo>".to_string());
            }
            match state.sessions.create_session(
                handle,
                &objective,
                state.config.agent.max_iterations,
            ) {
                Ok((session, cancel)) => {
                    let state2 = Arc::clone(state);
                    let state3 = Arc::clone(state);
                    let handle2 = handle.to_string();
                    let timeout = std::time::Duration::from_secs(
                        state.config.agent.session_timeout_secs,
                    );
                    state.track_background_task(async move {
                        let fut = crate::session::runtime::run_agent_session(
                            state2, session, cancel,
                        );
                        tokio::pin!(fut);
                        tokio::select! {
                            _ = &mut fut => {}
                            _ = tokio::time::sleep(timeout) => {
                                // Signal cancellation, then let the session
                                // unwind through its normal checkpoints.
                                state3.sessions.cancel_session(&handle2);
                                fut.await;
                            }
                        }
                    });
                    Some("🤖 Sesión de agente iniciada. Te aviso cuando termine (/status para ver el progreso, /cancel para frenarla).".to_string())
                }
                Err(e) => Some(format!("No pude iniciar la sesión: {e}")),
            }
        }
        "/cancel" => {
            if state.sessions.cancel_session(handle) {
                Some("🛑 Sesión de agente cancelada.".to_string())
            } else {
                Some("No hay ninguna sesión de agente activa.".to_string())
            }
        }
        // /approve and /reject resolve a pending approval exactly like free
        // text would; with nothing pending they explain themselves.
        "/approve" | "/reject" => {
            if state.hitl.resolve(handle, command) {
                let verdict = if is_affirmative(command) {
                    "✅ Aprobado."
                } else {
                    "❌ Rechazado."
                };
                Some(verdict.to_string())
            } else {
                Some("No hay ninguna aprobación pendiente.".to_string())
            }
        }
        "/status" => {
            match state.sessions.get_active(handle) {
                Some(session) => {
                    let s = session.lock().unwrap();
                    Some(format!(
                        "Sesión {}: {:?}, iteración {}/{}\nObjetivo: {}",
                        s.session_id, s.status, s.iteration, s.max_iterations, s.objective
                    ))
                }
                None => Some("No hay ninguna sesión de agente activa.".to_string()),
            }
        }
        "/memstats" => {
            let memories = state.store.list_memories().map(|m| m.len()).unwrap_or(0);
            let stats = state.store.get_dataset_stats().unwrap_or_default();
            Some(format!(
                "Memorias: {memories}\nDataset — golden: {}, failure: {}, correction: {}",
                stats.golden, stats.failure, stats.correction
            ))
        }
        other => {
            info!(command = other, "unknown slash command");
            Some(format!("Comando desconocido: {other}"))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::dispatch::testutil::state_with;
    use crate::tools::testutil::registry_with;

    #[tokio::test]
    async fn agent_command_starts_a_session() {
        let (state, _) = state_with(vec![], registry_with(&[("notes", &["add_note"])]));
        let reply = handle_command(&state, "h", "/agent ordenar mis notas")
            .await
            .unwrap();
        assert!(reply.contains("iniciada"));
        // A second start is rejected while the first is non-terminal.
        let reply = handle_command(&state, "h", "/agent otra cosa").await.unwrap();
        assert!(reply.contains("No pude"));
    }

    #[tokio::test]
    async fn agent_command_needs_an_objective() {
        let (state, _) = state_with(vec![], registry_with(&[("notes", &["add_note"])]));
        let reply = handle_command(&state, "h", "/agent").await.unwrap();
        assert!(reply.contains("Uso"));
    }

    #[tokio::test]
    async fn cancel_without_session_reports_it() {
        let (state, _) = state_with(vec![], registry_with(&[("notes", &["add_note"])]));
        let reply = handle_command(&state, "h", "/cancel").await.unwrap();
        assert!(reply.contains("No hay"));
    }

    #[tokio::test]
    async fn cancel_stops_an_active_session() {
        let (state, _) = state_with(vec![], registry_with(&[("notes", &["add_note"])]));
        state.sessions.create_session("h", "objetivo", 15).unwrap();
        let reply = handle_command(&state, "h", "/cancel").await.unwrap();
        assert!(reply.contains("cancelada"));
    }

    #[tokio::test]
    async fn approve_without_pending_explains() {
        let (state, _) = state_with(vec![], registry_with(&[("notes", &["add_note"])]));
        let reply = handle_command(&state, "h", "/approve").await.unwrap();
        assert!(reply.contains("pendiente"));
    }

    #[tokio::test]
    async fn status_reports_the_active_session() {
        let (state, _) = state_with(vec![], registry_with(&[("notes", &["add_note"])]));
        state
            .sessions
            .create_session("h", "listar archivos", 15)
            .unwrap();
        let reply = handle_command(&state, "h", "/status").await.unwrap();
        assert!(reply.contains("listar archivos"));
    }
}
