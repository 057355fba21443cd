//! Minimal scheduler for user-defined cron jobs.
//!
//! Jobs are restored from the repository at startup and checked once a
//! minute. The supported schedule shape is `HH:MM` (daily, UTC); a fired
//! job re-enters the normal pipeline as a synthetic inbound message so the
//! full classification/tool/guardrail machinery applies.

use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};
use uuid::Uuid;

use recado_agent::pipeline::{handle_inbound, InboundMessage};
use recado_agent::RuntimeState;
use recado_memory::types::TraceMessageType;

/// Restore active jobs and run the minute loop until shutdown.
pub async fn run_scheduler(state: Arc<RuntimeState>) {
    let jobs = match state.store.get_active_cron_jobs() {
        Ok(jobs) => jobs,
        Err(e) => {
            warn!(error = %e, "cron restore failed");
            return;
        }
    };
    info!(jobs = jobs.len(), "cron jobs restored");

    let mut last_fired_minute = String::new();
    let mut tick = tokio::time::interval(Duration::from_secs(60));
    loop {
        tick.tick().await;
        let now = chrono::Utc::now().format("%H:%M").to_string();
        if now == last_fired_minute {
            continue;
        }
        last_fired_minute = now.clone();

        // Reload each minute so CRUD changes apply without a restart.
        let jobs = match state.store.get_active_cron_jobs() {
            Ok(jobs) => jobs,
            Err(e) => {
                warn!(error = %e, "cron reload failed");
                continue;
            }
        };
        for job in jobs.iter().filter(|j| j.schedule == now) {
            info!(job = %job.name, handle = %job.handle, "cron job fired");
            let msg = InboundMessage {
                external_id: format!("cron-{}-{}", job.id, Uuid::new_v4()),
                from: job.handle.clone(),
                text: job.action.clone(),
                message_type: TraceMessageType::Text,
            };
            let state2 = Arc::clone(&state);
            state.track_background_task(async move {
                if let Err(e) = handle_inbound(state2, msg).await {
                    warn!(error = %e, "cron job pipeline failed");
                }
            });
        }
    }
}
