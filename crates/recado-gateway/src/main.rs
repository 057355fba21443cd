//! recado daemon: webhook server + background loops + graceful shutdown.

mod app;
mod cron;
mod http;

use std::sync::Arc;
use std::time::Duration;

use axum::routing::{get, post};
use axum::Router;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use recado_core::RecadoConfig;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config_path = std::env::args().nth(1);
    let config = RecadoConfig::load(config_path.as_deref())?;
    let bind = format!("{}:{}", config.gateway.bind, config.gateway.port);
    let grace = Duration::from_secs(config.gateway.shutdown_grace_secs);

    let state = app::build_state(config)?;

    // Housekeeping loops: expired self-corrections, old traces, stale
    // background processes, user cron jobs.
    {
        let state2 = Arc::clone(&state);
        tokio::spawn(async move {
            let mut tick = tokio::time::interval(Duration::from_secs(3600));
            loop {
                tick.tick().await;
                match state2.store.cleanup_expired_self_corrections(7) {
                    Ok(n) if n > 0 => info!(n, "expired self-corrections deactivated"),
                    Ok(_) => {}
                    Err(e) => warn!(error = %e, "self-correction cleanup failed"),
                }
                match state2.store.prune_traces(state2.config.tracing.retention_days) {
                    Ok(n) if n > 0 => info!(n, "old traces pruned"),
                    Ok(_) => {}
                    Err(e) => warn!(error = %e, "trace pruning failed"),
                }
            }
        });
    }
    tokio::spawn(recado_shell::registry::run_gc(Arc::clone(&state.processes)));
    tokio::spawn(cron::run_scheduler(Arc::clone(&state)));

    let router = Router::new()
        .route("/webhook", post(http::webhooks::receive))
        .route("/healthz", get(http::health::healthz))
        .layer(tower_http::trace::TraceLayer::new_for_http())
        .with_state(Arc::clone(&state));

    let listener = tokio::net::TcpListener::bind(&bind).await?;
    info!(bind, "recado listening");

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // Teardown in reverse order: stop accepting (done), drain tracked
    // work, kill stray processes. The recorder flushes as state drops.
    info!("draining in-flight work");
    state.wait_for_in_flight(grace).await;
    state.processes.kill_all();
    info!("bye");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        let _ = tokio::signal::ctrl_c().await;
    };
    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(_) => std::future::pending::<()>().await,
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    info!("shutdown signal received");
}
