//! `opsflow serve`: REST ingress, dispatcher workers and the schedule driver
//! in one process.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use console::style;
use tokio_util::sync::CancellationToken;

use opsflow_core::event::EventFilter;
use opsflow_core::workflow::scheduler::ScheduleDriver;
use opsflow_infra::sqlite::SqliteStore;
use opsflow_types::event::ExecutionEvent;

use crate::http::router::build_router;
use crate::state::AppState;

/// How often stalled executions are re-queued and schedule triggers are
/// reconciled with the store.
const MAINTENANCE_INTERVAL: Duration = Duration::from_secs(30);

pub async fn serve(state: AppState) -> Result<()> {
    let shutdown = CancellationToken::new();

    let mut workers = state.dispatcher.spawn_workers(shutdown.clone());
    let recovered = state.dispatcher.recover_stalled().await?;

    let driver = Arc::new(ScheduleDriver::new(Arc::clone(&state.ingestor)));
    let scheduled = driver.start().await?;

    let maintenance = tokio::spawn(maintenance_loop(
        state.clone(),
        Arc::clone(&driver),
        shutdown.clone(),
    ));
    let notifier = tokio::spawn(log_events(state.clone(), shutdown.clone()));

    let addr = format!("{}:{}", state.config.server.host, state.config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;

    println!();
    println!(
        "  {} opsflow listening on {}",
        style("⚡").bold(),
        style(format!("http://{addr}/api/v1")).cyan()
    );
    println!(
        "  {} workers, {} schedules, {} recovered executions",
        state.dispatcher.config().worker_count.max(1),
        scheduled,
        recovered
    );
    if state.admin_token.is_none() {
        println!(
            "  {}",
            style("No admin token set: organization routes answer 401 (set OPSFLOW_ADMIN_TOKEN)")
                .yellow()
        );
    }
    println!("  {}", style("Press Ctrl+C to stop").dim());
    println!();

    tracing::info!(addr = addr.as_str(), scheduled, recovered, "server started");

    let router = build_router(state);
    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    shutdown.cancel();
    if let Err(e) = driver.stop().await {
        tracing::warn!(error = %e, "schedule driver did not stop cleanly");
    }
    let _ = maintenance.await;
    let _ = notifier.await;
    while workers.join_next().await.is_some() {}

    tracing::info!("server stopped");
    println!("\n  Server stopped.");
    Ok(())
}

/// Periodically re-queue stalled executions and pick up trigger changes.
async fn maintenance_loop(
    state: AppState,
    driver: Arc<ScheduleDriver<SqliteStore>>,
    shutdown: CancellationToken,
) {
    let mut interval = tokio::time::interval(MAINTENANCE_INTERVAL);
    interval.tick().await;
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = interval.tick() => {}
        }
        if let Err(e) = state.dispatcher.recover_stalled().await {
            tracing::warn!(error = %e, "stalled execution recovery failed");
        }
        match driver.sync().await {
            Ok(scheduled) => tracing::debug!(scheduled, "schedule triggers synced"),
            Err(e) => tracing::warn!(error = %e, "schedule sync failed"),
        }
    }
}

/// Surface approval requests and finished runs in the server log.
async fn log_events(state: AppState, shutdown: CancellationToken) {
    let mut stream = state.events.stream(EventFilter::all());
    loop {
        let event = tokio::select! {
            _ = shutdown.cancelled() => break,
            event = stream.recv() => event,
        };
        match event {
            Some(ExecutionEvent::ApprovalRequested {
                organization_id,
                execution_id,
                approval_id,
                step_slug,
            }) => {
                tracing::info!(
                    organization_id = organization_id.as_str(),
                    execution_id = %execution_id,
                    approval_id = %approval_id,
                    step_slug = step_slug.as_str(),
                    "approval awaiting review"
                );
            }
            Some(ExecutionEvent::ExecutionFinished {
                organization_id,
                execution_id,
                status,
                error_kind,
            }) => {
                tracing::info!(
                    organization_id = organization_id.as_str(),
                    execution_id = %execution_id,
                    status = %status,
                    error_kind = ?error_kind,
                    "execution finished"
                );
            }
            Some(_) => {}
            None => break,
        }
    }
    tracing::debug!(lagged = stream.lagged(), "event log stopped");
}

/// Wait for Ctrl+C or SIGTERM for graceful shutdown.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cli::execution;
    use crate::cli::workflow::publish_yaml;
    use crate::state::tests::{gated_crm_connector, test_state_with_connectors};

    #[tokio::test]
    async fn test_event_logger_stops_on_shutdown() {
        let state = test_state_with_connectors(None, vec![gated_crm_connector()]).await;
        let shutdown = CancellationToken::new();
        let logger = tokio::spawn(log_events(state.clone(), shutdown.clone()));

        let definition = publish_yaml(
            &state,
            r#"
name: refund
organizationId: org-1
steps:
  - slug: refund
    type: action
    config: { integration: crm, operation: refund }
"#,
        )
        .await
        .unwrap();
        execution::start(&state, "org-1", &definition.root_id, None, None, true)
            .await
            .unwrap();

        shutdown.cancel();
        tokio::time::timeout(Duration::from_secs(5), logger)
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn test_maintenance_loop_stops_on_shutdown() {
        let state = test_state_with_connectors(None, Vec::new()).await;
        let driver = Arc::new(ScheduleDriver::new(Arc::clone(&state.ingestor)));
        let shutdown = CancellationToken::new();
        let task = tokio::spawn(maintenance_loop(state, driver, shutdown.clone()));
        shutdown.cancel();
        tokio::time::timeout(Duration::from_secs(5), task)
            .await
            .unwrap()
            .unwrap();
    }
}
