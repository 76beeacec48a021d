//! Courier gateway HTTP service entry point.
//!
//! # Purpose
//! Wires configuration, the broker backend, observability, and the HTTP
//! router, then serves until shutdown.
//!
//! # Notes
//! The `build_state` helper keeps wiring testable and minimizes main setup
//! logic.
use courier_broker::memory::MemoryBroker;
use courier_gateway::app::{AppState, ProjectContext, build_router};
use courier_gateway::config::GatewayConfig;
use courier_gateway::observability;
use std::future::Future;
use std::sync::Arc;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = GatewayConfig::from_env_or_yaml()?;
    run_with_shutdown(config, async {
        let _ = tokio::signal::ctrl_c().await;
    })
    .await
}

async fn run_with_shutdown<F>(config: GatewayConfig, shutdown: F) -> anyhow::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let metrics_handle = observability::init_observability("courier-gateway");
    let state = build_state(&config);
    let metrics_task = tokio::spawn(observability::serve_metrics(
        metrics_handle,
        config.metrics_bind,
    ));

    let app = build_router(state);
    let addr = config.bind_addr;
    tracing::info!(%addr, "gateway listening");
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tokio::pin!(shutdown);
    tokio::select! {
        result = axum::serve(listener, app.into_make_service()) => {
            result?;
        }
        _ = &mut shutdown => {}
    }

    metrics_task.abort();
    let _ = metrics_task.await;
    Ok(())
}

fn build_state(config: &GatewayConfig) -> AppState {
    let project = config.project.as_ref().map(|project_id| {
        tracing::info!(project = %project_id, "using in-memory broker backend");
        ProjectContext {
            project_id: project_id.clone(),
            broker: Arc::new(MemoryBroker::new()),
        }
    });
    if project.is_none() {
        tracing::warn!("no project configured; broker-backed routes will answer 503");
    }
    AppState {
        project,
        drain_window: config.drain_window,
        teardown_slack: config.teardown_slack,
    }
}
