use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use inspecta_api::app::{self, AppServices};
use inspecta_infra::config::OrchestratorConfig;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    inspecta_observability::init();

    let config = OrchestratorConfig::from_env();
    let services = build_services(config);
    let cancel = CancellationToken::new();

    // Embedded worker: the broker's group/visibility mechanics keep this
    // safe to run alongside any number of separate worker processes.
    let runtime = services.worker_runtime();
    let worker_cancel = cancel.clone();
    let worker = tokio::spawn(async move { runtime.run(worker_cancel).await });

    // Reconciliation sweep for jobs stuck in `queued` with no broker
    // message (publish failed after the store write).
    let sweep_services = services.clone();
    let sweep_cancel = cancel.clone();
    tokio::spawn(async move {
        let stale_after = sweep_services.config.requeue_stale_after;
        let mut ticker = tokio::time::interval(stale_after.max(Duration::from_secs(30)));
        loop {
            tokio::select! {
                _ = sweep_cancel.cancelled() => break,
                _ = ticker.tick() => {
                    match sweep_services.gate.requeue_stale(stale_after).await {
                        Ok(0) => {}
                        Ok(n) => tracing::info!(requeued = n, "reconciliation sweep re-published jobs"),
                        Err(e) => tracing::warn!(error = %e, "reconciliation sweep failed"),
                    }
                }
            }
        }
    });

    let app = app::build_router(services);
    let port: u16 = std::env::var("PORT")
        .unwrap_or_else(|_| "8080".to_string())
        .parse()
        .expect("PORT must be a valid u16");
    let listener = tokio::net::TcpListener::bind(("0.0.0.0", port)).await?;
    tracing::info!("listening on {}", listener.local_addr()?);

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("shutdown requested");
        })
        .await?;

    // Drain in-flight handlers before exiting.
    cancel.cancel();
    let _ = worker.await;
    Ok(())
}

#[cfg(feature = "redis")]
fn build_services(config: OrchestratorConfig) -> Arc<AppServices> {
    use inspecta_analysis::{InMemoryInspectionRepo, ScriptedVisionClient};
    AppServices::redis(
        config,
        InMemoryInspectionRepo::arc(),
        Arc::new(ScriptedVisionClient::new()),
    )
    .expect("redis services must initialize")
}

#[cfg(not(feature = "redis"))]
fn build_services(config: OrchestratorConfig) -> Arc<AppServices> {
    AppServices::in_memory(config)
}
