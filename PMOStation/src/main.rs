mod logging;

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use axum::{Json, Router, routing::get};
use pmostation::{ApiDoc, StationConfigExt, StationSupervisor, station_api_router};
use tokio::signal;
use tracing::{error, info, warn};
use utoipa::OpenApi;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // ========== PHASE 1 : Configuration et logs ==========
    let config = pmoconfig::get_config();
    logging::init_logging(&config);

    info!("📂 Configuration loaded from {}", config.config_dir());

    // ========== PHASE 2 : Superviseur de stations ==========
    info!("📻 Loading stations...");
    let supervisor_config = config.supervisor_config()?;
    // Un document corrompu arrête le démarrage : jamais de réinitialisation silencieuse
    let supervisor = Arc::new(
        StationSupervisor::load(supervisor_config)
            .await
            .context("Failed to load station store")?,
    );

    let reconcile_task = config.get_reconcile_interval().map(|period| {
        info!("🔄 Reconciling station status every {:?}", period);
        let supervisor = supervisor.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            // Le premier tick est immédiat
            ticker.tick().await;
            loop {
                ticker.tick().await;
                match supervisor.reconcile().await {
                    Ok(0) => {}
                    Ok(n) => info!("🔄 {} station(s) marked stopped after encoder exit", n),
                    Err(e) => warn!("⚠️ Station reconciliation failed: {}", e),
                }
            }
        })
    });

    // ========== PHASE 3 : Serveur HTTP ==========
    let app = Router::new()
        .nest("/api/stations", station_api_router(supervisor.clone()))
        .route(
            "/api-docs/stations.json",
            get(|| async { Json(ApiDoc::openapi()) }),
        );

    let addr: SocketAddr = format!("{}:{}", config.get_bind_address(), config.get_http_port())
        .parse()
        .context("Invalid bind address")?;
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;

    info!("🌐 PMOStation listening on http://{}", addr);
    info!("Press Ctrl+C to stop...");

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            if let Err(e) = signal::ctrl_c().await {
                error!("Failed to listen for Ctrl+C: {}", e);
            }
            info!("Ctrl+C reçu, arrêt gracieux");
        })
        .await
        .context("HTTP server error")?;

    // ========== PHASE 4 : Arrêt ==========
    if let Some(task) = reconcile_task {
        task.abort();
    }

    info!("🛑 Stopping running stations...");
    supervisor.shutdown().await?;
    info!("✅ PMOStation stopped");

    Ok(())
}
