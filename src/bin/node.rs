use anyhow::Context;
use sahaay_mesh::api::create_api_server;
use sahaay_mesh::config::MeshConfig;
use sahaay_mesh::coordinator::MeshCoordinator;
use sahaay_mesh::logging;
use sahaay_mesh::metrics::start_metrics_server;
use sahaay_mesh::routing::LoopbackTransport;
use std::sync::Arc;
use tokio::sync::watch;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    if std::env::var("SAHAAY_LOG_JSON").is_ok_and(|v| v == "1") {
        logging::init_json();
    } else {
        logging::init();
    }

    let config = MeshConfig::load().context("Failed to load configuration")?;

    if config.metrics.enabled {
        start_metrics_server(&config.metrics).context("Failed to start metrics exporter")?;
        tracing::info!(addr = %config.metrics.listen_addr, "Prometheus exporter listening");
    }

    // Single-process mesh: every registered device is reachable in memory
    let transport = Arc::new(LoopbackTransport::new());
    let coordinator = MeshCoordinator::open(config.clone(), transport)
        .await
        .context("Failed to open mesh coordinator")?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let workers = coordinator.spawn_background(shutdown_rx);

    let app = create_api_server(coordinator);
    let listener = tokio::net::TcpListener::bind(config.node.api_addr)
        .await
        .with_context(|| format!("Failed to bind {}", config.node.api_addr))?;

    println!("\n╔══════════════════════════════════════════════════╗");
    println!("║        Sahaay Mesh - Distress Relay Node         ║");
    println!("╚══════════════════════════════════════════════════╝\n");
    println!("📍 REST API:     http://{}/api/v1", config.node.api_addr);
    println!("🏥 Health Check: http://{}/health", config.node.api_addr);
    println!(
        "🔁 Fanout {} | reaper every {}s | maintenance every {}s\n",
        config.routing.fanout, config.reaper.interval_secs, config.node.maintenance_interval_secs
    );

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!("Failed to listen for ctrl-c: {e}");
            }
            tracing::info!("Shutdown requested");
        })
        .await
        .context("Server error")?;

    let _ = shutdown_tx.send(true);
    futures::future::join_all(workers).await;
    tracing::info!("Node stopped");
    Ok(())
}
