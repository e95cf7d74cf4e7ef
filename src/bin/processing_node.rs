//! Processing Node - edge aggregation and delivery runtime
//!
//! This binary:
//! - Opens the SQLite entity store (schema migrations are idempotent)
//! - Serves the sensor ingestion endpoint
//! - Spawns the aggregation + delivery scheduler
//! - Shuts both down cleanly on CTRL+C
//!
//! Usage:
//!   cargo run --release --bin processing_node
//!
//! Environment variables:
//!   NODE_DB_PATH - SQLite database path (default: /db/data.db)
//!   LISTEN_ADDR - Ingestion bind address (default: 0.0.0.0:5000)
//!   CENTRAL_SERVER_URL - Collector endpoint (default: http://central-server:8000/receive)
//!   TZ - Timezone for delivered timestamps (default: America/Santiago)
//!   AGGREGATION_INTERVAL_SECS - Tick period (default: 300)
//!   AGGREGATION_WINDOW_SECS - Aggregation window (default: 30)
//!   RETENTION_SECS - Raw data retention (default: 86400)
//!   DELIVERY_TIMEOUT_SECS - Collector request timeout (default: 5)
//!   NODE_ID - Optional node identity sent with deliveries

use binflow::pipeline::{
    config::NodeConfig,
    db::{EntityStore, SqliteStore},
    delivery::{AggregateSink, HttpCollector},
    scheduler::{tick_scheduler_task, SchedulerSettings},
    server::router,
};
use dotenv::dotenv;
use log::{error, info};
use std::sync::Arc;
use tokio::sync::watch;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize environment and logging
    dotenv().ok();
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .target(env_logger::Target::Stderr)
        .init();

    info!("🚀 Processing node starting");

    let config = NodeConfig::from_env();

    info!("📊 Configuration:");
    info!("   ├─ Database: {}", config.db_path);
    info!("   ├─ Listen: {}", config.listen_addr);
    info!("   ├─ Collector: {}", config.collector_url);
    info!("   ├─ Timezone: {}", config.timezone.name());
    info!(
        "   ├─ Interval/window/retention: {}s / {}s / {}s",
        config.aggregation_interval.as_secs(),
        config.window.as_secs(),
        config.retention.as_secs()
    );
    info!("   └─ Delivery timeout: {}s", config.delivery_timeout.as_secs());

    // Initialize database
    let store: Arc<dyn EntityStore> = Arc::new(SqliteStore::open(&config.db_path)?);
    let sink: Arc<dyn AggregateSink> = Arc::new(HttpCollector::new(
        config.collector_url.clone(),
        config.delivery_timeout,
    )?);

    // Scheduler: aggregation + delivery every tick
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let scheduler = tokio::spawn(tick_scheduler_task(
        store.clone(),
        sink,
        SchedulerSettings::from(&config),
        shutdown_rx,
    ));
    info!("✅ Scheduler task spawned");

    // Ingestion endpoint
    let listener = tokio::net::TcpListener::bind(&config.listen_addr).await?;
    info!("✅ Processing node is running at http://{}", config.listen_addr);
    info!("🔄 Press CTRL+C to shutdown gracefully");

    axum::serve(listener, router(store))
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // Server no longer accepts requests; let the scheduler finish its tick
    info!("🔄 Ingestion stopped, waiting for scheduler...");
    shutdown_tx.send(true).ok();
    if let Err(e) = scheduler.await {
        error!("❌ Scheduler task failed: {}", e);
    }

    info!("✅ Processing node stopped");
    Ok(())
}

async fn shutdown_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("⚠️  Received CTRL+C, shutting down..."),
        Err(err) => {
            // Without a signal handler, keep serving rather than exit immediately
            error!("❌ Failed to listen for CTRL+C: {}", err);
            std::future::pending::<()>().await;
        }
    }
}
