/**
 * trailsync daemon entry point
 *
 * Opens the local route store, watches connectivity and pushes pending
 * routes to the remote store whenever the device comes back online.
 *
 * Usage: trailsync [run|sync-now|pending]
 */

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use trailsync::remote::RestRouteStore;
use trailsync::sync::{HttpProbe, SyncService};
use trailsync::AppConfig;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load environment variables from .env file if present
    dotenv::dotenv().ok();

    let env_filter = std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string());
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::new(&env_filter))
        .init();

    let config_path = std::env::var("TRAILSYNC_CONFIG").ok().map(PathBuf::from);
    let config = AppConfig::load(config_path.as_deref())?;
    tracing::info!("Using database {}", config.db_path().display());

    let remote = Arc::new(RestRouteStore::new(&config.remote)?);
    let mut service = SyncService::open(&config, remote).await?;

    let command = std::env::args().nth(1).unwrap_or_else(|| "run".to_string());
    match command.as_str() {
        "pending" => {
            println!("{}", service.pending_count().await?);
        }
        "sync-now" => {
            let result = service.sync_now().await;
            println!("{}", serde_json::to_string_pretty(&result)?);
        }
        "run" => {
            let probe = Arc::new(HttpProbe::new(
                &config.remote.base_url,
                Duration::from_secs(config.connectivity.probe_timeout_secs),
            )?);
            service.start_polling(probe, Duration::from_secs(config.connectivity.poll_interval_secs));
            if config.sync.auto_sync {
                service.start_auto_sync();
            }

            if service.monitor().is_online() {
                let result = service.sync_now().await;
                tracing::info!(
                    "Initial sync: {} synced, {} failed",
                    result.synced_count,
                    result.failed_count
                );
            }

            tracing::info!("Running, press Ctrl-C to stop");
            tokio::signal::ctrl_c().await?;
            service.shutdown().await;
        }
        other => {
            eprintln!("Unknown command '{}'. Usage: trailsync [run|sync-now|pending]", other);
            service.shutdown().await;
            service.store().close().await;
            std::process::exit(2);
        }
    }

    service.store().close().await;
    Ok(())
}
