use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::broadcast;

use site_audit_scraper::api::{start_api_server, AppState};
use site_audit_scraper::browser::{ChromiumBackend, DriverPool, LifecycleManager};
use site_audit_scraper::config::{ConfigManager, FileConfigManager};
use site_audit_scraper::job::JobRunner;

#[tokio::main]
async fn main() -> site_audit_scraper::error::Result<()> {
    tracing_subscriber::fmt::init();

    let config_manager = Arc::new(FileConfigManager::new(PathBuf::from("config.toml")));
    let config = config_manager.load_config().await?;

    tracing::info!("Starting site audit scraper");

    let backend = Arc::new(ChromiumBackend::new(config.browser.clone()));
    let pool = DriverPool::new(backend, config.pool.clone());
    let runner = Arc::new(JobRunner::new(pool.clone(), &config.pool, &config.jobs));

    let (shutdown_tx, _) = broadcast::channel(1);
    let mut lifecycle = LifecycleManager::new(pool.clone(), &config.pool);
    lifecycle.start(shutdown_tx.subscribe());

    // config edits are picked up but only applied on restart
    match config_manager.watch_config_changes().await {
        Ok(mut config_rx) => {
            tokio::spawn(async move {
                while config_rx.recv().await.is_some() {
                    tracing::info!("Configuration file changed; restart to apply");
                }
            });
        }
        Err(e) => tracing::warn!("Config watcher unavailable: {}", e),
    }

    let state = AppState::new(runner, pool.clone(), config.jobs.clone());
    let server_settings = config.server.clone();
    let api_task = tokio::spawn(async move {
        if let Err(e) = start_api_server(state, &server_settings).await {
            tracing::error!("API server error: {}", e);
        }
    });

    tokio::signal::ctrl_c().await?;
    tracing::info!("Received Ctrl+C, shutting down");

    let _ = shutdown_tx.send(());
    lifecycle.stop().await;
    pool.shutdown().await;
    api_task.abort();

    tracing::info!("Site audit scraper stopped");
    Ok(())
}
