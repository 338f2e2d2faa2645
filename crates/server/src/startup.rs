//! Server startup: shared state initialization and background task spawning.

use std::sync::Arc;

use tracing::{error, info};

use inkvault_core::Config;
use inkvault_ingest::{IngestEngine, ProgressStore};
use inkvault_storage::{DaemonClientPool, DaemonSupervisor, StorageGroupRouter, UploadGroupPolicy};

use crate::state::{AppState, ProxyMetrics};

fn load_config() -> Config {
    inkvault_core::config::load_dotenv();
    Config::from_env()
}

/// Build `AppState`, pre-warm the sidecar daemons, and load the persisted
/// active upload group.
pub async fn build_app_state() -> anyhow::Result<Arc<AppState>> {
    let config = load_config();
    config.log_summary();

    std::fs::create_dir_all(&config.storage.state_dir)?;
    std::fs::create_dir_all(&config.storage.remote_cache_dir)?;

    let daemon = DaemonSupervisor::new(
        config.daemon.clone(),
        &config.rclone.binary,
        &config.rclone.env_reserved_prefix,
        config.worker.worker_index,
        config.worker.worker_port_slots,
    );

    let router = Arc::new(StorageGroupRouter::new(
        &config.groups,
        &config.rclone.binary,
        &config.rclone.env_reserved_prefix,
        daemon.clone(),
        config.daemon.clone(),
    ));

    if config.daemon.serve_http_enabled {
        let mut remotes: Vec<&str> = Vec::new();
        for g in &config.groups.groups {
            if !remotes.contains(&g.primary.as_str()) {
                remotes.push(&g.primary);
            }
            for backup in &g.backups {
                if !remotes.contains(&backup.as_str()) {
                    remotes.push(backup);
                }
            }
        }
        for remote in remotes {
            if let Err(e) = daemon.start(remote).await {
                error!(remote = %remote, error = %e, "failed to start serve-http sidecar");
            }
        }
    }

    let policy = Arc::new(UploadGroupPolicy::load(&config.storage.state_dir, &router)?);

    let catalog: Arc<dyn inkvault_ingest::catalog::CatalogSink> = match std::env::var("CATALOG_URL").ok().filter(|s| !s.is_empty()) {
        Some(url) => {
            info!(url = %url, "reporting ingest results to external catalog");
            Arc::new(inkvault_ingest::catalog::HttpCatalogSink::new(url))
        }
        None => {
            info!("no CATALOG_URL configured — ingest results will not be reported anywhere");
            Arc::new(inkvault_ingest::catalog::NullCatalogSink)
        }
    };

    let progress = Arc::new(ProgressStore::new());
    let ingest = Arc::new(IngestEngine::new(
        router.clone(),
        policy.clone(),
        progress,
        catalog,
        config.storage.remote_cache_dir.join("ingest"),
        config.groups.auto_switch_group,
        &config.ingest.chapter_folder_pattern,
    ));

    Ok(Arc::new(AppState {
        config,
        router,
        daemon,
        http_pool: Arc::new(DaemonClientPool::new()),
        policy,
        ingest,
        metrics: Arc::new(ProxyMetrics::new()),
    }))
}

/// Spawn periodic maintenance loops: auto-recovery sweeps for quota-marked
/// remotes and expiry of stale ingest resume tokens.
pub fn spawn_background_tasks(state: Arc<AppState>) {
    let recover_router = state.router.clone();
    tokio::spawn(async move {
        let mut tick = tokio::time::interval(std::time::Duration::from_secs(60));
        loop {
            tick.tick().await;
            recover_router.sweep_auto_recover();
        }
    });

    let sweep_ingest = state.ingest.clone();
    tokio::spawn(async move {
        let mut tick = tokio::time::interval(std::time::Duration::from_secs(900));
        loop {
            tick.tick().await;
            sweep_ingest.sweep_expired_resume_tokens();
            sweep_ingest.sweep_expired_jobs();
        }
    });
}

/// Stop every sidecar daemon. Called from the ctrl-c handler in `main.rs`.
pub async fn shutdown(state: &Arc<AppState>) {
    info!("shutting down serve-http sidecars");
    state.daemon.shutdown_all().await;
    state.http_pool.clear();
}
