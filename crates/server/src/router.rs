//! HTTP router construction.

use std::sync::Arc;

use axum::extract::DefaultBodyLimit;
use axum::routing::{get, post};
use axum::Router;
use tower_http::cors::CorsLayer;

use crate::handlers::{health, ingest, proxy};
use crate::state::AppState;

/// Build the complete application router: read proxy, health, and the
/// bulk ingest surface.
pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health::health))
        .route("/proxy/{*path}", get(proxy::proxy_read))
        .route("/ingest", post(ingest::start_ingest).layer(DefaultBodyLimit::max(2 * 1024 * 1024 * 1024)))
        .route("/ingest/{job_id}", get(ingest::get_job))
        .route("/ingest/resume/{token}", post(ingest::resume_job))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use http_body_util::BodyExt;
    use hyper::StatusCode;
    use tower::ServiceExt;

    use inkvault_core::config::{Config, DaemonConfig, GroupsConfig, IngestConfig, RcloneConfig, ServerConfig, StorageConfig, WorkerConfig};
    use inkvault_ingest::catalog::NullCatalogSink;
    use inkvault_ingest::{IngestEngine, ProgressStore};
    use inkvault_storage::{DaemonClientPool, DaemonSupervisor, StorageGroupRouter, UploadGroupPolicy};

    use super::build_router;
    use crate::state::{AppState, ProxyMetrics};

    /// An `AppState` with zero configured storage groups — enough to drive
    /// the router without needing a real `rclone` binary on the test host.
    fn empty_state(state_dir: &std::path::Path) -> Arc<AppState> {
        let config = Config {
            profile: String::new(),
            server: ServerConfig { host: "127.0.0.1".into(), port: 0, cors_origin: "*".into() },
            storage: StorageConfig { remote_cache_dir: state_dir.join("cache"), state_dir: state_dir.to_path_buf() },
            groups: GroupsConfig { groups: vec![], auto_switch_group: true, group2_path_prefix: "@".into(), load_balancing_strategy: "round_robin".into() },
            daemon: DaemonConfig {
                serve_http_enabled: false,
                port_start: 19000,
                host: "127.0.0.1".into(),
                vfs_cache_mode: "minimal".into(),
                buffer_size: "16M".into(),
                vfs_cache_max_size: "1G".into(),
                vfs_cache_max_age: "1h".into(),
                startup_timeout_secs: 5,
                auto_restart: true,
                max_restart_attempts: 3,
                fallback: true,
                read_only: true,
                no_checksum: true,
                auth: None,
            },
            worker: WorkerConfig { worker_index: 0, worker_port_slots: 20 },
            rclone: RcloneConfig { binary: "rclone".into(), env_reserved_prefix: "RCLONE_".into() },
            ingest: IngestConfig { chapter_folder_pattern: inkvault_core::config::DEFAULT_CHAPTER_FOLDER_PATTERN.to_string() },
        };

        let daemon = DaemonSupervisor::new(config.daemon.clone(), &config.rclone.binary, &config.rclone.env_reserved_prefix, 0, 20);
        let router = Arc::new(StorageGroupRouter::new(&config.groups, &config.rclone.binary, &config.rclone.env_reserved_prefix, daemon.clone(), config.daemon.clone()));
        let policy = Arc::new(UploadGroupPolicy::load(&config.storage.state_dir, &router).expect("policy loads with no groups configured"));
        let progress = Arc::new(ProgressStore::new());
        let ingest = Arc::new(IngestEngine::new(
            router.clone(),
            policy.clone(),
            progress,
            Arc::new(NullCatalogSink),
            state_dir.join("ingest"),
            config.groups.auto_switch_group,
            &config.ingest.chapter_folder_pattern,
        ));

        Arc::new(AppState {
            config,
            router,
            daemon,
            http_pool: Arc::new(DaemonClientPool::new()),
            policy,
            ingest,
            metrics: Arc::new(ProxyMetrics::new()),
        })
    }

    #[tokio::test]
    async fn health_endpoint_reports_ok_with_no_groups() {
        let dir = tempfile::tempdir().unwrap();
        let app = build_router(empty_state(dir.path()));

        let response = app
            .oneshot(axum::http::Request::builder().uri("/health").body(axum::body::Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = response.into_body().collect().await.unwrap().to_bytes();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["status"], "ok");
        assert_eq!(json["groups"].as_array().unwrap().len(), 0);
    }

    #[tokio::test]
    async fn proxy_read_on_unconfigured_group_returns_error() {
        let dir = tempfile::tempdir().unwrap();
        let app = build_router(empty_state(dir.path()));

        let response = app
            .oneshot(axum::http::Request::builder().uri("/proxy/some/cover.jpg").body(axum::body::Body::empty()).unwrap())
            .await
            .unwrap();

        assert_ne!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn ingest_job_lookup_for_unknown_id_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let app = build_router(empty_state(dir.path()));

        let response = app
            .oneshot(axum::http::Request::builder().uri("/ingest/does-not-exist").body(axum::body::Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}
