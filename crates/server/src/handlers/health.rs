use std::sync::Arc;

use axum::extract::State;
use axum::Json;
use serde::Serialize;

use crate::state::AppState;

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub active_upload_group: u32,
    pub groups: Vec<GroupHealth>,
    pub metrics: crate::state::ProxyMetricsSnapshot,
}

#[derive(Serialize)]
pub struct GroupHealth {
    pub group: u32,
    pub remotes: Vec<inkvault_storage::RemoteStatusSnapshot>,
}

pub async fn health(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    let groups = state
        .router
        .configured_groups()
        .into_iter()
        .map(|id| GroupHealth { group: id, remotes: state.router.get_health(id).unwrap_or_default() })
        .collect();

    Json(HealthResponse {
        status: "ok",
        active_upload_group: state.policy.get_active(),
        groups,
        metrics: state.metrics.snapshot(),
    })
}
