use std::sync::Arc;

use axum::extract::{Multipart, Path as AxumPath, State};
use axum::Json;
use serde::Serialize;

use crate::error::ApiError;
use crate::state::AppState;

#[derive(Serialize)]
pub struct IngestAccepted {
    pub job_id: String,
}

/// Accept a multipart ZIP upload and kick off a background ingest job.
/// Optional `type` / `status` fields set the defaults used when a manga
/// folder carries no marker file of its own.
pub async fn start_ingest(State(state): State<Arc<AppState>>, mut multipart: Multipart) -> Result<Json<IngestAccepted>, ApiError> {
    let mut zip_bytes: Option<Vec<u8>> = None;
    let mut default_type = "manga".to_string();
    let mut default_status = "ongoing".to_string();

    while let Some(field) = multipart.next_field().await.map_err(|e| inkvault_storage::StorageError::Other(e.to_string()))? {
        match field.name().unwrap_or_default() {
            "file" => {
                let bytes = field.bytes().await.map_err(|e| inkvault_storage::StorageError::Other(e.to_string()))?;
                zip_bytes = Some(bytes.to_vec());
            }
            "type" => {
                default_type = field.text().await.unwrap_or_default();
            }
            "status" => {
                default_status = field.text().await.unwrap_or_default();
            }
            _ => {}
        }
    }

    let zip_bytes = zip_bytes.ok_or_else(|| inkvault_storage::StorageError::Other("missing 'file' field".to_string()))?;
    let job_id = state.ingest.start_ingest(zip_bytes, default_type, default_status);
    Ok(Json(IngestAccepted { job_id }))
}

pub async fn get_job(State(state): State<Arc<AppState>>, AxumPath(job_id): AxumPath<String>) -> Result<Json<inkvault_ingest::Job>, ApiError> {
    Ok(Json(state.ingest.job_status(&job_id)?))
}

/// Report which chapters a failed manga folder still needs uploaded. The
/// caller re-submits the archive through `POST /ingest` to actually retry;
/// this endpoint only resolves the token into actionable state.
pub async fn resume_job(State(state): State<Arc<AppState>>, AxumPath(token): AxumPath<String>) -> Result<Json<inkvault_ingest::ResumeToken>, ApiError> {
    Ok(Json(state.ingest.resume_info(&token)?))
}
