//! Read pipeline: daemon-first image streaming with a blocking
//! `rclone cat` fallback when no sidecar is reachable.

use std::sync::Arc;

use axum::body::Body;
use axum::extract::{Path as AxumPath, State};
use axum::http::{header, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};

use inkvault_storage::path;

use crate::error::ApiError;
use crate::state::AppState;

/// Bounded retry budget for the rclone-cat fallback path: each configured
/// remote in the group gets this many attempts before giving up.
const MAX_FALLBACK_RETRIES: usize = 2;

fn guess_content_type(path: &str) -> &'static str {
    match path.rsplit('.').next().unwrap_or("").to_lowercase().as_str() {
        "png" => "image/png",
        "webp" => "image/webp",
        "jpeg" | "jpg" => "image/jpeg",
        _ => "application/octet-stream",
    }
}

pub async fn proxy_read(State(state): State<Arc<AppState>>, AxumPath(raw_path): AxumPath<String>) -> Result<Response, ApiError> {
    let group_id = path::group_of(&raw_path);
    let relative = path::clean(&raw_path);
    let content_type = guess_content_type(&relative);

    let remote = state.router.next_remote(group_id)?.to_string();

    if let Some(base_url) = state.router.next_daemon_url(group_id, &remote).await {
        let url = format!("{}/{}", base_url.trim_end_matches('/'), relative);
        let client = state.http_pool.get(&base_url);
        match client.get(&url).send().await {
            Ok(resp) if resp.status().is_success() => {
                state.router.mark_success(group_id, &remote);
                state.metrics.record_read(true, true);
                let stream = resp.bytes_stream();
                return Ok((
                    StatusCode::OK,
                    [
                        (header::CONTENT_TYPE, HeaderValue::from_static(content_type)),
                        (header::CACHE_CONTROL, HeaderValue::from_static("public, max-age=604800, immutable")),
                    ],
                    [
                        ("x-storage-group", group_id.to_string()),
                        ("x-read-mode", "stream".to_string()),
                        ("x-serve-daemon", base_url.clone()),
                    ],
                    Body::from_stream(stream),
                )
                    .into_response());
            }
            // A 404 from the daemon means the object genuinely doesn't
            // exist — no point falling back to `rclone cat` for the same
            // answer.
            Ok(resp) if resp.status() == reqwest::StatusCode::NOT_FOUND => {
                state.router.mark_success(group_id, &remote);
                state.metrics.record_read(false, true);
                return Err(inkvault_storage::StorageError::NotFound.into());
            }
            _ => {
                tracing::debug!(remote = %remote, "daemon read failed, falling back to rclone cat");
            }
        }
    }

    let max_attempts = (state.router.remote_count(group_id).unwrap_or(1) * MAX_FALLBACK_RETRIES).max(1);
    let mut current_remote = remote;
    let mut last_err = inkvault_storage::StorageError::NoHealthyRemotes(group_id);

    for _ in 0..max_attempts {
        let Some(client) = state.router.client_for(&current_remote) else {
            last_err = inkvault_storage::StorageError::Other(format!("no client for remote '{current_remote}'"));
            break;
        };
        let client = client.clone();

        match client.download_bytes(&relative).await {
            Ok(bytes) => {
                state.router.mark_success(group_id, &current_remote);
                state.metrics.record_read(true, false);
                return Ok((
                    StatusCode::OK,
                    [
                        (header::CONTENT_TYPE, HeaderValue::from_static(content_type)),
                        (header::CACHE_CONTROL, HeaderValue::from_static("public, max-age=604800, immutable")),
                    ],
                    [("x-storage-group", group_id.to_string()), ("x-read-mode", "fallback".to_string())],
                    bytes,
                )
                    .into_response());
            }
            Err(e) => {
                state.router.mark_failure(group_id, &current_remote, &e.to_string());
                state.metrics.record_read(false, false);
                last_err = e;
                match state.router.next_remote(group_id) {
                    Ok(next) => current_remote = next.to_string(),
                    Err(e) => {
                        last_err = e;
                        break;
                    }
                }
            }
        }
    }

    Err(last_err.into())
}
