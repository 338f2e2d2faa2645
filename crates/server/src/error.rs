use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;

use inkvault_ingest::IngestError;
use inkvault_storage::StorageError;

pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(json!({ "error": self.message }))).into_response()
    }
}

impl From<StorageError> for ApiError {
    fn from(e: StorageError) -> Self {
        let status = StatusCode::from_u16(e.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        Self { status, message: e.to_string() }
    }
}

impl From<IngestError> for ApiError {
    fn from(e: IngestError) -> Self {
        let status = match &e {
            IngestError::UnknownJob(_) | IngestError::UnknownResumeToken(_) => StatusCode::NOT_FOUND,
            IngestError::InvalidArchive(_) | IngestError::UnsafeEntryPath(_) | IngestError::NoMangaFound | IngestError::EmptyChapter => StatusCode::BAD_REQUEST,
            IngestError::Storage(inner) => StatusCode::from_u16(inner.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR),
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        Self { status, message: e.to_string() }
    }
}
