//! HTTP surface: router, shared state, and the error-to-status mapping.

pub mod labels;
pub mod media;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

use crate::error::ServiceError;
use crate::extract::RealFrameCommandRunner;
use crate::pipeline::label::LabelService;
use crate::pipeline::thumbnail::ThumbnailService;
use crate::scanner::MediaScanner;
use crate::supervisor::WorkerSupervisor;

pub struct AppState {
    pub scanner: MediaScanner,
    pub thumbnails: ThumbnailService<RealFrameCommandRunner>,
    pub labels: LabelService<RealFrameCommandRunner>,
    /// How long a POST label caller blocks before falling back to 202.
    pub label_wait: Duration,
    /// Present only in remote inference mode with a configured launch command.
    pub supervisor: Option<Arc<WorkerSupervisor>>,
}

pub type SharedState = Arc<AppState>;

pub fn router(state: SharedState) -> Router {
    Router::new()
        .route("/health", get(media::health))
        .route("/api/health", get(media::health))
        .route("/api/cameras", get(media::cameras))
        .route("/api/cameras/:camera_id/dates", get(media::dates))
        .route(
            "/api/cameras/:camera_id/dates/:date/videos",
            get(media::videos),
        )
        .route("/api/videos/thumbnail", get(media::thumbnail))
        .route(
            "/api/videos/labels",
            get(labels::get_label).post(labels::request_label),
        )
        .with_state(state)
}

/// Every handler error becomes structured JSON `{"error": ...}` with a status
/// derived from the error kind, never from message matching.
impl IntoResponse for ServiceError {
    fn into_response(self) -> Response {
        let status = match self {
            ServiceError::InvalidInput(_) => StatusCode::BAD_REQUEST,
            ServiceError::PathTraversal => StatusCode::FORBIDDEN,
            ServiceError::NotFound(_) => StatusCode::NOT_FOUND,
            ServiceError::ExternalToolUnavailable(_)
            | ServiceError::ExtractionFailed(_)
            | ServiceError::InferenceMisconfigured(_)
            | ServiceError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
            ServiceError::InferenceUnavailable(_) => StatusCode::BAD_GATEWAY,
            ServiceError::AiDisabled => StatusCode::SERVICE_UNAVAILABLE,
            ServiceError::Timeout => StatusCode::GATEWAY_TIMEOUT,
        };
        (status, Json(json!({ "error": self.to_string() }))).into_response()
    }
}
