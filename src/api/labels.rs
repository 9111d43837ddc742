//! Label handlers: cheap polling GET, triggering POST.

use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Deserialize;
use serde_json::json;
use tracing::warn;

use crate::api::SharedState;
use crate::error::ServiceError;

#[derive(Debug, Deserialize)]
pub struct LabelQuery {
    pub path: String,
}

fn processing() -> Response {
    (
        StatusCode::ACCEPTED,
        Json(json!({ "status": "processing" })),
    )
        .into_response()
}

/// Polling endpoint. Pure read: a GET never starts extraction or inference.
pub async fn get_label(
    State(state): State<SharedState>,
    Query(query): Query<LabelQuery>,
) -> Response {
    if !state.labels.enabled() {
        return ServiceError::AiDisabled.into_response();
    }
    let cached = match state.labels.get_cached(&query.path).await {
        Ok(cached) => cached,
        Err(e) => return e.into_response(),
    };
    if state.labels.is_processing(&query.path) {
        return processing();
    }
    match cached {
        Some(record) => (StatusCode::OK, Json(record)).into_response(),
        None => {
            ServiceError::NotFound(format!("no label for {}", query.path)).into_response()
        }
    }
}

/// Trigger endpoint. Blocks for the configured bounded wait; a slower job
/// keeps running after the 202 and the client polls for the outcome.
pub async fn request_label(
    State(state): State<SharedState>,
    Query(query): Query<LabelQuery>,
) -> Response {
    if !state.labels.enabled() {
        return ServiceError::AiDisabled.into_response();
    }

    // Best effort: a worker that fails to come up surfaces later as 502.
    if let Some(supervisor) = &state.supervisor {
        if let Err(e) = supervisor.ensure_running().await {
            warn!(error = %e, "classifier worker not ready");
        }
    }

    match state
        .labels
        .request_label_bounded(&query.path, state.label_wait)
        .await
    {
        Ok(record) => (StatusCode::OK, Json(record)).into_response(),
        Err(ServiceError::Timeout) => processing(),
        Err(e) => e.into_response(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::test_support::app_state;

    fn query(path: &str) -> Query<LabelQuery> {
        Query(LabelQuery {
            path: path.to_string(),
        })
    }

    #[tokio::test]
    async fn disabled_get_is_service_unavailable() {
        let (_dirs, state) = app_state(false);
        let response = get_label(State(state), query("cam1/20240101/075659.mp4")).await;
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn disabled_post_is_service_unavailable() {
        let (_dirs, state) = app_state(false);
        let response = request_label(State(state), query("cam1/20240101/075659.mp4")).await;
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn never_requested_label_is_not_found() {
        let (_dirs, state) = app_state(true);
        let response = get_label(State(state), query("cam1/20240101/075659.mp4")).await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn missing_video_is_not_found() {
        let (_dirs, state) = app_state(true);
        let response = get_label(State(state), query("cam1/20240101/999999.mp4")).await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn traversal_is_forbidden() {
        let (_dirs, state) = app_state(true);
        let response = get_label(State(state), query("../../etc/passwd")).await;
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
    }
}
