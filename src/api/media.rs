//! Browsing and thumbnail handlers.

use axum::extract::{Path, Query, State};
use axum::http::header;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Deserialize;
use serde_json::json;

use crate::api::SharedState;
use crate::error::ServiceError;
use crate::extract::FrameMode;
use crate::scanner::VideoItem;

/// Thumbnails are content-addressed, so clients may cache them forever.
const THUMBNAIL_CACHE_CONTROL: &str = "public, max-age=31536000, immutable";

pub async fn health() -> Json<serde_json::Value> {
    Json(json!({ "ok": true }))
}

pub async fn cameras(
    State(state): State<SharedState>,
) -> Result<Json<Vec<String>>, ServiceError> {
    Ok(Json(state.scanner.list_cameras().await?))
}

pub async fn dates(
    State(state): State<SharedState>,
    Path(camera_id): Path<String>,
) -> Result<Json<Vec<String>>, ServiceError> {
    Ok(Json(state.scanner.list_dates(&camera_id).await?))
}

pub async fn videos(
    State(state): State<SharedState>,
    Path((camera_id, date)): Path<(String, String)>,
) -> Result<Json<Vec<VideoItem>>, ServiceError> {
    Ok(Json(state.scanner.list_videos(&camera_id, &date).await?))
}

#[derive(Debug, Deserialize)]
pub struct ThumbnailQuery {
    pub path: String,
    #[serde(default = "default_width")]
    pub w: u32,
    #[serde(default = "default_mode")]
    pub mode: FrameMode,
}

fn default_width() -> u32 {
    320
}

fn default_mode() -> FrameMode {
    FrameMode::Start
}

pub async fn thumbnail(
    State(state): State<SharedState>,
    Query(query): Query<ThumbnailQuery>,
) -> Result<Response, ServiceError> {
    let (bytes, content_type) = state
        .thumbnails
        .get_thumbnail(&query.path, query.w, query.mode)
        .await?;
    Ok((
        [
            (header::CONTENT_TYPE, content_type),
            (header::CACHE_CONTROL, THUMBNAIL_CACHE_CONTROL),
        ],
        bytes,
    )
        .into_response())
}
