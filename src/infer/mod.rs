//! Inference backends for the label pipeline.
//!
//! Two interchangeable strategies behind one trait: a remote classifier
//! microservice reached over HTTP, and an embedded ONNX detector running
//! in-process. The pipeline postprocesses raw detections the same way for
//! both.

pub mod embedded;
pub mod remote;

use async_trait::async_trait;
use std::path::Path;

use crate::domain::label::DetectedObject;
use crate::error::ServiceError;

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait InferenceBackend: Send + Sync {
    /// Classify one extracted JPEG frame, returning the raw detections.
    async fn classify(&self, frame_path: &Path) -> Result<Vec<DetectedObject>, ServiceError>;
}
