use std::fmt;
use std::io;

/// Error taxonomy for the enrichment pipelines.
///
/// Every failure below the pipeline boundary (subprocess exit codes, HTTP
/// client errors, tensor parsing) is mapped to one of these kinds before it
/// reaches a caller. `Clone` because the single-flight coordinator delivers
/// the same outcome to every attached waiter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServiceError {
    /// Bad request parameters (width out of range, unsupported extension,
    /// malformed camera id or date).
    InvalidInput(String),
    /// Resolved path escaped the media root.
    PathTraversal,
    /// Video file (or requested resource) does not exist.
    NotFound(String),
    /// ffmpeg/ffprobe binary is not installed or not on PATH.
    ExternalToolUnavailable(String),
    /// The extractor ran but exited non-zero.
    ExtractionFailed(String),
    /// Remote classifier unreachable or returned non-2xx. Transient; never
    /// cached as a permanent failure.
    InferenceUnavailable(String),
    /// Backend configured but unusable (model artifact missing).
    InferenceMisconfigured(String),
    /// Labeling is disabled by configuration.
    AiDisabled,
    /// Bounded wait expired. Only the waiting caller sees this; the
    /// underlying job keeps running.
    Timeout,
    /// Anything else (cache I/O, serialization).
    Internal(String),
}

impl fmt::Display for ServiceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ServiceError::InvalidInput(msg) => write!(f, "Invalid input: {}", msg),
            ServiceError::PathTraversal => write!(f, "Path traversal detected"),
            ServiceError::NotFound(msg) => write!(f, "Not found: {}", msg),
            ServiceError::ExternalToolUnavailable(tool) => {
                write!(f, "{} not available", tool)
            }
            ServiceError::ExtractionFailed(msg) => write!(f, "Extraction failed: {}", msg),
            ServiceError::InferenceUnavailable(msg) => {
                write!(f, "Inference service unavailable: {}", msg)
            }
            ServiceError::InferenceMisconfigured(msg) => {
                write!(f, "Inference backend misconfigured: {}", msg)
            }
            ServiceError::AiDisabled => write!(f, "AI_DISABLED"),
            ServiceError::Timeout => write!(f, "Timed out waiting for result"),
            ServiceError::Internal(msg) => write!(f, "Internal error: {}", msg),
        }
    }
}

impl std::error::Error for ServiceError {}

impl From<io::Error> for ServiceError {
    fn from(err: io::Error) -> Self {
        ServiceError::Internal(err.to_string())
    }
}

impl From<serde_json::Error> for ServiceError {
    fn from(err: serde_json::Error) -> Self {
        ServiceError::Internal(format!("serialization: {}", err))
    }
}
