//! Environment configuration.

use std::env;
use std::path::PathBuf;

/// Which inference backend the label pipeline talks to.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum InferenceMode {
    /// POST frames to an external classifier microservice.
    Remote,
    /// Run the ONNX detector in-process.
    Embedded,
}

/// Server configuration, loaded once at startup.
#[derive(Clone, Debug)]
pub struct Config {
    /// HTTP server bind address
    pub addr: String,
    /// HTTP server port
    pub port: String,
    /// Root directory of recorded footage (camera/date/video layout)
    pub media_root: PathBuf,
    /// Directory for cached thumbnails, labels and temp frames
    pub cache_dir: PathBuf,
    /// Master switch for the label pipeline
    pub ai_enabled: bool,
    /// Remote or embedded inference
    pub inference_mode: InferenceMode,
    /// Base URL of the remote classifier service
    pub ai_service_url: String,
    /// Command used to launch the classifier worker (empty = externally managed)
    pub ai_worker_command: Vec<String>,
    /// Working directory for the spawned worker
    pub ai_worker_dir: Option<PathBuf>,
    /// Path to the ONNX model for the embedded detector
    pub ai_model_path: PathBuf,
    /// Minimum confidence for a detection to count
    pub ai_confidence: f32,
    /// How long a POST /videos/labels caller waits before getting 202 (ms)
    pub label_wait_ms: u64,
}

impl Config {
    /// Load configuration from environment variables.
    /// Panics if MEDIA_ROOT is not set; everything else has a default.
    pub fn from_env() -> Self {
        dotenv::dotenv().ok();

        Self {
            addr: env::var("ADDR").unwrap_or_else(|_| String::from("127.0.0.1")),
            port: env::var("PORT").unwrap_or_else(|_| String::from("3000")),
            media_root: PathBuf::from(
                env::var("MEDIA_ROOT").expect("MEDIA_ROOT env var required"),
            ),
            cache_dir: env::var("CACHE_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from(".cache")),
            ai_enabled: parse_bool(env::var("AI_ENABLED").ok().as_deref(), false),
            inference_mode: match env::var("AI_BACKEND").as_deref() {
                Ok("embedded") => InferenceMode::Embedded,
                _ => InferenceMode::Remote,
            },
            ai_service_url: env::var("AI_SERVICE_URL")
                .unwrap_or_else(|_| String::from("http://127.0.0.1:8001")),
            ai_worker_command: env::var("AI_WORKER_COMMAND")
                .map(|raw| raw.split_whitespace().map(String::from).collect())
                .unwrap_or_default(),
            ai_worker_dir: env::var("AI_WORKER_DIR").map(PathBuf::from).ok(),
            ai_model_path: env::var("AI_MODEL_PATH")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("models/yolov8n.onnx")),
            ai_confidence: parse_f32(env::var("AI_CONFIDENCE").ok().as_deref(), 0.55),
            label_wait_ms: env::var("LABEL_WAIT_MS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(2500),
        }
    }
}

fn parse_bool(value: Option<&str>, fallback: bool) -> bool {
    match value.map(|v| v.trim().to_ascii_lowercase()) {
        Some(v) if v == "true" || v == "1" || v == "yes" => true,
        Some(v) if v == "false" || v == "0" || v == "no" => false,
        _ => fallback,
    }
}

fn parse_f32(value: Option<&str>, fallback: f32) -> f32 {
    value
        .and_then(|v| v.trim().parse::<f32>().ok())
        .filter(|n| n.is_finite())
        .unwrap_or(fallback)
}
