use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use camvault::api::{self, AppState};
use camvault::config::{Config, InferenceMode};
use camvault::extract::RealFrameCommandRunner;
use camvault::infer::embedded::EmbeddedDetector;
use camvault::infer::remote::RemoteClassifier;
use camvault::infer::InferenceBackend;
use camvault::paths::MediaRoot;
use camvault::pipeline::label::LabelService;
use camvault::pipeline::thumbnail::ThumbnailService;
use camvault::scanner::MediaScanner;
use camvault::supervisor::{WorkerConfig, WorkerSupervisor};

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt::init();

    let config = Config::from_env();
    let root = MediaRoot::new(&config.media_root).expect("media root must exist");
    let runner = Arc::new(RealFrameCommandRunner);

    let backend: Arc<dyn InferenceBackend> = match config.inference_mode {
        InferenceMode::Remote => Arc::new(RemoteClassifier::new(&config.ai_service_url)),
        InferenceMode::Embedded => Arc::new(EmbeddedDetector::new(config.ai_model_path.clone())),
    };

    let supervisor = if config.ai_enabled
        && config.inference_mode == InferenceMode::Remote
        && !config.ai_worker_command.is_empty()
    {
        Some(WorkerSupervisor::new(WorkerConfig::new(
            config.ai_worker_command.clone(),
            config.ai_worker_dir.clone(),
            config.ai_service_url.clone(),
            config.ai_confidence,
        )))
    } else {
        None
    };

    // Warm start: bring the worker up before the first label request.
    if let Some(supervisor) = &supervisor {
        let supervisor = Arc::clone(supervisor);
        tokio::spawn(async move {
            if let Err(e) = supervisor.ensure_running().await {
                warn!(error = %e, "classifier worker not ready at startup");
            }
        });
    }

    let state = Arc::new(AppState {
        scanner: MediaScanner::new(root.clone()),
        thumbnails: ThumbnailService::new(
            root.clone(),
            config.cache_dir.clone(),
            Arc::clone(&runner),
        ),
        labels: LabelService::new(
            root,
            config.cache_dir.clone(),
            runner,
            backend,
            config.ai_confidence,
            config.ai_enabled,
        ),
        label_wait: Duration::from_millis(config.label_wait_ms),
        supervisor: supervisor.clone(),
    });

    let app = api::router(state);
    let listener = tokio::net::TcpListener::bind(format!("{}:{}", config.addr, config.port))
        .await
        .expect("Failed to bind TCP listener");
    info!("Listening at {}:{}", config.addr, config.port);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .expect("Server failed to start");

    if let Some(supervisor) = &supervisor {
        supervisor.stop();
    }
    info!("shut down");
}

async fn shutdown_signal() {
    #[cfg(unix)]
    {
        let mut sigterm =
            tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
                .expect("install SIGTERM handler");
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {}
            _ = sigterm.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}
