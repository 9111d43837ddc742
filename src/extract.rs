//! External frame extraction via ffmpeg/ffprobe subprocesses.
//!
//! The actual command invocations live behind [`FrameCommandRunner`] so the
//! extraction logic is testable without the binaries installed.

use async_trait::async_trait;
use serde::Deserialize;
use std::io;
use std::path::Path;
use std::process::Output;
use tokio::process::Command as TokioCommand;
use tracing::warn;

use crate::error::ServiceError;

/// Where in the clip the representative frame is taken.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FrameMode {
    Start,
    Middle,
}

impl FrameMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            FrameMode::Start => "start",
            FrameMode::Middle => "middle",
        }
    }
}

/// Offset used for `start` mode and as the fallback when duration probing
/// fails in `middle` mode.
const START_OFFSET_SECS: f64 = 1.0;
const MIDDLE_FALLBACK_SECS: f64 = 2.0;

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait FrameCommandRunner: Send + Sync {
    async fn run_ffprobe_duration(&self, media_path: &Path) -> io::Result<Output>;
    async fn run_ffmpeg_extract(
        &self,
        media_path: &Path,
        timestamp: &str,
        width: u32,
        output_path: &Path,
    ) -> io::Result<Output>;
}

pub struct RealFrameCommandRunner;

#[async_trait]
impl FrameCommandRunner for RealFrameCommandRunner {
    async fn run_ffprobe_duration(&self, media_path: &Path) -> io::Result<Output> {
        TokioCommand::new("ffprobe")
            .arg("-v").arg("error")
            .arg("-show_entries").arg("format=duration")
            .arg("-of").arg("default=noprint_wrappers=1:nokey=1")
            .arg(media_path)
            .output()
            .await
    }

    async fn run_ffmpeg_extract(
        &self,
        media_path: &Path,
        timestamp: &str,
        width: u32,
        output_path: &Path,
    ) -> io::Result<Output> {
        TokioCommand::new("ffmpeg")
            .arg("-y")
            .arg("-ss").arg(timestamp)
            .arg("-i").arg(media_path)
            .arg("-frames:v").arg("1")
            .arg("-vf").arg(format!("scale={}:-1", width))
            .arg("-q:v").arg("3")
            .arg(output_path)
            .output()
            .await
    }
}

/// `75.3` → `"00:01:15"`. ffmpeg takes HH:MM:SS seek positions.
pub fn format_timestamp(seconds: f64) -> String {
    let clamped = seconds.max(0.0) as u64;
    format!(
        "{:02}:{:02}:{:02}",
        clamped / 3600,
        (clamped % 3600) / 60,
        clamped % 60
    )
}

/// Clip duration in seconds, None when ffprobe is missing, fails, or prints
/// something unparsable.
pub async fn probe_duration(
    runner: &(impl FrameCommandRunner + ?Sized),
    media_path: &Path,
) -> Option<f64> {
    let output = match runner.run_ffprobe_duration(media_path).await {
        Ok(out) => out,
        Err(e) => {
            warn!(path = %media_path.display(), error = %e, "ffprobe did not run");
            return None;
        }
    };
    if !output.status.success() {
        warn!(path = %media_path.display(), status = %output.status, "ffprobe failed");
        return None;
    }
    String::from_utf8_lossy(&output.stdout)
        .trim()
        .parse::<f64>()
        .ok()
        .filter(|d| d.is_finite() && *d > 0.0)
}

/// Seek position for the requested mode. `Middle` probes the duration and
/// falls back to a fixed offset when the probe fails.
pub async fn seek_timestamp(
    runner: &(impl FrameCommandRunner + ?Sized),
    media_path: &Path,
    mode: FrameMode,
) -> String {
    match mode {
        FrameMode::Start => format_timestamp(START_OFFSET_SECS),
        FrameMode::Middle => match probe_duration(runner, media_path).await {
            Some(duration) => format_timestamp(duration / 2.0),
            None => format_timestamp(MIDDLE_FALLBACK_SECS),
        },
    }
}

/// Extract a single JPEG frame, scaled to `width` preserving aspect ratio.
///
/// A failed spawn with `NotFound` means the binary is not installed
/// (`ExternalToolUnavailable`); a non-zero exit means ffmpeg ran and rejected
/// the input (`ExtractionFailed`). Operators need to tell these apart.
pub async fn extract_frame(
    runner: &(impl FrameCommandRunner + ?Sized),
    media_path: &Path,
    output_path: &Path,
    width: u32,
    mode: FrameMode,
) -> Result<(), ServiceError> {
    let timestamp = seek_timestamp(runner, media_path, mode).await;

    let output = runner
        .run_ffmpeg_extract(media_path, &timestamp, width, output_path)
        .await
        .map_err(|e| {
            if e.kind() == io::ErrorKind::NotFound {
                ServiceError::ExternalToolUnavailable("ffmpeg".into())
            } else {
                ServiceError::ExtractionFailed(format!("ffmpeg did not run: {}", e))
            }
        })?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        let tail: String = stderr
            .lines()
            .rev()
            .take(3)
            .collect::<Vec<_>>()
            .into_iter()
            .rev()
            .collect::<Vec<_>>()
            .join(" | ");
        return Err(ServiceError::ExtractionFailed(format!(
            "ffmpeg exited with {}: {}",
            output.status, tail
        )));
    }
    Ok(())
}
