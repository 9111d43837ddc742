//! Catalog walker over the camera/date/video directory layout.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;
use tracing::debug;

use crate::error::ServiceError;
use crate::paths::{validate_date, validate_id, MediaRoot};

static TIME_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^(\d{2})(\d{2})(\d{2})").unwrap());
static DATE_DIR_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[0-9]{8}$").unwrap());

/// One recorded clip as shown in the browsing UI.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VideoItem {
    pub file: String,
    pub time: String,
    pub relative_path: String,
}

/// Read-only directory catalog: cameras, their dates, their videos.
#[derive(Clone, Debug)]
pub struct MediaScanner {
    root: MediaRoot,
}

impl MediaScanner {
    pub fn new(root: MediaRoot) -> Self {
        Self { root }
    }

    /// Top-level camera directories, ascending.
    pub async fn list_cameras(&self) -> Result<Vec<String>, ServiceError> {
        let mut cameras = Vec::new();
        let mut entries = tokio::fs::read_dir(self.root.root()).await?;
        while let Some(entry) = entries.next_entry().await? {
            if entry.file_type().await?.is_dir() {
                if let Ok(name) = entry.file_name().into_string() {
                    cameras.push(name);
                }
            }
        }
        cameras.sort();
        Ok(cameras)
    }

    /// Date directories (yyyymmdd) of one camera, newest first.
    pub async fn list_dates(&self, camera_id: &str) -> Result<Vec<String>, ServiceError> {
        validate_id(camera_id)?;
        let camera_path = self.root.resolve(camera_id)?;

        let mut dates = Vec::new();
        let mut entries = tokio::fs::read_dir(&camera_path).await?;
        while let Some(entry) = entries.next_entry().await? {
            if !entry.file_type().await?.is_dir() {
                continue;
            }
            if let Ok(name) = entry.file_name().into_string() {
                if DATE_DIR_RE.is_match(&name) {
                    dates.push(name);
                }
            }
        }
        dates.sort_by(|a, b| b.cmp(a));
        Ok(dates)
    }

    /// Video files of one camera/date, ascending by filename.
    pub async fn list_videos(
        &self,
        camera_id: &str,
        date: &str,
    ) -> Result<Vec<VideoItem>, ServiceError> {
        validate_id(camera_id)?;
        validate_date(date)?;
        let date_path = self
            .root
            .resolve(&format!("{}/{}", camera_id, date))?;

        let mut videos = Vec::new();
        let mut entries = tokio::fs::read_dir(&date_path).await?;
        while let Some(entry) = entries.next_entry().await? {
            if !entry.file_type().await?.is_file() {
                continue;
            }
            let name = match entry.file_name().into_string() {
                Ok(name) => name,
                Err(_) => continue,
            };
            if !(name.ends_with(".mp4") || name.ends_with(".mkv")) {
                continue;
            }
            videos.push(VideoItem {
                time: time_from_filename(&name),
                relative_path: format!("{}/{}/{}", camera_id, date, name),
                file: name,
            });
        }
        videos.sort_by(|a, b| a.file.cmp(&b.file));
        debug!(camera_id, date, count = videos.len(), "listed videos");
        Ok(videos)
    }
}

/// `075659.mp4` → `07:56:59`; anything else → `00:00:00`.
fn time_from_filename(filename: &str) -> String {
    match TIME_RE.captures(filename) {
        Some(caps) => format!("{}:{}:{}", &caps[1], &caps[2], &caps[3]),
        None => String::from("00:00:00"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    fn scanner_with_tree() -> (tempfile::TempDir, MediaScanner) {
        let dir = tempdir().unwrap();
        for (cam, date, file) in [
            ("cam2", "20240102", "120000.mp4"),
            ("cam1", "20240101", "075659.mp4"),
            ("cam1", "20240101", "064512.mp4"),
            ("cam1", "20240102", "090000.mkv"),
            ("cam1", "20240102", "notes.txt"),
        ] {
            let d = dir.path().join(cam).join(date);
            fs::create_dir_all(&d).unwrap();
            fs::write(d.join(file), b"x").unwrap();
        }
        // Non-date directory must be skipped in date listings.
        fs::create_dir_all(dir.path().join("cam1").join("exports")).unwrap();
        let root = MediaRoot::new(dir.path()).unwrap();
        (dir, MediaScanner::new(root))
    }

    #[tokio::test]
    async fn cameras_sorted_ascending() {
        let (_dir, scanner) = scanner_with_tree();
        assert_eq!(scanner.list_cameras().await.unwrap(), vec!["cam1", "cam2"]);
    }

    #[tokio::test]
    async fn dates_sorted_descending_and_filtered() {
        let (_dir, scanner) = scanner_with_tree();
        assert_eq!(
            scanner.list_dates("cam1").await.unwrap(),
            vec!["20240102", "20240101"]
        );
    }

    #[tokio::test]
    async fn invalid_camera_id_rejected() {
        let (_dir, scanner) = scanner_with_tree();
        let err = scanner.list_dates("cam/1").await.unwrap_err();
        assert!(matches!(err, ServiceError::InvalidInput(_)));
    }

    #[tokio::test]
    async fn videos_sorted_with_parsed_times() {
        let (_dir, scanner) = scanner_with_tree();
        let videos = scanner.list_videos("cam1", "20240101").await.unwrap();
        assert_eq!(videos.len(), 2);
        assert_eq!(videos[0].file, "064512.mp4");
        assert_eq!(videos[0].time, "06:45:12");
        assert_eq!(videos[1].time, "07:56:59");
        assert_eq!(videos[1].relative_path, "cam1/20240101/075659.mp4");
    }

    #[tokio::test]
    async fn non_video_files_skipped() {
        let (_dir, scanner) = scanner_with_tree();
        let videos = scanner.list_videos("cam1", "20240102").await.unwrap();
        assert_eq!(videos.len(), 1);
        assert_eq!(videos[0].file, "090000.mkv");
    }

    #[tokio::test]
    async fn malformed_date_rejected() {
        let (_dir, scanner) = scanner_with_tree();
        let err = scanner.list_videos("cam1", "2024-01-01").await.unwrap_err();
        assert!(matches!(err, ServiceError::InvalidInput(_)));
    }

    #[test]
    fn filename_time_fallback() {
        assert_eq!(time_from_filename("075659.mp4"), "07:56:59");
        assert_eq!(time_from_filename("clip.mp4"), "00:00:00");
    }
}
