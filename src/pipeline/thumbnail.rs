//! Thumbnail pipeline: one cached, scaled JPEG frame per (video, width, mode).

use std::path::PathBuf;
use std::sync::Arc;
use tracing::debug;

use crate::cache::{cache_key, CacheStore, SingleFlightCache};
use crate::error::ServiceError;
use crate::extract::{extract_frame, FrameCommandRunner, FrameMode};
use crate::paths::MediaRoot;

pub const MIN_WIDTH: u32 = 120;
pub const MAX_WIDTH: u32 = 640;
pub const CONTENT_TYPE: &str = "image/jpeg";

pub struct ThumbnailService<R: FrameCommandRunner + 'static> {
    root: MediaRoot,
    cache: Arc<SingleFlightCache<Vec<u8>>>,
    runner: Arc<R>,
    tmp_dir: PathBuf,
}

impl<R: FrameCommandRunner + 'static> ThumbnailService<R> {
    pub fn new(root: MediaRoot, cache_dir: PathBuf, runner: Arc<R>) -> Self {
        Self {
            root,
            cache: SingleFlightCache::new(
                CacheStore::new(cache_dir.join("thumbnails"), "jpg"),
                |bytes| Ok(bytes.clone()),
                |bytes| Some(bytes.to_vec()),
            ),
            runner,
            tmp_dir: cache_dir.join("tmp"),
        }
    }

    /// Serve or produce the thumbnail. Failures are never cached; the next
    /// request retries cleanly.
    pub async fn get_thumbnail(
        &self,
        media_ref: &str,
        width: u32,
        mode: FrameMode,
    ) -> Result<(Vec<u8>, &'static str), ServiceError> {
        if !(MIN_WIDTH..=MAX_WIDTH).contains(&width) {
            return Err(ServiceError::InvalidInput(format!(
                "width must be between {} and {}",
                MIN_WIDTH, MAX_WIDTH
            )));
        }
        if !media_ref.ends_with(".mp4") {
            return Err(ServiceError::InvalidInput(
                "only .mp4 files are supported for thumbnails".into(),
            ));
        }

        let video_path = self.root.resolve(media_ref)?;
        let key = cache_key(&[media_ref, "thumbnail", &width.to_string(), mode.as_str()]);

        let runner = Arc::clone(&self.runner);
        let tmp = self
            .tmp_dir
            .join(format!("thumb-{}.jpg", uuid::Uuid::new_v4()));
        let tmp_dir = self.tmp_dir.clone();

        let bytes = self
            .cache
            .get_or_compute(&key, async move {
                tokio::fs::create_dir_all(&tmp_dir)
                    .await
                    .map_err(|e| ServiceError::Internal(format!("tmp dir: {}", e)))?;

                let result = async {
                    extract_frame(runner.as_ref(), &video_path, &tmp, width, mode).await?;
                    tokio::fs::read(&tmp)
                        .await
                        .map_err(|e| ServiceError::ExtractionFailed(format!(
                            "frame not written: {}",
                            e
                        )))
                }
                .await;

                let _ = tokio::fs::remove_file(&tmp).await;
                result
            })
            .await?;

        debug!(media_ref, width, mode = mode.as_str(), "thumbnail served");
        Ok((bytes, CONTENT_TYPE))
    }
}
