//! Label pipeline: extraction, inference, postprocessing, cached records.
//!
//! Client-observed states per video: unlabeled → processing → done | failed.
//! A failed record is cached (no retry storms) and superseded only by an
//! explicit re-trigger through `request_label`.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::cache::{cache_key, CacheStore, SingleFlightCache};
use crate::domain::label::LabelRecord;
use crate::error::ServiceError;
use crate::extract::{extract_frame, FrameCommandRunner, FrameMode};
use crate::infer::InferenceBackend;
use crate::paths::MediaRoot;

/// Width of the representative frame handed to the backend.
const LABEL_FRAME_WIDTH: u32 = 640;

pub struct LabelService<R: FrameCommandRunner + 'static> {
    root: MediaRoot,
    cache: Arc<SingleFlightCache<LabelRecord>>,
    runner: Arc<R>,
    backend: Arc<dyn InferenceBackend>,
    tmp_dir: PathBuf,
    confidence: f32,
    enabled: bool,
}

impl<R: FrameCommandRunner + 'static> LabelService<R> {
    pub fn new(
        root: MediaRoot,
        cache_dir: PathBuf,
        runner: Arc<R>,
        backend: Arc<dyn InferenceBackend>,
        confidence: f32,
        enabled: bool,
    ) -> Self {
        Self {
            root,
            cache: SingleFlightCache::new(
                CacheStore::new(cache_dir.join("labels"), "json"),
                |record| Ok(serde_json::to_vec_pretty(record)?),
                |bytes| serde_json::from_slice(bytes).ok(),
            ),
            runner,
            backend,
            tmp_dir: cache_dir.join("tmp"),
            confidence,
            enabled,
        }
    }

    pub fn enabled(&self) -> bool {
        self.enabled
    }

    fn key(media_ref: &str) -> String {
        cache_key(&[media_ref, "label"])
    }

    /// Pure cache read: no extraction, no inference, ever.
    pub async fn get_cached(&self, media_ref: &str) -> Result<Option<LabelRecord>, ServiceError> {
        self.root.resolve(media_ref)?;
        self.cache.get_cached(&Self::key(media_ref)).await
    }

    /// True iff a labeling job for this video is currently running.
    pub fn is_processing(&self, media_ref: &str) -> bool {
        self.cache.is_processing(&Self::key(media_ref))
    }

    /// Full pipeline. Returns the cached record when present, except a
    /// cached ERROR, which an explicit request like this one supersedes.
    pub async fn request_label(&self, media_ref: &str) -> Result<LabelRecord, ServiceError> {
        if !self.enabled {
            return Err(ServiceError::AiDisabled);
        }
        let video_path = self.root.resolve(media_ref)?;
        let key = Self::key(media_ref);

        if let Some(record) = self.cache.get_cached(&key).await? {
            if !record.is_error() {
                return Ok(record);
            }
            info!(media_ref, "re-triggering after cached error");
        }

        let runner = Arc::clone(&self.runner);
        let backend = Arc::clone(&self.backend);
        let tmp = self
            .tmp_dir
            .join(format!("frame-{}.jpg", uuid::Uuid::new_v4()));
        let tmp_dir = self.tmp_dir.clone();
        let media_ref_owned = media_ref.to_string();
        let confidence = self.confidence;

        self.cache
            .recompute(&key, async move {
                label_job(
                    runner,
                    backend,
                    video_path,
                    tmp_dir,
                    tmp,
                    media_ref_owned,
                    confidence,
                )
                .await
            })
            .await
    }

    /// Race `request_label` against a deadline. On timeout only this wait is
    /// abandoned; the job keeps running and a later poll sees its result.
    pub async fn request_label_bounded(
        &self,
        media_ref: &str,
        max_wait: Duration,
    ) -> Result<LabelRecord, ServiceError> {
        match tokio::time::timeout(max_wait, self.request_label(media_ref)).await {
            Ok(result) => result,
            Err(_) => Err(ServiceError::Timeout),
        }
    }
}

/// One labeling computation: frame out, detections in, record built. The
/// temp frame is removed on every exit path.
async fn label_job(
    runner: Arc<impl FrameCommandRunner>,
    backend: Arc<dyn InferenceBackend>,
    video_path: PathBuf,
    tmp_dir: PathBuf,
    tmp: PathBuf,
    media_ref: String,
    confidence: f32,
) -> Result<LabelRecord, ServiceError> {
    tokio::fs::create_dir_all(&tmp_dir)
        .await
        .map_err(|e| ServiceError::Internal(format!("tmp dir: {}", e)))?;

    let outcome = async {
        extract_frame(
            runner.as_ref(),
            &video_path,
            &tmp,
            LABEL_FRAME_WIDTH,
            FrameMode::Middle,
        )
        .await?;
        backend.classify(&tmp).await
    }
    .await;

    let _ = tokio::fs::remove_file(&tmp).await;

    match outcome {
        Ok(objects) => {
            let kept: Vec<_> = objects
                .into_iter()
                .filter(|o| o.confidence >= confidence)
                .collect();
            let record = LabelRecord::from_detections(&media_ref, kept);
            debug!(media_ref, label = ?record.top_label, "video labeled");
            Ok(record)
        }
        // Tool ran and failed: cache the failure so a broken video does not
        // re-run the pipeline on every poll.
        Err(ServiceError::ExtractionFailed(detail)) => {
            warn!(media_ref, detail, "labeling failed, caching error record");
            Ok(LabelRecord::failed(&media_ref, detail))
        }
        // Unavailable/misconfigured backends are operator-fixable or
        // transient; never cached.
        Err(e) => Err(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::label::{DetectedObject, TopLabel};
    use crate::extract::MockFrameCommandRunner;
    use crate::infer::MockInferenceBackend;
    use async_trait::async_trait;
    use std::fs;
    use std::io;
    use std::os::unix::process::ExitStatusExt;
    use std::path::Path;
    use std::process::{ExitStatus, Output};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::tempdir;

    const REF: &str = "cam1/20240101/075659.mp4";

    fn media_tree() -> (tempfile::TempDir, MediaRoot) {
        let dir = tempdir().unwrap();
        let video_dir = dir.path().join("cam1").join("20240101");
        fs::create_dir_all(&video_dir).unwrap();
        fs::write(video_dir.join("075659.mp4"), b"mp4").unwrap();
        let root = MediaRoot::new(dir.path()).unwrap();
        (dir, root)
    }

    fn output(stdout: &str, success: bool) -> io::Result<Output> {
        Ok(Output {
            status: if success {
                ExitStatus::from_raw(0)
            } else {
                ExitStatus::from_raw(256)
            },
            stdout: stdout.as_bytes().to_vec(),
            stderr: b"stderr".to_vec(),
        })
    }

    /// Runner that probes a 10s duration and writes a fake frame.
    fn extracting_runner() -> MockFrameCommandRunner {
        let mut runner = MockFrameCommandRunner::new();
        runner
            .expect_run_ffprobe_duration()
            .returning(|_| output("10.0\n", true));
        runner.expect_run_ffmpeg_extract().returning(|_, _, _, out| {
            fs::write(out, b"fake-frame").unwrap();
            output("", true)
        });
        runner
    }

    fn obj(class: &str, confidence: f32) -> DetectedObject {
        DetectedObject {
            class: class.to_string(),
            confidence,
            bounding_box: None,
        }
    }

    /// Hand-rolled backend double for call counting and slow responses.
    struct StubBackend {
        delay: Duration,
        result: Result<Vec<DetectedObject>, ServiceError>,
        calls: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl InferenceBackend for StubBackend {
        async fn classify(&self, _frame: &Path) -> Result<Vec<DetectedObject>, ServiceError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(self.delay).await;
            self.result.clone()
        }
    }

    fn service(
        root: MediaRoot,
        cache_dir: &Path,
        runner: MockFrameCommandRunner,
        backend: Arc<dyn InferenceBackend>,
        enabled: bool,
    ) -> LabelService<MockFrameCommandRunner> {
        LabelService::new(
            root,
            cache_dir.to_path_buf(),
            Arc::new(runner),
            backend,
            0.55,
            enabled,
        )
    }

    #[tokio::test]
    async fn disabled_pipeline_refuses_triggers() {
        let (_m, root) = media_tree();
        let cache = tempdir().unwrap();
        let svc = service(
            root,
            cache.path(),
            MockFrameCommandRunner::new(),
            Arc::new(MockInferenceBackend::new()),
            false,
        );
        assert_eq!(
            svc.request_label(REF).await.unwrap_err(),
            ServiceError::AiDisabled
        );
    }

    #[tokio::test]
    async fn labels_and_caches_a_video() {
        let (_m, root) = media_tree();
        let cache = tempdir().unwrap();
        let mut backend = MockInferenceBackend::new();
        backend
            .expect_classify()
            .times(1)
            .returning(|_| Ok(vec![obj("car", 0.95), obj("person", 0.72)]));
        let svc = service(root, cache.path(), extracting_runner(), Arc::new(backend), true);

        let record = svc.request_label(REF).await.unwrap();
        assert_eq!(record.top_label, TopLabel::Person);
        assert_eq!(record.confidence, 0.72);
        assert_eq!(record.media_ref, REF);

        // Second trigger is a cache hit; classify was times(1).
        let again = svc.request_label(REF).await.unwrap();
        assert_eq!(again, record);
        assert_eq!(svc.get_cached(REF).await.unwrap().unwrap(), record);
    }

    #[tokio::test]
    async fn get_cached_never_computes() {
        let (_m, root) = media_tree();
        let cache = tempdir().unwrap();
        let mut backend = MockInferenceBackend::new();
        backend.expect_classify().times(0);
        let mut runner = MockFrameCommandRunner::new();
        runner.expect_run_ffmpeg_extract().times(0);
        runner.expect_run_ffprobe_duration().times(0);
        let svc = service(root, cache.path(), runner, Arc::new(backend), true);

        assert_eq!(svc.get_cached(REF).await.unwrap(), None);
        assert!(!svc.is_processing(REF));
    }

    #[tokio::test]
    async fn missing_video_is_not_found() {
        let (_m, root) = media_tree();
        let cache = tempdir().unwrap();
        let svc = service(
            root,
            cache.path(),
            MockFrameCommandRunner::new(),
            Arc::new(MockInferenceBackend::new()),
            true,
        );
        assert!(matches!(
            svc.get_cached("cam1/20240101/nope.mp4").await.unwrap_err(),
            ServiceError::NotFound(_)
        ));
        assert!(matches!(
            svc.request_label("cam1/20240101/nope.mp4").await.unwrap_err(),
            ServiceError::NotFound(_)
        ));
    }

    #[tokio::test]
    async fn below_threshold_detections_yield_unknown() {
        let (_m, root) = media_tree();
        let cache = tempdir().unwrap();
        let mut backend = MockInferenceBackend::new();
        backend
            .expect_classify()
            .returning(|_| Ok(vec![obj("person", 0.3)]));
        let svc = service(root, cache.path(), extracting_runner(), Arc::new(backend), true);

        let record = svc.request_label(REF).await.unwrap();
        assert_eq!(record.top_label, TopLabel::Unknown);
        assert_eq!(record.confidence, 0.0);
        assert!(record.objects.is_empty());
    }

    #[tokio::test]
    async fn extraction_failure_is_cached_as_error_record() {
        let (_m, root) = media_tree();
        let cache = tempdir().unwrap();
        let mut runner = MockFrameCommandRunner::new();
        runner
            .expect_run_ffprobe_duration()
            .returning(|_| output("10.0\n", true));
        // Two explicit triggers re-run the failing extraction twice.
        runner
            .expect_run_ffmpeg_extract()
            .times(2)
            .returning(|_, _, _, _| output("", false));
        let svc = service(
            root,
            cache.path(),
            runner,
            Arc::new(MockInferenceBackend::new()),
            true,
        );

        let record = svc.request_label(REF).await.unwrap();
        assert!(record.is_error());
        assert!(record.error_detail.is_some());

        // Reads return the stable error record without recomputing.
        let cached = svc.get_cached(REF).await.unwrap().unwrap();
        assert!(cached.is_error());

        // An explicit re-trigger supersedes it (and fails again here).
        let retried = svc.request_label(REF).await.unwrap();
        assert!(retried.is_error());
    }

    #[tokio::test]
    async fn unreachable_backend_is_not_cached() {
        let (_m, root) = media_tree();
        let cache = tempdir().unwrap();
        let mut backend = MockInferenceBackend::new();
        backend
            .expect_classify()
            .returning(|_| Err(ServiceError::InferenceUnavailable("connect refused".into())));
        let svc = service(root, cache.path(), extracting_runner(), Arc::new(backend), true);

        let err = svc.request_label(REF).await.unwrap_err();
        assert!(matches!(err, ServiceError::InferenceUnavailable(_)));
        assert_eq!(svc.get_cached(REF).await.unwrap(), None);
    }

    #[tokio::test]
    async fn concurrent_triggers_share_one_computation() {
        let (_m, root) = media_tree();
        let cache = tempdir().unwrap();
        let calls = Arc::new(AtomicUsize::new(0));
        let backend = StubBackend {
            delay: Duration::from_millis(60),
            result: Ok(vec![obj("dog", 0.8)]),
            calls: Arc::clone(&calls),
        };
        let svc = Arc::new(service(
            root,
            cache.path(),
            extracting_runner(),
            Arc::new(backend),
            true,
        ));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let svc = Arc::clone(&svc);
            handles.push(tokio::spawn(async move { svc.request_label(REF).await }));
        }
        for outcome in futures::future::join_all(handles).await {
            let record = outcome.unwrap().unwrap();
            assert_eq!(record.top_label, TopLabel::Animal);
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn bounded_wait_times_out_but_job_completes() {
        let (_m, root) = media_tree();
        let cache = tempdir().unwrap();
        let backend = StubBackend {
            delay: Duration::from_millis(100),
            result: Ok(vec![obj("person", 0.9)]),
            calls: Arc::new(AtomicUsize::new(0)),
        };
        let svc = service(root, cache.path(), extracting_runner(), Arc::new(backend), true);

        let err = svc
            .request_label_bounded(REF, Duration::from_millis(10))
            .await
            .unwrap_err();
        assert_eq!(err, ServiceError::Timeout);
        assert!(svc.is_processing(REF));

        // The detached job finishes; a later poll observes the record.
        tokio::time::sleep(Duration::from_millis(250)).await;
        assert!(!svc.is_processing(REF));
        let record = svc.get_cached(REF).await.unwrap().unwrap();
        assert_eq!(record.top_label, TopLabel::Person);
    }

    #[tokio::test]
    async fn temp_frames_are_cleaned_up() {
        let (_m, root) = media_tree();
        let cache = tempdir().unwrap();
        let mut backend = MockInferenceBackend::new();
        backend
            .expect_classify()
            .returning(|_| Ok(vec![obj("person", 0.9)]));
        let svc = service(root, cache.path(), extracting_runner(), Arc::new(backend), true);

        svc.request_label(REF).await.unwrap();
        let leftovers = fs::read_dir(cache.path().join("tmp")).unwrap().count();
        assert_eq!(leftovers, 0);
    }
}
