//! Content-addressed cache store and the single-flight job coordinator.
//!
//! One [`SingleFlightCache`] instance owns one keyspace (thumbnails and labels
//! each get their own, under separate directories). The in-flight map is the
//! only mutable shared structure; the lock is held only for insert, lookup
//! and remove.

use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::future::Future;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use tokio::sync::broadcast;
use tracing::{debug, warn};

use crate::error::ServiceError;

/// Deterministic hex digest over the declared inputs of a computation.
/// No timestamps, no salt: identical inputs always hit the same slot.
pub fn cache_key(parts: &[&str]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(parts.join("|").as_bytes());
    let digest = hasher.finalize();
    digest.iter().map(|b| format!("{:02x}", b)).collect()
}

/// Disk-backed key→file store, one file per key, no index.
#[derive(Debug)]
pub struct CacheStore {
    dir: PathBuf,
    extension: &'static str,
}

impl CacheStore {
    pub fn new(dir: PathBuf, extension: &'static str) -> Self {
        Self { dir, extension }
    }

    pub fn path_for(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{}.{}", key, self.extension))
    }

    pub async fn read(&self, key: &str) -> Result<Option<Vec<u8>>, ServiceError> {
        match tokio::fs::read(self.path_for(key)).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(ServiceError::Internal(format!("cache read: {}", e))),
        }
    }

    /// Write-to-temp-then-rename so a concurrent reader never observes a
    /// partially written artifact.
    pub async fn write_atomic(&self, key: &str, bytes: &[u8]) -> Result<PathBuf, ServiceError> {
        tokio::fs::create_dir_all(&self.dir)
            .await
            .map_err(|e| ServiceError::Internal(format!("cache dir: {}", e)))?;

        let target = self.path_for(key);
        let tmp = self
            .dir
            .join(format!(".{}.{}.tmp", key, uuid::Uuid::new_v4()));
        tokio::fs::write(&tmp, bytes)
            .await
            .map_err(|e| ServiceError::Internal(format!("cache write: {}", e)))?;
        if let Err(e) = tokio::fs::rename(&tmp, &target).await {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(ServiceError::Internal(format!("cache rename: {}", e)));
        }
        Ok(target)
    }
}

type JobSender<T> = broadcast::Sender<Result<T, ServiceError>>;

/// Cache-backed single-flight coordinator.
///
/// `get_or_compute` guarantees: a persisted artifact short-circuits the
/// compute; concurrent callers for one key share a single compute; the
/// compute runs in a detached task, so an impatient caller abandoning its
/// wait never cancels the job. Always used behind an [`Arc`].
pub struct SingleFlightCache<T: Clone + Send + Sync + 'static> {
    store: CacheStore,
    inflight: Mutex<HashMap<String, JobSender<T>>>,
    encode: fn(&T) -> Result<Vec<u8>, ServiceError>,
    decode: fn(&[u8]) -> Option<T>,
}

impl<T: Clone + Send + Sync + 'static> SingleFlightCache<T> {
    pub fn new(
        store: CacheStore,
        encode: fn(&T) -> Result<Vec<u8>, ServiceError>,
        decode: fn(&[u8]) -> Option<T>,
    ) -> Arc<Self> {
        Arc::new(Self {
            store,
            inflight: Mutex::new(HashMap::new()),
            encode,
            decode,
        })
    }

    pub fn store(&self) -> &CacheStore {
        &self.store
    }

    /// True iff a job for this key is currently running.
    pub fn is_processing(&self, key: &str) -> bool {
        self.inflight.lock().unwrap().contains_key(key)
    }

    /// Pure cache read; never starts a computation.
    pub async fn get_cached(&self, key: &str) -> Result<Option<T>, ServiceError> {
        match self.store.read(key).await? {
            Some(bytes) => Ok((self.decode)(&bytes)),
            None => Ok(None),
        }
    }

    /// Return the persisted artifact if present, otherwise join or start the
    /// single in-flight computation for this key.
    pub async fn get_or_compute<F>(self: &Arc<Self>, key: &str, compute: F) -> Result<T, ServiceError>
    where
        F: Future<Output = Result<T, ServiceError>> + Send + 'static,
    {
        if let Some(cached) = self.get_cached(key).await? {
            debug!(key, "cache hit");
            return Ok(cached);
        }
        self.join_or_start(key, compute).await
    }

    /// Like `get_or_compute` but skips the cache read: the explicit
    /// re-trigger path that lets a caller supersede a cached ERROR record.
    /// Still single-flight, still persists the outcome.
    pub async fn recompute<F>(self: &Arc<Self>, key: &str, compute: F) -> Result<T, ServiceError>
    where
        F: Future<Output = Result<T, ServiceError>> + Send + 'static,
    {
        self.join_or_start(key, compute).await
    }

    async fn join_or_start<F>(self: &Arc<Self>, key: &str, compute: F) -> Result<T, ServiceError>
    where
        F: Future<Output = Result<T, ServiceError>> + Send + 'static,
    {
        let mut rx = {
            let mut inflight = self.inflight.lock().unwrap();
            if let Some(tx) = inflight.get(key) {
                debug!(key, "joining in-flight job");
                tx.subscribe()
            } else {
                let (tx, rx) = broadcast::channel(1);
                inflight.insert(key.to_string(), tx);
                let this = Arc::clone(self);
                let key = key.to_string();
                tokio::spawn(async move {
                    this.run_job(key, compute).await;
                });
                rx
            }
        };

        match rx.recv().await {
            Ok(outcome) => outcome,
            // Sender dropped without a result: the job task panicked.
            Err(_) => Err(ServiceError::Internal("job vanished without result".into())),
        }
    }

    async fn run_job<F>(&self, key: String, compute: F)
    where
        F: Future<Output = Result<T, ServiceError>> + Send + 'static,
    {
        let outcome = match compute.await {
            Ok(artifact) => match (self.encode)(&artifact) {
                Ok(bytes) => match self.store.write_atomic(&key, &bytes).await {
                    Ok(_) => Ok(artifact),
                    Err(e) => {
                        warn!(key, error = %e, "failed to persist artifact");
                        Err(e)
                    }
                },
                Err(e) => Err(e),
            },
            Err(e) => Err(e),
        };

        // Remove the in-flight entry before delivering, so a caller arriving
        // after the broadcast reads the persisted artifact (or retries).
        let tx = self.inflight.lock().unwrap().remove(&key);
        if let Some(tx) = tx {
            // No receivers is fine: every waiter may have timed out.
            let _ = tx.send(outcome);
        }
    }
}
