//! # Translation Service
//!
//! Composition layer owning one instance of each subsystem. A submitted
//! translation probes the cache, falls through to the streaming client,
//! reports interim chunks, and stores the result for reuse; recognition
//! work runs a collaborator-supplied recognizer on the same executor and
//! caches its output under a longer-lived category.

use std::sync::Arc;
use std::time::Duration;

use sha2::{Digest, Sha256};
use tracing::debug;

use crate::cache::{CacheReport, CacheStore};
use crate::client::{CancelFlag, TranslateRequest, TranslationClient};
use crate::config::EngineConfig;
use crate::error::{EngineError, TaskError};
use crate::task::{CompletionCallback, ExecutorStatus, ProgressTracker, TaskExecutor};

/// Category for cached translations
pub const TRANSLATION_CATEGORY: &str = "translations";
/// Category for cached recognition output
pub const OCR_CATEGORY: &str = "ocr_results";

const TRANSLATION_PRIORITY: i32 = 1;
const OCR_PRIORITY: i32 = 0;
const OCR_TTL: Duration = Duration::from_secs(86400);

/// Collaborator-supplied recognizer, `image bytes -> text`. Implemented
/// by the excluded capture/OCR plumbing; may block on an external
/// process, so it runs on the blocking pool.
pub trait TextRecognizer: Send + Sync {
    fn recognize(&self, image: &[u8]) -> Result<String, TaskError>;
}

/// Handle returned by a translation submission
pub struct TranslationTicket {
    pub id: String,
    /// Advisory flag; setting it never truncates the response. Consumers
    /// use it to decide whether to present the late result.
    pub cancel: CancelFlag,
}

/// Owns the cache, executor, tracker, and client, and wires the
/// cache-probe → remote-call → cache-store flow on top of them.
pub struct TranslationService {
    cache: Arc<CacheStore>,
    client: Arc<TranslationClient>,
    executor: TaskExecutor<String>,
    tracker: Arc<ProgressTracker>,
    translation_ttl: Duration,
}

impl TranslationService {
    pub async fn new(config: EngineConfig) -> Result<Self, EngineError> {
        let cache = Arc::new(CacheStore::open(config.cache.clone()).await?);
        let client = Arc::new(TranslationClient::new(config.api.clone())?);

        Ok(Self {
            cache,
            client,
            executor: TaskExecutor::new(config.worker_count),
            tracker: Arc::new(ProgressTracker::new()),
            translation_ttl: config.cache.default_ttl,
        })
    }

    pub fn tracker(&self) -> &Arc<ProgressTracker> {
        &self.tracker
    }

    pub fn cache(&self) -> &Arc<CacheStore> {
        &self.cache
    }

    /// Replace the API key for subsequent calls.
    pub fn set_api_key(&self, api_key: impl Into<String>) {
        self.client.set_api_key(api_key);
    }

    /// Replace the model for subsequent calls.
    pub fn set_model(&self, model: impl Into<String>) {
        self.client.set_model(model);
    }

    pub async fn cache_stats(&self) -> CacheReport {
        self.cache.stats().await
    }

    pub fn status(&self) -> ExecutorStatus {
        self.executor.status()
    }

    /// Submit a translation under `id`. Duplicate in-flight ids are
    /// no-ops. `on_chunk` receives coalesced interim text; `on_done` is
    /// invoked exactly once with the full result or a terminal error.
    pub fn submit_translation<F>(
        &self,
        id: impl Into<String>,
        request: TranslateRequest,
        on_chunk: F,
        on_done: CompletionCallback<String>,
    ) -> TranslationTicket
    where
        F: Fn(&str) + Send + Sync + 'static,
    {
        let id = id.into();
        let cancel = CancelFlag::new();

        let cache = Arc::clone(&self.cache);
        let client = Arc::clone(&self.client);
        let tracker = Arc::clone(&self.tracker);
        let ttl = self.translation_ttl;
        let flag = cancel.clone();
        let task_id = id.clone();

        let work = async move {
            tracker.start(task_id.as_str(), 3, "probing cache");
            let cache_key = translation_cache_key(&request);

            if let Some(hit) = cache.get::<String>(&cache_key, TRANSLATION_CATEGORY).await {
                debug!(%task_id, "Translation served from cache");
                tracker.complete(&task_id, "translation served from cache");
                return Ok(hit);
            }

            tracker.update(&task_id, 1, Some("translating"));
            let text = client
                .translate(&request, &flag, on_chunk)
                .await
                .map_err(TaskError::from)?;

            tracker.update(&task_id, 2, Some("storing result"));
            cache
                .put(&cache_key, &text, TRANSLATION_CATEGORY, ttl, TRANSLATION_PRIORITY)
                .await;

            tracker.complete(&task_id, "translation complete");
            Ok(text)
        };

        let id = self.executor.submit(id, work, Some(on_done));
        TranslationTicket { id, cancel }
    }

    /// Submit recognition work under `id`, running `recognizer` on the
    /// blocking pool. Output is cached by image content hash so the same
    /// capture never pays for recognition twice.
    pub fn submit_recognition(
        &self,
        id: impl Into<String>,
        image: Vec<u8>,
        recognizer: Arc<dyn TextRecognizer>,
        on_done: CompletionCallback<String>,
    ) -> String {
        let id = id.into();
        let cache = Arc::clone(&self.cache);
        let tracker = Arc::clone(&self.tracker);
        let task_id = id.clone();

        let work = async move {
            tracker.start(task_id.as_str(), 3, "hashing image");
            let cache_key = format!("smart_ocr_{}", hex::encode(Sha256::digest(&image)));

            tracker.update(&task_id, 1, Some("probing cache"));
            if let Some(hit) = cache.get::<String>(&cache_key, OCR_CATEGORY).await {
                debug!(%task_id, "Recognition served from cache");
                tracker.complete(&task_id, "recognition served from cache");
                return Ok(hit);
            }

            tracker.update(&task_id, 2, Some("recognizing"));
            let joined = tokio::task::spawn_blocking(move || recognizer.recognize(&image))
                .await
                .map_err(|e| TaskError::new(format!("recognizer crashed: {e}")))?;
            let text = joined?;

            if !text.trim().is_empty() {
                cache
                    .put(&cache_key, &text, OCR_CATEGORY, OCR_TTL, OCR_PRIORITY)
                    .await;
            }

            tracker.complete(&task_id, "recognition complete");
            Ok(text)
        };

        self.executor.submit(id, work, Some(on_done))
    }

    /// Best-effort cancellation of a not-yet-started task.
    pub fn cancel(&self, id: &str) -> bool {
        self.executor.cancel(id)
    }

    /// Stop accepting work; with `wait = true`, drain in-flight tasks
    /// and their callbacks, then stop the cache sweeper and persist the
    /// index.
    pub async fn shutdown(&self, wait: bool) {
        self.executor.shutdown(wait).await;
        self.cache.close().await;
    }
}

fn translation_cache_key(request: &TranslateRequest) -> String {
    format!("{}:{}", request.direction.as_str(), request.text)
}
