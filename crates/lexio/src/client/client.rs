//! # Translation Client
//!
//! Retrying, cancellable wrapper around the chat-completion endpoint.
//! Responses are consumed incrementally when the server streams; a
//! failed stream falls back to one blocking request within the same
//! attempt. Failed attempts back off exponentially (1s, 2s, ...) up to
//! the retry limit, after which the caller receives one terminal,
//! human-readable error instead of a panic on a background worker.
//!
//! Cancellation is an advisory flag: it never interrupts in-flight
//! network I/O, and a cancelled call's result is still delivered so an
//! answer that already paid its network cost is not thrown away.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use futures::StreamExt;
use rustls::ClientConfig as TlsConfig;
use rustls_platform_verifier::BuilderVerifierExt;
use tracing::{debug, error, info, warn};

use crate::client::protocol::{ChatMessage, ChatRequest, ChatResponse, TranslateRequest};
use crate::client::sse::{ChunkCoalescer, SseDecoder, SseEvent};
use crate::config::ApiConfig;
use crate::error::ClientError;

const PARTIAL_RESULT_MARKER: &str = "[translation timed out, partial result]";

/// Advisory cancellation flag shared between a caller and a running
/// call. Setting it never stops the call; consumers decide what to do
/// with a result that arrives after cancellation.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

/// Streaming chat-completion client with retry/backoff
pub struct TranslationClient {
    http: reqwest::Client,
    api: parking_lot::RwLock<ApiConfig>,
}

/// Create a reqwest Client backed by the platform certificate verifier
fn create_http_client() -> Result<reqwest::Client, ClientError> {
    let provider = Arc::new(rustls::crypto::aws_lc_rs::default_provider());

    let tls_config = TlsConfig::builder_with_provider(provider)
        .with_safe_default_protocol_versions()
        .expect("Failed to configure default TLS protocol versions")
        .with_platform_verifier()
        .expect("Failed to initialize platform certificate verifier")
        .with_no_client_auth();

    reqwest::Client::builder()
        .pool_max_idle_per_host(5)
        .connect_timeout(Duration::from_secs(10))
        .use_preconfigured_tls(tls_config)
        .build()
        .map_err(ClientError::from)
}

impl TranslationClient {
    pub fn new(api: ApiConfig) -> Result<Self, ClientError> {
        if api.api_key.is_empty() {
            warn!("No API key configured, translation calls will fail until one is set");
        }
        Ok(Self {
            http: create_http_client()?,
            api: parking_lot::RwLock::new(api),
        })
    }

    /// Replace the API key for subsequent calls.
    pub fn set_api_key(&self, api_key: impl Into<String>) {
        self.api.write().api_key = api_key.into();
        info!("API key updated");
    }

    /// Replace the model for subsequent calls.
    pub fn set_model(&self, model: impl Into<String>) {
        let model = model.into();
        info!(%model, "Model updated");
        self.api.write().model = model;
    }

    /// Translate `request`, delivering coalesced interim chunks to
    /// `on_chunk` and returning the full accumulated text. Wraps each
    /// attempt's per-request timeout with up to `max_retries` attempts
    /// separated by exponential backoff.
    pub async fn translate<F>(
        &self,
        request: &TranslateRequest,
        cancel: &CancelFlag,
        mut on_chunk: F,
    ) -> Result<String, ClientError>
    where
        F: FnMut(&str) + Send,
    {
        let api = self.api.read().clone();
        if api.api_key.is_empty() {
            return Err(ClientError::MissingApiKey);
        }

        info!(
            direction = request.direction.as_str(),
            chars = request.text.chars().count(),
            "Starting translation"
        );

        let mut attempt: u32 = 0;
        loop {
            debug!(
                attempt = attempt + 1,
                max = api.max_retries,
                "Translation attempt"
            );

            match self.perform(&api, request, &mut on_chunk).await {
                Ok(text) => {
                    if cancel.is_cancelled() {
                        // Advisory flag: the late answer is still
                        // delivered; presentation is the consumer's call.
                        info!("Translation finished after cancellation was requested");
                    }
                    return Ok(text);
                }
                Err(err) => {
                    attempt += 1;
                    if attempt >= api.max_retries.max(1) {
                        error!(error = %err, attempts = attempt, "Translation failed, retries exhausted");
                        return Err(ClientError::RetriesExhausted {
                            attempts: attempt,
                            last_error: err.to_string(),
                        });
                    }

                    let delay = backoff_delay(attempt);
                    warn!(error = %err, delay = ?delay, "Attempt failed, backing off");
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }

    /// One attempt: streaming first, one blocking fallback if the stream
    /// breaks for a non-timeout reason.
    async fn perform<F>(
        &self,
        api: &ApiConfig,
        request: &TranslateRequest,
        on_chunk: &mut F,
    ) -> Result<String, ClientError>
    where
        F: FnMut(&str) + Send,
    {
        match self.perform_streaming(api, request, on_chunk).await {
            Ok(text) => Ok(text),
            Err(err @ ClientError::Timeout(_)) => Err(err),
            Err(err) => {
                warn!(error = %err, "Streaming failed, falling back to blocking request");
                self.perform_blocking(api, request).await
            }
        }
    }

    async fn perform_streaming<F>(
        &self,
        api: &ApiConfig,
        request: &TranslateRequest,
        on_chunk: &mut F,
    ) -> Result<String, ClientError>
    where
        F: FnMut(&str) + Send,
    {
        let prompt = request.prompt();
        let body = ChatRequest {
            model: &api.model,
            messages: vec![ChatMessage {
                role: "user",
                content: &prompt,
            }],
            temperature: api.temperature,
            max_tokens: api.max_tokens,
            stream: true,
        };

        let response = self
            .http
            .post(chat_url(&api.base_url))
            .bearer_auth(&api.api_key)
            .json(&body)
            .timeout(api.timeout)
            .send()
            .await
            .map_err(|e| classify(e, api.timeout))?;

        if !response.status().is_success() {
            return Err(ClientError::Status(response.status()));
        }

        let mut stream = response.bytes_stream();
        let mut decoder = SseDecoder::default();
        let mut coalescer = ChunkCoalescer::new(api.flush_interval);
        let mut full = String::new();
        let mut received = 0usize;

        while let Some(next) = stream.next().await {
            let bytes = match next {
                Ok(bytes) => bytes,
                Err(e) if e.is_timeout() => {
                    // Out of per-attempt budget mid-stream. With text
                    // accumulated the attempt completes as a partial
                    // result; with nothing it is retryable.
                    return if full.is_empty() {
                        Err(ClientError::Timeout(api.timeout))
                    } else {
                        warn!(chars = full.chars().count(), "Stream timed out, keeping partial result");
                        Ok(format!("{full}\n\n{PARTIAL_RESULT_MARKER}"))
                    };
                }
                Err(e) => return Err(e.into()),
            };

            for event in decoder.feed(&bytes)? {
                match event {
                    SseEvent::Delta(fragment) => {
                        received += 1;
                        full.push_str(&fragment);
                        if let Some(chunk) = coalescer.push(&fragment) {
                            on_chunk(&chunk);
                        }
                    }
                    SseEvent::Done => {
                        if let Some(rest) = coalescer.finish() {
                            on_chunk(&rest);
                        }
                        debug!(
                            fragments = received,
                            chars = full.chars().count(),
                            "Stream complete"
                        );
                        return Ok(full.trim().to_owned());
                    }
                }
            }
        }

        // Stream ended without the sentinel; keep what arrived.
        if let Some(rest) = coalescer.finish() {
            on_chunk(&rest);
        }
        debug!(fragments = received, "Stream closed without sentinel");
        Ok(full.trim().to_owned())
    }

    async fn perform_blocking(
        &self,
        api: &ApiConfig,
        request: &TranslateRequest,
    ) -> Result<String, ClientError> {
        let prompt = request.prompt();
        let body = ChatRequest {
            model: &api.model,
            messages: vec![ChatMessage {
                role: "user",
                content: &prompt,
            }],
            temperature: api.temperature,
            max_tokens: api.max_tokens,
            stream: false,
        };

        let response = self
            .http
            .post(chat_url(&api.base_url))
            .bearer_auth(&api.api_key)
            .json(&body)
            .timeout(api.timeout)
            .send()
            .await
            .map_err(|e| classify(e, api.timeout))?;

        if !response.status().is_success() {
            return Err(ClientError::Status(response.status()));
        }

        let parsed: ChatResponse = response
            .json()
            .await
            .map_err(|e| ClientError::Protocol(format!("unexpected response shape: {e}")))?;

        let choice = parsed
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| ClientError::Protocol("response contained no choices".to_owned()))?;

        Ok(choice.message.content.trim().to_owned())
    }
}

fn chat_url(base_url: &str) -> String {
    format!("{}/chat/completions", base_url.trim_end_matches('/'))
}

fn classify(err: reqwest::Error, timeout: Duration) -> ClientError {
    if err.is_timeout() {
        ClientError::Timeout(timeout)
    } else {
        ClientError::Http(err)
    }
}

/// Delay before the next attempt, after `failed_attempts` failures:
/// 1s, 2s, 4s, ... capped well under the per-attempt timeout.
fn backoff_delay(failed_attempts: u32) -> Duration {
    Duration::from_secs(1u64 << failed_attempts.saturating_sub(1).min(6))
}
