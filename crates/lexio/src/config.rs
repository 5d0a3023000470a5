use std::time::Duration;

use crate::cache::CacheConfig;

const DEFAULT_BASE_URL: &str = "https://api.deepseek.com";
const DEFAULT_MODEL: &str = "deepseek-chat";

/// Connection and model settings for the chat-completion endpoint.
#[derive(Debug, Clone)]
pub struct ApiConfig {
    /// Base URL of the OpenAI-compatible endpoint
    pub base_url: String,

    /// API key; calls fail immediately while this is empty
    pub api_key: String,

    /// Model name sent with every request
    pub model: String,

    /// Per-attempt timeout covering connect through end of body
    pub timeout: Duration,

    /// Maximum attempts per call, including the first
    pub max_retries: u32,

    /// Sampling temperature sent with every request
    pub temperature: f32,

    /// Completion token budget sent with every request
    pub max_tokens: u32,

    /// Minimum spacing between chunk callback invocations while streaming
    pub flush_interval: Duration,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_owned(),
            api_key: String::new(),
            model: DEFAULT_MODEL.to_owned(),
            timeout: Duration::from_secs(30),
            max_retries: 3,
            temperature: 0.7,
            max_tokens: 4000,
            flush_interval: Duration::from_millis(300),
        }
    }
}

/// Top-level engine configuration, read once at startup by the embedding
/// application and on explicit reconfiguration.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Remote endpoint settings
    pub api: ApiConfig,

    /// Disk cache settings
    pub cache: CacheConfig,

    /// Number of task bodies allowed to run concurrently
    pub worker_count: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            api: ApiConfig::default(),
            cache: CacheConfig::default(),
            worker_count: 6,
        }
    }
}

impl EngineConfig {
    pub fn builder() -> crate::builder::EngineConfigBuilder {
        crate::builder::EngineConfigBuilder::new()
    }
}
