//! # Builder for EngineConfig
//!
//! This module provides a builder pattern implementation for creating and
//! customizing EngineConfig instances with a fluent API.
//!
//! # Example
//!
//! ```
//! use std::time::Duration;
//! use lexio_engine::EngineConfig;
//!
//! let config = EngineConfig::builder()
//!     .with_api_key("sk-example")
//!     .with_model("deepseek-chat")
//!     .with_timeout(Duration::from_secs(60))
//!     .with_cache_dir("/tmp/lexio-cache")
//!     .with_max_cache_size_mb(100)
//!     .with_worker_count(4)
//!     .build();
//!
//! assert_eq!(config.api.model, "deepseek-chat");
//! assert_eq!(config.worker_count, 4);
//! ```

use std::path::PathBuf;
use std::time::Duration;

use crate::EngineConfig;

/// Builder for creating EngineConfig instances with a fluent API
#[derive(Debug, Clone)]
pub struct EngineConfigBuilder {
    /// Internal config being built
    config: EngineConfig,
}

impl EngineConfigBuilder {
    /// Create a new builder with default configuration
    pub fn new() -> Self {
        Self {
            config: EngineConfig::default(),
        }
    }

    /// Set the base URL of the chat-completion endpoint
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.config.api.base_url = base_url.into();
        self
    }

    /// Set the API key
    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        self.config.api.api_key = api_key.into();
        self
    }

    /// Set the model name
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.config.api.model = model.into();
        self
    }

    /// Set the per-attempt network timeout
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.config.api.timeout = timeout;
        self
    }

    /// Set the maximum number of attempts per remote call
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.config.api.max_retries = max_retries;
        self
    }

    /// Set the minimum spacing between streamed chunk callbacks
    pub fn with_flush_interval(mut self, interval: Duration) -> Self {
        self.config.api.flush_interval = interval;
        self
    }

    /// Set the cache directory
    pub fn with_cache_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.cache.cache_dir = dir.into();
        self
    }

    /// Set the cache size budget in megabytes
    pub fn with_max_cache_size_mb(mut self, max_size_mb: u64) -> Self {
        self.config.cache.max_size_mb = max_size_mb;
        self
    }

    /// Set the default TTL applied by cache convenience paths
    pub fn with_default_ttl(mut self, ttl: Duration) -> Self {
        self.config.cache.default_ttl = ttl;
        self
    }

    /// Set the interval between background expiry sweeps
    pub fn with_sweep_interval(mut self, interval: Duration) -> Self {
        self.config.cache.sweep_interval = interval;
        self
    }

    /// Set how many task bodies may run concurrently
    pub fn with_worker_count(mut self, worker_count: usize) -> Self {
        self.config.worker_count = worker_count.max(1);
        self
    }

    /// Build the EngineConfig instance
    pub fn build(self) -> EngineConfig {
        self.config
    }
}

impl Default for EngineConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}
