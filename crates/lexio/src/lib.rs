//! # Lexio Engine
//!
//! Core subsystems of the Lexio capture-translation tool, independent of
//! any UI toolkit:
//!
//! - Persistent result cache with TTL expiry and priority+recency
//!   eviction
//! - Bounded task executor with at-most-one-concurrent-per-id semantics
//!   and exactly-once completion delivery
//! - Progress tracking decoupled from task lifecycle
//! - Streaming chat-completion client with chunk coalescing,
//!   retry/backoff, and advisory cancellation
//!
//! The [`TranslationService`] composes them: submitted work probes the
//! cache, falls through to the remote call, streams interim chunks, and
//! stores results for reuse.

pub mod builder;
pub mod cache;
pub mod client;
pub mod config;
pub mod error;
pub mod service;
pub mod task;

pub use builder::EngineConfigBuilder;
pub use cache::{CacheConfig, CacheKey, CacheReport, CacheStats, CacheStore};
pub use client::{CancelFlag, Direction, TranslateRequest, TranslationClient};
pub use config::{ApiConfig, EngineConfig};
pub use error::{ClientError, EngineError, TaskError};
pub use service::{TextRecognizer, TranslationService, TranslationTicket};
pub use task::{
    CompletionCallback, ExecutorStatus, ProgressCallback, ProgressState, ProgressStatus,
    ProgressTracker, TaskExecutor,
};

#[cfg(test)]
mod test_support;
