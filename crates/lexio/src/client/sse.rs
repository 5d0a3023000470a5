//! # Stream Decoding
//!
//! Incremental decoding of server-sent-event style frames into content
//! fragments, and time-based coalescing of fragments so chunk callbacks
//! fire at a bounded cadence instead of once per network read.

use std::time::{Duration, Instant};

use crate::client::protocol::StreamFrame;
use crate::error::ClientError;

/// A decoded event from the response stream
#[derive(Debug, PartialEq, Eq)]
pub(crate) enum SseEvent {
    /// An incremental content fragment
    Delta(String),
    /// The terminating sentinel frame
    Done,
}

/// Splits an arbitrary byte stream into SSE events. Bytes may arrive cut
/// at any boundary; incomplete lines stay buffered until the rest shows
/// up.
#[derive(Default)]
pub(crate) struct SseDecoder {
    buf: Vec<u8>,
}

impl SseDecoder {
    pub fn feed(&mut self, bytes: &[u8]) -> Result<Vec<SseEvent>, ClientError> {
        self.buf.extend_from_slice(bytes);

        let mut events = Vec::new();
        while let Some(pos) = self.buf.iter().position(|&b| b == b'\n') {
            let line: Vec<u8> = self.buf.drain(..=pos).collect();
            let line = String::from_utf8_lossy(&line);
            let line = line.trim();
            if line.is_empty() {
                continue;
            }

            // Only data fields matter; comments and other fields are
            // skipped per the SSE format.
            let Some(data) = line.strip_prefix("data:") else {
                continue;
            };
            let data = data.trim();

            if data == "[DONE]" {
                events.push(SseEvent::Done);
                continue;
            }

            let frame: StreamFrame = serde_json::from_str(data)
                .map_err(|e| ClientError::Protocol(format!("bad stream frame: {e}")))?;
            for choice in frame.choices {
                if let Some(content) = choice.delta.content {
                    if !content.is_empty() {
                        events.push(SseEvent::Delta(content));
                    }
                }
            }
        }

        Ok(events)
    }
}

/// Accumulates fragments and releases them as one chunk once the flush
/// interval has elapsed, bounding callback frequency while preserving
/// arrival order.
pub(crate) struct ChunkCoalescer {
    interval: Duration,
    pending: String,
    last_flush: Instant,
}

impl ChunkCoalescer {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            pending: String::new(),
            last_flush: Instant::now(),
        }
    }

    /// Buffer a fragment; returns a coalesced chunk when due.
    pub fn push(&mut self, fragment: &str) -> Option<String> {
        self.pending.push_str(fragment);
        if self.last_flush.elapsed() >= self.interval && !self.pending.is_empty() {
            self.last_flush = Instant::now();
            Some(std::mem::take(&mut self.pending))
        } else {
            None
        }
    }

    /// Drain whatever is still buffered at end of stream.
    pub fn finish(&mut self) -> Option<String> {
        if self.pending.is_empty() {
            None
        } else {
            Some(std::mem::take(&mut self.pending))
        }
    }
}
