//! # Progress Tracker
//!
//! Per-task progress state updated by work units and exposed through
//! registered callbacks. Progress lifecycle is independent of the task
//! lifecycle: a task may never start tracking, and updates for an
//! unknown id are dropped silently.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{debug, info};

/// Receives `(percentage, description)` on every update.
pub type ProgressCallback = Arc<dyn Fn(f64, &str) + Send + Sync + 'static>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProgressStatus {
    Running,
    Completed,
}

/// Snapshot of one task's progress
#[derive(Debug, Clone)]
pub struct ProgressState {
    pub task_id: String,
    pub total_steps: u32,
    pub current_step: u32,
    pub description: String,
    pub status: ProgressStatus,
    pub started_at: Instant,
    pub ended_at: Option<Instant>,
}

impl ProgressState {
    pub fn percentage(&self) -> f64 {
        if self.total_steps > 0 {
            f64::from(self.current_step) / f64::from(self.total_steps) * 100.0
        } else {
            0.0
        }
    }

    pub fn elapsed(&self) -> Duration {
        self.ended_at.unwrap_or_else(Instant::now) - self.started_at
    }
}

#[derive(Default)]
struct TrackerInner {
    states: HashMap<String, ProgressState>,
    callbacks: HashMap<String, ProgressCallback>,
}

/// Tracks progress for any number of concurrently running tasks
#[derive(Default)]
pub struct ProgressTracker {
    inner: parking_lot::Mutex<TrackerInner>,
}

impl ProgressTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Begin tracking `task_id` at step 0 of `total_steps`.
    pub fn start(&self, task_id: impl Into<String>, total_steps: u32, description: &str) {
        let task_id = task_id.into();
        info!(%task_id, total_steps, description, "Progress tracking started");

        let mut inner = self.inner.lock();
        inner.states.insert(
            task_id.clone(),
            ProgressState {
                task_id,
                total_steps,
                current_step: 0,
                description: description.to_owned(),
                status: ProgressStatus::Running,
                started_at: Instant::now(),
                ended_at: None,
            },
        );
    }

    /// Move `task_id` to `step`, optionally replacing its description.
    /// Unknown ids are ignored.
    pub fn update(&self, task_id: &str, step: u32, description: Option<&str>) {
        let notify = {
            let mut inner = self.inner.lock();
            let Some(state) = inner.states.get_mut(task_id) else {
                debug!(task_id, "Progress update for untracked task dropped");
                return;
            };

            state.current_step = step;
            if let Some(description) = description {
                state.description = description.to_owned();
            }

            let percentage = state.percentage();
            let description = state.description.clone();
            debug!(task_id, percentage, "Progress updated");
            inner
                .callbacks
                .get(task_id)
                .cloned()
                .map(|cb| (cb, percentage, description))
        };

        // Invoke outside the lock so a callback may call back in.
        if let Some((callback, percentage, description)) = notify {
            callback(percentage, &description);
        }
    }

    /// Mark `task_id` completed and notify its callback with 100%.
    /// Unknown ids are ignored.
    pub fn complete(&self, task_id: &str, description: &str) {
        let notify = {
            let mut inner = self.inner.lock();
            let Some(state) = inner.states.get_mut(task_id) else {
                return;
            };

            state.status = ProgressStatus::Completed;
            state.description = description.to_owned();
            state.ended_at = Some(Instant::now());
            state.current_step = state.total_steps;

            info!(task_id, elapsed = ?state.elapsed(), "Progress completed");
            inner.callbacks.get(task_id).cloned()
        };

        if let Some(callback) = notify {
            callback(100.0, description);
        }
    }

    /// Register a callback for `task_id`. May be attached while the task
    /// is already running; only subsequent updates are delivered.
    pub fn add_callback(&self, task_id: impl Into<String>, callback: ProgressCallback) {
        self.inner.lock().callbacks.insert(task_id.into(), callback);
    }

    /// Remove the callback for `task_id`, if any.
    pub fn remove_callback(&self, task_id: &str) {
        self.inner.lock().callbacks.remove(task_id);
    }

    /// Snapshot of the current progress for `task_id`.
    pub fn progress(&self, task_id: &str) -> Option<ProgressState> {
        self.inner.lock().states.get(task_id).cloned()
    }

    /// Drop both the state and the callback for `task_id`.
    pub fn clear(&self, task_id: &str) {
        let mut inner = self.inner.lock();
        inner.states.remove(task_id);
        inner.callbacks.remove(task_id);
    }
}
