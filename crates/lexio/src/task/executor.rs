//! # Task Executor
//!
//! Bounded asynchronous executor with at-most-one-concurrent-per-id
//! semantics. Submitting an id that is already in flight is a no-op, so
//! a double-click can never run the same work twice.
//!
//! Completions are handed off through a channel drained by a single
//! dispatcher task; completion callbacks therefore never run on an
//! arbitrary worker. Every spawned unit of work keeps a joinable handle,
//! so `shutdown(wait = true)` can await all outstanding work. After
//! `shutdown(wait = false)` in-flight tasks keep running and their
//! callbacks still fire; callbacks must check that their target state
//! still exists before acting on it.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use futures::FutureExt;
use tokio::sync::{Semaphore, mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::error::TaskError;

/// Invoked exactly once per accepted submission with the work unit's
/// outcome.
pub type CompletionCallback<T> = Box<dyn FnOnce(Result<T, TaskError>) + Send + 'static>;

/// Diagnostic view of the executor
#[derive(Debug, Clone)]
pub struct ExecutorStatus {
    /// Ids submitted and not yet completed (queued or running)
    pub running: Vec<String>,
    /// Callbacks registered and not yet invoked
    pub pending_callbacks: usize,
}

enum Completion<T> {
    Finished {
        id: String,
        outcome: Result<T, TaskError>,
    },
    Flush(oneshot::Sender<()>),
}

struct TaskEntry {
    started: Arc<AtomicBool>,
    cancelled: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

struct ExecutorShared<T> {
    permits: Arc<Semaphore>,
    tasks: parking_lot::Mutex<HashMap<String, TaskEntry>>,
    callbacks: parking_lot::Mutex<HashMap<String, CompletionCallback<T>>>,
    completion_tx: mpsc::UnboundedSender<Completion<T>>,
    accepting: AtomicBool,
}

/// Bounded executor for id-keyed work units
pub struct TaskExecutor<T> {
    shared: Arc<ExecutorShared<T>>,
    #[allow(dead_code)]
    dispatcher: JoinHandle<()>,
}

impl<T: Send + 'static> TaskExecutor<T> {
    /// Create an executor allowing `worker_count` task bodies to run
    /// concurrently.
    pub fn new(worker_count: usize) -> Self {
        let (completion_tx, completion_rx) = mpsc::unbounded_channel();

        let shared = Arc::new(ExecutorShared {
            permits: Arc::new(Semaphore::new(worker_count.max(1))),
            tasks: parking_lot::Mutex::new(HashMap::new()),
            callbacks: parking_lot::Mutex::new(HashMap::new()),
            completion_tx,
            accepting: AtomicBool::new(true),
        });

        let dispatcher = tokio::spawn(Self::run_dispatcher(Arc::clone(&shared), completion_rx));

        Self { shared, dispatcher }
    }

    /// Submit a work unit under `id`. If a task with the same id is
    /// already in flight the submission is ignored and the id returned
    /// unchanged. Otherwise the work is dispatched onto the pool and the
    /// callback, if any, is invoked exactly once with the outcome.
    pub fn submit<F>(
        &self,
        id: impl Into<String>,
        work: F,
        callback: Option<CompletionCallback<T>>,
    ) -> String
    where
        F: Future<Output = Result<T, TaskError>> + Send + 'static,
    {
        let id = id.into();
        let mut tasks = self.shared.tasks.lock();

        if tasks.contains_key(&id) {
            warn!(%id, "Task already in flight, submission ignored");
            return id;
        }

        if !self.shared.accepting.load(Ordering::Acquire) {
            warn!(%id, "Executor is shut down, rejecting submission");
            if let Some(cb) = callback {
                self.shared.callbacks.lock().insert(id.clone(), cb);
                let _ = self.shared.completion_tx.send(Completion::Finished {
                    id: id.clone(),
                    outcome: Err(TaskError::new("executor is shut down")),
                });
            }
            return id;
        }

        if let Some(cb) = callback {
            self.shared.callbacks.lock().insert(id.clone(), cb);
        }

        let started = Arc::new(AtomicBool::new(false));
        let cancelled = Arc::new(AtomicBool::new(false));
        tasks.insert(
            id.clone(),
            TaskEntry {
                started: Arc::clone(&started),
                cancelled: Arc::clone(&cancelled),
                handle: None,
            },
        );

        let shared = Arc::clone(&self.shared);
        let task_id = id.clone();
        let handle = tokio::spawn(async move {
            let permit = match Arc::clone(&shared.permits).acquire_owned().await {
                Ok(permit) => permit,
                Err(_) => return,
            };

            // Transition to started atomically with the cancellation
            // check; cancel() inspects `started` under the same lock.
            {
                let tasks = shared.tasks.lock();
                match tasks.get(&task_id) {
                    Some(entry) if !entry.cancelled.load(Ordering::Acquire) => {
                        entry.started.store(true, Ordering::Release);
                    }
                    _ => return,
                }
            }

            let outcome = match std::panic::AssertUnwindSafe(work).catch_unwind().await {
                Ok(result) => result,
                Err(_) => Err(TaskError::new(format!("task '{task_id}' panicked"))),
            };
            drop(permit);

            let _ = shared
                .completion_tx
                .send(Completion::Finished { id: task_id, outcome });
        });

        if let Some(entry) = tasks.get_mut(&id) {
            entry.handle = Some(handle);
        }
        debug!(%id, "Task submitted");
        id
    }

    /// Best-effort cancellation: succeeds only while the task has not
    /// begun executing. A cancelled task never runs and its completion
    /// callback is discarded unrun.
    pub fn cancel(&self, id: &str) -> bool {
        let mut tasks = self.shared.tasks.lock();
        let Some(entry) = tasks.get_mut(id) else {
            return false;
        };
        if entry.started.load(Ordering::Acquire) {
            return false;
        }

        entry.cancelled.store(true, Ordering::Release);
        if let Some(handle) = entry.handle.take() {
            handle.abort();
        }
        tasks.remove(id);
        drop(tasks);

        self.shared.callbacks.lock().remove(id);
        info!(%id, "Task cancelled before start");
        true
    }

    /// Whether a task with this id is currently in flight.
    pub fn is_running(&self, id: &str) -> bool {
        self.shared.tasks.lock().contains_key(id)
    }

    /// Stop accepting new submissions. With `wait = true`, blocks until
    /// every in-flight task has finished and its callback has run. With
    /// `wait = false`, returns immediately; in-flight tasks continue in
    /// the background and their callbacks still fire.
    pub async fn shutdown(&self, wait: bool) {
        self.shared.accepting.store(false, Ordering::Release);
        info!(wait, "Task executor shutting down");

        if !wait {
            return;
        }

        let handles: Vec<JoinHandle<()>> = {
            let mut tasks = self.shared.tasks.lock();
            tasks
                .values_mut()
                .filter_map(|entry| entry.handle.take())
                .collect()
        };
        for handle in handles {
            let _ = handle.await;
        }

        // Drain the completion queue so every callback has run.
        let (tx, rx) = oneshot::channel();
        if self
            .shared
            .completion_tx
            .send(Completion::Flush(tx))
            .is_ok()
        {
            let _ = rx.await;
        }
        info!("Task executor drained");
    }

    /// Current set of in-flight ids and count of pending callbacks.
    pub fn status(&self) -> ExecutorStatus {
        ExecutorStatus {
            running: self.shared.tasks.lock().keys().cloned().collect(),
            pending_callbacks: self.shared.callbacks.lock().len(),
        }
    }

    async fn run_dispatcher(
        shared: Arc<ExecutorShared<T>>,
        mut completion_rx: mpsc::UnboundedReceiver<Completion<T>>,
    ) {
        while let Some(completion) = completion_rx.recv().await {
            match completion {
                Completion::Finished { id, outcome } => {
                    let callback = shared.callbacks.lock().remove(&id);
                    shared.tasks.lock().remove(&id);

                    match &outcome {
                        Ok(_) => debug!(%id, "Task completed"),
                        Err(e) => warn!(%id, error = %e, "Task failed"),
                    }
                    if let Some(callback) = callback {
                        callback(outcome);
                    }
                }
                Completion::Flush(ack) => {
                    let _ = ack.send(());
                }
            }
        }
        debug!("Task executor dispatcher stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    fn counting_callback(
        invocations: Arc<AtomicUsize>,
        done: oneshot::Sender<Result<String, TaskError>>,
    ) -> CompletionCallback<String> {
        Box::new(move |outcome| {
            invocations.fetch_add(1, Ordering::SeqCst);
            let _ = done.send(outcome);
        })
    }

    #[tokio::test]
    async fn test_no_duplicate_concurrent_execution() {
        let executor = TaskExecutor::<String>::new(4);
        let executions = Arc::new(AtomicUsize::new(0));
        let callbacks = Arc::new(AtomicUsize::new(0));
        let (tx, rx) = oneshot::channel();

        let make_work = |executions: Arc<AtomicUsize>| async move {
            executions.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(200)).await;
            Ok("done".to_owned())
        };

        executor.submit(
            "x",
            make_work(Arc::clone(&executions)),
            Some(counting_callback(Arc::clone(&callbacks), tx)),
        );
        let (tx2, _rx2) = oneshot::channel();
        executor.submit(
            "x",
            make_work(Arc::clone(&executions)),
            Some(counting_callback(Arc::clone(&callbacks), tx2)),
        );

        let outcome = rx.await.unwrap();
        assert_eq!(outcome.unwrap(), "done");
        // Give a potential (erroneous) second run time to surface.
        tokio::time::sleep(Duration::from_millis(300)).await;
        assert_eq!(executions.load(Ordering::SeqCst), 1);
        assert_eq!(callbacks.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_id_reusable_after_completion() {
        let executor = TaskExecutor::<String>::new(2);

        for round in 0..2 {
            let (tx, rx) = oneshot::channel();
            executor.submit(
                "again",
                async move { Ok(format!("round {round}")) },
                Some(Box::new(move |outcome| {
                    let _ = tx.send(outcome);
                })),
            );
            let outcome = rx.await.unwrap().unwrap();
            assert_eq!(outcome, format!("round {round}"));
        }
    }

    #[tokio::test]
    async fn test_error_delivered_through_callback() {
        let executor = TaskExecutor::<String>::new(2);
        let (tx, rx) = oneshot::channel();

        executor.submit(
            "failing",
            async { Err(TaskError::new("boom")) },
            Some(Box::new(move |outcome: Result<String, TaskError>| {
                let _ = tx.send(outcome);
            })),
        );

        let outcome = rx.await.unwrap();
        assert_eq!(outcome.unwrap_err().message, "boom");
    }

    #[tokio::test]
    async fn test_panic_captured_as_task_error() {
        let executor = TaskExecutor::<String>::new(2);
        let (tx, rx) = oneshot::channel();

        executor.submit(
            "panicky",
            async { panic!("unexpected") },
            Some(Box::new(move |outcome: Result<String, TaskError>| {
                let _ = tx.send(outcome);
            })),
        );

        let outcome = rx.await.unwrap();
        assert!(outcome.unwrap_err().message.contains("panicked"));
    }

    #[tokio::test]
    async fn test_cancel_before_start() {
        // One worker: the second submission queues behind the first.
        let executor = TaskExecutor::<String>::new(1);
        let ran = Arc::new(AtomicUsize::new(0));

        let (tx, rx) = oneshot::channel();
        executor.submit(
            "blocker",
            async move {
                tokio::time::sleep(Duration::from_millis(300)).await;
                Ok("blocker".to_owned())
            },
            Some(Box::new(move |outcome| {
                let _ = tx.send(outcome);
            })),
        );

        let queued_ran = Arc::clone(&ran);
        executor.submit(
            "queued",
            async move {
                queued_ran.fetch_add(1, Ordering::SeqCst);
                Ok("queued".to_owned())
            },
            Some(Box::new(|_| {
                panic!("cancelled task's callback must not run");
            })),
        );

        // Let the blocker actually start so cancel("blocker") is too late.
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(executor.cancel("queued"));
        assert!(!executor.cancel("blocker"));
        assert!(!executor.cancel("queued"), "already removed");

        rx.await.unwrap().unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(ran.load(Ordering::SeqCst), 0);
        assert!(!executor.is_running("queued"));
    }

    #[tokio::test]
    async fn test_status_reports_running_ids() {
        let executor = TaskExecutor::<String>::new(2);
        let (tx, rx) = oneshot::channel();

        executor.submit(
            "slow",
            async move {
                tokio::time::sleep(Duration::from_millis(200)).await;
                Ok("slow".to_owned())
            },
            Some(Box::new(move |outcome| {
                let _ = tx.send(outcome);
            })),
        );

        let status = executor.status();
        assert!(status.running.contains(&"slow".to_owned()));
        assert_eq!(status.pending_callbacks, 1);
        assert!(executor.is_running("slow"));

        rx.await.unwrap().unwrap();
        let status = executor.status();
        assert!(status.running.is_empty());
        assert_eq!(status.pending_callbacks, 0);
    }

    #[tokio::test]
    async fn test_shutdown_without_wait_still_delivers_callback() {
        let executor = TaskExecutor::<String>::new(2);
        let (tx, rx) = oneshot::channel();

        executor.submit(
            "in-flight",
            async move {
                tokio::time::sleep(Duration::from_millis(200)).await;
                Ok("late".to_owned())
            },
            Some(Box::new(move |outcome| {
                let _ = tx.send(outcome);
            })),
        );

        let before = std::time::Instant::now();
        executor.shutdown(false).await;
        assert!(before.elapsed() < Duration::from_millis(100));

        // The in-flight task keeps running and its callback still fires.
        let outcome = rx.await.unwrap();
        assert_eq!(outcome.unwrap(), "late");
    }

    #[tokio::test]
    async fn test_shutdown_with_wait_drains_callbacks() {
        let executor = TaskExecutor::<String>::new(2);
        let delivered = Arc::new(AtomicUsize::new(0));

        let counter = Arc::clone(&delivered);
        executor.submit(
            "draining",
            async move {
                tokio::time::sleep(Duration::from_millis(100)).await;
                Ok("ok".to_owned())
            },
            Some(Box::new(move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
            })),
        );

        executor.shutdown(true).await;
        assert_eq!(delivered.load(Ordering::SeqCst), 1);

        // New submissions are rejected with an error through the callback.
        let (tx, rx) = oneshot::channel();
        executor.submit(
            "rejected",
            async { Ok("never".to_owned()) },
            Some(Box::new(move |outcome| {
                let _ = tx.send(outcome);
            })),
        );
        let outcome = rx.await.unwrap();
        assert!(outcome.unwrap_err().message.contains("shut down"));
    }
}
