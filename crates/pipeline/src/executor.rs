//! Fixed-size worker pool running submitted jobs out of band.
//!
//! Workers share one queue. Each job reports `Started` before it runs and
//! exactly one terminal event after; errors and panics in the job body are
//! recorded as `Failed` and never take a worker down.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::future::BoxFuture;
use futures::FutureExt;
use inpaint_core::types::TaskId;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;

use crate::error::{ExecutorError, JobError};
use crate::registry::TaskRegistry;
use crate::task::JobKind;

/// Default number of workers.
pub const DEFAULT_POOL_SIZE: usize = 2;

/// A job body: resolves to the task's result payload.
pub type JobFuture = BoxFuture<'static, Result<serde_json::Value, JobError>>;

struct QueuedJob {
    id: TaskId,
    kind: JobKind,
    job: JobFuture,
}

type JobQueue = Arc<Mutex<mpsc::UnboundedReceiver<QueuedJob>>>;

/// Async executor backed by a [`TaskRegistry`].
pub struct Executor {
    registry: TaskRegistry,
    sender: Mutex<Option<mpsc::UnboundedSender<QueuedJob>>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    pool_size: usize,
}

impl std::fmt::Debug for Executor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Executor")
            .field("pool_size", &self.pool_size)
            .finish_non_exhaustive()
    }
}

impl Executor {
    /// Spawn `pool_size` workers reporting into `registry`.
    pub fn start(pool_size: usize, registry: TaskRegistry) -> Result<Self, ExecutorError> {
        if pool_size == 0 {
            return Err(ExecutorError::Config(
                "worker pool size must be at least 1".into(),
            ));
        }

        let (tx, rx) = mpsc::unbounded_channel();
        let queue: JobQueue = Arc::new(Mutex::new(rx));
        let workers = (0..pool_size)
            .map(|index| tokio::spawn(worker_loop(index, Arc::clone(&queue), registry.clone())))
            .collect();

        tracing::info!(pool_size, "Executor started");

        Ok(Self {
            registry,
            sender: Mutex::new(Some(tx)),
            workers: Mutex::new(workers),
            pool_size,
        })
    }

    pub fn registry(&self) -> &TaskRegistry {
        &self.registry
    }

    pub fn pool_size(&self) -> usize {
        self.pool_size
    }

    /// Register a `Queued` task for `job` and schedule it. Returns as soon
    /// as the job is queued; never waits for it to run.
    pub async fn submit(&self, kind: JobKind, job: JobFuture) -> Result<TaskId, ExecutorError> {
        let sender = self.sender.lock().await;
        let Some(sender) = sender.as_ref() else {
            return Err(ExecutorError::ShutDown);
        };

        let id = self.registry.create(kind).await;
        if sender.send(QueuedJob { id, kind, job }).is_err() {
            self.registry
                .reporter(id)
                .failed("executor stopped before the job could run");
            return Err(ExecutorError::ShutDown);
        }
        Ok(id)
    }

    /// Stop accepting jobs, let the workers finish everything already
    /// queued, and wait for them to exit.
    pub async fn shutdown(&self) {
        self.sender.lock().await.take();

        let workers = std::mem::take(&mut *self.workers.lock().await);
        let count = workers.len();
        for worker in workers {
            if let Err(e) = worker.await {
                tracing::error!(error = %e, "Executor worker exited abnormally");
            }
        }
        if count > 0 {
            tracing::info!(workers = count, "Executor stopped");
        }
    }
}

async fn worker_loop(index: usize, queue: JobQueue, registry: TaskRegistry) {
    tracing::debug!(worker = index, "Executor worker started");
    loop {
        let next = queue.lock().await.recv().await;
        let Some(queued) = next else { break };
        run_job(index, &registry, queued).await;
    }
    tracing::debug!(worker = index, "Executor worker stopped");
}

async fn run_job(worker: usize, registry: &TaskRegistry, QueuedJob { id, kind, job }: QueuedJob) {
    let reporter = registry.reporter(id);
    reporter.started();
    tracing::info!(task_id = %id, %kind, worker, "Running job");

    match AssertUnwindSafe(job).catch_unwind().await {
        Ok(Ok(result)) => reporter.completed(result),
        Ok(Err(e)) => reporter.failed(e.to_string()),
        Err(panic) => reporter.failed(format!("job panicked: {}", panic_message(&*panic))),
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use assert_matches::assert_matches;
    use serde_json::json;
    use tokio::sync::oneshot;
    use tokio_util::sync::CancellationToken;

    use super::*;
    use crate::inference::InferenceError;
    use crate::task::TaskState;
    use crate::test_support::{wait_for_state, wait_for_terminal};

    fn job<F>(future: F) -> JobFuture
    where
        F: std::future::Future<Output = Result<serde_json::Value, JobError>> + Send + 'static,
    {
        Box::pin(future)
    }

    fn executor(pool_size: usize) -> Executor {
        let registry = TaskRegistry::start(CancellationToken::new());
        Executor::start(pool_size, registry).expect("executor")
    }

    #[tokio::test]
    async fn zero_workers_rejected() {
        let registry = TaskRegistry::start(CancellationToken::new());
        assert_matches!(Executor::start(0, registry), Err(ExecutorError::Config(_)));
    }

    #[tokio::test]
    async fn submit_returns_before_job_finishes() {
        let executor = executor(1);
        let (release, gate) = oneshot::channel::<()>();

        let id = executor
            .submit(
                JobKind::Mask,
                job(async move {
                    let _ = gate.await;
                    Ok(json!({ "done": true }))
                }),
            )
            .await
            .expect("submit");

        let state = executor.registry().status(id).await.expect("task").state;
        assert!(matches!(state, TaskState::Queued | TaskState::Processing));

        wait_for_state(executor.registry(), id, TaskState::Processing).await;
        release.send(()).expect("release");

        let task = wait_for_terminal(executor.registry(), id).await;
        assert_eq!(task.state, TaskState::Completed);
        assert_eq!(task.result, Some(json!({ "done": true })));
    }

    #[tokio::test]
    async fn polled_states_never_go_backwards() {
        let executor = executor(2);
        let id = executor
            .submit(
                JobKind::Inference,
                job(async {
                    tokio::time::sleep(Duration::from_millis(50)).await;
                    Ok(json!({}))
                }),
            )
            .await
            .expect("submit");

        let rank = |s: TaskState| match s {
            TaskState::Queued => 0,
            TaskState::Processing => 1,
            TaskState::Completed | TaskState::Failed => 2,
        };
        let mut last = 0;
        loop {
            let state = executor.registry().status(id).await.expect("task").state;
            assert!(rank(state) >= last, "state went backwards to {state}");
            last = rank(state);
            if state.is_terminal() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
        for _ in 0..10 {
            let state = executor.registry().status(id).await.expect("task").state;
            assert_eq!(state, TaskState::Completed);
        }
    }

    #[tokio::test]
    async fn failing_job_is_recorded() {
        let executor = executor(1);
        let id = executor
            .submit(
                JobKind::Inference,
                job(async {
                    Err(JobError::Inference(InferenceError::ExitStatus {
                        code: Some(1),
                        diagnostics: "boom\n".into(),
                    }))
                }),
            )
            .await
            .expect("submit");

        let task = wait_for_terminal(executor.registry(), id).await;
        assert_eq!(task.state, TaskState::Failed);
        assert!(task.error.as_deref().unwrap_or_default().contains("boom"));
    }

    #[tokio::test]
    async fn panicking_job_fails_and_pool_survives() {
        let executor = executor(1);
        let bad = executor
            .submit(
                JobKind::Mask,
                job(async {
                    panic!("kaboom");
                }),
            )
            .await
            .expect("submit");
        let good = executor
            .submit(JobKind::Mask, job(async { Ok(json!(1)) }))
            .await
            .expect("submit");

        let task = wait_for_terminal(executor.registry(), bad).await;
        assert_eq!(task.state, TaskState::Failed);
        assert_eq!(task.error.as_deref(), Some("job panicked: kaboom"));

        let task = wait_for_terminal(executor.registry(), good).await;
        assert_eq!(task.state, TaskState::Completed);
    }

    #[tokio::test]
    async fn identical_submissions_get_distinct_handles() {
        let executor = executor(2);
        let a = executor
            .submit(JobKind::Mask, job(async { Ok(json!("same")) }))
            .await
            .expect("submit");
        let b = executor
            .submit(JobKind::Mask, job(async { Ok(json!("same")) }))
            .await
            .expect("submit");
        assert_ne!(a, b);
    }

    #[tokio::test]
    async fn pool_runs_jobs_in_parallel() {
        let executor = executor(2);
        let barrier = Arc::new(tokio::sync::Barrier::new(2));
        let mut ids = Vec::new();
        for _ in 0..2 {
            let barrier = Arc::clone(&barrier);
            ids.push(
                executor
                    .submit(
                        JobKind::Mask,
                        job(async move {
                            barrier.wait().await;
                            Ok(json!({}))
                        }),
                    )
                    .await
                    .expect("submit"),
            );
        }
        for id in ids {
            let task = wait_for_terminal(executor.registry(), id).await;
            assert_eq!(task.state, TaskState::Completed);
        }
    }

    #[tokio::test]
    async fn shutdown_drains_queue_then_rejects() {
        let executor = executor(1);
        let mut ids = Vec::new();
        for n in 0..3 {
            ids.push(
                executor
                    .submit(
                        JobKind::Mask,
                        job(async move {
                            tokio::time::sleep(Duration::from_millis(10)).await;
                            Ok(json!(n))
                        }),
                    )
                    .await
                    .expect("submit"),
            );
        }

        executor.shutdown().await;

        for id in ids {
            let task = wait_for_terminal(executor.registry(), id).await;
            assert_eq!(task.state, TaskState::Completed);
        }
        assert_matches!(
            executor
                .submit(JobKind::Mask, job(async { Ok(json!(0)) }))
                .await,
            Err(ExecutorError::ShutDown)
        );
    }
}
