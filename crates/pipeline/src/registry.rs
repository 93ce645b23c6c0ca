//! In-memory Task Registry.
//!
//! The registry owns every [`Task`]. Status reads go straight to the shared
//! map; state changes arrive as [`TaskEvent`]s on a channel and are applied
//! by a single loop, which enforces the monotonic lifecycle. Nothing is
//! persisted: a restart forgets every handle.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use inpaint_core::error::CoreError;
use inpaint_core::types::{TaskId, Timestamp};
use tokio::sync::{mpsc, RwLock};
use tokio_util::sync::CancellationToken;

use crate::task::{JobKind, Task, TaskState};

// ---------------------------------------------------------------------------
// Events
// ---------------------------------------------------------------------------

/// A lifecycle transition reported by the job that owns a task.
#[derive(Debug, Clone, PartialEq)]
pub enum TaskEvent {
    Started,
    Completed(serde_json::Value),
    Failed(String),
}

impl TaskEvent {
    fn target_state(&self) -> TaskState {
        match self {
            Self::Started => TaskState::Processing,
            Self::Completed(_) => TaskState::Completed,
            Self::Failed(_) => TaskState::Failed,
        }
    }
}

#[derive(Debug)]
struct Envelope {
    id: TaskId,
    event: TaskEvent,
}

/// Write handle given to the single job that owns a task.
#[derive(Debug, Clone)]
pub struct TaskReporter {
    id: TaskId,
    events: mpsc::UnboundedSender<Envelope>,
}

impl TaskReporter {
    pub fn task_id(&self) -> TaskId {
        self.id
    }

    pub fn started(&self) {
        self.send(TaskEvent::Started);
    }

    pub fn completed(&self, result: serde_json::Value) {
        self.send(TaskEvent::Completed(result));
    }

    pub fn failed(&self, message: impl Into<String>) {
        self.send(TaskEvent::Failed(message.into()));
    }

    fn send(&self, event: TaskEvent) {
        if self
            .events
            .send(Envelope { id: self.id, event })
            .is_err()
        {
            tracing::debug!(task_id = %self.id, "Registry stopped, dropping task event");
        }
    }
}

// ---------------------------------------------------------------------------
// Registry
// ---------------------------------------------------------------------------

type TaskMap = Arc<RwLock<HashMap<TaskId, Task>>>;

/// Concurrency-safe task store. Cheap to clone.
#[derive(Debug, Clone)]
pub struct TaskRegistry {
    tasks: TaskMap,
    events: mpsc::UnboundedSender<Envelope>,
}

impl TaskRegistry {
    /// Create an empty registry and spawn its event loop.
    ///
    /// The loop runs until `cancel` fires, then applies whatever events are
    /// already queued and exits.
    pub fn start(cancel: CancellationToken) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let tasks: TaskMap = Arc::new(RwLock::new(HashMap::new()));
        tokio::spawn(event_loop(Arc::clone(&tasks), rx, cancel));
        Self { tasks, events: tx }
    }

    /// Register a new task in state `Queued` and return its handle.
    pub async fn create(&self, kind: JobKind) -> TaskId {
        let id = TaskId::new();
        self.tasks
            .write()
            .await
            .insert(id, Task::queued(id, kind, Utc::now()));
        tracing::info!(task_id = %id, %kind, "Task queued");
        id
    }

    /// Current snapshot of a task.
    pub async fn status(&self, id: TaskId) -> Result<Task, CoreError> {
        self.tasks
            .read()
            .await
            .get(&id)
            .cloned()
            .ok_or_else(|| CoreError::NotFound {
                entity: "task",
                id: id.to_string(),
            })
    }

    /// Event sender for the job owning `id`.
    pub fn reporter(&self, id: TaskId) -> TaskReporter {
        TaskReporter {
            id,
            events: self.events.clone(),
        }
    }

    /// Drop terminal tasks last updated before `cutoff`. Returns how many
    /// were removed; queued and running tasks are never touched.
    pub async fn evict_finished_before(&self, cutoff: Timestamp) -> usize {
        let mut tasks = self.tasks.write().await;
        let before = tasks.len();
        tasks.retain(|_, task| !(task.state.is_terminal() && task.updated_at < cutoff));
        before - tasks.len()
    }

    pub async fn len(&self) -> usize {
        self.tasks.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.tasks.read().await.is_empty()
    }
}

async fn event_loop(
    tasks: TaskMap,
    mut rx: mpsc::UnboundedReceiver<Envelope>,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            biased;
            received = rx.recv() => {
                let Some(envelope) = received else { break };
                apply(&mut *tasks.write().await, envelope);
            }
            _ = cancel.cancelled() => {
                let mut map = tasks.write().await;
                while let Ok(envelope) = rx.try_recv() {
                    apply(&mut map, envelope);
                }
                break;
            }
        }
    }
    tracing::debug!("Task registry event loop stopped");
}

fn apply(tasks: &mut HashMap<TaskId, Task>, Envelope { id, event }: Envelope) {
    let Some(task) = tasks.get_mut(&id) else {
        tracing::debug!(task_id = %id, "Event for unknown task ignored");
        return;
    };

    let next = event.target_state();
    if !task.state.can_transition_to(next) {
        tracing::warn!(
            task_id = %id,
            from = %task.state,
            to = %next,
            "Rejected non-monotonic task transition",
        );
        return;
    }

    task.state = next;
    task.updated_at = Utc::now();
    match event {
        TaskEvent::Started => tracing::info!(task_id = %id, "Task processing"),
        TaskEvent::Completed(result) => {
            task.result = Some(result);
            tracing::info!(task_id = %id, "Task completed");
        }
        TaskEvent::Failed(message) => {
            tracing::warn!(task_id = %id, error = %message, "Task failed");
            task.error = Some(message);
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
