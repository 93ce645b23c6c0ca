use std::sync::Arc;

use inpaint_pipeline::{Executor, JobContext, TaskRegistry};

/// Shared application state available to all Axum handlers via `State<AppState>`.
///
/// This is cheaply cloneable (inner data is behind `Arc` or is already `Clone`).
#[derive(Clone)]
pub struct AppState {
    /// Worker pool running submitted jobs.
    pub executor: Arc<Executor>,
    /// Collaborators handed to every job.
    pub jobs: JobContext,
}

impl AppState {
    pub fn registry(&self) -> &TaskRegistry {
        self.executor.registry()
    }
}
