//! Task Registry, Async Executor and the job bodies they run.
//!
//! Submissions get a [`TaskId`](inpaint_core::types::TaskId) immediately;
//! the work runs on a fixed worker pool and reports its lifecycle to the
//! [`TaskRegistry`] as discrete events.

pub mod error;
pub mod executor;
pub mod inference;
pub mod jobs;
pub mod registry;
pub mod sweeper;
pub mod task;

pub use error::{ExecutorError, JobError};
pub use executor::{Executor, JobFuture};
pub use inference::{InferenceConfig, InferenceEngine, InferenceError, InferenceRequest, SubprocessEngine};
pub use jobs::{InferenceJobRequest, JobContext, MaskRequest};
pub use registry::{TaskEvent, TaskRegistry, TaskReporter};
pub use task::{JobKind, Task, TaskState};
