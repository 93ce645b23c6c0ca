use std::path::PathBuf;

use inpaint_cloud::StorageError;
use inpaint_core::image_io::FetchError;

use crate::inference::InferenceError;

/// Failure of a job body. Recorded as the task's `error` message.
#[derive(Debug, thiserror::Error)]
pub enum JobError {
    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Inference(#[from] InferenceError),

    #[error("Failed to prepare {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Background step failed: {0}")]
    Blocking(#[from] tokio::task::JoinError),
}

impl JobError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

/// Submission refused by the executor.
#[derive(Debug, thiserror::Error)]
pub enum ExecutorError {
    #[error("Executor is shut down and no longer accepts jobs")]
    ShutDown,

    #[error("Invalid executor configuration: {0}")]
    Config(String),
}
