use std::path::PathBuf;

/// Failure talking to the object store or reading a local artifact.
///
/// Credential problems, transport/server problems and everything else are
/// separate variants so callers can apply different retry policies. No
/// automatic retries are performed anywhere in this crate.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("Object store credentials are missing or invalid: {0}")]
    Credentials(String),

    #[error("Object store transport error for key '{key}': {message}")]
    Transport { key: String, message: String },

    #[error("Object '{key}' not found")]
    NotFound { key: String },

    #[error("Failed to read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Object store configuration error: {0}")]
    Config(String),

    #[error("Object store operation on '{key}' failed: {message}")]
    Other { key: String, message: String },
}

/// Coarse classification of a [`StorageError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageErrorKind {
    Credentials,
    Transport,
    Generic,
}

impl StorageError {
    pub fn kind(&self) -> StorageErrorKind {
        match self {
            Self::Credentials(_) => StorageErrorKind::Credentials,
            Self::Transport { .. } => StorageErrorKind::Transport,
            Self::NotFound { .. } | Self::Io { .. } | Self::Config(_) | Self::Other { .. } => {
                StorageErrorKind::Generic
            }
        }
    }
}
