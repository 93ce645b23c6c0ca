use async_trait::async_trait;

use crate::error::StorageError;

/// A remote content store addressed by key.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Store `body` under `key`, replacing any existing object.
    async fn put_object(
        &self,
        key: &str,
        body: Vec<u8>,
        content_type: &str,
    ) -> Result<(), StorageError>;

    /// Fetch the object stored under `key`.
    async fn get_object(&self, key: &str) -> Result<Vec<u8>, StorageError>;

    /// Publicly reachable URL of `key`.
    fn public_url(&self, key: &str) -> String;
}
