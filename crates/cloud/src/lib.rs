//! Object Store Gateway.
//!
//! Persists job artifacts to a remote content store addressed by key and
//! returns their public URLs. The [`ObjectStore`] trait is the seam between
//! the gateway and a concrete backend: [`S3ObjectStore`] in production,
//! [`MemoryObjectStore`] in tests and local runs.

pub mod error;
pub mod gateway;
pub mod memory;
pub mod s3;
pub mod store;

pub use error::{StorageError, StorageErrorKind};
pub use gateway::{content_type_for, StoreGateway, StoredArtifact};
pub use memory::MemoryObjectStore;
pub use s3::{S3Config, S3ObjectStore};
pub use store::ObjectStore;
