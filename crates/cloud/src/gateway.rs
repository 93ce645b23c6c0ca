//! Upload facade over an [`ObjectStore`].

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use walkdir::WalkDir;

use crate::error::StorageError;
use crate::store::ObjectStore;

/// Content type used when the extension is unknown.
const DEFAULT_CONTENT_TYPE: &str = "application/octet-stream";

/// One uploaded file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredArtifact {
    pub local_path: PathBuf,
    pub remote_key: String,
    pub public_url: String,
    pub content_type: String,
}

/// Uploads single files and whole directory trees.
#[derive(Clone)]
pub struct StoreGateway {
    store: Arc<dyn ObjectStore>,
}

impl std::fmt::Debug for StoreGateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StoreGateway").finish_non_exhaustive()
    }
}

impl StoreGateway {
    pub fn new(store: Arc<dyn ObjectStore>) -> Self {
        Self { store }
    }

    pub fn public_url(&self, key: &str) -> String {
        self.store.public_url(key)
    }

    /// Upload one file and describe the stored object.
    pub async fn upload(
        &self,
        local_path: &Path,
        remote_key: &str,
        content_type: &str,
    ) -> Result<StoredArtifact, StorageError> {
        let body = tokio::fs::read(local_path)
            .await
            .map_err(|source| StorageError::Io {
                path: local_path.to_path_buf(),
                source,
            })?;
        let size = body.len();

        self.store.put_object(remote_key, body, content_type).await?;

        let public_url = self.store.public_url(remote_key);
        tracing::debug!(key = remote_key, size, "Uploaded object");

        Ok(StoredArtifact {
            local_path: local_path.to_path_buf(),
            remote_key: remote_key.to_string(),
            public_url,
            content_type: content_type.to_string(),
        })
    }

    /// Upload one file and return its public URL.
    pub async fn put_file(
        &self,
        local_path: &Path,
        remote_key: &str,
        content_type: &str,
    ) -> Result<String, StorageError> {
        self.upload(local_path, remote_key, content_type)
            .await
            .map(|artifact| artifact.public_url)
    }

    /// Upload every regular file under `local_dir` to
    /// `{remote_key_prefix}{relative/path}`.
    ///
    /// Returns `relative path -> public URL` for the files that uploaded.
    /// Files that disappear before upload, or whose upload fails, are logged
    /// and left out of the mapping. Only an unreadable `local_dir` is an
    /// error.
    pub async fn put_tree(
        &self,
        local_dir: &Path,
        remote_key_prefix: &str,
    ) -> Result<BTreeMap<String, String>, StorageError> {
        let files = list_files(local_dir.to_path_buf()).await?;
        let mut urls = BTreeMap::new();

        for (path, relative) in files {
            let key = format!("{remote_key_prefix}{relative}");
            match self.upload(&path, &key, content_type_for(&path)).await {
                Ok(artifact) => {
                    urls.insert(relative, artifact.public_url);
                }
                Err(e) => {
                    tracing::warn!(path = %path.display(), key = %key, error = %e, "Skipping file in tree upload");
                }
            }
        }

        tracing::info!(
            dir = %local_dir.display(),
            prefix = remote_key_prefix,
            uploaded = urls.len(),
            "Uploaded directory tree",
        );
        Ok(urls)
    }
}

/// List regular files under `root` as `(absolute, relative-with-slashes)`
/// pairs in sorted order.
async fn list_files(root: PathBuf) -> Result<Vec<(PathBuf, String)>, StorageError> {
    let root_for_err = root.clone();
    tokio::task::spawn_blocking(move || walk_sorted(&root))
        .await
        .map_err(|e| StorageError::Io {
            path: root_for_err,
            source: std::io::Error::other(e),
        })?
}

fn walk_sorted(root: &Path) -> Result<Vec<(PathBuf, String)>, StorageError> {
    let mut files = Vec::new();

    for entry in WalkDir::new(root).sort_by_file_name() {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) if e.depth() == 0 => {
                return Err(StorageError::Io {
                    path: root.to_path_buf(),
                    source: e
                        .into_io_error()
                        .unwrap_or_else(|| std::io::Error::other("walk failed")),
                });
            }
            Err(e) => {
                tracing::warn!(error = %e, "Skipping unreadable entry");
                continue;
            }
        };

        if !entry.file_type().is_file() {
            continue;
        }
        let Ok(relative) = entry.path().strip_prefix(root) else {
            continue;
        };
        let relative = relative
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/");
        files.push((entry.path().to_path_buf(), relative));
    }

    Ok(files)
}

/// Content type inferred from the file extension.
pub fn content_type_for(path: &Path) -> &'static str {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase);
    match ext.as_deref() {
        Some("png") => "image/png",
        Some("jpg" | "jpeg") => "image/jpeg",
        Some("webp") => "image/webp",
        Some("gif") => "image/gif",
        Some("json") => "application/json",
        Some("txt" | "log") => "text/plain",
        _ => DEFAULT_CONTENT_TYPE,
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use async_trait::async_trait;

    use super::*;
    use crate::memory::MemoryObjectStore;

    fn write(dir: &Path, relative: &str, body: &[u8]) {
        let path = dir.join(relative);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).expect("mkdir");
        }
        std::fs::write(path, body).expect("write");
    }

    #[test]
    fn content_types() {
        assert_eq!(content_type_for(Path::new("a/b.PNG")), "image/png");
        assert_eq!(content_type_for(Path::new("b.jpeg")), "image/jpeg");
        assert_eq!(content_type_for(Path::new("meta.json")), "application/json");
        assert_eq!(content_type_for(Path::new("blob")), DEFAULT_CONTENT_TYPE);
        assert_eq!(content_type_for(Path::new("x.bin")), DEFAULT_CONTENT_TYPE);
    }

    #[tokio::test]
    async fn put_file_returns_public_url() {
        let dir = tempfile::tempdir().expect("tempdir");
        write(dir.path(), "mask.png", b"png");

        let store = Arc::new(MemoryObjectStore::with_base_url("https://cdn.test"));
        let gateway = StoreGateway::new(store.clone());
        let url = gateway
            .put_file(&dir.path().join("mask.png"), "group/mask.png", "image/png")
            .await
            .expect("upload");

        assert_eq!(url, "https://cdn.test/group/mask.png");
        assert_eq!(
            store.content_type("group/mask.png").await.as_deref(),
            Some("image/png")
        );
    }

    #[tokio::test]
    async fn put_file_missing_is_io_error() {
        let gateway = StoreGateway::new(Arc::new(MemoryObjectStore::new()));
        let err = gateway
            .put_file(Path::new("/no/such/file.png"), "k", "image/png")
            .await
            .expect_err("should fail");
        assert_matches!(err, StorageError::Io { .. });
    }

    #[tokio::test]
    async fn put_tree_uploads_every_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        write(dir.path(), "a.png", b"a");
        write(dir.path(), "results/b.png", b"b");
        write(dir.path(), "results/nested/c.json", b"{}");

        let store = Arc::new(MemoryObjectStore::with_base_url("https://cdn.test"));
        let gateway = StoreGateway::new(store.clone());
        let urls = gateway.put_tree(dir.path(), "prefix/").await.expect("tree");

        let keys: Vec<&str> = urls.keys().map(String::as_str).collect();
        assert_eq!(keys, ["a.png", "results/b.png", "results/nested/c.json"]);
        assert_eq!(urls["results/b.png"], "https://cdn.test/prefix/results/b.png");
        assert_eq!(
            store.content_type("prefix/results/nested/c.json").await.as_deref(),
            Some("application/json")
        );
    }

    #[tokio::test]
    async fn put_tree_of_empty_dir_is_empty() {
        let dir = tempfile::tempdir().expect("tempdir");
        let gateway = StoreGateway::new(Arc::new(MemoryObjectStore::new()));
        let urls = gateway.put_tree(dir.path(), "p/").await.expect("tree");
        assert!(urls.is_empty());
    }

    #[tokio::test]
    async fn put_tree_of_missing_dir_fails() {
        let gateway = StoreGateway::new(Arc::new(MemoryObjectStore::new()));
        let err = gateway
            .put_tree(Path::new("/no/such/dir"), "p/")
            .await
            .expect_err("should fail");
        assert_matches!(err, StorageError::Io { .. });
    }

    /// Store that deletes a victim file from disk on its first upload.
    struct DeletingStore {
        inner: MemoryObjectStore,
        victim: PathBuf,
    }

    #[async_trait]
    impl ObjectStore for DeletingStore {
        async fn put_object(
            &self,
            key: &str,
            body: Vec<u8>,
            content_type: &str,
        ) -> Result<(), StorageError> {
            let _ = std::fs::remove_file(&self.victim);
            self.inner.put_object(key, body, content_type).await
        }

        async fn get_object(&self, key: &str) -> Result<Vec<u8>, StorageError> {
            self.inner.get_object(key).await
        }

        fn public_url(&self, key: &str) -> String {
            self.inner.public_url(key)
        }
    }

    #[tokio::test]
    async fn put_tree_skips_file_deleted_mid_walk() {
        let dir = tempfile::tempdir().expect("tempdir");
        write(dir.path(), "a.png", b"a");
        write(dir.path(), "b.png", b"b");
        write(dir.path(), "c.png", b"c");

        let gateway = StoreGateway::new(Arc::new(DeletingStore {
            inner: MemoryObjectStore::new(),
            victim: dir.path().join("c.png"),
        }));
        let urls = gateway.put_tree(dir.path(), "p/").await.expect("tree");

        assert_eq!(urls.len(), 2);
        assert!(urls.contains_key("a.png"));
        assert!(urls.contains_key("b.png"));
        assert!(!urls.contains_key("c.png"));
    }

    /// Store that rejects one key.
    struct FlakyStore {
        inner: MemoryObjectStore,
        reject: &'static str,
    }

    #[async_trait]
    impl ObjectStore for FlakyStore {
        async fn put_object(
            &self,
            key: &str,
            body: Vec<u8>,
            content_type: &str,
        ) -> Result<(), StorageError> {
            if key == self.reject {
                return Err(StorageError::Transport {
                    key: key.to_string(),
                    message: "connection reset".into(),
                });
            }
            self.inner.put_object(key, body, content_type).await
        }

        async fn get_object(&self, key: &str) -> Result<Vec<u8>, StorageError> {
            self.inner.get_object(key).await
        }

        fn public_url(&self, key: &str) -> String {
            self.inner.public_url(key)
        }
    }

    #[tokio::test]
    async fn put_tree_skips_failed_upload() {
        let dir = tempfile::tempdir().expect("tempdir");
        write(dir.path(), "a.png", b"a");
        write(dir.path(), "b.png", b"b");

        let gateway = StoreGateway::new(Arc::new(FlakyStore {
            inner: MemoryObjectStore::new(),
            reject: "p/a.png",
        }));
        let urls = gateway.put_tree(dir.path(), "p/").await.expect("tree");

        assert_eq!(urls.keys().collect::<Vec<_>>(), ["b.png"]);
    }
}
