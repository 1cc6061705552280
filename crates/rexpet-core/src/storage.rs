//! Object Storage
//!
//! Put/get contract for uploaded originals and generated results. Uploads
//! never overwrite: writing to an existing path fails with `Conflict`.

use std::collections::HashMap;
use std::path::{Component, Path, PathBuf};
use std::sync::RwLock;

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;

use crate::error::{CoreError, Result};

/// Storage buckets
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Bucket {
    Originals,
    Generated,
}

impl Bucket {
    pub fn as_str(&self) -> &'static str {
        match self {
            Bucket::Originals => "original-images",
            Bucket::Generated => "generated-images",
        }
    }
}

/// Object storage strategy
#[async_trait]
pub trait ObjectStorage: Send + Sync {
    /// Store bytes at `path`; fails with `Conflict` if the object exists
    async fn upload(&self, bucket: Bucket, path: &str, bytes: &[u8], content_type: &str)
    -> Result<()>;

    /// Fetch the bytes at `path`
    async fn download(&self, bucket: Bucket, path: &str) -> Result<Vec<u8>>;

    /// Remove an object; missing objects are not an error
    async fn delete(&self, bucket: Bucket, path: &str) -> Result<()>;

    /// Backend name for logs and health output
    fn name(&self) -> &str;
}

/// Reject absolute paths and parent traversal
fn validate_path(path: &str) -> Result<&Path> {
    let p = Path::new(path);
    if path.is_empty()
        || p.components()
            .any(|c| !matches!(c, Component::Normal(_)))
    {
        return Err(CoreError::InvalidArgument(format!(
            "invalid storage path: {path}"
        )));
    }
    Ok(p)
}

#[derive(Clone, Debug)]
struct StoredObject {
    bytes: Vec<u8>,
    content_type: String,
}

/// In-memory object storage (for development and tests)
#[derive(Default)]
pub struct MemoryObjectStorage {
    objects: RwLock<HashMap<(Bucket, String), StoredObject>>,
}

impl MemoryObjectStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, bucket: Bucket, path: &str) -> bool {
        self.objects
            .read()
            .map(|objects| objects.contains_key(&(bucket, path.to_string())))
            .unwrap_or(false)
    }

    /// Content type recorded at upload
    pub fn content_type(&self, bucket: Bucket, path: &str) -> Option<String> {
        self.objects
            .read()
            .ok()?
            .get(&(bucket, path.to_string()))
            .map(|o| o.content_type.clone())
    }
}

#[async_trait]
impl ObjectStorage for MemoryObjectStorage {
    async fn upload(
        &self,
        bucket: Bucket,
        path: &str,
        bytes: &[u8],
        content_type: &str,
    ) -> Result<()> {
        validate_path(path)?;
        let mut objects = self
            .objects
            .write()
            .map_err(|_| CoreError::Persistence("storage lock poisoned".into()))?;

        let key = (bucket, path.to_string());
        if objects.contains_key(&key) {
            return Err(CoreError::Conflict(format!(
                "object {}/{path} already exists",
                bucket.as_str()
            )));
        }
        objects.insert(
            key,
            StoredObject {
                bytes: bytes.to_vec(),
                content_type: content_type.to_string(),
            },
        );
        Ok(())
    }

    async fn download(&self, bucket: Bucket, path: &str) -> Result<Vec<u8>> {
        let objects = self
            .objects
            .read()
            .map_err(|_| CoreError::Persistence("storage lock poisoned".into()))?;
        objects
            .get(&(bucket, path.to_string()))
            .map(|o| o.bytes.clone())
            .ok_or_else(|| CoreError::not_found("Object", format!("{}/{path}", bucket.as_str())))
    }

    async fn delete(&self, bucket: Bucket, path: &str) -> Result<()> {
        self.objects
            .write()
            .map_err(|_| CoreError::Persistence("storage lock poisoned".into()))?
            .remove(&(bucket, path.to_string()));
        Ok(())
    }

    fn name(&self) -> &str {
        "memory"
    }
}

/// Filesystem object storage rooted at a directory, one subdirectory per bucket
pub struct FsObjectStorage {
    root: PathBuf,
}

impl FsObjectStorage {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn resolve(&self, bucket: Bucket, path: &str) -> Result<PathBuf> {
        let relative = validate_path(path)?;
        Ok(self.root.join(bucket.as_str()).join(relative))
    }
}

/// Write and sync a freshly created object, removing it if either step fails
async fn fill_object(path: &Path, mut file: tokio::fs::File, bytes: &[u8]) -> Result<()> {
    let written = async {
        file.write_all(bytes).await?;
        file.flush().await?;
        file.sync_all().await
    }
    .await;
    drop(file);

    if let Err(e) = written {
        if let Err(cleanup) = tokio::fs::remove_file(path).await {
            tracing::warn!(path = %path.display(), error = %cleanup, "Partial object left behind");
        }
        return Err(e.into());
    }
    Ok(())
}

#[async_trait]
impl ObjectStorage for FsObjectStorage {
    async fn upload(
        &self,
        bucket: Bucket,
        path: &str,
        bytes: &[u8],
        _content_type: &str,
    ) -> Result<()> {
        let full = self.resolve(bucket, path)?;
        if let Some(parent) = full.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        // create_new gives us the no-overwrite guarantee atomically
        let mut file = match tokio::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&full)
            .await
        {
            Ok(file) => file,
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                return Err(CoreError::Conflict(format!(
                    "object {}/{path} already exists",
                    bucket.as_str()
                )));
            }
            Err(e) => return Err(e.into()),
        };
        fill_object(&full, file, bytes).await
    }

    async fn download(&self, bucket: Bucket, path: &str) -> Result<Vec<u8>> {
        let full = self.resolve(bucket, path)?;
        match tokio::fs::read(&full).await {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(CoreError::not_found(
                "Object",
                format!("{}/{path}", bucket.as_str()),
            )),
            Err(e) => Err(e.into()),
        }
    }

    async fn delete(&self, bucket: Bucket, path: &str) -> Result<()> {
        let full = self.resolve(bucket, path)?;
        match tokio::fs::remove_file(&full).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    fn name(&self) -> &str {
        "filesystem"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_memory_upload_does_not_overwrite() {
        let storage = MemoryObjectStorage::new();
        storage
            .upload(Bucket::Generated, "u/g.png", b"first", "image/png")
            .await
            .unwrap();

        let err = storage
            .upload(Bucket::Generated, "u/g.png", b"second", "image/png")
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::Conflict(_)));

        let bytes = storage.download(Bucket::Generated, "u/g.png").await.unwrap();
        assert_eq!(bytes, b"first");
    }

    #[tokio::test]
    async fn test_buckets_are_separate() {
        let storage = MemoryObjectStorage::new();
        storage
            .upload(Bucket::Originals, "u/a.jpg", b"img", "image/jpeg")
            .await
            .unwrap();

        assert!(storage.download(Bucket::Generated, "u/a.jpg").await.is_err());
        assert!(storage.contains(Bucket::Originals, "u/a.jpg"));
        assert_eq!(
            storage.content_type(Bucket::Originals, "u/a.jpg").as_deref(),
            Some("image/jpeg")
        );
    }

    #[tokio::test]
    async fn test_traversal_rejected() {
        let storage = MemoryObjectStorage::new();
        let err = storage
            .upload(Bucket::Originals, "../etc/passwd", b"x", "text/plain")
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::InvalidArgument(_)));
    }

    #[tokio::test]
    async fn test_fs_storage_roundtrip_and_conflict() {
        let root = tempfile::tempdir().unwrap();
        let storage = FsObjectStorage::new(root.path());

        storage
            .upload(Bucket::Generated, "user/gen.png", b"png", "image/png")
            .await
            .unwrap();
        assert!(matches!(
            storage
                .upload(Bucket::Generated, "user/gen.png", b"other", "image/png")
                .await,
            Err(CoreError::Conflict(_))
        ));
        assert_eq!(
            storage.download(Bucket::Generated, "user/gen.png").await.unwrap(),
            b"png"
        );

        storage.delete(Bucket::Generated, "user/gen.png").await.unwrap();
        assert!(matches!(
            storage.download(Bucket::Generated, "user/gen.png").await,
            Err(CoreError::NotFound { .. })
        ));
    }

    #[tokio::test]
    async fn test_failed_write_leaves_no_partial_object() {
        let root = tempfile::tempdir().unwrap();
        let path = root.path().join("partial.png");
        std::fs::write(&path, b"").unwrap();

        // A read-only handle makes the write itself fail
        let read_only = tokio::fs::File::open(&path).await.unwrap();
        let err = fill_object(&path, read_only, b"png bytes").await.unwrap_err();

        assert!(matches!(err, CoreError::Persistence(_)));
        assert!(!path.exists());
    }
}
