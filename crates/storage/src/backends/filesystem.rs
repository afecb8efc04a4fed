//! Local filesystem chunk store.

use crate::error::{StorageError, StorageResult};
use crate::traits::ChunkStore;
use async_trait::async_trait;
use bytes::Bytes;
use std::path::{Component, Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::instrument;
use uuid::Uuid;

/// Chunk store backed by a directory tree.
///
/// Keys map to paths under a fixed root. A key is only ever accepted if the
/// deepest already-existing prefix of its path resolves back inside the
/// root, so neither `..` segments nor planted symlinks can reach outside.
pub struct FilesystemBackend {
    root: PathBuf,
}

impl FilesystemBackend {
    /// Create a new filesystem backend rooted at `root`.
    pub async fn new(root: impl AsRef<Path>) -> StorageResult<Self> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(&root).await?;
        Ok(Self { root })
    }

    /// Turn a key into an on-disk path, refusing anything that could land
    /// outside the root.
    ///
    /// The containment check canonicalizes paths, which is synchronous
    /// filesystem work, so it runs on the blocking pool.
    async fn resolve(&self, key: &str) -> StorageResult<PathBuf> {
        let root = self.root.clone();
        let key = key.to_owned();
        tokio::task::spawn_blocking(move || resolve_under_root(&root, &key))
            .await
            .map_err(|e| StorageError::Backend(format!("blocking task failed: {e}")))?
    }
}

fn resolve_under_root(root: &Path, key: &str) -> StorageResult<PathBuf> {
    // Every path segment must be an ordinary name. This throws out absolute
    // keys, `.`/`..` segments, and drive prefixes in one place.
    for component in Path::new(key).components() {
        if !matches!(component, Component::Normal(_)) {
            return Err(StorageError::InvalidKey(format!(
                "key is not a plain relative path: {key}"
            )));
        }
    }

    let root_real = root.canonicalize().map_err(|e| {
        StorageError::Io(std::io::Error::new(
            e.kind(),
            format!("storage root unresolvable: {e}"),
        ))
    })?;
    let path = root.join(key);

    // Walk up from the target until something exists on disk. That anchor
    // is where symlinks could redirect the key, so it must resolve inside
    // the root; the not-yet-existing tail below it holds no symlinks. The
    // walk always terminates because the root itself exists.
    let mut probe: &Path = &path;
    loop {
        match std::fs::symlink_metadata(probe) {
            Ok(meta) => {
                let real = probe.canonicalize().map_err(|e| {
                    if meta.file_type().is_symlink() {
                        StorageError::InvalidKey(format!("unresolvable symlink in key: {key}"))
                    } else {
                        StorageError::Io(std::io::Error::new(
                            e.kind(),
                            format!("cannot resolve {}: {e}", probe.display()),
                        ))
                    }
                })?;
                if !real.starts_with(&root_real) {
                    return Err(StorageError::InvalidKey(format!(
                        "key escapes storage root: {key}"
                    )));
                }
                return Ok(path);
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => {
                return Err(StorageError::Io(std::io::Error::new(
                    e.kind(),
                    format!("cannot stat {}: {e}", probe.display()),
                )));
            }
        }

        match probe.parent() {
            Some(parent) => probe = parent,
            None => return Ok(path),
        }
    }
}

/// Map a read/delete failure, turning a missing file into `NotFound`.
fn read_error(key: &str, err: std::io::Error) -> StorageError {
    if err.kind() == std::io::ErrorKind::NotFound {
        StorageError::NotFound(key.to_string())
    } else {
        StorageError::Io(err)
    }
}

#[async_trait]
impl ChunkStore for FilesystemBackend {
    #[instrument(skip(self), fields(backend = "filesystem"))]
    async fn exists(&self, key: &str) -> StorageResult<bool> {
        let path = self.resolve(key).await?;
        fs::try_exists(&path).await.map_err(StorageError::Io)
    }

    #[instrument(skip(self), fields(backend = "filesystem"))]
    async fn get(&self, key: &str) -> StorageResult<Bytes> {
        let path = self.resolve(key).await?;
        let data = fs::read(&path).await.map_err(|e| read_error(key, e))?;
        Ok(Bytes::from(data))
    }

    #[instrument(skip(self, data), fields(backend = "filesystem", size = data.len()))]
    async fn put(&self, key: &str, data: Bytes) -> StorageResult<()> {
        let path = self.resolve(key).await?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }

        // Land the bytes under a scratch name in the destination directory,
        // flush them to disk, then rename into place. The rename stays
        // within one directory, so readers see either the old object or the
        // complete new one, crash included.
        let scratch = path.with_file_name(format!(".part-{}", Uuid::new_v4()));
        let mut file = fs::File::create(&scratch).await?;
        file.write_all(&data).await?;
        file.sync_all().await?;
        drop(file);
        fs::rename(&scratch, &path).await?;

        Ok(())
    }

    #[instrument(skip(self), fields(backend = "filesystem"))]
    async fn delete(&self, key: &str) -> StorageResult<()> {
        let path = self.resolve(key).await?;
        fs::remove_file(&path).await.map_err(|e| read_error(key, e))?;
        Ok(())
    }

    fn backend_name(&self) -> &'static str {
        "filesystem"
    }

    #[instrument(skip(self), fields(backend = "filesystem"))]
    async fn health_check(&self) -> StorageResult<()> {
        let meta = fs::metadata(&self.root).await.map_err(|e| {
            StorageError::Io(std::io::Error::new(
                e.kind(),
                format!("storage root not accessible: {e}"),
            ))
        })?;

        if !meta.is_dir() {
            return Err(StorageError::Io(std::io::Error::new(
                std::io::ErrorKind::NotADirectory,
                format!("storage root is not a directory: {:?}", self.root),
            )));
        }

        Ok(())
    }
}
