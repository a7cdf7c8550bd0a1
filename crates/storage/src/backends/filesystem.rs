//! Local filesystem storage backend.
//!
//! Layout under the configured root:
//! - `objects/<key>`: object bytes; the file mtime is the upload time
//! - `types/<key>`: content type of the object, as plain text
//! - `tmp/`: in-flight writes, renamed into place once synced
//!
//! Meant for development and tests. Each `list_page` walks and sorts the whole
//! key space, so a full sweep pass over N keys costs O(N²/page_size); use S3
//! for large caches.

use crate::error::{StorageError, StorageResult};
use crate::token::{BackendIdentity, TokenEnvelope};
use crate::traits::{
    ListingOptions, ListingPage, ListingResume, ObjectMeta, ObjectStore, ObjectSummary,
    StoredObject,
};
use async_trait::async_trait;
use bytes::Bytes;
use std::io::ErrorKind;
use std::path::{Component, Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::instrument;
use uuid::Uuid;

const OBJECTS_DIR: &str = "objects";
const TYPES_DIR: &str = "types";
const TMP_DIR: &str = "tmp";

/// Local filesystem object store.
pub struct FilesystemBackend {
    root: PathBuf,
}

impl FilesystemBackend {
    /// Create a new filesystem backend, creating the directory layout if needed.
    pub async fn new(root: impl AsRef<Path>) -> StorageResult<Self> {
        let root = root.as_ref().to_path_buf();
        for dir in [OBJECTS_DIR, TYPES_DIR, TMP_DIR] {
            fs::create_dir_all(root.join(dir)).await?;
        }
        Ok(Self { root })
    }

    pub fn backend_identity(&self) -> BackendIdentity {
        BackendIdentity::Filesystem {
            root: self.root.to_string_lossy().to_string(),
        }
    }

    fn objects_root(&self) -> PathBuf {
        self.root.join(OBJECTS_DIR)
    }

    /// Resolve a key under one of the layout directories.
    ///
    /// Keys must be relative and made only of normal path components, and an
    /// existing path must not resolve outside the storage root (symlinks).
    async fn resolve(&self, dir: &str, key: &str) -> StorageResult<PathBuf> {
        let base = self.root.join(dir);
        let key = key.to_string();
        tokio::task::spawn_blocking(move || resolve_sync(&base, &key))
            .await
            .map_err(|e| StorageError::Io(std::io::Error::other(format!("spawn_blocking failed: {e}"))))?
    }

    async fn write_atomic(&self, path: &Path, data: &[u8]) -> StorageResult<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }

        // Unique temp name so concurrent writers of one key never share a file
        let temp_path = self.root.join(TMP_DIR).join(Uuid::new_v4().to_string());
        let written = async {
            let mut file = fs::File::create(&temp_path).await?;
            file.write_all(data).await?;
            file.sync_all().await?;
            fs::rename(&temp_path, path).await
        }
        .await;

        if let Err(e) = written {
            let _ = fs::remove_file(&temp_path).await;
            return Err(StorageError::Io(e));
        }
        Ok(())
    }

    async fn read_content_type(&self, key: &str) -> StorageResult<Option<String>> {
        let path = self.resolve(TYPES_DIR, key).await?;
        match fs::read_to_string(&path).await {
            Ok(content_type) => Ok(Some(content_type.trim().to_string())),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(StorageError::Io(e)),
        }
    }

    /// Every object key under `prefix`, sorted, with its size and mtime.
    /// Called once per page.
    async fn walk(&self, prefix: &str) -> StorageResult<Vec<ObjectSummary>> {
        let objects_root = self.objects_root();
        let mut results = Vec::new();
        let mut stack = vec![objects_root.clone()];

        while let Some(dir) = stack.pop() {
            let mut entries = match fs::read_dir(&dir).await {
                Ok(entries) => entries,
                Err(e) if e.kind() == ErrorKind::NotFound => continue,
                Err(e) => return Err(StorageError::Io(e)),
            };
            while let Some(entry) = entries.next_entry().await? {
                // file_type() does not follow symlinks; symlinks are skipped
                let file_type = entry.file_type().await?;
                let path = entry.path();
                if file_type.is_dir() {
                    stack.push(path);
                    continue;
                }
                if !file_type.is_file() {
                    continue;
                }
                let Ok(rel) = path.strip_prefix(&objects_root) else {
                    continue;
                };
                let key = rel
                    .components()
                    .map(|c| c.as_os_str().to_string_lossy())
                    .collect::<Vec<_>>()
                    .join("/");
                if !key.starts_with(prefix) {
                    continue;
                }
                let metadata = entry.metadata().await?;
                results.push(ObjectSummary {
                    key,
                    size: metadata.len(),
                    last_modified: metadata.modified().ok().map(Into::into),
                });
            }
        }

        results.sort_by(|a, b| a.key.cmp(&b.key));
        Ok(results)
    }
}

fn resolve_sync(base: &Path, key: &str) -> StorageResult<PathBuf> {
    if key.is_empty() {
        return Err(StorageError::InvalidKey("empty key".to_string()));
    }
    if Path::new(key)
        .components()
        .any(|c| !matches!(c, Component::Normal(_)))
    {
        return Err(StorageError::InvalidKey(format!(
            "contains unsafe path component: {key}"
        )));
    }

    let path = base.join(key);
    let base_canonical = base.canonicalize()?;

    // Nearest existing ancestor (or the path itself) must stay inside the base
    let mut probe = Some(path.as_path());
    while let Some(candidate) = probe {
        match std::fs::symlink_metadata(candidate) {
            Ok(_) => {
                let canonical = candidate.canonicalize().map_err(|_| {
                    StorageError::InvalidKey(format!("symlink target missing or invalid: {key}"))
                })?;
                if !canonical.starts_with(&base_canonical) {
                    return Err(StorageError::InvalidKey(format!(
                        "resolved path escapes storage root: {key}"
                    )));
                }
                break;
            }
            Err(e) if e.kind() == ErrorKind::NotFound => probe = candidate.parent(),
            Err(e) => return Err(StorageError::Io(e)),
        }
    }

    Ok(path)
}

fn not_found_or_io(key: &str) -> impl FnOnce(std::io::Error) -> StorageError + '_ {
    move |e| {
        if e.kind() == ErrorKind::NotFound {
            StorageError::NotFound(key.to_string())
        } else {
            StorageError::Io(e)
        }
    }
}

#[async_trait]
impl ObjectStore for FilesystemBackend {
    #[instrument(skip(self), fields(backend = "filesystem"))]
    async fn get(&self, key: &str) -> StorageResult<StoredObject> {
        let path = self.resolve(OBJECTS_DIR, key).await?;
        let data = fs::read(&path).await.map_err(not_found_or_io(key))?;
        let metadata = fs::metadata(&path).await.map_err(not_found_or_io(key))?;
        let content_type = self.read_content_type(key).await?;

        Ok(StoredObject {
            meta: ObjectMeta {
                size: data.len() as u64,
                last_modified: metadata.modified().ok().map(Into::into),
                content_type,
            },
            data: Bytes::from(data),
        })
    }

    #[instrument(skip(self), fields(backend = "filesystem"))]
    async fn head(&self, key: &str) -> StorageResult<ObjectMeta> {
        let path = self.resolve(OBJECTS_DIR, key).await?;
        let metadata = fs::metadata(&path).await.map_err(not_found_or_io(key))?;
        if !metadata.is_file() {
            return Err(StorageError::NotFound(key.to_string()));
        }

        Ok(ObjectMeta {
            size: metadata.len(),
            last_modified: metadata.modified().ok().map(Into::into),
            content_type: self.read_content_type(key).await?,
        })
    }

    #[instrument(skip(self, data), fields(backend = "filesystem", size = data.len()))]
    async fn put(&self, key: &str, data: Bytes, content_type: &str) -> StorageResult<()> {
        let object_path = self.resolve(OBJECTS_DIR, key).await?;
        let type_path = self.resolve(TYPES_DIR, key).await?;

        self.write_atomic(&object_path, &data).await?;
        self.write_atomic(&type_path, content_type.as_bytes()).await?;
        Ok(())
    }

    #[instrument(skip(self), fields(backend = "filesystem"))]
    async fn delete(&self, key: &str) -> StorageResult<()> {
        for dir in [OBJECTS_DIR, TYPES_DIR] {
            let path = self.resolve(dir, key).await?;
            match fs::remove_file(&path).await {
                Ok(()) => {}
                Err(e) if e.kind() == ErrorKind::NotFound => {}
                Err(e) => return Err(StorageError::Io(e)),
            }
        }
        Ok(())
    }

    /// Lists in lexicographic key order. The provider token is the last key
    /// of the page, so a resumed listing continues strictly after it even if
    /// objects were added or removed in between.
    #[instrument(skip(self, options, resume), fields(backend = "filesystem"))]
    async fn list_page(
        &self,
        prefix: &str,
        options: ListingOptions,
        resume: Option<ListingResume>,
    ) -> StorageResult<ListingPage> {
        let identity = self.backend_identity();
        let start_after = match resume {
            Some(resume) => {
                let provider =
                    TokenEnvelope::open(&resume.start_token, &identity, prefix, &options)?;
                Some(String::from_utf8(provider).map_err(|e| {
                    StorageError::InvalidContinuationToken(format!(
                        "invalid filesystem cursor encoding: {e}"
                    ))
                })?)
            }
            None => None,
        };

        let page_size = options.normalized_page_size();
        let mut objects: Vec<ObjectSummary> = self
            .walk(prefix)
            .await?
            .into_iter()
            .filter(|o| start_after.as_deref().is_none_or(|after| o.key.as_str() > after))
            .take(page_size + 1)
            .collect();

        let next_token = if objects.len() > page_size {
            objects.truncate(page_size);
            let last = objects
                .last()
                .map(|o| o.key.clone().into_bytes())
                .unwrap_or_default();
            Some(TokenEnvelope::new(identity, prefix.to_string(), &options, last)?.to_token()?)
        } else {
            None
        };

        Ok(ListingPage {
            objects,
            next_token,
        })
    }

    fn backend_name(&self) -> &'static str {
        "filesystem"
    }

    #[instrument(skip(self), fields(backend = "filesystem"))]
    async fn health_check(&self) -> StorageResult<()> {
        let metadata = fs::metadata(self.objects_root()).await.map_err(|e| {
            StorageError::Io(std::io::Error::new(
                e.kind(),
                format!("storage root not accessible: {e}"),
            ))
        })?;

        if !metadata.is_dir() {
            return Err(StorageError::Io(std::io::Error::new(
                ErrorKind::NotADirectory,
                format!("storage root is not a directory: {:?}", self.root),
            )));
        }

        Ok(())
    }
}
