//! Local filesystem storage backend.
//!
//! Keys map to paths under the root. A directory-marker key (`a/b/`) is
//! stored as a hidden file inside that directory and listed back with its
//! trailing separator.

use crate::error::{StorageError, StorageResult};
use crate::traits::{ByteStream, ListingOptions, ListingPage, ObjectMeta, ObjectStore, PageStream};
use async_trait::async_trait;
use bytes::Bytes;
use std::io::ErrorKind;
use std::path::{Component, Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::instrument;
use uuid::Uuid;

/// Default chunk size for streaming reads (64 KiB).
const STREAM_CHUNK_SIZE: usize = 64 * 1024;

/// File name standing in for a directory-marker object.
const DIR_MARKER_FILE: &str = ".depot-dir";

/// Local filesystem object store.
pub struct FilesystemBackend {
    root: PathBuf,
}

impl FilesystemBackend {
    /// Create a new filesystem backend.
    pub async fn new(root: impl AsRef<Path>) -> StorageResult<Self> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(&root).await?;
        Ok(Self { root })
    }

    /// Path holding the object for `key`, resolving directory markers.
    async fn object_path(&self, key: &str) -> StorageResult<PathBuf> {
        match key.strip_suffix('/') {
            Some(dir) => Ok(self.key_path(dir).await?.join(DIR_MARKER_FILE)),
            None => {
                if key.rsplit('/').next() == Some(DIR_MARKER_FILE) {
                    return Err(StorageError::InvalidKey(format!(
                        "reserved file name: {key}"
                    )));
                }
                self.key_path(key).await
            }
        }
    }

    /// Resolve `key` under the root on the blocking pool, since resolution
    /// touches the filesystem.
    async fn key_path(&self, key: &str) -> StorageResult<PathBuf> {
        let root = self.root.clone();
        let key = key.to_string();
        tokio::task::spawn_blocking(move || Self::confine(&root, &key))
            .await
            .map_err(|e| StorageError::Io(std::io::Error::other(format!("resolver task: {e}"))))?
    }

    /// Join `key` onto `root`, refusing keys that would land outside it.
    ///
    /// The deepest entry that already exists on the way to the target must
    /// canonicalize inside the root. That covers symlinked files and
    /// symlinked directories a later `create_dir_all` would follow.
    fn confine(root: &Path, key: &str) -> StorageResult<PathBuf> {
        let escapes = || StorageError::InvalidKey(format!("key escapes storage root: {key}"));

        let plain = Path::new(key)
            .components()
            .all(|c| matches!(c, Component::Normal(_)));
        if !plain || key.starts_with('\\') {
            return Err(escapes());
        }

        let root_canonical = root.canonicalize()?;
        let path = root.join(key);
        let mut cursor = path.as_path();
        loop {
            match std::fs::symlink_metadata(cursor) {
                Ok(meta) => {
                    let resolved = cursor.canonicalize().map_err(|e| {
                        if meta.file_type().is_symlink() {
                            escapes()
                        } else {
                            StorageError::Io(e)
                        }
                    })?;
                    if !resolved.starts_with(&root_canonical) {
                        return Err(escapes());
                    }
                    return Ok(path);
                }
                Err(e) if is_absent(&e) => match cursor.parent() {
                    Some(parent) => cursor = parent,
                    None => return Ok(path),
                },
                Err(e) => return Err(StorageError::Io(e)),
            }
        }
    }

    /// Ensure parent directory exists.
    async fn ensure_parent(&self, path: &Path) -> StorageResult<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }
        Ok(())
    }

    /// Map a file under the root back to its key.
    fn key_for(root: &Path, path: &Path) -> Option<String> {
        let rel = path.strip_prefix(root).ok()?;
        let rel = rel.to_string_lossy().replace('\\', "/");
        // In-flight writes from `put`.
        if let Some((_, suffix)) = rel.rsplit_once(".tmp.")
            && Uuid::parse_str(suffix).is_ok()
        {
            return None;
        }
        match rel.strip_suffix(DIR_MARKER_FILE) {
            Some(dir) if dir.is_empty() || dir.ends_with('/') => Some(dir.to_string()),
            _ => Some(rel),
        }
    }

    /// Split a listing prefix into the directory to walk and the key filter.
    fn walk_base(prefix: &str) -> &str {
        match prefix.rfind('/') {
            Some(idx) => &prefix[..=idx],
            None => "",
        }
    }
}

/// A missing entry, or a path that runs through a regular file
/// (`docs/a.txt/` when `docs/a.txt` is a file).
fn is_absent(e: &std::io::Error) -> bool {
    matches!(e.kind(), ErrorKind::NotFound | ErrorKind::NotADirectory)
}

fn not_found_or_io(key: &str, e: std::io::Error) -> StorageError {
    if is_absent(&e) {
        StorageError::NotFound(key.to_string())
    } else {
        StorageError::Io(e)
    }
}

#[async_trait]
impl ObjectStore for FilesystemBackend {
    #[instrument(skip(self), fields(backend = "filesystem"))]
    async fn exists(&self, key: &str) -> StorageResult<bool> {
        let path = self.object_path(key).await?;
        match fs::metadata(&path).await {
            Ok(meta) => Ok(meta.is_file()),
            Err(e) if is_absent(&e) => Ok(false),
            Err(e) => Err(StorageError::Io(e)),
        }
    }

    #[instrument(skip(self), fields(backend = "filesystem"))]
    async fn head(&self, key: &str) -> StorageResult<ObjectMeta> {
        let path = self.object_path(key).await?;
        let metadata = fs::metadata(&path)
            .await
            .map_err(|e| not_found_or_io(key, e))?;
        if !metadata.is_file() {
            return Err(StorageError::NotFound(key.to_string()));
        }

        Ok(ObjectMeta {
            size: metadata.len(),
            last_modified: metadata.modified().ok().map(|t| t.into()),
            content_type: None,
        })
    }

    #[instrument(skip(self), fields(backend = "filesystem"))]
    async fn get(&self, key: &str) -> StorageResult<Bytes> {
        let path = self.object_path(key).await?;
        let data = fs::read(&path).await.map_err(|e| not_found_or_io(key, e))?;
        Ok(Bytes::from(data))
    }

    #[instrument(skip(self), fields(backend = "filesystem"))]
    async fn get_stream(&self, key: &str) -> StorageResult<ByteStream> {
        use tokio::io::AsyncReadExt;

        let path = self.object_path(key).await?;
        let file = fs::File::open(&path)
            .await
            .map_err(|e| not_found_or_io(key, e))?;

        let stream = async_stream::try_stream! {
            let mut file = file;
            let mut buf = vec![0u8; STREAM_CHUNK_SIZE];
            loop {
                let n = file.read(&mut buf).await?;
                if n == 0 {
                    break;
                }
                yield Bytes::copy_from_slice(&buf[..n]);
            }
        };

        Ok(Box::pin(stream))
    }

    #[instrument(skip(self, data), fields(backend = "filesystem", size = data.len()))]
    async fn put(&self, key: &str, data: Bytes) -> StorageResult<()> {
        let path = self.object_path(key).await?;
        self.ensure_parent(&path).await?;

        // Readers never observe a partial object: write aside, sync, rename.
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let temp_path = path.with_file_name(format!("{name}.tmp.{}", Uuid::new_v4()));
        let mut file = fs::File::create(&temp_path).await?;
        file.write_all(&data).await?;
        file.sync_all().await?;
        drop(file);
        fs::rename(&temp_path, &path).await?;

        Ok(())
    }

    #[instrument(skip(self), fields(backend = "filesystem"))]
    async fn delete(&self, key: &str) -> StorageResult<()> {
        let path = self.object_path(key).await?;
        match fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if is_absent(&e) => Ok(()),
            Err(e) => Err(StorageError::Io(e)),
        }
    }

    #[instrument(skip(self), fields(backend = "filesystem"))]
    async fn list(&self, prefix: &str) -> StorageResult<Vec<String>> {
        use futures::TryStreamExt;

        let pages: Vec<ListingPage> = self
            .list_pages(prefix, ListingOptions::default())
            .try_collect()
            .await?;
        Ok(pages.into_iter().flat_map(|p| p.keys).collect())
    }

    fn list_pages<'a>(&'a self, prefix: &str, options: ListingOptions) -> PageStream<'a> {
        let root = self.root.clone();
        let prefix = prefix.to_string();
        let page_size = options.normalized_page_size();

        let stream = async_stream::try_stream! {
            let base = Self::walk_base(&prefix);
            let base_path = if base.is_empty() {
                root.clone()
            } else {
                self.key_path(base.trim_end_matches('/')).await?
            };

            let base_is_dir = match fs::metadata(&base_path).await {
                Ok(meta) => meta.is_dir(),
                Err(e) if is_absent(&e) => false,
                Err(e) => Err(StorageError::Io(e))?,
            };
            if !base_is_dir {
                return;
            }

            let mut stack = vec![base_path];
            let mut current_page = Vec::with_capacity(page_size);

            while let Some(dir) = stack.pop() {
                let mut entries = fs::read_dir(&dir).await?;
                while let Some(entry) = entries.next_entry().await? {
                    let path = entry.path();
                    // file_type() does not follow symlinks; symlinks are skipped.
                    let file_type = entry.file_type().await?;
                    if file_type.is_dir() {
                        stack.push(path);
                    } else if file_type.is_file()
                        && let Some(key) = Self::key_for(&root, &path)
                        && key.starts_with(&prefix)
                    {
                        current_page.push(key);
                        if current_page.len() >= page_size {
                            yield ListingPage {
                                keys: std::mem::replace(&mut current_page, Vec::with_capacity(page_size)),
                            };
                        }
                    }
                }
            }

            if !current_page.is_empty() {
                yield ListingPage { keys: current_page };
            }
        };

        Box::pin(stream)
    }

    #[instrument(skip(self), fields(backend = "filesystem"))]
    async fn copy(&self, from: &str, to: &str) -> StorageResult<()> {
        let from_path = self.object_path(from).await?;
        let to_path = self.object_path(to).await?;
        self.ensure_parent(&to_path).await?;
        fs::copy(&from_path, &to_path)
            .await
            .map_err(|e| not_found_or_io(from, e))?;
        Ok(())
    }

    fn backend_name(&self) -> &'static str {
        "filesystem"
    }

    #[instrument(skip(self), fields(backend = "filesystem"))]
    async fn health_check(&self) -> StorageResult<()> {
        if fs::metadata(&self.root).await?.is_dir() {
            Ok(())
        } else {
            Err(StorageError::Config(format!(
                "storage root is not a directory: {}",
                self.root.display()
            )))
        }
    }
}
