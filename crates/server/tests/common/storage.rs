//! Storage test utilities.

use async_trait::async_trait;
use bytes::Bytes;
use depot_core::config::FilesConfig;
use depot_storage::traits::{ByteStream, ListingOptions, ObjectMeta, PageStream};
use depot_storage::{FilesystemBackend, ObjectGateway, ObjectStore, StorageError, StorageResult};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;
use tempfile::TempDir;

/// A test storage wrapper that cleans up on drop.
/// Note: #[allow(dead_code)] because each test file compiles common/ separately.
#[allow(dead_code)]
pub struct TestStorage {
    pub backend: Arc<dyn ObjectStore>,
    _temp_dir: TempDir,
}

#[allow(dead_code)]
impl TestStorage {
    /// Create a new test storage with a temporary directory.
    pub async fn new() -> StorageResult<Self> {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp directory");
        let backend = FilesystemBackend::new(temp_dir.path()).await?;

        Ok(Self {
            backend: Arc::new(backend),
            _temp_dir: temp_dir,
        })
    }

    /// Get a reference to the object store.
    pub fn store(&self) -> Arc<dyn ObjectStore> {
        self.backend.clone()
    }

    /// A gateway over this store with small delete batches.
    pub fn gateway(&self, batch_size: usize) -> ObjectGateway {
        let config = FilesConfig {
            delete_batch_size: batch_size,
            ..Default::default()
        };
        ObjectGateway::new(self.store(), &config)
    }
}

/// Wraps a store with switchable latency and failures.
#[allow(dead_code)]
pub struct FaultyStore {
    inner: Arc<dyn ObjectStore>,
    /// Added to every `exists` and `put`; 0 disables.
    pub latency_ms: AtomicU64,
    /// Every `copy` fails.
    pub fail_copies: AtomicBool,
    /// Every `delete_many` fails.
    pub fail_deletes: AtomicBool,
}

#[allow(dead_code)]
impl FaultyStore {
    pub fn new(inner: Arc<dyn ObjectStore>) -> Arc<Self> {
        Arc::new(Self {
            inner,
            latency_ms: AtomicU64::new(0),
            fail_copies: AtomicBool::new(false),
            fail_deletes: AtomicBool::new(false),
        })
    }

    async fn lag(&self) {
        let ms = self.latency_ms.load(Ordering::SeqCst);
        if ms > 0 {
            tokio::time::sleep(Duration::from_millis(ms)).await;
        }
    }
}

#[async_trait]
impl ObjectStore for FaultyStore {
    async fn exists(&self, key: &str) -> StorageResult<bool> {
        self.lag().await;
        self.inner.exists(key).await
    }

    async fn head(&self, key: &str) -> StorageResult<ObjectMeta> {
        self.inner.head(key).await
    }

    async fn get(&self, key: &str) -> StorageResult<Bytes> {
        self.inner.get(key).await
    }

    async fn get_stream(&self, key: &str) -> StorageResult<ByteStream> {
        self.inner.get_stream(key).await
    }

    async fn put(&self, key: &str, data: Bytes) -> StorageResult<()> {
        self.lag().await;
        self.inner.put(key, data).await
    }

    async fn delete(&self, key: &str) -> StorageResult<()> {
        self.inner.delete(key).await
    }

    async fn delete_many(&self, keys: &[String]) -> StorageResult<()> {
        if self.fail_deletes.load(Ordering::SeqCst) {
            return Err(StorageError::BatchDelete {
                failed: keys.to_vec(),
                first_key: keys.first().cloned().unwrap_or_default(),
                message: "injected failure".to_string(),
            });
        }
        self.inner.delete_many(keys).await
    }

    async fn list(&self, prefix: &str) -> StorageResult<Vec<String>> {
        self.inner.list(prefix).await
    }

    fn list_pages<'a>(&'a self, prefix: &str, options: ListingOptions) -> PageStream<'a> {
        self.inner.list_pages(prefix, options)
    }

    async fn copy(&self, from: &str, to: &str) -> StorageResult<()> {
        if self.fail_copies.load(Ordering::SeqCst) {
            return Err(StorageError::Io(std::io::Error::other("injected copy failure")));
        }
        self.inner.copy(from, to).await
    }

    fn backend_name(&self) -> &'static str {
        "faulty"
    }
}
