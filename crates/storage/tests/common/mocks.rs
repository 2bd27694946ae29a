use async_trait::async_trait;
use bytes::Bytes;
use depot_core::config::FilesConfig;
use depot_storage::error::{StorageError, StorageResult};
use depot_storage::traits::{ByteStream, ListingOptions, ListingPage, ObjectMeta, ObjectStore, PageStream};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

/// In-memory backend with counters and failure switches.
#[allow(dead_code)]
#[derive(Default)]
pub struct MemoryBackend {
    objects: Mutex<BTreeMap<String, Bytes>>,
    /// Pages produced by `list_pages`.
    pub pages_fetched: AtomicUsize,
    /// `delete_many` calls, failed ones included.
    pub delete_many_calls: AtomicUsize,
    /// 1-based `delete_many` call that fails; 0 disables.
    pub fail_delete_many_on: AtomicUsize,
    /// Copies fail once this many have succeeded; 0 disables.
    pub fail_copy_after: AtomicUsize,
    copies: AtomicUsize,
    /// Puts never complete.
    pub stall_puts: AtomicBool,
    /// Listing hangs once this many pages were produced; 0 disables.
    pub stall_listing_after: AtomicUsize,
}

#[allow(dead_code)]
impl MemoryBackend {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn with_keys<I, S>(keys: I) -> Arc<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let backend = Self::default();
        {
            let mut objects = backend.objects.lock().unwrap();
            for key in keys {
                objects.insert(key.into(), Bytes::from_static(b"x"));
            }
        }
        Arc::new(backend)
    }

    pub fn keys(&self) -> Vec<String> {
        self.objects.lock().unwrap().keys().cloned().collect()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.objects.lock().unwrap().contains_key(key)
    }
}

#[async_trait]
impl ObjectStore for MemoryBackend {
    async fn exists(&self, key: &str) -> StorageResult<bool> {
        Ok(self.contains(key))
    }

    async fn head(&self, key: &str) -> StorageResult<ObjectMeta> {
        let objects = self.objects.lock().unwrap();
        let data = objects
            .get(key)
            .ok_or_else(|| StorageError::NotFound(key.to_string()))?;
        Ok(ObjectMeta {
            size: data.len() as u64,
            last_modified: None,
            content_type: None,
        })
    }

    async fn get(&self, key: &str) -> StorageResult<Bytes> {
        self.objects
            .lock()
            .unwrap()
            .get(key)
            .cloned()
            .ok_or_else(|| StorageError::NotFound(key.to_string()))
    }

    async fn get_stream(&self, key: &str) -> StorageResult<ByteStream> {
        let data = self.get(key).await?;
        Ok(Box::pin(futures::stream::once(async move { Ok(data) })))
    }

    async fn put(&self, key: &str, data: Bytes) -> StorageResult<()> {
        if self.stall_puts.load(Ordering::SeqCst) {
            futures::future::pending::<()>().await;
        }
        self.objects.lock().unwrap().insert(key.to_string(), data);
        Ok(())
    }

    async fn delete(&self, key: &str) -> StorageResult<()> {
        self.objects.lock().unwrap().remove(key);
        Ok(())
    }

    async fn delete_many(&self, keys: &[String]) -> StorageResult<()> {
        let call = self.delete_many_calls.fetch_add(1, Ordering::SeqCst) + 1;
        if call == self.fail_delete_many_on.load(Ordering::SeqCst) {
            return Err(StorageError::BatchDelete {
                failed: keys.to_vec(),
                first_key: keys.first().cloned().unwrap_or_default(),
                message: "injected failure".to_string(),
            });
        }
        let mut objects = self.objects.lock().unwrap();
        for key in keys {
            objects.remove(key);
        }
        Ok(())
    }

    async fn list(&self, prefix: &str) -> StorageResult<Vec<String>> {
        Ok(self
            .keys()
            .into_iter()
            .filter(|k| k.starts_with(prefix))
            .collect())
    }

    fn list_pages<'a>(&'a self, prefix: &str, options: ListingOptions) -> PageStream<'a> {
        let page_size = options.normalized_page_size();
        let prefix = prefix.to_string();
        Box::pin(async_stream::stream! {
            let mut after: Option<String> = None;
            loop {
                let keys: Vec<String> = {
                    let objects = self.objects.lock().unwrap();
                    objects
                        .keys()
                        .filter(|k| k.starts_with(&prefix))
                        .filter(|k| after.as_ref().is_none_or(|a| k.as_str() > a.as_str()))
                        .take(page_size)
                        .cloned()
                        .collect()
                };
                if keys.is_empty() {
                    break;
                }
                let stall_after = self.stall_listing_after.load(Ordering::SeqCst);
                if stall_after > 0 && self.pages_fetched.load(Ordering::SeqCst) >= stall_after {
                    futures::future::pending::<()>().await;
                }
                self.pages_fetched.fetch_add(1, Ordering::SeqCst);
                after = keys.last().cloned();
                let last_page = keys.len() < page_size;
                yield Ok(ListingPage { keys });
                if last_page {
                    break;
                }
            }
        })
    }

    async fn copy(&self, from: &str, to: &str) -> StorageResult<()> {
        let limit = self.fail_copy_after.load(Ordering::SeqCst);
        if limit > 0 && self.copies.load(Ordering::SeqCst) >= limit {
            return Err(StorageError::Io(std::io::Error::other("injected copy failure")));
        }
        let data = self.get(from).await?;
        self.objects.lock().unwrap().insert(to.to_string(), data);
        self.copies.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn backend_name(&self) -> &'static str {
        "memory"
    }
}

/// Gateway settings with small batches so pipelines span several calls.
#[allow(dead_code)]
pub fn gateway_config(batch: usize, page: usize) -> FilesConfig {
    FilesConfig {
        namespace_prefix: "backend".to_string(),
        operation_timeout_secs: 5,
        delete_batch_size: batch,
        delete_handoff_capacity: 1,
        listing_page_size: page,
    }
}
