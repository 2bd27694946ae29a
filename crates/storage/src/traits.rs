//! Storage trait definitions.

use crate::error::{StorageError, StorageResult};
use async_trait::async_trait;
use bytes::Bytes;
use futures::{Stream, StreamExt};
use std::pin::Pin;

/// A boxed stream of bytes for streaming reads.
pub type ByteStream = Pin<Box<dyn Stream<Item = StorageResult<Bytes>> + Send>>;

/// A boxed stream of listing pages borrowing the store.
pub type PageStream<'a> = Pin<Box<dyn Stream<Item = StorageResult<ListingPage>> + Send + 'a>>;

/// A boxed stream of keys borrowing the store.
pub type KeyStream<'a> = Pin<Box<dyn Stream<Item = StorageResult<String>> + Send + 'a>>;

/// Page size constraints for listing operations.
pub const DEFAULT_PAGE_SIZE: usize = 1000;
pub const MIN_PAGE_SIZE: usize = 1;
pub const MAX_PAGE_SIZE: usize = 10000;

/// A single page of listing results.
#[derive(Clone, Debug, Default)]
pub struct ListingPage {
    /// Object keys in this page.
    pub keys: Vec<String>,
}

/// Options for listing operations.
#[derive(Clone, Debug)]
pub struct ListingOptions {
    /// Number of keys to fetch per page, clamped to
    /// [`MIN_PAGE_SIZE`, `MAX_PAGE_SIZE`].
    pub page_size: usize,
}

impl ListingOptions {
    pub fn new(page_size: usize) -> Self {
        Self { page_size }
    }

    /// Get the normalized page size.
    pub fn normalized_page_size(&self) -> usize {
        self.page_size.clamp(MIN_PAGE_SIZE, MAX_PAGE_SIZE)
    }
}

impl Default for ListingOptions {
    fn default() -> Self {
        Self {
            page_size: DEFAULT_PAGE_SIZE,
        }
    }
}

/// Metadata about a stored object.
#[derive(Clone, Debug)]
pub struct ObjectMeta {
    /// Object size in bytes.
    pub size: u64,
    /// Last modification time (if available).
    pub last_modified: Option<time::OffsetDateTime>,
    /// Content type (if available).
    pub content_type: Option<String>,
}

/// Blob-store primitives.
///
/// Keys are flat strings. A key ending in `/` names a zero-length directory
/// marker; every backend must store, list and delete markers like any other
/// object.
#[async_trait]
pub trait ObjectStore: Send + Sync + 'static {
    /// Check if an object exists.
    async fn exists(&self, key: &str) -> StorageResult<bool>;

    /// Get an object's size without fetching content.
    async fn head(&self, key: &str) -> StorageResult<ObjectMeta>;

    /// Get an object's content.
    async fn get(&self, key: &str) -> StorageResult<Bytes>;

    /// Get an object as a byte stream.
    async fn get_stream(&self, key: &str) -> StorageResult<ByteStream>;

    /// Put an object, replacing any existing one.
    async fn put(&self, key: &str, data: Bytes) -> StorageResult<()>;

    /// Delete an object. Deleting a missing object is not an error.
    async fn delete(&self, key: &str) -> StorageResult<()>;

    /// Delete a batch of objects.
    ///
    /// Missing keys are ignored. Keys that could not be deleted are reported
    /// through [`StorageError::BatchDelete`].
    async fn delete_many(&self, keys: &[String]) -> StorageResult<()> {
        let mut failed = Vec::new();
        let mut first_message = None;
        for key in keys {
            match self.delete(key).await {
                Ok(()) => {}
                Err(e) if e.is_not_found() => {}
                Err(e) => {
                    first_message.get_or_insert_with(|| e.to_string());
                    failed.push(key.clone());
                }
            }
        }
        match first_message {
            None => Ok(()),
            Some(message) => Err(StorageError::BatchDelete {
                first_key: failed[0].clone(),
                failed,
                message,
            }),
        }
    }

    /// List every key with a prefix.
    async fn list(&self, prefix: &str) -> StorageResult<Vec<String>>;

    /// List keys with a prefix as a stream of pages.
    fn list_pages<'a>(&'a self, prefix: &str, options: ListingOptions) -> PageStream<'a>;

    /// Copy an object.
    async fn copy(&self, from: &str, to: &str) -> StorageResult<()>;

    /// Get the name of this storage backend, for metrics and logging.
    fn backend_name(&self) -> &'static str;

    /// Verify storage backend connectivity.
    ///
    /// Called at startup before accepting requests. The default does nothing,
    /// which suits backends without remote state.
    async fn health_check(&self) -> StorageResult<()> {
        Ok(())
    }
}

/// Flat key stream built on [`ObjectStore::list_pages`].
///
/// Implemented for every `ObjectStore`; do not implement it manually.
pub trait ObjectStoreListStreamExt: ObjectStore {
    /// List keys with a prefix as a flat stream.
    fn list_stream_ext<'a>(&'a self, prefix: &str, options: Option<ListingOptions>) -> KeyStream<'a> {
        let options = options.unwrap_or_default();
        let key_stream = self
            .list_pages(prefix, options)
            .flat_map(|page_result| match page_result {
                Ok(page) => futures::stream::iter(page.keys.into_iter().map(Ok)).boxed(),
                Err(e) => futures::stream::once(async move { Err(e) }).boxed(),
            });
        Box::pin(key_stream)
    }
}

impl<T: ObjectStore + ?Sized> ObjectStoreListStreamExt for T {}
