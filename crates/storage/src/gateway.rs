//! Namespace-scoped access to the object store.
//!
//! Every repository lives under `<namespace>/<repository>/`. The gateway
//! derives keys, bounds each blob-store call with the configured timeout and
//! runs the two multi-object operations: prefix moves (copy then delete per
//! object) and prefix deletion through a bounded producer/consumer pipeline.

use crate::error::{StorageError, StorageResult};
use crate::traits::{
    ByteStream, KeyStream, ListingOptions, ObjectMeta, ObjectStore, ObjectStoreListStreamExt,
};
use bytes::Bytes;
use depot_core::config::FilesConfig;
use depot_core::{LogicalPath, ObjectKey};
use futures::{StreamExt, TryStreamExt};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, instrument, warn};

/// Outcome of a prefix deletion.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct DeleteSummary {
    /// Keys produced by the listing.
    pub listed: u64,
    /// Keys handed to successful batch-delete calls.
    pub deleted: u64,
    /// Batch-delete calls issued.
    pub batches: u64,
}

/// Object store scoped to the file namespace.
#[derive(Clone)]
pub struct ObjectGateway {
    store: Arc<dyn ObjectStore>,
    namespace: String,
    timeout: Duration,
    delete_batch_size: usize,
    handoff_capacity: usize,
    listing: ListingOptions,
}

impl ObjectGateway {
    pub fn new(store: Arc<dyn ObjectStore>, config: &FilesConfig) -> Self {
        Self {
            store,
            namespace: config.namespace_prefix.trim_matches('/').to_string(),
            timeout: config.operation_timeout(),
            delete_batch_size: config.delete_batch_size.max(1),
            handoff_capacity: config.delete_handoff_capacity.max(1),
            listing: ListingOptions::new(config.listing_page_size),
        }
    }

    pub fn store(&self) -> &Arc<dyn ObjectStore> {
        &self.store
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn file_key(&self, repository: &str, path: &LogicalPath) -> ObjectKey {
        ObjectKey::file(&self.namespace, repository, path)
    }

    /// Marker key of a directory, which is also the prefix of its contents.
    pub fn dir_key(&self, repository: &str, dir: &LogicalPath) -> ObjectKey {
        ObjectKey::marker(&self.namespace, repository, dir)
    }

    /// Run a blob-store call under the operation timeout.
    pub async fn bounded<T, F>(&self, operation: &'static str, fut: F) -> StorageResult<T>
    where
        F: Future<Output = StorageResult<T>>,
    {
        tokio::time::timeout(self.timeout, fut)
            .await
            .map_err(|_| StorageError::Timeout {
                operation,
                secs: self.timeout.as_secs(),
            })?
    }

    pub async fn exists(&self, key: &ObjectKey) -> StorageResult<bool> {
        self.bounded("exists", self.store.exists(key.as_str()))
            .await
    }

    pub async fn head(&self, key: &ObjectKey) -> StorageResult<ObjectMeta> {
        self.bounded("head", self.store.head(key.as_str())).await
    }

    /// Open an object for streaming; the timeout covers opening only.
    pub async fn open(&self, key: &ObjectKey) -> StorageResult<(ObjectMeta, ByteStream)> {
        let meta = self.head(key).await?;
        let stream = self
            .bounded("get", self.store.get_stream(key.as_str()))
            .await?;
        Ok((meta, stream))
    }

    pub async fn put(&self, key: &ObjectKey, data: Bytes) -> StorageResult<()> {
        self.bounded("put", self.store.put(key.as_str(), data))
            .await
    }

    /// Write a zero-length directory marker.
    pub async fn put_marker(&self, key: &ObjectKey) -> StorageResult<()> {
        if !key.is_marker() {
            return Err(StorageError::InvalidKey(format!(
                "directory marker must end with '/': {key}"
            )));
        }
        self.put(key, Bytes::new()).await
    }

    pub async fn delete(&self, key: &ObjectKey) -> StorageResult<()> {
        self.bounded("delete", self.store.delete(key.as_str()))
            .await
    }

    /// Copy an object to its new key, then delete the original.
    pub async fn move_object(&self, from: &ObjectKey, to: &ObjectKey) -> StorageResult<()> {
        self.bounded("copy", self.store.copy(from.as_str(), to.as_str()))
            .await?;
        self.delete(from).await
    }

    /// Every key under a prefix, materialized.
    pub async fn list_keys(&self, prefix: &ObjectKey) -> StorageResult<Vec<ObjectKey>> {
        let mut keys = Vec::new();
        let mut pages = self.store.list_pages(prefix.as_str(), self.listing.clone());
        while let Some(page) = self.bounded("list", pages.try_next()).await? {
            keys.extend(page.keys.into_iter().map(ObjectKey::from_raw));
        }
        Ok(keys)
    }

    /// Stream every key in the namespace.
    pub fn list_namespace(&self) -> KeyStream<'_> {
        let prefix = ObjectKey::namespace_prefix(&self.namespace);
        self.store
            .list_stream_ext(prefix.as_str(), Some(self.listing.clone()))
    }

    /// Move every object under `old_prefix` to the same relative key under
    /// `new_prefix`, one copy-then-delete per object.
    ///
    /// Stops at the first failure; objects already moved stay moved.
    #[instrument(skip_all, fields(old = %old_prefix, new = %new_prefix))]
    pub async fn move_prefix(
        &self,
        old_prefix: &ObjectKey,
        new_prefix: &ObjectKey,
    ) -> StorageResult<u64> {
        let keys = self.list_keys(old_prefix).await?;
        let mut moved = 0u64;
        for key in &keys {
            let Some(target) = key.rebase(old_prefix, new_prefix) else {
                continue;
            };
            if let Err(e) = self.move_object(key, &target).await {
                warn!(
                    key = %key,
                    moved,
                    remaining = keys.len() as u64 - moved,
                    error = %e,
                    "Prefix move stopped"
                );
                return Err(e);
            }
            moved += 1;
        }
        debug!(moved, "Prefix move complete");
        Ok(moved)
    }

    /// Delete every object under `prefix`.
    ///
    /// A spawned producer streams listed keys into a channel of
    /// `delete_handoff_capacity`; the caller's task drains it into
    /// `delete_many` batches of at most `delete_batch_size`. With a capacity of
    /// one the listing advances only as fast as deletion consumes it. The
    /// first failed batch closes the channel, which stops the producer, and
    /// the error is returned. Dropping this future has the same effect.
    ///
    /// Each listing step runs under the operation timeout. A failed or
    /// stalled listing keeps the trailing partial batch.
    #[instrument(skip_all, fields(prefix = %prefix))]
    pub async fn delete_prefix(&self, prefix: &ObjectKey) -> StorageResult<DeleteSummary> {
        let (tx, mut rx) = mpsc::channel::<String>(self.handoff_capacity);
        let store = Arc::clone(&self.store);
        let listing = self.listing.clone();
        let list_prefix = prefix.as_str().to_string();
        let timeout = self.timeout;

        let producer = tokio::spawn(async move {
            let mut keys = store.list_stream_ext(&list_prefix, Some(listing));
            let mut listed = 0u64;
            loop {
                let next = tokio::time::timeout(timeout, keys.next())
                    .await
                    .map_err(|_| StorageError::Timeout {
                        operation: "list",
                        secs: timeout.as_secs(),
                    })?;
                let Some(key) = next else { break };
                if tx.send(key?).await.is_err() {
                    break;
                }
                listed += 1;
            }
            Ok::<u64, StorageError>(listed)
        });

        let mut summary = DeleteSummary::default();
        let mut batch = Vec::with_capacity(self.delete_batch_size);
        let consumed = async {
            while let Some(key) = rx.recv().await {
                batch.push(key);
                if batch.len() >= self.delete_batch_size {
                    self.flush(&mut batch, &mut summary).await?;
                }
            }
            Ok::<(), StorageError>(())
        }
        .await;
        drop(rx);

        let produced = producer
            .await
            .map_err(|e| StorageError::Producer(e.to_string()))?;

        let finished = match (consumed, produced) {
            (Err(e), _) | (Ok(()), Err(e)) => Err(e),
            (Ok(()), Ok(listed)) => {
                summary.listed = listed;
                self.flush(&mut batch, &mut summary).await
            }
        };
        if let Err(e) = finished {
            warn!(
                deleted = summary.deleted,
                kept = batch.len(),
                error = %e,
                "Prefix delete stopped"
            );
            return Err(e);
        }

        debug!(
            listed = summary.listed,
            deleted = summary.deleted,
            batches = summary.batches,
            "Prefix delete complete"
        );
        Ok(summary)
    }

    async fn flush(&self, batch: &mut Vec<String>, summary: &mut DeleteSummary) -> StorageResult<()> {
        if batch.is_empty() {
            return Ok(());
        }
        self.bounded("delete_many", self.store.delete_many(batch.as_slice()))
            .await?;
        summary.deleted += batch.len() as u64;
        summary.batches += 1;
        batch.clear();
        Ok(())
    }
}

impl std::fmt::Debug for ObjectGateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ObjectGateway")
            .field("backend", &self.store.backend_name())
            .field("namespace", &self.namespace)
            .field("timeout", &self.timeout)
            .field("delete_batch_size", &self.delete_batch_size)
            .field("handoff_capacity", &self.handoff_capacity)
            .finish()
    }
}
