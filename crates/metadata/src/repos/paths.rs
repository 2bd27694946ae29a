//! Path record repository.
//!
//! Prefix operations match a directory and everything below it, anchored at
//! the separator: a prefix of `docs` covers `docs` and `docs/a` but never
//! `docs-old`. Each multi-table operation runs in a single transaction.

use crate::error::MetadataResult;
use crate::models::{PathRow, RecordChanges};
use async_trait::async_trait;
use uuid::Uuid;

#[async_trait]
pub trait PathRepo: Send + Sync {
    /// Insert a path record. Fails with `AlreadyExists` on a duplicate.
    async fn insert_path(&self, repository_id: Uuid, path: &str) -> MetadataResult<PathRow>;

    /// Insert a path record unless it exists. Returns whether a row was added.
    async fn ensure_path(&self, repository_id: Uuid, path: &str) -> MetadataResult<bool>;

    async fn get_path(&self, repository_id: Uuid, path: &str) -> MetadataResult<Option<PathRow>>;

    /// List every path record of a repository ordered by path.
    async fn list_paths(&self, repository_id: Uuid) -> MetadataResult<Vec<PathRow>>;

    /// Delete one path record and the grants at exactly that path.
    async fn delete_file_records(
        &self,
        repository_id: Uuid,
        path: &str,
    ) -> MetadataResult<RecordChanges>;

    /// Point-update one path record (looked up by id) and any grants at
    /// exactly that path. Fails with `NotFound` when no record exists.
    async fn rename_file_records(
        &self,
        repository_id: Uuid,
        old_path: &str,
        new_path: &str,
    ) -> MetadataResult<RecordChanges>;

    /// Rewrite every path record and grant under `old_prefix` to the same
    /// remainder under `new_prefix`.
    async fn rewrite_prefix(
        &self,
        repository_id: Uuid,
        old_prefix: &str,
        new_prefix: &str,
    ) -> MetadataResult<RecordChanges>;

    /// Delete every path record and grant under `prefix`.
    async fn delete_prefix(&self, repository_id: Uuid, prefix: &str)
    -> MetadataResult<RecordChanges>;
}
