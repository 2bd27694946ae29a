//! Repository registry records.

use crate::error::MetadataResult;
use crate::models::RepositoryRow;
use async_trait::async_trait;
use uuid::Uuid;

/// Repository for repository records.
#[async_trait]
pub trait RepositoryRepo: Send + Sync {
    /// Insert a repository and its root path record in one transaction.
    ///
    /// Fails with `AlreadyExists` when the name is taken.
    async fn create_repository(&self, repository: &RepositoryRow) -> MetadataResult<()>;

    async fn get_repository(&self, repository_id: Uuid) -> MetadataResult<Option<RepositoryRow>>;

    async fn get_repository_by_name(&self, name: &str) -> MetadataResult<Option<RepositoryRow>>;

    /// List repositories ordered by name.
    async fn list_repositories(&self) -> MetadataResult<Vec<RepositoryRow>>;
}
