//! Permission grant repository.

use crate::error::MetadataResult;
use crate::models::{GrantRow, NewGrant};
use async_trait::async_trait;
use uuid::Uuid;

#[async_trait]
pub trait GrantRepo: Send + Sync {
    /// Look up the grant for a role at exactly `path`.
    async fn find_grant(
        &self,
        repository_id: Uuid,
        role_title: &str,
        path: &str,
    ) -> MetadataResult<Option<GrantRow>>;

    /// List a repository's grants ordered by path, then role.
    async fn list_grants(&self, repository_id: Uuid) -> MetadataResult<Vec<GrantRow>>;

    /// Create a grant. Fails with `AlreadyExists` when the role already has a
    /// grant at that path.
    async fn create_grant(&self, grant: &NewGrant) -> MetadataResult<GrantRow>;

    /// Replace a grant's role, path and capability. The grant must belong to
    /// `grant.repository_id`, otherwise `NotFound`.
    async fn update_grant(&self, grant_id: i64, grant: &NewGrant) -> MetadataResult<GrantRow>;

    /// Delete a grant of a repository by id. Fails with `NotFound` when absent.
    async fn delete_grant(&self, repository_id: Uuid, grant_id: i64) -> MetadataResult<()>;
}
