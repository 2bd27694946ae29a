//! Role directory.

use crate::error::MetadataResult;
use crate::models::RoleRow;
use async_trait::async_trait;
use uuid::Uuid;

#[async_trait]
pub trait RoleRepo: Send + Sync {
    /// Create a role. Fails with `AlreadyExists` when the title is taken.
    async fn create_role(&self, role: &RoleRow) -> MetadataResult<()>;

    async fn get_role(&self, role_id: Uuid) -> MetadataResult<Option<RoleRow>>;

    async fn get_role_by_title(&self, title: &str) -> MetadataResult<Option<RoleRow>>;

    async fn list_roles(&self) -> MetadataResult<Vec<RoleRow>>;
}
