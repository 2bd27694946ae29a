//! Startup state kept as key/value pairs.

use crate::error::{MetadataError, MetadataResult};
use async_trait::async_trait;
use uuid::Uuid;

/// Key under which the bootstrapped admin token id is stored.
pub const BOOTSTRAP_TOKEN_KEY: &str = "admin_token_id";

#[async_trait]
pub trait BootstrapRepo: Send + Sync {
    async fn get_state(&self, key: &str) -> MetadataResult<Option<String>>;

    /// Insert or replace a value.
    async fn set_state(&self, key: &str, value: &str) -> MetadataResult<()>;

    async fn clear_state(&self, key: &str) -> MetadataResult<()>;

    /// The token created by the last admin bootstrap, if any.
    async fn get_bootstrap_token_id(&self) -> MetadataResult<Option<Uuid>> {
        self.get_state(BOOTSTRAP_TOKEN_KEY)
            .await?
            .filter(|id| !id.is_empty())
            .map(|id| {
                Uuid::parse_str(&id).map_err(|e| {
                    MetadataError::Internal(format!("invalid bootstrap token id '{id}': {e}"))
                })
            })
            .transpose()
    }

    async fn set_bootstrap_token_id(&self, token_id: Uuid) -> MetadataResult<()> {
        self.set_state(BOOTSTRAP_TOKEN_KEY, &token_id.to_string())
            .await
    }
}
