//! Admin role and token initialization.

use anyhow::{Result, bail};
use depot_core::ADMIN_ROLE;
use depot_core::config::AdminConfig;
use depot_metadata::{MetadataStore, RoleRow, TokenRow};
use time::OffsetDateTime;
use uuid::Uuid;

/// Ensure the privileged role exists and return it.
pub async fn ensure_admin_role(metadata: &dyn MetadataStore) -> Result<RoleRow> {
    if let Some(role) = metadata.get_role_by_title(ADMIN_ROLE).await? {
        return Ok(role);
    }

    let role = RoleRow {
        role_id: Uuid::new_v4(),
        title: ADMIN_ROLE.to_string(),
        created_at: OffsetDateTime::now_utc(),
    };
    match metadata.create_role(&role).await {
        Ok(()) => {
            tracing::info!(role_id = %role.role_id, "Admin role created");
            Ok(role)
        }
        // Another instance created it first.
        Err(e) if e.is_conflict() => metadata
            .get_role_by_title(ADMIN_ROLE)
            .await?
            .ok_or_else(|| anyhow::anyhow!("admin role vanished after conflict")),
        Err(e) => Err(e.into()),
    }
}

/// Ensure the configured admin token exists, rotating the previous one if needed.
///
/// If the token hash changes between restarts, the previously bootstrapped
/// token is revoked and a new one is bound to the admin role.
pub async fn ensure_admin_token(metadata: &dyn MetadataStore, config: &AdminConfig) -> Result<()> {
    // auth hashes with lowercase hex.
    let hash = config
        .token_hash
        .strip_prefix("sha256:")
        .unwrap_or(&config.token_hash)
        .to_lowercase();
    if hash.len() != 64 || !hash.chars().all(|c| c.is_ascii_hexdigit()) {
        bail!("invalid admin token_hash: expected 64 hex chars");
    }

    let admin = ensure_admin_role(metadata).await?;

    if let Some(existing) = metadata.get_token_by_hash(&hash).await? {
        if existing.is_revoked() {
            bail!(
                "admin token hash matches a revoked token (id={}); use a new token hash",
                existing.token_id
            );
        }
        if existing.role_id != admin.role_id {
            bail!(
                "admin token hash matches a token of another role (id={})",
                existing.token_id
            );
        }
        metadata.set_bootstrap_token_id(existing.token_id).await?;
        tracing::debug!("Admin token already exists");
        return Ok(());
    }

    let now = OffsetDateTime::now_utc();
    if let Some(prev_id) = metadata.get_bootstrap_token_id().await? {
        match metadata.revoke_token(prev_id, now).await {
            Ok(()) => tracing::info!(token_id = %prev_id, "Previous admin token revoked"),
            Err(e) if e.is_not_found() => {
                tracing::warn!(token_id = %prev_id, "Previous admin token no longer exists")
            }
            Err(e) => return Err(e.into()),
        }
    }

    let token = TokenRow {
        token_id: Uuid::new_v4(),
        role_id: admin.role_id,
        token_hash: hash,
        description: config.token_description.clone(),
        created_at: now,
        revoked_at: None,
        last_used_at: None,
    };

    metadata.create_token(&token).await?;
    metadata.set_bootstrap_token_id(token.token_id).await?;
    tracing::info!(token_id = %token.token_id, "Admin token created");

    Ok(())
}
