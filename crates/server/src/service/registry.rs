//! Repository administration: repositories, grants, roles and tokens.
//!
//! Every operation here is reserved for the privileged role. Listings return
//! an empty result for other roles; mutations fail with `PermissionDenied`
//! and change nothing.

use super::error::{Scope, ServiceError, ServiceResult};
use crate::auth::{generate_token_secret, hash_token};
use crate::metrics::timed;
use depot_core::{
    Capability, LogicalPath, Role, SEPARATOR, validate_repository_name, validate_role_title,
};
use depot_metadata::{
    GrantRow, NewGrant, MetadataStore, PathRow, RepositoryRow, RoleRow, TokenRow,
};
use depot_storage::ObjectGateway;
use serde::Serialize;
use std::sync::Arc;
use time::OffsetDateTime;
use tracing::{info, instrument};
use uuid::Uuid;

/// Grant fields supplied by an administrator.
#[derive(Clone, Debug)]
pub struct GrantInput {
    pub role_title: String,
    /// Logical path, or the repository name for the repository root.
    pub path: String,
    pub capability: Capability,
}

/// A freshly issued token. The secret is never stored and is returned once.
#[derive(Clone, Debug, Serialize)]
pub struct IssuedToken {
    pub token_id: Uuid,
    pub role_title: String,
    pub token: String,
}

/// Creates and enumerates repositories and administers their grants.
#[derive(Clone)]
pub struct RepositoryRegistry {
    pub(super) gateway: ObjectGateway,
    pub(super) metadata: Arc<dyn MetadataStore>,
}

impl RepositoryRegistry {
    pub fn new(gateway: ObjectGateway, metadata: Arc<dyn MetadataStore>) -> Self {
        Self { gateway, metadata }
    }

    // =========================================================================
    // Repositories
    // =========================================================================

    /// Create a repository: its root marker object, then its row and root
    /// path record in one transaction.
    pub async fn create_repository(&self, role: &Role, name: &str) -> ServiceResult<RepositoryRow> {
        timed("create_repository", self.provision(role, name)).await
    }

    #[instrument(skip_all, fields(role = %role.title, repository = name))]
    async fn provision(&self, role: &Role, name: &str) -> ServiceResult<RepositoryRow> {
        let scope = Scope::new("create_repository", name, "");
        require_admin(role, scope)?;
        validate_repository_name(name)?;

        if self
            .metadata
            .get_repository_by_name(name)
            .await
            .map_err(|e| scope.index(e))?
            .is_some()
        {
            return Err(ServiceError::Conflict(format!(
                "repository {name} already exists"
            )));
        }

        self.gateway
            .put_marker(&self.gateway.dir_key(name, &LogicalPath::root()))
            .await
            .map_err(|e| scope.storage(e))?;

        let row = RepositoryRow {
            repository_id: Uuid::new_v4(),
            name: name.to_string(),
            created_at: OffsetDateTime::now_utc(),
        };
        self.metadata
            .create_repository(&row)
            .await
            .map_err(|e| scope.index(e))?;

        info!(repository_id = %row.repository_id, "Repository created");
        Ok(row)
    }

    pub async fn list_repositories(&self, role: &Role) -> ServiceResult<Vec<RepositoryRow>> {
        if !role.is_privileged() {
            return Ok(Vec::new());
        }
        self.metadata
            .list_repositories()
            .await
            .map_err(|e| Scope::new("list_repositories", "*", "").index(e))
    }

    /// Every indexed path of a repository, including its root record.
    pub async fn list_repository_paths(
        &self,
        role: &Role,
        name: &str,
    ) -> ServiceResult<Vec<PathRow>> {
        if !role.is_privileged() {
            return Ok(Vec::new());
        }
        let scope = Scope::new("list_repository_paths", name, "");
        let repo = self.lookup(scope).await?;
        self.metadata
            .list_paths(repo.repository_id)
            .await
            .map_err(|e| scope.index(e))
    }

    pub(super) async fn lookup(&self, scope: Scope<'_>) -> ServiceResult<RepositoryRow> {
        self.metadata
            .get_repository_by_name(scope.repository)
            .await
            .map_err(|e| scope.index(e))?
            .ok_or_else(|| ServiceError::NotFound(format!("repository {}", scope.repository)))
    }

    // =========================================================================
    // Grants
    // =========================================================================

    pub async fn list_grants(&self, role: &Role, name: &str) -> ServiceResult<Vec<GrantRow>> {
        if !role.is_privileged() {
            return Ok(Vec::new());
        }
        let scope = Scope::new("list_grants", name, "");
        let repo = self.lookup(scope).await?;
        self.metadata
            .list_grants(repo.repository_id)
            .await
            .map_err(|e| scope.index(e))
    }

    #[instrument(skip_all, fields(role = %role.title, repository = name, grantee = %input.role_title))]
    pub async fn add_grant(
        &self,
        role: &Role,
        name: &str,
        input: &GrantInput,
    ) -> ServiceResult<GrantRow> {
        timed("add_grant", async {
            let scope = Scope::new("add_grant", name, &input.path);
            require_admin(role, scope)?;
            let repo = self.lookup(scope).await?;
            let request = new_grant(&repo, input)?;

            let grant = self
                .metadata
                .create_grant(&request)
                .await
                .map_err(|e| scope.index(e))?;
            info!(grant_id = grant.grant_id, path = %grant.path, permission = %grant.permission, "Grant added");
            Ok::<_, ServiceError>(grant)
        })
        .await
    }

    #[instrument(skip_all, fields(role = %role.title, repository = name, grant_id = grant_id))]
    pub async fn edit_grant(
        &self,
        role: &Role,
        name: &str,
        grant_id: i64,
        input: &GrantInput,
    ) -> ServiceResult<GrantRow> {
        timed("edit_grant", async {
            let scope = Scope::new("edit_grant", name, &input.path);
            require_admin(role, scope)?;
            let repo = self.lookup(scope).await?;
            let request = new_grant(&repo, input)?;

            let grant = self
                .metadata
                .update_grant(grant_id, &request)
                .await
                .map_err(|e| scope.index(e))?;
            info!(path = %grant.path, permission = %grant.permission, "Grant updated");
            Ok::<_, ServiceError>(grant)
        })
        .await
    }

    #[instrument(skip_all, fields(role = %role.title, repository = name, grant_id = grant_id))]
    pub async fn remove_grant(&self, role: &Role, name: &str, grant_id: i64) -> ServiceResult<()> {
        timed("remove_grant", async {
            let scope = Scope::new("remove_grant", name, "");
            require_admin(role, scope)?;
            let repo = self.lookup(scope).await?;

            self.metadata
                .delete_grant(repo.repository_id, grant_id)
                .await
                .map_err(|e| scope.index(e))?;
            info!("Grant removed");
            Ok::<_, ServiceError>(())
        })
        .await
    }

    // =========================================================================
    // Roles and tokens
    // =========================================================================

    pub async fn create_role(&self, role: &Role, title: &str) -> ServiceResult<RoleRow> {
        let scope = Scope::new("create_role", "*", title);
        require_admin(role, scope)?;
        validate_role_title(title)?;

        let row = RoleRow {
            role_id: Uuid::new_v4(),
            title: title.to_string(),
            created_at: OffsetDateTime::now_utc(),
        };
        self.metadata
            .create_role(&row)
            .await
            .map_err(|e| scope.index(e))?;
        info!(role_id = %row.role_id, title, "Role created");
        Ok(row)
    }

    pub async fn list_roles(&self, role: &Role) -> ServiceResult<Vec<RoleRow>> {
        if !role.is_privileged() {
            return Ok(Vec::new());
        }
        self.metadata
            .list_roles()
            .await
            .map_err(|e| Scope::new("list_roles", "*", "").index(e))
    }

    /// Issue a token for an existing role.
    pub async fn create_token(
        &self,
        role: &Role,
        role_title: &str,
        description: Option<String>,
    ) -> ServiceResult<IssuedToken> {
        let scope = Scope::new("create_token", "*", role_title);
        require_admin(role, scope)?;

        let grantee = self
            .metadata
            .get_role_by_title(role_title)
            .await
            .map_err(|e| scope.index(e))?
            .ok_or_else(|| ServiceError::NotFound(format!("role {role_title}")))?;

        let token = generate_token_secret();
        let row = TokenRow {
            token_id: Uuid::new_v4(),
            role_id: grantee.role_id,
            token_hash: hash_token(&token),
            description,
            created_at: OffsetDateTime::now_utc(),
            revoked_at: None,
            last_used_at: None,
        };
        self.metadata
            .create_token(&row)
            .await
            .map_err(|e| scope.index(e))?;

        info!(token_id = %row.token_id, role = role_title, "Token issued");
        Ok(IssuedToken {
            token_id: row.token_id,
            role_title: grantee.title,
            token,
        })
    }

    pub async fn revoke_token(&self, role: &Role, token_id: Uuid) -> ServiceResult<()> {
        let id = token_id.to_string();
        let scope = Scope::new("revoke_token", "*", &id);
        require_admin(role, scope)?;
        self.metadata
            .revoke_token(token_id, OffsetDateTime::now_utc())
            .await
            .map_err(|e| scope.index(e))?;
        info!(token_id = %token_id, "Token revoked");
        Ok(())
    }
}

pub(super) fn require_admin(role: &Role, scope: Scope<'_>) -> ServiceResult<()> {
    if role.is_privileged() {
        Ok(())
    } else {
        Err(scope.denied())
    }
}

/// Normalize a grant path to a logical path, or to the repository name for
/// the root. A leading repository segment is accepted and stripped, since no
/// logical path may start with it.
fn grant_path(repo: &RepositoryRow, raw: &str) -> ServiceResult<String> {
    let trimmed = raw.trim_matches(SEPARATOR);
    let logical = match trimmed.strip_prefix(repo.name.as_str()) {
        Some("") => "",
        Some(rest) if rest.starts_with(SEPARATOR) => rest,
        _ => trimmed,
    };
    let path = LogicalPath::parse(logical)?;
    if path.is_root() {
        Ok(repo.name.clone())
    } else if path.top_segment() == Some(repo.name.as_str()) {
        Err(ServiceError::BadRequest(format!(
            "grant path {raw:?} repeats the repository name"
        )))
    } else {
        Ok(path.into())
    }
}

fn new_grant(repo: &RepositoryRow, input: &GrantInput) -> ServiceResult<NewGrant> {
    validate_role_title(&input.role_title)?;
    Ok(NewGrant {
        repository_id: repo.repository_id,
        role_title: input.role_title.clone(),
        path: grant_path(repo, &input.path)?,
        capability: input.capability,
    })
}
