//! Hierarchical permission resolution.
//!
//! Resolution walks from the requested path towards the repository root and
//! stops at the first path carrying any grant for the role. That grant alone
//! decides: a restrictive grant deep in the tree masks a permissive grant
//! above it. With no grant anywhere up to and including the repository root
//! the request is denied. The privileged role is never checked.

use async_trait::async_trait;
use depot_core::{Access, Capability, LogicalPath, Role};
use depot_metadata::{GrantRepo, MetadataError, MetadataResult, RepositoryRow};
use std::sync::Arc;
use tracing::trace;
use uuid::Uuid;

/// Point lookup of the capability granted to a role at one exact path.
#[async_trait]
pub trait GrantLookup: Send + Sync {
    async fn lookup(
        &self,
        repository_id: Uuid,
        role_title: &str,
        path: &str,
    ) -> MetadataResult<Option<Capability>>;
}

#[async_trait]
impl<T: GrantRepo + ?Sized> GrantLookup for T {
    async fn lookup(
        &self,
        repository_id: Uuid,
        role_title: &str,
        path: &str,
    ) -> MetadataResult<Option<Capability>> {
        match self.find_grant(repository_id, role_title, path).await? {
            Some(grant) => grant.capability().map(Some).map_err(|e| {
                MetadataError::Internal(format!("grant {} is corrupt: {e}", grant.grant_id))
            }),
            None => Ok(None),
        }
    }
}

/// Outcome of a resolution, with the grant path that decided it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Resolution {
    pub allowed: bool,
    /// Path of the deciding grant; `None` for the privileged role or when no
    /// grant was found.
    pub matched: Option<String>,
}

impl Resolution {
    fn bypass() -> Self {
        Self {
            allowed: true,
            matched: None,
        }
    }

    fn denied() -> Self {
        Self {
            allowed: false,
            matched: None,
        }
    }
}

/// Decides whether a role holds a capability at a path.
pub struct PermissionResolver<L: ?Sized> {
    grants: Arc<L>,
}

impl<L: ?Sized> Clone for PermissionResolver<L> {
    fn clone(&self) -> Self {
        Self {
            grants: Arc::clone(&self.grants),
        }
    }
}

impl<L: GrantLookup + ?Sized> PermissionResolver<L> {
    pub fn new(grants: Arc<L>) -> Self {
        Self { grants }
    }

    pub async fn resolve(
        &self,
        role: &Role,
        repository: &RepositoryRow,
        path: &LogicalPath,
        access: Access,
    ) -> MetadataResult<bool> {
        Ok(self
            .resolve_detailed(role, repository, path, access)
            .await?
            .allowed)
    }

    pub async fn resolve_detailed(
        &self,
        role: &Role,
        repository: &RepositoryRow,
        path: &LogicalPath,
        access: Access,
    ) -> MetadataResult<Resolution> {
        if role.is_privileged() {
            return Ok(Resolution::bypass());
        }

        // The root's grants are keyed by the repository name.
        let candidates = path
            .ancestors()
            .chain(std::iter::once(repository.name.as_str()));

        for candidate in candidates {
            let Some(capability) = self
                .grants
                .lookup(repository.repository_id, &role.title, candidate)
                .await?
            else {
                continue;
            };

            let allowed = capability.allows(access);
            trace!(
                role = %role.title,
                repository = %repository.name,
                path = %path,
                matched = candidate,
                access = access.as_str(),
                allowed,
                "Grant matched"
            );
            return Ok(Resolution {
                allowed,
                matched: Some(candidate.to_string()),
            });
        }

        Ok(Resolution::denied())
    }
}
