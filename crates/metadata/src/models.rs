//! Database models mapping to the metadata schema.

use depot_core::Capability;
use sqlx::FromRow;
use time::OffsetDateTime;
use uuid::Uuid;

// =============================================================================
// Repositories and path records
// =============================================================================

/// Repository record. Names are validated before they reach the store.
#[derive(Debug, Clone, FromRow)]
pub struct RepositoryRow {
    pub repository_id: Uuid,
    pub name: String,
    pub created_at: OffsetDateTime,
}

/// Indexed path of a repository.
///
/// `path` is a logical path, or the repository name for the repository root.
#[derive(Debug, Clone, FromRow)]
pub struct PathRow {
    pub path_id: i64,
    pub repository_id: Uuid,
    pub path: String,
    pub created_at: OffsetDateTime,
}

// =============================================================================
// Permission grants
// =============================================================================

/// Capability grant for a role at one path of a repository.
#[derive(Debug, Clone, FromRow)]
pub struct GrantRow {
    pub grant_id: i64,
    pub repository_id: Uuid,
    pub role_title: String,
    pub path: String,
    /// Encoded capability, e.g. `r-d`.
    pub permission: String,
    pub created_at: OffsetDateTime,
    pub updated_at: OffsetDateTime,
}

impl GrantRow {
    /// Decode the stored capability.
    pub fn capability(&self) -> depot_core::Result<Capability> {
        self.permission.parse()
    }
}

/// Grant fields supplied on create and edit. The id is assigned by the store.
#[derive(Debug, Clone)]
pub struct NewGrant {
    pub repository_id: Uuid,
    pub role_title: String,
    pub path: String,
    pub capability: Capability,
}

// =============================================================================
// Roles and tokens
// =============================================================================

/// Role record.
#[derive(Debug, Clone, FromRow)]
pub struct RoleRow {
    pub role_id: Uuid,
    pub title: String,
    pub created_at: OffsetDateTime,
}

impl From<RoleRow> for depot_core::Role {
    fn from(row: RoleRow) -> Self {
        depot_core::Role::new(row.role_id, row.title)
    }
}

/// API token record. Only the SHA-256 hash of the secret is stored.
#[derive(Debug, Clone, FromRow)]
pub struct TokenRow {
    pub token_id: Uuid,
    pub role_id: Uuid,
    pub token_hash: String,
    pub description: Option<String>,
    pub created_at: OffsetDateTime,
    pub revoked_at: Option<OffsetDateTime>,
    pub last_used_at: Option<OffsetDateTime>,
}

impl TokenRow {
    pub fn is_revoked(&self) -> bool {
        self.revoked_at.is_some()
    }
}

// =============================================================================
// Rewrite results
// =============================================================================

/// Rows touched by a path rewrite or deletion.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize)]
pub struct RecordChanges {
    pub paths: u64,
    pub grants: u64,
}
