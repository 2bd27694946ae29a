//! Caller roles.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Title of the single privileged role. It bypasses every grant check.
pub const ADMIN_ROLE: &str = "admin";

/// Maximum role title length.
pub const MAX_ROLE_TITLE_LEN: usize = 64;

/// A resolved caller identity.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Role {
    pub id: Uuid,
    pub title: String,
}

impl Role {
    pub fn new(id: Uuid, title: impl Into<String>) -> Self {
        Self {
            id,
            title: title.into(),
        }
    }

    /// Whether this is the privileged role.
    pub fn is_privileged(&self) -> bool {
        self.title == ADMIN_ROLE
    }
}

/// Validate a role title used in grants and the role directory.
pub fn validate_role_title(title: &str) -> crate::Result<()> {
    if title.is_empty() || title.len() > MAX_ROLE_TITLE_LEN {
        return Err(crate::Error::InvalidRole(format!(
            "role title must be 1-{MAX_ROLE_TITLE_LEN} characters"
        )));
    }
    if title.chars().any(|c| c.is_control() || c.is_whitespace()) {
        return Err(crate::Error::InvalidRole(
            "role title may not contain whitespace or control characters".to_string(),
        ));
    }
    Ok(())
}
