//! Core domain types and shared logic for the depot file store.
//!
//! This crate defines the data model used across all other crates:
//! - Capability flags and their positional encoding
//! - Logical paths, repository-qualified paths and object keys
//! - Roles and the privileged role
//! - Directory tree reconstruction from flat path listings
//! - Configuration shared by the server and its backends

pub mod capability;
pub mod config;
pub mod error;
pub mod path;
pub mod repository;
pub mod role;
pub mod tree;

pub use capability::{Access, Capability};
pub use error::{Error, Result};
pub use path::{LogicalPath, ObjectKey, RepoPath};
pub use repository::validate_repository_name;
pub use role::{ADMIN_ROLE, Role, validate_role_title};
pub use tree::{DirNode, MAX_TREE_DEPTH, build_tree, flatten_tree};

/// Maximum number of segments in a logical path.
pub const MAX_PATH_DEPTH: usize = 64;

/// Maximum length of a logical path in bytes.
pub const MAX_PATH_LEN: usize = 1024;

/// Path separator used by logical paths and object keys.
pub const SEPARATOR: char = '/';
