//! Permission resolution, the path mutation coordinator and repository
//! administration.
//!
//! Operations take the caller's [`depot_core::Role`] explicitly; nothing here
//! reads request state.

pub mod error;
pub mod files;
pub mod reconcile;
pub mod registry;
pub mod resolver;

pub use error::{ServiceError, ServiceResult};
pub use files::{DirectoryChanges, FileService, sanitize_file_name};
pub use reconcile::ReconcileReport;
pub use registry::{GrantInput, IssuedToken, RepositoryRegistry};
pub use resolver::{GrantLookup, PermissionResolver, Resolution};
