//! Repository traits for metadata operations.

pub mod bootstrap;
pub mod grants;
pub mod paths;
pub mod repositories;
pub mod roles;
pub mod tokens;

pub use bootstrap::BootstrapRepo;
pub use grants::GrantRepo;
pub use paths::PathRepo;
pub use repositories::RepositoryRepo;
pub use roles::RoleRepo;
pub use tokens::TokenRepo;
