//! HTTP request handlers.

pub mod admin;
pub mod auth;
pub mod common;
pub mod directories;
pub mod files;
pub mod repositories;

pub use admin::*;
pub use auth::*;
pub use directories::*;
pub use files::*;
pub use repositories::*;
