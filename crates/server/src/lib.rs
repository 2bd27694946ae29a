//! HTTP server for the depot permission-scoped file store.
//!
//! This crate provides:
//! - The permission resolver and the path mutation coordinator
//! - Repository, grant, role and token administration
//! - Reconciliation of the path index against object keys
//! - The axum router, token authentication and Prometheus metrics

pub mod auth;
pub mod bootstrap;
pub mod error;
pub mod handlers;
pub mod metrics;
pub mod routes;
pub mod service;
pub mod state;

pub use auth::{AuthenticatedRole, TraceId};
pub use error::ApiError;
pub use routes::create_router;
pub use service::{FileService, RepositoryRegistry, ServiceError};
pub use state::AppState;
