//! Application state shared across handlers.

use crate::service::{FileService, RepositoryRegistry};
use depot_core::config::AppConfig;
use depot_metadata::MetadataStore;
use depot_storage::{ObjectGateway, ObjectStore};
use std::sync::Arc;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    /// Application configuration.
    pub config: Arc<AppConfig>,
    /// Object store scoped to the file namespace.
    pub gateway: ObjectGateway,
    /// Path index, grants, roles and tokens.
    pub metadata: Arc<dyn MetadataStore>,
    /// File and directory operations.
    pub files: FileService,
    /// Repository administration.
    pub registry: RepositoryRegistry,
}

impl AppState {
    /// Wire the services over one object store and one metadata store.
    pub fn new(
        config: AppConfig,
        storage: Arc<dyn ObjectStore>,
        metadata: Arc<dyn MetadataStore>,
    ) -> Self {
        let gateway = ObjectGateway::new(storage, &config.files);
        Self {
            files: FileService::new(gateway.clone(), Arc::clone(&metadata)),
            registry: RepositoryRegistry::new(gateway.clone(), Arc::clone(&metadata)),
            config: Arc::new(config),
            gateway,
            metadata,
        }
    }
}
