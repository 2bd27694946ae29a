//! Object storage abstraction, backends and the namespace gateway for depot.
//!
//! This crate provides:
//! - The `ObjectStore` primitives (get, put, copy, delete, batch delete, listing)
//! - Backends: local filesystem and S3-compatible
//! - `ObjectGateway`, which scopes the store to the file namespace and runs
//!   prefix moves and the bounded batch-delete pipeline

pub mod backends;
pub mod error;
pub mod gateway;
pub mod traits;

pub use backends::filesystem::FilesystemBackend;
#[cfg(feature = "s3")]
pub use backends::s3::S3Backend;
pub use error::{StorageError, StorageResult};
pub use gateway::{DeleteSummary, ObjectGateway};
pub use traits::{
    ByteStream, KeyStream, ListingOptions, ListingPage, ObjectMeta, ObjectStore,
    ObjectStoreListStreamExt, PageStream,
};

use depot_core::config::StorageConfig;
use std::sync::Arc;

/// Create an object store from configuration.
pub async fn from_config(config: &StorageConfig) -> StorageResult<Arc<dyn ObjectStore>> {
    config.validate().map_err(StorageError::Config)?;

    match config {
        StorageConfig::Filesystem { path } => {
            let backend = FilesystemBackend::new(path).await?;
            Ok(Arc::new(backend))
        }
        #[cfg(feature = "s3")]
        StorageConfig::S3 {
            bucket,
            endpoint,
            region,
            access_key_id,
            secret_access_key,
            force_path_style,
            ensure_bucket,
        } => {
            let backend = S3Backend::new(
                bucket,
                endpoint.clone(),
                region.clone(),
                access_key_id.clone(),
                secret_access_key.clone(),
                *force_path_style,
            )
            .await?;
            if *ensure_bucket {
                backend.ensure_bucket().await?;
            }
            Ok(Arc::new(backend))
        }
        #[cfg(not(feature = "s3"))]
        StorageConfig::S3 { .. } => Err(StorageError::Config(
            "S3 storage requires the `s3` feature".to_string(),
        )),
    }
}
