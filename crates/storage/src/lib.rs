//! Object storage abstraction and backends for Tessera.
//!
//! This crate provides:
//! - The `ObjectStore` trait: get, head, put, delete and paginated listing
//! - Versioned continuation tokens so a listing can resume in a later process
//! - Backends: local filesystem and S3-compatible

pub mod backends;
pub mod error;
pub mod token;
pub mod traits;

pub use backends::{filesystem::FilesystemBackend, s3::S3Backend};
pub use error::{StorageError, StorageResult};
pub use traits::{
    ContinuationToken, ListingOptions, ListingPage, ListingResume, ObjectMeta, ObjectStore,
    ObjectSummary, StoredObject,
};

use std::sync::Arc;
use tessera_core::config::StorageConfig;

/// Create an object store from configuration.
pub async fn from_config(config: &StorageConfig) -> StorageResult<Arc<dyn ObjectStore>> {
    config.validate().map_err(StorageError::Config)?;

    match config {
        StorageConfig::Filesystem { path } => {
            let backend = FilesystemBackend::new(path).await?;
            Ok(Arc::new(backend))
        }
        StorageConfig::S3 {
            bucket,
            endpoint,
            region,
            prefix,
            access_key_id,
            secret_access_key,
            force_path_style,
        } => {
            let backend = S3Backend::new(
                bucket,
                endpoint.clone(),
                region.clone(),
                prefix.clone(),
                access_key_id.clone(),
                secret_access_key.clone(),
                *force_path_style,
            )
            .await?;
            Ok(Arc::new(backend))
        }
    }
}
