//! Origin clients for Tessera.
//!
//! Three collaborators sit behind traits so the read path and the sweep can
//! be exercised against fakes:
//! - [`TokenProvider`]: refresh-token exchange for a short-lived bearer token
//! - [`MetadataSource`]: per-file metadata, the sweep's staleness oracle
//! - [`ImageFetcher`]: image bytes for the read and populate paths

pub mod error;
pub mod fetch;
pub mod metadata;
pub mod token;

pub use error::{OriginError, OriginResult};
pub use fetch::{FetchedImage, HttpImageFetcher, ImageFetcher};
pub use metadata::{DriveMetadataClient, MetadataLookup, MetadataSource, OriginMetadata};
pub use token::{BearerToken, RefreshTokenProvider, TokenProvider};

use std::sync::Arc;
use tessera_core::config::OriginConfig;

/// The origin collaborators built from configuration.
#[derive(Clone)]
pub struct OriginClients {
    pub tokens: Arc<dyn TokenProvider>,
    pub metadata: Arc<dyn MetadataSource>,
    pub fetcher: Arc<dyn ImageFetcher>,
}

/// Build origin clients sharing one connection pool.
pub fn from_config(config: &OriginConfig) -> OriginResult<OriginClients> {
    let drive = &config.google_drive;
    let http = reqwest::Client::builder()
        .timeout(drive.request_timeout())
        .user_agent(concat!("tessera/", env!("CARGO_PKG_VERSION")))
        .build()?;

    Ok(OriginClients {
        tokens: Arc::new(RefreshTokenProvider::new(http.clone(), drive)),
        metadata: Arc::new(DriveMetadataClient::new(http.clone(), &drive.api_url)),
        fetcher: Arc::new(HttpImageFetcher::new(http)),
    })
}
