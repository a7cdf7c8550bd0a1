//! Origin file metadata, used as the staleness oracle for the sweep.

use crate::error::{OriginError, OriginResult};
use crate::token::BearerToken;
use async_trait::async_trait;
use percent_encoding::utf8_percent_encode;
use serde::Deserialize;
use tessera_core::OriginKind;
use tessera_core::key::IDENTIFIER_ENCODE_SET;
use time::OffsetDateTime;
use tracing::instrument;

/// Metadata the origin reports for one file.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OriginMetadata {
    #[serde(default)]
    pub name: String,
    #[serde(with = "time::serde::rfc3339")]
    pub modified_time: OffsetDateTime,
}

/// Outcome of a metadata lookup. A missing file is an answer, not an error.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum MetadataLookup {
    Found(OriginMetadata),
    NotFound,
}

/// Live metadata lookups against an origin.
#[async_trait]
pub trait MetadataSource: Send + Sync + 'static {
    async fn metadata(
        &self,
        origin: OriginKind,
        identifier: &str,
        token: &BearerToken,
    ) -> OriginResult<MetadataLookup>;
}

/// Google Drive files API client. Serves `OriginKind::GoogleDrive` lookups.
#[derive(Clone, Debug)]
pub struct DriveMetadataClient {
    http: reqwest::Client,
    api_url: String,
}

impl DriveMetadataClient {
    pub fn new(http: reqwest::Client, api_url: &str) -> Self {
        Self {
            http,
            api_url: api_url.trim_end_matches('/').to_string(),
        }
    }

    fn file_url(&self, identifier: &str) -> String {
        format!(
            "{}/files/{}",
            self.api_url,
            utf8_percent_encode(identifier, IDENTIFIER_ENCODE_SET)
        )
    }
}

#[async_trait]
impl MetadataSource for DriveMetadataClient {
    #[instrument(skip(self, token), fields(origin = %origin))]
    async fn metadata(
        &self,
        origin: OriginKind,
        identifier: &str,
        token: &BearerToken,
    ) -> OriginResult<MetadataLookup> {
        let url = self.file_url(identifier);
        let response = self
            .http
            .get(&url)
            .query(&[("fields", "name,modifiedTime")])
            .bearer_auth(token.as_str())
            .send()
            .await?;

        let status = response.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            return Ok(MetadataLookup::NotFound);
        }
        if !status.is_success() {
            return Err(OriginError::Status {
                status: status.as_u16(),
                url,
            });
        }

        let metadata: OriginMetadata = response
            .json()
            .await
            .map_err(|e| OriginError::InvalidResponse(format!("metadata for {identifier}: {e}")))?;
        Ok(MetadataLookup::Found(metadata))
    }
}
