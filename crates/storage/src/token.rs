//! Continuation token envelope format for resumable listings.
//!
//! Cursors outlive the invocation that produced them: they are carried through
//! the work queue and replayed by a later sweep. The envelope binds the
//! backend-specific token to the backend identity, prefix and page size so a
//! replayed cursor cannot silently resume a different listing.

use crate::error::{StorageError, StorageResult};
use crate::traits::{ContinuationToken, ListingOptions, MAX_TOKEN_SIZE};
use serde::{Deserialize, Serialize};

/// Current token envelope format version.
pub const TOKEN_VERSION: u8 = 1;

/// Backend identity for token validation.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub enum BackendIdentity {
    S3 {
        endpoint: String,
        region: String,
        bucket: String,
        prefix: Option<String>,
    },
    Filesystem {
        /// Root path as configured.
        root: String,
    },
}

/// Versioned continuation token envelope.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TokenEnvelope {
    pub version: u8,
    pub backend: BackendIdentity,
    pub prefix: String,
    /// Page size after clamping.
    pub page_size: usize,
    /// Backend-specific continuation token (opaque bytes).
    #[serde(with = "base64_bytes")]
    pub provider_token: Vec<u8>,
}

impl TokenEnvelope {
    /// Create a new token envelope.
    ///
    /// # Errors
    ///
    /// Returns an error if the envelope would exceed MAX_TOKEN_SIZE when serialized.
    pub fn new(
        backend: BackendIdentity,
        prefix: String,
        options: &ListingOptions,
        provider_token: Vec<u8>,
    ) -> StorageResult<Self> {
        let envelope = Self {
            version: TOKEN_VERSION,
            backend,
            prefix,
            page_size: options.normalized_page_size(),
            provider_token,
        };
        envelope.to_token()?;
        Ok(envelope)
    }

    /// Serialize to a ContinuationToken (JSON inside).
    pub fn to_token(&self) -> StorageResult<ContinuationToken> {
        let json = serde_json::to_vec(self).map_err(|e| {
            StorageError::InvalidContinuationToken(format!(
                "failed to serialize token envelope: {e}"
            ))
        })?;

        if json.len() > MAX_TOKEN_SIZE {
            return Err(StorageError::InvalidContinuationToken(format!(
                "token too large: {} bytes (max: {})",
                json.len(),
                MAX_TOKEN_SIZE
            )));
        }

        ContinuationToken::new(json)
    }

    pub fn from_token(token: &ContinuationToken) -> StorageResult<Self> {
        let envelope: Self = serde_json::from_slice(token.as_bytes()).map_err(|e| {
            StorageError::InvalidContinuationToken(format!(
                "failed to deserialize token envelope: {e}"
            ))
        })?;

        if envelope.version != TOKEN_VERSION {
            return Err(StorageError::InvalidContinuationToken(format!(
                "unsupported token version: {} (expected {})",
                envelope.version, TOKEN_VERSION
            )));
        }

        Ok(envelope)
    }

    /// Decode and validate a resume token in one step, returning the
    /// provider token bytes.
    pub fn open(
        token: &ContinuationToken,
        backend: &BackendIdentity,
        prefix: &str,
        options: &ListingOptions,
    ) -> StorageResult<Vec<u8>> {
        let envelope = Self::from_token(token)?;
        envelope.validate(backend, prefix, options)?;
        Ok(envelope.provider_token)
    }

    /// Validate that this token matches the given backend and listing parameters.
    pub fn validate(
        &self,
        backend: &BackendIdentity,
        prefix: &str,
        options: &ListingOptions,
    ) -> StorageResult<()> {
        if &self.backend != backend {
            return Err(StorageError::InvalidContinuationToken(format!(
                "backend mismatch: token is for {:?}, but current backend is {:?}",
                self.backend, backend
            )));
        }

        if self.prefix != prefix {
            return Err(StorageError::InvalidContinuationToken(format!(
                "prefix mismatch: token is for '{}', but current prefix is '{}'",
                self.prefix, prefix
            )));
        }

        let normalized_page_size = options.normalized_page_size();
        if self.page_size != normalized_page_size {
            return Err(StorageError::InvalidContinuationToken(format!(
                "page_size mismatch: token is for {}, but current page_size is {}",
                self.page_size, normalized_page_size
            )));
        }

        Ok(())
    }

    pub fn provider_token(&self) -> &[u8] {
        &self.provider_token
    }
}

mod base64_bytes {
    use base64::{Engine as _, engine::general_purpose};
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<S>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        general_purpose::STANDARD
            .encode(bytes)
            .serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Vec<u8>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        general_purpose::STANDARD
            .decode(&s)
            .map_err(serde::de::Error::custom)
    }
}
