//! Storage trait definitions.

use crate::error::{StorageError, StorageResult};
use async_trait::async_trait;
use bytes::Bytes;
use time::OffsetDateTime;

/// Page size constraints for listing operations.
pub const DEFAULT_PAGE_SIZE: usize = 100;
pub const MIN_PAGE_SIZE: usize = 1;
pub const MAX_PAGE_SIZE: usize = 1000;

/// Maximum size for continuation tokens (2 KB).
pub const MAX_TOKEN_SIZE: usize = 2048;

/// An opaque continuation token for resuming listing operations.
///
/// Tokens are produced by [`ObjectStore::list_page`] and are only valid for the
/// backend, prefix and page size that produced them. They travel through the
/// work queue as base64.
///
/// Maximum size is 2 KB.
#[derive(Clone, PartialEq, Eq)]
pub struct ContinuationToken(Vec<u8>);

impl ContinuationToken {
    /// Create a new continuation token from raw bytes.
    ///
    /// Returns an error if the token exceeds MAX_TOKEN_SIZE.
    pub fn new(data: Vec<u8>) -> StorageResult<Self> {
        if data.len() > MAX_TOKEN_SIZE {
            return Err(StorageError::InvalidContinuationToken(format!(
                "continuation token too large: {} bytes (max: {})",
                data.len(),
                MAX_TOKEN_SIZE
            )));
        }
        Ok(Self(data))
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn to_base64(&self) -> String {
        use base64::{Engine as _, engine::general_purpose};
        general_purpose::STANDARD.encode(&self.0)
    }

    /// Parse from base64.
    ///
    /// Input longer than twice the token limit is rejected before decoding.
    pub fn from_base64(s: &str) -> StorageResult<Self> {
        const MAX_BASE64_INPUT: usize = MAX_TOKEN_SIZE * 2;
        if s.len() > MAX_BASE64_INPUT {
            return Err(StorageError::InvalidContinuationToken(format!(
                "continuation token base64 too large: {} bytes (max: {})",
                s.len(),
                MAX_BASE64_INPUT
            )));
        }

        use base64::{Engine as _, engine::general_purpose};
        let data = general_purpose::STANDARD.decode(s).map_err(|e| {
            StorageError::InvalidContinuationToken(format!(
                "invalid continuation token base64: {e}"
            ))
        })?;
        Self::new(data)
    }
}

impl std::fmt::Debug for ContinuationToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("ContinuationToken")
            .field(&"<redacted>")
            .finish()
    }
}

/// One object as reported by a listing.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ObjectSummary {
    pub key: String,
    pub size: u64,
    /// Store-assigned upload time, when the backend reports one.
    pub last_modified: Option<OffsetDateTime>,
}

/// A single page of listing results.
#[derive(Clone, Debug)]
pub struct ListingPage {
    /// Objects in this page, in backend listing order.
    pub objects: Vec<ObjectSummary>,

    /// Continuation token for the next page, if there are more results.
    /// If None, this is the last page.
    pub next_token: Option<ContinuationToken>,
}

impl ListingPage {
    pub fn is_truncated(&self) -> bool {
        self.next_token.is_some()
    }
}

/// Options for listing operations.
#[derive(Clone, Debug)]
pub struct ListingOptions {
    /// Number of objects to fetch per page, clamped to
    /// [MIN_PAGE_SIZE, MAX_PAGE_SIZE] by [`normalized_page_size`](Self::normalized_page_size).
    pub page_size: usize,
}

impl ListingOptions {
    pub fn new(page_size: usize) -> Self {
        Self { page_size }
    }

    pub fn normalized_page_size(&self) -> usize {
        self.page_size.clamp(MIN_PAGE_SIZE, MAX_PAGE_SIZE)
    }
}

impl Default for ListingOptions {
    fn default() -> Self {
        Self {
            page_size: DEFAULT_PAGE_SIZE,
        }
    }
}

/// Resume options for listing operations.
#[derive(Clone, Debug)]
pub struct ListingResume {
    /// Continuation token from a previous page.
    ///
    /// The backend validates that the token matches the current request
    /// (same prefix, page size and backend identity).
    pub start_token: ContinuationToken,
}

impl ListingResume {
    pub fn new(start_token: ContinuationToken) -> Self {
        Self { start_token }
    }
}

/// Metadata about a stored object.
#[derive(Clone, Debug)]
pub struct ObjectMeta {
    /// Object size in bytes.
    pub size: u64,
    /// Upload time (if available).
    pub last_modified: Option<OffsetDateTime>,
    /// Content type (if available).
    pub content_type: Option<String>,
}

/// An object's bytes together with its metadata.
#[derive(Clone, Debug)]
pub struct StoredObject {
    pub data: Bytes,
    pub meta: ObjectMeta,
}

/// Object store abstraction for cached images.
///
/// Keys map to at most one object. Implementations must make `put` atomic
/// (readers see the old object or the new one, never a partial write) and
/// `delete` idempotent.
#[async_trait]
pub trait ObjectStore: Send + Sync + 'static {
    /// Get an object's content and metadata.
    ///
    /// Returns `StorageError::NotFound` if the key does not exist.
    async fn get(&self, key: &str) -> StorageResult<StoredObject>;

    /// Get an object's metadata without fetching content.
    ///
    /// Returns `StorageError::NotFound` if the key does not exist.
    async fn head(&self, key: &str) -> StorageResult<ObjectMeta>;

    /// Metadata if the object exists, `None` if it does not.
    async fn try_head(&self, key: &str) -> StorageResult<Option<ObjectMeta>> {
        match self.head(key).await {
            Ok(meta) => Ok(Some(meta)),
            Err(StorageError::NotFound(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Put an object atomically with the given content type.
    async fn put(&self, key: &str, data: Bytes, content_type: &str) -> StorageResult<()>;

    /// Delete an object. Deleting a missing key succeeds.
    async fn delete(&self, key: &str) -> StorageResult<()>;

    /// List one page of objects under `prefix`.
    ///
    /// Without `resume` the listing starts at the beginning of the keyspace.
    /// The returned page carries a continuation token exactly when more
    /// objects remain.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::InvalidContinuationToken` if the resume token is
    /// malformed or was produced for a different backend, prefix or page size.
    async fn list_page(
        &self,
        prefix: &str,
        options: ListingOptions,
        resume: Option<ListingResume>,
    ) -> StorageResult<ListingPage>;

    /// Static backend identifier ("s3", "filesystem") used in logs and metrics.
    fn backend_name(&self) -> &'static str;

    /// Verify storage backend connectivity.
    ///
    /// Called during server startup before accepting requests. The default
    /// implementation returns Ok(()).
    async fn health_check(&self) -> StorageResult<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_continuation_token_from_base64_rejects_oversized_input() {
        let huge_base64 = "A".repeat(5000);

        let err = ContinuationToken::from_base64(&huge_base64).unwrap_err();
        assert!(err.to_string().contains("base64 too large"));
    }

    #[test]
    fn test_continuation_token_from_base64_rejects_garbage() {
        let err = ContinuationToken::from_base64("not base64!").unwrap_err();
        assert!(matches!(err, StorageError::InvalidContinuationToken(_)));
    }

    #[test]
    fn test_continuation_token_debug_is_redacted() {
        let token = ContinuationToken::new(b"secret-cursor".to_vec()).unwrap();
        let debug = format!("{token:?}");
        assert!(!debug.contains("secret-cursor"));
    }

    #[test]
    fn test_listing_options_clamp() {
        assert_eq!(ListingOptions::new(0).normalized_page_size(), MIN_PAGE_SIZE);
        assert_eq!(ListingOptions::new(50).normalized_page_size(), 50);
        assert_eq!(
            ListingOptions::new(50_000).normalized_page_size(),
            MAX_PAGE_SIZE
        );
        assert_eq!(ListingOptions::default().normalized_page_size(), 100);
    }

    #[test]
    fn test_page_truncation_follows_token() {
        let page = ListingPage {
            objects: Vec::new(),
            next_token: None,
        };
        assert!(!page.is_truncated());

        let page = ListingPage {
            objects: Vec::new(),
            next_token: Some(ContinuationToken::new(b"x".to_vec()).unwrap()),
        };
        assert!(page.is_truncated());
    }
}
