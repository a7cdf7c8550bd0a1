//! S3-compatible storage backend using AWS SDK.

use crate::error::{StorageError, StorageResult};
use crate::token::{BackendIdentity, TokenEnvelope};
use crate::traits::{
    ListingOptions, ListingPage, ListingResume, ObjectMeta, ObjectStore, ObjectSummary,
    StoredObject,
};
use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_sdk_s3::Client;
use aws_sdk_s3::error::SdkError;
use aws_sdk_s3::primitives::DateTime;
use bytes::Bytes;
use std::time::Duration;
use time::OffsetDateTime;
use tracing::instrument;

const HEALTH_CHECK_TIMEOUT: Duration = Duration::from_secs(10);

fn map_s3_operation_error<E>(err: SdkError<E>) -> StorageError
where
    E: std::error::Error + Send + Sync + 'static,
{
    StorageError::S3(Box::new(err))
}

fn is_status<E>(err: &SdkError<E>, status: u16) -> bool {
    matches!(err, SdkError::ServiceError(service_err) if service_err.raw().status().as_u16() == status)
}

fn to_offset_date_time(key: &str, dt: &DateTime) -> Option<OffsetDateTime> {
    OffsetDateTime::from_unix_timestamp_nanos(dt.as_nanos())
        .inspect_err(|e| {
            tracing::warn!(
                key = %key,
                timestamp = dt.secs(),
                error = %e,
                "Failed to convert S3 timestamp, upload time unknown"
            );
        })
        .ok()
}

/// S3-compatible object store using AWS SDK.
pub struct S3Backend {
    client: Client,
    bucket: String,
    prefix: Option<String>,
    /// Normalized endpoint, used for backend identity.
    endpoint: String,
    region: String,
}

impl std::fmt::Debug for S3Backend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("S3Backend")
            .field("bucket", &self.bucket)
            .field("prefix", &self.prefix)
            .field("endpoint", &self.endpoint)
            .field("region", &self.region)
            .finish_non_exhaustive()
    }
}

impl S3Backend {
    /// Create a new S3 backend.
    ///
    /// Without explicit credentials the default AWS credential chain is used.
    /// `force_path_style` selects `endpoint/bucket/key` URLs, which MinIO needs.
    pub async fn new(
        bucket: &str,
        endpoint: Option<String>,
        region: Option<String>,
        prefix: Option<String>,
        access_key_id: Option<String>,
        secret_access_key: Option<String>,
        force_path_style: bool,
    ) -> StorageResult<Self> {
        let resolved_region = region.unwrap_or_else(|| "us-east-1".to_string());
        let aws_region = aws_config::Region::new(resolved_region.clone());

        let mut builder = match (access_key_id, secret_access_key) {
            (Some(key_id), Some(secret)) => {
                let credentials = aws_sdk_s3::config::Credentials::new(
                    key_id,
                    secret,
                    None,
                    None,
                    "tessera-config",
                );
                aws_sdk_s3::config::Builder::new()
                    .behavior_version(BehaviorVersion::latest())
                    .region(aws_region)
                    .credentials_provider(credentials)
            }
            (None, None) => {
                let shared = aws_config::defaults(BehaviorVersion::latest())
                    .region(aws_region)
                    .load()
                    .await;
                aws_sdk_s3::config::Builder::from(&shared)
            }
            _ => {
                return Err(StorageError::Config(
                    "s3 config requires both access_key_id and secret_access_key when either is set"
                        .to_string(),
                ));
            }
        };

        // Bare host:port endpoints (e.g. "minio:9000") default to http
        let normalized_endpoint = endpoint.map(|url| {
            let lower = url.to_ascii_lowercase();
            if lower.starts_with("http://") || lower.starts_with("https://") {
                url
            } else {
                format!("http://{url}")
            }
        });

        if let Some(url) = &normalized_endpoint {
            builder = builder.endpoint_url(url);
        }
        if force_path_style {
            builder = builder.force_path_style(true);
        }

        let client = Client::from_conf(builder.build());

        let stored_endpoint = normalized_endpoint
            .unwrap_or_else(|| format!("s3.{resolved_region}.amazonaws.com"));

        // Strip trailing slashes to avoid "prefix//key"
        let prefix = prefix
            .map(|p| p.trim_end_matches('/').to_string())
            .filter(|p| !p.is_empty());

        Ok(Self {
            client,
            bucket: bucket.to_string(),
            prefix,
            endpoint: stored_endpoint,
            region: resolved_region,
        })
    }

    pub fn backend_identity(&self) -> BackendIdentity {
        BackendIdentity::S3 {
            endpoint: self.endpoint.clone(),
            region: self.region.clone(),
            bucket: self.bucket.clone(),
            prefix: self.prefix.clone(),
        }
    }

    /// Object key in the bucket, with the configured prefix applied.
    fn full_key(&self, key: &str) -> String {
        match &self.prefix {
            Some(prefix) => format!("{prefix}/{key}"),
            None => key.to_string(),
        }
    }

    /// Inverse of [`full_key`](Self::full_key) for keys returned by listings.
    fn strip_prefix<'a>(&self, full_key: &'a str) -> &'a str {
        match &self.prefix {
            Some(prefix) => full_key
                .strip_prefix(prefix.as_str())
                .and_then(|rest| rest.strip_prefix('/'))
                .unwrap_or(full_key),
            None => full_key,
        }
    }

    fn map_sdk_error<E>(err: SdkError<E>, key: &str) -> StorageError
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        if is_status(&err, 404) {
            return StorageError::NotFound(key.to_string());
        }
        map_s3_operation_error(err)
    }
}

#[async_trait]
impl ObjectStore for S3Backend {
    #[instrument(skip(self), fields(backend = "s3"))]
    async fn get(&self, key: &str) -> StorageResult<StoredObject> {
        let output = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(self.full_key(key))
            .send()
            .await
            .map_err(|e| Self::map_sdk_error(e, key))?;

        let meta = ObjectMeta {
            size: output.content_length().unwrap_or(0).max(0) as u64,
            last_modified: output
                .last_modified()
                .and_then(|dt| to_offset_date_time(key, dt)),
            content_type: output.content_type().map(str::to_string),
        };

        let data = output
            .body
            .collect()
            .await
            .map_err(|e| StorageError::S3(Box::new(e)))?
            .into_bytes();

        Ok(StoredObject { data, meta })
    }

    #[instrument(skip(self), fields(backend = "s3"))]
    async fn head(&self, key: &str) -> StorageResult<ObjectMeta> {
        let output = self
            .client
            .head_object()
            .bucket(&self.bucket)
            .key(self.full_key(key))
            .send()
            .await
            .map_err(|e| Self::map_sdk_error(e, key))?;

        Ok(ObjectMeta {
            size: output.content_length().unwrap_or(0).max(0) as u64,
            last_modified: output
                .last_modified()
                .and_then(|dt| to_offset_date_time(key, dt)),
            content_type: output.content_type().map(str::to_string),
        })
    }

    #[instrument(skip(self, data), fields(backend = "s3", size = data.len()))]
    async fn put(&self, key: &str, data: Bytes, content_type: &str) -> StorageResult<()> {
        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(self.full_key(key))
            .content_type(content_type)
            .body(data.into())
            .send()
            .await
            .map_err(map_s3_operation_error)?;
        Ok(())
    }

    #[instrument(skip(self), fields(backend = "s3"))]
    async fn delete(&self, key: &str) -> StorageResult<()> {
        match self
            .client
            .delete_object()
            .bucket(&self.bucket)
            .key(self.full_key(key))
            .send()
            .await
        {
            Ok(_) => Ok(()),
            Err(e) if is_status(&e, 404) => Ok(()),
            Err(e) => Err(map_s3_operation_error(e)),
        }
    }

    #[instrument(skip(self, options, resume), fields(backend = "s3"))]
    async fn list_page(
        &self,
        prefix: &str,
        options: ListingOptions,
        resume: Option<ListingResume>,
    ) -> StorageResult<ListingPage> {
        let identity = self.backend_identity();
        let page_size = options.normalized_page_size();

        let s3_token = match resume {
            Some(resume) => {
                let provider =
                    TokenEnvelope::open(&resume.start_token, &identity, prefix, &options)?;
                Some(String::from_utf8(provider).map_err(|e| {
                    StorageError::InvalidContinuationToken(format!(
                        "invalid S3 continuation token encoding: {e}"
                    ))
                })?)
            }
            None => None,
        };

        let mut request = self
            .client
            .list_objects_v2()
            .bucket(&self.bucket)
            .prefix(self.full_key(prefix))
            .max_keys(page_size as i32);
        if let Some(token) = s3_token {
            request = request.continuation_token(token);
        }

        let output = request.send().await.map_err(|e| {
            // S3 answers 400 for expired or foreign continuation tokens
            if is_status(&e, 400) {
                let body = format!("{:?}", e);
                if body.contains("continuation") || body.contains("token") {
                    return StorageError::InvalidContinuationToken(
                        "S3 rejected continuation token".to_string(),
                    );
                }
            }
            map_s3_operation_error(e)
        })?;

        let objects = output
            .contents()
            .iter()
            .filter_map(|obj| {
                let full_key = obj.key()?;
                let key = self.strip_prefix(full_key).to_string();
                Some(ObjectSummary {
                    last_modified: obj
                        .last_modified()
                        .and_then(|dt| to_offset_date_time(&key, dt)),
                    size: obj.size().unwrap_or(0).max(0) as u64,
                    key,
                })
            })
            .collect();

        let next_token = match output.next_continuation_token() {
            Some(token) if output.is_truncated() == Some(true) => Some(
                TokenEnvelope::new(
                    identity,
                    prefix.to_string(),
                    &options,
                    token.as_bytes().to_vec(),
                )?
                .to_token()?,
            ),
            _ => None,
        };

        Ok(ListingPage {
            objects,
            next_token,
        })
    }

    fn backend_name(&self) -> &'static str {
        "s3"
    }

    #[instrument(skip(self), fields(backend = "s3"))]
    async fn health_check(&self) -> StorageResult<()> {
        let check = self.client.head_bucket().bucket(&self.bucket).send();

        tokio::time::timeout(HEALTH_CHECK_TIMEOUT, check)
            .await
            .map_err(|_| {
                StorageError::Io(std::io::Error::new(
                    std::io::ErrorKind::TimedOut,
                    "S3 health check timed out after 10 seconds",
                ))
            })?
            .map_err(map_s3_operation_error)?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn make_backend(prefix: Option<String>) -> S3Backend {
        S3Backend::new(
            "images",
            Some("s3.test".to_string()),
            Some("us-east-1".to_string()),
            prefix,
            Some("access".to_string()),
            Some("secret".to_string()),
            true,
        )
        .await
        .expect("backend should construct for unit tests")
    }

    #[tokio::test]
    async fn test_full_key_and_strip_prefix() {
        let backend = make_backend(Some("cache/".to_string())).await;
        assert_eq!(
            backend.full_key("abc-small-google_drive"),
            "cache/abc-small-google_drive"
        );
        assert_eq!(
            backend.strip_prefix("cache/abc-small-google_drive"),
            "abc-small-google_drive"
        );
        assert_eq!(backend.strip_prefix("cachex/other"), "cachex/other");

        let backend = make_backend(None).await;
        assert_eq!(backend.full_key("k"), "k");
        assert_eq!(backend.strip_prefix("k"), "k");
    }

    #[tokio::test]
    async fn test_empty_prefix_is_no_prefix() {
        let backend = make_backend(Some("/".to_string())).await;
        assert_eq!(backend.full_key("k"), "k");
    }

    #[tokio::test]
    async fn test_backend_identity_normalizes_endpoint() {
        let backend = make_backend(Some("cache".to_string())).await;
        match backend.backend_identity() {
            BackendIdentity::S3 {
                endpoint,
                region,
                bucket,
                prefix,
            } => {
                assert_eq!(endpoint, "http://s3.test");
                assert_eq!(region, "us-east-1");
                assert_eq!(bucket, "images");
                assert_eq!(prefix.as_deref(), Some("cache"));
            }
            other => panic!("unexpected identity: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_list_page_rejects_mismatched_token() {
        let backend = make_backend(None).await;
        let options = ListingOptions::new(100);
        let foreign = BackendIdentity::Filesystem {
            root: "/tmp/other".to_string(),
        };
        let token = TokenEnvelope::new(foreign, String::new(), &options, b"t".to_vec())
            .unwrap()
            .to_token()
            .unwrap();

        let result = backend
            .list_page("", options, Some(ListingResume::new(token)))
            .await;
        assert!(matches!(
            result,
            Err(StorageError::InvalidContinuationToken(_))
        ));
    }

    #[tokio::test]
    async fn test_s3_new_requires_complete_credentials() {
        let err = S3Backend::new(
            "images",
            None,
            Some("us-east-1".to_string()),
            None,
            Some("access".to_string()),
            None,
            false,
        )
        .await
        .unwrap_err();

        assert!(matches!(err, StorageError::Config(_)));
    }
}
