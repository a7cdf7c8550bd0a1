//! Image content fetches.

use crate::error::{OriginError, OriginResult};
use async_trait::async_trait;
use bytes::Bytes;
use tracing::instrument;

/// Image bytes as returned by the origin.
#[derive(Clone, Debug)]
pub struct FetchedImage {
    pub data: Bytes,
    /// Content type the origin claimed, if any.
    pub content_type: Option<String>,
    /// Length announced by the origin before the body was read.
    pub content_length: Option<u64>,
}

impl FetchedImage {
    /// True when the origin announced a length and delivered a non-empty body
    /// of that length. Only complete images are written to the cache.
    pub fn is_complete(&self) -> bool {
        !self.data.is_empty() && self.content_length == Some(self.data.len() as u64)
    }
}

/// Fetches image bytes from an origin URL.
#[async_trait]
pub trait ImageFetcher: Send + Sync + 'static {
    /// Fetch `url`. A non-2xx answer is `OriginError::Status`.
    async fn fetch(&self, url: &str) -> OriginResult<FetchedImage>;
}

/// Plain HTTP GET fetcher.
#[derive(Clone, Debug)]
pub struct HttpImageFetcher {
    http: reqwest::Client,
}

impl HttpImageFetcher {
    pub fn new(http: reqwest::Client) -> Self {
        Self { http }
    }
}

#[async_trait]
impl ImageFetcher for HttpImageFetcher {
    #[instrument(skip(self))]
    async fn fetch(&self, url: &str) -> OriginResult<FetchedImage> {
        let response = self.http.get(url).send().await?;

        let status = response.status();
        if !status.is_success() {
            return Err(OriginError::Status {
                status: status.as_u16(),
                url: url.to_string(),
            });
        }

        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let content_length = response.content_length();
        let data = response.bytes().await?;

        Ok(FetchedImage {
            data,
            content_type,
            content_length,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn image(data: &'static [u8], content_length: Option<u64>) -> FetchedImage {
        FetchedImage {
            data: Bytes::from_static(data),
            content_type: None,
            content_length,
        }
    }

    #[test]
    fn completeness_requires_announced_matching_length() {
        assert!(image(b"jpeg", Some(4)).is_complete());
        assert!(!image(b"jpeg", None).is_complete());
        assert!(!image(b"jpeg", Some(10)).is_complete());
        assert!(!image(b"", Some(0)).is_complete());
    }
}
