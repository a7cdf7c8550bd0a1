//! Cache keys and origin URL resolution.
//!
//! A cache key addresses exactly one stored image and encodes everything needed
//! to find its source again: `{identifier}-{size}-{origin}`. The reconciliation
//! sweep relies on [`CacheKey::parse`] being the exact inverse of
//! [`CacheKey::to_string`].

use crate::config::OriginConfig;
use crate::error::{Error, Result};
use percent_encoding::{AsciiSet, NON_ALPHANUMERIC, utf8_percent_encode};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Content type every cached object is stored with.
pub const IMAGE_CONTENT_TYPE: &str = "image/jpeg";

/// Maximum identifier length accepted from requests and keys.
pub const MAX_IDENTIFIER_LEN: usize = 256;

/// Characters escaped when an identifier is placed in a URL.
/// Everything outside RFC 3986 "unreserved" is encoded.
pub const IDENTIFIER_ENCODE_SET: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'~');

/// Upstream file host an image comes from.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OriginKind {
    GoogleDrive,
}

impl OriginKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::GoogleDrive => "google_drive",
        }
    }
}

impl fmt::Display for OriginKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OriginKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "google_drive" => Ok(Self::GoogleDrive),
            other => Err(Error::UnknownOriginKind(other.to_string())),
        }
    }
}

/// Rendition size of a cached image.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SizeClass {
    Small,
    Large,
}

impl SizeClass {
    /// Every size class. One origin file backs all of them.
    pub const ALL: [SizeClass; 2] = [SizeClass::Small, SizeClass::Large];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Small => "small",
            Self::Large => "large",
        }
    }
}

impl fmt::Display for SizeClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SizeClass {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "small" => Ok(Self::Small),
            "large" => Ok(Self::Large),
            other => Err(Error::UnknownSizeClass(other.to_string())),
        }
    }
}

/// Validate an origin file identifier.
///
/// Identifiers are restricted to ASCII alphanumerics, `-` and `_`, which covers
/// Drive file ids and keeps keys safe as object names and path segments.
pub fn validate_identifier(identifier: &str) -> Result<()> {
    if identifier.is_empty() || identifier.len() > MAX_IDENTIFIER_LEN {
        return Err(Error::InvalidIdentifier(format!(
            "identifier length must be between 1 and {MAX_IDENTIFIER_LEN}"
        )));
    }
    if !identifier
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
    {
        return Err(Error::InvalidIdentifier(identifier.to_string()));
    }
    Ok(())
}

/// Key of one cached object.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct CacheKey {
    identifier: String,
    size: SizeClass,
    origin: OriginKind,
}

impl CacheKey {
    /// Build a key, validating the identifier.
    pub fn new(identifier: &str, size: SizeClass, origin: OriginKind) -> Result<Self> {
        validate_identifier(identifier)?;
        Ok(Self {
            identifier: identifier.to_string(),
            size,
            origin,
        })
    }

    /// Parse a stored key back into its components.
    ///
    /// Splits from the right so identifiers containing `-` survive.
    pub fn parse(key: &str) -> Result<Self> {
        let mut parts = key.rsplitn(3, '-');
        let (Some(origin), Some(size), Some(identifier)) = (parts.next(), parts.next(), parts.next())
        else {
            return Err(Error::InvalidCacheKey(key.to_string()));
        };

        let origin = origin
            .parse::<OriginKind>()
            .map_err(|e| Error::InvalidCacheKey(format!("{key}: {e}")))?;
        let size = size
            .parse::<SizeClass>()
            .map_err(|e| Error::InvalidCacheKey(format!("{key}: {e}")))?;

        Self::new(identifier, size, origin)
            .map_err(|e| Error::InvalidCacheKey(format!("{key}: {e}")))
    }

    pub fn identifier(&self) -> &str {
        &self.identifier
    }

    pub fn size(&self) -> SizeClass {
        self.size
    }

    pub fn origin(&self) -> OriginKind {
        self.origin
    }

    /// The same identifier and origin at a different size.
    pub fn with_size(&self, size: SizeClass) -> Self {
        Self {
            identifier: self.identifier.clone(),
            size,
            origin: self.origin,
        }
    }

    /// Every size-class variant of this key, including itself.
    pub fn variants(&self) -> impl Iterator<Item = CacheKey> + '_ {
        SizeClass::ALL.into_iter().map(|size| self.with_size(size))
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}-{}", self.identifier, self.size, self.origin)
    }
}

/// A cache key together with the URL its bytes are fetched from.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ResolvedImage {
    pub key: CacheKey,
    pub origin_url: String,
}

/// Maps requests onto cache keys and origin URLs.
///
/// Resolution is pure: the only inputs are the configured endpoints and the key.
#[derive(Clone, Debug)]
pub struct KeyResolver {
    google_drive_content_url: String,
    small_width: u32,
    large_width: u32,
}

impl KeyResolver {
    pub fn new(google_drive_content_url: &str, small_width: u32, large_width: u32) -> Self {
        Self {
            google_drive_content_url: google_drive_content_url.trim_end_matches('/').to_string(),
            small_width,
            large_width,
        }
    }

    pub fn from_config(config: &OriginConfig) -> Self {
        let drive = &config.google_drive;
        Self::new(&drive.content_url, drive.small_width, drive.large_width)
    }

    /// Resolve the key and origin URL for a request.
    pub fn resolve(
        &self,
        origin: OriginKind,
        size: SizeClass,
        identifier: &str,
    ) -> Result<ResolvedImage> {
        let key = CacheKey::new(identifier, size, origin)?;
        Ok(self.resolve_key(&key))
    }

    /// Resolve the origin URL for an already-validated key.
    pub fn resolve_key(&self, key: &CacheKey) -> ResolvedImage {
        let origin_url = match key.origin() {
            OriginKind::GoogleDrive => {
                let width = match key.size() {
                    SizeClass::Small => self.small_width,
                    SizeClass::Large => self.large_width,
                };
                format!(
                    "{}?id={}&sz=w{}",
                    self.google_drive_content_url,
                    utf8_percent_encode(key.identifier(), IDENTIFIER_ENCODE_SET),
                    width
                )
            }
        };

        ResolvedImage {
            key: key.clone(),
            origin_url,
        }
    }
}
