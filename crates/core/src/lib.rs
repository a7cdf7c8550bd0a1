//! Core domain types for the Tessera image cache.
//!
//! This crate defines the data model shared by every other crate:
//! - Origin kinds, size classes and cache keys
//! - Resolution of cache keys to origin URLs
//! - Application configuration

pub mod config;
pub mod error;
pub mod key;

pub use config::AppConfig;
pub use error::{Error, Result};
pub use key::{
    CacheKey, IMAGE_CONTENT_TYPE, KeyResolver, OriginKind, ResolvedImage, SizeClass,
    validate_identifier,
};
