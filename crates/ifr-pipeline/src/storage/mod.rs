//! Object-store observer interface
//!
//! The pipeline never depends on a concrete client; it watches and fetches
//! files through the narrow [`StorageObserver`] capability, implemented for
//! S3/MinIO in [`s3`].

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use ifr_common::Result;

pub mod config;
pub mod s3;

pub use config::StorageConfig;
pub use s3::S3Storage;

/// Metadata for one listed object.
///
/// `etag` is the change signature: a content-sensitive fingerprint the
/// change detector compares against the stored value to decide whether a
/// file needs (re)processing.
#[derive(Debug, Clone, PartialEq)]
pub struct ObjectInfo {
    pub path: String,
    pub etag: String,
    pub last_modified: DateTime<Utc>,
    pub size: i64,
}

/// Capability interface over the watched bucket.
#[async_trait]
pub trait StorageObserver: Send + Sync {
    /// List object paths under a prefix (recursive).
    async fn list(&self, prefix: &str) -> Result<Vec<String>>;

    /// Fetch metadata (etag, mtime, size) for one object.
    async fn metadata(&self, path: &str) -> Result<ObjectInfo>;

    /// Fetch an object's full content.
    async fn fetch(&self, path: &str) -> Result<Vec<u8>>;
}
