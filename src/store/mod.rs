//! Object storage for world archives
//!
//! - [`ObjectStore`]: the raw bucket operations (list, put, head, delete, presign)
//! - [`S3ObjectStore`]: AWS S3 or any S3-compatible endpoint
//! - [`MemoryObjectStore`]: in-process store with verifiable signed URLs
//! - [`RetentionStore`]: key naming, bounded retention and download links on
//!   top of any [`ObjectStore`]

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

pub mod memory;
pub mod retention;
pub mod s3;

pub use memory::{MemoryObjectStore, StoreOperation};
pub use retention::RetentionStore;
pub use s3::S3ObjectStore;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum StoreError {
    #[error("Failed to list objects: {0}")]
    List(String),

    #[error("Failed to upload object: {0}")]
    Upload(String),

    #[error("Failed to read object metadata: {0}")]
    Head(String),

    #[error("Failed to delete object: {0}")]
    Delete(String),

    #[error("Failed to sign URL: {0}")]
    Sign(String),

    #[error("Object not found: {0}")]
    NotFound(String),

    #[error("Signed URL rejected: {0}")]
    InvalidUrl(String),

    #[error("Signed URL expired at {0}")]
    Expired(DateTime<Utc>),

    #[error("IO error: {0}")]
    Io(String),
}

/// An archive persisted in the bucket
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredObject {
    pub key: String,
    pub last_modified: DateTime<Utc>,
    pub size: u64,
    /// Store-assigned entity tag, quotes stripped
    pub e_tag: Option<String>,
    /// Hex SHA-256 of the uploaded file, known only for objects uploaded by this process
    pub sha256: Option<String>,
}

/// What the store reports after a successful put
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PutReceipt {
    pub e_tag: Option<String>,
}

/// Raw bucket operations
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Bucket name, for logging
    fn bucket(&self) -> &str;

    /// Every object whose key starts with `prefix`, in no particular order
    async fn list_objects(&self, prefix: &str) -> Result<Vec<StoredObject>, StoreError>;

    /// Upload the file at `path` as `key`
    async fn put_object(&self, key: &str, path: &Path) -> Result<PutReceipt, StoreError>;

    async fn head_object(&self, key: &str) -> Result<StoredObject, StoreError>;

    async fn delete_object(&self, key: &str) -> Result<(), StoreError>;

    /// GET URL for `key` valid for `expires_in` from now. Does not touch the object.
    async fn presign_get(&self, key: &str, expires_in: Duration) -> Result<String, StoreError>;
}

/// Oldest first by last-modified time, ties broken by key
pub fn sort_oldest_first(objects: &mut [StoredObject]) {
    objects.sort_by(|a, b| {
        a.last_modified
            .cmp(&b.last_modified)
            .then_with(|| a.key.cmp(&b.key))
    });
}

/// Entity tags come back wrapped in double quotes
pub fn strip_etag_quotes(raw: &str) -> String {
    raw.trim_matches('"').to_string()
}
