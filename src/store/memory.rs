use super::{ObjectStore, PutReceipt, StoreError, StoredObject};
use crate::clock::Clock;
use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, TimeZone, Utc};
use dashmap::DashMap;
use parking_lot::Mutex;
use sha2::{Digest, Sha256};
use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

const URL_SCHEME: &str = "memory://";

/// Operations that can be made to fail on purpose
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StoreOperation {
    List,
    Put,
    Head,
    Delete,
    Sign,
}

#[derive(Debug, Clone)]
struct MemoryObject {
    body: Vec<u8>,
    last_modified: DateTime<Utc>,
    e_tag: String,
}

/// In-memory [`ObjectStore`] driven by a [`Clock`].
///
/// Signed URLs carry an expiry and an HMAC-like signature and can be redeemed
/// through [`MemoryObjectStore::fetch_signed`], which enforces the expiry
/// against the same clock.
#[derive(Clone)]
pub struct MemoryObjectStore {
    bucket: String,
    objects: Arc<DashMap<String, MemoryObject>>,
    clock: Arc<dyn Clock>,
    secret: String,
    failing: Arc<Mutex<HashSet<StoreOperation>>>,
    deleted: Arc<Mutex<Vec<String>>>,
}

impl MemoryObjectStore {
    pub fn new(bucket: impl Into<String>, clock: Arc<dyn Clock>) -> Self {
        Self {
            bucket: bucket.into(),
            objects: Arc::new(DashMap::new()),
            clock,
            secret: Uuid::new_v4().to_string(),
            failing: Arc::new(Mutex::new(HashSet::new())),
            deleted: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Place an object directly, bypassing upload
    pub fn insert(&self, key: impl Into<String>, last_modified: DateTime<Utc>, body: Vec<u8>) {
        let e_tag = hex_digest(&body);
        self.objects.insert(
            key.into(),
            MemoryObject {
                body,
                last_modified,
                e_tag,
            },
        );
    }

    /// Make every future call of `operation` fail until [`Self::recover`]
    pub fn fail_on(&self, operation: StoreOperation) {
        self.failing.lock().insert(operation);
    }

    pub fn recover(&self, operation: StoreOperation) {
        self.failing.lock().remove(&operation);
    }

    pub fn contains(&self, key: &str) -> bool {
        self.objects.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    /// Keys removed through [`ObjectStore::delete_object`], in order
    pub fn deleted_keys(&self) -> Vec<String> {
        self.deleted.lock().clone()
    }

    /// Redeem a signed URL the way a browser would
    pub fn fetch_signed(&self, url: &str) -> Result<Vec<u8>, StoreError> {
        let signed = SignedUrl::parse(url)?;

        if signed.bucket != self.bucket {
            return Err(StoreError::InvalidUrl(format!("wrong bucket {}", signed.bucket)));
        }
        if signed.signature != self.signature(&signed.key, signed.expires_at) {
            return Err(StoreError::InvalidUrl("signature mismatch".to_string()));
        }

        let expires_at = Utc
            .timestamp_millis_opt(signed.expires_at)
            .single()
            .ok_or_else(|| StoreError::InvalidUrl("expiry out of range".to_string()))?;
        if self.clock.now() > expires_at {
            return Err(StoreError::Expired(expires_at));
        }

        self.objects
            .get(&signed.key)
            .map(|entry| entry.body.clone())
            .ok_or(StoreError::NotFound(signed.key))
    }

    fn check(&self, operation: StoreOperation) -> Result<(), StoreError> {
        if !self.failing.lock().contains(&operation) {
            return Ok(());
        }
        let message = format!("injected {:?} failure", operation);
        Err(match operation {
            StoreOperation::List => StoreError::List(message),
            StoreOperation::Put => StoreError::Upload(message),
            StoreOperation::Head => StoreError::Head(message),
            StoreOperation::Delete => StoreError::Delete(message),
            StoreOperation::Sign => StoreError::Sign(message),
        })
    }

    fn signature(&self, key: &str, expires_at: i64) -> String {
        hex_digest(format!("{}\n{}\n{}\n{}", self.secret, self.bucket, key, expires_at).as_bytes())
    }

    fn describe(key: &str, object: &MemoryObject) -> StoredObject {
        StoredObject {
            key: key.to_string(),
            last_modified: object.last_modified,
            size: object.body.len() as u64,
            e_tag: Some(object.e_tag.clone()),
            sha256: None,
        }
    }
}

#[async_trait]
impl ObjectStore for MemoryObjectStore {
    fn bucket(&self) -> &str {
        &self.bucket
    }

    async fn list_objects(&self, prefix: &str) -> Result<Vec<StoredObject>, StoreError> {
        self.check(StoreOperation::List)?;
        Ok(self
            .objects
            .iter()
            .filter(|entry| entry.key().starts_with(prefix))
            .map(|entry| Self::describe(entry.key(), entry.value()))
            .collect())
    }

    async fn put_object(&self, key: &str, path: &Path) -> Result<PutReceipt, StoreError> {
        self.check(StoreOperation::Put)?;
        let body = tokio::fs::read(path)
            .await
            .map_err(|e| StoreError::Io(format!("Failed to read {}: {}", path.display(), e)))?;

        let e_tag = hex_digest(&body);
        self.objects.insert(
            key.to_string(),
            MemoryObject {
                body,
                last_modified: self.clock.now(),
                e_tag: e_tag.clone(),
            },
        );
        Ok(PutReceipt { e_tag: Some(e_tag) })
    }

    async fn head_object(&self, key: &str) -> Result<StoredObject, StoreError> {
        self.check(StoreOperation::Head)?;
        self.objects
            .get(key)
            .map(|entry| Self::describe(key, entry.value()))
            .ok_or_else(|| StoreError::NotFound(key.to_string()))
    }

    async fn delete_object(&self, key: &str) -> Result<(), StoreError> {
        self.check(StoreOperation::Delete)?;
        // S3 deletes are idempotent, so a missing key is not an error
        self.objects.remove(key);
        self.deleted.lock().push(key.to_string());
        Ok(())
    }

    async fn presign_get(&self, key: &str, expires_in: Duration) -> Result<String, StoreError> {
        self.check(StoreOperation::Sign)?;
        let lifetime = ChronoDuration::from_std(expires_in)
            .map_err(|e| StoreError::Sign(format!("Invalid expiration: {}", e)))?;
        let expires_at = (self.clock.now() + lifetime).timestamp_millis();

        Ok(format!(
            "{}{}/{}?expires={}&signature={}&nonce={}",
            URL_SCHEME,
            self.bucket,
            key,
            expires_at,
            self.signature(key, expires_at),
            Uuid::new_v4().simple()
        ))
    }
}

struct SignedUrl {
    bucket: String,
    key: String,
    expires_at: i64,
    signature: String,
}

impl SignedUrl {
    fn parse(url: &str) -> Result<Self, StoreError> {
        let rest = url
            .strip_prefix(URL_SCHEME)
            .ok_or_else(|| StoreError::InvalidUrl(format!("unsupported scheme: {}", url)))?;
        let (path, query) = rest
            .split_once('?')
            .ok_or_else(|| StoreError::InvalidUrl("missing query".to_string()))?;
        let (bucket, key) = path
            .split_once('/')
            .ok_or_else(|| StoreError::InvalidUrl("missing key".to_string()))?;

        let mut expires_at = None;
        let mut signature = None;
        for pair in query.split('&') {
            match pair.split_once('=') {
                Some(("expires", value)) => {
                    expires_at = value.parse::<i64>().ok();
                }
                Some(("signature", value)) => signature = Some(value.to_string()),
                _ => {}
            }
        }

        Ok(Self {
            bucket: bucket.to_string(),
            key: key.to_string(),
            expires_at: expires_at
                .ok_or_else(|| StoreError::InvalidUrl("missing expiry".to_string()))?,
            signature: signature
                .ok_or_else(|| StoreError::InvalidUrl("missing signature".to_string()))?,
        })
    }
}

fn hex_digest(bytes: &[u8]) -> String {
    format!("{:x}", Sha256::digest(bytes))
}
