// Retention store
// Names, uploads, rotates and signs world archives on top of any ObjectStore.

use super::{sort_oldest_first, ObjectStore, StoreError, StoredObject};
use crate::clock::Clock;
use chrono::{DateTime, SecondsFormat, Utc};
use sha2::{Digest, Sha256};
use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, instrument, warn};

const ARCHIVE_EXTENSION: &str = ".zip";

/// Uploads archives under a fixed key prefix and keeps their number bounded
#[derive(Clone)]
pub struct RetentionStore {
    store: Arc<dyn ObjectStore>,
    clock: Arc<dyn Clock>,
    prefix: String,
}

impl RetentionStore {
    pub fn new(store: Arc<dyn ObjectStore>, clock: Arc<dyn Clock>, prefix: impl Into<String>) -> Self {
        Self {
            store,
            clock,
            prefix: prefix.into(),
        }
    }

    /// Prefix every archive key starts with, e.g. `world-`
    pub fn key_prefix(&self) -> String {
        format!("{}-", self.prefix)
    }

    /// `world-2024-06-01T12:00:00.000Z.zip` for the given instant
    pub fn object_key(&self, at: DateTime<Utc>) -> String {
        format!(
            "{}{}{}",
            self.key_prefix(),
            at.to_rfc3339_opts(SecondsFormat::Millis, true),
            ARCHIVE_EXTENSION
        )
    }

    /// Upload `local_file` under a freshly generated key.
    ///
    /// Every call produces a new key, so retrying after a failure never
    /// overwrites an earlier archive.
    #[instrument(skip(self), fields(bucket = %self.store.bucket()))]
    pub async fn upload(&self, local_file: &Path) -> Result<StoredObject, StoreError> {
        let key = self.object_key(self.clock.now());
        let sha256 = file_sha256(local_file.to_path_buf()).await?;

        info!(key = %key, "Uploading archive");
        let receipt = self.store.put_object(&key, local_file).await?;

        let mut stored = match self.store.head_object(&key).await {
            Ok(head) => head,
            Err(e) => {
                // The put succeeded; describe the object from what we know locally
                debug!(key = %key, error = %e, "Head after upload failed, using local metadata");
                let size = tokio::fs::metadata(local_file)
                    .await
                    .map(|m| m.len())
                    .unwrap_or(0);
                StoredObject {
                    key: key.clone(),
                    last_modified: self.clock.now(),
                    size,
                    e_tag: None,
                    sha256: None,
                }
            }
        };
        stored.e_tag = receipt.e_tag.or(stored.e_tag);
        stored.sha256 = Some(sha256);

        info!(
            key = %stored.key,
            size = stored.size,
            e_tag = ?stored.e_tag,
            "Archive uploaded"
        );
        Ok(stored)
    }

    /// Delete the single oldest object under `prefix` if more than
    /// `max_count` exist. Returns the evicted key.
    ///
    /// The newest object is never evicted, so at least one always survives.
    #[instrument(skip(self), fields(bucket = %self.store.bucket()))]
    pub async fn enforce_retention(
        &self,
        prefix: &str,
        max_count: usize,
    ) -> Result<Option<String>, StoreError> {
        let objects = self.list_all(prefix).await?;
        if objects.len() <= max_count.max(1) {
            debug!(count = objects.len(), max_count, "Retention limit respected");
            return Ok(None);
        }

        let oldest = &objects[0];
        warn!(
            count = objects.len(),
            max_count,
            key = %oldest.key,
            "Too many archives, deleting the oldest"
        );
        self.store.delete_object(&oldest.key).await?;
        info!(key = %oldest.key, "Oldest archive deleted");
        Ok(Some(oldest.key.clone()))
    }

    /// Time-limited download URL. Each call yields an independent link.
    pub async fn sign_download_url(&self, key: &str, expires_in: Duration) -> Result<String, StoreError> {
        self.store.presign_get(key, expires_in).await
    }

    /// All objects under `prefix`, oldest first
    pub async fn list_all(&self, prefix: &str) -> Result<Vec<StoredObject>, StoreError> {
        let mut objects = self.store.list_objects(prefix).await?;
        // Listings of a prefix may include keys a backend matched loosely
        objects.retain(|object| object.key.starts_with(prefix));
        sort_oldest_first(&mut objects);
        Ok(objects)
    }
}

/// Hex SHA-256 of a file, computed on the blocking pool
async fn file_sha256(path: PathBuf) -> Result<String, StoreError> {
    tokio::task::spawn_blocking(move || {
        let mut file = File::open(&path)
            .map_err(|e| StoreError::Io(format!("Failed to open {}: {}", path.display(), e)))?;
        let mut hasher = Sha256::new();
        let mut buffer = vec![0u8; 64 * 1024];
        loop {
            let read = file
                .read(&mut buffer)
                .map_err(|e| StoreError::Io(format!("Failed to read {}: {}", path.display(), e)))?;
            if read == 0 {
                break;
            }
            hasher.update(&buffer[..read]);
        }
        Ok(format!("{:x}", hasher.finalize()))
    })
    .await
    .map_err(|e| StoreError::Io(format!("Checksum task failed: {}", e)))?
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::store::MemoryObjectStore;
    use chrono::TimeZone;

    #[test]
    fn test_object_key_format() {
        let clock = ManualClock::new(Utc.with_ymd_and_hms(2024, 6, 1, 12, 30, 5).unwrap());
        let store = RetentionStore::new(
            Arc::new(MemoryObjectStore::new("b", Arc::new(clock.clone()))),
            Arc::new(clock.clone()),
            "world",
        );

        assert_eq!(store.key_prefix(), "world-");
        assert_eq!(
            store.object_key(clock.now()),
            "world-2024-06-01T12:30:05.000Z.zip"
        );
    }

    #[tokio::test]
    async fn test_file_sha256_matches_known_digest() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("abc.txt");
        std::fs::write(&path, b"abc").unwrap();

        assert_eq!(
            file_sha256(path).await.unwrap(),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }
}
