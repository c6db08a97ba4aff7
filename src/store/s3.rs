// S3 object store
// Works against AWS S3 or an S3-compatible service (MinIO, LocalStack) through endpoint_url.

use super::{strip_etag_quotes, ObjectStore, PutReceipt, StoreError, StoredObject};
use crate::clock::Clock;
use crate::config::StoreConfig;
use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_sdk_s3::presigning::PresigningConfig;
use aws_sdk_s3::primitives::{ByteStream, DateTime as S3DateTime};
use aws_sdk_s3::Client;
use chrono::{DateTime, Utc};
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tracing::{debug, instrument};

/// S3-backed [`ObjectStore`]. The client is built once and reused for every call.
#[derive(Clone)]
pub struct S3ObjectStore {
    client: Client,
    bucket: String,
    clock: Arc<dyn Clock>,
}

impl S3ObjectStore {
    /// Build a client for the configured region, loading credentials from the
    /// default AWS provider chain
    pub async fn new(config: &StoreConfig, clock: Arc<dyn Clock>) -> Self {
        let mut aws_config_builder = aws_config::defaults(BehaviorVersion::latest())
            .region(aws_config::Region::new(config.region.clone()));

        // Support for LocalStack/MinIO with custom endpoint
        if let Some(ref endpoint) = config.endpoint_url {
            aws_config_builder = aws_config_builder.endpoint_url(endpoint);
        }

        let aws_config = aws_config_builder.load().await;

        let mut s3_config_builder = aws_sdk_s3::config::Builder::from(&aws_config);
        if config.force_path_style {
            s3_config_builder = s3_config_builder.force_path_style(true);
        }

        Self::from_client(
            Client::from_conf(s3_config_builder.build()),
            config.bucket.clone(),
            clock,
        )
    }

    pub fn from_client(client: Client, bucket: impl Into<String>, clock: Arc<dyn Clock>) -> Self {
        Self {
            client,
            bucket: bucket.into(),
            clock,
        }
    }
}

fn to_chrono(value: &S3DateTime) -> Option<DateTime<Utc>> {
    DateTime::<Utc>::from_timestamp(value.secs(), value.subsec_nanos())
}

#[async_trait]
impl ObjectStore for S3ObjectStore {
    fn bucket(&self) -> &str {
        &self.bucket
    }

    #[instrument(skip(self), fields(bucket = %self.bucket))]
    async fn list_objects(&self, prefix: &str) -> Result<Vec<StoredObject>, StoreError> {
        let mut objects = Vec::new();
        let mut continuation: Option<String> = None;

        loop {
            let response = self
                .client
                .list_objects_v2()
                .bucket(&self.bucket)
                .prefix(prefix)
                .set_continuation_token(continuation.take())
                .send()
                .await
                .map_err(|e| StoreError::List(e.into_service_error().to_string()))?;

            for object in response.contents() {
                let Some(key) = object.key() else { continue };
                let last_modified = object
                    .last_modified()
                    .and_then(to_chrono)
                    .ok_or_else(|| StoreError::List(format!("{} has no last-modified time", key)))?;

                objects.push(StoredObject {
                    key: key.to_string(),
                    last_modified,
                    size: object.size().unwrap_or(0).max(0) as u64,
                    e_tag: object.e_tag().map(strip_etag_quotes),
                    sha256: None,
                });
            }

            match response.next_continuation_token() {
                Some(token) if response.is_truncated().unwrap_or(false) => {
                    continuation = Some(token.to_string());
                }
                _ => break,
            }
        }

        debug!(count = objects.len(), "Listed objects");
        Ok(objects)
    }

    #[instrument(skip(self, path), fields(bucket = %self.bucket))]
    async fn put_object(&self, key: &str, path: &Path) -> Result<PutReceipt, StoreError> {
        let body = ByteStream::from_path(path)
            .await
            .map_err(|e| StoreError::Io(format!("Failed to open {}: {}", path.display(), e)))?;

        let response = self
            .client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .content_type("application/zip")
            .body(body)
            .send()
            .await
            .map_err(|e| StoreError::Upload(e.into_service_error().to_string()))?;

        Ok(PutReceipt {
            e_tag: response.e_tag().map(strip_etag_quotes),
        })
    }

    async fn head_object(&self, key: &str) -> Result<StoredObject, StoreError> {
        let response = match self
            .client
            .head_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
        {
            Ok(response) => response,
            Err(e) => {
                let service_error = e.into_service_error();
                if service_error.is_not_found() {
                    return Err(StoreError::NotFound(key.to_string()));
                }
                return Err(StoreError::Head(service_error.to_string()));
            }
        };

        let last_modified = response
            .last_modified()
            .and_then(to_chrono)
            .ok_or_else(|| StoreError::Head(format!("{} has no last-modified time", key)))?;

        Ok(StoredObject {
            key: key.to_string(),
            last_modified,
            size: response.content_length().unwrap_or(0).max(0) as u64,
            e_tag: response.e_tag().map(strip_etag_quotes),
            sha256: None,
        })
    }

    #[instrument(skip(self), fields(bucket = %self.bucket))]
    async fn delete_object(&self, key: &str) -> Result<(), StoreError> {
        self.client
            .delete_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| StoreError::Delete(e.into_service_error().to_string()))?;
        Ok(())
    }

    async fn presign_get(&self, key: &str, expires_in: Duration) -> Result<String, StoreError> {
        let issued_at: SystemTime = self.clock.now().into();
        let presigning_config = PresigningConfig::builder()
            .start_time(issued_at)
            .expires_in(expires_in)
            .build()
            .map_err(|e| StoreError::Sign(format!("Invalid expiration: {}", e)))?;

        let presigned_request = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(key)
            .presigned(presigning_config)
            .await
            .map_err(|e| StoreError::Sign(e.to_string()))?;

        Ok(presigned_request.uri().to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_s3_datetime_conversion_keeps_subseconds() {
        let converted = to_chrono(&S3DateTime::from_secs_and_nanos(1_700_000_000, 250_000_000)).unwrap();
        assert_eq!(
            converted,
            Utc.timestamp_opt(1_700_000_000, 250_000_000).unwrap()
        );
    }
}
