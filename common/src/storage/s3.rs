// S3-compatible object storage client
// No unwrap(), use #[tracing::instrument], proper error handling

use crate::config::RemoteStoreConfig;
use crate::errors::StorageError;
use s3::bucket::Bucket;
use s3::creds::Credentials;
use s3::region::Region;
use std::sync::Arc;
use tracing::{debug, error, instrument};

/// Bucket handle for one configured remote store
#[derive(Clone, Debug)]
pub struct S3Client {
    bucket: Arc<Bucket>,
    bucket_name: String,
}

impl S3Client {
    /// Create a client from a remote store definition
    #[instrument(skip(config), fields(endpoint = %config.endpoint, bucket = %config.bucket))]
    pub fn new(config: &RemoteStoreConfig) -> Result<Self, StorageError> {
        // rust-s3 Region::Custom expects the endpoint without scheme
        let endpoint = config
            .endpoint
            .trim_start_matches("http://")
            .trim_start_matches("https://")
            .to_string();

        let credentials = Credentials::new(
            config.access_key.as_deref(),
            config.secret_key.as_deref(),
            None,
            None,
            None,
        )
        .map_err(|e| {
            error!(error = %e, "Failed to create S3 credentials");
            StorageError::InvalidConfiguration(format!("Failed to create credentials: {}", e))
        })?;

        let region = Region::Custom {
            region: config.region.clone(),
            endpoint,
        };

        let bucket = Bucket::new(&config.bucket, region, credentials)
            .map_err(|e| {
                error!(error = %e, "Failed to create S3 bucket handle");
                StorageError::InvalidConfiguration(format!("Failed to create bucket: {}", e))
            })?
            .with_path_style();

        debug!(bucket = %config.bucket, "S3 client initialized");

        Ok(Self {
            bucket: Arc::from(bucket),
            bucket_name: config.bucket.clone(),
        })
    }

    pub fn bucket_name(&self) -> &str {
        &self.bucket_name
    }

    /// Store data at the given key. Non-2xx responses are failures.
    #[instrument(skip(self, data), fields(key = %key, size = data.len()))]
    pub async fn put_object(&self, key: &str, data: &[u8]) -> Result<(), StorageError> {
        let response = self.bucket.put_object(key, data).await.map_err(|e| {
            error!(error = %e, key = %key, "Failed to store object");
            StorageError::S3Error(format!("Failed to put object '{}': {}", key, e))
        })?;

        let status = response.status_code();
        if !(200..300).contains(&status) {
            error!(status = status, key = %key, "Object store rejected upload");
            return Err(StorageError::S3Error(format!(
                "Failed to put object '{}': HTTP {}",
                key, status
            )));
        }

        debug!(key = %key, "Object stored successfully");
        Ok(())
    }
}
