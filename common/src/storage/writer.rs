// Remote writers: ship a finished local log file to object storage

use crate::config::{RemoteStoreConfig, Settings};
use crate::errors::{ApplicationError, StorageError};
use crate::storage::S3Client;
use async_trait::async_trait;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, instrument};

/// Capability to persist one local file remotely
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait RemoteWriter: Send + Sync {
    /// Upload the file at `local_path`; may fail
    async fn upload(&self, local_path: &Path) -> Result<(), StorageError>;

    /// Location the file is (or will be) stored at
    fn url(&self) -> String;
}

/// Resolves a remote store name and object key into a writer
pub trait RemoteWriterFactory: Send + Sync {
    fn writer_for(&self, store: &str, key: &str) -> Result<Arc<dyn RemoteWriter>, ApplicationError>;
}

/// Writes to one key in an S3-compatible bucket
pub struct S3LogWriter {
    client: S3Client,
    key: String,
}

impl S3LogWriter {
    pub fn new(client: S3Client, key: impl Into<String>) -> Self {
        Self {
            client,
            key: key.into(),
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }
}

#[async_trait]
impl RemoteWriter for S3LogWriter {
    #[instrument(skip(self), fields(key = %self.key))]
    async fn upload(&self, local_path: &Path) -> Result<(), StorageError> {
        let data = tokio::fs::read(local_path).await?;
        debug!(size = data.len(), "Uploading log file");
        self.client.put_object(&self.key, &data).await
    }

    fn url(&self) -> String {
        format!("s3://{}/{}", self.client.bucket_name(), self.key)
    }
}

/// Builds S3 writers from `remote_stores` settings
pub struct S3WriterFactory {
    stores: HashMap<String, RemoteStoreConfig>,
}

impl S3WriterFactory {
    pub fn new(settings: &Settings) -> Self {
        Self {
            stores: settings.remote_stores.clone(),
        }
    }
}

impl RemoteWriterFactory for S3WriterFactory {
    fn writer_for(&self, store: &str, key: &str) -> Result<Arc<dyn RemoteWriter>, ApplicationError> {
        let config = self
            .stores
            .get(store)
            .ok_or_else(|| ApplicationError::UnknownRemoteStore(store.to_string()))?;
        let client = S3Client::new(config).map_err(|e| ApplicationError::Configuration(e.to_string()))?;
        Ok(Arc::new(S3LogWriter::new(client, object_key(config.prefix.as_deref(), key))))
    }
}

fn object_key(prefix: Option<&str>, key: &str) -> String {
    let key = key.trim_start_matches('/');
    match prefix.map(|p| p.trim_matches('/')).filter(|p| !p.is_empty()) {
        Some(prefix) => format!("{}/{}", prefix, key),
        None => key.to_string(),
    }
}
