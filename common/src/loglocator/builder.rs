// Builds a bound LogLocator from path/remote templates and job metadata

use crate::context::Context;
use crate::errors::{ApplicationError, TemplateError};
use crate::loglocator::{LogFilePath, LogLocator, LogPathParams};
use crate::models::JobRef;
use crate::storage::RemoteWriterFactory;
use chrono::{DateTime, Local};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Remote destination given as `STORE:KEY`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteLogSpec {
    pub store: String,
    pub key_format: LogFilePath,
}

impl RemoteLogSpec {
    /// Parse `STORE:KEY`; an empty key means `%{std}.log`
    pub fn parse(spec: &str) -> Result<Self, String> {
        let (store, key) = spec.split_once(':').unwrap_or((spec, ""));
        let store = store.trim();
        if store.is_empty() {
            return Err(format!("missing remote store name: {}", spec));
        }
        let key = key.trim();
        let key_format = LogFilePath::new(if key.is_empty() { "%{std}.log" } else { key })
            .map_err(|e| e.to_string())?;
        Ok(Self {
            store: store.to_string(),
            key_format,
        })
    }
}

pub struct LogLocatorBuilder {
    path_format: Option<LogFilePath>,
    remote: Option<RemoteLogSpec>,
    writers: Arc<dyn RemoteWriterFactory>,
    upload_timeout: Option<Duration>,
}

impl LogLocatorBuilder {
    /// Resolve the local path format: explicit option first, then settings.
    /// A remote destination without any local format spools into the temp dir.
    pub fn for_options(
        ctx: &Context,
        path_format: Option<LogFilePath>,
        remote: Option<RemoteLogSpec>,
        writers: Arc<dyn RemoteWriterFactory>,
    ) -> Result<Self, TemplateError> {
        let logging = &ctx.settings().logging;
        let path_format = match path_format {
            Some(format) => Some(format),
            None => match (&logging.log_path, &logging.log_dir) {
                (Some(path), _) => Some(LogFilePath::new(path.clone())?),
                (None, Some(dir)) => Some(LogFilePath::in_dir(dir)?),
                (None, None) => None,
            },
        };
        let path_format = match (path_format, &remote) {
            (None, Some(_)) => {
                let spool = std::env::temp_dir().join(crate::APPLICATION_NAME);
                Some(LogFilePath::in_dir(&spool.to_string_lossy())?)
            }
            (format, _) => format,
        };
        let upload_timeout = match ctx.settings().remote_log.upload_timeout_seconds {
            0 => None,
            secs => Some(Duration::from_secs(secs)),
        };

        Ok(Self {
            path_format,
            remote,
            writers,
            upload_timeout,
        })
    }

    pub fn build(
        &self,
        job_ref: &JobRef,
        jobnet_id: &str,
        job_start_time: DateTime<Local>,
        jobnet_start_time: DateTime<Local>,
    ) -> Result<LogLocator, ApplicationError> {
        let params = LogPathParams {
            job_ref,
            jobnet_id,
            job_start_time,
            jobnet_start_time,
        };

        let path = match &self.path_format {
            Some(format) => Some(PathBuf::from(format.format(&params)?)),
            None => None,
        };
        let writer = match &self.remote {
            Some(remote) => {
                let key = remote.key_format.format(&params)?;
                Some(self.writers.writer_for(&remote.store, &key)?)
            }
            None => None,
        };

        debug!(
            path = ?path,
            remote = ?writer.as_ref().map(|w| w.url()),
            "Log locator built"
        );
        Ok(LogLocator::new(path, writer).with_upload_timeout(self.upload_timeout))
    }
}
