// Log locator: captures a job's console output into a file, ships it to a
// remote store when one is configured, and prunes directories left empty.

pub mod builder;
pub mod path;
pub mod redirect;

pub use builder::LogLocatorBuilder;
pub use path::{LogFilePath, LogPathParams};
pub use redirect::StdStreamRedirect;

use crate::errors::{LogLocatorError, StorageError};
use crate::storage::RemoteWriter;
use crate::telemetry;
use crate::APPLICATION_NAME;
use futures::FutureExt;
use regex::Regex;
use std::fs::{self, OpenOptions};
use std::future::Future;
use std::io::{self, BufRead, BufReader, Write};
use std::panic::AssertUnwindSafe;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// What `LogLocator::upload` did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadOutcome {
    /// No local path or no remote writer
    Skipped,
    /// Stored remotely; the local file was removed
    Uploaded,
    /// Upload failed; the local file was kept and a warning printed
    Failed,
}

impl UploadOutcome {
    fn as_str(self) -> &'static str {
        match self {
            UploadOutcome::Skipped => "skipped",
            UploadOutcome::Uploaded => "uploaded",
            UploadOutcome::Failed => "failed",
        }
    }
}

/// Local log path plus optional remote destination for one run.
///
/// A locator without a path performs no filesystem work at all.
pub struct LogLocator {
    path: Option<PathBuf>,
    remote_writer: Option<Arc<dyn RemoteWriter>>,
    upload_timeout: Option<Duration>,
    captured: AtomicBool,
}

impl std::fmt::Debug for LogLocator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LogLocator")
            .field("path", &self.path)
            .field("remote_url", &self.url())
            .finish()
    }
}

impl LogLocator {
    pub fn new(path: Option<PathBuf>, remote_writer: Option<Arc<dyn RemoteWriter>>) -> Self {
        Self {
            path,
            remote_writer,
            upload_timeout: None,
            captured: AtomicBool::new(false),
        }
    }

    /// Locator used when logging is disabled or nothing is executed
    pub fn empty() -> Self {
        Self::new(None, None)
    }

    pub fn with_upload_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.upload_timeout = timeout;
        self
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn url(&self) -> Option<String> {
        self.remote_writer.as_ref().map(|w| w.url())
    }

    /// Run `body` with stdout and stderr pointed at the log file.
    ///
    /// Without a path the body runs untouched. Otherwise the original
    /// streams are restored on every exit path, panics included, and an
    /// upload is attempted afterwards regardless of how the body ended.
    /// The body's own output value is returned unchanged.
    pub async fn redirect_stdouts<F, Fut, T>(&self, body: F) -> Result<T, LogLocatorError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T>,
    {
        let Some(path) = self.path.as_deref() else {
            return Ok(body().await);
        };
        // Refuse before touching the file so an active capture keeps its output
        if redirect::is_redirected() {
            return Err(LogLocatorError::AlreadyRedirected);
        }

        if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
            fs::create_dir_all(dir).map_err(|source| LogLocatorError::CreateDir {
                path: dir.display().to_string(),
                source,
            })?;
        }
        // Read-write so the captured output can be scanned afterwards
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)
            .map_err(|source| LogLocatorError::OpenFile {
                path: path.display().to_string(),
                source,
            })?;

        debug!(path = %path.display(), "Redirecting standard streams");
        let guard = StdStreamRedirect::enter(&file)?;
        // Truncate only once the streams are ours
        file.set_len(0).map_err(|source| LogLocatorError::OpenFile {
            path: path.display().to_string(),
            source,
        })?;
        drop(file);
        self.captured.store(true, Ordering::SeqCst);

        let outcome = AssertUnwindSafe(async move { body().await })
            .catch_unwind()
            .await;

        drop(guard);
        self.upload().await;

        match outcome {
            Ok(value) => Ok(value),
            Err(panic) => std::panic::resume_unwind(panic),
        }
    }

    /// Best-effort shipment of the log file. Never fails.
    pub async fn upload(&self) -> UploadOutcome {
        let (Some(path), Some(writer)) = (self.path.as_deref(), self.remote_writer.as_ref()) else {
            return UploadOutcome::Skipped;
        };
        let url = writer.url();
        let _ = writeln!(io::stdout(), "{}: remote log: {}", APPLICATION_NAME, url);

        let result = match self.upload_timeout {
            Some(limit) => match tokio::time::timeout(limit, writer.upload(path)).await {
                Ok(result) => result,
                Err(_) => Err(StorageError::Timeout(limit.as_secs())),
            },
            None => writer.upload(path).await,
        };

        let outcome = match result {
            Ok(()) => {
                // The remote copy is authoritative from here on
                let _ = fs::remove_file(path);
                if let Some(dir) = path.parent() {
                    Self::cleanup_local_dirs(dir);
                }
                UploadOutcome::Uploaded
            }
            Err(e) => {
                let _ = writeln!(
                    io::stderr(),
                    "warning: remote log upload failed: {} {}: {}",
                    e.kind(),
                    e,
                    url
                );
                debug!(error = %e, url = %url, "Remote log upload failed");
                UploadOutcome::Failed
            }
        };
        telemetry::record_log_upload(outcome.as_str());
        outcome
    }

    /// Remove `dir` and then each ancestor while removal succeeds.
    ///
    /// Stops at the filesystem root, at `.` (or an empty relative path), or at
    /// the first directory that cannot be removed. Returns how many
    /// directories were removed.
    pub fn cleanup_local_dirs(dir: &Path) -> usize {
        let mut removed = 0;
        let mut current = Some(dir);
        while let Some(dir) = current {
            if dir.as_os_str().is_empty() || dir == Path::new(".") || dir.parent().is_none() {
                break;
            }
            if fs::remove_dir(dir).is_err() {
                break;
            }
            removed += 1;
            current = dir.parent();
        }
        removed
    }

    /// Last capture of `pattern` over every line of the captured log.
    ///
    /// Uses capture group 1 when the pattern has one, otherwise the whole
    /// match. Later lines win. Returns `None` when nothing was captured to a
    /// file, the file is gone, nothing matched, or the match is blank.
    pub fn slice_last_stderr_like(&self, pattern: &Regex) -> Option<String> {
        if !self.captured.load(Ordering::SeqCst) {
            return None;
        }
        let path = self.path.as_deref()?;
        let _ = io::stdout().flush();
        let _ = io::stderr().flush();

        let file = fs::File::open(path).ok()?;
        let mut matched = None;
        // Job output is arbitrary bytes; undecodable lines are still scanned
        for raw in BufReader::new(file).split(b'\n') {
            let Ok(raw) = raw else { break };
            let raw = raw.strip_suffix(b"\r").unwrap_or(&raw[..]);
            let line = String::from_utf8_lossy(raw);
            if let Some(caps) = pattern.captures(&line) {
                if let Some(m) = caps.get(1).or_else(|| caps.get(0)) {
                    matched = Some(m.as_str().to_string());
                }
            }
        }

        matched
            .map(|m| m.trim().to_string())
            .filter(|m| !m.is_empty())
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::storage::writer::MockRemoteWriter;
    use std::os::fd::{BorrowedFd, RawFd};
    use std::os::unix::fs::MetadataExt;

    /// Serializes every test that touches fd 1 / fd 2
    pub(crate) static STREAM_LOCK: tokio::sync::Mutex<()> = tokio::sync::Mutex::const_new(());

    pub(crate) fn stream_identity(fd: RawFd) -> (u64, u64) {
        let owned = unsafe { BorrowedFd::borrow_raw(fd) }.try_clone_to_owned().unwrap();
        let meta = fs::File::from(owned).metadata().unwrap();
        (meta.dev(), meta.ino())
    }

    fn failing_writer() -> MockRemoteWriter {
        let mut writer = MockRemoteWriter::new();
        writer
            .expect_url()
            .return_const("s3://job-logs/etl/load.log".to_string());
        writer
            .expect_upload()
            .returning(|_| Err(StorageError::S3Error("access denied".to_string())));
        writer
    }

    fn write_log(path: &Path, content: &str) -> LogLocator {
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, content).unwrap();
        let locator = LogLocator::new(Some(path.to_path_buf()), None);
        locator.captured.store(true, Ordering::SeqCst);
        locator
    }

    #[tokio::test]
    async fn test_empty_locator_runs_body_without_redirection() {
        let _lock = STREAM_LOCK.lock().await;
        let locator = LogLocator::empty();
        let before = stream_identity(1);
        let value = locator.redirect_stdouts(|| async { 42 }).await.unwrap();
        assert_eq!(value, 42);
        assert_eq!(before, stream_identity(1));
        assert_eq!(locator.upload().await, UploadOutcome::Skipped);
        assert!(locator.slice_last_stderr_like(&Regex::new("x").unwrap()).is_none());
    }

    #[tokio::test]
    async fn test_redirect_captures_output_and_restores_streams() {
        let _lock = STREAM_LOCK.lock().await;
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a/b/job.log");
        let locator = LogLocator::new(Some(path.clone()), None);

        let before = (stream_identity(1), stream_identity(2));
        let status = locator
            .redirect_stdouts(|| async {
                writeln!(io::stdout(), "line1").unwrap();
                writeln!(io::stderr(), "ERROR: disk full").unwrap();
                3
            })
            .await
            .unwrap();

        assert_eq!(status, 3);
        assert_eq!(before, (stream_identity(1), stream_identity(2)));
        let content = fs::read_to_string(&path).unwrap();
        let first = content.find("line1").unwrap();
        let second = content.find("ERROR: disk full").unwrap();
        assert!(first < second);
    }

    #[tokio::test]
    async fn test_streams_restored_when_body_panics() {
        let _lock = STREAM_LOCK.lock().await;
        let dir = tempfile::tempdir().unwrap();
        let locator = LogLocator::new(Some(dir.path().join("job.log")), None);

        let before = (stream_identity(1), stream_identity(2));
        let result = AssertUnwindSafe(locator.redirect_stdouts(|| async {
            panic!("job bug");
        }))
        .catch_unwind()
        .await;

        assert!(result.is_err());
        assert!(!redirect::is_redirected());
        assert_eq!(before, (stream_identity(1), stream_identity(2)));
    }

    #[tokio::test]
    async fn test_body_error_is_returned_and_streams_restored() {
        let _lock = STREAM_LOCK.lock().await;
        let dir = tempfile::tempdir().unwrap();
        let locator = LogLocator::new(Some(dir.path().join("job.log")), None);

        let before = stream_identity(2);
        let result: Result<(), String> = locator
            .redirect_stdouts(|| async { Err("failed".to_string()) })
            .await
            .unwrap();
        assert_eq!(result, Err("failed".to_string()));
        assert_eq!(before, stream_identity(2));
    }

    #[tokio::test]
    async fn test_upload_failure_keeps_file_and_does_not_raise() {
        let _lock = STREAM_LOCK.lock().await;
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("logs/job.log");
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(&path, "line1\n").unwrap();

        let locator = LogLocator::new(Some(path.clone()), Some(Arc::new(failing_writer())));
        assert_eq!(locator.upload().await, UploadOutcome::Failed);
        assert!(path.exists());
    }

    #[tokio::test]
    async fn test_upload_success_removes_file_and_empty_dirs() {
        let _lock = STREAM_LOCK.lock().await;
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("20240309/etl.load/job.log");
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(&path, "line1\n").unwrap();
        fs::write(dir.path().join("keep.txt"), "").unwrap();

        let mut writer = MockRemoteWriter::new();
        writer.expect_url().return_const("s3://job-logs/job.log".to_string());
        let expected = path.clone();
        writer
            .expect_upload()
            .withf(move |p| p.to_path_buf() == expected)
            .times(1)
            .returning(|_| Ok(()));

        let locator = LogLocator::new(Some(path.clone()), Some(Arc::new(writer)));
        assert_eq!(locator.upload().await, UploadOutcome::Uploaded);
        assert!(!path.exists());
        assert!(!dir.path().join("20240309").exists());
        assert!(dir.path().join("keep.txt").exists());
    }

    #[tokio::test]
    async fn test_upload_timeout_is_a_failure() {
        let _lock = STREAM_LOCK.lock().await;
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("job.log");
        fs::write(&path, "line1\n").unwrap();

        struct HangingWriter;
        #[async_trait::async_trait]
        impl RemoteWriter for HangingWriter {
            async fn upload(&self, _local_path: &Path) -> Result<(), StorageError> {
                futures::future::pending::<()>().await;
                Ok(())
            }
            fn url(&self) -> String {
                "s3://job-logs/job.log".to_string()
            }
        }

        let locator = LogLocator::new(Some(path.clone()), Some(Arc::new(HangingWriter)))
            .with_upload_timeout(Some(Duration::from_millis(50)));
        assert_eq!(locator.upload().await, UploadOutcome::Failed);
        assert!(path.exists());
    }

    #[tokio::test]
    async fn test_redirect_uploads_after_restoring() {
        let _lock = STREAM_LOCK.lock().await;
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("job.log");
        let locator = LogLocator::new(Some(path.clone()), Some(Arc::new(failing_writer())));

        locator
            .redirect_stdouts(|| async {
                writeln!(io::stdout(), "hello").unwrap();
            })
            .await
            .unwrap();

        let content = fs::read_to_string(&path).unwrap();
        assert!(content.contains("hello"));
        assert!(!content.contains("remote log upload failed"));
    }

    #[tokio::test]
    async fn test_upload_failure_warning_names_remote_location() {
        let _lock = STREAM_LOCK.lock().await;
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("job.log");
        fs::write(&path, "line1\n").unwrap();
        let locator = LogLocator::new(Some(path.clone()), Some(Arc::new(failing_writer())));

        let console = tempfile::NamedTempFile::new().unwrap();
        let guard = StdStreamRedirect::enter(console.as_file()).unwrap();
        let outcome = locator.upload().await;
        drop(guard);

        assert_eq!(outcome, UploadOutcome::Failed);
        let output = fs::read_to_string(console.path()).unwrap();
        assert!(output.contains("jobrun: remote log: s3://job-logs/etl/load.log"));
        assert!(output.contains(
            "warning: remote log upload failed: S3Error S3 error: access denied: s3://job-logs/etl/load.log"
        ));
        assert_eq!(output.matches("remote log upload failed").count(), 1);
    }

    #[tokio::test]
    async fn test_nested_redirect_keeps_outer_capture() {
        let _lock = STREAM_LOCK.lock().await;
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("job.log");
        let outer = LogLocator::new(Some(path.clone()), None);
        let inner = LogLocator::new(Some(path.clone()), None);

        let inner = &inner;
        let nested = outer
            .redirect_stdouts(move || async move {
                writeln!(io::stdout(), "outer line").unwrap();
                inner.redirect_stdouts(|| async {}).await
            })
            .await
            .unwrap();

        assert!(matches!(nested, Err(LogLocatorError::AlreadyRedirected)));
        assert!(!redirect::is_redirected());
        let content = fs::read_to_string(&path).unwrap();
        assert!(content.contains("outer line"));
    }

    #[tokio::test]
    async fn test_redirect_truncates_previous_run() {
        let _lock = STREAM_LOCK.lock().await;
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("job.log");
        fs::write(&path, "stale output from an earlier run\n").unwrap();
        let locator = LogLocator::new(Some(path.clone()), None);

        locator
            .redirect_stdouts(|| async {
                writeln!(io::stdout(), "fresh").unwrap();
            })
            .await
            .unwrap();

        let content = fs::read_to_string(&path).unwrap();
        assert!(content.starts_with("fresh"));
        assert!(!content.contains("stale"));
    }

    #[test]
    fn test_cleanup_stops_at_first_non_empty_dir() {
        let root = tempfile::tempdir().unwrap();
        let keep = root.path().join("keep");
        let leaf = keep.join("a/b");
        fs::create_dir_all(&leaf).unwrap();
        fs::write(keep.join("other.log"), "x").unwrap();

        assert_eq!(LogLocator::cleanup_local_dirs(&leaf), 2);
        assert!(!keep.join("a").exists());
        assert!(keep.exists());
        assert!(keep.join("other.log").exists());
    }

    #[test]
    fn test_cleanup_of_missing_dir_does_nothing() {
        let root = tempfile::tempdir().unwrap();
        assert_eq!(LogLocator::cleanup_local_dirs(&root.path().join("missing/dir")), 0);
        assert!(root.path().exists());
    }

    #[test]
    fn test_cleanup_stops_at_relative_markers() {
        assert_eq!(LogLocator::cleanup_local_dirs(Path::new(".")), 0);
        assert_eq!(LogLocator::cleanup_local_dirs(Path::new("")), 0);
        assert_eq!(LogLocator::cleanup_local_dirs(Path::new("/")), 0);
    }

    #[test]
    fn test_slice_last_returns_latest_match() {
        let dir = tempfile::tempdir().unwrap();
        let locator = write_log(
            &dir.path().join("job.log"),
            "ERROR: first attempt\nretrying\nERROR:  second attempt  \ndone\n",
        );
        let re = Regex::new(r"^ERROR:(.*)$").unwrap();
        assert_eq!(locator.slice_last_stderr_like(&re).as_deref(), Some("second attempt"));
    }

    #[test]
    fn test_slice_last_scans_past_undecodable_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("job.log");
        let locator = write_log(&path, "");
        let mut bytes = b"ERROR: first attempt\n".to_vec();
        bytes.extend_from_slice(b"bytes \xff\xfe from a binary\r\n");
        bytes.extend_from_slice(b"ERROR: disk full\r\n");
        fs::write(&path, bytes).unwrap();

        let re = Regex::new(r"^ERROR: (.*)$").unwrap();
        assert_eq!(locator.slice_last_stderr_like(&re).as_deref(), Some("disk full"));
    }

    #[test]
    fn test_slice_last_without_match_or_blank_match() {
        let dir = tempfile::tempdir().unwrap();
        let re = Regex::new(r"^ERROR:(.*)$").unwrap();

        let none = write_log(&dir.path().join("none.log"), "all good\n");
        assert_eq!(none.slice_last_stderr_like(&re), None);

        let blank = write_log(&dir.path().join("blank.log"), "ERROR:   \n");
        assert_eq!(blank.slice_last_stderr_like(&re), None);
    }

    #[test]
    fn test_slice_last_requires_captured_stream() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("job.log");
        fs::write(&path, "ERROR: stale\n").unwrap();
        let locator = LogLocator::new(Some(path), None);
        assert_eq!(locator.slice_last_stderr_like(&Regex::new("ERROR: (.*)").unwrap()), None);
    }
}
