// Error handling framework
// Three driver-level kinds (usage, application, internal) plus per-concern errors

use thiserror::Error;

/// Malformed or missing command line input.
///
/// Always rendered as `<program>: error: <message>` followed by the usage text.
#[derive(Error, Debug)]
#[error("{message}")]
pub struct OptionError {
    pub message: String,
    pub usage: String,
}

impl OptionError {
    pub fn new(message: impl Into<String>, usage: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            usage: usage.into(),
        }
    }
}

/// Expected, user-facing failure raised after the execution context exists
#[derive(Error, Debug)]
pub enum ApplicationError {
    #[error("{0}")]
    Message(String),

    #[error("bad job file {path}: {reason}")]
    BadJobFile { path: String, reason: String },

    #[error("unknown job class: {0}")]
    UnknownJobClass(String),

    #[error("unknown remote store: {0}")]
    UnknownRemoteStore(String),

    #[error("configuration error: {0}")]
    Configuration(String),

    #[error(transparent)]
    Template(#[from] TemplateError),

    #[error(transparent)]
    Job(#[from] JobError),

    #[error(transparent)]
    LogLocator(#[from] LogLocatorError),
}

/// Job loading, configuration and execution errors
#[derive(Error, Debug)]
pub enum JobError {
    #[error("{0}")]
    Parameter(String),

    #[error("{operation} is not supported by job class {class}")]
    Unsupported { class: String, operation: String },

    #[error(transparent)]
    Substitution(#[from] SubstitutionError),

    #[error("job execution failed: {0}")]
    ExecutionFailed(String),

    #[error(transparent)]
    LogLocator(#[from] LogLocatorError),
}

/// Remote log storage errors
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("S3 error: {0}")]
    S3Error(String),

    #[error("Filesystem error: {0}")]
    FileSystemError(String),

    #[error("Upload timed out after {0} seconds")]
    Timeout(u64),

    #[error("Invalid store configuration: {0}")]
    InvalidConfiguration(String),
}

impl StorageError {
    /// Short name of the failure class, used in upload warnings
    pub fn kind(&self) -> &'static str {
        match self {
            StorageError::S3Error(_) => "S3Error",
            StorageError::FileSystemError(_) => "FileSystemError",
            StorageError::Timeout(_) => "Timeout",
            StorageError::InvalidConfiguration(_) => "InvalidConfiguration",
        }
    }
}

/// Log path template errors
#[derive(Error, Debug)]
pub enum TemplateError {
    #[error("unknown placeholder %{{{placeholder}}} in log path template: {template}")]
    UnknownPlaceholder {
        placeholder: String,
        template: String,
    },

    #[error("empty log path template")]
    Empty,
}

/// Variable substitution errors
#[derive(Error, Debug)]
pub enum SubstitutionError {
    #[error("Undefined variable(s) in template: {variables:?}. Template: {template}")]
    UndefinedVariable {
        variables: Vec<String>,
        template: String,
    },

    #[error("Regex compilation error: {0}")]
    RegexError(String),
}

/// Failures setting up stream capture
#[derive(Error, Debug)]
pub enum LogLocatorError {
    #[error("could not create log directory {path}: {source}")]
    CreateDir {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("could not open log file {path}: {source}")]
    OpenFile {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("could not redirect standard streams: {0}")]
    Redirect(#[source] std::io::Error),

    #[error("standard streams are already redirected")]
    AlreadyRedirected,
}

/// Closed set of errors the driver distinguishes
#[derive(Error, Debug)]
pub enum RunError {
    #[error(transparent)]
    Option(#[from] OptionError),

    #[error(transparent)]
    Application(#[from] ApplicationError),

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl From<JobError> for RunError {
    fn from(err: JobError) -> Self {
        RunError::Application(ApplicationError::Job(err))
    }
}

impl From<TemplateError> for RunError {
    fn from(err: TemplateError) -> Self {
        RunError::Application(ApplicationError::Template(err))
    }
}

impl From<config::ConfigError> for ApplicationError {
    fn from(err: config::ConfigError) -> Self {
        ApplicationError::Configuration(err.to_string())
    }
}

impl From<std::io::Error> for StorageError {
    fn from(err: std::io::Error) -> Self {
        StorageError::FileSystemError(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_option_error_display_is_message_only() {
        let err = OptionError::new("no job class given", "Usage: jobrun ...");
        assert_eq!(err.to_string(), "no job class given");
        assert_eq!(err.usage, "Usage: jobrun ...");
    }

    #[test]
    fn test_storage_error_kind() {
        assert_eq!(StorageError::S3Error("denied".into()).kind(), "S3Error");
        assert_eq!(StorageError::Timeout(30).kind(), "Timeout");
        assert!(StorageError::Timeout(30).to_string().contains("30 seconds"));
    }

    #[test]
    fn test_template_error_names_placeholder() {
        let err = TemplateError::UnknownPlaceholder {
            placeholder: "bogus".to_string(),
            template: "%{bogus}.log".to_string(),
        };
        assert!(err.to_string().contains("%{bogus}"));
    }

    #[test]
    fn test_job_error_converts_to_application_run_error() {
        let err: RunError = JobError::ExecutionFailed("boom".into()).into();
        assert!(matches!(err, RunError::Application(ApplicationError::Job(_))));
    }
}
