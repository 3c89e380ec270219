// Shared value types: job identity and job results

use serde::{Deserialize, Serialize};
use std::fmt;

pub const STATUS_SUCCESS: i32 = 0;
pub const STATUS_FAILURE: i32 = 1;
pub const STATUS_ERROR: i32 = 2;

/// Run-attempt token used when a job runs outside of a job network
pub const SINGLE_RUN_TOKEN: &str = "-";

/// Reference to a job inside a (possibly implicit) job network
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobRef {
    pub subsystem: String,
    pub name: String,
    pub location: String,
}

impl JobRef {
    pub fn new(subsystem: impl Into<String>, name: impl Into<String>, location: impl Into<String>) -> Self {
        Self {
            subsystem: subsystem.into(),
            name: name.into(),
            location: location.into(),
        }
    }

    /// Job network id of a network containing only this job
    pub fn single_jobnet_id(&self) -> String {
        format!("{}/{}", self.subsystem, self.name)
    }
}

impl fmt::Display for JobRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.subsystem, self.name)
    }
}

/// Outcome of one job execution. The job alone decides the status code.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobResult {
    pub success: bool,
    pub status: i32,
    pub message: Option<String>,
}

impl JobResult {
    pub fn success() -> Self {
        Self {
            success: true,
            status: STATUS_SUCCESS,
            message: None,
        }
    }

    /// The job ran and reported failure with its own status code
    pub fn failure(status: i32, message: Option<String>) -> Self {
        Self {
            success: false,
            status: if status == STATUS_SUCCESS { STATUS_FAILURE } else { status },
            message,
        }
    }

    /// The job could not run to completion
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            success: false,
            status: STATUS_ERROR,
            message: Some(message.into()),
        }
    }
}

/// Script variable declaration, listed by `--list-declarations`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Declaration {
    pub name: String,
    pub default_value: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_failure_never_reports_success_status() {
        let result = JobResult::failure(0, None);
        assert!(!result.success);
        assert_eq!(result.status, STATUS_FAILURE);
    }

    #[test]
    fn test_failure_keeps_job_status() {
        let result = JobResult::failure(3, Some("disk full".into()));
        assert_eq!(result.status, 3);
        assert_eq!(result.message.as_deref(), Some("disk full"));
    }

    #[test]
    fn test_job_ref_jobnet_id() {
        let job_ref = JobRef::new("etl", "load_users", SINGLE_RUN_TOKEN);
        assert_eq!(job_ref.single_jobnet_id(), "etl/load_users");
        assert_eq!(job_ref.to_string(), "etl/load_users");
    }
}
