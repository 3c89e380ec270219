// Execution context: resolved home, environment, settings and global variables

use crate::config::{Settings, DEFAULT_ENV};
use crate::errors::ApplicationError;
use chrono::{DateTime, Local};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tracing::debug;
use uuid::Uuid;

pub const HOME_ENV_VAR: &str = "JOBRUN_HOME";
pub const ENVIRONMENT_ENV_VAR: &str = "JOBRUN_ENV";

/// Application-level context, created once per process
#[derive(Debug, Clone)]
pub struct Context {
    home: PathBuf,
    environment: String,
    settings: Settings,
    global_variables: HashMap<String, String>,
    start_time: DateTime<Local>,
}

impl Context {
    /// Resolve home and environment, load settings, and merge global variables
    /// (command line assignments override configured ones).
    pub fn for_application(
        home: Option<&Path>,
        environment: Option<&str>,
        cli_variables: &[(String, String)],
        start_time: DateTime<Local>,
    ) -> Result<Self, ApplicationError> {
        let home = match home {
            Some(path) => path.to_path_buf(),
            None => match std::env::var_os(HOME_ENV_VAR) {
                Some(path) => PathBuf::from(path),
                None => std::env::current_dir().map_err(|e| {
                    ApplicationError::Message(format!("could not resolve home directory: {}", e))
                })?,
            },
        };
        let environment = environment
            .map(str::to_string)
            .or_else(|| std::env::var(ENVIRONMENT_ENV_VAR).ok())
            .filter(|env| !env.is_empty())
            .unwrap_or_else(|| DEFAULT_ENV.to_string());

        let settings = Settings::load(&home, &environment)?;
        settings.validate().map_err(ApplicationError::Configuration)?;

        let mut global_variables = settings.variables.clone();
        global_variables.extend(cli_variables.iter().cloned());

        debug!(home = %home.display(), environment = %environment, "Context resolved");

        Ok(Self {
            home,
            environment,
            settings,
            global_variables,
            start_time,
        })
    }

    pub fn home(&self) -> &Path {
        &self.home
    }

    pub fn environment(&self) -> &str {
        &self.environment
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn global_variables(&self) -> &HashMap<String, String> {
        &self.global_variables
    }

    pub fn start_time(&self) -> DateTime<Local> {
        self.start_time
    }
}

/// Immutable snapshot of the single job this process runs
#[derive(Debug, Clone)]
pub struct JobExecutionContext {
    pub run_id: Uuid,
    pub start_time: DateTime<Local>,
    pub environment: String,
    pub subsystem: String,
    pub job_id: String,
}

impl JobExecutionContext {
    pub fn new(ctx: &Context, subsystem: &str, job_id: &str) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            start_time: ctx.start_time(),
            environment: ctx.environment().to_string(),
            subsystem: subsystem.to_string(),
            job_id: job_id.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn test_cli_variables_override_configured_ones() {
        let home = tempfile::tempdir().unwrap();
        fs::create_dir_all(home.path().join("config")).unwrap();
        fs::write(
            home.path().join("config/default.toml"),
            "[variables]\ndate = \"2024-01-01\"\nregion = \"eu\"\n",
        )
        .unwrap();

        let ctx = Context::for_application(
            Some(home.path()),
            Some("test"),
            &[("date".to_string(), "2024-02-02".to_string())],
            Local::now(),
        )
        .unwrap();

        assert_eq!(ctx.environment(), "test");
        assert_eq!(ctx.global_variables()["date"], "2024-02-02");
        assert_eq!(ctx.global_variables()["region"], "eu");
    }

    #[test]
    fn test_job_execution_context_shares_start_time() {
        let home = tempfile::tempdir().unwrap();
        let ctx = Context::for_application(Some(home.path()), Some("test"), &[], Local::now()).unwrap();
        let job_ctx = JobExecutionContext::new(&ctx, "etl", "load");
        assert_eq!(job_ctx.start_time, ctx.start_time());
        assert_eq!(job_ctx.environment, "test");
        assert_eq!(job_ctx.job_id, "load");
    }

    #[test]
    fn test_invalid_store_configuration_is_application_error() {
        let home = tempfile::tempdir().unwrap();
        fs::create_dir_all(home.path().join("config")).unwrap();
        fs::write(
            home.path().join("config/default.toml"),
            "[remote_stores.logs]\nendpoint = \"\"\nbucket = \"b\"\n",
        )
        .unwrap();

        let err = Context::for_application(Some(home.path()), Some("test"), &[], Local::now()).unwrap_err();
        assert!(matches!(err, ApplicationError::Configuration(_)));
    }
}
