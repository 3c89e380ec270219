// Built-in `shell` job class: runs one command line through a shell

use crate::errors::JobError;
use crate::job::{Job, JobDefinition};
use crate::loglocator::LogLocator;
use crate::models::{Declaration, JobResult};
use crate::substitution::{merge_variables, parse_assignment, VariableSubstitutor};
use async_trait::async_trait;
use clap::{Arg, ArgAction, ArgMatches};
use regex::Regex;
use serde::Deserialize;
use std::collections::{BTreeMap, HashMap};
use std::io::{self, Write};
use std::sync::OnceLock;
use tokio::process::Command;
use tracing::instrument;

pub const CLASS_ID: &str = "shell";
const DEFAULT_SHELL: &str = "/bin/sh";

fn error_line_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^\s*ERROR:\s*(.*)$").expect("error line regex is valid"))
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ShellParams {
    command: Option<String>,
    shell: Option<String>,
    variables: HashMap<String, String>,
}

pub struct ShellJob {
    subsystem: String,
    id: String,
    command: Option<String>,
    shell: String,
    job_variables: HashMap<String, String>,
    global_variables: HashMap<String, String>,
    compiled: Option<String>,
}

impl ShellJob {
    pub fn from_definition(def: JobDefinition) -> Result<Self, JobError> {
        let params: ShellParams = if def.params.is_null() {
            ShellParams::default()
        } else {
            serde_json::from_value(def.params)
                .map_err(|e| JobError::Parameter(format!("invalid shell job parameters: {}", e)))?
        };

        Ok(Self {
            subsystem: def.subsystem,
            id: def.id,
            command: params.command,
            shell: params.shell.unwrap_or_else(|| DEFAULT_SHELL.to_string()),
            job_variables: params.variables,
            global_variables: def.global_variables,
            compiled: None,
        })
    }

    fn merged_variables(&self) -> BTreeMap<String, String> {
        merge_variables(&self.global_variables, &self.job_variables)
    }

    fn substitutor() -> Result<VariableSubstitutor, JobError> {
        Ok(VariableSubstitutor::new()?)
    }
}

#[async_trait]
impl Job for ShellJob {
    fn class_id(&self) -> &str {
        CLASS_ID
    }

    fn subsystem(&self) -> &str {
        &self.subsystem
    }

    fn id(&self) -> &str {
        &self.id
    }

    fn option_definitions(&self) -> Vec<Arg> {
        vec![
            Arg::new("command")
                .long("command")
                .value_name("COMMAND")
                .help("Command line to run; ${NAME} refers to variables"),
            Arg::new("shell")
                .long("shell")
                .value_name("PATH")
                .help("Shell used to run the command [default: /bin/sh]"),
            Arg::new("variable")
                .short('v')
                .long("variable")
                .value_name("NAME=VALUE")
                .action(ArgAction::Append)
                .help("Set a job variable"),
        ]
    }

    fn apply_options(&mut self, matches: &ArgMatches) -> Result<(), JobError> {
        if let Some(command) = matches.get_one::<String>("command") {
            self.command = Some(command.clone());
        }
        if let Some(shell) = matches.get_one::<String>("shell") {
            self.shell = shell.clone();
        }
        if let Some(assignments) = matches.get_many::<String>("variable") {
            for assignment in assignments {
                let (name, value) = parse_assignment(assignment)
                    .ok_or_else(|| JobError::Parameter(format!("bad variable assignment: {}", assignment)))?;
                self.job_variables.insert(name, value);
            }
        }
        Ok(())
    }

    fn compile(&mut self) -> Result<(), JobError> {
        let command = self
            .command
            .as_deref()
            .ok_or_else(|| JobError::Parameter("shell: --command is required".to_string()))?;
        let variables: HashMap<String, String> = self.merged_variables().into_iter().collect();
        self.compiled = Some(Self::substitutor()?.substitute(command, &variables)?);
        Ok(())
    }

    fn declarations(&self) -> Vec<Declaration> {
        let Some(command) = self.command.as_deref() else {
            return Vec::new();
        };
        let Ok(substitutor) = Self::substitutor() else {
            return Vec::new();
        };
        substitutor
            .extract_variables(command)
            .into_iter()
            .map(|name| Declaration {
                default_value: self.job_variables.get(&name).cloned(),
                name,
            })
            .collect()
    }

    fn variables(&self) -> BTreeMap<String, String> {
        self.merged_variables()
    }

    fn script_source(&self) -> String {
        self.compiled.clone().unwrap_or_default()
    }

    async fn explain(&self) -> Result<(), JobError> {
        Err(JobError::Unsupported {
            class: CLASS_ID.to_string(),
            operation: "explain".to_string(),
        })
    }

    #[instrument(skip(self, log_locator), fields(subsystem = %self.subsystem, id = %self.id))]
    async fn execute(&self, log_locator: &LogLocator) -> Result<JobResult, JobError> {
        let script = self
            .compiled
            .clone()
            .ok_or_else(|| JobError::ExecutionFailed("job is not compiled".to_string()))?;

        let result = log_locator
            .redirect_stdouts(|| async {
                // The child inherits fd 1 / fd 2, so its output follows the redirection
                match Command::new(&self.shell).arg("-c").arg(&script).status().await {
                    Ok(status) if status.success() => JobResult::success(),
                    Ok(status) => match status.code() {
                        Some(code) => JobResult::failure(
                            code,
                            log_locator.slice_last_stderr_like(error_line_regex()),
                        ),
                        None => JobResult::error(format!("command terminated by signal: {}", status)),
                    },
                    Err(e) => {
                        let _ = writeln!(io::stderr(), "{}: could not run {}: {}", CLASS_ID, self.shell, e);
                        JobResult::error(format!("could not run {}: {}", self.shell, e))
                    }
                }
            })
            .await?;

        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Command as ClapCommand;
    use serde_json::json;

    fn definition(params: serde_json::Value) -> JobDefinition {
        JobDefinition {
            class_id: CLASS_ID.to_string(),
            subsystem: "etl".to_string(),
            id: "load".to_string(),
            params,
            global_variables: HashMap::from([
                ("TABLE".to_string(), "users".to_string()),
                ("SCHEMA".to_string(), "public".to_string()),
            ]),
        }
    }

    fn parse_options(job: &mut ShellJob, args: &[&str]) {
        let matches = ClapCommand::new("shell")
            .no_binary_name(true)
            .args(job.option_definitions())
            .try_get_matches_from(args)
            .unwrap();
        job.apply_options(&matches).unwrap();
    }

    #[test]
    fn test_compile_substitutes_job_over_global_variables() {
        let mut job = ShellJob::from_definition(definition(json!({
            "command": "vacuum ${SCHEMA}.${TABLE}",
            "variables": {"TABLE": "orders"}
        })))
        .unwrap();
        job.compile().unwrap();
        assert_eq!(job.script_source(), "vacuum public.orders");
    }

    #[test]
    fn test_options_override_file_params() {
        let mut job = ShellJob::from_definition(definition(serde_json::Value::Null)).unwrap();
        parse_options(&mut job, &["--command", "echo ${DATE}", "-v", "DATE=2024-01-01"]);
        job.compile().unwrap();
        assert_eq!(job.script_source(), "echo 2024-01-01");
        assert_eq!(job.variables()["DATE"], "2024-01-01");
    }

    #[test]
    fn test_missing_command_is_parameter_error() {
        let mut job = ShellJob::from_definition(definition(serde_json::Value::Null)).unwrap();
        assert!(matches!(job.compile(), Err(JobError::Parameter(_))));
    }

    #[test]
    fn test_undefined_variable_fails_compile() {
        let mut job = ShellJob::from_definition(definition(json!({"command": "echo ${MISSING}"}))).unwrap();
        assert!(matches!(job.compile(), Err(JobError::Substitution(_))));
    }

    #[test]
    fn test_declarations_carry_job_defaults() {
        let job = ShellJob::from_definition(definition(json!({
            "command": "load ${TABLE} ${DATE}",
            "variables": {"DATE": "today"}
        })))
        .unwrap();
        let decls = job.declarations();
        assert_eq!(decls.len(), 2);
        assert_eq!(decls[0].name, "TABLE");
        assert_eq!(decls[0].default_value, None);
        assert_eq!(decls[1].default_value.as_deref(), Some("today"));
    }

    #[test]
    fn test_bad_params_are_rejected() {
        let result = ShellJob::from_definition(definition(json!({"command": 42})));
        assert!(matches!(result, Err(JobError::Parameter(_))));
    }

    #[tokio::test]
    async fn test_explain_is_unsupported() {
        let job = ShellJob::from_definition(definition(serde_json::Value::Null)).unwrap();
        assert!(matches!(job.explain().await, Err(JobError::Unsupported { .. })));
    }

    #[tokio::test]
    async fn test_execute_without_log_reports_exit_status() {
        let mut job = ShellJob::from_definition(definition(json!({"command": "exit 7"}))).unwrap();
        job.compile().unwrap();
        let result = job.execute(&LogLocator::empty()).await.unwrap();
        assert!(!result.success);
        assert_eq!(result.status, 7);
        assert_eq!(result.message, None);
    }

    #[tokio::test]
    async fn test_execute_scrapes_last_error_line() {
        let _lock = crate::loglocator::tests::STREAM_LOCK.lock().await;
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("job.log");
        let mut job = ShellJob::from_definition(definition(json!({
            "command": "echo 'ERROR: first'; echo 'ERROR: disk full' >&2; exit 3"
        })))
        .unwrap();
        job.compile().unwrap();

        let locator = LogLocator::new(Some(path.clone()), None);
        let result = job.execute(&locator).await.unwrap();
        assert_eq!(result.status, 3);
        assert_eq!(result.message.as_deref(), Some("disk full"));
        assert!(std::fs::read_to_string(&path).unwrap().contains("ERROR: first"));
    }

    #[tokio::test]
    async fn test_execute_missing_shell_is_error_result() {
        let mut job = ShellJob::from_definition(definition(json!({
            "command": "true",
            "shell": "/nonexistent/shell"
        })))
        .unwrap();
        job.compile().unwrap();
        let result = job.execute(&LogLocator::empty()).await.unwrap();
        assert_eq!(result.status, crate::models::STATUS_ERROR);
    }
}
