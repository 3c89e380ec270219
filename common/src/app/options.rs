// Global command line options

use crate::errors::OptionError;
use crate::loglocator::builder::RemoteLogSpec;
use crate::loglocator::LogFilePath;
use crate::substitution::parse_assignment;
use crate::APPLICATION_NAME;
use clap::error::ErrorKind;
use clap::{CommandFactory, Parser};
use std::ffi::OsString;
use std::path::PathBuf;

#[derive(Parser, Debug, Clone)]
#[command(
    name = APPLICATION_NAME,
    version,
    about = "Runs a single batch job with log capture and lifecycle hooks",
    override_usage = "jobrun [GLOBAL_OPTIONS] JOB_CLASS [JOB_OPTIONS]\n       jobrun [GLOBAL_OPTIONS] --job=JOB_FILE -- [JOB_OPTIONS]"
)]
pub struct GlobalOptions {
    /// Give job parameters via job file (JSON)
    #[arg(short = 'f', long = "job", value_name = "JOB_FILE")]
    pub job_file: Option<PathBuf>,

    /// Execution environment [default: development]
    #[arg(short = 'e', long, value_name = "NAME")]
    pub environment: Option<String>,

    /// Application home directory
    #[arg(short = 'C', long, value_name = "PATH")]
    pub home: Option<PathBuf>,

    /// Show the job script without executing it
    #[arg(short = 'n', long)]
    pub dry_run: bool,

    /// Show the execution plan without executing the job
    #[arg(short = 'E', long)]
    pub explain: bool,

    /// Log file directory; files are named %{std}.log
    #[arg(short = 'L', long, value_name = "PATH")]
    pub log_dir: Option<String>,

    /// Log file path template
    #[arg(long, value_name = "PATH")]
    pub log_path: Option<String>,

    /// Remote log destination (format: "STORE:KEY")
    #[arg(long, value_name = "STORE:KEY")]
    pub remote_log: Option<String>,

    /// List job class names
    #[arg(long)]
    pub list_job_class: bool,

    /// List global variables
    #[arg(long)]
    pub list_global_variables: bool,

    /// List all job variables
    #[arg(long)]
    pub list_variables: bool,

    /// List script variable declarations
    #[arg(long)]
    pub list_declarations: bool,

    /// Set a global variable (job-level -v goes after the job class)
    #[arg(short = 'v', long = "variable", value_name = "NAME=VALUE", value_parser = parse_variable)]
    pub variables: Vec<(String, String)>,

    /// Job class followed by job options
    #[arg(value_name = "JOB_CLASS", trailing_var_arg = true, allow_hyphen_values = true)]
    pub args: Vec<String>,
}

fn parse_variable(s: &str) -> Result<(String, String), String> {
    parse_assignment(s).ok_or_else(|| format!("expected NAME=VALUE, got '{}'", s))
}

/// Result of global option parsing
#[derive(Debug)]
pub enum ParsedOptions {
    Run(GlobalOptions),
    /// Help or version was printed
    Exit(i32),
}

impl GlobalOptions {
    pub fn parse_argv<I, T>(argv: I) -> Result<ParsedOptions, OptionError>
    where
        I: IntoIterator<Item = T>,
        T: Into<OsString> + Clone,
    {
        match Self::try_parse_from(argv) {
            Ok(opts) => Ok(ParsedOptions::Run(opts)),
            Err(e) => match e.kind() {
                ErrorKind::DisplayHelp | ErrorKind::DisplayVersion => {
                    let _ = e.print();
                    Ok(ParsedOptions::Exit(0))
                }
                _ => Err(OptionError::new(clap_error_message(&e), Self::help())),
            },
        }
    }

    pub fn help() -> String {
        Self::command().render_help().to_string()
    }

    pub fn file_mode(&self) -> bool {
        self.job_file.is_some()
    }

    /// Local log path format from `--log-path` or `--log-dir`
    pub fn log_path_format(&self) -> Result<Option<LogFilePath>, OptionError> {
        let format = match (&self.log_path, &self.log_dir) {
            (Some(path), _) => LogFilePath::new(path.clone()),
            (None, Some(dir)) => LogFilePath::in_dir(dir),
            (None, None) => return Ok(None),
        };
        format
            .map(Some)
            .map_err(|e| OptionError::new(e.to_string(), Self::help()))
    }

    pub fn remote_log_spec(&self) -> Result<Option<RemoteLogSpec>, OptionError> {
        self.remote_log
            .as_deref()
            .map(RemoteLogSpec::parse)
            .transpose()
            .map_err(|msg| OptionError::new(msg, Self::help()))
    }
}

/// First line of a clap error without its `error: ` prefix
pub(crate) fn clap_error_message(e: &clap::Error) -> String {
    let rendered = e.render().to_string();
    let first = rendered.lines().next().unwrap_or_default();
    first.strip_prefix("error: ").unwrap_or(first).trim().to_string()
}
