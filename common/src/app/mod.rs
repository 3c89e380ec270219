// Lifecycle driver: runs exactly one job under the fixed hook sequence
// before-all-jobs → before-job → execute → after-job → after-all-jobs

pub mod options;

pub use options::{GlobalOptions, ParsedOptions};

use crate::context::{Context, JobExecutionContext};
use crate::errors::{ApplicationError, JobError, OptionError, RunError};
use crate::hooks::{AfterAllJobsEvent, AfterJobEvent, BeforeAllJobsEvent, BeforeJobEvent, HookRegistry};
use crate::job::{Job, JobClassRegistry};
use crate::loglocator::LogLocatorBuilder;
use crate::models::{Declaration, JobRef, SINGLE_RUN_TOKEN};
use crate::storage::{RemoteWriterFactory, S3WriterFactory};
use crate::{telemetry, APPLICATION_NAME, VERSION};
use chrono::{DateTime, Local};
use clap::error::ErrorKind;
use clap::{Arg, ArgAction};
use std::ffi::OsString;
use std::io::{self, Write};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tracing::{info, info_span, Instrument};

static DEBUG: AtomicBool = AtomicBool::new(false);

/// Process-wide debug switch: usage and application errors propagate with
/// full detail instead of being printed as one line.
pub fn set_debug(enabled: bool) {
    DEBUG.store(enabled, Ordering::SeqCst);
}

pub fn debug_enabled() -> bool {
    DEBUG.load(Ordering::SeqCst)
}

const EXTRA_ARGS: &str = "__extra_args";

pub struct Application {
    hooks: HookRegistry,
    job_classes: JobClassRegistry,
    writers: Option<Arc<dyn RemoteWriterFactory>>,
    start_time: DateTime<Local>,
    install_telemetry: bool,
}

impl Default for Application {
    fn default() -> Self {
        Self::new()
    }
}

impl Application {
    pub fn new() -> Self {
        Self {
            hooks: HookRegistry::new(),
            job_classes: JobClassRegistry::with_builtin_classes(),
            writers: None,
            start_time: Local::now(),
            install_telemetry: false,
        }
    }

    pub fn with_hooks(mut self, hooks: HookRegistry) -> Self {
        self.hooks = hooks;
        self
    }

    pub fn with_job_classes(mut self, job_classes: JobClassRegistry) -> Self {
        self.job_classes = job_classes;
        self
    }

    /// Replace the settings-driven S3 writer factory
    pub fn with_remote_writers(mut self, writers: Arc<dyn RemoteWriterFactory>) -> Self {
        self.writers = Some(writers);
        self
    }

    /// Install the tracing subscriber once the context is known
    pub fn with_telemetry(mut self) -> Self {
        self.install_telemetry = true;
        self
    }

    /// Run one job and return the process exit code.
    ///
    /// Usage and application errors are reported here and mapped to exit
    /// code 1. Everything else (hook failures included) is returned as an
    /// error for the process boundary to report.
    pub async fn run<I, T>(&self, argv: I) -> anyhow::Result<i32>
    where
        I: IntoIterator<Item = T>,
        T: Into<OsString> + Clone,
    {
        let argv: Vec<OsString> = argv.into_iter().map(Into::into).collect();
        let program = program_name(argv.first());

        match self.run_job(argv).await {
            Ok(status) => Ok(status),
            Err(RunError::Option(e)) => {
                if debug_enabled() {
                    return Err(e.into());
                }
                let mut stderr = io::stderr().lock();
                let _ = writeln!(stderr, "{}: error: {}", program, e.message);
                let _ = writeln!(stderr, "{}", e.usage);
                Ok(1)
            }
            Err(RunError::Application(e)) => {
                if debug_enabled() {
                    return Err(e.into());
                }
                let _ = writeln!(io::stderr(), "{}: error: {}", program, e);
                Ok(1)
            }
            Err(RunError::Internal(e)) => Err(e),
        }
    }

    async fn run_job(&self, argv: Vec<OsString>) -> Result<i32, RunError> {
        let opts = match GlobalOptions::parse_argv(argv)? {
            ParsedOptions::Run(opts) => opts,
            ParsedOptions::Exit(code) => return Ok(code),
        };
        if opts.list_job_class {
            for class_id in self.job_classes.class_ids() {
                println!("{}", class_id);
            }
            return Ok(0);
        }
        let path_format = opts.log_path_format()?;
        let remote = opts.remote_log_spec()?;

        let ctx = Context::for_application(
            opts.home.as_deref(),
            opts.environment.as_deref(),
            &opts.variables,
            self.start_time,
        )?;
        if self.install_telemetry {
            let logging = &ctx.settings().logging;
            telemetry::init_logging(&logging.level, logging.json)?;
        }
        if opts.list_global_variables {
            let mut vars: Vec<_> = ctx.global_variables().iter().collect();
            vars.sort();
            list_variables(vars);
            return Ok(0);
        }

        let mut job = self.load_job(&ctx, &opts)?;
        if let Some(code) = self.process_job_options(job.as_mut(), &opts)? {
            return Ok(code);
        }
        job.compile()?;

        if opts.list_declarations {
            list_declarations(&job.declarations());
            return Ok(0);
        }
        if opts.list_variables {
            list_variables(job.variables().iter());
            return Ok(0);
        }
        if opts.dry_run {
            println!("{}", job.script_source());
            return Ok(0);
        }
        if opts.explain {
            job.explain().await?;
            return Ok(0);
        }

        let writers = match &self.writers {
            Some(writers) => writers.clone(),
            None => Arc::new(S3WriterFactory::new(ctx.settings())),
        };
        let builder = LogLocatorBuilder::for_options(&ctx, path_format, remote, writers)?;

        let job_ctx = JobExecutionContext::new(&ctx, job.subsystem(), job.id());
        let span = info_span!(
            "job_run",
            run_id = %job_ctx.run_id,
            environment = %job_ctx.environment,
            subsystem = %job_ctx.subsystem,
            job_id = %job_ctx.job_id
        );
        self.execute_lifecycle(job.as_ref(), &job_ctx, &builder)
            .instrument(span)
            .await
    }

    async fn execute_lifecycle(
        &self,
        job: &dyn Job,
        job_ctx: &JobExecutionContext,
        builder: &LogLocatorBuilder,
    ) -> Result<i32, RunError> {
        let job_ref = JobRef::new(&job_ctx.subsystem, &job_ctx.job_id, SINGLE_RUN_TOKEN);
        let jobnet_id = job_ref.single_jobnet_id();
        // A lone job is its own job network, so both start times coincide
        let log_locator = builder.build(&job_ref, &jobnet_id, job_ctx.start_time, job_ctx.start_time)?;

        self.hooks.run_before_all_jobs_hooks(&BeforeAllJobsEvent {
            jobnet_id: jobnet_id.clone(),
            jobs: vec![job_ref.clone()],
        })?;
        self.hooks.run_before_job_hooks(&BeforeJobEvent { job: job_ref.clone() })?;

        info!(log_path = ?log_locator.path(), "Executing job");
        let started = Instant::now();
        let result = job.execute(&log_locator).await?;
        telemetry::record_job_run(
            &job_ctx.subsystem,
            &job_ctx.job_id,
            result.status,
            started.elapsed().as_secs_f64(),
        );
        info!(success = result.success, status = result.status, "Job finished");

        self.hooks.run_after_job_hooks(&AfterJobEvent {
            job: job_ref.clone(),
            result: result.clone(),
        })?;
        self.hooks.run_after_all_jobs_hooks(&AfterAllJobsEvent {
            succeeded: result.success,
            jobs: vec![job_ref],
        })?;

        Ok(result.status)
    }

    fn load_job(&self, ctx: &Context, opts: &GlobalOptions) -> Result<Box<dyn Job>, RunError> {
        let loaded = match &opts.job_file {
            Some(path) => self.job_classes.load_file(path, ctx),
            None => {
                let class_id = opts
                    .args
                    .first()
                    .ok_or_else(|| OptionError::new("no job class given", GlobalOptions::help()))?;
                self.job_classes.instantiate(class_id, ctx)
            }
        };
        loaded.map_err(|e| match e {
            ApplicationError::Job(JobError::Parameter(message)) => {
                RunError::Option(OptionError::new(message, GlobalOptions::help()))
            }
            other => RunError::Application(other),
        })
    }

    /// Parse the job's own options. Returns an exit code when help or
    /// version was requested.
    fn process_job_options(&self, job: &mut dyn Job, opts: &GlobalOptions) -> Result<Option<i32>, RunError> {
        let job_args: &[String] = if opts.file_mode() {
            &opts.args
        } else {
            opts.args.get(1..).unwrap_or_default()
        };

        let mut parser = clap::Command::new(format!("{} {}", APPLICATION_NAME, job.class_id()))
            .no_binary_name(true)
            .version(VERSION)
            .override_usage(format!("{} {} [JOB_CLASS_OPTIONS]", APPLICATION_NAME, job.class_id()))
            .args(job.option_definitions())
            .arg(Arg::new(EXTRA_ARGS).action(ArgAction::Append).hide(true));
        let usage = parser.render_help().to_string();

        let matches = match parser.try_get_matches_from_mut(job_args) {
            Ok(matches) => matches,
            Err(e) => match e.kind() {
                ErrorKind::DisplayHelp | ErrorKind::DisplayVersion => {
                    let _ = e.print();
                    return Ok(Some(0));
                }
                _ => return Err(OptionError::new(options::clap_error_message(&e), usage).into()),
            },
        };

        if let Some(first) = matches.get_many::<String>(EXTRA_ARGS).and_then(|mut extra| extra.next()) {
            let message = if opts.file_mode() {
                "--job and job class argument are exclusive".to_string()
            } else {
                format!("bad argument: {}", first)
            };
            return Err(OptionError::new(message, usage).into());
        }

        job.apply_options(&matches).map_err(|e| match e {
            JobError::Parameter(message) => RunError::Option(OptionError::new(message, usage)),
            other => other.into(),
        })?;
        Ok(None)
    }
}

fn program_name(argv0: Option<&OsString>) -> String {
    argv0
        .and_then(|arg| Path::new(arg).file_stem())
        .map(|stem| stem.to_string_lossy().into_owned())
        .filter(|name| !name.is_empty())
        .unwrap_or_else(|| APPLICATION_NAME.to_string())
}

fn list_variables<'a>(vars: impl IntoIterator<Item = (&'a String, &'a String)>) {
    for (name, value) in vars {
        println!("{}={:?}", name, value);
    }
}

fn list_declarations(decls: &[Declaration]) {
    for decl in decls {
        match &decl.default_value {
            Some(value) => println!("{}\t= {:?}", decl.name, value),
            None => println!("{}", decl.name),
        }
    }
}
