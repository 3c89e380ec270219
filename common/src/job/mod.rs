// Job abstraction, job class registry and job file loading

pub mod shell;

use crate::context::Context;
use crate::errors::{ApplicationError, JobError};
use crate::loglocator::LogLocator;
use crate::models::{Declaration, JobResult};
use async_trait::async_trait;
use clap::{Arg, ArgMatches};
use serde::Deserialize;
use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use tracing::{debug, instrument};

pub use shell::ShellJob;

/// Subsystem of jobs instantiated directly from a job class
pub const ADHOC_SUBSYSTEM: &str = "adhoc";

/// A compiled, executable unit of work
#[async_trait]
pub trait Job: Send + Sync {
    fn class_id(&self) -> &str;
    fn subsystem(&self) -> &str;
    fn id(&self) -> &str;

    /// Command line options this job class accepts after the job class name
    fn option_definitions(&self) -> Vec<Arg>;

    /// Apply parsed job options
    fn apply_options(&mut self, matches: &ArgMatches) -> Result<(), JobError>;

    /// Resolve variables and build the script
    fn compile(&mut self) -> Result<(), JobError>;

    fn declarations(&self) -> Vec<Declaration>;

    /// All resolved variables, sorted by name
    fn variables(&self) -> BTreeMap<String, String>;

    /// Compiled script as it would run
    fn script_source(&self) -> String;

    /// Print an execution plan without running the job
    async fn explain(&self) -> Result<(), JobError>;

    /// Run the job; output goes wherever `log_locator` points it
    async fn execute(&self, log_locator: &LogLocator) -> Result<JobResult, JobError>;
}

/// Everything a job class needs to construct a job
#[derive(Debug, Clone)]
pub struct JobDefinition {
    pub class_id: String,
    pub subsystem: String,
    pub id: String,
    pub params: serde_json::Value,
    pub global_variables: HashMap<String, String>,
}

pub type JobFactory = Box<dyn Fn(JobDefinition) -> Result<Box<dyn Job>, JobError> + Send + Sync>;

/// On-disk job file
#[derive(Debug, Deserialize)]
struct JobFile {
    class: String,
    #[serde(default)]
    subsystem: Option<String>,
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    params: serde_json::Value,
}

/// Maps job class ids to factories
pub struct JobClassRegistry {
    classes: BTreeMap<String, JobFactory>,
}

impl JobClassRegistry {
    pub fn new() -> Self {
        Self {
            classes: BTreeMap::new(),
        }
    }

    /// Registry with the built-in job classes
    pub fn with_builtin_classes() -> Self {
        let mut registry = Self::new();
        registry.register(shell::CLASS_ID, |def| Ok(Box::new(ShellJob::from_definition(def)?)));
        registry
    }

    pub fn register<F>(&mut self, class_id: &str, factory: F) -> &mut Self
    where
        F: Fn(JobDefinition) -> Result<Box<dyn Job>, JobError> + Send + Sync + 'static,
    {
        self.classes.insert(class_id.to_string(), Box::new(factory));
        self
    }

    pub fn class_ids(&self) -> impl Iterator<Item = &str> {
        self.classes.keys().map(String::as_str)
    }

    /// Job named on the command line: `JOB_CLASS [job options]`
    #[instrument(skip(self, ctx))]
    pub fn instantiate(&self, class_id: &str, ctx: &Context) -> Result<Box<dyn Job>, ApplicationError> {
        self.create(JobDefinition {
            class_id: class_id.to_string(),
            subsystem: ADHOC_SUBSYSTEM.to_string(),
            id: class_id.to_string(),
            params: serde_json::Value::Null,
            global_variables: ctx.global_variables().clone(),
        })
    }

    /// Job loaded from a JSON job file. Id defaults to the file stem and
    /// subsystem to the parent directory name.
    #[instrument(skip(self, path, ctx), fields(path = %path.display()))]
    pub fn load_file(&self, path: &Path, ctx: &Context) -> Result<Box<dyn Job>, ApplicationError> {
        let bad_file = |reason: String| ApplicationError::BadJobFile {
            path: path.display().to_string(),
            reason,
        };

        let content = std::fs::read_to_string(path).map_err(|e| bad_file(e.to_string()))?;
        let file: JobFile = serde_json::from_str(&content).map_err(|e| bad_file(e.to_string()))?;

        let id = match file.id {
            Some(id) => id,
            None => path
                .file_stem()
                .map(|s| s.to_string_lossy().into_owned())
                .ok_or_else(|| bad_file("cannot derive job id from file name".to_string()))?,
        };
        let subsystem = file
            .subsystem
            .or_else(|| {
                path.parent()
                    .and_then(Path::file_name)
                    .map(|s| s.to_string_lossy().into_owned())
            })
            .unwrap_or_else(|| ADHOC_SUBSYSTEM.to_string());

        debug!(class = %file.class, subsystem = %subsystem, id = %id, "Job file loaded");
        self.create(JobDefinition {
            class_id: file.class,
            subsystem,
            id,
            params: file.params,
            global_variables: ctx.global_variables().clone(),
        })
    }

    fn create(&self, def: JobDefinition) -> Result<Box<dyn Job>, ApplicationError> {
        let factory = self
            .classes
            .get(&def.class_id)
            .ok_or_else(|| ApplicationError::UnknownJobClass(def.class_id.clone()))?;
        Ok(factory(def)?)
    }
}

impl Default for JobClassRegistry {
    fn default() -> Self {
        Self::with_builtin_classes()
    }
}
