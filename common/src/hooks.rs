// Lifecycle hooks fired around a single job execution
// Order is fixed: before-all-jobs → before-job → (job) → after-job → after-all-jobs

use crate::models::{JobRef, JobResult};
use serde::Serialize;

#[derive(Debug, Clone, Serialize)]
pub struct BeforeAllJobsEvent {
    pub jobnet_id: String,
    pub jobs: Vec<JobRef>,
}

#[derive(Debug, Clone, Serialize)]
pub struct BeforeJobEvent {
    pub job: JobRef,
}

#[derive(Debug, Clone, Serialize)]
pub struct AfterJobEvent {
    pub job: JobRef,
    pub result: JobResult,
}

#[derive(Debug, Clone, Serialize)]
pub struct AfterAllJobsEvent {
    pub succeeded: bool,
    pub jobs: Vec<JobRef>,
}

type Hook<E> = Box<dyn Fn(&E) -> anyhow::Result<()> + Send + Sync>;

/// Ordered callbacks per lifecycle stage.
///
/// Hooks are trusted extensions: the first error stops the stage and is
/// returned to the caller untouched.
#[derive(Default)]
pub struct HookRegistry {
    before_all_jobs: Vec<Hook<BeforeAllJobsEvent>>,
    before_job: Vec<Hook<BeforeJobEvent>>,
    after_job: Vec<Hook<AfterJobEvent>>,
    after_all_jobs: Vec<Hook<AfterAllJobsEvent>>,
}

impl HookRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_before_all_jobs<F>(&mut self, hook: F) -> &mut Self
    where
        F: Fn(&BeforeAllJobsEvent) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.before_all_jobs.push(Box::new(hook));
        self
    }

    pub fn on_before_job<F>(&mut self, hook: F) -> &mut Self
    where
        F: Fn(&BeforeJobEvent) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.before_job.push(Box::new(hook));
        self
    }

    pub fn on_after_job<F>(&mut self, hook: F) -> &mut Self
    where
        F: Fn(&AfterJobEvent) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.after_job.push(Box::new(hook));
        self
    }

    pub fn on_after_all_jobs<F>(&mut self, hook: F) -> &mut Self
    where
        F: Fn(&AfterAllJobsEvent) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.after_all_jobs.push(Box::new(hook));
        self
    }

    pub fn run_before_all_jobs_hooks(&self, event: &BeforeAllJobsEvent) -> anyhow::Result<()> {
        run_all(&self.before_all_jobs, event)
    }

    pub fn run_before_job_hooks(&self, event: &BeforeJobEvent) -> anyhow::Result<()> {
        run_all(&self.before_job, event)
    }

    pub fn run_after_job_hooks(&self, event: &AfterJobEvent) -> anyhow::Result<()> {
        run_all(&self.after_job, event)
    }

    pub fn run_after_all_jobs_hooks(&self, event: &AfterAllJobsEvent) -> anyhow::Result<()> {
        run_all(&self.after_all_jobs, event)
    }
}

fn run_all<E>(hooks: &[Hook<E>], event: &E) -> anyhow::Result<()> {
    for hook in hooks {
        hook(event)?;
    }
    Ok(())
}
