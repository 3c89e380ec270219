// Telemetry module for structured logging and metrics

use anyhow::Result;
use metrics::{counter, describe_counter, describe_histogram, histogram};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

/// Initialize diagnostic logging on standard error
///
/// `RUST_LOG` takes precedence over the configured level. Must be called
/// outside of any stream redirection, otherwise the subscriber would write
/// into the job's log file.
#[tracing::instrument(skip_all)]
pub fn init_logging(log_level: &str, json: bool) -> Result<()> {
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(log_level))
        .map_err(|e| anyhow::anyhow!("Failed to create env filter: {}", e))?;

    let layer = if json {
        fmt::layer()
            .json()
            .with_current_span(true)
            .with_target(true)
            .with_writer(std::io::stderr)
            .with_filter(env_filter)
            .boxed()
    } else {
        fmt::layer()
            .with_target(false)
            .with_writer(std::io::stderr)
            .with_filter(env_filter)
            .boxed()
    };

    tracing_subscriber::registry()
        .with(layer)
        .try_init()
        .map_err(|e| anyhow::anyhow!("Failed to initialize tracing subscriber: {}", e))?;

    describe_metrics();

    tracing::debug!(log_level = log_level, json = json, "Logging initialized");
    Ok(())
}

fn describe_metrics() {
    describe_counter!("job_runs_total", "Total number of job runs by result status");
    describe_histogram!("job_duration_seconds", "Duration of job executions in seconds");
    describe_counter!("log_upload_total", "Remote log uploads by outcome");
}

/// Record a finished job run
#[inline]
pub fn record_job_run(subsystem: &str, job_id: &str, status: i32, duration_seconds: f64) {
    counter!(
        "job_runs_total",
        "job" => format!("{}/{}", subsystem, job_id),
        "status" => status.to_string()
    )
    .increment(1);
    histogram!("job_duration_seconds", "job" => format!("{}/{}", subsystem, job_id))
        .record(duration_seconds);
}

/// Record the outcome of a remote log upload
#[inline]
pub fn record_log_upload(outcome: &'static str) {
    counter!("log_upload_total", "outcome" => outcome).increment(1);
}
