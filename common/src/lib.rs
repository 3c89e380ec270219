// Single-job execution driver: log capture, remote log shipping and lifecycle hooks

pub mod app;
pub mod config;
pub mod context;
pub mod errors;
pub mod hooks;
pub mod job;
pub mod loglocator;
pub mod models;
pub mod storage;
pub mod substitution;
pub mod telemetry;

pub const APPLICATION_NAME: &str = "jobrun";
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
