// jobrun binary entry point

use anyhow::Result;
use common::app::{set_debug, Application};

const DEBUG_ENV_VAR: &str = "JOBRUN_DEBUG";

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    set_debug(matches!(std::env::var(DEBUG_ENV_VAR), Ok(v) if !v.is_empty() && v != "0"));

    let status = Application::new()
        .with_telemetry()
        .run(std::env::args_os())
        .await?;

    std::process::exit(status);
}
