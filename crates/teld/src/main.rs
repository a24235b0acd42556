mod cli;
mod config_io;
mod daemon;
mod runtime_spec;
mod sink_registry;

use tracing::error;
use tracing_subscriber::EnvFilter;

use crate::cli::parse_cli;
use crate::daemon::run_daemon;

const LOG_ENV: &str = "TELD_LOG";

#[tokio::main(flavor = "multi_thread")]
async fn main() {
    let cli = parse_cli();
    init_tracing(cli.log_level.as_deref());

    if let Err(err) = run_daemon(cli).await {
        error!(error = %err, "teld exited with error");
        eprintln!("{err:#}");
        std::process::exit(1);
    }
}

fn init_tracing(override_level: Option<&str>) {
    let filter = override_level
        .and_then(|level| EnvFilter::try_new(level).ok())
        .or_else(|| EnvFilter::try_from_env(LOG_ENV).ok())
        .or_else(|| EnvFilter::try_from_default_env().ok())
        .unwrap_or_else(|| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .try_init();
}
