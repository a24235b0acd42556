use clap::Parser;
use tel_config::DEFAULT_CONFIG_PATH;

#[derive(Parser, Debug, Clone)]
#[command(name = "teld", about = "Telemetry gateway daemon")]
pub struct Cli {
    #[arg(
        long,
        default_value = DEFAULT_CONFIG_PATH,
        help = "Path to telegate.toml config file"
    )]
    pub config: String,
    #[arg(
        long = "log-level",
        help = "Log filter, e.g. `debug` or `tel_core=trace`; overrides TELD_LOG"
    )]
    pub log_level: Option<String>,
}

pub fn parse_cli() -> Cli {
    Cli::parse()
}
