use anyhow::{Context, Result};
use tel_config::{ConfigPaths, GatewayConfig};

pub(crate) async fn load_config(config_path: &str) -> Result<(GatewayConfig, ConfigPaths)> {
    let path = config_path.to_string();
    tokio::task::spawn_blocking(move || {
        tel_config::load(&path).with_context(|| format!("failed to load config {path}"))
    })
    .await
    .context("failed to join config load task")?
}
