use std::future::Future;
use std::sync::Arc;

use anyhow::{Context, Result};
use tel_config::GatewayConfig;
use tel_core::{Distributor, SinkContext, Supervisor, SupervisorOptions};
use tel_opcua::OpcUaDriver;
use tel_protocol::SourceDriver;
use tel_sim::SimulatedSource;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::cli::Cli;
use crate::config_io::load_config;
use crate::runtime_spec::{build_runtime_spec, DriverKind};
use crate::sink_registry::build_sink;

pub async fn run_daemon(cli: Cli) -> Result<()> {
    let (cfg, paths) = load_config(&cli.config).await?;
    let spec = build_runtime_spec(&cfg, &paths)?;
    info!(
        config = %paths.config_path().display(),
        driver = spec.driver.as_str(),
        url = %spec.supervisor.url,
        nodes = spec.supervisor.subscription.node_ids.len(),
        "teld starting"
    );

    let options = spec.supervisor;
    match spec.driver {
        DriverKind::OpcUa => {
            let driver = OpcUaDriver::new(options.application_name.clone());
            run_gateway(driver, options, &cfg, wait_for_ctrl_c()).await
        }
        DriverKind::Simulated => {
            run_gateway(SimulatedSource::new(), options, &cfg, wait_for_ctrl_c()).await
        }
    }
}

async fn wait_for_ctrl_c() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        warn!(error = %err, "failed to wait ctrl-c, running until the supervisor stops");
        std::future::pending::<()>().await;
    }
    info!("received ctrl-c, shutting down");
}

/// Builds and initializes the exporters, then supervises the source until
/// `stop` resolves or the retry budget runs out. The distributor is shut
/// down on every exit path once it has been initialized.
pub(crate) async fn run_gateway<D, F>(
    driver: D,
    options: SupervisorOptions,
    cfg: &GatewayConfig,
    stop: F,
) -> Result<()>
where
    D: SourceDriver,
    F: Future<Output = ()>,
{
    let shutdown = CancellationToken::new();
    let distributor = Arc::new(start_distributor(cfg, &options.url, &shutdown).await?);

    let supervisor = Supervisor::new(driver, options, Arc::clone(&distributor));
    let run = supervisor.run(shutdown.clone());
    tokio::pin!(run);

    let outcome = tokio::select! {
        result = &mut run => result,
        _ = stop => {
            shutdown.cancel();
            run.await
        }
    };

    distributor.shutdown().await;
    outcome.context("supervisor terminated")?;
    info!("teld stopped");
    Ok(())
}

async fn start_distributor(
    cfg: &GatewayConfig,
    source_url: &str,
    shutdown: &CancellationToken,
) -> Result<Distributor> {
    let keys = cfg.exporters.selected_keys();
    let distributor = Distributor::from_selection(
        source_url,
        SinkContext::new(shutdown.clone()),
        &keys,
        |key| build_sink(key, &cfg.exporters),
    )
    .context("failed to build exporters")?;
    if distributor.keys().is_empty() {
        warn!("no exporters configured, events will be dropped");
    }
    distributor
        .initialize()
        .await
        .context("failed to initialize exporters")?;
    info!(sinks = ?distributor.keys(), "exporters initialized");
    Ok(distributor)
}
