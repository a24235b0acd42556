use tel_config::{
    ConfigError, ExportersConfig, TimescaleExporterConfig, WebsocketExporterConfig,
    TIMESCALE_EXPORTER, WEBSOCKET_EXPORTER,
};
use tel_core::{Sink, SinkError};
use tel_hub::{BroadcastHub, HubConfig};
use tel_store::{StoreConfig, TimescaleSink};

/// Maps an `[exporters]` key to its sink. Unknown keys yield `None` and are
/// skipped by the distributor.
pub(crate) fn build_sink(
    key: &str,
    exporters: &ExportersConfig,
) -> Result<Option<Box<dyn Sink>>, SinkError> {
    match key {
        WEBSOCKET_EXPORTER => match &exporters.websocket {
            Some(cfg) => Ok(Some(Box::new(BroadcastHub::new(hub_config(cfg)?)))),
            None => Ok(None),
        },
        TIMESCALE_EXPORTER => match &exporters.timescale {
            Some(cfg) => Ok(Some(Box::new(TimescaleSink::new(store_config(cfg))))),
            None => Ok(None),
        },
        _ => Ok(None),
    }
}

fn hub_config(cfg: &WebsocketExporterConfig) -> Result<HubConfig, SinkError> {
    let setup = |err: ConfigError| SinkError::Setup(err.to_string());
    Ok(HubConfig {
        addr: cfg.addr.clone(),
        endpoint: cfg.endpoint.clone(),
        username: cfg.username.clone(),
        password: cfg.password.clone(),
        pong_wait: cfg.pong_wait_duration().map_err(setup)?,
        auth_grace: cfg.auth_grace_duration().map_err(setup)?,
        sweep_interval: cfg.sweep_interval_duration().map_err(setup)?,
    })
}

fn store_config(cfg: &TimescaleExporterConfig) -> StoreConfig {
    StoreConfig {
        host: cfg.host.clone(),
        port: cfg.port,
        username: cfg.username.clone(),
        password: cfg.password.clone(),
        database: cfg.database.clone(),
        table: cfg.table.clone(),
        pool_size: cfg.pool_size,
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[test]
    fn selected_exporters_map_to_sinks() {
        let exporters = ExportersConfig {
            websocket: Some(WebsocketExporterConfig::default()),
            timescale: Some(TimescaleExporterConfig::default()),
            ..ExportersConfig::default()
        };

        let hub = build_sink("websocket", &exporters)
            .expect("build")
            .expect("hub sink");
        assert_eq!(hub.key(), "websocket");
        let store = build_sink("timescale", &exporters)
            .expect("build")
            .expect("store sink");
        assert_eq!(store.key(), "timescale");
    }

    #[test]
    fn unknown_or_unselected_keys_yield_none() {
        let exporters = ExportersConfig::default();
        assert!(build_sink("websocket", &exporters).expect("build").is_none());
        assert!(build_sink("kafka", &exporters).expect("build").is_none());
    }

    #[test]
    fn hub_durations_are_parsed() {
        let cfg = WebsocketExporterConfig {
            pong_wait: "5s".to_string(),
            auth_grace: "250ms".to_string(),
            ..WebsocketExporterConfig::default()
        };
        let hub = hub_config(&cfg).expect("hub config");
        assert_eq!(hub.pong_wait, Duration::from_secs(5));
        assert_eq!(hub.auth_grace, Duration::from_millis(250));
        assert_eq!(hub.sweep_interval, Duration::from_secs(30));
    }

    #[test]
    fn bad_hub_duration_is_setup_error() {
        let cfg = WebsocketExporterConfig {
            pong_wait: "soon".to_string(),
            ..WebsocketExporterConfig::default()
        };
        assert!(matches!(hub_config(&cfg), Err(SinkError::Setup(_))));
    }
}
