mod load;
mod model;
mod paths;
mod validate;

pub use load::load;
pub use model::{
    AuthKind, AuthenticationConfig, CertificateConfig, ConfigError, ConnectionConfig,
    ExportersConfig, GatewayConfig, SubscriptionConfig, TimescaleExporterConfig,
    WebsocketExporterConfig, DEFAULT_CONFIG_PATH, OPCUA_DRIVER, SIMULATED_DRIVER,
    SUPPORTED_DRIVERS, TIMESCALE_EXPORTER, WEBSOCKET_EXPORTER,
};
pub use paths::{resolve_config_paths, ConfigPaths};
