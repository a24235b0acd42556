use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::Deserialize;
use thiserror::Error;

pub const DEFAULT_CONFIG_PATH: &str = "telegate.toml";
pub const OPCUA_DRIVER: &str = "opcua";
pub const SIMULATED_DRIVER: &str = "simulated";
pub const SUPPORTED_DRIVERS: [&str; 2] = [OPCUA_DRIVER, SIMULATED_DRIVER];
pub const TIMESCALE_EXPORTER: &str = "timescale";
pub const WEBSOCKET_EXPORTER: &str = "websocket";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("config file does not exist: {}", .0.display())]
    Missing(PathBuf),
    #[error("failed to read config: {0}")]
    Read(std::io::Error),
    #[error("failed to parse config: {0}")]
    Parse(toml::de::Error),
    #[error("config validation failed: {0}")]
    Validation(String),
}

#[derive(Clone, Debug, Default, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct GatewayConfig {
    pub connection: ConnectionConfig,
    pub subscription: SubscriptionConfig,
    pub exporters: ExportersConfig,
}

#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct ConnectionConfig {
    pub driver: String,
    pub endpoint: String,
    pub port: u16,
    pub policy: String,
    pub mode: String,
    pub retry_count: u32,
    pub application_name: String,
    pub reconnect_interval: String,
    pub authentication: AuthenticationConfig,
    pub certificate: CertificateConfig,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            driver: OPCUA_DRIVER.to_string(),
            endpoint: "127.0.0.1".to_string(),
            port: 4840,
            policy: "None".to_string(),
            mode: "None".to_string(),
            retry_count: 5,
            application_name: "telegate".to_string(),
            reconnect_interval: "10s".to_string(),
            authentication: AuthenticationConfig::default(),
            certificate: CertificateConfig::default(),
        }
    }
}

impl ConnectionConfig {
    pub fn url(&self) -> String {
        format!("opc.tcp://{}:{}", self.endpoint, self.port)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AuthKind {
    Anonymous,
    UserName,
    Certificate,
}

impl AuthKind {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "" | "anonymous" => Some(Self::Anonymous),
            "username" | "userpassword" | "user&password" => Some(Self::UserName),
            "certificate" => Some(Self::Certificate),
            _ => None,
        }
    }
}

#[derive(Clone, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct AuthenticationConfig {
    #[serde(rename = "type")]
    pub auth_type: String,
    pub username: String,
    pub password: String,
    pub certificate_path: String,
    pub private_key_path: String,
}

impl Default for AuthenticationConfig {
    fn default() -> Self {
        Self {
            auth_type: "anonymous".to_string(),
            username: String::new(),
            password: String::new(),
            certificate_path: String::new(),
            private_key_path: String::new(),
        }
    }
}

impl std::fmt::Debug for AuthenticationConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthenticationConfig")
            .field("auth_type", &self.auth_type)
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .field("certificate_path", &self.certificate_path)
            .field("private_key_path", &self.private_key_path)
            .finish()
    }
}

#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct CertificateConfig {
    pub auto_create: bool,
    pub certificate_path: String,
    pub private_key_path: String,
}

impl Default for CertificateConfig {
    fn default() -> Self {
        Self {
            auto_create: false,
            certificate_path: "certs/cert.pem".to_string(),
            private_key_path: "certs/key.pem".to_string(),
        }
    }
}

#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct SubscriptionConfig {
    pub node_ids: Vec<String>,
    pub interval: String,
}

impl Default for SubscriptionConfig {
    fn default() -> Self {
        Self {
            node_ids: Vec::new(),
            interval: "1s".to_string(),
        }
    }
}

/// Exporter selection. Every table under `[exporters]` selects the exporter
/// with that key; keys without a known exporter are kept so the registry can
/// report them.
#[derive(Clone, Debug, Default, Deserialize, PartialEq)]
#[serde(default)]
pub struct ExportersConfig {
    pub timescale: Option<TimescaleExporterConfig>,
    pub websocket: Option<WebsocketExporterConfig>,
    #[serde(flatten)]
    pub other: BTreeMap<String, toml::Value>,
}

impl ExportersConfig {
    pub fn selected_keys(&self) -> Vec<String> {
        let mut keys = Vec::new();
        if self.timescale.is_some() {
            keys.push(TIMESCALE_EXPORTER.to_string());
        }
        if self.websocket.is_some() {
            keys.push(WEBSOCKET_EXPORTER.to_string());
        }
        keys.extend(self.other.keys().cloned());
        keys
    }
}

#[derive(Clone, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct TimescaleExporterConfig {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: String,
    pub database: String,
    pub table: String,
    pub pool_size: usize,
}

impl Default for TimescaleExporterConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 5432,
            username: "postgres".to_string(),
            password: String::new(),
            database: "telemetry".to_string(),
            table: "telemetry_events".to_string(),
            pool_size: 4,
        }
    }
}

impl std::fmt::Debug for TimescaleExporterConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TimescaleExporterConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .field("database", &self.database)
            .field("table", &self.table)
            .field("pool_size", &self.pool_size)
            .finish()
    }
}

#[derive(Clone, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct WebsocketExporterConfig {
    pub addr: String,
    pub endpoint: String,
    pub username: String,
    pub password: String,
    pub pong_wait: String,
    pub auth_grace: String,
    pub sweep_interval: String,
}

impl Default for WebsocketExporterConfig {
    fn default() -> Self {
        Self {
            addr: "127.0.0.1:9000".to_string(),
            endpoint: "/ws".to_string(),
            username: String::new(),
            password: String::new(),
            pong_wait: "10s".to_string(),
            auth_grace: "10s".to_string(),
            sweep_interval: "30s".to_string(),
        }
    }
}

impl std::fmt::Debug for WebsocketExporterConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WebsocketExporterConfig")
            .field("addr", &self.addr)
            .field("endpoint", &self.endpoint)
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .field("pong_wait", &self.pong_wait)
            .field("auth_grace", &self.auth_grace)
            .field("sweep_interval", &self.sweep_interval)
            .finish()
    }
}
