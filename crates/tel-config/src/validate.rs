use std::collections::BTreeSet;
use std::time::Duration;

use tel_protocol::{NodeId, SecurityMode, SecurityPolicy};

use crate::{
    AuthKind, AuthenticationConfig, CertificateConfig, ConfigError, ConnectionConfig,
    GatewayConfig, SubscriptionConfig, TimescaleExporterConfig, WebsocketExporterConfig,
    SUPPORTED_DRIVERS,
};

impl GatewayConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        let connection = &self.connection;
        if !SUPPORTED_DRIVERS.contains(&connection.driver.as_str()) {
            return Err(ConfigError::Validation(format!(
                "connection.driver is not supported: {}",
                connection.driver
            )));
        }
        if connection.endpoint.trim().is_empty() {
            return Err(ConfigError::Validation(
                "connection.endpoint must not be empty".to_string(),
            ));
        }
        if connection.port == 0 {
            return Err(ConfigError::Validation(
                "connection.port must be > 0".to_string(),
            ));
        }
        let policy = connection.security_policy()?;
        connection.security_mode()?;
        connection.reconnect_interval_duration()?;
        if connection.application_name.trim().is_empty() {
            return Err(ConfigError::Validation(
                "connection.application_name must not be empty".to_string(),
            ));
        }

        let auth = &connection.authentication;
        match auth.kind()? {
            AuthKind::Anonymous => {}
            AuthKind::UserName => {
                if auth.username.trim().is_empty() {
                    return Err(ConfigError::Validation(
                        "connection.authentication.username must not be empty for username auth"
                            .to_string(),
                    ));
                }
            }
            AuthKind::Certificate => {
                if !policy.requires_certificate() {
                    return Err(ConfigError::Validation(
                        "certificate authentication requires connection.policy other than None"
                            .to_string(),
                    ));
                }
                if auth.certificate_path.trim().is_empty() || auth.private_key_path.trim().is_empty()
                {
                    return Err(ConfigError::Validation(
                        "connection.authentication.certificate_path and private_key_path are required for certificate auth"
                            .to_string(),
                    ));
                }
            }
        }

        if policy.requires_certificate()
            && (connection.certificate.certificate_path.trim().is_empty()
                || connection.certificate.private_key_path.trim().is_empty())
        {
            return Err(ConfigError::Validation(
                "connection.certificate paths must not be empty when policy is not None"
                    .to_string(),
            ));
        }

        self.subscription.interval_duration()?;
        self.subscription.parsed_node_ids()?;

        if let Some(timescale) = &self.exporters.timescale {
            timescale.validate()?;
        }
        if let Some(websocket) = &self.exporters.websocket {
            websocket.validate()?;
        }
        Ok(())
    }

    pub fn normalize(&mut self) {
        let defaults = ConnectionConfig::default();
        let connection = &mut self.connection;
        trim_or_default(&mut connection.driver, &defaults.driver);
        connection.driver = connection.driver.to_ascii_lowercase();
        trim_or_default(&mut connection.endpoint, &defaults.endpoint);
        trim_or_default(&mut connection.policy, &defaults.policy);
        trim_or_default(&mut connection.mode, &defaults.mode);
        trim_or_default(&mut connection.application_name, &defaults.application_name);
        trim_or_default(&mut connection.reconnect_interval, &defaults.reconnect_interval);
        trim_or_default(
            &mut connection.authentication.auth_type,
            &AuthenticationConfig::default().auth_type,
        );

        let cert_defaults = CertificateConfig::default();
        trim_or_default(
            &mut connection.certificate.certificate_path,
            &cert_defaults.certificate_path,
        );
        trim_or_default(
            &mut connection.certificate.private_key_path,
            &cert_defaults.private_key_path,
        );

        trim_or_default(
            &mut self.subscription.interval,
            &SubscriptionConfig::default().interval,
        );
        self.subscription.node_ids = self
            .subscription
            .node_ids
            .iter()
            .map(|id| id.trim())
            .filter(|id| !id.is_empty())
            .map(ToString::to_string)
            .collect();

        if let Some(websocket) = self.exporters.websocket.as_mut() {
            let defaults = WebsocketExporterConfig::default();
            trim_or_default(&mut websocket.addr, &defaults.addr);
            trim_or_default(&mut websocket.endpoint, &defaults.endpoint);
            trim_or_default(&mut websocket.pong_wait, &defaults.pong_wait);
            trim_or_default(&mut websocket.auth_grace, &defaults.auth_grace);
            trim_or_default(&mut websocket.sweep_interval, &defaults.sweep_interval);
        }
        if let Some(timescale) = self.exporters.timescale.as_mut() {
            let defaults = TimescaleExporterConfig::default();
            trim_or_default(&mut timescale.host, &defaults.host);
            trim_or_default(&mut timescale.database, &defaults.database);
            trim_or_default(&mut timescale.table, &defaults.table);
        }
    }
}

impl ConnectionConfig {
    pub fn security_policy(&self) -> Result<SecurityPolicy, ConfigError> {
        SecurityPolicy::parse(&self.policy).ok_or_else(|| {
            ConfigError::Validation(format!("connection.policy is unknown: {}", self.policy))
        })
    }

    pub fn security_mode(&self) -> Result<SecurityMode, ConfigError> {
        SecurityMode::parse(&self.mode).ok_or_else(|| {
            ConfigError::Validation(format!("connection.mode is unknown: {}", self.mode))
        })
    }

    pub fn reconnect_interval_duration(&self) -> Result<Duration, ConfigError> {
        parse_duration_value("connection.reconnect_interval", &self.reconnect_interval)
    }
}

impl AuthenticationConfig {
    pub fn kind(&self) -> Result<AuthKind, ConfigError> {
        AuthKind::parse(&self.auth_type).ok_or_else(|| {
            ConfigError::Validation(format!(
                "connection.authentication.type is unknown: {}",
                self.auth_type
            ))
        })
    }
}

impl SubscriptionConfig {
    pub fn interval_duration(&self) -> Result<Duration, ConfigError> {
        let interval = parse_duration_value("subscription.interval", &self.interval)?;
        if interval.is_zero() {
            return Err(ConfigError::Validation(
                "subscription.interval must be > 0".to_string(),
            ));
        }
        Ok(interval)
    }

    /// Parsed data point ids. The keepalive node is monitored implicitly and
    /// must not be listed.
    pub fn parsed_node_ids(&self) -> Result<Vec<NodeId>, ConfigError> {
        let mut seen = BTreeSet::new();
        let mut out = Vec::with_capacity(self.node_ids.len());
        for raw in &self.node_ids {
            let node_id: NodeId = raw.parse().map_err(|err| {
                ConfigError::Validation(format!("subscription.node_ids entry {raw:?}: {err}"))
            })?;
            if node_id.is_keepalive() {
                return Err(ConfigError::Validation(format!(
                    "subscription.node_ids must not contain the keepalive node {node_id}"
                )));
            }
            if !seen.insert(node_id.to_string()) {
                return Err(ConfigError::Validation(format!(
                    "duplicate subscription node id: {node_id}"
                )));
            }
            out.push(node_id);
        }
        Ok(out)
    }
}

impl TimescaleExporterConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.host.trim().is_empty() {
            return Err(ConfigError::Validation(
                "exporters.timescale.host must not be empty".to_string(),
            ));
        }
        if self.port == 0 {
            return Err(ConfigError::Validation(
                "exporters.timescale.port must be > 0".to_string(),
            ));
        }
        if self.pool_size == 0 {
            return Err(ConfigError::Validation(
                "exporters.timescale.pool_size must be > 0".to_string(),
            ));
        }
        if !is_qualified_identifier(&self.table) {
            return Err(ConfigError::Validation(format!(
                "exporters.timescale.table is not a plain identifier: {}",
                self.table
            )));
        }
        Ok(())
    }
}

impl WebsocketExporterConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.addr.trim().is_empty() {
            return Err(ConfigError::Validation(
                "exporters.websocket.addr must not be empty".to_string(),
            ));
        }
        if !self.endpoint.starts_with('/') {
            return Err(ConfigError::Validation(format!(
                "exporters.websocket.endpoint must start with '/': {}",
                self.endpoint
            )));
        }
        let pong_wait = self.pong_wait_duration()?;
        if pong_wait < Duration::from_millis(10) {
            return Err(ConfigError::Validation(
                "exporters.websocket.pong_wait must be >= 10ms".to_string(),
            ));
        }
        self.auth_grace_duration()?;
        if self.sweep_interval_duration()?.is_zero() {
            return Err(ConfigError::Validation(
                "exporters.websocket.sweep_interval must be > 0".to_string(),
            ));
        }
        Ok(())
    }

    pub fn pong_wait_duration(&self) -> Result<Duration, ConfigError> {
        parse_duration_value("exporters.websocket.pong_wait", &self.pong_wait)
    }

    pub fn auth_grace_duration(&self) -> Result<Duration, ConfigError> {
        parse_duration_value("exporters.websocket.auth_grace", &self.auth_grace)
    }

    pub fn sweep_interval_duration(&self) -> Result<Duration, ConfigError> {
        parse_duration_value("exporters.websocket.sweep_interval", &self.sweep_interval)
    }
}

fn trim_or_default(field: &mut String, default: &str) {
    let trimmed = field.trim();
    *field = if trimmed.is_empty() {
        default.to_string()
    } else {
        trimmed.to_string()
    };
}

fn parse_duration_value(field: &str, raw: &str) -> Result<Duration, ConfigError> {
    humantime::parse_duration(raw).map_err(|err| {
        ConfigError::Validation(format!("{field} must be a valid duration string ({err})"))
    })
}

/// `name` or `schema.name`, each part starting with a letter or underscore.
fn is_qualified_identifier(raw: &str) -> bool {
    raw.split('.').all(|part| {
        let mut chars = part.chars();
        chars
            .next()
            .is_some_and(|first| first.is_ascii_alphabetic() || first == '_')
            && chars.all(|ch| ch.is_ascii_alphanumeric() || ch == '_')
    })
}
