use anyhow::{anyhow, Context, Result};
use tel_config::{AuthKind, ConfigPaths, GatewayConfig, OPCUA_DRIVER, SIMULATED_DRIVER};
use tel_core::{SubscriptionSpec, SupervisorOptions};
use tel_protocol::{ApplicationCertificate, SecurityPolicy, UserIdentity};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum DriverKind {
    OpcUa,
    Simulated,
}

impl DriverKind {
    fn parse(raw: &str) -> Option<Self> {
        match raw {
            OPCUA_DRIVER => Some(Self::OpcUa),
            SIMULATED_DRIVER => Some(Self::Simulated),
            _ => None,
        }
    }

    pub(crate) fn as_str(self) -> &'static str {
        match self {
            Self::OpcUa => OPCUA_DRIVER,
            Self::Simulated => SIMULATED_DRIVER,
        }
    }
}

#[derive(Debug)]
pub(crate) struct RuntimeSpec {
    pub(crate) driver: DriverKind,
    pub(crate) supervisor: SupervisorOptions,
}

pub(crate) fn build_runtime_spec(cfg: &GatewayConfig, paths: &ConfigPaths) -> Result<RuntimeSpec> {
    let connection = &cfg.connection;
    let driver = DriverKind::parse(&connection.driver)
        .ok_or_else(|| anyhow!("unsupported source driver: {}", connection.driver))?;

    let subscription = SubscriptionSpec {
        node_ids: cfg
            .subscription
            .parsed_node_ids()
            .context("invalid subscription.node_ids")?,
        interval: cfg
            .subscription
            .interval_duration()
            .context("invalid subscription.interval")?,
    };

    let mut options = SupervisorOptions::new(connection.url(), subscription);
    options.policy = connection.security_policy()?;
    options.mode = connection.security_mode()?;
    options.application_name = connection.application_name.clone();
    options.reconnect_interval = connection.reconnect_interval_duration()?;
    options.retry_budget = connection.retry_count;
    options.identity = build_identity(cfg, paths)?;
    if options.policy != SecurityPolicy::None {
        options.certificate = Some(ApplicationCertificate {
            certificate_path: paths.certificate_path().to_path_buf(),
            private_key_path: paths.private_key_path().to_path_buf(),
        });
        options.auto_create_certificate = connection.certificate.auto_create;
    }

    Ok(RuntimeSpec {
        driver,
        supervisor: options,
    })
}

fn build_identity(cfg: &GatewayConfig, paths: &ConfigPaths) -> Result<UserIdentity> {
    let auth = &cfg.connection.authentication;
    Ok(match auth.kind()? {
        AuthKind::Anonymous => UserIdentity::Anonymous,
        AuthKind::UserName => UserIdentity::UserName {
            username: auth.username.clone(),
            password: auth.password.clone(),
        },
        AuthKind::Certificate => UserIdentity::Certificate {
            certificate_path: paths.user_certificate_path().to_path_buf(),
            private_key_path: paths.user_private_key_path().to_path_buf(),
        },
    })
}
