use std::path::{Path, PathBuf};

use crate::{GatewayConfig, DEFAULT_CONFIG_PATH};

/// File locations referenced by a config, resolved against its directory.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ConfigPaths {
    config_path: PathBuf,
    certificate_path: PathBuf,
    private_key_path: PathBuf,
    user_certificate_path: PathBuf,
    user_private_key_path: PathBuf,
}

impl ConfigPaths {
    pub fn config_path(&self) -> &Path {
        &self.config_path
    }

    pub fn certificate_path(&self) -> &Path {
        &self.certificate_path
    }

    pub fn private_key_path(&self) -> &Path {
        &self.private_key_path
    }

    pub fn user_certificate_path(&self) -> &Path {
        &self.user_certificate_path
    }

    pub fn user_private_key_path(&self) -> &Path {
        &self.user_private_key_path
    }

    pub fn resolve_relative_path(&self, raw: impl AsRef<Path>) -> PathBuf {
        resolve_against(&self.config_path, raw.as_ref())
    }
}

pub fn resolve_config_paths(cfg: &GatewayConfig, config_path: impl AsRef<Path>) -> ConfigPaths {
    let config_path = normalize_config_path(config_path.as_ref());
    let connection = &cfg.connection;
    let resolve = |raw: &str| resolve_against(&config_path, Path::new(raw));

    ConfigPaths {
        certificate_path: resolve(&connection.certificate.certificate_path),
        private_key_path: resolve(&connection.certificate.private_key_path),
        user_certificate_path: resolve(&connection.authentication.certificate_path),
        user_private_key_path: resolve(&connection.authentication.private_key_path),
        config_path,
    }
}

pub(crate) fn normalize_config_path(path: &Path) -> PathBuf {
    if path.as_os_str().is_empty() {
        PathBuf::from(DEFAULT_CONFIG_PATH)
    } else {
        path.to_path_buf()
    }
}

fn resolve_against(config_path: &Path, path: &Path) -> PathBuf {
    if path.as_os_str().is_empty() {
        return PathBuf::new();
    }
    if path.is_absolute() {
        return path.to_path_buf();
    }
    config_path
        .parent()
        .unwrap_or_else(|| Path::new("."))
        .join(path)
}
