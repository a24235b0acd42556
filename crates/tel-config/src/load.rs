use std::fs;
use std::path::Path;

use crate::paths::normalize_config_path;
use crate::{resolve_config_paths, ConfigError, ConfigPaths, GatewayConfig};

/// Reads, normalizes and validates the config at `path`, and resolves the
/// files it references against the config's directory. An empty path
/// means [`crate::DEFAULT_CONFIG_PATH`].
pub fn load(path: impl AsRef<Path>) -> Result<(GatewayConfig, ConfigPaths), ConfigError> {
    let config_path = normalize_config_path(path.as_ref());
    let raw = match fs::read_to_string(&config_path) {
        Ok(raw) => raw,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            return Err(ConfigError::Missing(config_path));
        }
        Err(err) => return Err(ConfigError::Read(err)),
    };

    let mut cfg: GatewayConfig = toml::from_str(&raw).map_err(ConfigError::Parse)?;
    cfg.normalize();
    cfg.validate()?;
    let paths = resolve_config_paths(&cfg, &config_path);
    Ok((cfg, paths))
}
