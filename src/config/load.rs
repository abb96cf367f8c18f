use std::fs;
use std::path::Path;

use super::merge::apply_env_overrides;
use super::{BridgeConfig, ConfigError};

/// Read, apply env overrides and validate a bridge config file.
pub fn load(path: &Path) -> Result<BridgeConfig, ConfigError> {
    let contents = fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    let mut config = load_str(path, &contents)?;
    apply_env_overrides(&mut config);
    config.validate()?;
    Ok(config)
}

/// Parse config text without touching the environment or validating.
pub fn load_str(path: &Path, contents: &str) -> Result<BridgeConfig, ConfigError> {
    toml::from_str(contents).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

pub fn write_config(path: &Path, cfg: &BridgeConfig) -> Result<(), ConfigError> {
    let write_error = |reason: String| ConfigError::Write {
        path: path.to_path_buf(),
        reason,
    };
    let dir = path
        .parent()
        .ok_or_else(|| write_error("config path missing parent directory".to_string()))?;
    fs::create_dir_all(dir).map_err(|e| write_error(format!("failed to create dir: {e}")))?;
    let contents =
        toml::to_string_pretty(cfg).map_err(|e| write_error(format!("failed to render: {e}")))?;
    let temp = tempfile::NamedTempFile::new_in(dir)
        .map_err(|e| write_error(format!("failed to create temp file: {e}")))?;
    fs::write(temp.path(), contents.as_bytes())
        .map_err(|e| write_error(format!("failed to write temp file: {e}")))?;
    temp.persist(path)
        .map_err(|e| write_error(format!("failed to persist: {e}")))?;
    Ok(())
}
