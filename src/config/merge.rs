use std::path::PathBuf;

use super::BridgeConfig;

pub fn apply_env_overrides(config: &mut BridgeConfig) {
    apply_overrides(config, |key| std::env::var(key).ok());
}

pub(crate) fn apply_overrides(config: &mut BridgeConfig, lookup: impl Fn(&str) -> Option<String>) {
    let var = |key: &str| {
        lookup(key)
            .map(|raw| raw.trim().to_string())
            .filter(|raw| !raw.is_empty())
    };

    if config.server.executable.is_none()
        && let Some(raw) = var("HYDPY_PYTHON")
    {
        config.server.executable = Some(PathBuf::from(raw));
    }

    if config.server.script.is_none()
        && let Some(raw) = var("HYDPY_SCRIPT")
    {
        config.server.script = Some(PathBuf::from(raw));
    }

    if let Some(raw) = var("HYDPY_BRIDGE_PROCESSES") {
        match raw.parse::<usize>() {
            Ok(value) => {
                config.server.processes = value;
            }
            Err(err) => {
                tracing::warn!("invalid HYDPY_BRIDGE_PROCESSES, ignoring: {err}");
            }
        }
    }

    if let Some(raw) = var("HYDPY_BRIDGE_BASE_PORT") {
        match raw.parse::<u16>() {
            Ok(value) => {
                config.server.base_port = value;
            }
            Err(err) => {
                tracing::warn!("invalid HYDPY_BRIDGE_BASE_PORT, ignoring: {err}");
            }
        }
    }
}
