//! XDG directory helpers for bridge data locations.

use std::path::PathBuf;

/// Base directory for persistent data (logs, saved model states).
///
/// Uses `HYDPY_BRIDGE_DATA_DIR` if set, otherwise `$XDG_DATA_HOME/hydpy-bridge`
/// or `~/.local/share/hydpy-bridge`.
pub fn data_dir() -> PathBuf {
    if let Ok(dir) = std::env::var("HYDPY_BRIDGE_DATA_DIR")
        && !dir.trim().is_empty()
    {
        return PathBuf::from(dir);
    }

    std::env::var("XDG_DATA_HOME")
        .ok()
        .filter(|s| !s.is_empty())
        .map(PathBuf::from)
        .unwrap_or_else(|| {
            dirs::home_dir()
                .unwrap_or_else(|| PathBuf::from("/tmp"))
                .join(".local")
                .join("share")
        })
        .join("hydpy-bridge")
}

/// Default directory for the bridge's own rolling log files.
pub fn log_dir() -> PathBuf {
    data_dir().join("logs")
}

/// Per-process stdout/stderr capture files inside a configured server log dir.
pub fn server_log_paths(log_dir: &std::path::Path, index: usize) -> (PathBuf, PathBuf) {
    (
        log_dir.join(format!("hydpy_server_{index}.log")),
        log_dir.join(format!("hydpy_server_{index}.err")),
    )
}
