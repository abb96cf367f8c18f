use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::ConfigError;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    pub server: ServerConfig,
    pub items: ItemsConfig,
    pub reaper: ReaperConfig,
    pub logging: LoggingConfig,
}

impl BridgeConfig {
    /// Fail fast on settings that would only surface after spawning servers.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.server.validate()?;
        if self.reaper.capacity == 0 {
            return Err(ConfigError::Invalid {
                field: "reaper.capacity",
                reason: "must be at least 1".into(),
            });
        }
        Ok(())
    }
}

/// How calls reach a server process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionMode {
    /// The caller's thread talks to the server under a lock.
    Synchronous,
    /// Each server owns a worker thread; writes may be fire-and-forget.
    Threaded,
}

/// How instance ids are spread across server processes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AssignmentPolicy {
    Hash,
    RoundRobin,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Interpreter running the engine, usually a python executable.
    pub executable: Option<PathBuf>,
    /// Driver script started by the interpreter.
    pub script: Option<PathBuf>,
    pub project: Option<String>,
    pub config_file: Option<PathBuf>,
    pub model_dir: PathBuf,
    pub host: String,
    pub base_port: u16,
    pub processes: usize,
    pub init_retry_seconds: u64,
    pub status_poll_interval_ms: u64,
    pub status_timeout_ms: u64,
    pub request_timeout_secs: u64,
    /// Wait this long for a closed server to exit before killing it.
    pub shutdown_grace_ms: u64,
    /// Redirect server stdout/stderr into per-process files here.
    pub log_dir: Option<PathBuf>,
    pub eager_start: bool,
    pub mode: ExecutionMode,
    pub assignment: AssignmentPolicy,
    pub expected_version: Option<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            executable: None,
            script: None,
            project: None,
            config_file: None,
            model_dir: PathBuf::from("."),
            host: "127.0.0.1".to_string(),
            base_port: 8080,
            processes: 1,
            init_retry_seconds: 60,
            status_poll_interval_ms: 250,
            status_timeout_ms: 1_000,
            request_timeout_secs: 600,
            shutdown_grace_ms: 2_000,
            log_dir: None,
            eager_start: false,
            mode: ExecutionMode::Threaded,
            assignment: AssignmentPolicy::Hash,
            expected_version: None,
        }
    }
}

impl ServerConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.executable.is_none() {
            return Err(ConfigError::Missing("server.executable"));
        }
        if self.script.is_none() {
            return Err(ConfigError::Missing("server.script"));
        }
        match self.project.as_deref() {
            Some(project) if !project.trim().is_empty() => {}
            _ => return Err(ConfigError::Missing("server.project")),
        }
        if self.config_file.is_none() {
            return Err(ConfigError::Missing("server.config_file"));
        }
        if !self.model_dir.is_dir() {
            return Err(ConfigError::Invalid {
                field: "server.model_dir",
                reason: format!("{} is not a directory", self.model_dir.display()),
            });
        }
        if self.processes == 0 {
            return Err(ConfigError::Invalid {
                field: "server.processes",
                reason: "must be at least 1".into(),
            });
        }
        let last_port = u32::try_from(self.processes - 1)
            .ok()
            .and_then(|extra| u32::from(self.base_port).checked_add(extra));
        if last_port.is_none_or(|port| port > u32::from(u16::MAX)) {
            return Err(ConfigError::Invalid {
                field: "server.base_port",
                reason: format!(
                    "{} processes starting at {} exceed the port range",
                    self.processes, self.base_port
                ),
            });
        }
        if self.status_poll_interval_ms == 0 {
            return Err(ConfigError::Invalid {
                field: "server.status_poll_interval_ms",
                reason: "must be positive".into(),
            });
        }
        Ok(())
    }

    pub fn port_for(&self, index: usize) -> u16 {
        self.base_port
            .saturating_add(u16::try_from(index).unwrap_or(u16::MAX))
    }

    /// Number of status probes before startup is abandoned.
    pub fn startup_attempts(&self) -> u64 {
        self.init_retry_seconds.saturating_mul(4).max(1)
    }

    pub fn status_poll_interval(&self) -> Duration {
        Duration::from_millis(self.status_poll_interval_ms)
    }

    pub fn status_timeout(&self) -> Duration {
        Duration::from_millis(self.status_timeout_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_millis(self.shutdown_grace_ms)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ItemsConfig {
    /// Items constant over the whole run; fetched once per process.
    pub fixed: Vec<String>,
    /// 1-D time series split into one sub-item per column.
    pub exploded: Vec<String>,
    /// Items the framework may read but never write.
    pub outputs: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReaperConfig {
    pub capacity: usize,
    pub enqueue_timeout_secs: u64,
    pub retry_delay_ms: u64,
}

impl Default for ReaperConfig {
    fn default() -> Self {
        Self {
            capacity: 1_000,
            enqueue_timeout_secs: 60,
            retry_delay_ms: 1_000,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    Pretty,
    Compact,
    Json,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogRotation {
    Daily,
    Hourly,
    Minutely,
    Never,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub stdout: bool,
    pub stdout_format: LogFormat,
    pub filter: Option<String>,
    pub file: FileLoggingConfig,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            stdout: true,
            stdout_format: LogFormat::Compact,
            filter: None,
            file: FileLoggingConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FileLoggingConfig {
    pub enabled: bool,
    pub dir: Option<PathBuf>,
    pub format: LogFormat,
    pub rotation: LogRotation,
}

impl Default for FileLoggingConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            dir: None,
            format: LogFormat::Json,
            rotation: LogRotation::Daily,
        }
    }
}
