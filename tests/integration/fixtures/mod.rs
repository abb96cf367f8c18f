#![allow(dead_code)]

pub mod engine;

use std::path::Path;

use hydpy_bridge::config::{AssignmentPolicy, BridgeConfig, ExecutionMode};

pub use engine::{BASE_PORT, Call, FakeCluster, FIRST, LAST, Phase};

/// A pool configuration pointing at the fake engine.
pub fn bridge_config(model_dir: &Path, processes: usize, mode: ExecutionMode) -> BridgeConfig {
    let mut config = BridgeConfig::default();
    config.server.executable = Some("python3".into());
    config.server.script = Some("hydpy_server.py".into());
    config.server.project = Some("LahnH".to_string());
    config.server.config_file = Some("multiple_runs.xml".into());
    config.server.model_dir = model_dir.to_path_buf();
    config.server.processes = processes;
    config.server.base_port = BASE_PORT;
    config.server.init_retry_seconds = 1;
    config.server.status_poll_interval_ms = 5;
    config.server.status_timeout_ms = 50;
    config.server.shutdown_grace_ms = 100;
    config.server.mode = mode;
    config.server.assignment = AssignmentPolicy::Hash;
    config.items.outputs = vec!["qout".to_string()];
    config.reaper.enqueue_timeout_secs = 1;
    config.reaper.retry_delay_ms = 10;
    config
}
