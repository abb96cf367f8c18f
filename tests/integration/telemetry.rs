use std::fs;

use hydpy_bridge::ServerPool;
use hydpy_bridge::config::{ExecutionMode, LogFormat, LogRotation};
use hydpy_bridge::telemetry::{self, TelemetryConfig};

use crate::fixtures::{FakeCluster, bridge_config};

#[test]
fn pool_events_reach_the_log_file() {
    let cluster = FakeCluster::new();
    let model_dir = tempfile::tempdir().expect("model dir");
    let log_dir = tempfile::tempdir().expect("log dir");
    let mut config = bridge_config(model_dir.path(), 1, ExecutionMode::Synchronous);
    config.logging.stdout = false;
    config.logging.filter = Some("hydpy_bridge=debug".to_string());
    config.logging.file.enabled = true;
    config.logging.file.dir = Some(log_dir.path().to_path_buf());
    config.logging.file.format = LogFormat::Json;
    config.logging.file.rotation = LogRotation::Never;

    let guard = telemetry::init(TelemetryConfig::from_bridge(&config, 1));
    let pool = ServerPool::with_launcher(&config, cluster.launcher(), cluster.connector())
        .expect("pool");
    pool.shutdown();
    drop(guard);

    let text = fs::read_to_string(log_dir.path().join("hydpy-bridge.log")).expect("log file");
    assert!(text.contains("server pool created"), "log was: {text}");
}
