use std::thread;
use std::time::{Duration, Instant};

use hydpy_bridge::config::ExecutionMode;
use hydpy_bridge::items::time::{datetime_to_mjd, parse_datetime};
use hydpy_bridge::protocol::methods;
use hydpy_bridge::{ItemValue, ItemValues, ModelStateFile, ServerPool};

use crate::fixtures::{FIRST, FakeCluster, bridge_config};

#[test]
fn saved_state_restores_into_another_instance() {
    let cluster = FakeCluster::new();
    let model_dir = tempfile::tempdir().expect("model dir");
    let config = bridge_config(model_dir.path(), 1, ExecutionMode::Synchronous);
    let pool = ServerPool::with_launcher(&config, cluster.launcher(), cluster.connector())
        .expect("pool");

    let source = pool.instance("member_0");
    source.initialize().expect("initialize");
    let mut values = ItemValues::new();
    values.insert("alpha".to_string(), ItemValue::Double(3.5));
    values.insert("sm".to_string(), ItemValue::DoubleVector(vec![1.0, 2.0]));
    source.set_item_values(values).expect("set");

    let path = model_dir.path().join("states").join("member_0.properties");
    let saved = source.save_state(&path, 0).expect("save");
    assert!(saved.cold_start);
    let expected_time = datetime_to_mjd(parse_datetime(FIRST).expect("first date"));
    assert!((saved.time - expected_time).abs() < 1e-9);
    assert!(saved.state.contains("alpha=3.5"));
    assert!(!saved.state.contains("qout"), "outputs are not state");
    assert!(!saved.state.contains("q="), "window series are not state");
    assert_eq!(ModelStateFile::read(&path).expect("read back"), saved);

    let target = pool.instance("member_1");
    target.initialize().expect("initialize");
    target.restore_state(&path).expect("restore");
    let body = cluster
        .last_body("member_1", methods::SET_ITEM_VALUES)
        .expect("restored values posted");
    assert_eq!(body.get("alpha"), Some("3.5"));
    assert_eq!(body.get("sm"), Some("[1.0, 2.0]"));

    assert_eq!(target.discard_states([path.clone()]), 1);
    let deadline = Instant::now() + Duration::from_secs(2);
    while path.exists() && Instant::now() < deadline {
        thread::sleep(Duration::from_millis(10));
    }
    assert!(!path.exists());
    pool.shutdown();
}

#[test]
fn cold_state_file_restores_nothing() {
    let cluster = FakeCluster::new();
    let model_dir = tempfile::tempdir().expect("model dir");
    let config = bridge_config(model_dir.path(), 1, ExecutionMode::Synchronous);
    let pool = ServerPool::with_launcher(&config, cluster.launcher(), cluster.connector())
        .expect("pool");
    let instance = pool.instance("member_0");
    instance.initialize().expect("initialize");

    let path = model_dir.path().join("cold.properties");
    ModelStateFile::cold_start(50_083.0).write(&path).expect("write");
    let record = instance.restore_state(&path).expect("restore");
    assert!(record.cold_start);
    assert!(cluster.last_body("member_0", methods::SET_ITEM_VALUES).is_none());
    pool.shutdown();
}
