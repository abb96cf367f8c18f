use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;
use std::thread;

use hydpy_bridge::config::{AssignmentPolicy, ExecutionMode};
use hydpy_bridge::items::Series0D;
use hydpy_bridge::items::time::parse_datetime;
use hydpy_bridge::protocol::{ProtocolError, methods};
use hydpy_bridge::server::ServerError;
use hydpy_bridge::supervisor::{CommandLauncher, SupervisorError};
use hydpy_bridge::{Error, ItemValue, ItemValues, ProcessState, ServerPool};

use crate::fixtures::engine::CLOSE_SERVER;
use crate::fixtures::{FIRST, FakeCluster, Phase, bridge_config};

fn open_pool(cluster: &Arc<FakeCluster>, processes: usize, mode: ExecutionMode) -> (tempfile::TempDir, ServerPool) {
    let model_dir = tempfile::tempdir().expect("model dir");
    let config = bridge_config(model_dir.path(), processes, mode);
    let pool = ServerPool::with_launcher(&config, cluster.launcher(), cluster.connector())
        .expect("pool");
    (model_dir, pool)
}

fn scalar_update(alpha: f64) -> ItemValues {
    let mut values = ItemValues::new();
    values.insert("alpha".to_string(), ItemValue::Double(alpha));
    values
}

/// Daily series over the whole initialisation period.
fn inflow_series(level: f64) -> Series0D {
    let start = parse_datetime(FIRST).expect("first date").unix_timestamp();
    Series0D::new(start, 86_400, vec![level; 4]).expect("series")
}

#[test]
fn ensemble_runs_are_serialized_per_process() {
    let cluster = FakeCluster::new();
    let (_dir, pool) = open_pool(&cluster, 2, ExecutionMode::Threaded);
    let pool = Arc::new(pool);

    let ids: Vec<String> = (0..4).map(|i| format!("member_{i}")).collect();
    let used: BTreeSet<usize> = ids.iter().map(|id| pool.process_for(id)).collect();
    assert_eq!(used, BTreeSet::from([0, 1]), "members must spread over both processes");
    let workers: Vec<_> = ids
        .iter()
        .enumerate()
        .map(|(i, id)| {
            let instance = pool.instance(id.clone());
            thread::spawn(move || {
                assert!(instance.initialize().expect("initialize"));
                let mut values = scalar_update(1.0 + i as f64);
                values.insert("sm".to_string(), ItemValue::DoubleVector(vec![i as f64, 1.0]));
                values.insert("q".to_string(), ItemValue::Series0D(inflow_series(i as f64)));
                instance.set_item_values(values).expect("set");
                instance.simulate().expect("simulate");
                instance.get_item_values().expect("get")
            })
        })
        .collect();
    let results: Vec<ItemValues> = workers
        .into_iter()
        .map(|worker| worker.join().expect("worker thread"))
        .collect();

    for (i, values) in results.iter().enumerate() {
        assert_eq!(values["alpha"], ItemValue::Double(1.0 + i as f64));
        assert_eq!(values["sm"], ItemValue::DoubleVector(vec![i as f64, 1.0]));
        assert_eq!(values["q"], ItemValue::Series0D(inflow_series(i as f64)));
    }

    let expected = vec![
        methods::REGISTER_DEFAULTS.join(","),
        methods::REGISTER_SIMULATION_DATES.join(","),
        methods::SET_ITEM_VALUES.join(","),
        methods::SIMULATE.join(","),
        methods::GET_ITEM_VALUES.join(","),
    ];
    for id in &ids {
        assert_eq!(cluster.methods_for(id), expected, "method order for {id}");
    }

    let mut open: HashMap<usize, usize> = HashMap::new();
    for call in cluster.calls() {
        let depth = open.entry(call.process).or_default();
        match call.phase {
            Phase::Begin => {
                *depth += 1;
                assert_eq!(*depth, 1, "overlapping calls on process {}", call.process);
            }
            Phase::End => *depth -= 1,
        }
    }

    for id in &ids {
        let process = pool.process_for(id);
        assert!(
            cluster
                .calls()
                .iter()
                .filter(|call| call.instance.as_deref() == Some(id.as_str()))
                .all(|call| call.process == process)
        );
    }
    pool.shutdown();
}

#[test]
fn startup_timeout_kills_the_process() {
    let cluster = FakeCluster::never_ready();
    let model_dir = tempfile::tempdir().expect("model dir");
    let mut config = bridge_config(model_dir.path(), 1, ExecutionMode::Synchronous);
    config.server.eager_start = true;

    let err = ServerPool::with_launcher(&config, cluster.launcher(), cluster.connector())
        .err()
        .expect("startup must fail");
    assert!(matches!(
        err,
        Error::Server(ServerError::Supervisor(SupervisorError::StartupTimeout {
            process: 0,
            attempts: 4,
        }))
    ));
    assert!(cluster.child(0).expect("launched").killed());
}

#[test]
fn process_exiting_during_startup_reports_its_code() {
    let cluster = FakeCluster::never_ready();
    cluster.exit_on_launch(3);
    let model_dir = tempfile::tempdir().expect("model dir");
    let mut config = bridge_config(model_dir.path(), 1, ExecutionMode::Synchronous);
    config.server.eager_start = true;

    let err = ServerPool::with_launcher(&config, cluster.launcher(), cluster.connector())
        .err()
        .expect("startup must fail");
    assert!(matches!(
        err,
        Error::Server(ServerError::Supervisor(SupervisorError::ExitedEarly {
            process: 0,
            code: Some(3),
        }))
    ));
}

#[cfg(unix)]
#[test]
fn real_server_script_exiting_early_fails_startup() {
    let cluster = FakeCluster::never_ready();
    let model_dir = tempfile::tempdir().expect("model dir");
    let script = model_dir.path().join("crash.sh");
    std::fs::write(&script, "exit 3\n").expect("write script");
    let mut config = bridge_config(model_dir.path(), 1, ExecutionMode::Synchronous);
    config.server.executable = Some("sh".into());
    config.server.script = Some(script);
    config.server.init_retry_seconds = 30;
    config.server.eager_start = true;

    let err = ServerPool::with_launcher(&config, Arc::new(CommandLauncher), cluster.connector())
        .err()
        .expect("startup must fail");
    assert!(matches!(
        err,
        Error::Server(ServerError::Supervisor(SupervisorError::ExitedEarly {
            process: 0,
            code: Some(3),
        }))
    ));
}

#[test]
fn launch_arguments_follow_the_server_config() {
    let cluster = FakeCluster::new();
    let (dir, pool) = open_pool(&cluster, 2, ExecutionMode::Threaded);
    pool.start_all().expect("start");

    let mut launches = cluster.launches();
    launches.sort_by_key(|spec| spec.index);
    assert_eq!(launches.len(), 2);
    assert_eq!(
        launches[1].args,
        vec!["hydpy_server.py", "start_server", "18081", "LahnH", "multiple_runs.xml"]
    );
    assert_eq!(launches[1].cwd, dir.path());
    assert_eq!(pool.process_states(), vec![ProcessState::Ready; 2]);
    pool.shutdown();
}

#[test]
fn assignment_is_stable_for_each_pool_size() {
    let cluster = FakeCluster::new();
    for processes in [2, 3] {
        let (_dir, pool) = open_pool(&cluster, processes, ExecutionMode::Synchronous);
        let first: BTreeMap<String, usize> = (0..16)
            .map(|i| {
                let id = format!("member_{i}");
                let process = pool.process_for(&id);
                (id, process)
            })
            .collect();
        for (id, process) in &first {
            assert!(*process < processes);
            assert_eq!(pool.process_for(id), *process);
            assert_eq!(pool.instance(id.clone()).process(), *process);
        }
        pool.shutdown();
    }
    assert!(cluster.launches().is_empty(), "binding instances must not start servers");
}

#[test]
fn round_robin_remembers_its_choices() {
    let cluster = FakeCluster::new();
    let model_dir = tempfile::tempdir().expect("model dir");
    let mut config = bridge_config(model_dir.path(), 2, ExecutionMode::Synchronous);
    config.server.assignment = AssignmentPolicy::RoundRobin;
    let pool = ServerPool::with_launcher(&config, cluster.launcher(), cluster.connector())
        .expect("pool");

    let picks: Vec<usize> = ["a", "b", "c", "a", "b"]
        .iter()
        .map(|id| pool.process_for(id))
        .collect();
    assert_eq!(picks, vec![0, 1, 0, 0, 1]);
    pool.shutdown();
}

#[test]
fn second_initialize_sends_nothing() {
    let cluster = FakeCluster::new();
    let (_dir, pool) = open_pool(&cluster, 1, ExecutionMode::Synchronous);
    let instance = pool.instance("member_0");

    assert!(instance.initialize().expect("first"));
    assert!(!instance.initialize().expect("second"));
    assert_eq!(
        cluster.methods_for("member_0"),
        vec![
            methods::REGISTER_DEFAULTS.join(","),
            methods::REGISTER_SIMULATION_DATES.join(","),
        ]
    );
    pool.shutdown();
}

#[test]
fn queued_failure_surfaces_on_the_next_call() {
    let cluster = FakeCluster::new();
    let (_dir, pool) = open_pool(&cluster, 1, ExecutionMode::Threaded);
    let instance = pool.instance("member_0");
    instance.initialize().expect("initialize");

    cluster.fail_on("POST_register_parameteritemvalues");
    instance
        .submit_item_values(scalar_update(4.0))
        .expect("queueing never fails");

    let err = instance.get_item_values().expect_err("deferred failure");
    assert!(matches!(err, Error::Server(ServerError::Deferred { process: 0, .. })));

    let err = instance.get_item_values().expect_err("still broken");
    assert!(matches!(
        err,
        Error::Server(ServerError::Protocol {
            source: ProtocolError::Desynchronized { .. },
            ..
        })
    ));
    pool.shutdown();
}

#[test]
fn exited_process_fails_fast() {
    let cluster = FakeCluster::new();
    let (_dir, pool) = open_pool(&cluster, 1, ExecutionMode::Synchronous);
    let instance = pool.instance("member_0");
    instance.initialize().expect("initialize");
    let sent = cluster.calls().len();

    cluster.child(0).expect("launched").exit_with(Some(1));
    let err = instance.simulate().expect_err("process is gone");
    assert!(matches!(
        err,
        Error::Server(ServerError::ProcessExited {
            process: 0,
            code: Some(1),
        })
    ));
    assert_eq!(cluster.calls().len(), sent, "nothing may reach a dead server");
    assert_eq!(pool.process_states(), vec![ProcessState::Terminated]);

    let err = instance.get_item_values().expect_err("stays down");
    assert!(matches!(err, Error::Server(ServerError::Unavailable { .. })));
    pool.shutdown();
}

#[test]
fn shutdown_closes_every_started_server() {
    let cluster = FakeCluster::new();
    let (_dir, pool) = open_pool(&cluster, 2, ExecutionMode::Threaded);
    pool.start_all().expect("start");
    pool.shutdown();

    let closed: Vec<usize> = cluster
        .calls()
        .iter()
        .filter(|call| call.phase == Phase::Begin && call.methods == CLOSE_SERVER)
        .map(|call| call.process)
        .collect();
    assert_eq!(closed.len(), 2);
    assert_eq!(pool.process_states(), vec![ProcessState::Terminated; 2]);
    assert!(!cluster.child(0).expect("launched").killed());
}

#[test]
fn dropping_an_open_pool_kills_its_servers() {
    let cluster = FakeCluster::new();
    let (_dir, pool) = open_pool(&cluster, 1, ExecutionMode::Synchronous);
    pool.start_all().expect("start");
    drop(pool);
    assert!(cluster.child(0).expect("launched").killed());
}
