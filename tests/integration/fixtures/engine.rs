#![allow(dead_code)]

//! In-process stand-in for a pool of engine servers.
//!
//! Every round trip is logged as a begin/end pair so tests can check what
//! reached which process, in which order, and whether calls overlapped.

use std::collections::HashMap;
use std::io;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread;
use std::time::Duration;

use hydpy_bridge::protocol::methods;
use hydpy_bridge::supervisor::{ChildProcess, ExitInfo, LaunchSpec, Launcher, SupervisorError};
use hydpy_bridge::version::Version;
use hydpy_bridge::wire::{Connector, Endpoint, Properties, Transport, WireError};

pub const BASE_PORT: u16 = 18_080;
pub const FIRST: &str = "1996-01-01T00:00:00+01:00";
pub const LAST: &str = "1996-01-05T00:00:00+01:00";
pub const CLOSE_SERVER: &str = "close_server";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Begin,
    End,
}

#[derive(Debug, Clone)]
pub struct Call {
    pub process: usize,
    pub instance: Option<String>,
    pub methods: String,
    pub body: Properties,
    pub phase: Phase,
}

#[derive(Debug)]
pub struct FakeChildState {
    pub index: usize,
    pub pid: u32,
    exit: Mutex<Option<ExitInfo>>,
    killed: Mutex<bool>,
}

impl FakeChildState {
    pub fn killed(&self) -> bool {
        *lock(&self.killed)
    }

    pub fn exit_with(&self, code: Option<i32>) {
        *lock(&self.exit) = Some(ExitInfo { code });
    }
}

struct FakeChild(Arc<FakeChildState>);

impl ChildProcess for FakeChild {
    fn id(&self) -> u32 {
        self.0.pid
    }

    fn try_wait(&mut self) -> io::Result<Option<ExitInfo>> {
        Ok(*lock(&self.0.exit))
    }

    fn kill(&mut self) -> io::Result<()> {
        *lock(&self.0.killed) = true;
        lock(&self.0.exit).get_or_insert(ExitInfo { code: None });
        Ok(())
    }
}

pub struct FakeCluster {
    calls: Mutex<Vec<Call>>,
    registers: Mutex<HashMap<(usize, String), Properties>>,
    children: Mutex<Vec<Arc<FakeChildState>>>,
    launches: Mutex<Vec<LaunchSpec>>,
    probes: Mutex<HashMap<usize, u32>>,
    fail_on: Mutex<Option<String>>,
    exit_on_launch: Mutex<Option<i32>>,
    ready_after: Option<u32>,
    latency: Duration,
    next_pid: AtomicU32,
}

impl FakeCluster {
    /// Servers that answer their second status probe.
    pub fn new() -> Arc<Self> {
        Self::with(Some(1), Duration::from_millis(2))
    }

    /// Servers whose status probe never reports ready.
    pub fn never_ready() -> Arc<Self> {
        Self::with(None, Duration::ZERO)
    }

    pub fn with(ready_after: Option<u32>, latency: Duration) -> Arc<Self> {
        Arc::new(Self {
            calls: Mutex::new(Vec::new()),
            registers: Mutex::new(HashMap::new()),
            children: Mutex::new(Vec::new()),
            launches: Mutex::new(Vec::new()),
            probes: Mutex::new(HashMap::new()),
            fail_on: Mutex::new(None),
            exit_on_launch: Mutex::new(None),
            ready_after,
            latency,
            next_pid: AtomicU32::new(40_000),
        })
    }

    pub fn launcher(self: &Arc<Self>) -> Arc<dyn Launcher> {
        Arc::new(FakeLauncher(Arc::clone(self)))
    }

    pub fn connector(self: &Arc<Self>) -> Arc<dyn Connector> {
        Arc::new(FakeConnector(Arc::clone(self)))
    }

    pub fn transport(self: &Arc<Self>, process: usize) -> Box<dyn Transport> {
        Box::new(FakeTransport {
            process,
            cluster: Arc::clone(self),
        })
    }

    /// Answer every round trip containing `token` with HTTP 500.
    pub fn fail_on(&self, token: &str) {
        *lock(&self.fail_on) = Some(token.to_string());
    }

    /// Children launched from now on exit with `code` before the first status check.
    pub fn exit_on_launch(&self, code: i32) {
        *lock(&self.exit_on_launch) = Some(code);
    }

    pub fn calls(&self) -> Vec<Call> {
        lock(&self.calls).clone()
    }

    /// Method lists sent for `instance`, in arrival order.
    pub fn methods_for(&self, instance: &str) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter(|call| call.phase == Phase::Begin && call.instance.as_deref() == Some(instance))
            .map(|call| call.methods)
            .collect()
    }

    /// Last body posted for `instance` with `tokens`.
    pub fn last_body(&self, instance: &str, tokens: &[&str]) -> Option<Properties> {
        let wanted = tokens.join(",");
        self.calls()
            .into_iter()
            .rev()
            .find(|call| {
                call.phase == Phase::Begin
                    && call.instance.as_deref() == Some(instance)
                    && call.methods == wanted
            })
            .map(|call| call.body)
    }

    pub fn launches(&self) -> Vec<LaunchSpec> {
        lock(&self.launches).clone()
    }

    /// Most recently launched child for `process`.
    pub fn child(&self, process: usize) -> Option<Arc<FakeChildState>> {
        lock(&self.children)
            .iter()
            .rev()
            .find(|child| child.index == process)
            .cloned()
    }

    fn record(&self, process: usize, instance: Option<&str>, methods: &str, body: &Properties, phase: Phase) {
        lock(&self.calls).push(Call {
            process,
            instance: instance.map(str::to_string),
            methods: methods.to_string(),
            body: body.clone(),
            phase,
        });
    }

    fn execute(
        &self,
        process: usize,
        instance: Option<&str>,
        tokens: &[&str],
        body: &Properties,
    ) -> Result<Properties, WireError> {
        let joined = tokens.join(",");
        self.record(process, instance, &joined, body, Phase::Begin);
        thread::sleep(self.latency);
        let result = self.respond(process, instance, tokens, body);
        self.record(process, instance, &joined, body, Phase::End);
        result
    }

    fn respond(
        &self,
        process: usize,
        instance: Option<&str>,
        tokens: &[&str],
        body: &Properties,
    ) -> Result<Properties, WireError> {
        if let Some(token) = lock(&self.fail_on).as_deref()
            && tokens.contains(&token)
        {
            return Err(WireError::Status {
                url: format!("http://127.0.0.1:{}/execute", port(process)),
                status: 500,
            });
        }

        let Some(instance) = instance else {
            return Ok(if tokens == methods::QUERY_ITEM_TYPES {
                item_types()
            } else if tokens == methods::QUERY_ITEM_SUBNAMES {
                item_subnames()
            } else if tokens == methods::QUERY_FIXED_ITEMS {
                initial_values()
            } else {
                Properties::new()
            });
        };

        let mut registers = lock(&self.registers);
        let key = (process, instance.to_string());
        if tokens == methods::REGISTER_DEFAULTS {
            registers.insert(key, default_registers());
            return Ok(Properties::new());
        }
        let own = registers.entry(key).or_insert_with(default_registers);
        for (item, value) in body.iter() {
            own.insert(item, value);
        }
        if tokens == methods::GET_ITEM_VALUES {
            return Ok(own.clone());
        }
        Ok(Properties::new())
    }

    fn status(&self, process: usize) -> bool {
        let mut probes = lock(&self.probes);
        let seen = probes.entry(process).or_default();
        *seen += 1;
        self.ready_after.is_some_and(|after| *seen > after)
    }

    fn close(&self, process: usize) {
        let empty = Properties::new();
        self.record(process, None, CLOSE_SERVER, &empty, Phase::Begin);
        if let Some(child) = self.child(process) {
            child.exit_with(Some(0));
        }
        self.record(process, None, CLOSE_SERVER, &empty, Phase::End);
    }
}

struct FakeLauncher(Arc<FakeCluster>);

impl Launcher for FakeLauncher {
    fn launch(&self, spec: &LaunchSpec) -> Result<Box<dyn ChildProcess>, SupervisorError> {
        let state = Arc::new(FakeChildState {
            index: spec.index,
            pid: self.0.next_pid.fetch_add(1, Ordering::SeqCst),
            exit: Mutex::new(
                (*lock(&self.0.exit_on_launch)).map(|code| ExitInfo { code: Some(code) }),
            ),
            killed: Mutex::new(false),
        });
        lock(&self.0.launches).push(spec.clone());
        lock(&self.0.children).push(Arc::clone(&state));
        Ok(Box::new(FakeChild(state)))
    }
}

struct FakeConnector(Arc<FakeCluster>);

impl Connector for FakeConnector {
    fn connect(&self, endpoint: &Endpoint, _request_timeout: Duration) -> Box<dyn Transport> {
        self.0.transport(usize::from(endpoint.port - BASE_PORT))
    }
}

struct FakeTransport {
    process: usize,
    cluster: Arc<FakeCluster>,
}

impl Transport for FakeTransport {
    fn get(&self, id: Option<&str>, methods: &[&str]) -> Result<Properties, WireError> {
        self.cluster
            .execute(self.process, id, methods, &Properties::new())
    }

    fn post(
        &self,
        id: Option<&str>,
        methods: &[&str],
        body: &Properties,
    ) -> Result<Properties, WireError> {
        self.cluster.execute(self.process, id, methods, body)
    }

    fn status(&self, _timeout: Duration) -> Result<bool, WireError> {
        Ok(self.cluster.status(self.process))
    }

    fn version(&self, _timeout: Duration) -> Result<Version, WireError> {
        Ok(Version::new(6, 0, 0))
    }

    fn close(&self) -> Result<(), WireError> {
        self.cluster.close(self.process);
        Ok(())
    }
}

fn port(process: usize) -> u16 {
    BASE_PORT + process as u16
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn item_types() -> Properties {
    let mut props = Properties::new();
    props.insert("alpha", "Double0D");
    props.insert("sm", "Double1D(2)");
    props.insert("q", "TimeSeries0D");
    props.insert("qout", "TimeSeries0D");
    props.insert("inflow", "TimeSeries1D(2)");
    props
}

fn item_subnames() -> Properties {
    let mut props = Properties::new();
    props.insert("inflow", "['lahn_1', 'lahn_2']");
    props
}

fn initial_values() -> Properties {
    let mut props = default_registers();
    props.remove("firstdate_sim");
    props.remove("lastdate_sim");
    props.insert("firstdate_init", FIRST);
    props.insert("lastdate_init", LAST);
    props
}

fn default_registers() -> Properties {
    let mut props = Properties::new();
    props.insert("firstdate_sim", FIRST);
    props.insert("lastdate_sim", LAST);
    props.insert("stepsize", "1d");
    props.insert("alpha", "2.0");
    props.insert("sm", "[100.0, 120.0]");
    props.insert("q", "[1.0, 2.0, 3.0, 4.0]");
    props.insert("qout", "[0.0, 0.0, 0.0, 0.0]");
    props.insert("inflow", "[[1.0, 10.0], [2.0, 20.0], [3.0, 30.0], [4.0, 40.0]]");
    props
}
