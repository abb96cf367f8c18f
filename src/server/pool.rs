use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use sha2::{Digest, Sha256};

use super::instance::Instance;
use super::process::{ProcessStatus, ServerProcess};
use super::worker::Executor;
use super::{ProcessState, ServerError};
use crate::config::{AssignmentPolicy, BridgeConfig, ExecutionMode, apply_overrides};
use crate::protocol::Catalogue;
use crate::reaper::FileReaper;
use crate::supervisor::{CommandLauncher, Launcher, Supervisor};
use crate::wire::{Connector, HttpConnector};

struct Assignments {
    next: usize,
    known: HashMap<String, usize>,
}

/// N supervised server processes with a fixed instance-to-process mapping.
///
/// Dropping a pool that was not shut down kills every process it started.
pub struct ServerPool {
    policy: AssignmentPolicy,
    executors: Vec<Arc<Executor>>,
    statuses: Vec<Arc<ProcessStatus>>,
    assignments: Mutex<Assignments>,
    reaper: Arc<FileReaper>,
    closed: AtomicBool,
}

impl ServerPool {
    /// Pool spawning real engine processes over HTTP.
    ///
    /// `HYDPY_*` environment overrides are applied here too, so a config
    /// built in code behaves like one read through `config::load`.
    pub fn start(config: &BridgeConfig) -> crate::Result<Self> {
        let config = with_overrides(config, |key| std::env::var(key).ok());
        Self::with_launcher(&config, Arc::new(CommandLauncher), Arc::new(HttpConnector))
    }

    /// Pool over caller-supplied process and transport seams. `config` is
    /// used exactly as given.
    pub fn with_launcher(
        config: &BridgeConfig,
        launcher: Arc<dyn Launcher>,
        connector: Arc<dyn Connector>,
    ) -> crate::Result<Self> {
        config.validate()?;
        let supervisor = Arc::new(Supervisor::new(
            Arc::new(config.server.clone()),
            launcher,
            connector,
        ));
        let items = Arc::new(config.items.clone());

        let mut executors = Vec::with_capacity(config.server.processes);
        let mut statuses = Vec::with_capacity(config.server.processes);
        for index in 0..config.server.processes {
            let status = Arc::new(ProcessStatus::new(index));
            let process = ServerProcess::new(
                index,
                Arc::clone(&supervisor),
                Arc::clone(&items),
                Arc::clone(&status),
            );
            let executor = match config.server.mode {
                ExecutionMode::Synchronous => Executor::synchronous(process),
                ExecutionMode::Threaded => Executor::threaded(process),
            };
            executors.push(Arc::new(executor));
            statuses.push(status);
        }

        let pool = Self {
            policy: config.server.assignment,
            executors,
            statuses,
            assignments: Mutex::new(Assignments {
                next: 0,
                known: HashMap::new(),
            }),
            reaper: Arc::new(FileReaper::start(&config.reaper)),
            closed: AtomicBool::new(false),
        };
        tracing::info!(
            processes = pool.len(),
            mode = ?config.server.mode,
            assignment = ?pool.policy,
            "server pool created"
        );
        if config.server.eager_start {
            pool.start_all()?;
        }
        Ok(pool)
    }

    pub fn len(&self) -> usize {
        self.executors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.executors.is_empty()
    }

    /// Start every process, in parallel when each has its own worker.
    pub fn start_all(&self) -> Result<(), ServerError> {
        let pending: Vec<_> = self
            .executors
            .iter()
            .map(|executor| (executor, executor.start_detached()))
            .collect();
        for (index, (executor, started)) in pending.into_iter().enumerate() {
            match started {
                Some(rx) => rx
                    .recv()
                    .map_err(|_| ServerError::WorkerGone { process: index })??,
                None => executor.start()?,
            }
        }
        Ok(())
    }

    /// Process index serving `id`; stable for the pool's lifetime.
    pub fn process_for(&self, id: &str) -> usize {
        let processes = self.len();
        match self.policy {
            AssignmentPolicy::Hash => hash_assignment(id, processes),
            AssignmentPolicy::RoundRobin => {
                let mut assignments = self
                    .assignments
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner);
                if let Some(index) = assignments.known.get(id) {
                    return *index;
                }
                let index = assignments.next % processes;
                assignments.next += 1;
                assignments.known.insert(id.to_string(), index);
                index
            }
        }
    }

    /// Handle for instance `id`, bound to its process.
    pub fn instance(&self, id: impl Into<String>) -> Instance {
        let id = id.into();
        let process = self.process_for(&id);
        tracing::debug!(instance = %id, process, "instance bound");
        Instance::new(
            id,
            process,
            Arc::clone(&self.executors[process]),
            Arc::clone(&self.reaper),
        )
    }

    /// Item catalogue, read through the first process.
    pub fn catalogue(&self) -> crate::Result<Arc<Catalogue>> {
        Ok(self.executors[0].catalogue()?)
    }

    pub fn process_states(&self) -> Vec<ProcessState> {
        self.statuses.iter().map(|status| status.state()).collect()
    }

    pub fn reaper(&self) -> &FileReaper {
        &self.reaper
    }

    /// Drain queued calls, close every server, then kill what is left.
    pub fn shutdown(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        for executor in &self.executors {
            executor.shutdown();
        }
        for status in &self.statuses {
            status.kill();
        }
        self.reaper.shutdown();
        tracing::info!(processes = self.len(), "server pool shut down");
    }

    /// Kill every process now, without waiting for queued calls.
    pub fn kill(&self) {
        self.closed.store(true, Ordering::SeqCst);
        for status in &self.statuses {
            status.kill();
        }
    }
}

impl Drop for ServerPool {
    fn drop(&mut self) {
        if !self.closed.load(Ordering::SeqCst) {
            tracing::warn!("server pool dropped without shutdown; killing processes");
            self.kill();
        }
    }
}

fn with_overrides(
    config: &BridgeConfig,
    lookup: impl Fn(&str) -> Option<String>,
) -> BridgeConfig {
    let mut config = config.clone();
    apply_overrides(&mut config, lookup);
    config
}

/// First eight bytes of SHA-256 of the id, modulo the pool size.
fn hash_assignment(id: &str, processes: usize) -> usize {
    let digest = Sha256::digest(id.as_bytes());
    let mut prefix = [0u8; 8];
    prefix.copy_from_slice(&digest[..8]);
    (u64::from_be_bytes(prefix) % processes.max(1) as u64) as usize
}
