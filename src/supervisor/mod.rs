//! Process supervisor: spawn a server, wait until it answers, kill it.

mod launch;

use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread;
use std::time::{Duration, Instant};

use thiserror::Error;

use crate::config::ServerConfig;
use crate::error::{Effect, Transience};
use crate::version::{SUPPORTED_ENGINE_VERSION, Version, warn_if_incompatible};
use crate::wire::{Connector, Endpoint, Transport};

pub use launch::{
    ChildProcess, CommandLauncher, ExitInfo, LaunchSpec, Launcher, OutputTarget, START_SERVER,
};

const EXIT_POLL_INTERVAL: Duration = Duration::from_millis(50);

#[derive(Error, Debug)]
#[non_exhaustive]
pub enum SupervisorError {
    #[error("missing required setting `{0}`")]
    MissingSetting(&'static str),

    #[error("failed to spawn `{command}`: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("cannot open server log {path}: {source}")]
    LogFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("server process {process} exited before becoming ready (exit code {code:?})")]
    ExitedEarly { process: usize, code: Option<i32> },

    #[error("server process {process} not ready after {attempts} status probes")]
    StartupTimeout { process: usize, attempts: u64 },

    #[error("cannot query server process {process}: {source}")]
    Wait {
        process: usize,
        #[source]
        source: std::io::Error,
    },

    #[error("cannot kill server process {process}: {source}")]
    Kill {
        process: usize,
        #[source]
        source: std::io::Error,
    },
}

impl SupervisorError {
    pub fn transience(&self) -> Transience {
        match self {
            SupervisorError::MissingSetting(_) | SupervisorError::LogFile { .. } => {
                Transience::Permanent
            }
            SupervisorError::StartupTimeout { .. } => Transience::Retryable,
            _ => Transience::Unknown,
        }
    }

    /// Startup failures leave no process behind; the half-started one is killed.
    pub fn effect(&self) -> Effect {
        Effect::None
    }
}

/// Shared handle to one spawned server process.
///
/// Clones share the child, so a pool can kill a process while its worker
/// is blocked in a request.
#[derive(Clone)]
pub struct ProcessHandle {
    index: usize,
    pid: u32,
    child: Arc<Mutex<Box<dyn ChildProcess>>>,
}

impl std::fmt::Debug for ProcessHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProcessHandle")
            .field("index", &self.index)
            .field("pid", &self.pid)
            .finish()
    }
}

impl ProcessHandle {
    pub fn new(index: usize, child: Box<dyn ChildProcess>) -> Self {
        Self {
            index,
            pid: child.id(),
            child: Arc::new(Mutex::new(child)),
        }
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn pid(&self) -> u32 {
        self.pid
    }

    fn lock(&self) -> MutexGuard<'_, Box<dyn ChildProcess>> {
        self.child.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// `Some` once the process has exited.
    pub fn exit_status(&self) -> Result<Option<ExitInfo>, SupervisorError> {
        self.lock()
            .try_wait()
            .map_err(|source| SupervisorError::Wait {
                process: self.index,
                source,
            })
    }

    /// Force-terminate; a no-op when the process is already gone.
    pub fn kill(&self) -> Result<(), SupervisorError> {
        let mut child = self.lock();
        if let Ok(Some(_)) = child.try_wait() {
            return Ok(());
        }
        tracing::warn!(process = self.index, pid = self.pid, "killing server process");
        child.kill().map_err(|source| SupervisorError::Kill {
            process: self.index,
            source,
        })
    }

    /// Poll for exit until `grace` elapses; `true` if the process is gone.
    pub fn wait_for_exit(&self, grace: Duration) -> bool {
        let deadline = Instant::now() + grace;
        loop {
            if matches!(self.exit_status(), Ok(Some(_))) {
                return true;
            }
            if Instant::now() >= deadline {
                return false;
            }
            thread::sleep(EXIT_POLL_INTERVAL);
        }
    }
}

/// A server that answered its status probe, with a transport bound to it.
pub struct StartedServer {
    pub handle: ProcessHandle,
    pub endpoint: Endpoint,
    pub transport: Box<dyn Transport>,
}

/// Starts and stops server processes for one configuration.
pub struct Supervisor {
    config: Arc<ServerConfig>,
    launcher: Arc<dyn Launcher>,
    connector: Arc<dyn Connector>,
}

impl Supervisor {
    pub fn new(
        config: Arc<ServerConfig>,
        launcher: Arc<dyn Launcher>,
        connector: Arc<dyn Connector>,
    ) -> Self {
        Self {
            config,
            launcher,
            connector,
        }
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Spawn process `index` and wait until its status endpoint reports ready.
    ///
    /// A process that exits while starting fails the call at once; one that
    /// never becomes ready is killed before the timeout is returned.
    pub fn start(&self, index: usize) -> Result<StartedServer, SupervisorError> {
        let spec = LaunchSpec::from_config(&self.config, index)?;
        let endpoint = Endpoint::new(self.config.host.clone(), self.config.port_for(index));
        tracing::info!(
            process = index,
            endpoint = %endpoint,
            command = %spec.command_line(),
            "starting server process"
        );

        let handle = ProcessHandle::new(index, self.launcher.launch(&spec)?);
        let transport = self
            .connector
            .connect(&endpoint, self.config.request_timeout());

        if let Err(err) = self.await_ready(&handle, transport.as_ref()) {
            if let Err(kill_err) = handle.kill() {
                tracing::warn!(process = index, error = %kill_err, "kill after failed startup failed");
            }
            return Err(err);
        }

        self.check_version(index, transport.as_ref());
        tracing::info!(process = index, pid = handle.pid(), endpoint = %endpoint, "server process ready");
        Ok(StartedServer {
            handle,
            endpoint,
            transport,
        })
    }

    fn await_ready(
        &self,
        handle: &ProcessHandle,
        transport: &dyn Transport,
    ) -> Result<(), SupervisorError> {
        let attempts = self.config.startup_attempts();
        let interval = self.config.status_poll_interval();
        let timeout = self.config.status_timeout();

        for attempt in 1..=attempts {
            if let Some(exit) = handle.exit_status()? {
                return Err(SupervisorError::ExitedEarly {
                    process: handle.index(),
                    code: exit.code,
                });
            }
            match transport.status(timeout) {
                Ok(true) => return Ok(()),
                Ok(false) => {
                    tracing::trace!(process = handle.index(), attempt, "server not ready yet");
                }
                Err(err) => {
                    tracing::trace!(process = handle.index(), attempt, error = %err, "status probe failed");
                }
            }
            thread::sleep(interval);
        }
        Err(SupervisorError::StartupTimeout {
            process: handle.index(),
            attempts,
        })
    }

    /// Compare the engine version against ours; mismatches only warn.
    fn check_version(&self, index: usize, transport: &dyn Transport) {
        let raw = self
            .config
            .expected_version
            .as_deref()
            .unwrap_or(SUPPORTED_ENGINE_VERSION);
        let expected = match raw.parse::<Version>() {
            Ok(expected) => expected,
            Err(err) => {
                tracing::warn!(process = index, error = %err, "ignoring unparsable expected version");
                return;
            }
        };
        match transport.version(self.config.status_timeout()) {
            Ok(reported) => warn_if_incompatible(index, &expected, &reported),
            Err(err) => {
                tracing::warn!(process = index, error = %err, "could not query engine version");
            }
        }
    }

    /// Ask the server to close, then make sure the process is gone.
    ///
    /// Failures are logged; shutting down never fails the caller.
    pub fn shutdown(&self, handle: &ProcessHandle, transport: &dyn Transport) {
        if matches!(handle.exit_status(), Ok(Some(_))) {
            return;
        }
        match transport.close() {
            Ok(()) => {
                tracing::debug!(process = handle.index(), "close request accepted");
            }
            Err(err) => {
                tracing::warn!(process = handle.index(), error = %err, "graceful server shutdown failed");
            }
        }
        if !handle.wait_for_exit(self.config.shutdown_grace())
            && let Err(err) = handle.kill()
        {
            tracing::warn!(process = handle.index(), error = %err, "kill after shutdown failed");
        }
    }
}
