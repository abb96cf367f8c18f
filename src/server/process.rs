use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use super::{ProcessState, ServerError};
use crate::config::ItemsConfig;
use crate::protocol::{ProtocolCaller, ProtocolError};
use crate::supervisor::{ProcessHandle, Supervisor};

#[derive(Debug)]
struct StatusInner {
    state: ProcessState,
    handle: Option<ProcessHandle>,
}

/// State and child handle of one process, shared with the pool so it can
/// report and kill without waiting for the executor.
#[derive(Debug)]
pub(crate) struct ProcessStatus {
    index: usize,
    inner: Mutex<StatusInner>,
}

impl ProcessStatus {
    pub(crate) fn new(index: usize) -> Self {
        Self {
            index,
            inner: Mutex::new(StatusInner {
                state: ProcessState::Unstarted,
                handle: None,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, StatusInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn state(&self) -> ProcessState {
        self.lock().state
    }

    fn transition(&self, next: ProcessState) {
        let mut inner = self.lock();
        if inner.state == ProcessState::Killed || inner.state == next {
            return;
        }
        tracing::trace!(process = self.index, from = %inner.state, to = %next, "process state");
        inner.state = next;
    }

    fn attach(&self, handle: ProcessHandle) {
        self.lock().handle = Some(handle);
    }

    /// Force-kill the process, whatever the executor is doing.
    pub(crate) fn kill(&self) {
        let handle = {
            let mut inner = self.lock();
            if inner.state == ProcessState::Terminated || inner.state == ProcessState::Killed {
                return;
            }
            inner.state = ProcessState::Killed;
            inner.handle.clone()
        };
        if let Some(handle) = handle
            && let Err(err) = handle.kill()
        {
            tracing::warn!(process = self.index, error = %err, "kill failed");
        }
    }
}

/// Executes operations against one server process.
///
/// Not thread-safe by itself; the synchronous executor wraps it in a mutex
/// and the threaded executor gives it to exactly one worker thread.
pub(crate) struct ServerProcess {
    index: usize,
    supervisor: Arc<Supervisor>,
    items: Arc<ItemsConfig>,
    status: Arc<ProcessStatus>,
    caller: Option<ProtocolCaller>,
    handle: Option<ProcessHandle>,
    deferred: Option<ServerError>,
    failure: Option<String>,
}

impl ServerProcess {
    pub(crate) fn new(
        index: usize,
        supervisor: Arc<Supervisor>,
        items: Arc<ItemsConfig>,
        status: Arc<ProcessStatus>,
    ) -> Self {
        Self {
            index,
            supervisor,
            items,
            status,
            caller: None,
            handle: None,
            deferred: None,
            failure: None,
        }
    }

    pub(crate) fn index(&self) -> usize {
        self.index
    }

    /// Start the server unless it already runs.
    pub(crate) fn start(&mut self) -> Result<(), ServerError> {
        self.ensure_available()?;
        if self.caller.is_some() {
            return Ok(());
        }

        self.status.transition(ProcessState::Starting);
        let started = match self.supervisor.start(self.index) {
            Ok(started) => started,
            Err(err) => {
                self.fail(ProcessState::Killed, err.to_string());
                return Err(err.into());
            }
        };
        self.status.attach(started.handle.clone());
        self.handle = Some(started.handle.clone());

        match ProtocolCaller::connect(self.index, started.transport, &self.items) {
            Ok(caller) => {
                self.caller = Some(caller);
                self.status.transition(ProcessState::Ready);
                Ok(())
            }
            Err(source) => {
                if let Err(err) = started.handle.kill() {
                    tracing::warn!(process = self.index, error = %err, "kill after failed discovery failed");
                }
                self.fail(ProcessState::Killed, source.to_string());
                Err(ServerError::Protocol {
                    process: self.index,
                    source,
                })
            }
        }
    }

    /// Run one operation, starting the server on first use.
    pub(crate) fn execute<T>(
        &mut self,
        op: impl FnOnce(&mut ProtocolCaller) -> Result<T, ProtocolError>,
    ) -> Result<T, ServerError> {
        if let Some(earlier) = self.deferred.take() {
            return Err(ServerError::Deferred {
                process: self.index,
                source: Box::new(earlier),
            });
        }
        self.start()?;
        self.check_alive()?;

        let Some(caller) = self.caller.as_mut() else {
            return Err(self.unavailable());
        };
        self.status.transition(ProcessState::Busy);
        let result = op(caller);
        self.status.transition(ProcessState::Ready);
        result.map_err(|source| ServerError::Protocol {
            process: self.index,
            source,
        })
    }

    /// Run an operation nobody waits for; a failure is reported by the next
    /// call on this process.
    pub(crate) fn execute_detached<T>(
        &mut self,
        op: impl FnOnce(&mut ProtocolCaller) -> Result<T, ProtocolError>,
    ) {
        if let Err(err) = self.execute(op) {
            tracing::error!(process = self.index, error = %err, "queued call failed");
            if self.deferred.is_none() {
                self.deferred = Some(err);
            }
        }
    }

    /// Close the server gracefully, then make sure it is gone.
    pub(crate) fn shutdown(&mut self) {
        if self.status.state() == ProcessState::Killed {
            self.caller = None;
            return;
        }
        self.status.transition(ProcessState::ShuttingDown);
        if let (Some(caller), Some(handle)) = (self.caller.take(), self.handle.as_ref()) {
            self.supervisor.shutdown(handle, caller.transport());
        }
        self.status.transition(ProcessState::Terminated);
        tracing::info!(process = self.index, "server process shut down");
    }

    fn ensure_available(&self) -> Result<(), ServerError> {
        if self.status.state().is_final() {
            return Err(self.unavailable());
        }
        Ok(())
    }

    /// Fail fast once the child has exited instead of talking to a dead port.
    fn check_alive(&mut self) -> Result<(), ServerError> {
        let Some(handle) = self.handle.as_ref() else {
            return Ok(());
        };
        match handle.exit_status() {
            Ok(None) => Ok(()),
            Ok(Some(exit)) => {
                tracing::error!(process = self.index, code = ?exit.code, "server process exited");
                self.caller = None;
                self.fail(
                    ProcessState::Terminated,
                    format!("process exited with code {:?}", exit.code),
                );
                Err(ServerError::ProcessExited {
                    process: self.index,
                    code: exit.code,
                })
            }
            Err(err) => Err(err.into()),
        }
    }

    fn fail(&mut self, state: ProcessState, reason: String) {
        self.failure = Some(reason);
        self.status.transition(state);
    }

    fn unavailable(&self) -> ServerError {
        ServerError::Unavailable {
            process: self.index,
            state: self.status.state(),
            reason: self
                .failure
                .clone()
                .unwrap_or_else(|| "server is not running".to_string()),
        }
    }
}
