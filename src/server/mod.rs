//! Instance multiplexer and server pool.
//!
//! Provides:
//! - `ServerPool` - N supervised server processes and instance assignment
//! - `Instance` - one logical simulation run bound to one process
//! - `ProcessState` - the lifecycle each process moves through
//!
//! Every call against one process runs strictly one at a time, in
//! submission order: under a mutex in synchronous mode, on the process's
//! own worker thread in threaded mode.

mod instance;
mod pool;
mod process;
mod worker;

use std::fmt;

use thiserror::Error;

use crate::error::{Effect, Transience};
use crate::protocol::ProtocolError;
use crate::supervisor::SupervisorError;

pub use instance::Instance;
pub use pool::ServerPool;

/// Lifecycle of one server process.
///
/// `Unstarted -> Starting -> Ready <-> Busy -> ShuttingDown -> Terminated`;
/// `Killed` is reachable from any state that is not yet `Terminated`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessState {
    Unstarted,
    Starting,
    Ready,
    Busy,
    ShuttingDown,
    Terminated,
    Killed,
}

impl ProcessState {
    pub fn as_str(self) -> &'static str {
        match self {
            ProcessState::Unstarted => "unstarted",
            ProcessState::Starting => "starting",
            ProcessState::Ready => "ready",
            ProcessState::Busy => "busy",
            ProcessState::ShuttingDown => "shutting_down",
            ProcessState::Terminated => "terminated",
            ProcessState::Killed => "killed",
        }
    }

    /// No further calls can succeed.
    pub fn is_final(self) -> bool {
        matches!(
            self,
            ProcessState::ShuttingDown | ProcessState::Terminated | ProcessState::Killed
        )
    }
}

impl fmt::Display for ProcessState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Error, Debug)]
#[non_exhaustive]
pub enum ServerError {
    #[error(transparent)]
    Supervisor(#[from] SupervisorError),

    #[error("server process {process}: {source}")]
    Protocol {
        process: usize,
        #[source]
        source: ProtocolError,
    },

    #[error("server process {process} exited unexpectedly (exit code {code:?})")]
    ProcessExited { process: usize, code: Option<i32> },

    #[error("server process {process} is {state}: {reason}")]
    Unavailable {
        process: usize,
        state: ProcessState,
        reason: String,
    },

    #[error("an earlier queued call on server process {process} failed: {source}")]
    Deferred {
        process: usize,
        #[source]
        source: Box<ServerError>,
    },

    #[error("worker of server process {process} is gone")]
    WorkerGone { process: usize },
}

impl ServerError {
    pub fn transience(&self) -> Transience {
        match self {
            ServerError::Supervisor(e) => e.transience(),
            ServerError::Protocol { source, .. } => source.transience(),
            _ => Transience::Permanent,
        }
    }

    pub fn effect(&self) -> Effect {
        match self {
            ServerError::Supervisor(e) => e.effect(),
            ServerError::Protocol { source, .. } => source.effect(),
            ServerError::Deferred { source, .. } => source.effect(),
            ServerError::ProcessExited { .. } | ServerError::WorkerGone { .. } => Effect::Unknown,
            ServerError::Unavailable { .. } => Effect::None,
        }
    }

    pub fn process(&self) -> Option<usize> {
        match self {
            ServerError::Supervisor(_) => None,
            ServerError::Protocol { process, .. }
            | ServerError::ProcessExited { process, .. }
            | ServerError::Unavailable { process, .. }
            | ServerError::Deferred { process, .. }
            | ServerError::WorkerGone { process } => Some(*process),
        }
    }
}
