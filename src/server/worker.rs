//! Per-process executors.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};

use crossbeam::channel::{Receiver, Sender};

use super::ServerError;
use super::process::ServerProcess;
use crate::items::ItemValues;
use crate::protocol::{Catalogue, ProtocolCaller, TimeGrid};

type Respond<T> = Sender<Result<T, ServerError>>;

enum ServerOp {
    Start {
        respond: Respond<()>,
    },
    Initialize {
        id: String,
        respond: Respond<bool>,
    },
    Get {
        id: String,
        respond: Respond<ItemValues>,
    },
    /// `respond: None` is fire-and-forget.
    Set {
        id: String,
        values: ItemValues,
        respond: Option<Respond<()>>,
    },
    Simulate {
        id: String,
        respond: Option<Respond<()>>,
    },
    Catalogue {
        respond: Respond<Arc<Catalogue>>,
    },
    Horizon {
        respond: Respond<TimeGrid>,
    },
    Window {
        id: String,
        respond: Respond<Option<TimeGrid>>,
    },
    Shutdown,
}

/// A server process's dedicated thread and the queue feeding it.
pub(crate) struct WorkerHandle {
    index: usize,
    tx: Sender<ServerOp>,
    thread: Mutex<Option<JoinHandle<()>>>,
}

impl WorkerHandle {
    pub(crate) fn start(process: ServerProcess) -> Self {
        let index = process.index();
        let (tx, rx) = crossbeam::channel::unbounded();
        let thread = thread::Builder::new()
            .name(format!("hydpy-server-{index}"))
            .spawn(move || run_server_loop(process, rx))
            .expect("spawn server worker");
        Self {
            index,
            tx,
            thread: Mutex::new(Some(thread)),
        }
    }

    fn send(&self, op: ServerOp) -> Result<(), ServerError> {
        self.tx
            .send(op)
            .map_err(|_| ServerError::WorkerGone {
                process: self.index,
            })
    }

    fn call<T>(&self, make: impl FnOnce(Respond<T>) -> ServerOp) -> Result<T, ServerError> {
        let (respond, rx) = crossbeam::channel::bounded(1);
        self.send(make(respond))?;
        rx.recv().map_err(|_| ServerError::WorkerGone {
            process: self.index,
        })?
    }

    fn shutdown(&self) {
        let _ = self.tx.send(ServerOp::Shutdown);
        let thread = self
            .thread
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(thread) = thread
            && thread.join().is_err()
        {
            tracing::error!(process = self.index, "server worker panicked");
        }
    }
}

fn run_server_loop(mut process: ServerProcess, rx: Receiver<ServerOp>) {
    for op in rx {
        match op {
            ServerOp::Start { respond } => {
                let _ = respond.send(process.start());
            }
            ServerOp::Initialize { id, respond } => {
                let _ = respond.send(process.execute(|caller| caller.initialize(&id)));
            }
            ServerOp::Get { id, respond } => {
                let _ = respond.send(process.execute(|caller| caller.get_item_values(&id)));
            }
            ServerOp::Set {
                id,
                values,
                respond,
            } => {
                let op = |caller: &mut ProtocolCaller| {
                    caller.set_item_values(&id, &values)
                };
                match respond {
                    Some(respond) => {
                        let _ = respond.send(process.execute(op));
                    }
                    None => process.execute_detached(op),
                }
            }
            ServerOp::Simulate { id, respond } => {
                let op = |caller: &mut ProtocolCaller| caller.simulate(&id);
                match respond {
                    Some(respond) => {
                        let _ = respond.send(process.execute(op));
                    }
                    None => process.execute_detached(op),
                }
            }
            ServerOp::Catalogue { respond } => {
                let _ = respond.send(process.execute(|caller| Ok(caller.catalogue())));
            }
            ServerOp::Horizon { respond } => {
                let _ = respond.send(process.execute(|caller| Ok(caller.time_horizon())));
            }
            ServerOp::Window { id, respond } => {
                let _ = respond.send(process.execute(|caller| Ok(caller.window(&id))));
            }
            ServerOp::Shutdown => break,
        }
    }
    process.shutdown();
}

/// How calls reach one server process.
pub(crate) enum Executor {
    /// Caller threads take turns under the lock.
    Synchronous { process: Mutex<ServerProcess> },
    /// One worker thread drains a FIFO queue.
    Threaded(WorkerHandle),
}

impl Executor {
    pub(crate) fn synchronous(process: ServerProcess) -> Self {
        Executor::Synchronous {
            process: Mutex::new(process),
        }
    }

    pub(crate) fn threaded(process: ServerProcess) -> Self {
        Executor::Threaded(WorkerHandle::start(process))
    }

    fn locked(process: &Mutex<ServerProcess>) -> MutexGuard<'_, ServerProcess> {
        process.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn start(&self) -> Result<(), ServerError> {
        match self {
            Executor::Synchronous { process } => Self::locked(process).start(),
            Executor::Threaded(worker) => worker.call(|respond| ServerOp::Start { respond }),
        }
    }

    /// Queue a start without waiting; pair with `start` to wait for it.
    pub(crate) fn start_detached(&self) -> Option<Receiver<Result<(), ServerError>>> {
        match self {
            Executor::Synchronous { .. } => None,
            Executor::Threaded(worker) => {
                let (respond, rx) = crossbeam::channel::bounded(1);
                worker.send(ServerOp::Start { respond }).ok()?;
                Some(rx)
            }
        }
    }

    pub(crate) fn initialize(&self, id: &str) -> Result<bool, ServerError> {
        match self {
            Executor::Synchronous { process } => {
                Self::locked(process).execute(|caller| caller.initialize(id))
            }
            Executor::Threaded(worker) => worker.call(|respond| ServerOp::Initialize {
                id: id.to_string(),
                respond,
            }),
        }
    }

    pub(crate) fn get_item_values(&self, id: &str) -> Result<ItemValues, ServerError> {
        match self {
            Executor::Synchronous { process } => {
                Self::locked(process).execute(|caller| caller.get_item_values(id))
            }
            Executor::Threaded(worker) => worker.call(|respond| ServerOp::Get {
                id: id.to_string(),
                respond,
            }),
        }
    }

    /// With `wait = false` the threaded executor only queues the call.
    pub(crate) fn set_item_values(
        &self,
        id: &str,
        values: ItemValues,
        wait: bool,
    ) -> Result<(), ServerError> {
        match self {
            Executor::Synchronous { process } => {
                Self::locked(process).execute(|caller| caller.set_item_values(id, &values))
            }
            Executor::Threaded(worker) if wait => worker.call(|respond| ServerOp::Set {
                id: id.to_string(),
                values,
                respond: Some(respond),
            }),
            Executor::Threaded(worker) => worker.send(ServerOp::Set {
                id: id.to_string(),
                values,
                respond: None,
            }),
        }
    }

    pub(crate) fn simulate(&self, id: &str, wait: bool) -> Result<(), ServerError> {
        match self {
            Executor::Synchronous { process } => {
                Self::locked(process).execute(|caller| caller.simulate(id))
            }
            Executor::Threaded(worker) if wait => worker.call(|respond| ServerOp::Simulate {
                id: id.to_string(),
                respond: Some(respond),
            }),
            Executor::Threaded(worker) => worker.send(ServerOp::Simulate {
                id: id.to_string(),
                respond: None,
            }),
        }
    }

    pub(crate) fn catalogue(&self) -> Result<Arc<Catalogue>, ServerError> {
        match self {
            Executor::Synchronous { process } => {
                Self::locked(process).execute(|caller| Ok(caller.catalogue()))
            }
            Executor::Threaded(worker) => worker.call(|respond| ServerOp::Catalogue { respond }),
        }
    }

    pub(crate) fn time_horizon(&self) -> Result<TimeGrid, ServerError> {
        match self {
            Executor::Synchronous { process } => {
                Self::locked(process).execute(|caller| Ok(caller.time_horizon()))
            }
            Executor::Threaded(worker) => worker.call(|respond| ServerOp::Horizon { respond }),
        }
    }

    pub(crate) fn window(&self, id: &str) -> Result<Option<TimeGrid>, ServerError> {
        match self {
            Executor::Synchronous { process } => {
                Self::locked(process).execute(|caller| Ok(caller.window(id)))
            }
            Executor::Threaded(worker) => worker.call(|respond| ServerOp::Window {
                id: id.to_string(),
                respond,
            }),
        }
    }

    /// Drain queued calls, then close the server. Blocks until done.
    pub(crate) fn shutdown(&self) {
        match self {
            Executor::Synchronous { process } => Self::locked(process).shutdown(),
            Executor::Threaded(worker) => worker.shutdown(),
        }
    }
}
