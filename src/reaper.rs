//! Background deletion of scratch files.
//!
//! Best effort: a full queue drops the request after a bounded wait, and a
//! failed delete goes back into the queue after a short delay. Nothing here
//! ever fails the caller.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam::channel::{Receiver, SendTimeoutError, Sender, TrySendError};

use crate::config::ReaperConfig;

pub struct FileReaper {
    tx: Sender<PathBuf>,
    /// Disconnects (or fires) to stop the worker; separate from the queue
    /// so a full queue cannot swallow it.
    stop: Mutex<Option<Sender<()>>>,
    handle: Mutex<Option<JoinHandle<()>>>,
    enqueue_timeout: Duration,
}

impl FileReaper {
    pub fn start(config: &ReaperConfig) -> Self {
        let (tx, rx) = crossbeam::channel::bounded(config.capacity.max(1));
        let (stop_tx, stop_rx) = crossbeam::channel::bounded(1);
        let requeue = tx.clone();
        let retry_delay = Duration::from_millis(config.retry_delay_ms);
        let handle = thread::Builder::new()
            .name("hydpy-reaper".to_string())
            .spawn(move || run_reaper_loop(rx, requeue, stop_rx, retry_delay))
            .expect("spawn file reaper");
        Self {
            tx,
            stop: Mutex::new(Some(stop_tx)),
            handle: Mutex::new(Some(handle)),
            enqueue_timeout: Duration::from_secs(config.enqueue_timeout_secs),
        }
    }

    /// Queue `paths` for deletion; returns how many were accepted.
    pub fn enqueue<I, P>(&self, paths: I) -> usize
    where
        I: IntoIterator<Item = P>,
        P: Into<PathBuf>,
    {
        if self.is_stopped() {
            tracing::warn!("reaper stopped; files left behind");
            return 0;
        }
        let mut accepted = 0;
        for path in paths {
            match self.tx.send_timeout(path.into(), self.enqueue_timeout) {
                Ok(()) => accepted += 1,
                Err(SendTimeoutError::Timeout(path)) => {
                    tracing::warn!(path = %path.display(), "reaper queue full; file left behind");
                }
                Err(SendTimeoutError::Disconnected(_)) => {
                    tracing::warn!("reaper stopped; remaining files left behind");
                    break;
                }
            }
        }
        accepted
    }

    /// Stop the worker after one last attempt on the requests queued so far,
    /// and wait for it to exit.
    pub fn shutdown(&self) {
        if let Ok(mut stop) = self.stop.lock() {
            // Dropping the sender is the signal.
            stop.take();
        }
        let handle = self.handle.lock().ok().and_then(|mut handle| handle.take());
        if let Some(handle) = handle
            && handle.join().is_err()
        {
            tracing::warn!("file reaper panicked");
        }
    }

    fn is_stopped(&self) -> bool {
        self.stop.lock().map_or(true, |stop| stop.is_none())
    }
}

impl Drop for FileReaper {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn run_reaper_loop(
    rx: Receiver<PathBuf>,
    requeue: Sender<PathBuf>,
    stop: Receiver<()>,
    retry_delay: Duration,
) {
    loop {
        crossbeam::select! {
            recv(stop) -> _ => break,
            recv(rx) -> path => {
                let Ok(path) = path else { break };
                if let Err(err) = delete(&path) {
                    tracing::debug!(path = %path.display(), error = %err, "delete failed; retrying later");
                    thread::sleep(retry_delay);
                    if let Err(TrySendError::Full(path)) = requeue.try_send(path) {
                        tracing::warn!(path = %path.display(), "reaper queue full; dropping retry");
                    }
                }
            }
        }
    }
    for path in rx.try_iter() {
        if let Err(err) = delete(&path) {
            tracing::warn!(path = %path.display(), error = %err, "file left behind at shutdown");
        }
    }
}

/// Missing files count as deleted.
fn delete(path: &Path) -> io::Result<()> {
    let result = if path.is_dir() {
        fs::remove_dir_all(path)
    } else {
        fs::remove_file(path)
    };
    match result {
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
        other => other,
    }
}
