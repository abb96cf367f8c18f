use std::path::{Path, PathBuf};
use std::sync::Arc;

use super::worker::Executor;
use crate::items::time::datetime_to_mjd;
use crate::items::{FIRSTDATE_SIM, ItemRole, ItemValues, LASTDATE_SIM, STEPSIZE};
use crate::protocol::TimeGrid;
use crate::reaper::FileReaper;
use crate::state::{ModelStateFile, decode_state, encode_state};

/// One logical simulation run (ensemble member, scenario) bound to the
/// server process chosen for its id.
///
/// Clones address the same instance; operations from all clones are
/// serialized on the owning process.
#[derive(Clone)]
pub struct Instance {
    id: String,
    process: usize,
    executor: Arc<Executor>,
    reaper: Arc<FileReaper>,
}

impl std::fmt::Debug for Instance {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Instance")
            .field("id", &self.id)
            .field("process", &self.process)
            .finish()
    }
}

impl Instance {
    pub(crate) fn new(
        id: String,
        process: usize,
        executor: Arc<Executor>,
        reaper: Arc<FileReaper>,
    ) -> Self {
        Self {
            id,
            process,
            executor,
            reaper,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn process(&self) -> usize {
        self.process
    }

    /// Register defaults and seed the initialisation window. Only the first
    /// call talks to the engine; later calls return `false`.
    pub fn initialize(&self) -> crate::Result<bool> {
        Ok(self.executor.initialize(&self.id)?)
    }

    pub fn get_item_values(&self) -> crate::Result<ItemValues> {
        Ok(self.executor.get_item_values(&self.id)?)
    }

    /// Register values and wait for the engine to accept them.
    pub fn set_item_values(&self, values: ItemValues) -> crate::Result<()> {
        Ok(self.executor.set_item_values(&self.id, values, true)?)
    }

    /// Queue values without waiting. A failure surfaces on the next call
    /// to this process; in synchronous mode this behaves like
    /// `set_item_values`.
    pub fn submit_item_values(&self, values: ItemValues) -> crate::Result<()> {
        Ok(self.executor.set_item_values(&self.id, values, false)?)
    }

    pub fn simulate(&self) -> crate::Result<()> {
        Ok(self.executor.simulate(&self.id, true)?)
    }

    /// Queue a simulation without waiting for it.
    pub fn submit_simulate(&self) -> crate::Result<()> {
        Ok(self.executor.simulate(&self.id, false)?)
    }

    /// The model's overall time horizon: the initialisation grid.
    pub fn time_horizon(&self) -> crate::Result<TimeGrid> {
        Ok(self.executor.time_horizon()?)
    }

    /// Current simulation window; `None` before initialization.
    pub fn window(&self) -> crate::Result<Option<TimeGrid>> {
        Ok(self.executor.window(&self.id)?)
    }

    /// Write the instance's state items to `path`.
    ///
    /// The state vector holds every writable item whose value does not
    /// depend on the simulation window; the model time is the start of the
    /// current window.
    pub fn save_state(&self, path: &Path, timestep: i64) -> crate::Result<ModelStateFile> {
        let catalogue = self.executor.catalogue()?;
        let mut values = self.get_item_values()?;
        values.retain(|id, value| {
            !matches!(id.as_str(), FIRSTDATE_SIM | LASTDATE_SIM | STEPSIZE)
                && !value.item_type().is_windowed()
                && catalogue
                    .get(id)
                    .is_some_and(|item| item.role == ItemRole::InOut && item.column.is_none())
        });
        let time = match self.window()? {
            Some(window) => datetime_to_mjd(window.first),
            None => datetime_to_mjd(self.time_horizon()?.first),
        };
        let record = ModelStateFile {
            state: encode_state(&values)?,
            cold_start: timestep == 0,
            time,
            timestep,
        };
        record.write(path)?;
        tracing::debug!(instance = %self.id, path = %path.display(), items = values.len(), "state saved");
        Ok(record)
    }

    /// Read a state file and register its values with the engine.
    pub fn restore_state(&self, path: &Path) -> crate::Result<ModelStateFile> {
        let record = ModelStateFile::read(path)?;
        if !record.state.trim().is_empty() {
            let catalogue = self.executor.catalogue()?;
            let values = decode_state(&record.state, &catalogue)?;
            self.set_item_values(values)?;
        }
        tracing::debug!(instance = %self.id, path = %path.display(), "state restored");
        Ok(record)
    }

    /// Hand obsolete state files to the background reaper.
    pub fn discard_states<I, P>(&self, paths: I) -> usize
    where
        I: IntoIterator<Item = P>,
        P: Into<PathBuf>,
    {
        self.reaper.enqueue(paths)
    }
}
