#![forbid(unsafe_code)]

//! Bridge between a data-assimilation framework and pools of HydPy
//! simulation servers.
//!
//! A [`ServerPool`] supervises the engine processes; each model instance is
//! pinned to one of them and reached through an [`Instance`] handle.

pub mod cache;
pub mod config;
pub mod error;
pub mod items;
pub mod paths;
pub mod protocol;
pub mod reaper;
pub mod server;
pub mod state;
pub mod supervisor;
pub mod telemetry;
pub mod version;
pub mod wire;

pub use error::{Effect, Error, Transience};
pub type Result<T> = std::result::Result<T, Error>;

pub use config::BridgeConfig;
pub use items::{ItemRole, ItemType, ItemValue, ItemValues, ServerItem};
pub use protocol::{Catalogue, TimeGrid};
pub use server::{Instance, ProcessState, ServerPool};
pub use state::ModelStateFile;
