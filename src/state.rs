//! Persisted model state.
//!
//! A state file is a properties file with four keys:
//!
//! | Key | Value |
//! |---|---|
//! | `state` | serialized item values, one `id=value` line each |
//! | `coldstart` | `true` when no simulation has run yet |
//! | `time` | model time as a modified Julian day |
//! | `timestep` | number of steps simulated so far |

use std::fs;
use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::error::Transience;
use crate::items::{CodecError, ItemValues, codec};
use crate::protocol::Catalogue;
use crate::wire::{Properties, PropertiesError};

const KEY_STATE: &str = "state";
const KEY_COLD_START: &str = "coldstart";
const KEY_TIME: &str = "time";
const KEY_TIMESTEP: &str = "timestep";

#[derive(Error, Debug)]
#[non_exhaustive]
pub enum StateFileError {
    #[error("cannot read state file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("cannot write state file {path}: {reason}")]
    Write { path: PathBuf, reason: String },

    #[error("malformed state file {path}: {source}")]
    Malformed {
        path: PathBuf,
        #[source]
        source: PropertiesError,
    },

    #[error("state file {path} lacks `{key}`")]
    MissingKey { path: PathBuf, key: &'static str },

    #[error("state file {path}: invalid `{key}` value `{value}`")]
    InvalidValue {
        path: PathBuf,
        key: &'static str,
        value: String,
    },

    #[error("state item `{id}`: {source}")]
    Codec {
        id: String,
        #[source]
        source: CodecError,
    },

    #[error("state item `{0}` is not part of the model")]
    UnknownItem(String),
}

impl StateFileError {
    pub fn transience(&self) -> Transience {
        match self {
            StateFileError::Read { .. } | StateFileError::Write { .. } => Transience::Unknown,
            _ => Transience::Permanent,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ModelStateFile {
    pub state: String,
    pub cold_start: bool,
    pub time: f64,
    pub timestep: i64,
}

impl ModelStateFile {
    /// Record for a model that has not simulated yet.
    pub fn cold_start(time: f64) -> Self {
        Self {
            state: String::new(),
            cold_start: true,
            time,
            timestep: 0,
        }
    }

    pub fn to_properties(&self) -> Properties {
        let mut props = Properties::new();
        props.insert(KEY_STATE, self.state.clone());
        props.insert(KEY_COLD_START, self.cold_start.to_string());
        props.insert(KEY_TIME, self.time.to_string());
        props.insert(KEY_TIMESTEP, self.timestep.to_string());
        props
    }

    pub fn from_properties(path: &Path, props: &Properties) -> Result<Self, StateFileError> {
        let get = |key: &'static str| {
            props.get(key).ok_or_else(|| StateFileError::MissingKey {
                path: path.to_path_buf(),
                key,
            })
        };
        let invalid = |key: &'static str, value: &str| StateFileError::InvalidValue {
            path: path.to_path_buf(),
            key,
            value: value.to_string(),
        };

        let cold_start = get(KEY_COLD_START)?;
        let cold_start = match cold_start.trim().to_ascii_lowercase().as_str() {
            "true" => true,
            "false" => false,
            _ => return Err(invalid(KEY_COLD_START, cold_start)),
        };
        let time = get(KEY_TIME)?;
        let time = time
            .trim()
            .parse::<f64>()
            .map_err(|_| invalid(KEY_TIME, time))?;
        let timestep = get(KEY_TIMESTEP)?;
        let timestep = timestep
            .trim()
            .parse::<i64>()
            .map_err(|_| invalid(KEY_TIMESTEP, timestep))?;

        Ok(Self {
            state: props.get(KEY_STATE).unwrap_or_default().to_string(),
            cold_start,
            time,
            timestep,
        })
    }

    pub fn read(path: &Path) -> Result<Self, StateFileError> {
        let text = fs::read_to_string(path).map_err(|source| StateFileError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let props = Properties::parse(&text).map_err(|source| StateFileError::Malformed {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_properties(path, &props)
    }

    /// Replace `path` atomically.
    pub fn write(&self, path: &Path) -> Result<(), StateFileError> {
        let write_error = |reason: String| StateFileError::Write {
            path: path.to_path_buf(),
            reason,
        };
        let dir = path
            .parent()
            .filter(|dir| !dir.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        fs::create_dir_all(dir).map_err(|e| write_error(format!("failed to create dir: {e}")))?;
        let temp = tempfile::NamedTempFile::new_in(dir)
            .map_err(|e| write_error(format!("failed to create temp file: {e}")))?;
        fs::write(temp.path(), self.to_properties().to_file_text())
            .map_err(|e| write_error(format!("failed to write temp file: {e}")))?;
        temp.persist(path)
            .map_err(|e| write_error(format!("failed to persist: {e}")))?;
        Ok(())
    }
}

/// Serialize item values as `id=value` lines.
pub fn encode_state(values: &ItemValues) -> Result<String, StateFileError> {
    let mut props = Properties::new();
    for (id, value) in values {
        let text = codec(value.item_type())
            .print(value)
            .map_err(|source| StateFileError::Codec {
                id: id.clone(),
                source,
            })?;
        props.insert(id.clone(), text);
    }
    Ok(props.to_body())
}

/// Parse state text written by `encode_state`, typing each value by the
/// catalogue. Windowed series cannot be stored in a state vector.
pub fn decode_state(text: &str, catalogue: &Catalogue) -> Result<ItemValues, StateFileError> {
    let props = Properties::parse(text).map_err(|source| StateFileError::Malformed {
        path: PathBuf::from(KEY_STATE),
        source,
    })?;
    let mut values = ItemValues::new();
    for (id, raw) in props {
        let item = catalogue
            .get(&id)
            .ok_or_else(|| StateFileError::UnknownItem(id.clone()))?;
        let value = codec(item.item_type)
            .parse(&raw, None)
            .map_err(|source| StateFileError::Codec {
                id: id.clone(),
                source,
            })?;
        values.insert(id, value);
    }
    Ok(values)
}
