//! Protocol caller: the engine's fixed method sequences over a `Transport`.
//!
//! Provides:
//! - `ProtocolCaller` - catalogue discovery, fixed items and the per-instance
//!   initialize/get/set/simulate operations
//! - `Catalogue` - the item set one server process exposes
//! - `methods` - the ordered token lists every operation sends

mod caller;
pub mod methods;

use thiserror::Error;

use crate::cache::CacheError;
use crate::error::{Effect, Transience};
use crate::items::{CodecError, ItemType, SeriesError, ServerItem};
use crate::wire::WireError;

pub use caller::{ProtocolCaller, TimeGrid};

#[derive(Error, Debug)]
#[non_exhaustive]
pub enum ProtocolError {
    #[error(transparent)]
    Wire(#[from] WireError),

    #[error("server is desynchronized after an earlier failure: {reason}")]
    Desynchronized { reason: String },

    #[error("item `{id}` reports unsupported type: {source}")]
    UnknownType {
        id: String,
        #[source]
        source: CodecError,
    },

    #[error("response lacks item `{id}`")]
    MissingItem { id: String },

    #[error("cannot decode item `{id}`: {source}")]
    Decode {
        id: String,
        #[source]
        source: CodecError,
    },

    #[error("cannot encode item `{id}`: {source}")]
    Encode {
        id: String,
        #[source]
        source: CodecError,
    },

    #[error("unknown item `{0}`")]
    UnknownItem(String),

    #[error("item `{0}` is read-only")]
    NotWritable(String),

    #[error("item `{id}` expects {expected} values, got {found}")]
    TypeMismatch {
        id: String,
        expected: ItemType,
        found: ItemType,
    },

    #[error("item `{id}` is a {item_type}, only 1-D time series can be exploded")]
    NotExplodable { id: String, item_type: ItemType },

    #[error("column `{column}` of `{parent}` has no known value")]
    MissingColumn { parent: String, column: String },

    #[error("columns of `{parent}` do not line up: {source}")]
    Columns {
        parent: String,
        #[source]
        source: SeriesError,
    },

    #[error("instance `{0}` has not been initialized")]
    NotInitialized(String),

    #[error(transparent)]
    Cache(#[from] CacheError),
}

impl ProtocolError {
    /// Nothing in the protocol layer is retried automatically; a failed
    /// round trip leaves the process suspect.
    pub fn transience(&self) -> Transience {
        match self {
            ProtocolError::Wire(e) => match e.transience() {
                Transience::Permanent => Transience::Permanent,
                _ => Transience::Unknown,
            },
            _ => Transience::Permanent,
        }
    }

    pub fn effect(&self) -> Effect {
        match self {
            ProtocolError::Wire(e) => e.effect(),
            ProtocolError::MissingItem { .. } | ProtocolError::Decode { .. } => Effect::Unknown,
            _ => Effect::None,
        }
    }

    /// Whether this failure leaves the engine in an unknown protocol state.
    pub fn desynchronizes(&self) -> bool {
        matches!(
            self,
            ProtocolError::Wire(_)
                | ProtocolError::MissingItem { .. }
                | ProtocolError::Decode { .. }
                | ProtocolError::UnknownType { .. }
                | ProtocolError::Columns { .. }
        )
    }
}

/// Items one server process exposes, in discovery order.
///
/// Exploded 1-D series appear as their column sub-items; the parents are
/// kept separately because the wire still speaks in whole parents.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Catalogue {
    items: Vec<ServerItem>,
    exploded: Vec<ServerItem>,
}

impl Catalogue {
    pub fn get(&self, id: &str) -> Option<&ServerItem> {
        self.items.iter().find(|item| item.id == id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.get(id).is_some()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ServerItem> {
        self.items.iter()
    }

    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.items.iter().map(|item| item.id.as_str())
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Parents of exploded items.
    pub fn exploded(&self) -> &[ServerItem] {
        &self.exploded
    }

    /// Column sub-items of `parent`, ordered by column index.
    pub fn columns_of(&self, parent: &str) -> Vec<&ServerItem> {
        let mut columns: Vec<&ServerItem> = self
            .items
            .iter()
            .filter(|item| item.column.as_ref().is_some_and(|c| c.parent == parent))
            .collect();
        columns.sort_by_key(|item| item.column.as_ref().map_or(0, |c| c.index));
        columns
    }

    pub(crate) fn push(&mut self, item: ServerItem) {
        if !self.contains(&item.id) {
            self.items.push(item);
        }
    }

    pub(crate) fn push_exploded(&mut self, parent: ServerItem, columns: &[String]) {
        for (index, name) in columns.iter().enumerate() {
            self.push(ServerItem::column(&parent, index, name));
        }
        self.exploded.push(parent);
    }
}
