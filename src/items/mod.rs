//! Exchange items: the typed slots a simulation server exposes.

pub mod codec;
pub mod series;
pub mod time;
pub mod value;

pub use codec::{Codec, CodecContext, CodecError, codec, codec_for};
pub use series::{Series, Series0D, Series1D, SeriesError};
pub use value::{ColumnOf, ItemRole, ItemType, ItemValue, ItemValues, ServerItem};

/// Ids the bridge synthesizes for the simulation window.
pub const FIRSTDATE_SIM: &str = "firstdate_sim";
pub const LASTDATE_SIM: &str = "lastdate_sim";
pub const STEPSIZE: &str = "stepsize";

/// Ids the engine reports for its initialisation grid.
pub const FIRSTDATE_INIT: &str = "firstdate_init";
pub const LASTDATE_INIT: &str = "lastdate_init";

/// Items every catalogue carries in addition to what the engine reports.
pub fn synthetic_items() -> [ServerItem; 3] {
    [
        ServerItem::new(FIRSTDATE_SIM, ItemRole::InOut, ItemType::Time),
        ServerItem::new(LASTDATE_SIM, ItemRole::InOut, ItemType::Time),
        ServerItem::new(STEPSIZE, ItemRole::Output, ItemType::Duration),
    ]
}
