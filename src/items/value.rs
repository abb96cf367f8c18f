use std::collections::BTreeMap;
use std::fmt;

use time::OffsetDateTime;

use super::codec::CodecError;
use super::series::{Series0D, Series1D};

/// Direction of an exchange item from the framework's point of view.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ItemRole {
    Input,
    Output,
    InOut,
}

impl ItemRole {
    pub fn is_writable(self) -> bool {
        matches!(self, ItemRole::Input | ItemRole::InOut)
    }

    pub fn is_readable(self) -> bool {
        matches!(self, ItemRole::Output | ItemRole::InOut)
    }
}

/// The closed set of item types the engine can report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ItemType {
    Double,
    DoubleVector,
    TimeSeries0D,
    TimeSeries1D,
    Time,
    Duration,
}

impl ItemType {
    /// Resolve a reported type string; `Double1D(3)` dispatches on `Double1D`.
    pub fn from_type_name(reported: &str) -> Result<Self, CodecError> {
        let name = reported
            .split_once('(')
            .map_or(reported, |(prefix, _)| prefix)
            .trim();
        match name {
            "Double0D" => Ok(ItemType::Double),
            "Double1D" => Ok(ItemType::DoubleVector),
            "TimeSeries0D" => Ok(ItemType::TimeSeries0D),
            "TimeSeries1D" => Ok(ItemType::TimeSeries1D),
            "Time" => Ok(ItemType::Time),
            "Duration" => Ok(ItemType::Duration),
            _ => Err(CodecError::UnknownType(reported.to_string())),
        }
    }

    pub fn type_name(self) -> &'static str {
        match self {
            ItemType::Double => "Double0D",
            ItemType::DoubleVector => "Double1D",
            ItemType::TimeSeries0D => "TimeSeries0D",
            ItemType::TimeSeries1D => "TimeSeries1D",
            ItemType::Time => "Time",
            ItemType::Duration => "Duration",
        }
    }

    /// Whether values depend on the simulation window.
    pub fn is_windowed(self) -> bool {
        matches!(self, ItemType::TimeSeries0D | ItemType::TimeSeries1D)
    }
}

impl fmt::Display for ItemType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.type_name())
    }
}

/// A typed item value.
#[derive(Debug, Clone, PartialEq)]
pub enum ItemValue {
    Double(f64),
    DoubleVector(Vec<f64>),
    Series0D(Series0D),
    Series1D(Series1D),
    Time(OffsetDateTime),
    /// Whole seconds.
    Duration(i64),
}

impl ItemValue {
    pub fn item_type(&self) -> ItemType {
        match self {
            ItemValue::Double(_) => ItemType::Double,
            ItemValue::DoubleVector(_) => ItemType::DoubleVector,
            ItemValue::Series0D(_) => ItemType::TimeSeries0D,
            ItemValue::Series1D(_) => ItemType::TimeSeries1D,
            ItemValue::Time(_) => ItemType::Time,
            ItemValue::Duration(_) => ItemType::Duration,
        }
    }

    pub fn as_double(&self) -> Option<f64> {
        match self {
            ItemValue::Double(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_time(&self) -> Option<OffsetDateTime> {
        match self {
            ItemValue::Time(at) => Some(*at),
            _ => None,
        }
    }

    pub fn as_duration(&self) -> Option<i64> {
        match self {
            ItemValue::Duration(seconds) => Some(*seconds),
            _ => None,
        }
    }

    pub fn as_series(&self) -> Option<&Series0D> {
        match self {
            ItemValue::Series0D(series) => Some(series),
            _ => None,
        }
    }
}

/// Item id to value, ordered for stable wire bodies.
pub type ItemValues = BTreeMap<String, ItemValue>;

/// One column of an exploded 1-D time series.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnOf {
    pub parent: String,
    pub index: usize,
    pub name: String,
}

/// An exchange slot declared by the engine (or synthesized by the bridge).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerItem {
    pub id: String,
    pub role: ItemRole,
    pub item_type: ItemType,
    pub column: Option<ColumnOf>,
}

impl ServerItem {
    pub fn new(id: impl Into<String>, role: ItemRole, item_type: ItemType) -> Self {
        Self {
            id: id.into(),
            role,
            item_type,
            column: None,
        }
    }

    /// Sub-item `<parent>.<name>` carrying one column of a 1-D series.
    pub fn column(parent: &ServerItem, index: usize, name: &str) -> Self {
        Self {
            id: format!("{}.{}", parent.id, name),
            role: parent.role,
            item_type: ItemType::TimeSeries0D,
            column: Some(ColumnOf {
                parent: parent.id.clone(),
                index,
                name: name.to_string(),
            }),
        }
    }
}
