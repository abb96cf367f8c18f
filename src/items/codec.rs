//! Codec table for item wire text.
//!
//! | Type | Wire text |
//! |---|---|
//! | `Double0D` | decimal or `nan` |
//! | `Double1D` | `[v1, v2, ...]` |
//! | `TimeSeries0D` | `[v1, v2, ...]`, one value per step of the window |
//! | `TimeSeries1D` | `[[a1, b1], [a2, b2], ...]`, one row per step |
//! | `Time` | ISO-8601 date-time without fractional seconds |
//! | `Duration` | `<integer><s|m|h|d>` |

use thiserror::Error;

use super::series::{Series, SeriesError};
use super::time::{format_datetime, parse_datetime};
use super::value::{ItemType, ItemValue};

const NAN_TOKEN: &str = "nan";

#[derive(Error, Debug, Clone, PartialEq)]
#[non_exhaustive]
pub enum CodecError {
    #[error("unsupported item type `{0}`")]
    UnknownType(String),

    #[error("invalid {item_type} text `{text}`: {reason}")]
    Invalid {
        item_type: ItemType,
        text: String,
        reason: String,
    },

    #[error("{0} values need the simulation window to decode")]
    MissingContext(ItemType),

    #[error("expected a {expected} value, got {found}")]
    WrongValue { expected: ItemType, found: ItemType },

    #[error("{item_type} window holds {expected} steps but {found} values arrived")]
    Length {
        item_type: ItemType,
        expected: usize,
        found: usize,
    },

    #[error(transparent)]
    Series(#[from] SeriesError),
}

/// Window context windowed codecs need, in unix seconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CodecContext {
    pub first: i64,
    pub last: i64,
    pub step: i64,
}

impl CodecContext {
    pub fn new(first: i64, last: i64, step: i64) -> Self {
        Self { first, last, step }
    }

    pub fn steps(&self) -> usize {
        if self.step <= 0 || self.last <= self.first {
            return 0;
        }
        ((self.last - self.first) / self.step) as usize
    }
}

type ParseFn = fn(&str, Option<&CodecContext>) -> Result<ItemValue, CodecError>;
type PrintFn = fn(&ItemValue) -> Result<String, CodecError>;

/// Stateless parse/print pair for one item type.
pub struct Codec {
    pub item_type: ItemType,
    parse: ParseFn,
    print: PrintFn,
}

impl Codec {
    pub fn parse(&self, text: &str, ctx: Option<&CodecContext>) -> Result<ItemValue, CodecError> {
        (self.parse)(text, ctx)
    }

    pub fn print(&self, value: &ItemValue) -> Result<String, CodecError> {
        if value.item_type() != self.item_type {
            return Err(CodecError::WrongValue {
                expected: self.item_type,
                found: value.item_type(),
            });
        }
        (self.print)(value)
    }
}

static CODECS: [Codec; 6] = [
    Codec {
        item_type: ItemType::Double,
        parse: parse_double_item,
        print: print_double_item,
    },
    Codec {
        item_type: ItemType::DoubleVector,
        parse: parse_vector_item,
        print: print_vector_item,
    },
    Codec {
        item_type: ItemType::TimeSeries0D,
        parse: parse_series0d_item,
        print: print_series0d_item,
    },
    Codec {
        item_type: ItemType::TimeSeries1D,
        parse: parse_series1d_item,
        print: print_series1d_item,
    },
    Codec {
        item_type: ItemType::Time,
        parse: parse_time_item,
        print: print_time_item,
    },
    Codec {
        item_type: ItemType::Duration,
        parse: parse_duration_item,
        print: print_duration_item,
    },
];

pub fn codec(item_type: ItemType) -> &'static Codec {
    let index = match item_type {
        ItemType::Double => 0,
        ItemType::DoubleVector => 1,
        ItemType::TimeSeries0D => 2,
        ItemType::TimeSeries1D => 3,
        ItemType::Time => 4,
        ItemType::Duration => 5,
    };
    &CODECS[index]
}

/// Codec for a type string reported by the engine.
pub fn codec_for(type_name: &str) -> Result<&'static Codec, CodecError> {
    ItemType::from_type_name(type_name).map(codec)
}

fn invalid(item_type: ItemType, text: &str, reason: impl Into<String>) -> CodecError {
    CodecError::Invalid {
        item_type,
        text: text.to_string(),
        reason: reason.into(),
    }
}

pub fn parse_double(text: &str) -> Result<f64, String> {
    let text = text.trim();
    if text.eq_ignore_ascii_case(NAN_TOKEN) {
        return Ok(f64::NAN);
    }
    text.parse::<f64>().map_err(|e| e.to_string())
}

pub fn print_double(value: f64) -> String {
    if value.is_nan() {
        NAN_TOKEN.to_string()
    } else {
        format!("{value:?}")
    }
}

/// Strip one pair of enclosing brackets.
fn unwrap_brackets(text: &str) -> Option<&str> {
    text.trim()
        .strip_prefix('[')
        .and_then(|inner| inner.strip_suffix(']'))
}

/// Split on commas that are not nested inside brackets.
fn split_top_level(inner: &str) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut depth = 0usize;
    let mut from = 0;
    for (pos, c) in inner.char_indices() {
        match c {
            '[' => depth += 1,
            ']' => depth = depth.saturating_sub(1),
            ',' if depth == 0 => {
                parts.push(&inner[from..pos]);
                from = pos + 1;
            }
            _ => {}
        }
    }
    parts.push(&inner[from..]);
    parts
}

pub fn parse_vector(text: &str) -> Result<Vec<f64>, String> {
    let inner = unwrap_brackets(text).ok_or("expected `[...]`")?;
    if inner.trim().is_empty() {
        return Ok(Vec::new());
    }
    split_top_level(inner)
        .into_iter()
        .map(parse_double)
        .collect()
}

pub fn print_vector(values: &[f64]) -> String {
    let body: Vec<String> = values.iter().map(|v| print_double(*v)).collect();
    format!("[{}]", body.join(", "))
}

fn parse_matrix(text: &str) -> Result<Vec<Vec<f64>>, String> {
    let inner = unwrap_brackets(text).ok_or("expected `[[...], ...]`")?;
    if inner.trim().is_empty() {
        return Ok(Vec::new());
    }
    let rows: Vec<Vec<f64>> = split_top_level(inner)
        .into_iter()
        .map(parse_vector)
        .collect::<Result<_, _>>()?;
    if let Some(first) = rows.first()
        && rows.iter().any(|row| row.len() != first.len())
    {
        return Err("rows have different lengths".to_string());
    }
    Ok(rows)
}

fn parse_double_item(text: &str, _: Option<&CodecContext>) -> Result<ItemValue, CodecError> {
    parse_double(text)
        .map(ItemValue::Double)
        .map_err(|reason| invalid(ItemType::Double, text, reason))
}

fn print_double_item(value: &ItemValue) -> Result<String, CodecError> {
    match value {
        ItemValue::Double(v) => Ok(print_double(*v)),
        other => Err(wrong(ItemType::Double, other)),
    }
}

fn parse_vector_item(text: &str, _: Option<&CodecContext>) -> Result<ItemValue, CodecError> {
    parse_vector(text)
        .map(ItemValue::DoubleVector)
        .map_err(|reason| invalid(ItemType::DoubleVector, text, reason))
}

fn print_vector_item(value: &ItemValue) -> Result<String, CodecError> {
    match value {
        ItemValue::DoubleVector(values) => Ok(print_vector(values)),
        other => Err(wrong(ItemType::DoubleVector, other)),
    }
}

fn check_window_length(
    item_type: ItemType,
    ctx: &CodecContext,
    found: usize,
) -> Result<(), CodecError> {
    let expected = ctx.steps();
    if expected != found {
        return Err(CodecError::Length {
            item_type,
            expected,
            found,
        });
    }
    Ok(())
}

fn parse_series0d_item(text: &str, ctx: Option<&CodecContext>) -> Result<ItemValue, CodecError> {
    let ctx = ctx.ok_or(CodecError::MissingContext(ItemType::TimeSeries0D))?;
    let values =
        parse_vector(text).map_err(|reason| invalid(ItemType::TimeSeries0D, text, reason))?;
    check_window_length(ItemType::TimeSeries0D, ctx, values.len())?;
    Ok(ItemValue::Series0D(Series::new(ctx.first, ctx.step, values)?))
}

fn print_series0d_item(value: &ItemValue) -> Result<String, CodecError> {
    match value {
        ItemValue::Series0D(series) => Ok(print_vector(series.values())),
        other => Err(wrong(ItemType::TimeSeries0D, other)),
    }
}

fn parse_series1d_item(text: &str, ctx: Option<&CodecContext>) -> Result<ItemValue, CodecError> {
    let ctx = ctx.ok_or(CodecError::MissingContext(ItemType::TimeSeries1D))?;
    let rows =
        parse_matrix(text).map_err(|reason| invalid(ItemType::TimeSeries1D, text, reason))?;
    check_window_length(ItemType::TimeSeries1D, ctx, rows.len())?;
    Ok(ItemValue::Series1D(Series::new(ctx.first, ctx.step, rows)?))
}

fn print_series1d_item(value: &ItemValue) -> Result<String, CodecError> {
    match value {
        ItemValue::Series1D(series) => {
            let rows: Vec<String> = series.values().iter().map(|r| print_vector(r)).collect();
            Ok(format!("[{}]", rows.join(", ")))
        }
        other => Err(wrong(ItemType::TimeSeries1D, other)),
    }
}

fn parse_time_item(text: &str, _: Option<&CodecContext>) -> Result<ItemValue, CodecError> {
    parse_datetime(text)
        .map(ItemValue::Time)
        .map_err(|e| invalid(ItemType::Time, text, e.to_string()))
}

fn print_time_item(value: &ItemValue) -> Result<String, CodecError> {
    match value {
        ItemValue::Time(at) => Ok(format_datetime(*at)),
        other => Err(wrong(ItemType::Time, other)),
    }
}

const UNITS: [(char, i64); 4] = [('d', 86_400), ('h', 3_600), ('m', 60), ('s', 1)];

pub fn parse_duration(text: &str) -> Result<i64, String> {
    let text = text.trim();
    let unit = text.chars().last().ok_or("empty duration")?;
    let factor = UNITS
        .iter()
        .find(|(symbol, _)| *symbol == unit)
        .map(|(_, factor)| *factor)
        .ok_or_else(|| format!("unknown unit `{unit}`"))?;
    let amount = text[..text.len() - unit.len_utf8()]
        .trim()
        .parse::<i64>()
        .map_err(|e| e.to_string())?;
    if amount < 0 {
        return Err("durations cannot be negative".to_string());
    }
    amount
        .checked_mul(factor)
        .ok_or_else(|| "duration overflows".to_string())
}

/// Largest unit dividing `seconds` evenly: `3600` prints as `1h`.
pub fn print_duration(seconds: i64) -> String {
    if seconds == 0 {
        return "0s".to_string();
    }
    let (symbol, factor) = UNITS
        .iter()
        .find(|(_, factor)| seconds % factor == 0)
        .copied()
        .unwrap_or(('s', 1));
    format!("{}{}", seconds / factor, symbol)
}

fn parse_duration_item(text: &str, _: Option<&CodecContext>) -> Result<ItemValue, CodecError> {
    parse_duration(text)
        .map(ItemValue::Duration)
        .map_err(|reason| invalid(ItemType::Duration, text, reason))
}

fn print_duration_item(value: &ItemValue) -> Result<String, CodecError> {
    match value {
        ItemValue::Duration(seconds) => Ok(print_duration(*seconds)),
        other => Err(wrong(ItemType::Duration, other)),
    }
}

fn wrong(expected: ItemType, found: &ItemValue) -> CodecError {
    CodecError::WrongValue {
        expected,
        found: found.item_type(),
    }
}
