//! Timestamp helpers.
//!
//! The wire speaks ISO-8601 without fractional seconds; internally instants
//! are unix seconds; the assimilation framework counts modified Julian days.

use time::format_description::BorrowedFormatItem;
use time::format_description::well_known::Rfc3339;
use time::macros::format_description;
use time::{OffsetDateTime, PrimitiveDateTime, UtcOffset};

/// Modified Julian day of the unix epoch.
const MJD_UNIX_EPOCH: f64 = 40_587.0;
const SECONDS_PER_DAY: f64 = 86_400.0;

const WIRE_FORMAT: &[BorrowedFormatItem<'static>] = format_description!(
    "[year]-[month]-[day]T[hour]:[minute]:[second][offset_hour sign:mandatory]:[offset_minute]"
);
const NAIVE_T: &[BorrowedFormatItem<'static>] =
    format_description!("[year]-[month]-[day]T[hour]:[minute]:[second]");
const NAIVE_SPACE: &[BorrowedFormatItem<'static>] =
    format_description!("[year]-[month]-[day] [hour]:[minute]:[second]");

pub fn to_mjd(unix_seconds: i64) -> f64 {
    unix_seconds as f64 / SECONDS_PER_DAY + MJD_UNIX_EPOCH
}

/// Rounded to the nearest second; MJD floats cannot carry more precision.
pub fn from_mjd(mjd: f64) -> i64 {
    ((mjd - MJD_UNIX_EPOCH) * SECONDS_PER_DAY).round() as i64
}

pub fn datetime_to_mjd(at: OffsetDateTime) -> f64 {
    to_mjd(at.unix_timestamp())
}

/// Instant for an MJD value, expressed in `offset`.
pub fn datetime_from_mjd(mjd: f64, offset: UtcOffset) -> Option<OffsetDateTime> {
    OffsetDateTime::from_unix_timestamp(from_mjd(mjd))
        .ok()
        .map(|at| at.to_offset(offset))
}

/// Parse engine timestamps; values without an offset are taken as UTC.
pub fn parse_datetime(text: &str) -> Result<OffsetDateTime, time::error::Parse> {
    let text = text.trim();
    match OffsetDateTime::parse(text, &Rfc3339) {
        Ok(at) => Ok(at.replace_nanosecond(0).unwrap_or(at)),
        Err(rfc_err) => PrimitiveDateTime::parse(text, NAIVE_T)
            .or_else(|_| PrimitiveDateTime::parse(text, NAIVE_SPACE))
            .map(PrimitiveDateTime::assume_utc)
            .map_err(|_| rfc_err),
    }
}

pub fn format_datetime(at: OffsetDateTime) -> String {
    at.format(WIRE_FORMAT)
        .unwrap_or_else(|_| at.unix_timestamp().to_string())
}
