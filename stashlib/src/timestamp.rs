// Copyright (c) 2022 pud developers
//
// Licensed under the Apache License, Version 2.0
// <LICENSE-APACHE or https://www.apache.org/licenses/LICENSE-2.0> or the MIT
// license <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. All files in the project carrying such notice may not be copied,
// modified, or distributed except according to those terms.

//! Timestamp normalization
//!
//! Job records carry their timestamps either as epoch seconds or as text.
//! Everything is normalized to a UTC [`OffsetDateTime`].

use crate::error::Error::{TimestampParse, TimestampRange};
use anyhow::Result;
use serde_json::Value;
use time::{
    format_description::{
        well_known::{Iso8601, Rfc3339},
        BorrowedFormatItem,
    },
    macros::format_description,
    Duration, OffsetDateTime, PrimitiveDateTime, UtcOffset,
};

const NANOS_PER_SECOND: f64 = 1_000_000_000.0;

/// Payload rendering, always UTC with millisecond precision
const CANONICAL: &[BorrowedFormatItem<'_>] =
    format_description!("[year]-[month]-[day]T[hour]:[minute]:[second].[subsecond digits:3]Z");

/// Textual forms carrying an explicit offset
const OFFSET_FORMATS: &[&[BorrowedFormatItem<'_>]] = &[
    format_description!(
        "[year]-[month]-[day] [hour]:[minute]:[second] [offset_hour sign:mandatory][offset_minute]"
    ),
    format_description!(
        "[year]-[month]-[day] [hour]:[minute]:[second] [offset_hour sign:mandatory]:[offset_minute]"
    ),
    format_description!(
        "[year]-[month]-[day] [hour]:[minute]:[second].[subsecond] [offset_hour sign:mandatory][offset_minute]"
    ),
    format_description!(
        "[year]-[month]-[day] [hour]:[minute]:[second].[subsecond] [offset_hour sign:mandatory]:[offset_minute]"
    ),
];

/// Textual forms without an offset, read as UTC
const UTC_FORMATS: &[&[BorrowedFormatItem<'_>]] = &[
    format_description!("[year]-[month]-[day] [hour]:[minute]:[second] UTC"),
    format_description!("[year]-[month]-[day] [hour]:[minute]:[second].[subsecond] UTC"),
    format_description!("[year]-[month]-[day] [hour]:[minute]:[second]"),
    format_description!("[year]-[month]-[day] [hour]:[minute]:[second].[subsecond]"),
    format_description!("[year]-[month]-[day]T[hour]:[minute]:[second]"),
    format_description!("[year]-[month]-[day]T[hour]:[minute]:[second].[subsecond]"),
];

/// A timestamp in any of the shapes a job record may hold
#[derive(Clone, Debug, PartialEq)]
pub enum Timestamp {
    /// Already canonical
    Time(OffsetDateTime),
    /// Seconds since the unix epoch
    Epoch(f64),
    /// A textual timestamp
    Text(String),
}

impl Timestamp {
    /// Normalize to a UTC [`OffsetDateTime`]
    ///
    /// # Errors
    /// * [`TimestampRange`](crate::Error::TimestampRange) if epoch seconds are not representable
    /// * [`TimestampParse`](crate::Error::TimestampParse) if the text is not
    ///   a recognizable timestamp
    ///
    pub fn normalize(&self) -> Result<OffsetDateTime> {
        match self {
            Timestamp::Time(time) => Ok(*time),
            Timestamp::Epoch(secs) => from_epoch(*secs),
            Timestamp::Text(text) => from_text(text),
        }
    }
}

impl From<OffsetDateTime> for Timestamp {
    fn from(time: OffsetDateTime) -> Self {
        Timestamp::Time(time)
    }
}

impl TryFrom<&Value> for Timestamp {
    type Error = anyhow::Error;

    fn try_from(value: &Value) -> Result<Self> {
        match value {
            Value::Number(number) => number.as_f64().map(Timestamp::Epoch).ok_or_else(|| {
                TimestampRange {
                    value: number.to_string(),
                }
                .into()
            }),
            Value::String(text) => Ok(Timestamp::Text(text.clone())),
            other => Err(TimestampParse {
                value: other.to_string(),
            }
            .into()),
        }
    }
}

/// Normalize a job record timestamp value to a UTC [`OffsetDateTime`]
///
/// # Errors
/// * The value is neither a number nor text
/// * See [`Timestamp::normalize`]
///
pub fn normalize(value: &Value) -> Result<OffsetDateTime> {
    Timestamp::try_from(value)?.normalize()
}

/// Render a canonical time the way it appears in a payload
///
/// # Errors
/// * The time cannot be formatted (years outside 0..=9999)
///
pub fn format(time: OffsetDateTime) -> Result<String> {
    Ok(time.to_offset(UtcOffset::UTC).format(CANONICAL)?)
}

#[allow(clippy::cast_possible_truncation)]
fn from_epoch(secs: f64) -> Result<OffsetDateTime> {
    let range_err = || TimestampRange {
        value: secs.to_string(),
    };
    if !secs.is_finite() {
        return Err(range_err().into());
    }
    let whole = secs.floor();
    let nanos = ((secs - whole) * NANOS_PER_SECOND).round() as i64;
    let base = OffsetDateTime::from_unix_timestamp(whole as i64).map_err(|_| range_err())?;
    base.checked_add(Duration::nanoseconds(nanos))
        .ok_or_else(|| range_err().into())
}

fn from_text(text: &str) -> Result<OffsetDateTime> {
    let text = text.trim();
    let utc = |time: OffsetDateTime| time.to_offset(UtcOffset::UTC);

    if let Ok(time) = OffsetDateTime::parse(text, &Rfc3339) {
        return Ok(utc(time));
    }
    if let Ok(time) = OffsetDateTime::parse(text, &Iso8601::DEFAULT) {
        return Ok(utc(time));
    }
    if let Some(time) = OFFSET_FORMATS
        .iter()
        .find_map(|desc| OffsetDateTime::parse(text, desc).ok())
    {
        return Ok(utc(time));
    }
    UTC_FORMATS
        .iter()
        .find_map(|desc| PrimitiveDateTime::parse(text, desc).ok())
        .map(PrimitiveDateTime::assume_utc)
        .ok_or_else(|| {
            TimestampParse {
                value: text.to_string(),
            }
            .into()
        })
}
