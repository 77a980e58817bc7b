//! Canonicalization of stored date values.
//!
//! Older builds persisted dates either as `YYYY-MM-DD` strings or as an object
//! wrapping an ISO-8601 timestamp under `value`. Every record read back from
//! storage passes through [`normalize`] before it reaches the application layer.
//!
//! This is a best-effort heuristic and not a calendar converter: values that
//! cannot be recognized are returned exactly as stored.

use std::fmt::{Display, Formatter};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use time::{Date, Month};

/// Years above this value are treated as Gregorian already. Legacy rows may
/// carry Solar Hijri years, which are numerically smaller.
pub const GREGORIAN_YEAR_THRESHOLD: i32 = 1300;

/// A date as it appears on the wire or in storage.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum DateValue {
    /// Plain string, canonical when it reads `YYYY-MM-DD`.
    Text(String),
    /// Legacy `{ "value": "2025-10-21T10:07:29.000Z" }` shape.
    Wrapped { value: String },
    /// Anything else, kept verbatim.
    Opaque(Value),
}

impl DateValue {
    #[must_use]
    pub fn canonical(date: Date) -> Self {
        Self::Text(format_canonical_date(date))
    }

    #[must_use]
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(text) => Some(text),
            Self::Wrapped { .. } | Self::Opaque(_) => None,
        }
    }

    /// Parse the value as a canonical calendar date, if it is one.
    #[must_use]
    pub fn to_date(&self) -> Option<Date> {
        self.as_text().and_then(parse_canonical_date)
    }

    /// Empty strings and JSON nulls count as "no date".
    #[must_use]
    pub fn is_blank(&self) -> bool {
        match self {
            Self::Text(text) => text.trim().is_empty(),
            Self::Wrapped { value } => value.is_empty(),
            Self::Opaque(value) => value.is_null(),
        }
    }
}

impl Default for DateValue {
    fn default() -> Self {
        Self::Opaque(Value::Null)
    }
}

impl From<Date> for DateValue {
    fn from(date: Date) -> Self {
        Self::canonical(date)
    }
}

impl From<&str> for DateValue {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl Display for DateValue {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Text(text) => write!(f, "{text}"),
            Self::Wrapped { value } => write!(f, "{value}"),
            Self::Opaque(value) => write!(f, "{value}"),
        }
    }
}

/// How a plain date string was classified by [`classify_year`].
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum YearEra {
    Gregorian,
    /// Year at or below [`GREGORIAN_YEAR_THRESHOLD`]; possibly another calendar.
    BelowThreshold,
    Unrecognized,
}

/// Classify the leading year of a `YYYY-...` string.
#[must_use]
pub fn classify_year(text: &str) -> YearEra {
    let Some(year) = text.split('-').next().and_then(|raw| raw.trim().parse::<i32>().ok()) else {
        return YearEra::Unrecognized;
    };
    if year > GREGORIAN_YEAR_THRESHOLD {
        YearEra::Gregorian
    } else {
        YearEra::BelowThreshold
    }
}

/// Canonicalize one stored date value.
///
/// Strings are returned unchanged whatever their year, wrapped timestamps are
/// truncated at the `T` separator, and everything else passes through.
#[must_use]
pub fn normalize(value: &DateValue) -> DateValue {
    match value {
        DateValue::Text(text) => DateValue::Text(text.clone()),
        DateValue::Wrapped { value: inner } if !inner.is_empty() => {
            let date = inner.split_once('T').map_or(inner.as_str(), |(date, _)| date);
            DateValue::Text(date.to_string())
        }
        other => other.clone(),
    }
}

/// Parse a strict `YYYY-MM-DD` string into a calendar date.
#[must_use]
pub fn parse_canonical_date(text: &str) -> Option<Date> {
    let bytes = text.as_bytes();
    if bytes.len() != 10 || bytes.get(4) != Some(&b'-') || bytes.get(7) != Some(&b'-') {
        return None;
    }

    let digits = |range: std::ops::Range<usize>| {
        text.get(range).filter(|part| part.bytes().all(|byte| byte.is_ascii_digit()))
    };

    let year = digits(0..4)?.parse::<i32>().ok()?;
    let month = digits(5..7)?.parse::<u8>().ok()?;
    let day = digits(8..10)?.parse::<u8>().ok()?;

    let month = Month::try_from(month).ok()?;
    Date::from_calendar_date(year, month, day).ok()
}

#[must_use]
pub fn format_canonical_date(date: Date) -> String {
    format!("{:04}-{:02}-{:02}", date.year(), u8::from(date.month()), date.day())
}
