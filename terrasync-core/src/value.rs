//! Typed field values and the pure converters that produce them.
//!
//! Every converter is a total function from cleaned text to either a
//! [`FieldValue`] or a [`ConversionError`]. Malformed input never panics; the
//! parser drops the offending field and keeps the rest of the feature.

use std::fmt;
use std::num::ParseIntError;

use chrono::{DateTime, NaiveDateTime, SecondsFormat, Utc};
use thiserror::Error;

/// Naive ISO-8601 layouts accepted when a timestamp carries no offset.
const NAIVE_TIMESTAMP_FORMATS: &[&str] = &["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"];

/// Signature shared by all field converters.
pub type Converter = fn(&str) -> Result<FieldValue, ConversionError>;

/// Storage class of a mapped field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum FieldKind {
    /// Signed 64-bit integer.
    Integer,
    /// Free text.
    Text,
    /// `true` or `false`.
    Boolean,
    /// Instant in UTC.
    Timestamp,
}

/// A converted attribute value.
///
/// # Examples
///
/// ```
/// use terrasync_core::{FieldValue, convert_boolean};
///
/// assert_eq!(convert_boolean("TRUE"), Ok(FieldValue::Boolean(true)));
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
#[cfg_attr(feature = "serde", serde(untagged))]
pub enum FieldValue {
    /// Integer value.
    Integer(i64),
    /// Text value.
    Text(String),
    /// Boolean value.
    Boolean(bool),
    /// Timestamp normalised to UTC.
    Timestamp(DateTime<Utc>),
}

impl FieldValue {
    /// Storage class of this value.
    #[must_use]
    pub const fn kind(&self) -> FieldKind {
        match self {
            Self::Integer(_) => FieldKind::Integer,
            Self::Text(_) => FieldKind::Text,
            Self::Boolean(_) => FieldKind::Boolean,
            Self::Timestamp(_) => FieldKind::Timestamp,
        }
    }

    /// Return the integer payload, if any.
    #[must_use]
    pub const fn as_integer(&self) -> Option<i64> {
        match self {
            Self::Integer(value) => Some(*value),
            _ => None,
        }
    }

    /// Return the timestamp payload, if any.
    #[must_use]
    pub const fn as_timestamp(&self) -> Option<&DateTime<Utc>> {
        match self {
            Self::Timestamp(value) => Some(value),
            _ => None,
        }
    }
}

impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Integer(value) => write!(f, "{value}"),
            Self::Text(value) => f.write_str(value),
            Self::Boolean(value) => write!(f, "{value}"),
            Self::Timestamp(value) => f.write_str(&format_timestamp(value)),
        }
    }
}

/// Errors raised when a raw attribute cannot be converted.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[non_exhaustive]
pub enum ConversionError {
    /// The text was not a base-10 integer in `i64` range.
    #[error("'{value}' is not a valid integer: {source}")]
    InvalidInteger {
        /// Offending input.
        value: String,
        /// Parser failure.
        #[source]
        source: ParseIntError,
    },
    /// The text was neither `true` nor `false`.
    #[error("'{value}' is not a boolean (expected true or false)")]
    InvalidBoolean {
        /// Offending input.
        value: String,
    },
    /// The text was not an ISO-8601 timestamp.
    #[error("'{value}' is not an ISO-8601 timestamp")]
    InvalidTimestamp {
        /// Offending input.
        value: String,
    },
}

/// Trim surrounding whitespace and treat empty text as absent.
///
/// # Examples
///
/// ```
/// use terrasync_core::clean_value;
///
/// assert_eq!(clean_value("  42 \n"), Some("42"));
/// assert_eq!(clean_value("   "), None);
/// ```
#[must_use]
pub fn clean_value(raw: &str) -> Option<&str> {
    let trimmed = raw.trim();
    (!trimmed.is_empty()).then_some(trimmed)
}

/// Parse a signed integer.
pub fn convert_integer(raw: &str) -> Result<FieldValue, ConversionError> {
    raw.parse::<i64>()
        .map(FieldValue::Integer)
        .map_err(|source| ConversionError::InvalidInteger {
            value: raw.to_owned(),
            source,
        })
}

/// Keep the text as-is.
pub fn convert_text(raw: &str) -> Result<FieldValue, ConversionError> {
    Ok(FieldValue::Text(raw.to_owned()))
}

/// Parse `true`/`false`, ignoring ASCII case.
pub fn convert_boolean(raw: &str) -> Result<FieldValue, ConversionError> {
    if raw.eq_ignore_ascii_case("true") {
        Ok(FieldValue::Boolean(true))
    } else if raw.eq_ignore_ascii_case("false") {
        Ok(FieldValue::Boolean(false))
    } else {
        Err(ConversionError::InvalidBoolean {
            value: raw.to_owned(),
        })
    }
}

/// Parse an RFC 3339 timestamp, or a naive ISO-8601 date-time read as UTC.
pub fn convert_timestamp(raw: &str) -> Result<FieldValue, ConversionError> {
    if let Ok(parsed) = DateTime::parse_from_rfc3339(raw) {
        return Ok(FieldValue::Timestamp(parsed.with_timezone(&Utc)));
    }
    NAIVE_TIMESTAMP_FORMATS
        .iter()
        .find_map(|format| NaiveDateTime::parse_from_str(raw, format).ok())
        .map(|naive| FieldValue::Timestamp(naive.and_utc()))
        .ok_or_else(|| ConversionError::InvalidTimestamp {
            value: raw.to_owned(),
        })
}

/// Render a timestamp in the fixed-width form used for storage.
///
/// Microsecond precision and a `Z` suffix keep the text lexicographically
/// ordered, so stores can compare stored values as plain strings.
#[must_use]
pub fn format_timestamp(value: &DateTime<Utc>) -> String {
    value.to_rfc3339_opts(SecondsFormat::Micros, true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use rstest::rstest;

    #[rstest]
    #[case("42", 42)]
    #[case("-7", -7)]
    #[case("100000001", 100_000_001)]
    fn integers_parse(#[case] raw: &str, #[case] expected: i64) {
        assert_eq!(convert_integer(raw), Ok(FieldValue::Integer(expected)));
    }

    #[rstest]
    #[case("4.2")]
    #[case("abc")]
    #[case("99999999999999999999")]
    fn malformed_integers_fail(#[case] raw: &str) {
        assert!(matches!(
            convert_integer(raw),
            Err(ConversionError::InvalidInteger { .. })
        ));
    }

    #[rstest]
    #[case("true", true)]
    #[case("False", false)]
    #[case("TRUE", true)]
    fn booleans_ignore_case(#[case] raw: &str, #[case] expected: bool) {
        assert_eq!(convert_boolean(raw), Ok(FieldValue::Boolean(expected)));
    }

    #[rstest]
    #[case("yes")]
    #[case("1")]
    fn unknown_booleans_fail(#[case] raw: &str) {
        assert_eq!(
            convert_boolean(raw),
            Err(ConversionError::InvalidBoolean {
                value: raw.to_owned()
            })
        );
    }

    #[rstest]
    #[case("2020-08-28T15:04:32.571427+02:00")]
    #[case("2020-08-28T13:04:32Z")]
    #[case("2020-08-28T13:04:32")]
    #[case("2020-08-28 13:04:32.25")]
    fn timestamps_normalise_to_utc(#[case] raw: &str) {
        let value = convert_timestamp(raw).expect("timestamp parses");
        let parsed = value.as_timestamp().expect("timestamp variant");
        let expected = Utc
            .with_ymd_and_hms(2020, 8, 28, 13, 4, 32)
            .single()
            .expect("valid instant");
        assert_eq!(parsed.timestamp(), expected.timestamp());
    }

    #[rstest]
    fn malformed_timestamp_fails() {
        assert!(matches!(
            convert_timestamp("yesterday"),
            Err(ConversionError::InvalidTimestamp { .. })
        ));
    }

    #[rstest]
    fn stored_timestamps_sort_lexicographically() {
        let earlier = convert_timestamp("2021-01-01T00:00:00.5Z").expect("parse");
        let later = convert_timestamp("2021-01-01T00:00:01Z").expect("parse");
        assert!(earlier.to_string() < later.to_string());
    }
}
