use std::fmt;

use chrono::{NaiveDateTime, Timelike};
use thiserror::Error;

const WATERMARK_FORMAT: &str = "%Y-%m-%d %H:%M:%S";
const WATERMARK_FORMAT_MICROS: &str = "%Y-%m-%d %H:%M:%S%.6f";
const WATERMARK_PARSE_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.f";

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("invalid watermark `{0}`: expected YYYY-MM-DD HH:MM:SS[.ffffff]")]
pub struct WatermarkParseError(pub String);

/// Position on a source's ordering axis up to which export is confirmed.
///
/// Compared as a typed timestamp; the textual form only exists for the checkpoint file and for
/// serialized row values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Watermark(NaiveDateTime);

impl Watermark {
    pub const fn new(at: NaiveDateTime) -> Self {
        Self(at)
    }

    /// `1970-01-01 00:00:00`, chrono's default `NaiveDateTime`.
    pub fn epoch() -> Self {
        Self(NaiveDateTime::default())
    }

    pub fn as_datetime(&self) -> NaiveDateTime {
        self.0
    }

    pub fn parse(raw: &str) -> Result<Self, WatermarkParseError> {
        NaiveDateTime::parse_from_str(raw.trim(), WATERMARK_PARSE_FORMAT)
            .map(Self)
            .map_err(|_| WatermarkParseError(raw.to_string()))
    }
}

impl Default for Watermark {
    fn default() -> Self {
        Self::epoch()
    }
}

impl From<NaiveDateTime> for Watermark {
    fn from(at: NaiveDateTime) -> Self {
        Self(at)
    }
}

impl fmt::Display for Watermark {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", format_timestamp(self.0))
    }
}

/// `YYYY-MM-DD HH:MM:SS`, with microseconds only when the value carries them.
pub fn format_timestamp(at: NaiveDateTime) -> String {
    if at.nanosecond() == 0 {
        at.format(WATERMARK_FORMAT).to_string()
    } else {
        at.format(WATERMARK_FORMAT_MICROS).to_string()
    }
}

/// One typed column value as read from a source.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Integer(i64),
    Float(f64),
    Text(String),
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Self::Integer(value)
    }
}

impl From<i32> for Value {
    fn from(value: i32) -> Self {
        Self::Integer(value.into())
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Self::Integer(value.into())
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Self::Float(value)
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<NaiveDateTime> for Value {
    fn from(value: NaiveDateTime) -> Self {
        Self::Text(format_timestamp(value))
    }
}

impl<T> From<Option<T>> for Value
where
    T: Into<Value>,
{
    fn from(value: Option<T>) -> Self {
        value.map_or(Self::Null, Into::into)
    }
}

/// Immutable fetched row: values in column order plus the row's position on the ordering axis.
#[derive(Debug, Clone, PartialEq)]
pub struct Row {
    pub values: Vec<Value>,
    pub ordering: Watermark,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct RowSet {
    pub columns: Vec<String>,
    pub rows: Vec<Row>,
}

impl RowSet {
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Highest ordering value in the set; rows arrive ascending so this is the last row.
    pub fn max_ordering(&self) -> Option<Watermark> {
        self.rows.iter().map(|row| row.ordering).max()
    }
}

/// Statement header plus serialized value tuples, in row order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Payload {
    pub header: String,
    pub tuples: Vec<String>,
}

pub const RECORD_SEPARATOR: &str = ",\n";
pub const TERMINATOR: &str = ";\n";

impl Payload {
    /// Tuples joined by the record separator, without header or terminator.
    pub fn body(&self) -> String {
        self.tuples.join(RECORD_SEPARATOR)
    }

    /// Complete self-contained statement.
    pub fn render(&self) -> String {
        format!("{}{}{}", self.header, self.body(), TERMINATOR)
    }
}

#[cfg(test)]
mod tests {
    use super::{format_timestamp, Payload, Value, Watermark};
    use chrono::NaiveDate;

    fn at(h: u32, m: u32, s: u32, micro: u32) -> chrono::NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 3, 5)
            .unwrap()
            .and_hms_micro_opt(h, m, s, micro)
            .unwrap()
    }

    #[test]
    fn watermark_renders_micros_only_when_present() {
        assert_eq!(Watermark::new(at(8, 30, 0, 0)).to_string(), "2024-03-05 08:30:00");
        assert_eq!(
            Watermark::new(at(8, 30, 0, 1500)).to_string(),
            "2024-03-05 08:30:00.001500"
        );
    }

    #[test]
    fn watermark_parse_accepts_both_precisions() {
        assert_eq!(
            Watermark::parse("2024-03-05 08:30:00").unwrap(),
            Watermark::new(at(8, 30, 0, 0))
        );
        assert_eq!(
            Watermark::parse("2024-03-05 08:30:00.001500").unwrap(),
            Watermark::new(at(8, 30, 0, 1500))
        );
        assert!(Watermark::parse("2024-03-05T08:30:00").is_err());
        assert!(Watermark::parse("05-03-2024 08:30:00").is_err());
        assert!(Watermark::parse("").is_err());
    }

    #[test]
    fn epoch_is_default_and_minimal() {
        assert_eq!(Watermark::default().to_string(), "1970-01-01 00:00:00");
        assert!(Watermark::epoch() < Watermark::new(at(0, 0, 0, 0)));
    }

    #[test]
    fn optional_values_map_to_null() {
        assert_eq!(Value::from(None::<String>), Value::Null);
        assert_eq!(Value::from(Some(7i32)), Value::Integer(7));
        assert_eq!(Value::from(true), Value::Integer(1));
        assert_eq!(Value::from(at(1, 2, 3, 0)), Value::Text(format_timestamp(at(1, 2, 3, 0))));
    }

    #[test]
    fn payload_renders_complete_statement() {
        let payload = Payload {
            header: "INSERT INTO `t` (a) VALUES\n".to_string(),
            tuples: vec!["(1)".to_string(), "(2)".to_string()],
        };
        assert_eq!(payload.render(), "INSERT INTO `t` (a) VALUES\n(1),\n(2);\n");
    }
}
