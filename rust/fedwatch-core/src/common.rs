//! Timestamp (de)serialization helpers.
//!
//! Ledger entries travel as unix seconds (`1700000000.25`) and audit blocks as ISO-8601 strings
//! (`2023-11-14T22:13:20.250`). Both helpers accept either form on input, since entries written
//! by older trainers may use either one. ISO-8601 strings without an offset are read as UTC.

use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use serde::{
    de::{self, Deserializer, Visitor},
    Serializer,
};
use std::fmt;

/// Converts unix seconds with a fractional part into a UTC timestamp.
pub fn from_unix_seconds(secs: f64) -> Option<DateTime<Utc>> {
    if !secs.is_finite() {
        return None;
    }
    let whole = secs.floor();
    let nanos = ((secs - whole) * 1e9).round() as u32;
    Utc.timestamp_opt(whole as i64, nanos.min(999_999_999)).single()
}

/// Converts a UTC timestamp into unix seconds with a fractional part.
pub fn to_unix_seconds(ts: &DateTime<Utc>) -> f64 {
    ts.timestamp() as f64 + f64::from(ts.timestamp_subsec_nanos()) / 1e9
}

/// Parses an ISO-8601 timestamp, with or without an offset.
pub fn parse_iso8601(s: &str) -> Option<DateTime<Utc>> {
    if let Ok(ts) = DateTime::parse_from_rfc3339(s) {
        return Some(ts.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.f")
        .ok()
        .map(|naive| DateTime::<Utc>::from_utc(naive, Utc))
}

struct TimestampVisitor;

impl<'de> Visitor<'de> for TimestampVisitor {
    type Value = DateTime<Utc>;

    fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
        write!(formatter, "unix seconds or an ISO-8601 timestamp")
    }

    fn visit_f64<E: de::Error>(self, value: f64) -> Result<Self::Value, E> {
        from_unix_seconds(value)
            .ok_or_else(|| de::Error::invalid_value(de::Unexpected::Float(value), &self))
    }

    fn visit_i64<E: de::Error>(self, value: i64) -> Result<Self::Value, E> {
        self.visit_f64(value as f64)
    }

    fn visit_u64<E: de::Error>(self, value: u64) -> Result<Self::Value, E> {
        self.visit_f64(value as f64)
    }

    fn visit_str<E: de::Error>(self, value: &str) -> Result<Self::Value, E> {
        parse_iso8601(value).ok_or_else(|| de::Error::invalid_value(de::Unexpected::Str(value), &self))
    }
}

fn deserialize_any<'de, D>(deserializer: D) -> Result<DateTime<Utc>, D::Error>
where
    D: Deserializer<'de>,
{
    deserializer.deserialize_any(TimestampVisitor)
}

/// `#[serde(with = "...")]` module writing unix seconds.
pub mod unix_seconds {
    use super::*;

    pub fn serialize<S>(ts: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_f64(to_unix_seconds(ts))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<DateTime<Utc>, D::Error>
    where
        D: Deserializer<'de>,
    {
        deserialize_any(deserializer)
    }
}

/// `#[serde(with = "...")]` module writing ISO-8601 strings.
pub mod iso8601 {
    use super::*;

    pub fn serialize<S>(ts: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&ts.format("%Y-%m-%dT%H:%M:%S%.6f").to_string())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<DateTime<Utc>, D::Error>
    where
        D: Deserializer<'de>,
    {
        deserialize_any(deserializer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Serialize, Deserialize, Debug, PartialEq)]
    struct Seconds(#[serde(with = "unix_seconds")] DateTime<Utc>);

    #[derive(Serialize, Deserialize, Debug, PartialEq)]
    struct Iso(#[serde(with = "iso8601")] DateTime<Utc>);

    #[test]
    fn test_accepts_both_forms() {
        let a: Seconds = serde_json::from_str("1700000000.5").unwrap();
        let b: Seconds = serde_json::from_str("\"2023-11-14T22:13:20.500\"").unwrap();
        let c: Iso = serde_json::from_str("\"2023-11-14T22:13:20.5Z\"").unwrap();
        assert_eq!(a.0, b.0);
        assert_eq!(b.0, c.0);
    }

    #[test]
    fn test_integer_seconds() {
        let a: Seconds = serde_json::from_str("1700000000").unwrap();
        assert_eq!(a.0.timestamp(), 1_700_000_000);
        assert_eq!(serde_json::to_string(&a).unwrap(), "1700000000.0");
    }

    #[test]
    fn test_iso_output_has_no_offset() {
        let ts = Utc.timestamp(1_700_000_000, 0);
        assert_eq!(
            serde_json::to_string(&Iso(ts)).unwrap(),
            "\"2023-11-14T22:13:20.000000\""
        );
    }

    #[test]
    fn test_rejects_garbage() {
        assert!(serde_json::from_str::<Seconds>("\"yesterday\"").is_err());
        assert!(serde_json::from_str::<Seconds>("true").is_err());
    }
}
