//! Typed metadata attached to every index entry.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

pub const SOURCE: &str = "source";
pub const COLLECTION: &str = "collection";
pub const SOURCE_ID: &str = "source_id";
pub const CHUNK_ID: &str = "chunk_id";
pub const TOTAL_CHUNKS: &str = "total_chunks";
pub const START_LINE: &str = "start_line";
pub const END_LINE: &str = "end_line";
pub const LINE_RANGE: &str = "line_range";
pub const LINE_COUNT: &str = "line_count";
pub const CREATED_AT: &str = "created_at";

/// A single metadata value.
///
/// Serialized untagged, so JSON numbers and strings map directly.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MetaValue {
    Integer(i64),
    Float(f64),
    Text(String),
}

impl MetaValue {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            MetaValue::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            MetaValue::Integer(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            MetaValue::Integer(i) => Some(*i as f64),
            MetaValue::Float(f) => Some(*f),
            MetaValue::Text(_) => None,
        }
    }

    /// Equality that treats `Integer(3)` and `Float(3.0)` as the same value.
    ///
    /// Text compares equal to a number it spells, so a filter literal parsed
    /// as `Integer(2024)` still matches a stored `Text("2024")`.
    pub fn matches(&self, other: &MetaValue) -> bool {
        match (self, other) {
            (MetaValue::Text(a), MetaValue::Text(b)) => a == b,
            (MetaValue::Text(text), number) | (number, MetaValue::Text(text)) => {
                text.trim().parse::<f64>().ok() == number.as_f64()
            }
            (a, b) => a.as_f64() == b.as_f64(),
        }
    }

    /// Parse a CLI-style literal: integers, then floats, then text.
    ///
    /// # Examples
    ///
    /// ```
    /// use ragsync::metadata::MetaValue;
    ///
    /// assert_eq!(MetaValue::parse("12"), MetaValue::Integer(12));
    /// assert_eq!(MetaValue::parse("0.5"), MetaValue::Float(0.5));
    /// assert_eq!(MetaValue::parse("notes"), MetaValue::Text("notes".into()));
    /// ```
    pub fn parse(raw: &str) -> Self {
        if let Ok(i) = raw.parse::<i64>() {
            MetaValue::Integer(i)
        } else if let Ok(f) = raw.parse::<f64>()
            && f.is_finite()
        {
            MetaValue::Float(f)
        } else {
            MetaValue::Text(raw.to_string())
        }
    }
}

impl std::fmt::Display for MetaValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MetaValue::Integer(i) => write!(f, "{i}"),
            MetaValue::Float(x) => write!(f, "{x}"),
            MetaValue::Text(s) => f.write_str(s),
        }
    }
}

impl From<&str> for MetaValue {
    fn from(s: &str) -> Self {
        MetaValue::Text(s.to_string())
    }
}

impl From<String> for MetaValue {
    fn from(s: String) -> Self {
        MetaValue::Text(s)
    }
}

impl From<i64> for MetaValue {
    fn from(i: i64) -> Self {
        MetaValue::Integer(i)
    }
}

impl From<usize> for MetaValue {
    fn from(u: usize) -> Self {
        MetaValue::Integer(i64::try_from(u).unwrap_or(i64::MAX))
    }
}

impl From<f64> for MetaValue {
    fn from(f: f64) -> Self {
        MetaValue::Float(f)
    }
}

/// Metadata map stored with each entry. Ordered so serialization is stable.
pub type Metadata = BTreeMap<String, MetaValue>;

pub fn get_str<'a>(metadata: &'a Metadata, key: &str) -> Option<&'a str> {
    metadata.get(key).and_then(MetaValue::as_str)
}

pub fn get_i64(metadata: &Metadata, key: &str) -> Option<i64> {
    metadata.get(key).and_then(MetaValue::as_i64)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn numeric_values_compare_across_kinds() {
        assert!(MetaValue::Integer(3).matches(&MetaValue::Float(3.0)));
        assert!(!MetaValue::Integer(3).matches(&MetaValue::Text("3".into())));
        assert!(MetaValue::from("a").matches(&MetaValue::from("a")));
    }

    #[test]
    fn json_shape_is_untagged() {
        let mut meta = Metadata::new();
        meta.insert(SOURCE.into(), "/notes/a.md".into());
        meta.insert(START_LINE.into(), 9usize.into());
        meta.insert("weight".into(), 0.25.into());

        let json = serde_json::to_string(&meta).unwrap();
        assert_eq!(
            json,
            r#"{"source":"/notes/a.md","start_line":9,"weight":0.25}"#
        );

        let back: Metadata = serde_json::from_str(&json).unwrap();
        assert_eq!(back, meta);
    }

    #[test]
    fn typed_getters() {
        let mut meta = Metadata::new();
        meta.insert(SOURCE.into(), "a.md".into());
        meta.insert(CHUNK_ID.into(), 2usize.into());
        assert_eq!(get_str(&meta, SOURCE), Some("a.md"));
        assert_eq!(get_i64(&meta, CHUNK_ID), Some(2));
        assert_eq!(get_i64(&meta, SOURCE), None);
        assert_eq!(get_str(&meta, "missing"), None);
    }
}
