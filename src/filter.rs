//! Metadata filters applied by the vector index.
//!
//! A [`Filter`] is a conjunction of [`Predicate`]s. An empty filter matches
//! everything.

use serde::{Deserialize, Serialize};

use crate::{
    error::{Error, Result},
    metadata::{self, MetaValue, Metadata},
};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Predicate {
    Eq { key: String, value: MetaValue },
    Ne { key: String, value: MetaValue },
    In { key: String, values: Vec<MetaValue> },
    Gte { key: String, value: f64 },
    Lte { key: String, value: f64 },
}

impl Predicate {
    /// A predicate on a missing key is false, except `Ne`.
    pub fn matches(&self, metadata: &Metadata) -> bool {
        match self {
            Predicate::Eq { key, value } => {
                metadata.get(key).is_some_and(|v| v.matches(value))
            }
            Predicate::Ne { key, value } => {
                metadata.get(key).is_none_or(|v| !v.matches(value))
            }
            Predicate::In { key, values } => metadata
                .get(key)
                .is_some_and(|v| values.iter().any(|c| v.matches(c))),
            Predicate::Gte { key, value } => metadata
                .get(key)
                .and_then(MetaValue::as_f64)
                .is_some_and(|v| v >= *value),
            Predicate::Lte { key, value } => metadata
                .get(key)
                .and_then(MetaValue::as_f64)
                .is_some_and(|v| v <= *value),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Filter {
    predicates: Vec<Predicate>,
}

impl Filter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Match entries whose `source` metadata equals `source`.
    pub fn source(source: &str) -> Self {
        Self::new().eq(metadata::SOURCE, source)
    }

    pub fn eq(mut self, key: &str, value: impl Into<MetaValue>) -> Self {
        self.predicates.push(Predicate::Eq {
            key: key.to_string(),
            value: value.into(),
        });
        self
    }

    pub fn ne(mut self, key: &str, value: impl Into<MetaValue>) -> Self {
        self.predicates.push(Predicate::Ne {
            key: key.to_string(),
            value: value.into(),
        });
        self
    }

    pub fn one_of(mut self, key: &str, values: Vec<MetaValue>) -> Self {
        self.predicates.push(Predicate::In {
            key: key.to_string(),
            values,
        });
        self
    }

    pub fn gte(mut self, key: &str, value: f64) -> Self {
        self.predicates.push(Predicate::Gte {
            key: key.to_string(),
            value,
        });
        self
    }

    pub fn lte(mut self, key: &str, value: f64) -> Self {
        self.predicates.push(Predicate::Lte {
            key: key.to_string(),
            value,
        });
        self
    }

    /// Conjunction of both filters.
    pub fn and(mut self, other: Filter) -> Self {
        self.predicates.extend(other.predicates);
        self
    }

    pub fn predicates(&self) -> &[Predicate] {
        &self.predicates
    }

    pub fn is_empty(&self) -> bool {
        self.predicates.is_empty()
    }

    pub fn matches(&self, metadata: &Metadata) -> bool {
        self.predicates.iter().all(|p| p.matches(metadata))
    }

    /// Build an equality filter from `key=value` pairs.
    ///
    /// `key!=value`, `key>=n` and `key<=n` are accepted as well.
    ///
    /// # Examples
    ///
    /// ```
    /// use ragsync::filter::Filter;
    ///
    /// let filter = Filter::parse_pairs(&["source=/notes/a.md", "start_line>=10"]).unwrap();
    /// assert_eq!(filter.predicates().len(), 2);
    /// ```
    pub fn parse_pairs<S: AsRef<str>>(pairs: &[S]) -> Result<Self> {
        let mut filter = Self::new();
        for pair in pairs {
            filter = filter.and(Self::parse_pair(pair.as_ref())?);
        }
        Ok(filter)
    }

    fn parse_pair(pair: &str) -> Result<Self> {
        let invalid = || {
            Error::Configuration(format!(
                "invalid filter '{pair}', expected key=value"
            ))
        };

        // two-character operators first so "=" does not split ">="
        let (key, op, value) = [">=", "<=", "!=", "="]
            .into_iter()
            .find_map(|op| {
                pair.split_once(op).map(|(k, v)| (k.trim(), op, v.trim()))
            })
            .ok_or_else(invalid)?;
        if key.is_empty() {
            return Err(invalid());
        }

        let filter = match op {
            ">=" => Self::new().gte(key, parse_number(key, value)?),
            "<=" => Self::new().lte(key, parse_number(key, value)?),
            "!=" => Self::new().ne(key, MetaValue::parse(value)),
            _ => Self::new().eq(key, MetaValue::parse(value)),
        };
        Ok(filter)
    }
}

fn parse_number(key: &str, value: &str) -> Result<f64> {
    value.parse::<f64>().map_err(|_| {
        Error::Configuration(format!(
            "filter on '{key}' needs a number, got '{value}'"
        ))
    })
}
