//! Loosely typed configuration values and their canonical forms.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::LazyLock;
use std::time::Duration;

use regex::Regex;
use serde::Deserialize;

use super::error::{ConfigError, ConfigResult};

/// A YAML scalar that may be written as a number, a boolean or a string.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum Scalar {
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
}

impl fmt::Display for Scalar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Scalar::Bool(v) => write!(f, "{v}"),
            Scalar::Int(v) => write!(f, "{v}"),
            Scalar::Float(v) => write!(f, "{v}"),
            Scalar::Text(v) => f.write_str(v),
        }
    }
}

/// A field that accepts a single string, a list, or a key/value map.
///
/// `command`, `environment`, `tmpfs` and friends are all written in more than one way in
/// application documents. [`StringOrList::to_vec`] folds every form into a list.
#[derive(Debug, Clone, PartialEq, Default, Deserialize)]
#[serde(untagged)]
pub enum StringOrList {
    #[default]
    Empty,
    Single(String),
    List(Vec<Scalar>),
    Map(BTreeMap<String, Option<Scalar>>),
}

impl StringOrList {
    /// Canonical list form.
    ///
    /// | input            | output          |
    /// |------------------|-----------------|
    /// | absent / null    | `[]`            |
    /// | `"a b"`          | `["a b"]`       |
    /// | `[a, 1]`         | `["a", "1"]`    |
    /// | `{K: V, F: ~}`   | `["F", "K=V"]`  |
    pub fn to_vec(&self) -> Vec<String> {
        match self {
            StringOrList::Empty => Vec::new(),
            StringOrList::Single(value) => vec![value.clone()],
            StringOrList::List(items) => items.iter().map(Scalar::to_string).collect(),
            StringOrList::Map(map) => map
                .iter()
                .map(|(key, value)| match value {
                    Some(value) => format!("{key}={value}"),
                    None => key.clone(),
                })
                .collect(),
        }
    }

    pub fn is_empty(&self) -> bool {
        match self {
            StringOrList::Empty => true,
            StringOrList::Single(_) => false,
            StringOrList::List(items) => items.is_empty(),
            StringOrList::Map(map) => map.is_empty(),
        }
    }

    /// Key/value view, splitting list entries on the first `=`.
    pub fn to_map(&self) -> BTreeMap<String, String> {
        self.to_vec()
            .into_iter()
            .map(|entry| match entry.split_once('=') {
                Some((key, value)) => (key.to_string(), value.to_string()),
                None => (entry, String::new()),
            })
            .collect()
    }
}

static DURATION_PART: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(\d+(?:\.\d+)?)(ns|us|µs|ms|s|m|h)").expect("valid duration regex")
});

/// Parse a stop timeout: bare seconds or a Go-style duration like `1m30s`.
pub fn parse_duration(value: &Scalar) -> ConfigResult<Duration> {
    let text = match value {
        Scalar::Int(secs) if *secs >= 0 => return Ok(Duration::from_secs(*secs as u64)),
        Scalar::Float(secs) if *secs >= 0.0 => return Ok(Duration::from_secs_f64(*secs)),
        Scalar::Text(text) => text.trim(),
        other => return Err(ConfigError::InvalidDuration(other.to_string())),
    };

    if let Ok(secs) = text.parse::<u64>() {
        return Ok(Duration::from_secs(secs));
    }

    let mut total = Duration::ZERO;
    let mut consumed = 0;
    for caps in DURATION_PART.captures_iter(text) {
        let whole = caps.get(0).map(|m| m.as_str().len()).unwrap_or(0);
        let amount: f64 = caps[1]
            .parse()
            .map_err(|_| ConfigError::InvalidDuration(text.to_string()))?;
        let unit = match &caps[2] {
            "ns" => 1e-9,
            "us" | "µs" => 1e-6,
            "ms" => 1e-3,
            "s" => 1.0,
            "m" => 60.0,
            _ => 3600.0,
        };
        total += Duration::from_secs_f64(amount * unit);
        consumed += whole;
    }

    if consumed == 0 || consumed != text.len() {
        return Err(ConfigError::InvalidDuration(text.to_string()));
    }
    Ok(total)
}
