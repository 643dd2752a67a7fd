//! Flat `key = value` / `key.sub = value` configuration, parsed from TOML.
//! Shaped after the teacher's `utils::config::Config`: a tree is flattened
//! into dotted keys at load time so call sites look up values with a single
//! typed accessor instead of walking a `toml::Value` by hand.

use std::{collections::BTreeMap, path::Path, str::FromStr};

use ahash::AHashMap;

#[derive(Debug, Clone)]
pub struct Config {
    keys: AHashMap<String, String>,
    /// Non-fatal problems discovered while building derived state from this
    /// config (e.g. a bad certificate path); surfaced by callers that know
    /// how to report them, matching the teacher's `Config::new_build_error`.
    build_errors: Vec<(String, String)>,
}

impl Config {
    pub fn parse(input: &str) -> Result<Self, toml::de::Error> {
        let value: toml::Value = toml::from_str(input)?;
        let mut keys = AHashMap::new();
        flatten(&value, String::new(), &mut keys);
        Ok(Config {
            keys,
            build_errors: Vec::new(),
        })
    }

    pub fn from_file(path: impl AsRef<Path>) -> std::io::Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::parse(&text).map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))
    }

    pub fn value(&self, key: &str) -> Option<&str> {
        self.keys.get(key).map(|s| s.as_str())
    }

    pub fn property<T: FromStr>(&self, key: &str) -> Option<T> {
        self.value(key).and_then(|v| v.parse().ok())
    }

    pub fn property_or<T: FromStr>(&self, key: &str, default: T) -> T {
        self.property(key).unwrap_or(default)
    }

    pub fn new_build_error(&mut self, key: impl Into<String>, error: impl std::fmt::Display) {
        self.build_errors.push((key.into(), error.to_string()));
    }

    pub fn build_errors(&self) -> &[(String, String)] {
        &self.build_errors
    }

    /// All keys sharing a dotted prefix, stripped of that prefix — used to
    /// enumerate e.g. `list.*` blocks.
    pub fn sub_keys(&self, prefix: &str) -> BTreeMap<String, String> {
        let prefix = format!("{prefix}.");
        self.keys
            .iter()
            .filter_map(|(k, v)| k.strip_prefix(&prefix).map(|k| (k.to_string(), v.clone())))
            .collect()
    }
}

fn flatten(value: &toml::Value, prefix: String, out: &mut AHashMap<String, String>) {
    match value {
        toml::Value::Table(table) => {
            for (k, v) in table {
                let key = if prefix.is_empty() {
                    k.clone()
                } else {
                    format!("{prefix}.{k}")
                };
                flatten(v, key, out);
            }
        }
        toml::Value::Array(items) => {
            for (i, v) in items.iter().enumerate() {
                flatten(v, format!("{prefix}.{i}"), out);
            }
        }
        toml::Value::String(s) => {
            out.insert(prefix, s.clone());
        }
        other => {
            out.insert(prefix, other.to_string());
        }
    }
}
