//! Configuration sources

use std::collections::HashMap;
use std::path::Path;

use crate::error::{Result, SyncError};

/// A flat key/value lookup that configuration is read from
pub trait ConfigSource: Send + Sync {
    /// Return the value for `key`; blank values count as absent
    fn get(&self, key: &str) -> Option<String>;
}

fn non_blank(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

/// Process environment
#[derive(Debug, Default, Clone, Copy)]
pub struct EnvSource;

impl ConfigSource for EnvSource {
    fn get(&self, key: &str) -> Option<String> {
        non_blank(std::env::var(key).ok())
    }
}

/// In-memory map, mostly for tests and embedding
#[derive(Debug, Default, Clone)]
pub struct MapSource {
    values: HashMap<String, String>,
}

impl MapSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.values.insert(key.into(), value.into());
        self
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.values.insert(key.into(), value.into());
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for MapSource {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self {
            values: iter
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }
}

impl ConfigSource for MapSource {
    fn get(&self, key: &str) -> Option<String> {
        non_blank(self.values.get(key).cloned())
    }
}

/// Flat TOML file using the same keys as the environment.
///
/// ```toml
/// SYNC_PAIRS = ["aws:wasabi", "aws:b2"]
/// SYNC_EXCLUDE_BUCKETS = "tmp scratch"
/// AWS_S3_ENDPOINT = "https://s3.amazonaws.com"
/// ```
///
/// Arrays are joined with commas, numbers and booleans are stringified.
#[derive(Debug, Clone)]
pub struct FileSource {
    inner: MapSource,
}

impl FileSource {
    /// Load from a path; `~` is expanded
    pub fn load(path: &str) -> Result<Self> {
        let expanded = shellexpand::tilde(path).to_string();
        let content = std::fs::read_to_string(Path::new(&expanded)).map_err(|e| {
            SyncError::Configuration(format!("cannot read config file {}: {}", expanded, e))
        })?;
        Self::parse(&content)
    }

    pub fn parse(content: &str) -> Result<Self> {
        let table: toml::Table = content.parse()?;
        let mut inner = MapSource::new();

        for (key, value) in table {
            let flat = match value {
                toml::Value::String(s) => s,
                toml::Value::Integer(i) => i.to_string(),
                toml::Value::Float(f) => f.to_string(),
                toml::Value::Boolean(b) => b.to_string(),
                toml::Value::Array(items) => items
                    .iter()
                    .map(|item| match item {
                        toml::Value::String(s) => Ok(s.clone()),
                        other => Err(SyncError::Configuration(format!(
                            "{}: array items must be strings, found {}",
                            key,
                            other.type_str()
                        ))),
                    })
                    .collect::<Result<Vec<_>>>()?
                    .join(","),
                other => {
                    return Err(SyncError::Configuration(format!(
                        "{}: unsupported value type {}",
                        key,
                        other.type_str()
                    )))
                }
            };
            inner.set(key, flat);
        }

        Ok(Self { inner })
    }
}

impl ConfigSource for FileSource {
    fn get(&self, key: &str) -> Option<String> {
        self.inner.get(key)
    }
}

/// Ordered stack of sources; the first one holding a key wins
#[derive(Default)]
pub struct LayeredSource {
    layers: Vec<Box<dyn ConfigSource>>,
}

impl LayeredSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(mut self, source: impl ConfigSource + 'static) -> Self {
        self.layers.push(Box::new(source));
        self
    }
}

impl ConfigSource for LayeredSource {
    fn get(&self, key: &str) -> Option<String> {
        self.layers.iter().find_map(|layer| layer.get(key))
    }
}
