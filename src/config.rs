use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Partitions of at most this many elements are insertion sorted.
pub const DEFAULT_INSERTION_THRESHOLD: usize = 16;

/// Median-of-three needs three distinct indices in every partition above the
/// threshold, so partitions of two elements must be insertion sorted.
pub const MIN_INSERTION_THRESHOLD: usize = 2;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to parse sort config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("failed to read {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid value {value} for '{field}': {reason}")]
    InvalidValue {
        field: String,
        value: String,
        reason: String,
    },
}

impl ConfigError {
    pub fn invalid_value(
        field: impl Into<String>,
        value: impl ToString,
        reason: impl Into<String>,
    ) -> Self {
        Self::InvalidValue {
            field: field.into(),
            value: value.to_string(),
            reason: reason.into(),
        }
    }
}

/// Tuning for [`SortEngine`](crate::SortEngine).
///
/// Read from the `[sort]` table of a TOML document:
///
/// ```toml
/// [sort]
/// insertion_threshold = 24
/// seed = 7
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SortConfig {
    pub insertion_threshold: usize,
    /// Fixed pivot seed for reproducible sorts. Entropy-seeded when absent.
    pub seed: Option<u64>,
}

impl Default for SortConfig {
    fn default() -> Self {
        SortConfig {
            insertion_threshold: DEFAULT_INSERTION_THRESHOLD,
            seed: None,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct Document {
    #[serde(default)]
    sort: SortConfig,
}

impl SortConfig {
    pub fn seeded(seed: u64) -> Self {
        SortConfig {
            seed: Some(seed),
            ..SortConfig::default()
        }
    }

    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let document: Document = toml::from_str(content)?;
        document.sort.validate()?;
        Ok(document.sort)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&content)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.insertion_threshold < MIN_INSERTION_THRESHOLD {
            return Err(ConfigError::invalid_value(
                "insertion_threshold",
                self.insertion_threshold,
                format!("must be at least {MIN_INSERTION_THRESHOLD}"),
            ));
        }
        Ok(())
    }
}
