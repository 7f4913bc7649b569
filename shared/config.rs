use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use thiserror::Error;

/// Overrides the worker count regardless of the configuration file.
pub const WORKERS_ENV: &str = "GENOARRAY_WORKERS";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read configuration file: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to parse TOML configuration: {0}")]
    TomlParseError(#[from] toml::de::Error),
    #[error("Failed to serialize configuration to TOML: {0}")]
    TomlSerializeError(#[from] toml::ser::Error),
    #[error("Invalid value '{value}' for {name}: expected a positive integer.")]
    InvalidValue { name: String, value: String },
}

/// Engine tunables. Every field has a default, so a configuration file only
/// needs to name what it changes.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Size of the evaluator's worker pool.
    pub workers: usize,
    /// Chunk length of the `sample_id` dimension of ingested arrays.
    pub sample_chunk: i64,
    /// Chunk length of the `variant_id` dimension of ingested arrays.
    pub variant_chunk: i64,
    /// Chunk length of the dense `0..N-1` matrix dimensions built by the analyses.
    pub matrix_chunk: i64,
    /// Hash partitions used by attribute-key joins.
    pub shuffle_partitions: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        let workers = num_cpus::get().max(1);
        Self {
            workers,
            sample_chunk: 1_024,
            variant_chunk: 4_096,
            matrix_chunk: 256,
            shuffle_partitions: workers * 2,
        }
    }
}

impl EngineConfig {
    /// Reads a TOML file, then applies environment overrides.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = fs::read_to_string(path)?;
        let config: Self = toml::from_str(&text)?;
        config.with_env_overrides()
    }

    /// Defaults plus environment overrides.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::default().with_env_overrides()
    }

    fn with_env_overrides(mut self) -> Result<Self, ConfigError> {
        if let Ok(value) = std::env::var(WORKERS_ENV) {
            self.workers = parse_positive(WORKERS_ENV, &value)?;
            log::info!("> {WORKERS_ENV} set; using {} workers", self.workers);
        }
        self.validate()?;
        Ok(self)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        let checks = [
            ("workers", self.workers as i64),
            ("sample_chunk", self.sample_chunk),
            ("variant_chunk", self.variant_chunk),
            ("matrix_chunk", self.matrix_chunk),
            ("shuffle_partitions", self.shuffle_partitions as i64),
        ];
        for (name, value) in checks {
            if value <= 0 {
                return Err(ConfigError::InvalidValue {
                    name: name.to_string(),
                    value: value.to_string(),
                });
            }
        }
        Ok(())
    }

    pub fn to_toml(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }
}

fn parse_positive(name: &str, value: &str) -> Result<usize, ConfigError> {
    match value.trim().parse::<usize>() {
        Ok(parsed) if parsed > 0 => Ok(parsed),
        _ => Err(ConfigError::InvalidValue {
            name: name.to_string(),
            value: value.to_string(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn partial_files_keep_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "matrix_chunk = 64").unwrap();
        let config = EngineConfig::load(file.path()).unwrap();
        assert_eq!(config.matrix_chunk, 64);
        assert_eq!(config.variant_chunk, EngineConfig::default().variant_chunk);
    }

    #[test]
    fn zero_chunks_are_rejected() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "sample_chunk = 0").unwrap();
        assert!(matches!(
            EngineConfig::load(file.path()),
            Err(ConfigError::InvalidValue { .. })
        ));
    }

    #[test]
    fn toml_round_trip() {
        let config = EngineConfig {
            workers: 3,
            ..EngineConfig::default()
        };
        let parsed: EngineConfig = toml::from_str(&config.to_toml().unwrap()).unwrap();
        assert_eq!(parsed, config);
    }

    #[test]
    fn worker_values_must_be_positive() {
        assert!(parse_positive(WORKERS_ENV, "0").is_err());
        assert!(parse_positive(WORKERS_ENV, "two").is_err());
        assert_eq!(parse_positive(WORKERS_ENV, " 8 ").unwrap(), 8);
    }
}
