//! TOML configuration for reviewflow.
//!
//! Every field has a default, so a missing file or a file containing only a
//! few keys is valid. Unknown keys are ignored.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::error::ConfigError;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    /// SQLite database holding decisions, optimization records and events.
    pub database_path: PathBuf,
    /// Fallback `tracing` filter when `RUST_LOG` is not set.
    pub log_level: String,
    pub generation: GenerationConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database_path: PathBuf::from(".reviewflow/reviewflow.db"),
            log_level: "info".to_owned(),
            generation: GenerationConfig::default(),
        }
    }
}

/// Settings for the optimization cache service.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct GenerationConfig {
    /// Upper bound on one provider call. Generation typically takes ~35s.
    pub timeout_secs: u64,
    /// Extra attempts after a transient provider failure.
    pub transient_retries: u32,
    pub default_title_count: u8,
    pub default_faq_target_count: u8,
    /// Used to price a generation when the provider reports tokens but no cost.
    pub pricing: ModelPricing,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 40,
            transient_retries: 1,
            default_title_count: 3,
            default_faq_target_count: 8,
            pricing: ModelPricing::default(),
        }
    }
}

impl GenerationConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// Pricing per million tokens for the generation model.
#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(default)]
pub struct ModelPricing {
    pub input_per_million: f64,
    pub output_per_million: f64,
}

impl Default for ModelPricing {
    fn default() -> Self {
        Self {
            input_per_million: 3.0,
            output_per_million: 15.0,
        }
    }
}

impl ModelPricing {
    pub fn estimate_cost(&self, input_tokens: u64, output_tokens: u64) -> f64 {
        let input_cost = (input_tokens as f64 / 1_000_000.0) * self.input_per_million;
        let output_cost = (output_tokens as f64 / 1_000_000.0) * self.output_per_million;
        input_cost + output_cost
    }
}

impl Config {
    /// Returns the path to the reviewflow config file.
    ///
    /// Prefers `$XDG_CONFIG_HOME/reviewflow/config.toml`; falls back to
    /// `~/.config/reviewflow/config.toml` when the env var is absent.
    pub fn default_path() -> PathBuf {
        let base = std::env::var("XDG_CONFIG_HOME")
            .ok()
            .map(PathBuf::from)
            .or_else(|| {
                std::env::var("HOME")
                    .ok()
                    .map(|h| PathBuf::from(h).join(".config"))
            })
            .unwrap_or_else(|| PathBuf::from(".config"));
        base.join("reviewflow").join("config.toml")
    }

    /// Reads and parses the config file at `path`.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Read` if the file cannot be read and
    /// `ConfigError::Parse` if it is not valid TOML for this schema.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml(&raw).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn from_toml(raw: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(raw)
    }

    /// Like [`Config::load`], but a missing file is `Ok(None)`.
    ///
    /// # Errors
    ///
    /// Same as [`Config::load`] for every failure other than a missing file.
    pub fn load_optional(path: &Path) -> Result<Option<Self>, ConfigError> {
        match Self::load(path) {
            Ok(config) => Ok(Some(config)),
            Err(ConfigError::Read { source, .. })
                if source.kind() == std::io::ErrorKind::NotFound =>
            {
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_file_keeps_defaults() {
        let config = Config::from_toml(
            r#"
            log_level = "debug"

            [generation]
            timeout_secs = 5
            "#,
        )
        .unwrap();
        assert_eq!(config.log_level, "debug");
        assert_eq!(config.generation.timeout(), Duration::from_secs(5));
        assert_eq!(config.generation.transient_retries, 1);
        assert_eq!(config.generation.default_faq_target_count, 8);
        assert_eq!(
            config.database_path,
            PathBuf::from(".reviewflow/reviewflow.db")
        );
    }

    #[test]
    fn missing_file_falls_back_to_defaults() {
        let dir = tempfile::TempDir::new().unwrap();
        let config = Config::load_optional(&dir.path().join("absent.toml"))
            .unwrap()
            .unwrap_or_default();
        assert_eq!(config.generation.timeout_secs, 40);
    }

    #[test]
    fn load_optional_distinguishes_missing_from_broken() {
        let dir = tempfile::TempDir::new().unwrap();
        assert!(Config::load_optional(&dir.path().join("absent.toml"))
            .unwrap()
            .is_none());

        let path = dir.path().join("config.toml");
        std::fs::write(&path, "log_level = [").unwrap();
        assert!(Config::load_optional(&path).is_err());
    }

    #[test]
    fn malformed_file_is_a_parse_error() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "generation = 12").unwrap();
        assert!(matches!(
            Config::load(&path),
            Err(ConfigError::Parse { .. })
        ));
    }

    #[test]
    fn pricing_estimate() {
        let pricing = ModelPricing {
            input_per_million: 3.0,
            output_per_million: 15.0,
        };
        let cost = pricing.estimate_cost(1_000_000, 100_000);
        assert!((cost - 4.5).abs() < 1e-9);
    }
}
