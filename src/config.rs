use serde::Deserialize;
use std::path::Path;

use crate::core::AggregationRules;

#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct Config {
    pub database: DatabaseConfig,
    pub ledger: LedgerConfig,
    pub import: ImportConfig,
    pub export: ExportConfig,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct DatabaseConfig {
    pub path: String,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct LedgerConfig {
    /// Typed profile ids shorter than this are rejected.
    pub min_profile_id_len: usize,
    /// Component percentages must add up to this (2-decimal rounding).
    pub percent_total: f64,
    pub max_reference_depth: usize,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ImportConfig {
    /// Maximum in-flight row saves.
    pub concurrency: usize,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ExportConfig {
    pub pretty: bool,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: "data/textile_ledger.db".into(),
        }
    }
}

impl Default for LedgerConfig {
    fn default() -> Self {
        let rules = AggregationRules::default();
        Self {
            min_profile_id_len: rules.min_profile_id_len,
            percent_total: rules.percent_total,
            max_reference_depth: 32,
        }
    }
}

impl Default for ImportConfig {
    fn default() -> Self {
        Self { concurrency: 5 }
    }
}

impl Default for ExportConfig {
    fn default() -> Self {
        Self { pretty: true }
    }
}

impl LedgerConfig {
    pub fn aggregation_rules(&self) -> AggregationRules {
        AggregationRules {
            min_profile_id_len: self.min_profile_id_len,
            percent_total: self.percent_total,
        }
    }
}

impl Config {
    /// Load config from a TOML file. Falls back to defaults if file doesn't exist.
    pub fn load(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref();
        if !path.exists() {
            tracing::info!("Config file {} not found, using defaults", path.display());
            return Self::default();
        }
        match std::fs::read_to_string(path) {
            Ok(contents) => match toml::from_str(&contents) {
                Ok(config) => {
                    tracing::info!("Config loaded from {}", path.display());
                    config
                }
                Err(e) => {
                    tracing::warn!("Failed to parse {}: {e}, using defaults", path.display());
                    Self::default()
                }
            },
            Err(e) => {
                tracing::warn!("Failed to read {}: {e}, using defaults", path.display());
                Self::default()
            }
        }
    }
}
