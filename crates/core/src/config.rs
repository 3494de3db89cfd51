use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to parse TOML: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("Invalid setting {key}: {reason}")]
    Invalid { key: &'static str, reason: String },
}

/// Tunables for the match scorer. The scoring curve itself is fixed; these
/// only move the gates and the presentation bands.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MatchingConfig {
    /// Relative amount difference at which a pair stops being a candidate.
    pub max_amount_delta: Decimal,
    /// Date distance beyond which a pair stops being a candidate.
    pub max_date_days: i64,
    pub likely_threshold: u32,
    pub possible_threshold: u32,
}

impl Default for MatchingConfig {
    fn default() -> Self {
        Self {
            max_amount_delta: Decimal::new(30, 2),
            max_date_days: 14,
            likely_threshold: 130,
            possible_threshold: 80,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub matching: MatchingConfig,
}

impl EngineConfig {
    pub fn from_toml(toml_content: &str) -> Result<Self, ConfigError> {
        let config: EngineConfig = toml::from_str(toml_content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let m = &self.matching;
        if m.max_amount_delta <= Decimal::ZERO || m.max_amount_delta > Decimal::ONE {
            return Err(ConfigError::Invalid {
                key: "matching.max_amount_delta",
                reason: format!("{} is outside (0, 1]", m.max_amount_delta),
            });
        }
        if m.max_date_days < 0 {
            return Err(ConfigError::Invalid {
                key: "matching.max_date_days",
                reason: "must not be negative".to_string(),
            });
        }
        if m.possible_threshold > m.likely_threshold {
            return Err(ConfigError::Invalid {
                key: "matching.possible_threshold",
                reason: "must not exceed likely_threshold".to_string(),
            });
        }
        Ok(())
    }
}
