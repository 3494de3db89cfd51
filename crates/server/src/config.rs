use std::path::{Path, PathBuf};

use anyhow::Context;
use matchbook_core::{ConfigError, EngineConfig};
use serde::{Deserialize, Serialize};

/// Environment variable naming the TOML config file.
pub const CONFIG_ENV: &str = "MATCHBOOK_CONFIG";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind_addr: String,
    /// Falls back to the platform data directory when unset.
    pub database_path: Option<PathBuf>,
    pub log_filter: String,
    pub engine: EngineConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1:8080".to_string(),
            database_path: None,
            log_filter: "info,matchbook=debug,sqlx=warn".to_string(),
            engine: EngineConfig::default(),
        }
    }
}

impl ServerConfig {
    pub fn from_toml(toml_content: &str) -> Result<Self, ConfigError> {
        let config: ServerConfig = toml::from_str(toml_content)?;
        config.engine.validate()?;
        Ok(config)
    }

    /// Reads the file named by `MATCHBOOK_CONFIG`, or returns defaults when
    /// the variable is not set.
    pub fn load() -> anyhow::Result<Self> {
        match std::env::var_os(CONFIG_ENV) {
            Some(path) => Self::from_file(Path::new(&path)),
            None => Ok(Self::default()),
        }
    }

    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("reading config {}", path.display()))?;
        Self::from_toml(&content).with_context(|| format!("parsing config {}", path.display()))
    }

    pub fn database_path(&self) -> anyhow::Result<PathBuf> {
        if let Some(path) = &self.database_path {
            return Ok(path.clone());
        }
        let dirs = directories::ProjectDirs::from("com", "matchbook", "Matchbook")
            .context("no home directory to place the database in")?;
        let data_dir = dirs.data_dir();
        std::fs::create_dir_all(data_dir)
            .with_context(|| format!("creating {}", data_dir.display()))?;
        Ok(data_dir.join("matchbook.db"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_gives_defaults() {
        let config = ServerConfig::from_toml("").unwrap();
        assert_eq!(config, ServerConfig::default());
    }

    #[test]
    fn nested_engine_settings_are_read() {
        let config = ServerConfig::from_toml(
            r#"
            bind_addr = "0.0.0.0:9000"
            database_path = "/tmp/books.db"

            [engine.matching]
            max_date_days = 7
            "#,
        )
        .unwrap();
        assert_eq!(config.bind_addr, "0.0.0.0:9000");
        assert_eq!(config.database_path, Some(PathBuf::from("/tmp/books.db")));
        assert_eq!(config.engine.matching.max_date_days, 7);
        assert_eq!(config.engine.matching.likely_threshold, 130);
    }

    #[test]
    fn invalid_engine_settings_are_rejected() {
        let err = ServerConfig::from_toml("[engine.matching]\nmax_date_days = -1\n").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { .. }));
    }
}
