use anyhow::{Context, Result};
use std::fs;
use std::path::{Path, PathBuf};

use crate::{
    config::{ClockConfig, Validate},
    log_error, log_info,
};

pub struct ConfigLoader {
    config_path: PathBuf,
}

impl ConfigLoader {
    /// Loader for `<config dir>/tempoclock/config.toml`.
    pub fn new() -> Result<Self> {
        let config_dir = dirs::config_dir()
            .context("Failed to determine config directory")?
            .join("tempoclock");

        fs::create_dir_all(&config_dir).context("Failed to create config directory")?;

        Ok(Self {
            config_path: config_dir.join("config.toml"),
        })
    }

    pub fn with_path(path: impl Into<PathBuf>) -> Self {
        Self {
            config_path: path.into(),
        }
    }

    pub fn config_path(&self) -> &Path {
        &self.config_path
    }

    /// Reads the file, writing the defaults first if it does not exist.
    pub fn load_or_create(&self) -> Result<ClockConfig> {
        if !self.config_path.exists() {
            let default_config = ClockConfig::default();
            self.save(&default_config)?;
            log_info!("Wrote default configuration to {}", self.config_path.display());
            Ok(default_config)
        } else {
            self.load_and_normalize()
        }
    }

    /// Reads and validates the file. An unreadable file is backed up next
    /// to the original and replaced by the defaults.
    fn load_and_normalize(&self) -> Result<ClockConfig> {
        let content = fs::read_to_string(&self.config_path)
            .with_context(|| format!("Failed to read {}", self.config_path.display()))?;

        let mut config: ClockConfig = match toml::from_str(&content) {
            Ok(config) => config,
            Err(e) => {
                let backup_path = self.config_path.with_extension("toml.backup");
                fs::write(&backup_path, &content).context("Failed to write backup")?;

                log_error!(
                    "Config file corrupted: {}. Backup saved to {:?}. Using defaults.",
                    e,
                    backup_path
                );

                let default = ClockConfig::default();
                self.save(&default)?;
                return Ok(default);
            }
        };

        config.validate();
        Ok(config)
    }

    pub fn save(&self, config: &ClockConfig) -> Result<()> {
        if let Some(parent) = self.config_path.parent() {
            fs::create_dir_all(parent).context("Failed to create config directory")?;
        }
        let toml_string = toml::to_string_pretty(config).context("Failed to serialize config")?;
        fs::write(&self.config_path, toml_string).context("Failed to write config file")?;
        Ok(())
    }
}
