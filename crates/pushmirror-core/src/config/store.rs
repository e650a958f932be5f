//! Config store for loading and saving pushmirror.toml.

use std::path::{Path, PathBuf};

use anyhow::Context;

use super::MirrorConfig;

pub const CONFIG_FILE_NAME: &str = "pushmirror.toml";

#[derive(Debug, Clone)]
pub struct ConfigStore {
    config_path: PathBuf,
}

impl ConfigStore {
    /// Store rooted in the user's config directory (`~/.config/pushmirror`).
    pub fn from_default_location() -> anyhow::Result<Self> {
        let dir = dirs::config_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not determine config directory"))?
            .join("pushmirror");
        Ok(Self::from_path(dir.join(CONFIG_FILE_NAME)))
    }

    pub fn from_path(config_path: PathBuf) -> Self {
        Self { config_path }
    }

    pub fn config_path(&self) -> &Path {
        &self.config_path
    }

    /// Read the file (defaults when it does not exist) without env overrides.
    pub fn load(&self) -> anyhow::Result<MirrorConfig> {
        if !self.config_path.exists() {
            return Ok(MirrorConfig::new());
        }
        let content = std::fs::read_to_string(&self.config_path).with_context(|| {
            format!("Failed to read config file: {}", self.config_path.display())
        })?;
        toml::from_str(&content).with_context(|| {
            format!(
                "Failed to parse config file: {}",
                self.config_path.display()
            )
        })
    }

    /// [`ConfigStore::load`] followed by `PUSHMIRROR_*` environment overrides.
    pub fn load_with_env(&self) -> anyhow::Result<MirrorConfig> {
        let mut config = self.load()?;
        config.apply_overrides(|name| std::env::var(name).ok());
        Ok(config)
    }

    pub fn save(&self, config: &MirrorConfig) -> anyhow::Result<()> {
        let content =
            toml::to_string_pretty(config).context("Failed to serialize config to TOML")?;
        if let Some(parent) = self.config_path.parent() {
            std::fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create config directory: {}", parent.display())
            })?;
        }
        std::fs::write(&self.config_path, content).with_context(|| {
            format!(
                "Failed to write config file: {}",
                self.config_path.display()
            )
        })?;
        Ok(())
    }
}
