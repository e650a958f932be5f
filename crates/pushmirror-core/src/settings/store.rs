//! Persistence of per-repository settings maps.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use anyhow::Context;

use crate::types::RepositoryId;

use super::SettingsMap;

/// Load and replace the settings of a repository as a whole.
pub trait SettingsStore: Send + Sync {
    /// Current settings; empty when none were ever saved.
    fn load(&self, repository: RepositoryId) -> anyhow::Result<SettingsMap>;

    fn save(&self, repository: RepositoryId, settings: &SettingsMap) -> anyhow::Result<()>;
}

/// Stores each repository's settings as `<root>/<id>.toml`.
#[derive(Debug, Clone)]
pub struct FileSettingsStore {
    root: PathBuf,
}

impl FileSettingsStore {
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn path_for(&self, repository: RepositoryId) -> PathBuf {
        self.root.join(format!("{}.toml", repository))
    }
}

impl SettingsStore for FileSettingsStore {
    fn load(&self, repository: RepositoryId) -> anyhow::Result<SettingsMap> {
        let path = self.path_for(repository);
        if !path.exists() {
            return Ok(SettingsMap::new());
        }
        let content = std::fs::read_to_string(&path)
            .with_context(|| format!("Failed to read settings file: {}", path.display()))?;
        toml::from_str(&content)
            .with_context(|| format!("Failed to parse settings file: {}", path.display()))
    }

    fn save(&self, repository: RepositoryId, settings: &SettingsMap) -> anyhow::Result<()> {
        std::fs::create_dir_all(&self.root).with_context(|| {
            format!(
                "Failed to create settings directory: {}",
                self.root.display()
            )
        })?;

        let path = self.path_for(repository);
        let content = toml::to_string_pretty(settings)
            .context("Failed to serialize settings to TOML")?;
        let tmp = path.with_extension("toml.tmp");
        std::fs::write(&tmp, content)
            .with_context(|| format!("Failed to write settings file: {}", tmp.display()))?;
        std::fs::rename(&tmp, &path)
            .with_context(|| format!("Failed to replace settings file: {}", path.display()))?;
        Ok(())
    }
}

/// In-memory [`SettingsStore`] for tests and embedding.
#[derive(Debug, Default)]
pub struct MemorySettingsStore {
    entries: Mutex<HashMap<RepositoryId, SettingsMap>>,
}

impl MemorySettingsStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SettingsStore for MemorySettingsStore {
    fn load(&self, repository: RepositoryId) -> anyhow::Result<SettingsMap> {
        let entries = self
            .entries
            .lock()
            .map_err(|_| anyhow::anyhow!("settings store lock poisoned"))?;
        Ok(entries.get(&repository).cloned().unwrap_or_default())
    }

    fn save(&self, repository: RepositoryId, settings: &SettingsMap) -> anyhow::Result<()> {
        let mut entries = self
            .entries
            .lock()
            .map_err(|_| anyhow::anyhow!("settings store lock poisoned"))?;
        entries.insert(repository, settings.clone());
        Ok(())
    }
}
