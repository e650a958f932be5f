//! Key-value persistence used by the vault for its symmetric key.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use anyhow::Context;

/// Namespaced string storage provided by the host.
pub trait KeyValueStore: Send + Sync {
    fn get(&self, namespace: &str, key: &str) -> anyhow::Result<Option<String>>;
    fn put(&self, namespace: &str, key: &str, value: &str) -> anyhow::Result<()>;
}

/// TOML file with one table per namespace.
#[derive(Debug)]
pub struct FileKeyValueStore {
    path: PathBuf,
    lock: Mutex<()>,
}

impl FileKeyValueStore {
    pub fn new(path: PathBuf) -> Self {
        Self {
            path,
            lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read(&self) -> anyhow::Result<toml::Table> {
        if !self.path.exists() {
            return Ok(toml::Table::new());
        }
        let content = std::fs::read_to_string(&self.path)
            .with_context(|| format!("Failed to read key store: {}", self.path.display()))?;
        toml::from_str(&content)
            .with_context(|| format!("Failed to parse key store: {}", self.path.display()))
    }

    fn write(&self, table: &toml::Table) -> anyhow::Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create key store directory: {}", parent.display())
            })?;
        }
        let content = toml::to_string(table).context("Failed to serialize key store")?;
        let tmp_path = self.path.with_extension("tmp");
        std::fs::write(&tmp_path, content)
            .with_context(|| format!("Failed to write key store: {}", tmp_path.display()))?;
        restrict_permissions(&tmp_path)?;
        std::fs::rename(&tmp_path, &self.path)
            .with_context(|| format!("Failed to replace key store: {}", self.path.display()))?;
        Ok(())
    }
}

impl KeyValueStore for FileKeyValueStore {
    fn get(&self, namespace: &str, key: &str) -> anyhow::Result<Option<String>> {
        let _guard = self
            .lock
            .lock()
            .map_err(|_| anyhow::anyhow!("Key store lock poisoned"))?;
        let table = self.read()?;
        Ok(table
            .get(namespace)
            .and_then(|section| section.get(key))
            .and_then(|value| value.as_str())
            .map(str::to_string))
    }

    fn put(&self, namespace: &str, key: &str, value: &str) -> anyhow::Result<()> {
        let _guard = self
            .lock
            .lock()
            .map_err(|_| anyhow::anyhow!("Key store lock poisoned"))?;
        let mut table = self.read()?;
        let section = table
            .entry(namespace.to_string())
            .or_insert_with(|| toml::Value::Table(toml::Table::new()));
        let toml::Value::Table(section) = section else {
            anyhow::bail!("Key store entry '{}' is not a table", namespace);
        };
        section.insert(key.to_string(), toml::Value::String(value.to_string()));
        self.write(&table)
    }
}

#[cfg(unix)]
fn restrict_permissions(path: &Path) -> anyhow::Result<()> {
    use std::os::unix::fs::PermissionsExt;

    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))
        .with_context(|| format!("Failed to restrict permissions on {}", path.display()))
}

#[cfg(not(unix))]
fn restrict_permissions(_path: &Path) -> anyhow::Result<()> {
    Ok(())
}

/// In-process store, mostly useful for tests and embedding.
#[derive(Debug, Default)]
pub struct MemoryKeyValueStore {
    values: Mutex<BTreeMap<(String, String), String>>,
}

impl MemoryKeyValueStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl KeyValueStore for MemoryKeyValueStore {
    fn get(&self, namespace: &str, key: &str) -> anyhow::Result<Option<String>> {
        let values = self
            .values
            .lock()
            .map_err(|_| anyhow::anyhow!("Key store lock poisoned"))?;
        Ok(values
            .get(&(namespace.to_string(), key.to_string()))
            .cloned())
    }

    fn put(&self, namespace: &str, key: &str, value: &str) -> anyhow::Result<()> {
        let mut values = self
            .values
            .lock()
            .map_err(|_| anyhow::anyhow!("Key store lock poisoned"))?;
        values.insert(
            (namespace.to_string(), key.to_string()),
            value.to_string(),
        );
        Ok(())
    }
}
