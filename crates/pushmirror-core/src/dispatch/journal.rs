//! On-disk record of requests that have not been dispatched yet.

use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use anyhow::Context;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::{DispatchKey, MirrorRequest};

const JOURNAL_VERSION: u32 = 1;

#[derive(Debug, Default, Serialize, Deserialize)]
struct JournalFile {
    version: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    updated_at: Option<DateTime<Utc>>,
    requests: Vec<MirrorRequest>,
}

/// JSON journal holding the latest request per dispatch key.
#[derive(Debug)]
pub struct RequestJournal {
    path: PathBuf,
    lock: Mutex<()>,
}

impl RequestJournal {
    pub fn new(path: PathBuf) -> Self {
        Self {
            path,
            lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// All journaled requests, oldest first.
    pub fn load(&self) -> anyhow::Result<Vec<MirrorRequest>> {
        let _guard = self.lock.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(self.read()?.requests)
    }

    /// Insert `request`, replacing any entry with the same key.
    pub fn record(&self, request: &MirrorRequest) -> anyhow::Result<()> {
        let _guard = self.lock.lock().unwrap_or_else(PoisonError::into_inner);
        let mut file = self.read()?;
        let key = request.key();
        file.requests.retain(|existing| existing.key() != key);
        file.requests.push(request.clone());
        self.write(&mut file)
    }

    pub fn remove(&self, key: &DispatchKey) -> anyhow::Result<()> {
        let _guard = self.lock.lock().unwrap_or_else(PoisonError::into_inner);
        let mut file = self.read()?;
        let before = file.requests.len();
        file.requests.retain(|existing| &existing.key() != key);
        if file.requests.len() == before {
            return Ok(());
        }
        self.write(&mut file)
    }

    fn read(&self) -> anyhow::Result<JournalFile> {
        if !self.path.exists() {
            return Ok(JournalFile {
                version: JOURNAL_VERSION,
                ..JournalFile::default()
            });
        }
        let content = std::fs::read_to_string(&self.path)
            .with_context(|| format!("Failed to read journal: {}", self.path.display()))?;
        let file: JournalFile = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse journal: {}", self.path.display()))?;
        if file.version != JOURNAL_VERSION {
            anyhow::bail!(
                "Unsupported journal version {} in {}",
                file.version,
                self.path.display()
            );
        }
        Ok(file)
    }

    /// When the journal was last written, if it exists.
    pub fn updated_at(&self) -> anyhow::Result<Option<DateTime<Utc>>> {
        let _guard = self.lock.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(self.read()?.updated_at)
    }

    fn write(&self, file: &mut JournalFile) -> anyhow::Result<()> {
        file.updated_at = Some(Utc::now());
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create journal directory: {}", parent.display())
            })?;
        }
        let content =
            serde_json::to_string_pretty(file).context("Failed to serialize journal")?;
        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, content)
            .with_context(|| format!("Failed to write journal: {}", tmp.display()))?;
        std::fs::rename(&tmp, &self.path)
            .with_context(|| format!("Failed to replace journal: {}", self.path.display()))?;
        Ok(())
    }
}
