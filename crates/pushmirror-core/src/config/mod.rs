//! Process-level configuration for pushmirror.
//!
//! Configuration is read from `pushmirror.toml`; every value has a default so
//! an empty or missing file is valid. Selected values can be overridden with
//! `PUSHMIRROR_*` environment variables.

mod store;

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::types::{Project, Repository, RepositoryId};

pub use store::{CONFIG_FILE_NAME, ConfigStore};

/// Root of `pushmirror.toml`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MirrorConfig {
    /// Directory holding the key store, settings and request journal.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub state_dir: Option<PathBuf>,
    pub push: PushConfig,
    pub dispatch: DispatchConfig,
    #[serde(rename = "repository", skip_serializing_if = "Vec::is_empty")]
    pub repositories: Vec<RepositoryEntry>,
}

impl MirrorConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply `PUSHMIRROR_*` overrides read through `lookup`.
    ///
    /// Unparseable numeric values are ignored with a warning.
    pub fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(dir) = lookup("PUSHMIRROR_STATE_DIR").filter(|v| !v.is_empty()) {
            self.state_dir = Some(PathBuf::from(dir));
        }
        if let Some(git) = lookup("PUSHMIRROR_GIT_BINARY").filter(|v| !v.is_empty()) {
            self.push.git_binary = git;
        }
        override_number(&lookup, "PUSHMIRROR_PUSH_TIMEOUT_SECS", &mut self.push.timeout_secs);
        override_number(&lookup, "PUSHMIRROR_ATTEMPTS", &mut self.dispatch.attempts);
        override_number(&lookup, "PUSHMIRROR_THREADS", &mut self.dispatch.threads);
        override_number(
            &lookup,
            "PUSHMIRROR_DEBOUNCE_SECS",
            &mut self.dispatch.debounce_secs,
        );
        override_number(
            &lookup,
            "PUSHMIRROR_RETRY_BACKOFF_SECS",
            &mut self.dispatch.retry_backoff_secs,
        );
    }

    /// Look up a registered repository by numeric id or `PROJECT/slug`.
    pub fn find_repository(&self, reference: &str) -> Option<&RepositoryEntry> {
        if let Ok(id) = reference.parse::<u32>() {
            return self.repositories.iter().find(|entry| entry.id == id);
        }
        let (project, slug) = reference.split_once('/')?;
        self.repositories
            .iter()
            .find(|entry| entry.project.eq_ignore_ascii_case(project) && entry.slug() == slug)
    }
}

fn override_number<F, T>(lookup: &F, name: &str, slot: &mut T)
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
{
    let Some(raw) = lookup(name) else {
        return;
    };
    match raw.trim().parse() {
        Ok(value) => *slot = value,
        Err(_) => tracing::warn!("Ignoring invalid value for {}: {:?}", name, raw),
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PushConfig {
    pub timeout_secs: u64,
    pub git_binary: String,
}

impl Default for PushConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 120,
            git_binary: "git".to_string(),
        }
    }
}

impl PushConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatchConfig {
    /// Maximum push attempts per request, including the first.
    pub attempts: u32,
    /// Keys that may push at the same time.
    pub threads: usize,
    pub debounce_secs: u64,
    pub retry_backoff_secs: u64,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            attempts: 5,
            threads: 3,
            debounce_secs: 5,
            retry_backoff_secs: 10,
        }
    }
}

/// A local repository the CLI can act on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepositoryEntry {
    pub id: u32,
    pub project: String,
    #[serde(default)]
    pub project_id: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project_name: Option<String>,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub slug: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub path: PathBuf,
}

impl RepositoryEntry {
    /// Explicit slug, or the name lower-cased with spaces replaced by `-`.
    pub fn slug(&self) -> String {
        self.slug
            .clone()
            .unwrap_or_else(|| self.name.to_lowercase().replace(' ', "-"))
    }

    pub fn to_repository(&self) -> Repository {
        Repository {
            id: RepositoryId(self.id),
            name: self.name.clone(),
            slug: self.slug(),
            project: Project {
                id: self.project_id,
                key: self.project.clone(),
                name: self
                    .project_name
                    .clone()
                    .unwrap_or_else(|| self.project.clone()),
            },
            scm_id: "git".to_string(),
            description: self.description.clone(),
            path: self.path.clone(),
        }
    }
}
