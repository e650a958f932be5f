//! Access to the repositories being mirrored.

use std::collections::BTreeMap;

use anyhow::Context;
use async_trait::async_trait;

use crate::config::RepositoryEntry;
use crate::types::{Repository, RepositoryId};

/// Host-side lookup of repositories.
#[async_trait]
pub trait RepositoryService: Send + Sync {
    /// Current state of the repository, or `None` if it was deleted.
    async fn get_by_id(&self, id: RepositoryId) -> anyhow::Result<Option<Repository>>;

    /// Whether the repository has no refs yet.
    async fn is_empty(&self, repository: &Repository) -> anyhow::Result<bool>;
}

/// [`RepositoryService`] over the repositories declared in `pushmirror.toml`.
#[derive(Debug, Clone, Default)]
pub struct LocalRepositoryService {
    repositories: BTreeMap<RepositoryId, Repository>,
}

impl LocalRepositoryService {
    pub fn new(repositories: impl IntoIterator<Item = Repository>) -> Self {
        Self {
            repositories: repositories
                .into_iter()
                .map(|repository| (repository.id, repository))
                .collect(),
        }
    }

    pub fn from_entries(entries: &[RepositoryEntry]) -> Self {
        Self::new(entries.iter().map(RepositoryEntry::to_repository))
    }

    pub fn repositories(&self) -> impl Iterator<Item = &Repository> {
        self.repositories.values()
    }
}

#[async_trait]
impl RepositoryService for LocalRepositoryService {
    async fn get_by_id(&self, id: RepositoryId) -> anyhow::Result<Option<Repository>> {
        Ok(self
            .repositories
            .get(&id)
            .filter(|repository| repository.path.exists())
            .cloned())
    }

    async fn is_empty(&self, repository: &Repository) -> anyhow::Result<bool> {
        let path = repository.path.clone();
        tokio::task::spawn_blocking(move || has_no_refs(&path))
            .await
            .context("Repository inspection task failed")?
    }
}

fn has_no_refs(path: &std::path::Path) -> anyhow::Result<bool> {
    let repo = git2::Repository::open(path)
        .with_context(|| format!("Failed to open repository: {}", path.display()))?;
    let mut references = repo
        .references()
        .with_context(|| format!("Failed to list references: {}", path.display()))?;
    Ok(references.next().is_none())
}
