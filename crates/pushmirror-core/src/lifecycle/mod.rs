//! Reaction to repositories being renamed, moved or deleted.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, error, warn};

use crate::admin::{DeleteOutcome, RemoteAdmin};
use crate::push::PushRunner;
use crate::settings::{FlagDefaults, SettingsStore, mirror_targets};
use crate::template::{TemplateError, UrlTemplateResolver};
use crate::types::{MirrorTarget, Repository};

/// Receives repository lifecycle events from the host.
#[async_trait]
pub trait RepositoryEventListener: Send + Sync {
    async fn on_repository_renamed(&self, old: &Repository, new: &Repository);

    async fn on_repository_deleted(&self, repository: &Repository);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleAction {
    DeleteRemote,
    Provision,
}

/// What happened to one target during a lifecycle operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetReport {
    pub suffix: String,
    pub action: LifecycleAction,
    /// Captured, redacted output of the operation.
    pub output: String,
    pub error: Option<String>,
}

impl TargetReport {
    pub fn succeeded(&self) -> bool {
        self.error.is_none()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LifecycleReport {
    pub targets: Vec<TargetReport>,
}

impl LifecycleReport {
    pub fn failures(&self) -> impl Iterator<Item = &TargetReport> {
        self.targets.iter().filter(|report| !report.succeeded())
    }

    fn deletions(&self) -> usize {
        self.targets
            .iter()
            .filter(|report| report.action == LifecycleAction::DeleteRemote)
            .count()
    }
}

#[derive(Debug, thiserror::Error)]
pub enum LifecycleError {
    #[error("Failed to load mirror settings: {0:#}")]
    Settings(anyhow::Error),
    #[error(transparent)]
    Template(#[from] TemplateError),
}

/// Deletes remote mirrors of old repository identities and provisions new
/// ones by pushing to them.
pub struct LifecycleCoordinator {
    settings: Arc<dyn SettingsStore>,
    admin: RemoteAdmin,
    runner: Arc<dyn PushRunner>,
    resolver: UrlTemplateResolver,
}

impl LifecycleCoordinator {
    pub fn new(
        settings: Arc<dyn SettingsStore>,
        admin: RemoteAdmin,
        runner: Arc<dyn PushRunner>,
    ) -> Self {
        Self {
            settings,
            admin,
            runner,
            resolver: UrlTemplateResolver::new(),
        }
    }

    fn targets(&self, repository: &Repository) -> Result<Vec<MirrorTarget>, LifecycleError> {
        let settings = self
            .settings
            .load(repository.id)
            .map_err(LifecycleError::Settings)?;
        Ok(mirror_targets(&settings, FlagDefaults::DISPATCH))
    }

    /// Move the mirrors of `old` to the identity of `new`.
    ///
    /// Nothing happens when neither the name nor the project key changed.
    /// Templates for the new identity are resolved before anything is
    /// deleted, so a template error leaves the old mirrors in place.
    pub async fn handle_rename(
        &self,
        old: &Repository,
        new: &Repository,
    ) -> Result<LifecycleReport, LifecycleError> {
        if old.name == new.name && old.project.key == new.project.key {
            debug!(repository = %new, "Repository project and name not changed; nothing to mirror");
            return Ok(LifecycleReport::default());
        }

        let old_targets = self.targets(old)?;
        let new_targets = self
            .resolver
            .resolve_targets(&self.targets(new)?, new)?;

        let mut report = LifecycleReport::default();
        self.delete_all(&old_targets, old, &mut report).await;
        for target in &new_targets {
            report.targets.push(self.provision(target, new).await);
        }
        Ok(report)
    }

    /// Delete the remote mirror of every target with a REST API URL.
    pub async fn handle_delete(
        &self,
        repository: &Repository,
    ) -> Result<LifecycleReport, LifecycleError> {
        let targets = self.targets(repository)?;
        let mut report = LifecycleReport::default();
        self.delete_all(&targets, repository, &mut report).await;
        debug!(
            repository = %repository,
            "Processed {} remote deletion(s)",
            report.deletions()
        );
        Ok(report)
    }

    async fn delete_all(
        &self,
        targets: &[MirrorTarget],
        repository: &Repository,
        report: &mut LifecycleReport,
    ) {
        for target in targets.iter().filter(|target| target.has_rest_api()) {
            debug!(repository = %repository, "Delete mirror for {}", target.rest_api_url());
            let mut output = String::new();
            let error = match self.admin.delete(target, repository, &mut output).await {
                Ok(DeleteOutcome::Deleted(_) | DeleteOutcome::Skipped) => None,
                Err(e) => {
                    warn!(
                        repository = %repository,
                        "Deleting mirror failed: {}\n{}",
                        e,
                        output
                    );
                    Some(e.to_string())
                }
            };
            report.targets.push(TargetReport {
                suffix: target.suffix().to_string(),
                action: LifecycleAction::DeleteRemote,
                output,
                error,
            });
        }
    }

    async fn provision(&self, target: &MirrorTarget, repository: &Repository) -> TargetReport {
        debug!(repository = %repository, mirror = target.url(), "Trigger mirror");
        let (output, error) = match self.runner.run(target, repository).await {
            Ok(outcome) => (outcome.output(), None),
            Err(e) => {
                let output = e.outcome().map(|o| o.output()).unwrap_or_default();
                warn!(
                    repository = %repository,
                    mirror = target.url(),
                    "Mirroring failed: {}\n{}",
                    e,
                    output
                );
                (output, Some(e.to_string()))
            }
        };
        TargetReport {
            suffix: target.suffix().to_string(),
            action: LifecycleAction::Provision,
            output,
            error,
        }
    }
}

#[async_trait]
impl RepositoryEventListener for LifecycleCoordinator {
    async fn on_repository_renamed(&self, old: &Repository, new: &Repository) {
        if let Err(e) = self.handle_rename(old, new).await {
            error!(repository = %new, "Failed to move mirrors after rename: {}", e);
        }
    }

    async fn on_repository_deleted(&self, repository: &Repository) {
        if let Err(e) = self.handle_delete(repository).await {
            error!(repository = %repository, "Failed to delete mirrors: {}", e);
        }
    }
}
