//! Entry points invoked by the host: post-receive, settings validation, and
//! the manual per-target actions.

use std::collections::BTreeMap;
use std::sync::Arc;

use tracing::{debug, info, trace};

use crate::admin::{AdminError, DeleteOutcome, RemoteAdmin};
use crate::dispatch::{DispatchError, MirrorDispatcher};
use crate::push::PushRunner;
use crate::settings::{
    FlagDefaults, SETTING_MIRROR_REPO_URL, SettingValue, SettingsBuilder, SettingsMap,
    SettingsStore, ValidationErrors, mirror_target, mirror_targets, validate_targets,
};
use crate::template::{TemplateError, UrlTemplateResolver};
use crate::types::{MirrorTarget, Repository};
use crate::vault::{CredentialVault, VaultError};

/// What caused a post-update notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HookTrigger {
    Push,
    BranchCreate,
    BranchDelete,
    TagCreate,
    TagDelete,
    PullRequestMerge,
    FileEdit,
    Manual,
    /// Updates whose origin the host cannot tell; these never mirror.
    Unknown,
}

#[derive(Debug, thiserror::Error)]
pub enum HookError {
    #[error("Failed to access mirror settings: {0:#}")]
    Settings(anyhow::Error),
    #[error("Invalid mirror settings: {0}")]
    Validation(#[from] ValidationErrors),
    #[error(transparent)]
    Vault(#[from] VaultError),
    #[error(transparent)]
    Template(#[from] TemplateError),
    #[error(transparent)]
    Dispatch(#[from] DispatchError),
    #[error("No mirror is configured with suffix {suffix}")]
    UnknownTarget { suffix: String },
}

/// Captured result of a manual action on one target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActionOutput {
    pub suffix: String,
    pub succeeded: bool,
    /// Redacted output; on failure prefixed with the error message.
    pub output: String,
}

/// Mirror settings with every URL template resolved for display.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SettingsPreview {
    pub settings: SettingsMap,
    /// Template errors keyed by the `mirrorRepoUrl<N>` setting they came from.
    pub errors: BTreeMap<String, String>,
}

pub struct MirrorHook {
    settings: Arc<dyn SettingsStore>,
    vault: Arc<CredentialVault>,
    dispatcher: MirrorDispatcher,
    runner: Arc<dyn PushRunner>,
    admin: RemoteAdmin,
    resolver: UrlTemplateResolver,
}

impl MirrorHook {
    pub fn new(
        settings: Arc<dyn SettingsStore>,
        vault: Arc<CredentialVault>,
        dispatcher: MirrorDispatcher,
        runner: Arc<dyn PushRunner>,
        admin: RemoteAdmin,
    ) -> Self {
        Self {
            settings,
            vault,
            dispatcher,
            runner,
            admin,
            resolver: UrlTemplateResolver::new(),
        }
    }

    pub fn dispatcher(&self) -> &MirrorDispatcher {
        &self.dispatcher
    }

    fn load(&self, repository: &Repository) -> Result<SettingsMap, HookError> {
        self.settings
            .load(repository.id)
            .map_err(HookError::Settings)
    }

    /// Schedule pushes to every configured mirror after `repository` changed.
    ///
    /// Returns the number of pushes scheduled.
    pub fn post_update(
        &self,
        repository: &Repository,
        trigger: HookTrigger,
    ) -> Result<usize, HookError> {
        debug!(repository = %repository, "postUpdate {}", repository.name);
        if trigger == HookTrigger::Unknown {
            trace!(repository = %repository, "Skipping trigger {:?}", trigger);
            return Ok(0);
        }
        if !repository.is_git() {
            return Ok(0);
        }

        let targets = mirror_targets(&self.load(repository)?, FlagDefaults::DISPATCH);
        if targets.is_empty() {
            debug!(repository = %repository, "Mirroring is not configured");
            return Ok(0);
        }
        debug!(
            repository = %repository,
            "Scheduling pushes for {} remote(s) after {:?}",
            targets.len(),
            trigger
        );
        self.schedule_pushes(repository, &targets)
    }

    pub fn schedule_pushes(
        &self,
        repository: &Repository,
        targets: &[MirrorTarget],
    ) -> Result<usize, HookError> {
        Ok(self.dispatcher.schedule(repository, targets)?)
    }

    /// Validate submitted settings without storing anything.
    pub fn validate_settings(
        &self,
        submitted: &SettingsMap,
    ) -> Result<Vec<MirrorTarget>, ValidationErrors> {
        validate_targets(mirror_targets(submitted, FlagDefaults::FORM))
    }

    /// Validate `submitted`, store it with secrets encrypted and schedule
    /// pushes with the new settings.
    pub fn apply_settings(
        &self,
        repository: &Repository,
        submitted: &SettingsMap,
    ) -> Result<SettingsMap, HookError> {
        let targets = self.validate_settings(submitted)?;

        let encrypted = targets
            .iter()
            .map(|target| self.encrypt_secrets(target))
            .collect::<Result<Vec<_>, _>>()?;
        let settings = SettingsBuilder::from_map(submitted.clone())
            .drop_orphaned_secrets()
            .targets(&encrypted)
            .build();

        self.settings
            .save(repository.id, &settings)
            .map_err(HookError::Settings)?;
        info!(
            repository = %repository,
            "Saved settings for {} mirror(s)",
            encrypted.len()
        );

        self.schedule_pushes(repository, &encrypted)?;
        Ok(settings)
    }

    fn encrypt_secrets(&self, target: &MirrorTarget) -> Result<MirrorTarget, VaultError> {
        let encrypt = |value: &str| {
            if value.is_empty() {
                Ok(String::new())
            } else {
                self.vault.encrypt(value)
            }
        };
        Ok(target
            .to_builder()
            .password(encrypt(target.password())?)
            .private_token(encrypt(target.private_token())?)
            .build())
    }

    fn target(&self, repository: &Repository, suffix: &str) -> Result<MirrorTarget, HookError> {
        mirror_target(&self.load(repository)?, suffix, FlagDefaults::DISPATCH).ok_or_else(|| {
            HookError::UnknownTarget {
                suffix: suffix.to_string(),
            }
        })
    }

    /// Push to the target stored under `suffix` right away, bypassing the
    /// dispatcher.
    pub async fn trigger_push(
        &self,
        repository: &Repository,
        suffix: &str,
    ) -> Result<ActionOutput, HookError> {
        let target = self.target(repository, suffix)?;
        let target = self.resolver.resolve_target(&target, repository)?;
        debug!(repository = %repository, "Trigger mirror for {}", target.url());

        let (succeeded, output) = match self.runner.run(&target, repository).await {
            Ok(outcome) => (true, outcome.output()),
            Err(e) => {
                debug!(repository = %repository, "Mirroring failed with {}", e);
                let output = e.outcome().map(|o| o.output()).unwrap_or_default();
                (false, join_error(&e.to_string(), &output))
            }
        };
        Ok(ActionOutput {
            suffix: suffix.to_string(),
            succeeded,
            output,
        })
    }

    /// Delete the remote repository of the target stored under `suffix`.
    pub async fn delete_remote(
        &self,
        repository: &Repository,
        suffix: &str,
    ) -> Result<ActionOutput, HookError> {
        let target = self.target(repository, suffix)?;
        debug!(repository = %repository, "Delete mirror for {}", target.rest_api_url());

        let mut output = String::new();
        let result: Result<DeleteOutcome, AdminError> =
            self.admin.delete(&target, repository, &mut output).await;
        let (succeeded, output) = match result {
            Ok(_) => (true, output),
            Err(e) => {
                debug!(repository = %repository, "Deleting mirror failed with {}", e);
                (false, join_error(&e.to_string(), &output))
            }
        };
        Ok(ActionOutput {
            suffix: suffix.to_string(),
            succeeded,
            output,
        })
    }

    pub fn is_configured(&self, repository: &Repository) -> Result<bool, HookError> {
        Ok(crate::settings::is_configured(&self.load(repository)?))
    }

    /// Stored settings with URL templates resolved. Template errors are
    /// collected per key instead of failing the preview.
    pub fn preview(&self, repository: &Repository) -> Result<SettingsPreview, HookError> {
        let mut preview = SettingsPreview {
            settings: self.load(repository)?,
            errors: BTreeMap::new(),
        };
        for (key, value) in preview.settings.iter_mut() {
            if !key.starts_with(SETTING_MIRROR_REPO_URL) {
                continue;
            }
            let SettingValue::Text(url) = value else {
                continue;
            };
            match self.resolver.resolve(url, repository) {
                Ok(resolved) => *url = resolved,
                Err(e) => {
                    preview.errors.insert(key.clone(), e.to_string());
                }
            }
        }
        Ok(preview)
    }
}

fn join_error(error: &str, output: &str) -> String {
    if output.is_empty() {
        error.to_string()
    } else {
        format!("{}\n{}", error, output)
    }
}
