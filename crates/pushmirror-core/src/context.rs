//! Application context wiring the components together.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;

use crate::admin::{DEFAULT_ADMIN_TIMEOUT, RemoteAdmin};
use crate::config::MirrorConfig;
use crate::dispatch::{DispatchSettings, MirrorDispatcher, RequestJournal};
use crate::hook::MirrorHook;
use crate::lifecycle::LifecycleCoordinator;
use crate::push::{GitPushRunner, PushRunner};
use crate::repository::LocalRepositoryService;
use crate::settings::{FileSettingsStore, SettingsStore};
use crate::types::Repository;
use crate::vault::{CredentialVault, FileKeyValueStore};

pub const KEY_STORE_FILE: &str = "keys.toml";
pub const SETTINGS_DIR: &str = "settings";
pub const JOURNAL_FILE: &str = "journal.json";

/// Shared services for one process.
///
/// Frontends create this once, inside a tokio runtime, and hand out
/// references to the hook and lifecycle coordinator.
pub struct MirrorContext {
    config: MirrorConfig,
    state_dir: PathBuf,
    vault: Arc<CredentialVault>,
    settings: Arc<dyn SettingsStore>,
    repositories: Arc<LocalRepositoryService>,
    hook: MirrorHook,
    lifecycle: LifecycleCoordinator,
}

impl MirrorContext {
    pub fn open(config: MirrorConfig) -> anyhow::Result<Self> {
        let state_dir = match &config.state_dir {
            Some(dir) => dir.clone(),
            None => dirs::data_dir()
                .ok_or_else(|| anyhow::anyhow!("Could not determine data directory"))?
                .join("pushmirror"),
        };
        std::fs::create_dir_all(&state_dir).with_context(|| {
            format!("Failed to create state directory: {}", state_dir.display())
        })?;

        let key_store = FileKeyValueStore::new(state_dir.join(KEY_STORE_FILE));
        let vault = Arc::new(
            CredentialVault::open(&key_store).context("Failed to open credential vault")?,
        );

        let runner: Arc<dyn PushRunner> = Arc::new(
            GitPushRunner::new(vault.clone())
                .with_timeout(config.push.timeout())
                .with_git_binary(&config.push.git_binary),
        );
        let repositories = Arc::new(LocalRepositoryService::from_entries(&config.repositories));
        let settings: Arc<dyn SettingsStore> =
            Arc::new(FileSettingsStore::new(state_dir.join(SETTINGS_DIR)));

        let dispatcher = MirrorDispatcher::with_journal(
            runner.clone(),
            repositories.clone(),
            DispatchSettings::from(&config.dispatch),
            RequestJournal::new(state_dir.join(JOURNAL_FILE)),
        )
        .context("Failed to start mirror dispatcher")?;

        let admin = RemoteAdmin::new(vault.clone(), DEFAULT_ADMIN_TIMEOUT)
            .context("Failed to create remote admin client")?;

        let hook = MirrorHook::new(
            settings.clone(),
            vault.clone(),
            dispatcher,
            runner.clone(),
            admin.clone(),
        );
        let lifecycle = LifecycleCoordinator::new(settings.clone(), admin, runner);

        Ok(Self {
            config,
            state_dir,
            vault,
            settings,
            repositories,
            hook,
            lifecycle,
        })
    }

    pub fn config(&self) -> &MirrorConfig {
        &self.config
    }

    pub fn state_dir(&self) -> &Path {
        &self.state_dir
    }

    pub fn vault(&self) -> &CredentialVault {
        &self.vault
    }

    pub fn settings(&self) -> &dyn SettingsStore {
        self.settings.as_ref()
    }

    pub fn repositories(&self) -> &LocalRepositoryService {
        &self.repositories
    }

    pub fn hook(&self) -> &MirrorHook {
        &self.hook
    }

    pub fn dispatcher(&self) -> &MirrorDispatcher {
        self.hook.dispatcher()
    }

    pub fn lifecycle(&self) -> &LifecycleCoordinator {
        &self.lifecycle
    }

    /// Resolve a repository from the registry by id or `PROJECT/slug`.
    pub fn repository(&self, reference: &str) -> anyhow::Result<Repository> {
        self.config
            .find_repository(reference)
            .map(|entry| entry.to_repository())
            .ok_or_else(|| anyhow::anyhow!("Unknown repository: {}", reference))
    }
}
