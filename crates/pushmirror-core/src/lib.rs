//! pushmirror core library
//!
//! Mirrors repository changes to remote repositories: debounced, coalesced
//! and retried `git push` invocations per mirror target, with encrypted
//! credential storage, URL templating and remote repository cleanup through
//! a REST API.

pub mod admin;
pub mod config;
pub mod context;
pub mod dispatch;
pub mod hook;
pub mod lifecycle;
pub mod push;
pub mod repository;
pub mod settings;
pub mod template;
pub mod types;
pub mod vault;

/// Re-exports of commonly used types
pub mod prelude {
    // Configuration
    pub use crate::config::{ConfigStore, DispatchConfig, MirrorConfig, PushConfig};
    pub use crate::context::MirrorContext;

    // Core types
    pub use crate::types::{
        DispatchKey, MirrorRequest, MirrorTarget, Project, PushOutcome, RemoteRepositoryRef,
        Repository, RepositoryId,
    };

    // Components
    pub use crate::admin::{AdminError, DeleteOutcome, RemoteAdmin};
    pub use crate::dispatch::{
        DispatchError, DispatchEvent, DispatchSettings, DispatchState, MirrorDispatcher,
    };
    pub use crate::hook::{HookError, HookTrigger, MirrorHook};
    pub use crate::lifecycle::{LifecycleCoordinator, RepositoryEventListener};
    pub use crate::push::{GitPushRunner, PushError, PushRunner};
    pub use crate::repository::{LocalRepositoryService, RepositoryService};
    pub use crate::settings::{SettingValue, SettingsBuilder, SettingsMap, SettingsStore};
    pub use crate::template::{TemplateError, UrlTemplateResolver};
    pub use crate::vault::{CredentialVault, Redactor, VaultError};
}
