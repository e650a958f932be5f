//! Per-repository mirror settings.
//!
//! Settings are a flat map of string or boolean values. Each mirror target
//! occupies one group of keys sharing a numeric suffix, e.g. `mirrorRepoUrl0`,
//! `username0`, `password0`. The map is only ever replaced as a whole through
//! [`SettingsBuilder`] and a [`SettingsStore`].

mod store;
mod validate;

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::types::MirrorTarget;

pub use store::{FileSettingsStore, MemorySettingsStore, SettingsStore};
pub use validate::{ValidationErrors, validate_targets};

pub const SETTING_MIRROR_REPO_URL: &str = "mirrorRepoUrl";
pub const SETTING_USERNAME: &str = "username";
pub const SETTING_PASSWORD: &str = "password";
pub const SETTING_REFSPEC: &str = "refspec";
pub const SETTING_TAGS: &str = "tags";
pub const SETTING_NOTES: &str = "notes";
pub const SETTING_ATOMIC: &str = "atomic";
pub const SETTING_REST_API_URL: &str = "restApiURL";
pub const SETTING_PRIVATE_TOKEN: &str = "privateToken";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SettingValue {
    Bool(bool),
    Text(String),
}

impl From<&str> for SettingValue {
    fn from(value: &str) -> Self {
        SettingValue::Text(value.to_string())
    }
}

impl From<String> for SettingValue {
    fn from(value: String) -> Self {
        SettingValue::Text(value)
    }
}

impl From<bool> for SettingValue {
    fn from(value: bool) -> Self {
        SettingValue::Bool(value)
    }
}

pub type SettingsMap = BTreeMap<String, SettingValue>;

/// Values assumed for flags that are absent from the settings map.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FlagDefaults {
    pub tags: bool,
    pub notes: bool,
    pub atomic: bool,
}

impl FlagDefaults {
    /// Used when reading stored settings for a push.
    pub const DISPATCH: FlagDefaults = FlagDefaults {
        tags: true,
        notes: true,
        atomic: true,
    };

    /// Used when reading a submitted form, where an unchecked box is absent.
    pub const FORM: FlagDefaults = FlagDefaults {
        tags: false,
        notes: false,
        atomic: false,
    };
}

fn text(settings: &SettingsMap, key: &str) -> String {
    match settings.get(key) {
        Some(SettingValue::Text(value)) => value.clone(),
        Some(SettingValue::Bool(value)) => value.to_string(),
        None => String::new(),
    }
}

fn flag(settings: &SettingsMap, key: &str, default: bool) -> bool {
    match settings.get(key) {
        Some(SettingValue::Bool(value)) => *value,
        Some(SettingValue::Text(value)) => match value.trim() {
            "true" | "on" => true,
            "false" | "off" => false,
            _ => default,
        },
        None => default,
    }
}

/// One [`MirrorTarget`] for every `mirrorRepoUrl<N>` key, in key order.
pub fn mirror_targets(settings: &SettingsMap, defaults: FlagDefaults) -> Vec<MirrorTarget> {
    settings
        .keys()
        .filter_map(|key| key.strip_prefix(SETTING_MIRROR_REPO_URL))
        .map(|suffix| {
            let key = |name: &str| format!("{}{}", name, suffix);
            MirrorTarget::builder(text(settings, &key(SETTING_MIRROR_REPO_URL)))
                .username(text(settings, &key(SETTING_USERNAME)))
                .password(text(settings, &key(SETTING_PASSWORD)))
                .refspec(text(settings, &key(SETTING_REFSPEC)))
                .include_tags(flag(settings, &key(SETTING_TAGS), defaults.tags))
                .include_notes(flag(settings, &key(SETTING_NOTES), defaults.notes))
                .atomic(flag(settings, &key(SETTING_ATOMIC), defaults.atomic))
                .rest_api_url(text(settings, &key(SETTING_REST_API_URL)))
                .private_token(text(settings, &key(SETTING_PRIVATE_TOKEN)))
                .suffix(suffix)
                .build()
        })
        .collect()
}

/// Target stored under `suffix`, if there is one.
pub fn mirror_target(
    settings: &SettingsMap,
    suffix: &str,
    defaults: FlagDefaults,
) -> Option<MirrorTarget> {
    mirror_targets(settings, defaults)
        .into_iter()
        .find(|target| target.suffix() == suffix)
}

/// Whether at least one mirror URL is set.
pub fn is_configured(settings: &SettingsMap) -> bool {
    settings.iter().any(|(key, value)| {
        key.starts_with(SETTING_MIRROR_REPO_URL)
            && matches!(value, SettingValue::Text(url) if !url.trim().is_empty())
    })
}

/// Assembles a complete settings map.
#[derive(Debug, Clone, Default)]
pub struct SettingsBuilder {
    values: SettingsMap,
}

impl SettingsBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start from an existing map, keeping every entry.
    pub fn from_map(values: SettingsMap) -> Self {
        Self { values }
    }

    pub fn set(mut self, key: impl Into<String>, value: impl Into<SettingValue>) -> Self {
        self.values.insert(key.into(), value.into());
        self
    }

    /// Write every field of `target` under its suffix.
    pub fn target(self, target: &MirrorTarget) -> Self {
        let suffix = target.suffix();
        let key = |name: &str| format!("{}{}", name, suffix);
        self.set(key(SETTING_MIRROR_REPO_URL), target.url())
            .set(key(SETTING_USERNAME), target.username())
            .set(key(SETTING_PASSWORD), target.password())
            .set(key(SETTING_REFSPEC), target.refspec())
            .set(key(SETTING_TAGS), target.include_tags())
            .set(key(SETTING_NOTES), target.include_notes())
            .set(key(SETTING_ATOMIC), target.atomic())
            .set(key(SETTING_REST_API_URL), target.rest_api_url())
            .set(key(SETTING_PRIVATE_TOKEN), target.private_token())
    }

    pub fn targets<'a>(self, targets: impl IntoIterator<Item = &'a MirrorTarget>) -> Self {
        targets
            .into_iter()
            .fold(self, |builder, target| builder.target(target))
    }

    /// Drop `password<N>` and `privateToken<N>` entries that have no
    /// `mirrorRepoUrl<N>` to belong to.
    pub fn drop_orphaned_secrets(mut self) -> Self {
        let suffixes: BTreeSet<String> = self
            .values
            .keys()
            .filter_map(|key| key.strip_prefix(SETTING_MIRROR_REPO_URL))
            .map(str::to_string)
            .collect();
        self.values.retain(|key, _| {
            [SETTING_PASSWORD, SETTING_PRIVATE_TOKEN]
                .iter()
                .all(|secret| match key.strip_prefix(secret) {
                    Some(suffix) => suffixes.contains(suffix),
                    None => true,
                })
        });
        self
    }

    pub fn build(self) -> SettingsMap {
        self.values
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> SettingsMap {
        SettingsBuilder::new()
            .set("mirrorRepoUrl0", "https://host/a.git")
            .set("username0", "u")
            .set("password0", "p")
            .set("tags0", false)
            .set("mirrorRepoUrl3", "ssh://host/b.git")
            .set("notes3", "false")
            .build()
    }

    #[test]
    fn targets_keep_their_own_suffix() {
        let targets = mirror_targets(&sample(), FlagDefaults::DISPATCH);
        assert_eq!(targets.len(), 2);
        assert_eq!(targets[0].suffix(), "0");
        assert_eq!(targets[0].username(), "u");
        assert_eq!(targets[1].suffix(), "3");
        assert_eq!(targets[1].url(), "ssh://host/b.git");
    }

    #[test]
    fn missing_flags_use_defaults() {
        let dispatch = mirror_targets(&sample(), FlagDefaults::DISPATCH);
        assert!(!dispatch[0].include_tags());
        assert!(dispatch[0].include_notes());
        assert!(dispatch[0].atomic());
        assert!(!dispatch[1].include_notes());

        let form = mirror_targets(&sample(), FlagDefaults::FORM);
        assert!(!form[0].include_notes());
        assert!(!form[0].atomic());
    }

    #[test]
    fn builder_writes_all_fields() {
        let target = MirrorTarget::builder("https://host/a.git")
            .username("u")
            .include_tags(true)
            .suffix("2")
            .build();
        let map = SettingsBuilder::new().target(&target).build();

        assert_eq!(map.len(), 9);
        assert_eq!(map.get("tags2"), Some(&SettingValue::Bool(true)));
        assert_eq!(
            mirror_target(&map, "2", FlagDefaults::FORM),
            Some(target)
        );
    }

    #[test]
    fn configured_requires_non_empty_url() {
        assert!(is_configured(&sample()));
        let empty = SettingsBuilder::new().set("mirrorRepoUrl0", " ").build();
        assert!(!is_configured(&empty));
        assert!(!is_configured(&SettingsMap::new()));
    }

    #[test]
    fn orphaned_secrets_are_dropped() {
        let settings = SettingsBuilder::from_map(sample())
            .set("password9", "plain")
            .set("privateToken9", "plain")
            .set("privateToken3", "kept")
            .drop_orphaned_secrets()
            .build();

        assert!(!settings.contains_key("password9"));
        assert!(!settings.contains_key("privateToken9"));
        assert_eq!(settings.get("password0"), Some(&SettingValue::from("p")));
        assert_eq!(settings.get("privateToken3"), Some(&SettingValue::from("kept")));
    }
}
