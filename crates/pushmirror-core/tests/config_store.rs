use std::path::PathBuf;

use tempfile::TempDir;

use pushmirror_core::config::{ConfigStore, MirrorConfig, RepositoryEntry};
use pushmirror_core::settings::{FileSettingsStore, SettingValue, SettingsBuilder, SettingsStore};
use pushmirror_core::types::RepositoryId;

#[test]
fn missing_file_loads_defaults() {
    let temp = TempDir::new().unwrap();
    let store = ConfigStore::from_path(temp.path().join("pushmirror.toml"));

    let config = store.load().unwrap();
    assert_eq!(config, MirrorConfig::default());
    assert_eq!(config.dispatch.attempts, 5);
    assert_eq!(config.dispatch.threads, 3);
    assert_eq!(config.push.timeout_secs, 120);
}

#[test]
fn partial_file_keeps_other_defaults() {
    let temp = TempDir::new().unwrap();
    let path = temp.path().join("pushmirror.toml");
    std::fs::write(
        &path,
        r#"
state_dir = "/var/lib/pushmirror"

[dispatch]
threads = 6

[[repository]]
id = 3
project = "PROJ"
name = "Web App"
path = "/srv/git/web.git"
"#,
    )
    .unwrap();

    let config = ConfigStore::from_path(path).load().unwrap();
    assert_eq!(config.state_dir, Some(PathBuf::from("/var/lib/pushmirror")));
    assert_eq!(config.dispatch.threads, 6);
    assert_eq!(config.dispatch.debounce_secs, 5);
    assert_eq!(config.push.git_binary, "git");

    let repo = config.find_repository("PROJ/web-app").unwrap().to_repository();
    assert_eq!(repo.id, RepositoryId(3));
    assert_eq!(repo.slug, "web-app");
    assert_eq!(repo.project.name, "PROJ");
    assert_eq!(repo.path_with_namespace(), "PROJ/Web App");
}

#[test]
fn save_then_load_keeps_values() {
    let temp = TempDir::new().unwrap();
    let store = ConfigStore::from_path(temp.path().join("nested").join("pushmirror.toml"));

    let mut config = MirrorConfig::new();
    config.push.timeout_secs = 30;
    config.dispatch.retry_backoff_secs = 1;
    config.repositories.push(RepositoryEntry {
        id: 1,
        project: "PROJ".to_string(),
        project_id: 9,
        project_name: Some("Project".to_string()),
        name: "test".to_string(),
        slug: None,
        description: Some("docs".to_string()),
        path: PathBuf::from("/srv/git/test.git"),
    });

    store.save(&config).unwrap();
    assert_eq!(store.load().unwrap(), config);
}

#[test]
fn malformed_file_names_path_in_error() {
    let temp = TempDir::new().unwrap();
    let path = temp.path().join("pushmirror.toml");
    std::fs::write(&path, "[dispatch\nthreads = ").unwrap();

    let err = ConfigStore::from_path(path).load().unwrap_err();
    assert!(format!("{:#}", err).contains("Failed to parse config file"));
}

#[test]
fn settings_are_stored_per_repository() {
    let temp = TempDir::new().unwrap();
    let store = FileSettingsStore::new(temp.path().join("settings"));

    assert!(store.load(RepositoryId(1)).unwrap().is_empty());

    let settings = SettingsBuilder::new()
        .set("mirrorRepoUrl0", "https://mirror/repo.git")
        .set("username0", "bot")
        .set("atomic0", false)
        .build();
    store.save(RepositoryId(1), &settings).unwrap();

    let reopened = FileSettingsStore::new(temp.path().join("settings"));
    let loaded = reopened.load(RepositoryId(1)).unwrap();
    assert_eq!(loaded, settings);
    assert_eq!(loaded.get("atomic0"), Some(&SettingValue::Bool(false)));
    assert!(reopened.load(RepositoryId(2)).unwrap().is_empty());
    assert!(reopened.path_for(RepositoryId(1)).exists());
}
