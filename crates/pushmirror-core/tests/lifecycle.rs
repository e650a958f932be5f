mod support;

use std::sync::Arc;

use serde_json::json;
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use pushmirror_core::admin::{DEFAULT_ADMIN_TIMEOUT, RemoteAdmin};
use pushmirror_core::lifecycle::{
    LifecycleAction, LifecycleCoordinator, LifecycleError, RepositoryEventListener,
};
use pushmirror_core::settings::{MemorySettingsStore, SettingsBuilder, SettingsStore};
use pushmirror_core::types::{MirrorTarget, Repository, RepositoryId};
use pushmirror_core::vault::{CredentialVault, MemoryKeyValueStore};

use support::{RecordingRunner, repository};

struct Fixture {
    server: MockServer,
    settings: Arc<MemorySettingsStore>,
    runner: Arc<RecordingRunner>,
    coordinator: LifecycleCoordinator,
}

impl Fixture {
    async fn new() -> Self {
        let server = MockServer::start().await;
        let vault = Arc::new(CredentialVault::open(&MemoryKeyValueStore::new()).unwrap());
        let settings = Arc::new(MemorySettingsStore::new());
        let runner = Arc::new(RecordingRunner::new());

        let targets = [
            MirrorTarget::builder("https://mirror/${repository.project().key()}/${repository.name()}.git")
                .username("bot")
                .password(vault.encrypt("pw").unwrap())
                .rest_api_url(server.uri())
                .private_token(vault.encrypt("tok").unwrap())
                .suffix("0")
                .build(),
            MirrorTarget::builder("ssh://backup/static.git")
                .username("backup")
                .suffix("1")
                .build(),
        ];
        settings
            .save(RepositoryId(1), &SettingsBuilder::new().targets(&targets).build())
            .unwrap();

        let admin = RemoteAdmin::new(vault, DEFAULT_ADMIN_TIMEOUT).unwrap();
        let coordinator = LifecycleCoordinator::new(settings.clone(), admin, runner.clone());
        Self {
            server,
            settings,
            runner,
            coordinator,
        }
    }

    async fn expect_delete(&self, name: &str, id: u64, deletes: u64) {
        Mock::given(method("GET"))
            .and(path("/api/v4/projects"))
            .and(query_param("search", name))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([
                {"id": id, "path_with_namespace": format!("PROJ/{}", name)}
            ])))
            .mount(&self.server)
            .await;
        Mock::given(method("DELETE"))
            .and(path(format!("/api/v4/projects/{}", id)))
            .respond_with(ResponseTemplate::new(202))
            .expect(deletes)
            .mount(&self.server)
            .await;
    }
}

fn renamed(old: &Repository, name: &str) -> Repository {
    let mut new = old.clone();
    new.name = name.to_string();
    new.slug = name.to_string();
    new
}

#[tokio::test]
async fn rename_deletes_old_remote_and_provisions_new_ones() {
    let fixture = Fixture::new().await;
    fixture.expect_delete("test", 2, 1).await;

    let old = repository(1, "test", "/srv/repos/1");
    let new = renamed(&old, "renamed");
    let report = fixture.coordinator.handle_rename(&old, &new).await.unwrap();

    assert_eq!(report.failures().count(), 0);
    let actions: Vec<_> = report
        .targets
        .iter()
        .map(|t| (t.suffix.as_str(), t.action))
        .collect();
    assert_eq!(
        actions,
        vec![
            ("0", LifecycleAction::DeleteRemote),
            ("0", LifecycleAction::Provision),
            ("1", LifecycleAction::Provision),
        ]
    );
    assert_eq!(
        fixture.runner.urls(),
        vec!["https://mirror/PROJ/renamed.git", "ssh://backup/static.git"]
    );
}

#[tokio::test]
async fn project_move_is_handled_like_rename() {
    let fixture = Fixture::new().await;
    fixture.expect_delete("test", 2, 1).await;

    let old = repository(1, "test", "/srv/repos/1");
    let mut new = old.clone();
    new.project.key = "NEWPROJ".to_string();
    fixture.coordinator.handle_rename(&old, &new).await.unwrap();

    assert_eq!(
        fixture.runner.urls()[0],
        "https://mirror/NEWPROJ/test.git"
    );
}

#[tokio::test]
async fn unchanged_identity_does_nothing() {
    let fixture = Fixture::new().await;
    fixture.expect_delete("test", 2, 0).await;

    let old = repository(1, "test", "/srv/repos/1");
    let mut new = old.clone();
    new.description = Some("only the description changed".to_string());
    let report = fixture.coordinator.handle_rename(&old, &new).await.unwrap();

    assert!(report.targets.is_empty());
    assert!(fixture.runner.calls().is_empty());
}

#[tokio::test]
async fn template_error_aborts_before_deleting() {
    let fixture = Fixture::new().await;
    fixture.expect_delete("test", 2, 0).await;
    let broken = MirrorTarget::builder("https://mirror/${project.key()}.git")
        .suffix("0")
        .build();
    fixture
        .settings
        .save(RepositoryId(1), &SettingsBuilder::new().target(&broken).build())
        .unwrap();

    let old = repository(1, "test", "/srv/repos/1");
    let err = fixture
        .coordinator
        .handle_rename(&old, &renamed(&old, "renamed"))
        .await
        .unwrap_err();

    assert!(matches!(err, LifecycleError::Template(_)));
    assert!(fixture.runner.calls().is_empty());
}

#[tokio::test]
async fn failed_delete_does_not_stop_provisioning() {
    let fixture = Fixture::new().await;
    Mock::given(method("GET"))
        .and(path("/api/v4/projects"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&fixture.server)
        .await;

    let old = repository(1, "test", "/srv/repos/1");
    let report = fixture
        .coordinator
        .handle_rename(&old, &renamed(&old, "renamed"))
        .await
        .unwrap();

    let failures: Vec<_> = report.failures().collect();
    assert_eq!(failures.len(), 1);
    assert_eq!(failures[0].action, LifecycleAction::DeleteRemote);
    assert_eq!(
        failures[0].error.as_deref(),
        Some("Failed : HTTP error code : 500")
    );
    assert_eq!(fixture.runner.calls().len(), 2);
}

#[tokio::test]
async fn failed_provision_is_reported_per_target() {
    let fixture = Fixture::new().await;
    fixture.expect_delete("test", 2, 1).await;
    fixture.runner.fail_for("backup");

    let old = repository(1, "test", "/srv/repos/1");
    let report = fixture
        .coordinator
        .handle_rename(&old, &renamed(&old, "renamed"))
        .await
        .unwrap();

    let failures: Vec<_> = report.failures().collect();
    assert_eq!(failures.len(), 1);
    assert_eq!(failures[0].suffix, "1");
    assert!(failures[0].output.contains("remote rejected"));
}

#[tokio::test]
async fn delete_only_touches_targets_with_rest_url() {
    let fixture = Fixture::new().await;
    fixture.expect_delete("test", 2, 1).await;

    let report = fixture
        .coordinator
        .handle_delete(&repository(1, "test", "/srv/repos/1"))
        .await
        .unwrap();

    assert_eq!(report.targets.len(), 1);
    assert_eq!(report.targets[0].suffix, "0");
    assert!(report.targets[0].succeeded());
    assert!(fixture.runner.calls().is_empty());
}

#[tokio::test]
async fn listener_swallows_errors() {
    let fixture = Fixture::new().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&fixture.server)
        .await;

    let repo = repository(1, "test", "/srv/repos/1");
    fixture.coordinator.on_repository_deleted(&repo).await;
    fixture
        .coordinator
        .on_repository_renamed(&repo, &renamed(&repo, "renamed"))
        .await;

    assert_eq!(fixture.runner.calls().len(), 2);
}
