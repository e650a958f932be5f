mod support;

use std::sync::Arc;

use serde_json::json;
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use pushmirror_core::admin::{AdminError, DEFAULT_ADMIN_TIMEOUT, DeleteOutcome, RemoteAdmin};
use pushmirror_core::types::{MirrorTarget, RemoteRepositoryRef};
use pushmirror_core::vault::{CredentialVault, MemoryKeyValueStore};

use support::repository;

const TOKEN: &str = "glpat-s3cr3t";

fn vault() -> Arc<CredentialVault> {
    Arc::new(CredentialVault::open(&MemoryKeyValueStore::new()).unwrap())
}

fn target(vault: &CredentialVault, rest_api_url: &str) -> MirrorTarget {
    MirrorTarget::builder("https://mirror.example.com/PROJ/test.git")
        .username("bot")
        .password(vault.encrypt("pw").unwrap())
        .private_token(vault.encrypt(TOKEN).unwrap())
        .rest_api_url(rest_api_url)
        .build()
}

fn search_mock(body: serde_json::Value) -> Mock {
    Mock::given(method("GET"))
        .and(path("/api/v4/projects"))
        .and(query_param("search", "test"))
        .and(query_param("private_token", TOKEN))
        .respond_with(ResponseTemplate::new(200).set_body_json(body))
}

#[tokio::test]
async fn deletes_project_matching_namespace_path() {
    let server = MockServer::start().await;
    search_mock(json!([
        {"id": 1, "path_with_namespace": "PROJ/other", "name": "other"},
        {"id": 2, "path_with_namespace": "PROJ/test", "name": "test"},
    ]))
    .expect(1)
    .mount(&server)
    .await;
    Mock::given(method("DELETE"))
        .and(path("/api/v4/projects/2"))
        .and(query_param("private_token", TOKEN))
        .respond_with(ResponseTemplate::new(202).set_body_json(json!({"message": "202 Accepted"})))
        .expect(1)
        .mount(&server)
        .await;

    let vault = vault();
    let admin = RemoteAdmin::new(vault.clone(), DEFAULT_ADMIN_TIMEOUT).unwrap();
    let mut output = String::new();
    let outcome = admin
        .delete(
            &target(&vault, &server.uri()),
            &repository(1, "test", "/srv/repos/1"),
            &mut output,
        )
        .await
        .unwrap();

    assert_eq!(
        outcome,
        DeleteOutcome::Deleted(RemoteRepositoryRef {
            id: 2,
            path_with_namespace: "PROJ/test".to_string(),
        })
    );
    assert!(output.contains("202 Accepted"));
    assert!(!output.contains(TOKEN));
}

#[tokio::test]
async fn trailing_slash_on_rest_url_is_ignored() {
    let server = MockServer::start().await;
    search_mock(json!([{"id": 5, "path_with_namespace": "PROJ/test"}]))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("DELETE"))
        .and(path("/api/v4/projects/5"))
        .respond_with(ResponseTemplate::new(202))
        .expect(1)
        .mount(&server)
        .await;

    let vault = vault();
    let admin = RemoteAdmin::new(vault.clone(), DEFAULT_ADMIN_TIMEOUT).unwrap();
    let mut output = String::new();
    let outcome = admin
        .delete(
            &target(&vault, &format!("{}/", server.uri())),
            &repository(1, "test", "/srv/repos/1"),
            &mut output,
        )
        .await
        .unwrap();

    assert!(matches!(outcome, DeleteOutcome::Deleted(found) if found.id == 5));
}

#[tokio::test]
async fn no_matching_project_is_not_found() {
    let server = MockServer::start().await;
    search_mock(json!([{"id": 1, "path_with_namespace": "OTHER/test"}]))
        .mount(&server)
        .await;
    Mock::given(method("DELETE"))
        .respond_with(ResponseTemplate::new(202))
        .expect(0)
        .mount(&server)
        .await;

    let vault = vault();
    let admin = RemoteAdmin::new(vault.clone(), DEFAULT_ADMIN_TIMEOUT).unwrap();
    let mut output = String::new();
    let err = admin
        .delete(
            &target(&vault, &server.uri()),
            &repository(1, "test", "/srv/repos/1"),
            &mut output,
        )
        .await
        .unwrap_err();

    assert!(matches!(err, AdminError::NotFound { ref path } if path == "PROJ/test"));
}

#[tokio::test]
async fn search_failure_reports_status() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/v4/projects"))
        .respond_with(ResponseTemplate::new(401).set_body_string("401 Unauthorized"))
        .mount(&server)
        .await;

    let vault = vault();
    let admin = RemoteAdmin::new(vault.clone(), DEFAULT_ADMIN_TIMEOUT).unwrap();
    let mut output = String::new();
    let err = admin
        .delete(
            &target(&vault, &server.uri()),
            &repository(1, "test", "/srv/repos/1"),
            &mut output,
        )
        .await
        .unwrap_err();

    assert!(matches!(err, AdminError::Status { status: 401 }));
    assert_eq!(err.to_string(), "Failed : HTTP error code : 401");
    assert!(output.contains("401 Unauthorized"));
    assert!(!output.contains(TOKEN));
}

#[tokio::test]
async fn delete_must_be_accepted() {
    let server = MockServer::start().await;
    search_mock(json!([{"id": 2, "path_with_namespace": "PROJ/test"}]))
        .mount(&server)
        .await;
    Mock::given(method("DELETE"))
        .and(path("/api/v4/projects/2"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;

    let vault = vault();
    let admin = RemoteAdmin::new(vault.clone(), DEFAULT_ADMIN_TIMEOUT).unwrap();
    let mut output = String::new();
    let err = admin
        .delete(
            &target(&vault, &server.uri()),
            &repository(1, "test", "/srv/repos/1"),
            &mut output,
        )
        .await
        .unwrap_err();

    assert!(matches!(err, AdminError::Status { status: 200 }));
}

#[tokio::test]
async fn malformed_search_body_is_invalid_response() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/v4/projects"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<html>login</html>"))
        .mount(&server)
        .await;

    let vault = vault();
    let admin = RemoteAdmin::new(vault.clone(), DEFAULT_ADMIN_TIMEOUT).unwrap();
    let mut output = String::new();
    let err = admin
        .delete(
            &target(&vault, &server.uri()),
            &repository(1, "test", "/srv/repos/1"),
            &mut output,
        )
        .await
        .unwrap_err();

    assert!(matches!(err, AdminError::InvalidResponse { .. }));
}

#[tokio::test]
async fn target_without_rest_url_is_skipped() {
    let vault = vault();
    let admin = RemoteAdmin::new(vault.clone(), DEFAULT_ADMIN_TIMEOUT).unwrap();
    let mut output = String::new();
    let outcome = admin
        .delete(
            &target(&vault, "  "),
            &repository(1, "test", "/srv/repos/1"),
            &mut output,
        )
        .await
        .unwrap();

    assert_eq!(outcome, DeleteOutcome::Skipped);
    assert!(output.is_empty());
}

#[tokio::test]
async fn unreachable_server_is_transport_error() {
    let vault = vault();
    let admin = RemoteAdmin::new(vault.clone(), DEFAULT_ADMIN_TIMEOUT).unwrap();
    let mut output = String::new();
    let err = admin
        .delete(
            &target(&vault, "http://127.0.0.1:9"),
            &repository(1, "test", "/srv/repos/1"),
            &mut output,
        )
        .await
        .unwrap_err();

    assert!(matches!(err, AdminError::Transport { .. }));
    assert!(!err.to_string().contains(TOKEN));
    assert!(!output.contains(TOKEN));
}
