//! Remote repository administration through a GitLab-style REST API.
//!
//! Only deletion is needed: a mirror repository is created implicitly by the
//! first push to it, and removed here when its source is renamed or deleted.

use std::sync::Arc;
use std::time::Duration;

use reqwest::{Client, Response, StatusCode};
use secrecy::ExposeSecret;
use tracing::{debug, error, info};

use crate::types::{MirrorTarget, RemoteRepositoryRef, Repository};
use crate::vault::{CredentialVault, Redactor, VaultError};

pub const DEFAULT_ADMIN_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, thiserror::Error)]
pub enum AdminError {
    #[error("Failed : HTTP error code : {status}")]
    Status { status: u16 },
    #[error("Failed : Invalid response data from {url} : {reason}")]
    InvalidResponse { url: String, reason: String },
    #[error("Remote repository not found: {path}")]
    NotFound { path: String },
    #[error("Failed to reach {url}: {message}")]
    Transport { url: String, message: String },
    #[error("Failed to build HTTP client: {message}")]
    Client { message: String },
    #[error(transparent)]
    Vault(#[from] VaultError),
}

/// Result of a delete request that did not fail.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeleteOutcome {
    /// The target has no REST API URL configured.
    Skipped,
    Deleted(RemoteRepositoryRef),
}

/// Client for the remote's project API.
#[derive(Debug, Clone)]
pub struct RemoteAdmin {
    vault: Arc<CredentialVault>,
    client: Client,
}

impl RemoteAdmin {
    pub fn new(vault: Arc<CredentialVault>, timeout: Duration) -> Result<Self, AdminError> {
        let client = Client::builder()
            .user_agent(concat!("pushmirror/", env!("CARGO_PKG_VERSION")))
            .timeout(timeout)
            .build()
            .map_err(|e| AdminError::Client {
                message: e.to_string(),
            })?;
        Ok(Self { vault, client })
    }

    /// Delete the remote project mirroring `repository`.
    ///
    /// Everything received from the API is appended to `output` after
    /// redaction, whether or not the call succeeds.
    pub async fn delete(
        &self,
        target: &MirrorTarget,
        repository: &Repository,
        output: &mut String,
    ) -> Result<DeleteOutcome, AdminError> {
        if !target.has_rest_api() {
            error!(
                repository = %repository,
                "Remote REST API URL not configured for {}",
                repository.name
            );
            return Ok(DeleteOutcome::Skipped);
        }

        let credentials = self.vault.unlock(target)?;
        let token = credentials.private_token.expose_secret();
        let session = Session {
            client: &self.client,
            base: target.rest_api_url().trim().trim_end_matches('/'),
            token: (!token.is_empty()).then_some(token.as_str()),
            redactor: &credentials.redactor,
            output,
        };

        let result = session.delete(repository).await;
        match &result {
            Ok(found) => info!(
                repository = %repository,
                remote_id = found.id,
                "Deleted remote repository {}",
                found.path_with_namespace
            ),
            Err(e) => debug!(repository = %repository, "Deleting remote repository failed: {}", e),
        }
        result.map(DeleteOutcome::Deleted)
    }
}

struct Session<'a> {
    client: &'a Client,
    base: &'a str,
    token: Option<&'a str>,
    redactor: &'a Redactor,
    output: &'a mut String,
}

impl Session<'_> {
    async fn delete(mut self, repository: &Repository) -> Result<RemoteRepositoryRef, AdminError> {
        let search_url = format!("{}/api/v4/projects", self.base);
        let mut query = vec![("search", repository.name.as_str())];
        if let Some(token) = self.token {
            query.push(("private_token", token));
        }

        let response = self
            .client
            .get(&search_url)
            .header(reqwest::header::ACCEPT, "application/json")
            .query(&query)
            .send()
            .await
            .map_err(|e| self.transport(&search_url, e))?;
        let (status, body) = self.capture(response).await;
        if status != StatusCode::OK {
            return Err(AdminError::Status {
                status: status.as_u16(),
            });
        }

        let candidates: Vec<RemoteRepositoryRef> =
            serde_json::from_str(&body).map_err(|e| AdminError::InvalidResponse {
                url: self.base.to_string(),
                reason: e.to_string(),
            })?;
        let path = repository.path_with_namespace();
        let found = candidates
            .into_iter()
            .find(|candidate| candidate.path_with_namespace == path)
            .ok_or(AdminError::NotFound { path })?;

        let delete_url = format!("{}/api/v4/projects/{}", self.base, found.id);
        let mut request = self
            .client
            .delete(&delete_url)
            .header(reqwest::header::ACCEPT, "application/json");
        if let Some(token) = self.token {
            request = request.query(&[("private_token", token)]);
        }
        let response = request
            .send()
            .await
            .map_err(|e| self.transport(&delete_url, e))?;
        let (status, _) = self.capture(response).await;
        if status != StatusCode::ACCEPTED {
            return Err(AdminError::Status {
                status: status.as_u16(),
            });
        }

        Ok(found)
    }

    /// Record the status line and body of `response` in the output.
    async fn capture(&mut self, response: Response) -> (StatusCode, String) {
        let status = response.status();
        let line = format!("{} {}", response.url(), status);
        let body = match response.text().await {
            Ok(body) => body,
            Err(e) => e.without_url().to_string(),
        };
        self.append(&line);
        if !body.is_empty() {
            self.append(&body);
        }
        (status, body)
    }

    fn append(&mut self, text: &str) {
        if !self.output.is_empty() && !self.output.ends_with('\n') {
            self.output.push('\n');
        }
        self.output.push_str(&self.redactor.clean(text));
    }

    fn transport(&mut self, url: &str, e: reqwest::Error) -> AdminError {
        let message = self.redactor.clean(&e.without_url().to_string());
        self.append(&message);
        AdminError::Transport {
            url: url.to_string(),
            message,
        }
    }
}
