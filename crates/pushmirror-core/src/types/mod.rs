//! Shared core types used across the dispatch, push and admin layers.

use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Numeric identifier of a repository on the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RepositoryId(pub u32);

impl fmt::Display for RepositoryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Project that owns a repository.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Project {
    pub id: u32,
    pub key: String,
    pub name: String,
}

impl fmt::Display for Project {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.key)
    }
}

/// A repository hosted by the primary source-control server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Repository {
    pub id: RepositoryId,
    pub name: String,
    pub slug: String,
    pub project: Project,
    /// SCM identifier reported by the host, e.g. "git".
    pub scm_id: String,
    pub description: Option<String>,
    /// Location of the repository on disk; pushes run from here.
    pub path: PathBuf,
}

impl Repository {
    pub fn is_git(&self) -> bool {
        self.scm_id.eq_ignore_ascii_case("git")
    }

    /// Path of the repository on a remote that mirrors the host layout.
    pub fn path_with_namespace(&self) -> String {
        format!("{}/{}", self.project.key, self.name)
    }
}

impl fmt::Display for Repository {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}[{}]", self.project.key, self.slug, self.id)
    }
}

/// One configured remote destination for a repository's changes.
///
/// Targets are built fresh from settings for every dispatch and never
/// mutated afterwards. `password` and `private_token` hold the value as
/// stored, which is normally an `encrypted:` token; they are only decrypted
/// for the duration of a single push or REST call.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MirrorTarget {
    url: String,
    #[serde(default)]
    username: String,
    #[serde(default)]
    password: String,
    #[serde(default)]
    private_token: String,
    #[serde(default)]
    refspec: String,
    #[serde(default)]
    include_tags: bool,
    #[serde(default)]
    include_notes: bool,
    #[serde(default)]
    atomic: bool,
    #[serde(default)]
    rest_api_url: String,
    #[serde(default)]
    suffix: String,
}

impl MirrorTarget {
    pub fn builder(url: impl Into<String>) -> MirrorTargetBuilder {
        MirrorTargetBuilder {
            target: MirrorTarget {
                url: url.into(),
                username: String::new(),
                password: String::new(),
                private_token: String::new(),
                refspec: String::new(),
                include_tags: false,
                include_notes: false,
                atomic: false,
                rest_api_url: String::new(),
                suffix: "0".to_string(),
            },
        }
    }

    /// Start a builder pre-populated with this target's values.
    pub fn to_builder(&self) -> MirrorTargetBuilder {
        MirrorTargetBuilder {
            target: self.clone(),
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn username(&self) -> &str {
        &self.username
    }

    /// Stored password, encrypted unless it was never validated.
    pub fn password(&self) -> &str {
        &self.password
    }

    /// Stored REST private token, encrypted unless it was never validated.
    pub fn private_token(&self) -> &str {
        &self.private_token
    }

    pub fn refspec(&self) -> &str {
        &self.refspec
    }

    pub fn include_tags(&self) -> bool {
        self.include_tags
    }

    pub fn include_notes(&self) -> bool {
        self.include_notes
    }

    pub fn atomic(&self) -> bool {
        self.atomic
    }

    pub fn rest_api_url(&self) -> &str {
        &self.rest_api_url
    }

    pub fn has_rest_api(&self) -> bool {
        !self.rest_api_url.trim().is_empty()
    }

    /// Ordinal suffix of the settings record this target was read from.
    pub fn suffix(&self) -> &str {
        &self.suffix
    }
}

impl fmt::Debug for MirrorTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mask = |value: &str| if value.is_empty() { "" } else { "<redacted>" };
        f.debug_struct("MirrorTarget")
            .field("url", &self.url)
            .field("username", &self.username)
            .field("password", &mask(&self.password))
            .field("private_token", &mask(&self.private_token))
            .field("refspec", &self.refspec)
            .field("include_tags", &self.include_tags)
            .field("include_notes", &self.include_notes)
            .field("atomic", &self.atomic)
            .field("rest_api_url", &self.rest_api_url)
            .field("suffix", &self.suffix)
            .finish()
    }
}

/// Builder for [`MirrorTarget`].
#[derive(Debug, Clone)]
pub struct MirrorTargetBuilder {
    target: MirrorTarget,
}

impl MirrorTargetBuilder {
    pub fn url(mut self, url: impl Into<String>) -> Self {
        self.target.url = url.into();
        self
    }

    pub fn username(mut self, username: impl Into<String>) -> Self {
        self.target.username = username.into();
        self
    }

    pub fn password(mut self, password: impl Into<String>) -> Self {
        self.target.password = password.into();
        self
    }

    pub fn private_token(mut self, token: impl Into<String>) -> Self {
        self.target.private_token = token.into();
        self
    }

    pub fn refspec(mut self, refspec: impl Into<String>) -> Self {
        self.target.refspec = refspec.into();
        self
    }

    pub fn include_tags(mut self, include: bool) -> Self {
        self.target.include_tags = include;
        self
    }

    pub fn include_notes(mut self, include: bool) -> Self {
        self.target.include_notes = include;
        self
    }

    pub fn atomic(mut self, atomic: bool) -> Self {
        self.target.atomic = atomic;
        self
    }

    pub fn rest_api_url(mut self, url: impl Into<String>) -> Self {
        self.target.rest_api_url = url.into();
        self
    }

    pub fn suffix(mut self, suffix: impl Into<String>) -> Self {
        self.target.suffix = suffix.into();
        self
    }

    pub fn build(self) -> MirrorTarget {
        self.target
    }
}

/// Identity used to coalesce requests: one repository pushing to one URL.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DispatchKey {
    pub repository_id: RepositoryId,
    pub url: String,
}

impl fmt::Display for DispatchKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.repository_id, self.url)
    }
}

/// A unit of mirror work.
///
/// Two requests are the "same" request when their [`DispatchKey`]s match,
/// regardless of the rest of the target settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MirrorRequest {
    repository_id: RepositoryId,
    target: MirrorTarget,
}

impl MirrorRequest {
    pub fn new(repository_id: RepositoryId, target: MirrorTarget) -> Self {
        Self {
            repository_id,
            target,
        }
    }

    pub fn repository_id(&self) -> RepositoryId {
        self.repository_id
    }

    pub fn target(&self) -> &MirrorTarget {
        &self.target
    }

    pub fn key(&self) -> DispatchKey {
        DispatchKey {
            repository_id: self.repository_id,
            url: self.target.url.clone(),
        }
    }
}

impl fmt::Display for MirrorRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.repository_id, self.target.url)
    }
}

/// Captured result of one push invocation. Text is always redacted.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PushOutcome {
    pub stdout: String,
    pub stderr: String,
    /// Process exit code; `None` when the process was killed or timed out.
    pub exit_code: Option<i32>,
    pub timed_out: bool,
    pub attempts: u32,
}

impl PushOutcome {
    pub fn succeeded(&self) -> bool {
        !self.timed_out && self.exit_code == Some(0)
    }

    /// Combined stdout and stderr, in that order.
    pub fn output(&self) -> String {
        match (self.stdout.trim_end(), self.stderr.trim_end()) {
            ("", err) => err.to_string(),
            (out, "") => out.to_string(),
            (out, err) => format!("{}\n{}", out, err),
        }
    }
}

/// A project returned by the remote admin API search.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteRepositoryRef {
    pub id: u64,
    pub path_with_namespace: String,
}
