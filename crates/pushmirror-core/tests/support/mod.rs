#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;

use pushmirror_core::push::{PushError, PushRunner};
use pushmirror_core::repository::RepositoryService;
use pushmirror_core::types::{MirrorTarget, Project, PushOutcome, Repository, RepositoryId};

const GIT_ENV_OVERRIDES: [&str; 4] = [
    "GIT_DIR",
    "GIT_WORK_TREE",
    "GIT_INDEX_FILE",
    "GIT_COMMON_DIR",
];

pub fn git_command() -> Command {
    let mut cmd = Command::new("git");
    for key in GIT_ENV_OVERRIDES {
        cmd.env_remove(key);
    }
    cmd
}

pub fn repository(id: u32, name: &str, path: impl Into<PathBuf>) -> Repository {
    Repository {
        id: RepositoryId(id),
        name: name.to_string(),
        slug: name.to_lowercase(),
        project: Project {
            id: 7,
            key: "PROJ".to_string(),
            name: "Project".to_string(),
        },
        scm_id: "git".to_string(),
        description: None,
        path: path.into(),
    }
}

/// Create a non-bare repository with one commit on its default branch.
pub fn init_with_commit(path: &Path) -> git2::Oid {
    let repo = git2::Repository::init(path).unwrap();
    std::fs::write(path.join("README.md"), "# mirrored\n").unwrap();

    let mut index = repo.index().unwrap();
    index.add_path(Path::new("README.md")).unwrap();
    index.write().unwrap();
    let tree_id = index.write_tree().unwrap();
    let tree = repo.find_tree(tree_id).unwrap();

    let sig = git2::Signature::now("Test", "test@example.com").unwrap();
    repo.commit(Some("HEAD"), &sig, &sig, "initial", &tree, &[])
        .unwrap()
}

/// [`PushRunner`] that records every call instead of running git.
#[derive(Default)]
pub struct RecordingRunner {
    calls: Mutex<Vec<MirrorTarget>>,
    failing_users: Mutex<HashSet<String>>,
    fail_all: bool,
    delay: Duration,
    running: AtomicUsize,
    max_running: AtomicUsize,
}

impl RecordingRunner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn always_failing() -> Self {
        Self {
            fail_all: true,
            ..Self::default()
        }
    }

    pub fn with_delay(delay: Duration) -> Self {
        Self {
            delay,
            ..Self::default()
        }
    }

    /// Fail every push whose target username is `username`.
    pub fn fail_for(&self, username: &str) {
        self.failing_users
            .lock()
            .unwrap()
            .insert(username.to_string());
    }

    pub fn calls(&self) -> Vec<MirrorTarget> {
        self.calls.lock().unwrap().clone()
    }

    pub fn usernames(&self) -> Vec<String> {
        self.calls()
            .iter()
            .map(|target| target.username().to_string())
            .collect()
    }

    pub fn urls(&self) -> Vec<String> {
        self.calls()
            .iter()
            .map(|target| target.url().to_string())
            .collect()
    }

    pub fn max_concurrency(&self) -> usize {
        self.max_running.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PushRunner for RecordingRunner {
    async fn run(
        &self,
        target: &MirrorTarget,
        _repository: &Repository,
    ) -> Result<PushOutcome, PushError> {
        self.calls.lock().unwrap().push(target.clone());
        let running = self.running.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_running.fetch_max(running, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        self.running.fetch_sub(1, Ordering::SeqCst);

        let fail = self.fail_all || self.failing_users.lock().unwrap().contains(target.username());
        if fail {
            return Err(PushError::Failed {
                outcome: PushOutcome {
                    stderr: "! [remote rejected] main -> main".to_string(),
                    exit_code: Some(1),
                    attempts: 1,
                    ..PushOutcome::default()
                },
            });
        }
        Ok(PushOutcome {
            stdout: format!("pushed to {}", target.url()),
            exit_code: Some(0),
            attempts: 1,
            ..PushOutcome::default()
        })
    }
}

/// [`RepositoryService`] over a fixed set of repositories.
#[derive(Default)]
pub struct StaticRepositories {
    repositories: HashMap<RepositoryId, Repository>,
    empty: HashSet<RepositoryId>,
}

impl StaticRepositories {
    pub fn new(repositories: impl IntoIterator<Item = Repository>) -> Self {
        Self {
            repositories: repositories.into_iter().map(|r| (r.id, r)).collect(),
            empty: HashSet::new(),
        }
    }

    pub fn mark_empty(mut self, id: RepositoryId) -> Self {
        self.empty.insert(id);
        self
    }
}

#[async_trait]
impl RepositoryService for StaticRepositories {
    async fn get_by_id(&self, id: RepositoryId) -> anyhow::Result<Option<Repository>> {
        Ok(self.repositories.get(&id).cloned())
    }

    async fn is_empty(&self, repository: &Repository) -> anyhow::Result<bool> {
        Ok(self.empty.contains(&repository.id))
    }
}
