//! Runs `git push` for a mirror target with redacted output capture.

use std::path::PathBuf;
use std::process::Stdio;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use secrecy::ExposeSecret;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::types::{MirrorTarget, PushOutcome, Repository};
use crate::vault::{CredentialVault, Redactor};

use super::{PushCommand, PushError, authenticated_url};

pub const DEFAULT_PUSH_TIMEOUT: Duration = Duration::from_secs(120);

/// How long to wait for output readers once the process has exited.
const READER_GRACE: Duration = Duration::from_secs(5);

/// How long to wait for output readers after killing a timed-out push.
/// Helpers spawned by git can keep the pipes open after the kill.
const KILL_GRACE: Duration = Duration::from_millis(250);

type OutputBuffer = Arc<Mutex<Vec<u8>>>;

/// Executes one push of a repository to one mirror target.
#[async_trait]
pub trait PushRunner: Send + Sync {
    /// Push `repository` to `target`.
    ///
    /// Output is redacted in both the success and the failure case; failures
    /// carry the captured output inside the error.
    async fn run(
        &self,
        target: &MirrorTarget,
        repository: &Repository,
    ) -> Result<PushOutcome, PushError>;
}

/// [`PushRunner`] that shells out to the git binary.
#[derive(Debug, Clone)]
pub struct GitPushRunner {
    vault: Arc<CredentialVault>,
    git_binary: PathBuf,
    timeout: Duration,
}

impl GitPushRunner {
    pub fn new(vault: Arc<CredentialVault>) -> Self {
        Self {
            vault,
            git_binary: PathBuf::from("git"),
            timeout: DEFAULT_PUSH_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_git_binary(mut self, git_binary: impl Into<PathBuf>) -> Self {
        self.git_binary = git_binary.into();
        self
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    async fn execute(
        &self,
        command: &PushCommand,
        repository: &Repository,
        redactor: &Redactor,
    ) -> Result<PushOutcome, PushError> {
        let mut child = Command::new(&self.git_binary)
            .args(command.args())
            .current_dir(&repository.path)
            .env("GIT_TERMINAL_PROMPT", "0")
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| PushError::Spawn {
                message: redactor.clean(&e.to_string()),
            })?;

        let stdout = OutputBuffer::default();
        let stderr = OutputBuffer::default();
        let mut readers = [
            spawn_reader(child.stdout.take(), stdout.clone()),
            spawn_reader(child.stderr.take(), stderr.clone()),
        ];

        let (exit_code, timed_out) = match tokio::time::timeout(self.timeout, child.wait()).await {
            Ok(Ok(status)) => (status.code(), false),
            Ok(Err(e)) => {
                abort(&readers);
                return Err(PushError::Spawn {
                    message: redactor.clean(&e.to_string()),
                });
            }
            Err(_) => {
                let _ = child.kill().await;
                (None, true)
            }
        };

        let grace = if timed_out { KILL_GRACE } else { READER_GRACE };
        let [out_reader, err_reader] = &mut readers;
        let finished = async {
            let _ = tokio::join!(out_reader, err_reader);
        };
        if tokio::time::timeout(grace, finished).await.is_err() {
            debug!("Output readers still open after the push ended; keeping what was read");
            abort(&readers);
        }

        let stdout = take(&stdout);
        let stderr = take(&stderr);

        Ok(PushOutcome {
            stdout: redactor.clean(&stdout),
            stderr: redactor.clean(&stderr),
            exit_code,
            timed_out,
            attempts: 1,
        })
    }
}

#[async_trait]
impl PushRunner for GitPushRunner {
    async fn run(
        &self,
        target: &MirrorTarget,
        repository: &Repository,
    ) -> Result<PushOutcome, PushError> {
        debug!(repository = %repository, mirror = target.url(), "Preparing to push changes to mirror");

        let credentials = self.vault.unlock(target)?;
        let url = authenticated_url(
            target.url(),
            target.username(),
            credentials.password.expose_secret(),
        )?;
        let command = PushCommand::build(target, &url);
        drop(url);

        let outcome = self
            .execute(&command, repository, &credentials.redactor)
            .await?;

        if outcome.timed_out {
            info!(
                repository = %repository,
                mirror = target.url(),
                "Push timed out after {}s with the following output:\n{}",
                self.timeout.as_secs(),
                outcome.output()
            );
            return Err(PushError::TimedOut {
                timeout: self.timeout,
                outcome,
            });
        }
        if !outcome.succeeded() {
            info!(
                repository = %repository,
                mirror = target.url(),
                "Push failed with the following output:\n{}",
                outcome.output()
            );
            return Err(PushError::Failed { outcome });
        }

        debug!(
            repository = %repository,
            mirror = target.url(),
            "Push completed with the following output:\n{}",
            outcome.output()
        );
        Ok(outcome)
    }
}

/// Copy `reader` into `buffer` chunk by chunk so that a reader cut off
/// early still leaves everything read so far behind.
fn spawn_reader<R>(reader: Option<R>, buffer: OutputBuffer) -> JoinHandle<()>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let Some(mut reader) = reader else {
            return;
        };
        let mut chunk = [0u8; 8192];
        loop {
            match reader.read(&mut chunk).await {
                Ok(0) | Err(_) => break,
                Ok(n) => buffer
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .extend_from_slice(&chunk[..n]),
            }
        }
    })
}

fn abort(readers: &[JoinHandle<()>]) {
    for reader in readers {
        reader.abort();
    }
}

fn take(buffer: &OutputBuffer) -> String {
    let bytes = buffer.lock().unwrap_or_else(PoisonError::into_inner);
    String::from_utf8_lossy(&bytes).into_owned()
}
