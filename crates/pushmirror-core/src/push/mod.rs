//! Execution of a single mirror push.

mod command;
mod runner;

use std::time::Duration;

pub use command::{
    DEFAULT_REFSPEC, NOTES_REFSPEC, PushCommand, TAGS_REFSPEC, authenticated_url, refspecs,
};
pub use runner::{DEFAULT_PUSH_TIMEOUT, GitPushRunner, PushRunner};

use crate::types::PushOutcome;
use crate::vault::VaultError;

/// Failure of one push attempt. Every message is already redacted.
#[derive(Debug, thiserror::Error)]
pub enum PushError {
    #[error("The configured mirror URL ({url}) is invalid: {reason}")]
    InvalidUrl { url: String, reason: String },
    #[error(transparent)]
    Vault(#[from] VaultError),
    #[error("Failed to run git push: {message}")]
    Spawn { message: String },
    #[error("git push timed out after {}s", .timeout.as_secs())]
    TimedOut {
        timeout: Duration,
        outcome: PushOutcome,
    },
    #[error("git push exited with {}", exit_label(.outcome.exit_code))]
    Failed { outcome: PushOutcome },
}

impl PushError {
    /// Output captured before the failure, if the process ran at all.
    pub fn outcome(&self) -> Option<&PushOutcome> {
        match self {
            PushError::TimedOut { outcome, .. } | PushError::Failed { outcome } => Some(outcome),
            _ => None,
        }
    }
}

fn exit_label(code: Option<i32>) -> String {
    match code {
        Some(code) => format!("code {}", code),
        None => "no exit code".to_string(),
    }
}
