//! Coalescing, retrying dispatch of mirror pushes.
//!
//! Requests are bucketed by [`DispatchKey`]. Each key has at most one driver
//! task, which waits out the debounce window, takes the most recent request
//! for the key and pushes it, retrying with a fixed backoff. Requests that
//! arrive while a key is pending or running replace whatever was queued, so a
//! burst of updates results in a single push with the latest settings.
//! Across keys, pushes run in parallel up to the worker bound.

mod journal;
mod pool;

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio::runtime::Handle;
use tokio::sync::{Notify, broadcast};
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

pub use journal::RequestJournal;

use crate::config::DispatchConfig;
use crate::push::PushRunner;
use crate::repository::RepositoryService;
use crate::template::{TemplateError, UrlTemplateResolver};
use crate::types::{DispatchKey, MirrorRequest, MirrorTarget, PushOutcome, Repository};

use pool::{WorkerPermit, WorkerPool};

const EVENT_CAPACITY: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DispatchSettings {
    /// Maximum push attempts per request, including the first.
    pub attempts: u32,
    /// Keys that may push at the same time.
    pub threads: usize,
    pub debounce: Duration,
    pub retry_backoff: Duration,
}

impl Default for DispatchSettings {
    fn default() -> Self {
        Self::from(&DispatchConfig::default())
    }
}

impl From<&DispatchConfig> for DispatchSettings {
    fn from(config: &DispatchConfig) -> Self {
        Self {
            attempts: config.attempts.max(1),
            threads: config.threads.max(1),
            debounce: Duration::from_secs(config.debounce_secs),
            retry_backoff: Duration::from_secs(config.retry_backoff_secs),
        }
    }
}

/// Where a key currently is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchState {
    Idle,
    /// Waiting out the debounce window.
    Pending,
    Running,
    /// A push failed and is waiting for the backoff to elapse.
    PendingRetry,
    /// The last request exhausted its attempts.
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    RepositoryDeleted,
    RepositoryEmpty,
}

#[derive(Debug, Clone)]
pub enum DispatchEvent {
    Started {
        key: DispatchKey,
        attempt: u32,
    },
    Succeeded {
        key: DispatchKey,
        outcome: PushOutcome,
    },
    Retrying {
        key: DispatchKey,
        attempt: u32,
        error: String,
    },
    Failed {
        key: DispatchKey,
        attempts: u32,
        error: String,
    },
    Skipped {
        key: DispatchKey,
        reason: SkipReason,
    },
    /// A queued request was replaced by a newer one for the same key.
    Superseded {
        key: DispatchKey,
    },
}

impl DispatchEvent {
    pub fn key(&self) -> &DispatchKey {
        match self {
            DispatchEvent::Started { key, .. }
            | DispatchEvent::Succeeded { key, .. }
            | DispatchEvent::Retrying { key, .. }
            | DispatchEvent::Failed { key, .. }
            | DispatchEvent::Skipped { key, .. }
            | DispatchEvent::Superseded { key } => key,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error("The dispatcher must be created inside a tokio runtime")]
    NoRuntime,
    #[error(transparent)]
    Template(#[from] TemplateError),
    #[error("The worker pool is unavailable after a rebuild")]
    PoolUnavailable,
    #[error("Failed to access the request journal: {0:#}")]
    Journal(anyhow::Error),
}

#[derive(Debug)]
struct KeySlot {
    state: DispatchState,
    pending: Option<MirrorRequest>,
    eligible_at: Instant,
    driver_active: bool,
}

enum Completion {
    Succeeded,
    Skipped,
    Failed,
}

struct Inner {
    runner: Arc<dyn PushRunner>,
    repositories: Arc<dyn RepositoryService>,
    resolver: UrlTemplateResolver,
    settings: DispatchSettings,
    pool: WorkerPool,
    slots: Mutex<HashMap<DispatchKey, KeySlot>>,
    journal: Option<RequestJournal>,
    events: broadcast::Sender<DispatchEvent>,
    idle: Notify,
    runtime: Handle,
}

/// Schedules mirror requests onto the push runner.
///
/// Cloning is cheap; all clones share the same queues and worker pool.
#[derive(Clone)]
pub struct MirrorDispatcher {
    inner: Arc<Inner>,
}

impl MirrorDispatcher {
    /// Create a dispatcher bound to the current tokio runtime.
    pub fn new(
        runner: Arc<dyn PushRunner>,
        repositories: Arc<dyn RepositoryService>,
        settings: DispatchSettings,
    ) -> Result<Self, DispatchError> {
        Self::build(runner, repositories, settings, None)
    }

    /// Like [`MirrorDispatcher::new`], recording queued requests in `journal`.
    pub fn with_journal(
        runner: Arc<dyn PushRunner>,
        repositories: Arc<dyn RepositoryService>,
        settings: DispatchSettings,
        journal: RequestJournal,
    ) -> Result<Self, DispatchError> {
        Self::build(runner, repositories, settings, Some(journal))
    }

    fn build(
        runner: Arc<dyn PushRunner>,
        repositories: Arc<dyn RepositoryService>,
        settings: DispatchSettings,
        journal: Option<RequestJournal>,
    ) -> Result<Self, DispatchError> {
        let runtime = Handle::try_current().map_err(|_| DispatchError::NoRuntime)?;
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        debug!(
            attempts = settings.attempts,
            threads = settings.threads,
            "Initializing mirror dispatcher"
        );
        Ok(Self {
            inner: Arc::new(Inner {
                runner,
                repositories,
                resolver: UrlTemplateResolver::new(),
                pool: WorkerPool::new(settings.threads),
                settings,
                slots: Mutex::new(HashMap::new()),
                journal,
                events,
                idle: Notify::new(),
                runtime,
            }),
        })
    }

    pub fn settings(&self) -> DispatchSettings {
        self.inner.settings()
    }

    /// Resolve URL templates for every target and queue one request each.
    ///
    /// A template error in any target aborts before anything is queued.
    pub fn schedule(
        &self,
        repository: &Repository,
        targets: &[MirrorTarget],
    ) -> Result<usize, DispatchError> {
        let resolved = self.inner.resolver.resolve_targets(targets, repository)?;
        debug!(
            repository = %repository,
            "Scheduling pushes for {} remote(s)",
            resolved.len()
        );
        for target in resolved {
            self.submit(MirrorRequest::new(repository.id, target));
        }
        Ok(targets.len())
    }

    /// Queue `request`, replacing any request already queued for its key.
    ///
    /// With a journal configured the request is written to disk before this
    /// returns. The write happens under the slot lock so the journal sees
    /// requests in the same order as the queue; callers on an async runtime
    /// block their worker thread for the duration of that small file write.
    pub fn submit(&self, request: MirrorRequest) {
        let key = request.key();
        let debounce = self.settings().debounce;
        let spawn_driver = {
            let mut slots = self.inner.lock_slots();
            if let Some(journal) = &self.inner.journal
                && let Err(e) = journal.record(&request)
            {
                warn!(key = %key, "Failed to journal mirror request: {:#}", e);
            }

            let slot = slots.entry(key.clone()).or_insert_with(|| KeySlot {
                state: DispatchState::Idle,
                pending: None,
                eligible_at: Instant::now(),
                driver_active: false,
            });

            match slot.pending.replace(request) {
                Some(_) => self.inner.emit(DispatchEvent::Superseded { key: key.clone() }),
                None => slot.eligible_at = Instant::now() + debounce,
            }
            if matches!(slot.state, DispatchState::Idle | DispatchState::Failed) {
                slot.state = DispatchState::Pending;
            }

            let spawn = !slot.driver_active;
            slot.driver_active = true;
            spawn
        };

        if spawn_driver {
            debug!(key = %key, "Starting dispatch driver");
            self.inner.runtime.spawn(drive(self.inner.clone(), key));
        }
    }

    /// Resubmit every request left in the journal by a previous run.
    pub fn recover(&self) -> Result<usize, DispatchError> {
        let Some(journal) = &self.inner.journal else {
            return Ok(0);
        };
        let requests = journal.load().map_err(DispatchError::Journal)?;
        let count = requests.len();
        if count > 0 {
            let since = journal
                .updated_at()
                .ok()
                .flatten()
                .map(|stamp| stamp.to_rfc3339())
                .unwrap_or_else(|| "an unknown time".to_string());
            info!("Recovering {} mirror request(s) journaled at {}", count, since);
        }
        for request in requests {
            self.submit(request);
        }
        Ok(count)
    }

    pub fn state(&self, key: &DispatchKey) -> DispatchState {
        self.inner
            .lock_slots()
            .get(key)
            .map(|slot| slot.state)
            .unwrap_or(DispatchState::Idle)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<DispatchEvent> {
        self.inner.events.subscribe()
    }

    /// Whether nothing is pending, running, or waiting for a retry.
    pub fn is_idle(&self) -> bool {
        self.inner.is_idle()
    }

    /// Resolve once the dispatcher [is idle](MirrorDispatcher::is_idle).
    pub async fn wait_idle(&self) {
        loop {
            let notified = self.inner.idle.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if self.inner.is_idle() {
                return;
            }
            notified.await;
        }
    }

    /// Mark the worker pool unusable. The next push detects this and
    /// rebuilds it.
    pub fn invalidate_workers(&self) {
        self.inner.pool.invalidate();
    }
}

impl std::fmt::Debug for MirrorDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MirrorDispatcher")
            .field("settings", &self.settings())
            .field("pool_version", &self.inner.pool.version())
            .field("pushes_in_flight", &self.inner.pool.in_flight())
            .finish_non_exhaustive()
    }
}

impl Inner {
    fn lock_slots(&self) -> std::sync::MutexGuard<'_, HashMap<DispatchKey, KeySlot>> {
        self.slots.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn settings(&self) -> DispatchSettings {
        self.settings
    }

    fn emit(&self, event: DispatchEvent) {
        let _ = self.events.send(event);
    }

    fn is_idle(&self) -> bool {
        self.lock_slots().values().all(|slot| !slot.driver_active)
    }

    fn set_state(&self, key: &DispatchKey, state: DispatchState) {
        if let Some(slot) = self.lock_slots().get_mut(key) {
            slot.state = state;
        }
    }

    async fn acquire(&self) -> Result<WorkerPermit, DispatchError> {
        self.pool.acquire().await.ok_or(DispatchError::PoolUnavailable)
    }

    /// Look up the repository and apply the deleted and empty guards.
    async fn guard(&self, request: &MirrorRequest) -> anyhow::Result<Result<Repository, SkipReason>> {
        let Some(repository) = self
            .repositories
            .get_by_id(request.repository_id())
            .await?
        else {
            return Ok(Err(SkipReason::RepositoryDeleted));
        };
        if self.repositories.is_empty(&repository).await? {
            return Ok(Err(SkipReason::RepositoryEmpty));
        }
        Ok(Ok(repository))
    }

    /// Push `request`, retrying failures. A newer request for the key that
    /// arrives during the backoff replaces the failed one and starts over.
    async fn process(&self, key: &DispatchKey, mut request: MirrorRequest) -> Completion {
        let mut attempt = 0;
        loop {
            attempt += 1;
            let settings = self.settings();

            let result = match self.guard(&request).await {
                Ok(Err(reason)) => {
                    debug!(key = %key, ?reason, "Skipping mirror push");
                    self.emit(DispatchEvent::Skipped {
                        key: key.clone(),
                        reason,
                    });
                    return Completion::Skipped;
                }
                Ok(Ok(repository)) => self.push(key, &request, &repository, attempt).await,
                Err(e) => Err(format!("{:#}", e)),
            };

            let error = match result {
                Ok(outcome) => {
                    info!(key = %key, attempts = attempt, "Mirror push succeeded");
                    self.emit(DispatchEvent::Succeeded {
                        key: key.clone(),
                        outcome,
                    });
                    return Completion::Succeeded;
                }
                Err(error) => error,
            };

            if attempt >= settings.attempts {
                error!(
                    key = %key,
                    attempts = attempt,
                    "Mirror push failed after {} attempt(s): {}",
                    attempt,
                    error
                );
                self.emit(DispatchEvent::Failed {
                    key: key.clone(),
                    attempts: attempt,
                    error,
                });
                return Completion::Failed;
            }

            warn!(
                key = %key,
                attempt,
                "Mirror push failed, retrying in {}s: {}",
                settings.retry_backoff.as_secs(),
                error
            );
            self.emit(DispatchEvent::Retrying {
                key: key.clone(),
                attempt,
                error,
            });
            self.set_state(key, DispatchState::PendingRetry);
            tokio::time::sleep(settings.retry_backoff).await;

            let newer = {
                let mut slots = self.lock_slots();
                slots.get_mut(key).and_then(|slot| {
                    slot.state = DispatchState::Running;
                    slot.pending.take()
                })
            };
            if let Some(newer) = newer {
                debug!(key = %key, "Retrying with a newer request");
                self.emit(DispatchEvent::Superseded { key: key.clone() });
                request = newer;
                attempt = 0;
            }
        }
    }

    async fn push(
        &self,
        key: &DispatchKey,
        request: &MirrorRequest,
        repository: &Repository,
        attempt: u32,
    ) -> Result<PushOutcome, String> {
        let permit = self.acquire().await.map_err(|e| e.to_string())?;
        self.emit(DispatchEvent::Started {
            key: key.clone(),
            attempt,
        });
        let result = self.runner.run(request.target(), repository).await;
        drop(permit);

        match result {
            Ok(mut outcome) => {
                outcome.attempts = attempt;
                Ok(outcome)
            }
            Err(e) => Err(match e.outcome() {
                Some(outcome) if !outcome.output().is_empty() => {
                    format!("{}\n{}", e, outcome.output())
                }
                _ => e.to_string(),
            }),
        }
    }

    /// Drop the journal entry of a finished key. Called with the slot lock
    /// held so a concurrent submit cannot be lost.
    fn forget(&self, key: &DispatchKey) {
        if let Some(journal) = &self.journal
            && let Err(e) = journal.remove(key)
        {
            warn!(key = %key, "Failed to remove mirror request from journal: {:#}", e);
        }
    }
}

/// Driver task for one key. Exits once no request is queued for the key.
async fn drive(inner: Arc<Inner>, key: DispatchKey) {
    loop {
        let eligible_at = {
            let slots = inner.lock_slots();
            slots.get(&key).map(|slot| slot.eligible_at)
        };
        if let Some(eligible_at) = eligible_at {
            tokio::time::sleep_until(eligible_at).await;
        }

        let request = {
            let mut slots = inner.lock_slots();
            match slots.get_mut(&key) {
                Some(slot) => match slot.pending.take() {
                    Some(request) => {
                        slot.state = DispatchState::Running;
                        Some(request)
                    }
                    None => {
                        slot.driver_active = false;
                        None
                    }
                },
                None => None,
            }
        };
        let Some(request) = request else {
            inner.idle.notify_waiters();
            return;
        };

        let completion = inner.process(&key, request).await;

        let done = {
            let mut slots = inner.lock_slots();
            let Some(slot) = slots.get_mut(&key) else {
                break;
            };
            if slot.pending.is_some() {
                slot.state = DispatchState::Pending;
                false
            } else {
                slot.driver_active = false;
                slot.state = match completion {
                    Completion::Failed => DispatchState::Failed,
                    Completion::Succeeded | Completion::Skipped => DispatchState::Idle,
                };
                if slot.state == DispatchState::Idle {
                    slots.remove(&key);
                }
                inner.forget(&key);
                true
            }
        };

        if done {
            inner.idle.notify_waiters();
            return;
        }
    }
    inner.idle.notify_waiters();
}
