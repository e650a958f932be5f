//! Versioned handle to the semaphore bounding concurrent pushes.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::{debug, warn};

struct PoolState {
    version: u64,
    permits: usize,
    semaphore: Arc<Semaphore>,
    /// Permits handed out by the current semaphore and not yet returned.
    current: usize,
    /// Permits still held from semaphores that have since been replaced.
    stale: usize,
    /// Permits the current semaphore has been given so far.
    granted: usize,
}

impl PoolState {
    /// Hand the current semaphore whatever capacity stale permits no longer
    /// occupy.
    fn top_up(&mut self) {
        let wanted = self.permits.saturating_sub(self.stale);
        if wanted > self.granted {
            self.semaphore.add_permits(wanted - self.granted);
            self.granted = wanted;
        }
    }
}

/// The process-wide worker bound.
///
/// The semaphore itself is swapped out on [`WorkerPool::rebuild`]; callers
/// hold a snapshot and compare versions so that only one of several racing
/// callers replaces a broken pool. Permits taken from a replaced semaphore
/// keep counting against the bound until they are dropped, so a rebuild
/// never lets more than `permits` pushes run at once.
pub(crate) struct WorkerPool {
    state: Arc<Mutex<PoolState>>,
}

/// A slot in the worker bound, released on drop.
pub(crate) struct WorkerPermit {
    version: u64,
    state: Arc<Mutex<PoolState>>,
    _permit: OwnedSemaphorePermit,
}

impl Drop for WorkerPermit {
    fn drop(&mut self) {
        let mut state = lock(&self.state);
        if state.version == self.version {
            state.current -= 1;
        } else {
            state.stale -= 1;
            state.top_up();
        }
    }
}

fn lock(state: &Mutex<PoolState>) -> MutexGuard<'_, PoolState> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

impl WorkerPool {
    pub(crate) fn new(permits: usize) -> Self {
        let permits = permits.max(1);
        Self {
            state: Arc::new(Mutex::new(PoolState {
                version: 0,
                permits,
                semaphore: Arc::new(Semaphore::new(permits)),
                current: 0,
                stale: 0,
                granted: permits,
            })),
        }
    }

    pub(crate) fn snapshot(&self) -> (u64, Arc<Semaphore>) {
        let state = lock(&self.state);
        (state.version, state.semaphore.clone())
    }

    pub(crate) fn version(&self) -> u64 {
        lock(&self.state).version
    }

    /// Number of permits currently held, stale ones included.
    pub(crate) fn in_flight(&self) -> usize {
        let state = lock(&self.state);
        state.current + state.stale
    }

    /// Mark the current pool unusable. Pending and future acquires on it fail.
    pub(crate) fn invalidate(&self) {
        let state = lock(&self.state);
        debug!(version = state.version, "Invalidating worker pool");
        state.semaphore.close();
    }

    /// Replace the pool if it is still at `observed`; otherwise return the
    /// pool somebody else already installed.
    ///
    /// The new semaphore starts with only the capacity that running pushes
    /// leave free and grows as they finish.
    pub(crate) fn rebuild(&self, observed: u64) -> (u64, Arc<Semaphore>) {
        let mut state = lock(&self.state);
        if state.version == observed {
            state.semaphore.close();
            state.version += 1;
            state.stale += state.current;
            state.current = 0;
            state.granted = state.permits.saturating_sub(state.stale);
            state.semaphore = Arc::new(Semaphore::new(state.granted));
            debug!(
                version = state.version,
                held = state.stale,
                "Rebuilt worker pool"
            );
        }
        (state.version, state.semaphore.clone())
    }

    /// Wait for a permit, rebuilding the pool once if it was invalidated.
    ///
    /// Returns `None` when the rebuilt pool is unusable as well.
    pub(crate) async fn acquire(&self) -> Option<WorkerPermit> {
        let mut rebuilt = false;
        loop {
            let (version, semaphore) = self.snapshot();
            match semaphore.acquire_owned().await {
                Ok(permit) => {
                    if let Some(permit) = self.admit(version, permit) {
                        return Some(permit);
                    }
                }
                Err(_) if rebuilt => return None,
                Err(_) => {
                    warn!(version, "Worker pool is unusable; rebuilding it");
                    self.rebuild(version);
                    rebuilt = true;
                }
            }
        }
    }

    /// Register a permit taken from the semaphore of `version`. A permit from
    /// a semaphore replaced in the meantime is handed back so the caller
    /// retries on the current one.
    fn admit(&self, version: u64, permit: OwnedSemaphorePermit) -> Option<WorkerPermit> {
        let mut state = lock(&self.state);
        if state.version != version {
            return None;
        }
        state.current += 1;
        Some(WorkerPermit {
            version,
            state: self.state.clone(),
            _permit: permit,
        })
    }
}
