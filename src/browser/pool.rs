use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use chrono::Utc;
use serde::Serialize;
use tokio::sync::Notify;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::browser::{DriverBackend, DriverSession, SessionId, SessionMeta, SessionState};
use crate::config::PoolSettings;
use crate::error::{Result, ScrapeError};

/// How a job ended on a session, as reported back on release.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReleaseOutcome {
    /// Clean completion, session can serve the next job.
    Healthy,
    /// Timeout, crash, or any browser-level error: terminate and replace.
    Unhealthy,
}

#[derive(Debug, Clone, Serialize)]
pub struct PoolStats {
    pub capacity: usize,
    pub idle: usize,
    pub busy: usize,
    pub starting: usize,
    pub leaked: usize,
}

struct IdleSession {
    meta: SessionMeta,
    handle: Box<dyn DriverSession>,
}

#[derive(Default)]
struct PoolState {
    idle: VecDeque<IdleSession>,
    busy: HashMap<SessionId, SessionMeta>,
    starting: usize,
    leaked: usize,
    closed: bool,
}

impl PoolState {
    fn live(&self) -> usize {
        self.idle.len() + self.busy.len() + self.starting + self.leaked
    }
}

/// Bounded pool of live browser sessions. The single shared mutable resource
/// of the service: all capacity accounting happens under one lock, while
/// launches and terminations run outside it against a reserved slot.
pub struct DriverPool {
    state: Mutex<PoolState>,
    notify: Notify,
    backend: Arc<dyn DriverBackend>,
    settings: PoolSettings,
}

impl DriverPool {
    pub fn new(backend: Arc<dyn DriverBackend>, settings: PoolSettings) -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(PoolState::default()),
            notify: Notify::new(),
            backend,
            settings,
        })
    }

    pub fn capacity(&self) -> usize {
        self.settings.capacity
    }

    fn lock(&self) -> MutexGuard<'_, PoolState> {
        // bookkeeping lock is never held across an await, so poisoning only
        // happens if a panic hit mid-update; propagating it helps nobody
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn stats(&self) -> PoolStats {
        let state = self.lock();
        PoolStats {
            capacity: self.settings.capacity,
            idle: state.idle.len(),
            busy: state.busy.len(),
            starting: state.starting,
            leaked: state.leaked,
        }
    }

    /// Blocks until an Idle session is available or `timeout` elapses.
    /// Launches lazily while below capacity; at capacity it waits for a
    /// release and fails with `PoolExhausted` once the timeout is spent.
    pub async fn acquire(self: &Arc<Self>, timeout: Duration) -> Result<SessionLease> {
        let deadline = Instant::now() + timeout;

        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            // register for wakeups before inspecting state so a release
            // between unlock and await is not missed
            notified.as_mut().enable();

            let mut launch_reserved = false;
            {
                let mut state = self.lock();
                if state.closed {
                    return Err(ScrapeError::Browser("pool is shut down".to_string()));
                }
                if let Some(mut idle) = state.idle.pop_front() {
                    idle.meta.state = SessionState::Busy;
                    idle.meta.last_used = Utc::now();
                    idle.meta.use_count += 1;
                    state.busy.insert(idle.meta.id, idle.meta.clone());
                    debug!("Acquired idle session {}", idle.meta.id);
                    return Ok(SessionLease::new(self.clone(), idle.meta, idle.handle));
                }
                if state.live() < self.settings.capacity {
                    state.starting += 1;
                    launch_reserved = true;
                }
            }

            if launch_reserved {
                return self.launch_busy().await;
            }

            if Instant::now() >= deadline {
                return Err(ScrapeError::PoolExhausted { waited: timeout });
            }
            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return Err(ScrapeError::PoolExhausted { waited: timeout });
            }
        }
    }

    /// Launch against an already-reserved slot and hand the session straight
    /// to the caller as Busy.
    async fn launch_busy(self: &Arc<Self>) -> Result<SessionLease> {
        match self.backend.launch().await {
            Ok(handle) => {
                let mut meta = SessionMeta::new();
                meta.state = SessionState::Busy;
                meta.use_count = 1;
                let mut state = self.lock();
                state.starting -= 1;
                state.busy.insert(meta.id, meta.clone());
                info!("Launched session {} for caller", meta.id);
                Ok(SessionLease::new(self.clone(), meta, handle))
            }
            Err(e) => {
                error!("Session launch failed: {}", e);
                {
                    let mut state = self.lock();
                    state.starting -= 1;
                }
                self.notify.notify_waiters();
                Err(e)
            }
        }
    }

    /// Returns a session to the pool. A healthy outcome puts it back in the
    /// Idle queue; an unhealthy one terminates it in the background and
    /// eagerly launches a replacement. Releasing a session that is no longer
    /// Busy (already reclaimed by the drop backstop) is a no-op.
    pub async fn release(self: &Arc<Self>, mut lease: SessionLease, outcome: ReleaseOutcome) {
        lease.released = true;
        let handle = match lease.handle.take() {
            Some(handle) => handle,
            None => return,
        };
        let id = lease.meta.id;

        // the busy removal and the idle push-back happen under one guard: a
        // window between them would let a concurrent acquire reserve a launch
        // slot and push the pool past capacity
        let retire: Option<(Box<dyn DriverSession>, bool)> = {
            let mut state = self.lock();
            let mut meta = match state.busy.remove(&id) {
                Some(meta) => meta,
                None => {
                    debug!("Release of session {} ignored, not busy", id);
                    return;
                }
            };
            match outcome {
                ReleaseOutcome::Healthy if !state.closed => {
                    meta.state = SessionState::Idle;
                    meta.last_used = Utc::now();
                    debug!("Session {} back to idle (use count {})", id, meta.use_count);
                    state.idle.push_back(IdleSession { meta, handle });
                    None
                }
                ReleaseOutcome::Healthy => Some((handle, false)),
                ReleaseOutcome::Unhealthy => Some((handle, true)),
            }
        };

        match retire {
            None => self.notify.notify_waiters(),
            Some((handle, replace)) => {
                if replace {
                    warn!("Session {} released unhealthy, recycling", id);
                }
                self.spawn_retire(id, handle, replace);
            }
        }
    }

    fn spawn_retire(self: &Arc<Self>, id: SessionId, handle: Box<dyn DriverSession>, replace: bool) {
        let pool = self.clone();
        tokio::spawn(async move {
            pool.retire(id, handle, replace).await;
        });
    }

    /// Terminate a session's browser process, escalating per the grace
    /// period. The one unrecoverable path leaks the slot permanently.
    async fn retire(self: &Arc<Self>, id: SessionId, mut handle: Box<dyn DriverSession>, replace: bool) {
        match handle.terminate(self.settings.termination_grace).await {
            Ok(()) => {
                debug!("Session {} terminated", id);
            }
            Err(e) => {
                let leak = ScrapeError::FatalResourceLeak(id);
                error!("{}: {}", leak, e);
                let mut state = self.lock();
                state.leaked += 1;
                return;
            }
        }

        self.notify.notify_waiters();

        if replace {
            self.replace_slot().await;
        }
    }

    /// Eager replacement after an unhealthy release: launch a fresh Idle
    /// session so capacity is restored without a caller paying the startup
    /// latency later.
    async fn replace_slot(self: &Arc<Self>) {
        {
            let mut state = self.lock();
            if state.closed || state.live() >= self.settings.capacity {
                return;
            }
            state.starting += 1;
        }

        match self.backend.launch().await {
            Ok(handle) => {
                let meta = SessionMeta::new();
                let id = meta.id;
                let mut state = self.lock();
                state.starting -= 1;
                if state.closed {
                    drop(state);
                    self.spawn_retire(id, handle, false);
                    return;
                }
                state.idle.push_back(IdleSession { meta, handle });
                drop(state);
                info!("Replacement session {} ready", id);
                self.notify.notify_waiters();
            }
            Err(e) => {
                // next acquire will launch lazily instead
                warn!("Replacement session launch failed: {}", e);
                {
                    let mut state = self.lock();
                    state.starting -= 1;
                }
                self.notify.notify_waiters();
            }
        }
    }

    /// Retire Idle sessions past their idle age or usage budget. Called by
    /// the lifecycle manager; freed slots are refilled lazily on the next
    /// acquire.
    pub async fn sweep(self: &Arc<Self>, max_idle_age: Duration, max_uses: u32) -> usize {
        let now = Utc::now();
        let expired: Vec<IdleSession> = {
            let mut state = self.lock();
            let mut kept = VecDeque::new();
            let mut expired = Vec::new();
            while let Some(mut idle) = state.idle.pop_front() {
                if idle.meta.idle_age(now) > max_idle_age || idle.meta.use_count >= max_uses {
                    idle.meta.state = SessionState::Terminating;
                    expired.push(idle);
                } else {
                    kept.push_back(idle);
                }
            }
            state.idle = kept;
            expired
        };

        let count = expired.len();
        for idle in expired {
            info!(
                "Retiring session {} (idle {:?}, {} uses)",
                idle.meta.id,
                idle.meta.idle_age(now),
                idle.meta.use_count
            );
            self.retire(idle.meta.id, idle.handle, false).await;
        }
        count
    }

    /// Drain and terminate every Idle session and refuse new acquires. Busy
    /// sessions are terminated when their lease comes back.
    pub async fn shutdown(self: &Arc<Self>) {
        let drained: Vec<IdleSession> = {
            let mut state = self.lock();
            state.closed = true;
            state.idle.drain(..).collect()
        };
        self.notify.notify_waiters();

        for idle in drained {
            self.retire(idle.meta.id, idle.handle, false).await;
        }
        info!("Driver pool shut down");
    }

    /// Backstop for leases dropped without an explicit release: the session
    /// is presumed abandoned mid-job and recycled as unhealthy.
    fn reclaim_dropped(self: &Arc<Self>, id: SessionId, handle: Box<dyn DriverSession>) {
        let was_busy = {
            let mut state = self.lock();
            state.busy.remove(&id).is_some()
        };
        if !was_busy {
            return;
        }
        warn!("Session lease {} dropped without release, recycling", id);
        self.spawn_retire(id, handle, true);
    }
}

/// Exclusive borrow of one pooled session for the duration of one job.
/// Hand it back with `DriverPool::release`; dropping it instead counts as an
/// unhealthy release.
pub struct SessionLease {
    pool: Arc<DriverPool>,
    meta: SessionMeta,
    handle: Option<Box<dyn DriverSession>>,
    released: bool,
}

impl SessionLease {
    fn new(pool: Arc<DriverPool>, meta: SessionMeta, handle: Box<dyn DriverSession>) -> Self {
        Self {
            pool,
            meta,
            handle: Some(handle),
            released: false,
        }
    }

    pub fn id(&self) -> SessionId {
        self.meta.id
    }

    pub fn meta(&self) -> &SessionMeta {
        &self.meta
    }

    pub fn session(&self) -> &dyn DriverSession {
        // the handle only leaves the lease inside release/drop, which both
        // consume the lease
        self.handle
            .as_deref()
            .expect("session handle present while lease is held")
    }
}

// manual impl: the driver handle is a trait object
impl fmt::Debug for SessionLease {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionLease")
            .field("meta", &self.meta)
            .field("released", &self.released)
            .finish_non_exhaustive()
    }
}

impl Drop for SessionLease {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        if let Some(handle) = self.handle.take() {
            if tokio::runtime::Handle::try_current().is_ok() {
                self.pool.reclaim_dropped(self.meta.id, handle);
            }
        }
    }
}
