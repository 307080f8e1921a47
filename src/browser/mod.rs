pub mod chromium;
pub mod lifecycle;
pub mod pool;

#[cfg(test)]
pub(crate) mod testing;

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::error::Result;

pub use chromium::ChromiumBackend;
pub use lifecycle::LifecycleManager;
pub use pool::{DriverPool, PoolStats, ReleaseOutcome, SessionLease};

pub type SessionId = Uuid;

/// Health state of a pooled browser session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SessionState {
    Idle,
    Busy,
    Unhealthy,
    Terminating,
}

/// Bookkeeping the pool keeps per session. The driver handle itself travels
/// with the lease while the session is Busy.
#[derive(Debug, Clone)]
pub struct SessionMeta {
    pub id: SessionId,
    pub created_at: DateTime<Utc>,
    pub last_used: DateTime<Utc>,
    pub use_count: u32,
    pub state: SessionState,
}

impl SessionMeta {
    pub fn new() -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            created_at: now,
            last_used: now,
            use_count: 0,
            state: SessionState::Idle,
        }
    }

    pub fn idle_age(&self, now: DateTime<Utc>) -> Duration {
        now.signed_duration_since(self.last_used)
            .to_std()
            .unwrap_or(Duration::ZERO)
    }
}

/// Launches browser sessions. The pool only ever talks to the engine through
/// this seam, so tests can swap in a scripted backend.
#[async_trait]
pub trait DriverBackend: Send + Sync {
    async fn launch(&self) -> Result<Box<dyn DriverSession>>;
}

/// One live browser automation handle. All calls are cancel-safe from the
/// caller's side: the runner wraps them in timeouts and the pool kills the
/// underlying process when a call is abandoned mid-flight.
#[async_trait]
pub trait DriverSession: Send + Sync {
    async fn goto(&self, url: &str) -> Result<()>;

    /// Full HTML of the current document.
    async fn content(&self) -> Result<String>;

    async fn evaluate(&self, script: &str) -> Result<serde_json::Value>;

    async fn click(&self, selector: &str) -> Result<()>;

    async fn type_text(&self, selector: &str, text: &str) -> Result<()>;

    /// Polls until the selector matches an element in the document.
    async fn wait_for_selector(&self, selector: &str) -> Result<()>;

    async fn is_alive(&self) -> bool;

    /// Graceful close bounded by `grace`, then forced kill. An error here
    /// means the process could not be reclaimed at all.
    async fn terminate(&mut self, grace: Duration) -> Result<()>;
}
