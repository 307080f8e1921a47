//! Scripted driver backend for exercising pool, lifecycle, and runner
//! behavior without a real browser.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;

use crate::browser::{DriverBackend, DriverSession};
use crate::error::{Result, ScrapeError};

const DEFAULT_HTML: &str = r#"
    <html><head><title>Mock Page</title></head>
    <body><h1>Hello</h1><a href="/inside">in</a><a href="https://other.example/">out</a></body>
    </html>
"#;

/// Script for one launched session. Call indices are 0-based and count every
/// driver call the session serves.
#[derive(Debug, Clone, Default)]
pub struct MockScript {
    pub crash_at: Option<usize>,
    pub hang_at: Option<usize>,
    pub terminate_fails: bool,
    pub html: Option<String>,
}

impl MockScript {
    pub fn crash_on_first_call() -> Self {
        Self {
            crash_at: Some(0),
            ..Default::default()
        }
    }

    pub fn hang_on_call(at: usize) -> Self {
        Self {
            hang_at: Some(at),
            ..Default::default()
        }
    }

    pub fn unkillable() -> Self {
        Self {
            terminate_fails: true,
            ..Default::default()
        }
    }
}

pub struct MockBackend {
    scripts: Mutex<VecDeque<MockScript>>,
    launched: AtomicUsize,
    terminated: Arc<AtomicUsize>,
    serve_log: Arc<Mutex<Vec<usize>>>,
}

impl MockBackend {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            scripts: Mutex::new(VecDeque::new()),
            launched: AtomicUsize::new(0),
            terminated: Arc::new(AtomicUsize::new(0)),
            serve_log: Arc::new(Mutex::new(Vec::new())),
        })
    }

    /// Queue a script for the next launch; launches beyond the queue get a
    /// healthy default session.
    pub fn push_script(&self, script: MockScript) {
        self.scripts.lock().unwrap().push_back(script);
    }

    pub fn launched(&self) -> usize {
        self.launched.load(Ordering::SeqCst)
    }

    pub fn terminated(&self) -> usize {
        self.terminated.load(Ordering::SeqCst)
    }

    /// Labels of the sessions that served navigate calls, in order.
    pub fn serve_log(&self) -> Vec<usize> {
        self.serve_log.lock().unwrap().clone()
    }
}

#[async_trait]
impl DriverBackend for MockBackend {
    async fn launch(&self) -> Result<Box<dyn DriverSession>> {
        let label = self.launched.fetch_add(1, Ordering::SeqCst);
        let script = self
            .scripts
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_default();
        Ok(Box::new(MockSession {
            label,
            script,
            calls: AtomicUsize::new(0),
            terminated: self.terminated.clone(),
            serve_log: self.serve_log.clone(),
        }))
    }
}

pub struct MockSession {
    label: usize,
    script: MockScript,
    calls: AtomicUsize,
    terminated: Arc<AtomicUsize>,
    serve_log: Arc<Mutex<Vec<usize>>>,
}

impl MockSession {
    async fn serve(&self) -> Result<()> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        if self.script.hang_at == Some(call) {
            // the caller's step timeout is the only way out
            tokio::time::sleep(Duration::from_secs(3600)).await;
        }
        if self.script.crash_at == Some(call) {
            return Err(ScrapeError::SessionCrash(format!(
                "scripted crash on call {}",
                call
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl DriverSession for MockSession {
    async fn goto(&self, _url: &str) -> Result<()> {
        self.serve_log.lock().unwrap().push(self.label);
        self.serve().await
    }

    async fn content(&self) -> Result<String> {
        self.serve().await?;
        Ok(self
            .script
            .html
            .clone()
            .unwrap_or_else(|| DEFAULT_HTML.to_string()))
    }

    async fn evaluate(&self, _script: &str) -> Result<serde_json::Value> {
        self.serve().await?;
        Ok(json!(true))
    }

    async fn click(&self, _selector: &str) -> Result<()> {
        self.serve().await
    }

    async fn type_text(&self, _selector: &str, _text: &str) -> Result<()> {
        self.serve().await
    }

    async fn wait_for_selector(&self, _selector: &str) -> Result<()> {
        self.serve().await
    }

    async fn is_alive(&self) -> bool {
        true
    }

    async fn terminate(&mut self, _grace: Duration) -> Result<()> {
        if self.script.terminate_fails {
            return Err(ScrapeError::Browser(
                "scripted process refuses to exit".to_string(),
            ));
        }
        self.terminated.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
