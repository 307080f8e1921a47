use std::time::Duration;

use async_trait::async_trait;
use chromiumoxide::browser::{Browser, BrowserConfig};
use chromiumoxide::cdp::browser_protocol::emulation::SetUserAgentOverrideParams;
use chromiumoxide::page::Page;
use futures::StreamExt;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::browser::{DriverBackend, DriverSession};
use crate::config::BrowserSettings;
use crate::error::{Result, ScrapeError};

const LAUNCH_ATTEMPTS: u32 = 3;
const PAGE_CREATE_TIMEOUT: Duration = Duration::from_secs(10);
const SELECTOR_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Launches one Chromium process per session. A dedicated process (rather
/// than a tab in a shared browser) is what makes forced termination of a
/// single stuck session possible.
pub struct ChromiumBackend {
    settings: BrowserSettings,
}

impl ChromiumBackend {
    pub fn new(settings: BrowserSettings) -> Self {
        Self { settings }
    }

    fn build_config(&self, user_data_dir: &str) -> Result<BrowserConfig> {
        let user_data_arg = format!("--user-data-dir={}", user_data_dir);
        let mut config = BrowserConfig::builder().no_sandbox().args(vec![
            user_data_arg.as_str(),
            "--headless",
            "--no-sandbox",
            "--disable-gpu",
            "--disable-dev-shm-usage",
            "--disable-extensions",
            "--disable-plugins",
            "--mute-audio",
            "--no-first-run",
            "--disable-default-apps",
            "--disable-sync",
            "--disable-background-networking",
            "--disable-features=VizDisplayCompositor",
            "--remote-debugging-port=0",
            "--disable-background-timer-throttling",
            "--disable-renderer-backgrounding",
            "--disable-backgrounding-occluded-windows",
            "--disable-blink-features=AutomationControlled",
            "--disable-dev-tools",
            "--disable-logging",
            "--silent",
            "--log-level=3",
        ]);

        if !self.settings.headless {
            config = config.with_head();
        }

        config
            .build()
            .map_err(|e| ScrapeError::Browser(format!("Failed to build browser config: {}", e)))
    }
}

#[async_trait]
impl DriverBackend for ChromiumBackend {
    async fn launch(&self) -> Result<Box<dyn DriverSession>> {
        // unique user data dir per session to avoid singleton lock issues
        let user_data_dir = std::env::temp_dir().join(format!(
            "site-audit-{}-{}",
            std::process::id(),
            uuid::Uuid::new_v4()
        ));
        let _ = std::fs::create_dir_all(&user_data_dir);

        let browser_config = self.build_config(&user_data_dir.to_string_lossy())?;

        let mut last_error = None;
        for attempt in 1..=LAUNCH_ATTEMPTS {
            match Browser::launch(browser_config.clone()).await {
                Ok((browser, mut handler)) => {
                    debug!("Browser launched on attempt {}", attempt);

                    let handler_task = tokio::spawn(async move {
                        while let Some(h) = handler.next().await {
                            if let Err(e) = h {
                                // filter out common websocket deserialization noise
                                let msg = e.to_string();
                                if msg.contains("data did not match any variant")
                                    || msg.contains("untagged enum Message")
                                {
                                    debug!("Ignoring WebSocket deserialization error: {}", e);
                                } else {
                                    warn!("Browser handler error: {}", e);
                                }
                            }
                        }
                        debug!("Browser handler task ended");
                    });

                    let page = match tokio::time::timeout(
                        PAGE_CREATE_TIMEOUT,
                        browser.new_page("about:blank"),
                    )
                    .await
                    {
                        Ok(Ok(page)) => page,
                        Ok(Err(e)) => {
                            handler_task.abort();
                            return Err(ScrapeError::Browser(format!(
                                "Failed to create page: {}",
                                e
                            )));
                        }
                        Err(_) => {
                            handler_task.abort();
                            return Err(ScrapeError::Browser(
                                "Timeout creating browser page".to_string(),
                            ));
                        }
                    };

                    if let Some(ref user_agent) = self.settings.user_agent {
                        let params = SetUserAgentOverrideParams::builder()
                            .user_agent(user_agent)
                            .build()
                            .map_err(|e| {
                                ScrapeError::Browser(format!(
                                    "Failed to build user agent params: {}",
                                    e
                                ))
                            })?;
                        page.execute(params).await.map_err(|e| {
                            ScrapeError::Browser(format!("Failed to set user agent: {}", e))
                        })?;
                    }

                    info!("Created new browser session");
                    return Ok(Box::new(ChromiumSession {
                        browser,
                        page,
                        handler_task,
                    }));
                }
                Err(e) => {
                    error!("Browser launch attempt {} failed: {}", attempt, e);
                    last_error = Some(e);
                    if attempt < LAUNCH_ATTEMPTS {
                        tokio::time::sleep(Duration::from_secs(2)).await;
                    }
                }
            }
        }

        Err(ScrapeError::Browser(format!(
            "Failed to launch browser after {} attempts: {}",
            LAUNCH_ATTEMPTS,
            last_error
                .map(|e| e.to_string())
                .unwrap_or_else(|| "unknown".to_string())
        )))
    }
}

pub struct ChromiumSession {
    browser: Browser,
    page: Page,
    handler_task: JoinHandle<()>,
}

#[async_trait]
impl DriverSession for ChromiumSession {
    async fn goto(&self, url: &str) -> Result<()> {
        self.page
            .goto(url)
            .await
            .map_err(|e| ScrapeError::Browser(format!("Failed to navigate to {}: {}", url, e)))?;
        debug!("Navigated to {}", url);
        Ok(())
    }

    async fn content(&self) -> Result<String> {
        Ok(self.page.content().await?)
    }

    async fn evaluate(&self, script: &str) -> Result<serde_json::Value> {
        let result = self
            .page
            .evaluate(script)
            .await
            .map_err(|e| ScrapeError::Browser(format!("Failed to evaluate script: {}", e)))?;
        Ok(result.into_value().unwrap_or(serde_json::Value::Null))
    }

    async fn click(&self, selector: &str) -> Result<()> {
        let element = self.page.find_element(selector).await.map_err(|e| {
            ScrapeError::Browser(format!("No element matching '{}': {}", selector, e))
        })?;
        element
            .click()
            .await
            .map_err(|e| ScrapeError::Browser(format!("Failed to click '{}': {}", selector, e)))?;
        Ok(())
    }

    async fn type_text(&self, selector: &str, text: &str) -> Result<()> {
        let element = self.page.find_element(selector).await.map_err(|e| {
            ScrapeError::Browser(format!("No element matching '{}': {}", selector, e))
        })?;
        element.click().await.map_err(|e| {
            ScrapeError::Browser(format!("Failed to focus '{}': {}", selector, e))
        })?;
        element.type_str(text).await.map_err(|e| {
            ScrapeError::Browser(format!("Failed to type into '{}': {}", selector, e))
        })?;
        Ok(())
    }

    async fn wait_for_selector(&self, selector: &str) -> Result<()> {
        // the runner bounds this loop with the step timeout
        loop {
            if self.page.find_element(selector).await.is_ok() {
                return Ok(());
            }
            tokio::time::sleep(SELECTOR_POLL_INTERVAL).await;
        }
    }

    async fn is_alive(&self) -> bool {
        self.page.evaluate("1 + 1").await.is_ok()
    }

    async fn terminate(&mut self, grace: Duration) -> Result<()> {
        match tokio::time::timeout(grace, self.browser.close()).await {
            Ok(Ok(_)) => debug!("Browser closed gracefully"),
            Ok(Err(e)) => warn!("Graceful browser close failed: {}", e),
            Err(_) => warn!("Graceful browser close timed out after {:?}", grace),
        }

        // kill is a no-op if the process already exited
        let kill_result = self.browser.kill().await;
        self.handler_task.abort();

        match kill_result {
            Some(Err(e)) => Err(ScrapeError::Browser(format!(
                "Failed to kill browser process: {}",
                e
            ))),
            _ => {
                info!("Browser session terminated");
                Ok(())
            }
        }
    }
}
