use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use notify::{Event, EventKind, RecursiveMode, Watcher};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::error::{Result, ScrapeError};

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    pub pool: PoolSettings,
    pub jobs: JobSettings,
    pub server: ServerSettings,
    pub browser: BrowserSettings,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PoolSettings {
    /// Maximum live browser sessions.
    pub capacity: usize,
    #[serde(with = "humantime_serde")]
    pub acquire_timeout: Duration,
    #[serde(with = "humantime_serde")]
    pub max_session_idle_age: Duration,
    /// Jobs a session may serve before it is retired.
    pub max_session_uses: u32,
    #[serde(with = "humantime_serde")]
    pub sweep_interval: Duration,
    /// Graceful-close budget before a browser process is killed.
    #[serde(with = "humantime_serde")]
    pub termination_grace: Duration,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct JobSettings {
    #[serde(with = "humantime_serde")]
    pub step_timeout: Duration,
    #[serde(with = "humantime_serde")]
    pub deadline: Duration,
    pub retry_limit: u32,
    #[serde(with = "humantime_serde")]
    pub backoff_base: Duration,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerSettings {
    pub api_port: u16,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct BrowserSettings {
    pub headless: bool,
    pub user_agent: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            pool: PoolSettings {
                capacity: 4,
                acquire_timeout: Duration::from_secs(10),
                max_session_idle_age: Duration::from_secs(300),
                max_session_uses: 50,
                sweep_interval: Duration::from_secs(30),
                termination_grace: Duration::from_secs(5),
            },
            jobs: JobSettings {
                step_timeout: Duration::from_secs(15),
                deadline: Duration::from_secs(60),
                retry_limit: 2,
                backoff_base: Duration::from_millis(1000),
            },
            server: ServerSettings { api_port: 8080 },
            browser: BrowserSettings {
                headless: true,
                user_agent: Some(
                    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 \
                     (KHTML, like Gecko) Chrome/91.0.4472.124 Safari/537.36"
                        .to_string(),
                ),
            },
        }
    }
}

#[async_trait::async_trait]
pub trait ConfigManager {
    async fn load_config(&self) -> Result<Config>;
    async fn save_config(&self, config: &Config) -> Result<()>;
    async fn watch_config_changes(&self) -> Result<mpsc::Receiver<Config>>;
    fn validate_config(&self, config: &Config) -> Result<()>;
}

pub struct FileConfigManager {
    config_path: PathBuf,
}

impl FileConfigManager {
    pub fn new(config_path: PathBuf) -> Self {
        Self { config_path }
    }
}

#[async_trait::async_trait]
impl ConfigManager for FileConfigManager {
    async fn load_config(&self) -> Result<Config> {
        info!("Loading configuration from {:?}", self.config_path);

        if !self.config_path.exists() {
            warn!(
                "Configuration file not found, creating default config at {:?}",
                self.config_path
            );
            self.create_default_config().await?;
        }

        let config_content = fs::read_to_string(&self.config_path)
            .map_err(|e| ScrapeError::Config(format!("Failed to read config file: {}", e)))?;

        let config: Config = toml::from_str(&config_content)?;

        self.validate_config(&config)?;

        info!("Configuration loaded successfully");
        Ok(config)
    }

    async fn save_config(&self, config: &Config) -> Result<()> {
        info!("Saving configuration to {:?}", self.config_path);

        let toml_content = toml::to_string_pretty(config)
            .map_err(|e| ScrapeError::Config(format!("Failed to serialize config: {}", e)))?;

        fs::write(&self.config_path, toml_content)
            .map_err(|e| ScrapeError::Config(format!("Failed to write config file: {}", e)))?;

        Ok(())
    }

    async fn watch_config_changes(&self) -> Result<mpsc::Receiver<Config>> {
        let (tx, rx) = mpsc::channel(10);
        let config_path = self.config_path.clone();
        let config_manager = FileConfigManager::new(config_path.clone());

        tokio::spawn(async move {
            if let Err(e) = Self::watch_config_file(config_path, tx, config_manager).await {
                error!("Configuration file watcher error: {}", e);
            }
        });

        Ok(rx)
    }

    fn validate_config(&self, config: &Config) -> Result<()> {
        debug!("Validating configuration");

        if config.pool.capacity == 0 {
            return Err(ScrapeError::Config(
                "pool.capacity must be greater than 0".to_string(),
            ));
        }
        if config.pool.capacity > 32 {
            return Err(ScrapeError::Config(
                "pool.capacity cannot exceed 32 for resource safety".to_string(),
            ));
        }
        if config.pool.max_session_uses == 0 {
            return Err(ScrapeError::Config(
                "pool.max_session_uses must be greater than 0".to_string(),
            ));
        }
        if config.pool.sweep_interval.is_zero() {
            return Err(ScrapeError::Config(
                "pool.sweep_interval must be non-zero".to_string(),
            ));
        }
        if config.pool.termination_grace.is_zero() {
            return Err(ScrapeError::Config(
                "pool.termination_grace must be non-zero".to_string(),
            ));
        }

        if config.jobs.step_timeout.is_zero() || config.jobs.deadline.is_zero() {
            return Err(ScrapeError::Config(
                "jobs.step_timeout and jobs.deadline must be non-zero".to_string(),
            ));
        }
        if config.jobs.step_timeout > config.jobs.deadline {
            return Err(ScrapeError::Config(
                "jobs.step_timeout cannot exceed jobs.deadline".to_string(),
            ));
        }
        if config.jobs.retry_limit > 10 {
            return Err(ScrapeError::Config(
                "jobs.retry_limit cannot exceed 10".to_string(),
            ));
        }

        if config.server.api_port < 1024 {
            return Err(ScrapeError::Config(
                "server.api_port must be between 1024 and 65535".to_string(),
            ));
        }

        if let Some(ref user_agent) = config.browser.user_agent {
            if user_agent.trim().is_empty() {
                return Err(ScrapeError::Config(
                    "browser.user_agent cannot be empty when set".to_string(),
                ));
            }
        }

        debug!("Configuration validation passed");
        Ok(())
    }
}

impl FileConfigManager {
    async fn create_default_config(&self) -> Result<()> {
        let default_config = Config::default();
        let toml_content = toml::to_string_pretty(&default_config)
            .map_err(|e| ScrapeError::Config(format!("Failed to serialize default config: {}", e)))?;

        if let Some(parent) = self.config_path.parent() {
            fs::create_dir_all(parent).map_err(|e| {
                ScrapeError::Config(format!("Failed to create config directory: {}", e))
            })?;
        }

        fs::write(&self.config_path, toml_content)
            .map_err(|e| ScrapeError::Config(format!("Failed to write default config: {}", e)))?;

        info!("Default configuration file created at {:?}", self.config_path);
        Ok(())
    }

    /// Watch the config file and push successfully reloaded configs into the
    /// channel. A reload that fails validation keeps the previous config.
    async fn watch_config_file(
        config_path: PathBuf,
        tx: mpsc::Sender<Config>,
        config_manager: FileConfigManager,
    ) -> Result<()> {
        let (file_tx, mut file_rx) = mpsc::channel(100);

        let mut watcher = notify::recommended_watcher(move |res: notify::Result<Event>| match res {
            Ok(event) => {
                if let Err(e) = file_tx.blocking_send(event) {
                    error!("Failed to send file system event: {}", e);
                }
            }
            Err(e) => error!("File system watcher error: {}", e),
        })
        .map_err(|e| ScrapeError::Config(format!("Failed to create file watcher: {}", e)))?;

        let watch_path = config_path.parent().unwrap_or(&config_path);
        watcher
            .watch(watch_path, RecursiveMode::NonRecursive)
            .map_err(|e| ScrapeError::Config(format!("Failed to watch config directory: {}", e)))?;

        info!("Started watching configuration file: {:?}", config_path);

        while let Some(event) = file_rx.recv().await {
            match event.kind {
                EventKind::Modify(_) | EventKind::Create(_) => {
                    if event.paths.iter().any(|p| p == &config_path) {
                        debug!("Configuration file changed, reloading");

                        // give the writer a moment to finish
                        tokio::time::sleep(Duration::from_millis(100)).await;

                        match config_manager.load_config().await {
                            Ok(new_config) => {
                                info!("Configuration reloaded successfully");
                                if tx.send(new_config).await.is_err() {
                                    break;
                                }
                            }
                            Err(e) => {
                                error!("Failed to reload configuration: {}", e);
                            }
                        }
                    }
                }
                _ => {}
            }
        }

        Ok(())
    }
}
