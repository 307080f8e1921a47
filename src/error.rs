use std::time::Duration;
use thiserror::Error;

use crate::browser::SessionId;
use crate::job::StepKind;

pub type Result<T> = std::result::Result<T, ScrapeError>;

#[derive(Error, Debug)]
pub enum ScrapeError {
    #[error("no idle session became available within {waited:?}")]
    PoolExhausted { waited: Duration },

    #[error("{kind} step exceeded its {timeout:?} budget")]
    StepTimeout { kind: StepKind, timeout: Duration },

    #[error("browser session lost: {0}")]
    SessionCrash(String),

    #[error("could not reclaim browser process for session {0}, slot leaked")]
    FatalResourceLeak(SessionId),

    #[error("browser error: {0}")]
    Browser(String),

    #[error("extraction error: {0}")]
    Extraction(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("invalid job: {0}")]
    InvalidJob(String),
}

impl ScrapeError {
    /// Whether a job-level retry on a fresh session is worth attempting.
    /// Only session crashes and navigation timeouts qualify; everything else
    /// is either caller backpressure or a deterministic failure.
    pub fn is_transient(&self) -> bool {
        match self {
            ScrapeError::SessionCrash(_) => true,
            ScrapeError::StepTimeout { kind, .. } => *kind == StepKind::Navigate,
            _ => false,
        }
    }
}

impl From<std::io::Error> for ScrapeError {
    fn from(err: std::io::Error) -> Self {
        ScrapeError::Config(err.to_string())
    }
}

impl From<serde_json::Error> for ScrapeError {
    fn from(err: serde_json::Error) -> Self {
        ScrapeError::Extraction(err.to_string())
    }
}

impl From<toml::de::Error> for ScrapeError {
    fn from(err: toml::de::Error) -> Self {
        ScrapeError::Config(err.to_string())
    }
}

impl From<chromiumoxide::error::CdpError> for ScrapeError {
    fn from(err: chromiumoxide::error::CdpError) -> Self {
        ScrapeError::Browser(err.to_string())
    }
}
