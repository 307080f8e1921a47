pub mod runner;

#[cfg(test)]
mod tests;

use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::config::JobSettings;
use crate::error::{Result, ScrapeError};

pub use runner::JobRunner;

pub type JobId = Uuid;

/// One automation step executed against a browser session.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Step {
    Navigate {
        url: String,
    },
    /// Wait for a selector to appear, or for a fixed duration.
    Wait {
        #[serde(default)]
        selector: Option<String>,
        #[serde(default, with = "humantime_serde")]
        duration: Option<Duration>,
    },
    Extract {
        name: String,
        target: ExtractTarget,
    },
    Interact {
        action: InteractAction,
    },
}

impl Step {
    pub fn kind(&self) -> StepKind {
        match self {
            Step::Navigate { .. } => StepKind::Navigate,
            Step::Wait { .. } => StepKind::Wait,
            Step::Extract { .. } => StepKind::Extract,
            Step::Interact { .. } => StepKind::Interact,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepKind {
    Navigate,
    Wait,
    Extract,
    Interact,
}

impl fmt::Display for StepKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            StepKind::Navigate => "navigate",
            StepKind::Wait => "wait",
            StepKind::Extract => "extract",
            StepKind::Interact => "interact",
        };
        f.write_str(name)
    }
}

/// What an extract step pulls out of the current document.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ExtractTarget {
    /// Joined text content of the first matching element.
    Text { selector: String },
    /// A single attribute of the first matching element.
    Attribute { selector: String, attribute: String },
    /// Inner HTML of the first matching element.
    Html { selector: String },
    /// Number of matching elements.
    Count { selector: String },
    /// Full SEO audit of the page.
    PageAudit,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum InteractAction {
    Click { selector: String },
    TypeText { selector: String, text: String },
    Evaluate { script: String },
}

/// A request to run an ordered sequence of steps against one session.
#[derive(Debug, Clone)]
pub struct Job {
    pub id: JobId,
    pub steps: Vec<Step>,
    pub step_timeout: Duration,
    pub deadline: Duration,
    pub retry_limit: u32,
}

impl Job {
    pub fn new(steps: Vec<Step>, settings: &JobSettings) -> Self {
        Self {
            id: Uuid::new_v4(),
            steps,
            step_timeout: settings.step_timeout,
            deadline: settings.deadline,
            retry_limit: settings.retry_limit,
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.steps.is_empty() {
            return Err(ScrapeError::InvalidJob("job has no steps".to_string()));
        }
        for step in &self.steps {
            if let Step::Wait { selector, duration } = step {
                if selector.is_some() == duration.is_some() {
                    return Err(ScrapeError::InvalidJob(
                        "wait step needs exactly one of selector or duration".to_string(),
                    ));
                }
            }
        }
        if self.step_timeout.is_zero() || self.deadline.is_zero() {
            return Err(ScrapeError::InvalidJob(
                "step_timeout and deadline must be non-zero".to_string(),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Success,
    /// Some steps succeeded before a terminating error; their data is kept.
    PartialFailure,
    TimedOut,
    SessionLost,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Extraction {
    pub name: String,
    pub value: serde_json::Value,
}

/// Immutable outcome of one job. Ownership transfers to the caller.
#[derive(Debug, Clone, Serialize)]
pub struct JobReport {
    pub job_id: JobId,
    pub status: JobStatus,
    pub extracted: Vec<Extraction>,
    pub error: Option<String>,
    pub attempts: u32,
    #[serde(with = "humantime_serde")]
    pub duration: Duration,
    pub finished_at: DateTime<Utc>,
}

impl JobReport {
    pub fn is_success(&self) -> bool {
        self.status == JobStatus::Success
    }
}
