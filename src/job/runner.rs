use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::browser::{DriverPool, DriverSession, ReleaseOutcome, SessionLease};
use crate::config::{JobSettings, PoolSettings};
use crate::error::{Result, ScrapeError};
use crate::job::{Extraction, InteractAction, Job, JobReport, JobStatus, Step};
use crate::parser;

/// Executes jobs against pooled sessions: per-step timeouts under the job
/// deadline, partial-result preservation, outcome-classified release, and a
/// bounded retry loop for transient failures.
pub struct JobRunner {
    pool: Arc<DriverPool>,
    acquire_timeout: Duration,
    backoff_base: Duration,
}

/// Step execution inside one attempt either yields everything extracted so
/// far, or that plus the error that stopped it.
type AttemptResult = std::result::Result<Vec<Extraction>, (Vec<Extraction>, ScrapeError)>;

impl JobRunner {
    pub fn new(pool: Arc<DriverPool>, pool_settings: &PoolSettings, job_settings: &JobSettings) -> Self {
        Self {
            pool,
            acquire_timeout: pool_settings.acquire_timeout,
            backoff_base: job_settings.backoff_base,
        }
    }

    /// Runs the job to completion or to a typed failure. `PoolExhausted` and
    /// deterministic browser errors without any extracted data propagate as
    /// errors; every other ending is folded into the report status.
    pub async fn run(&self, job: Job) -> Result<JobReport> {
        job.validate()?;

        let started = Instant::now();
        let deadline = started + job.deadline;
        let max_attempts = job.retry_limit + 1;
        let mut prior_session = None;

        for attempt in 1..=max_attempts {
            let remaining = match deadline.checked_duration_since(Instant::now()) {
                Some(r) if !r.is_zero() => r,
                _ => {
                    return Ok(self.report(&job, JobStatus::TimedOut, Vec::new(),
                        Some("job deadline elapsed".to_string()), attempt, started));
                }
            };

            let lease = self.pool.acquire(self.acquire_timeout.min(remaining)).await?;
            let session_id = lease.id();
            if let Some(prior) = prior_session {
                // a crashed session is retired before its slot is refilled,
                // so a retry can never land on the suspect process
                debug_assert_ne!(prior, session_id);
            }
            prior_session = Some(session_id);
            debug!("Job {} attempt {} on session {}", job.id, attempt, session_id);

            match self.execute_steps(&job, &lease, deadline).await {
                Ok(extracted) => {
                    self.pool.release(lease, ReleaseOutcome::Healthy).await;
                    info!("Job {} succeeded in {} attempt(s)", job.id, attempt);
                    return Ok(self.report(&job, JobStatus::Success, extracted, None, attempt, started));
                }
                Err((extracted, err)) => {
                    // timeouts and crashes leave the session in an unknown
                    // state; killing the process is the hard abort backstop
                    self.pool.release(lease, ReleaseOutcome::Unhealthy).await;

                    let out_of_time = Instant::now() >= deadline;
                    if err.is_transient() && attempt < max_attempts && !out_of_time {
                        warn!("Job {} attempt {} failed ({}), retrying on a fresh session", job.id, attempt, err);
                        self.backoff(attempt, deadline).await;
                        continue;
                    }

                    return self.finish_failed(&job, extracted, err, attempt, started);
                }
            }
        }

        // retry_limit is validated non-negative, so the loop always returns
        Err(ScrapeError::InvalidJob("job finished without attempts".to_string()))
    }

    fn finish_failed(
        &self,
        job: &Job,
        extracted: Vec<Extraction>,
        err: ScrapeError,
        attempts: u32,
        started: Instant,
    ) -> Result<JobReport> {
        let message = err.to_string();
        if !extracted.is_empty() {
            return Ok(self.report(job, JobStatus::PartialFailure, extracted, Some(message), attempts, started));
        }
        match err {
            ScrapeError::StepTimeout { .. } => {
                Ok(self.report(job, JobStatus::TimedOut, extracted, Some(message), attempts, started))
            }
            ScrapeError::SessionCrash(_) => {
                Ok(self.report(job, JobStatus::SessionLost, extracted, Some(message), attempts, started))
            }
            // deterministic failure with nothing extracted: typed error to
            // the caller rather than a report
            other => Err(other),
        }
    }

    fn report(
        &self,
        job: &Job,
        status: JobStatus,
        extracted: Vec<Extraction>,
        error: Option<String>,
        attempts: u32,
        started: Instant,
    ) -> JobReport {
        JobReport {
            job_id: job.id,
            status,
            extracted,
            error,
            attempts,
            duration: started.elapsed(),
            finished_at: chrono::Utc::now(),
        }
    }

    async fn execute_steps(&self, job: &Job, lease: &SessionLease, deadline: Instant) -> AttemptResult {
        let mut extracted = Vec::new();
        let mut current_url: Option<String> = None;
        let session = lease.session();

        for step in &job.steps {
            let remaining = match deadline.checked_duration_since(Instant::now()) {
                Some(r) if !r.is_zero() => r,
                _ => {
                    return Err((
                        extracted,
                        ScrapeError::StepTimeout {
                            kind: step.kind(),
                            timeout: Duration::ZERO,
                        },
                    ))
                }
            };
            let budget = remaining.min(job.step_timeout);

            let outcome = tokio::time::timeout(
                budget,
                Self::execute_step(session, step, &mut current_url, &mut extracted),
            )
            .await;

            match outcome {
                Ok(Ok(())) => {}
                Ok(Err(e)) => return Err((extracted, e)),
                Err(_) => {
                    return Err((
                        extracted,
                        ScrapeError::StepTimeout {
                            kind: step.kind(),
                            timeout: budget,
                        },
                    ))
                }
            }
        }

        Ok(extracted)
    }

    async fn execute_step(
        session: &dyn DriverSession,
        step: &Step,
        current_url: &mut Option<String>,
        extracted: &mut Vec<Extraction>,
    ) -> Result<()> {
        match step {
            Step::Navigate { url } => {
                session.goto(url).await?;
                *current_url = Some(url.clone());
            }
            Step::Wait { selector, duration } => {
                if let Some(selector) = selector {
                    session.wait_for_selector(selector).await?;
                } else if let Some(duration) = duration {
                    tokio::time::sleep(*duration).await;
                }
            }
            Step::Extract { name, target } => {
                let html = session.content().await?;
                let value = parser::extract(&html, target, current_url.as_deref())?;
                extracted.push(Extraction {
                    name: name.clone(),
                    value,
                });
            }
            Step::Interact { action } => match action {
                InteractAction::Click { selector } => session.click(selector).await?,
                InteractAction::TypeText { selector, text } => {
                    session.type_text(selector, text).await?
                }
                InteractAction::Evaluate { script } => {
                    session.evaluate(script).await?;
                }
            },
        }
        Ok(())
    }

    /// Exponential backoff with jitter between retry attempts, never
    /// sleeping past the job deadline.
    async fn backoff(&self, attempt: u32, deadline: Instant) {
        let base = self.backoff_base.as_millis() as u64;
        let exp = base.saturating_mul(2_u64.saturating_pow(attempt.min(5) - 1));
        let jitter = {
            let mut rng = rand::thread_rng();
            rng.gen_range(0..=base / 2)
        };
        let mut delay = Duration::from_millis(exp + jitter);
        if let Some(remaining) = deadline.checked_duration_since(Instant::now()) {
            delay = delay.min(remaining);
        } else {
            return;
        }
        debug!("Backing off {:?} before retry", delay);
        tokio::time::sleep(delay).await;
    }
}
