use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::{
    extract::State,
    response::Json,
    routing::{get, post},
    Router,
};
use serde::{Deserialize, Serialize};
use sysinfo::{CpuExt, System, SystemExt};
use tokio::sync::RwLock;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::browser::{DriverPool, PoolStats};
use crate::config::{JobSettings, ServerSettings};
use crate::error::{Result, ScrapeError};
use crate::job::{ExtractTarget, Job, JobReport, JobRunner, Step};
use crate::parser::{is_valid_url, normalize_url};

#[derive(Serialize)]
pub struct ApiResponse<T> {
    success: bool,
    data: Option<T>,
    error: Option<String>,
}

impl<T> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }

    pub fn error(message: String) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(message),
        }
    }
}

#[derive(Clone)]
pub struct AppState {
    pub runner: Arc<JobRunner>,
    pub pool: Arc<DriverPool>,
    pub job_settings: JobSettings,
    pub system: Arc<RwLock<System>>,
    pub started_at: Instant,
}

impl AppState {
    pub fn new(runner: Arc<JobRunner>, pool: Arc<DriverPool>, job_settings: JobSettings) -> Self {
        let mut system = System::new_all();
        system.refresh_all();
        Self {
            runner,
            pool,
            job_settings,
            system: Arc::new(RwLock::new(system)),
            started_at: Instant::now(),
        }
    }
}

pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/jobs", post(run_job))
        .route("/audit", post(run_audit))
        .route("/status", get(get_status))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

pub async fn start_api_server(state: AppState, server: &ServerSettings) -> Result<()> {
    let app = create_router(state);

    let addr = format!("0.0.0.0:{}", server.api_port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .map_err(|e| ScrapeError::Config(format!("Failed to bind {}: {}", addr, e)))?;
    info!("API server listening on {}", addr);

    axum::serve(listener, app)
        .await
        .map_err(|e| ScrapeError::Config(format!("API server error: {}", e)))?;

    Ok(())
}

#[derive(Debug, Deserialize)]
pub struct JobRequest {
    pub steps: Vec<Step>,
    #[serde(default, with = "humantime_serde")]
    pub step_timeout: Option<Duration>,
    #[serde(default, with = "humantime_serde")]
    pub deadline: Option<Duration>,
    #[serde(default)]
    pub retry_limit: Option<u32>,
}

impl JobRequest {
    fn into_job(self, defaults: &JobSettings) -> Job {
        let mut job = Job::new(self.steps, defaults);
        if let Some(step_timeout) = self.step_timeout {
            job.step_timeout = step_timeout;
        }
        if let Some(deadline) = self.deadline {
            job.deadline = deadline;
        }
        if let Some(retry_limit) = self.retry_limit {
            job.retry_limit = retry_limit;
        }
        job
    }
}

async fn run_job(
    State(state): State<AppState>,
    Json(payload): Json<JobRequest>,
) -> Json<ApiResponse<JobReport>> {
    let job = payload.into_job(&state.job_settings);
    let job_id = job.id;
    match state.runner.run(job).await {
        Ok(report) => Json(ApiResponse::success(report)),
        Err(e) => Json(ApiResponse::error(format!("Job {} failed: {}", job_id, e))),
    }
}

#[derive(Debug, Deserialize)]
pub struct AuditRequest {
    pub website_url: String,
}

/// The website-analysis endpoint: runs a canned navigate, settle, audit job
/// and returns the audit payload.
async fn run_audit(
    State(state): State<AppState>,
    Json(payload): Json<AuditRequest>,
) -> Json<ApiResponse<serde_json::Value>> {
    let website_url = normalize_url(&payload.website_url);
    if payload.website_url.trim().is_empty() {
        return Json(ApiResponse::error("website_url is required".to_string()));
    }
    if !is_valid_url(&website_url) {
        return Json(ApiResponse::error(
            "Invalid website_url. Must include http(s) scheme and domain.".to_string(),
        ));
    }

    let steps = vec![
        Step::Navigate {
            url: website_url.clone(),
        },
        Step::Wait {
            selector: Some("body".to_string()),
            duration: None,
        },
        Step::Extract {
            name: "audit".to_string(),
            target: ExtractTarget::PageAudit,
        },
    ];
    let job = Job::new(steps, &state.job_settings);

    match state.runner.run(job).await {
        Ok(report) if report.is_success() => {
            let audit = report
                .extracted
                .into_iter()
                .find(|e| e.name == "audit")
                .map(|e| e.value)
                .unwrap_or(serde_json::Value::Null);
            Json(ApiResponse::success(audit))
        }
        Ok(report) => Json(ApiResponse::error(format!(
            "Audit of {} ended with status {:?}: {}",
            website_url,
            report.status,
            report.error.unwrap_or_default()
        ))),
        Err(e) => Json(ApiResponse::error(format!(
            "Failed to audit {}: {}",
            website_url, e
        ))),
    }
}

#[derive(Debug, Serialize)]
pub struct SystemMetrics {
    pub cpu_usage: f32,
    pub memory_usage: u64,
    pub memory_total: u64,
}

#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub pool: PoolStats,
    pub system: SystemMetrics,
    #[serde(with = "humantime_serde")]
    pub uptime: Duration,
}

async fn get_status(State(state): State<AppState>) -> Json<ApiResponse<StatusResponse>> {
    let system = {
        let mut sys = state.system.write().await;
        sys.refresh_cpu();
        sys.refresh_memory();
        let cpu_count = sys.cpus().len().max(1);
        SystemMetrics {
            cpu_usage: sys.cpus().iter().map(|cpu| cpu.cpu_usage()).sum::<f32>()
                / cpu_count as f32,
            memory_usage: sys.used_memory(),
            memory_total: sys.total_memory(),
        }
    };

    Json(ApiResponse::success(StatusResponse {
        pool: state.pool.stats(),
        system,
        uptime: state.started_at.elapsed(),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[test]
    fn test_job_request_deserialization() {
        let raw = r##"{
            "steps": [
                {"type": "navigate", "url": "https://example.com"},
                {"type": "wait", "selector": "h1"},
                {"type": "extract", "name": "title", "target": {"type": "text", "selector": "title"}},
                {"type": "interact", "action": {"type": "click", "selector": "#more"}}
            ],
            "step_timeout": "5s",
            "retry_limit": 1
        }"##;

        let request: JobRequest = serde_json::from_str(raw).unwrap();
        assert_eq!(request.steps.len(), 4);
        assert_eq!(request.step_timeout, Some(Duration::from_secs(5)));
        assert_eq!(request.deadline, None);
        assert_eq!(request.retry_limit, Some(1));

        let defaults = JobSettings {
            step_timeout: Duration::from_secs(15),
            deadline: Duration::from_secs(60),
            retry_limit: 2,
            backoff_base: Duration::from_millis(100),
        };
        let job = request.into_job(&defaults);
        assert_ne!(job.id, Uuid::nil());
        assert_eq!(job.step_timeout, Duration::from_secs(5));
        assert_eq!(job.deadline, Duration::from_secs(60));
        assert_eq!(job.retry_limit, 1);
        assert!(job.validate().is_ok());
    }

    #[test]
    fn test_audit_url_validation() {
        assert!(is_valid_url(&normalize_url("example.com")));
        assert!(!is_valid_url(&normalize_url("")));
    }
}
