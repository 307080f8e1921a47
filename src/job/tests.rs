use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use tokio::time::Instant;

use crate::browser::testing::{MockBackend, MockScript};
use crate::browser::DriverPool;
use crate::config::{JobSettings, PoolSettings};
use crate::error::ScrapeError;
use crate::job::{ExtractTarget, Job, JobRunner, JobStatus, Step};

fn pool_settings(capacity: usize) -> PoolSettings {
    PoolSettings {
        capacity,
        acquire_timeout: Duration::from_millis(500),
        max_session_idle_age: Duration::from_secs(300),
        max_session_uses: 50,
        sweep_interval: Duration::from_secs(30),
        termination_grace: Duration::from_millis(50),
    }
}

fn job_settings() -> JobSettings {
    JobSettings {
        step_timeout: Duration::from_millis(200),
        deadline: Duration::from_secs(5),
        retry_limit: 2,
        backoff_base: Duration::from_millis(10),
    }
}

fn runner_for(backend: Arc<MockBackend>, capacity: usize) -> (JobRunner, Arc<DriverPool>) {
    let pool = DriverPool::new(backend, pool_settings(capacity));
    let runner = JobRunner::new(pool.clone(), &pool_settings(capacity), &job_settings());
    (runner, pool)
}

fn navigate() -> Step {
    Step::Navigate {
        url: "https://site.example/".to_string(),
    }
}

fn extract_text(name: &str, selector: &str) -> Step {
    Step::Extract {
        name: name.to_string(),
        target: ExtractTarget::Text {
            selector: selector.to_string(),
        },
    }
}

#[tokio::test]
async fn test_job_runs_steps_in_order_and_extracts() {
    let backend = MockBackend::new();
    let (runner, _pool) = runner_for(backend.clone(), 2);

    let steps = vec![
        navigate(),
        Step::Wait {
            selector: Some("body".to_string()),
            duration: None,
        },
        extract_text("heading", "h1"),
        Step::Extract {
            name: "links".to_string(),
            target: ExtractTarget::Count {
                selector: "a".to_string(),
            },
        },
    ];
    let report = runner.run(Job::new(steps, &job_settings())).await.unwrap();

    assert_eq!(report.status, JobStatus::Success);
    assert_eq!(report.attempts, 1);
    assert_eq!(report.extracted.len(), 2);
    assert_eq!(report.extracted[0].name, "heading");
    assert_eq!(report.extracted[0].value, json!("Hello"));
    assert_eq!(report.extracted[1].value, json!(2));
    assert_eq!(backend.launched(), 1);
}

#[tokio::test]
async fn test_step_timeout_preserves_partial_results() {
    let backend = MockBackend::new();
    // call 0 = navigate, call 1 = first extract, call 2 hangs
    backend.push_script(MockScript::hang_on_call(2));
    let (runner, _pool) = runner_for(backend.clone(), 1);

    let steps = vec![
        navigate(),
        extract_text("title", "title"),
        extract_text("heading", "h1"),
    ];
    let report = runner.run(Job::new(steps, &job_settings())).await.unwrap();

    assert_eq!(report.status, JobStatus::PartialFailure);
    assert_eq!(report.attempts, 1);
    assert_eq!(report.extracted.len(), 1);
    assert_eq!(report.extracted[0].value, json!("Mock Page"));
    assert!(report.error.is_some());
}

#[tokio::test]
async fn test_navigation_timeout_retries_on_a_fresh_session() {
    let backend = MockBackend::new();
    backend.push_script(MockScript::hang_on_call(0));
    let (runner, _pool) = runner_for(backend.clone(), 2);

    let steps = vec![navigate(), extract_text("heading", "h1")];
    let report = runner.run(Job::new(steps, &job_settings())).await.unwrap();

    assert_eq!(report.status, JobStatus::Success);
    assert_eq!(report.attempts, 2);
    assert_eq!(report.extracted.len(), 1);

    // both attempts navigated, each on a different session
    let log = backend.serve_log();
    assert_eq!(log.len(), 2);
    assert_ne!(log[0], log[1]);
}

#[tokio::test]
async fn test_crashes_exhaust_retries_into_session_lost() {
    let backend = MockBackend::new();
    for _ in 0..3 {
        backend.push_script(MockScript::crash_on_first_call());
    }
    let (runner, _pool) = runner_for(backend.clone(), 2);

    let steps = vec![navigate(), extract_text("heading", "h1")];
    let report = runner.run(Job::new(steps, &job_settings())).await.unwrap();

    assert_eq!(report.status, JobStatus::SessionLost);
    assert_eq!(report.attempts, 3);
    assert!(report.extracted.is_empty());
    assert!(report.error.is_some());
    assert_eq!(backend.launched(), 3);
}

#[tokio::test]
async fn test_deadline_bounds_the_whole_job() {
    let backend = MockBackend::new();
    let (runner, _pool) = runner_for(backend, 1);

    let mut job = Job::new(
        vec![
            navigate(),
            Step::Wait {
                selector: None,
                duration: Some(Duration::from_secs(10)),
            },
            extract_text("heading", "h1"),
        ],
        &job_settings(),
    );
    job.step_timeout = Duration::from_secs(5);
    job.deadline = Duration::from_millis(100);

    let started = Instant::now();
    let report = runner.run(job).await.unwrap();

    assert_eq!(report.status, JobStatus::TimedOut);
    assert!(report.extracted.is_empty());
    assert!(started.elapsed() < Duration::from_secs(2));
}

#[tokio::test]
async fn test_pool_exhaustion_surfaces_as_an_error() {
    let backend = MockBackend::new();
    let pool = DriverPool::new(backend, pool_settings(1));
    let mut settings = pool_settings(1);
    settings.acquire_timeout = Duration::from_millis(50);
    let runner = JobRunner::new(pool.clone(), &settings, &job_settings());

    let held = pool.acquire(Duration::from_millis(100)).await.unwrap();

    let err = runner
        .run(Job::new(vec![navigate()], &job_settings()))
        .await
        .unwrap_err();
    assert!(matches!(err, ScrapeError::PoolExhausted { .. }));

    pool.release(held, crate::browser::ReleaseOutcome::Healthy)
        .await;
}

#[tokio::test]
async fn test_invalid_jobs_are_rejected() {
    let backend = MockBackend::new();
    let (runner, _pool) = runner_for(backend, 1);

    let err = runner
        .run(Job::new(Vec::new(), &job_settings()))
        .await
        .unwrap_err();
    assert!(matches!(err, ScrapeError::InvalidJob(_)));

    let err = runner
        .run(Job::new(
            vec![Step::Wait {
                selector: Some("body".to_string()),
                duration: Some(Duration::from_secs(1)),
            }],
            &job_settings(),
        ))
        .await
        .unwrap_err();
    assert!(matches!(err, ScrapeError::InvalidJob(_)));
}

#[tokio::test]
async fn test_page_audit_step_uses_navigated_url() {
    let backend = MockBackend::new();
    backend.push_script(MockScript {
        html: Some(
            "<html><head><title>Acme</title></head>\
             <body><h1>Widgets</h1><a href=\"/shop\">shop</a></body></html>"
                .to_string(),
        ),
        ..Default::default()
    });
    let (runner, _pool) = runner_for(backend, 1);

    let steps = vec![
        navigate(),
        Step::Extract {
            name: "audit".to_string(),
            target: ExtractTarget::PageAudit,
        },
    ];
    let report = runner.run(Job::new(steps, &job_settings())).await.unwrap();

    assert_eq!(report.status, JobStatus::Success);
    let audit = &report.extracted[0].value;
    assert_eq!(audit["url"], json!("https://site.example/"));
    assert_eq!(audit["title"], json!("Acme"));
    assert_eq!(audit["headings"]["h1"], json!(["Widgets"]));
    assert_eq!(audit["internal_links"], json!(1));
}
