pub mod api;
pub mod browser;
pub mod config;
pub mod error;
pub mod job;
pub mod parser;

pub use browser::{ChromiumBackend, DriverPool, LifecycleManager};
pub use config::Config;
pub use error::{Result, ScrapeError};
pub use job::{Job, JobReport, JobRunner};
pub use parser::SiteAudit;
