//! Load testing harness for the query service.
//!
//! This crate provides tools to:
//! - Simulate users that repeatedly call `GET /query`
//! - Ramp users up at a fixed spawn rate and run them concurrently
//! - Record per-request outcomes and latency percentiles
//! - Output results in multiple formats (console, JSON, CSV)

pub mod config;
pub mod metrics;
pub mod report;
pub mod runner;
pub mod scenario;
pub mod session;

pub use config::{TestConfig, WaitTime};
pub use metrics::{MetricsCollector, Recorder, TestResults};
pub use report::ResultsReport;
pub use runner::LoadRunner;
pub use scenario::{QueryUser, Scenario, QUERY_PATH};
pub use session::{HttpSession, RequestError, RequestEvent};
