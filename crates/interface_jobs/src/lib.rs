//! Jobs Layer
//!
//! Batch entry points for the ride billing engine, run by an external
//! scheduler (cron, Kubernetes CronJob) through the `billing-jobs` binary.
//!
//! # Modules
//!
//! - **config**: `BILLING_*` environment configuration
//! - **telemetry**: tracing subscriber setup
//! - **runner**: scheduled invoice sweeps and outbox draining

pub mod config;
pub mod telemetry;
pub mod runner;

pub use config::{JobsConfig, LogFormat, ENV_PREFIX};
pub use runner::{FailedAccount, JobError, JobRunner, SweepSummary};
pub use telemetry::init_tracing;
