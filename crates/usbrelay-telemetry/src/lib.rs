#![forbid(unsafe_code)]
#![deny(
    unused_must_use,
    clippy::all,
    clippy::pedantic,
    clippy::nursery,
    rustdoc::broken_intra_doc_links,
    rustdoc::bare_urls
)]
#![warn(missing_docs, unreachable_pub, unused)]

//! Telemetry primitives shared by the usbrelay daemons.
//!
//! This crate centralises logging and metrics so the poller and the forwarder report
//! through the same structured fields, log files and Prometheus collectors.

pub mod context;
pub mod error;
pub mod init;
pub mod metrics;

pub use context::GlobalContextGuard;
pub use error::{Result, TelemetryError};
pub use init::{
    DEFAULT_LOG_LEVEL, DEFAULT_MAX_LOG_FILES, FileLogConfig, LogFormat, LoggingConfig,
    LoggingGuard, build_sha, init_logging,
};
pub use metrics::{Metrics, MetricsSnapshot};
