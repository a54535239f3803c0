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

//! The two relay daemons: the poller copies new files off the USB image into batches, the
//! forwarder uploads finished batches to the configured sinks.
//!
//! Layout: `bootstrap.rs` (boot sequences), `schedule.rs` (timer-driven cycles),
//! `pipeline.rs` (copy cycle), `poller.rs` (retention cadence + poller cycle),
//! `forwarder.rs` (forwarder cycle).

/// Daemon boot sequences.
pub mod bootstrap;
/// Application error type.
pub mod error;
/// Forwarder cycle.
pub mod forwarder;
/// Watermark-driven copy cycle.
pub mod pipeline;
/// Poller cycle and retention cadence.
pub mod poller;
/// Scheduled-task abstraction.
pub mod schedule;

pub use bootstrap::{
    FORWARDER_LOG_FILE, POLLER_LOG_FILE, build_forwarder, build_poller, build_sinks,
    run_forwarder, run_forwarder_with, run_poller, run_poller_with,
};
pub use error::{AppError, AppResult};
pub use forwarder::Forwarder;
pub use pipeline::{CopyOutcome, CopyPipeline};
pub use poller::{Poller, RetentionCadence};
pub use schedule::{CountedTicker, ScheduledTask, SleepTicker, Ticker, run_scheduled};
