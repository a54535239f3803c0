//! Filesystem primitives for the USB relay pipeline.
//!
//! Covers point-in-time change detection, retention sweeps, structure-preserving copies,
//! the staging-area layout and the copy-marker handoff between the two daemons. Everything
//! here is synchronous except the handoff wait, which sleeps on the tokio timer.
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
#![allow(clippy::module_name_repetitions)]

pub mod copy;
pub mod error;
pub mod handoff;
pub mod model;
pub mod retention;
pub mod scan;
pub mod staging;

pub use copy::{copy_with_structure, structured_target};
pub use error::{FsOpsError, FsOpsResult};
pub use handoff::{CopyLock, CopyLockGuard, DEFAULT_POLL_INTERVAL, HandoffGate, HandoffOutcome};
pub use model::{FileEntry, Watermark};
pub use retention::{RetentionSweeper, SweepReport};
pub use scan::ChangeScanner;
pub use staging::{MARKER_FILE_NAME, StagingArea};
