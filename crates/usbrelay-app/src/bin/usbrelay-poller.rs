#![forbid(unsafe_code)]
#![deny(
    unused_must_use,
    clippy::all,
    clippy::pedantic,
    clippy::nursery,
    rustdoc::broken_intra_doc_links,
    rustdoc::bare_urls,
    missing_docs
)]

//! Poller daemon: watches the USB image and copies new files into the staging area.

use usbrelay_app::{AppResult, run_poller};

/// Runs the poller until a fatal error.
#[tokio::main(flavor = "current_thread")]
async fn main() -> AppResult<()> {
    run_poller().await
}
