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

//! Forwarder daemon: uploads staged batches to the configured sinks.

use usbrelay_app::{AppResult, run_forwarder};

/// Runs the forwarder until a fatal error.
#[tokio::main(flavor = "current_thread")]
async fn main() -> AppResult<()> {
    run_forwarder().await
}
