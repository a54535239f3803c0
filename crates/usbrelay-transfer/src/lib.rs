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

//! Remote sinks and the batch dispatcher used by the forwarder.
//! Layout: sink.rs (sink trait, destination paths), dropbox.rs and scp.rs (sink
//! implementations), dispatcher.rs (per-batch fan-out and cleanup).

pub mod dispatcher;
pub mod dropbox;
pub mod error;
pub mod scp;
pub mod sink;

pub use dispatcher::{BatchDisposition, DispatchReport, SinkTally, TransferDispatcher};
pub use dropbox::DropboxSink;
pub use error::{TransferError, TransferResult};
pub use scp::ScpSink;
pub use sink::{ConfiguredSink, Sink, compose_remote_path, relative_remote_path};
