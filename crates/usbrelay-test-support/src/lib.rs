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

//! Shared test helpers used across unit and integration suites.
//! Layout: fixtures.rs (timestamped file trees), mocks.rs (fake device layer, recording sink).

pub mod fixtures;
pub mod mocks;
