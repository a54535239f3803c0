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

//! File-backed configuration for the relay daemons.
//!
//! Layout: `model.rs` (typed config models), `validate.rs` (validation helpers),
//! `loader.rs` (`ConfigLocation` + JSON parsing), `defaults.rs` (shared constants).

mod defaults;
pub mod error;
pub mod loader;
pub mod model;
mod validate;

pub use error::{ConfigError, ConfigResult};
pub use loader::{CONFIG_ENV, ConfigLocation, HOME_ENV, parse_config};
pub use model::{
    DeviceSettings, DropboxSettings, LogFormatPreference, RelayConfig, RelayPaths, ScpSettings,
    SecretString,
};
