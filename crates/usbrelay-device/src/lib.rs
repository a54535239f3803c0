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

//! Loop device handling for the USB gadget image.
//! Layout: layer.rs (device layer trait and util-linux implementation), session.rs (scoped
//! mount session), error.rs (device error taxonomy).

pub mod error;
pub mod layer;
pub mod session;

pub use error::{DeviceError, DeviceResult};
pub use layer::{LoopAttachment, LoopDeviceLayer, SystemDeviceLayer};
pub use session::DeviceMountSession;
