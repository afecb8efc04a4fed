//! HTTP request handlers.

pub mod blobs;
pub mod common;
pub mod keys;
pub mod realtime;
pub mod sync;
pub mod vaults;

pub use blobs::*;
pub use keys::*;
pub use realtime::*;
pub use sync::*;
pub use vaults::*;
