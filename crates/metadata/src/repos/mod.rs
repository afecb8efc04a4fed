//! Repository traits, one per metadata concern.

pub mod blobs;
pub mod cursors;
pub mod devices;
pub mod envelopes;
pub mod oplog;
pub mod tokens;
pub mod vaults;

pub use blobs::BlobRepo;
pub use cursors::{CursorPolicy, CursorRepo};
pub use devices::DeviceRepo;
pub use envelopes::KeyEnvelopeRepo;
pub use oplog::OpLogRepo;
pub use tokens::TokenRepo;
pub use vaults::VaultRepo;
