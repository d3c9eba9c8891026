//! rollcall-store: persistence for the roster table and student assets.

pub mod blob;
pub mod roster;

pub use blob::{BlobError, BlobStore, LocalBlobConfig, LocalBlobStore, MemoryBlobStore};
pub use roster::{RosterError, RosterStore, RosterTable, StudentRecord, ROSTER_HEADER};
