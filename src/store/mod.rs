//! Record store: the external capability the change pipeline watches

pub mod memory;
pub mod models;
pub mod traits;

pub use memory::{MemoryStore, MemoryStoreOptions, StoreError};
pub use models::{Document, RawLogEntry, RecordId};
pub use traits::{MutationLog, RecordStore};

#[cfg(test)]
pub(crate) mod mock;
