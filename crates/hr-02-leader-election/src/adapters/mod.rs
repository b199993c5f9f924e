//! Shared record store adapters.

pub mod file;
pub mod memory;

pub use file::FileRecordStore;
pub use memory::InMemoryRecordStore;
