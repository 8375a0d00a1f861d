//! Storage implementations.

pub mod file;

#[cfg(feature = "memory")]
pub mod memory;

#[cfg(feature = "sqlite")]
pub mod sqlite;

pub use file::FileCredentialStore;

#[cfg(feature = "memory")]
pub use memory::{MemoryCredentialStore, MemoryMessageStore};

#[cfg(feature = "sqlite")]
pub use sqlite::SqliteMessageStore;
