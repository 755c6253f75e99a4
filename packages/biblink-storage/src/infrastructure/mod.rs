//! Infrastructure layer - Storage adapters
//!
//! - `memory_store` / `memory_repository`: map-backed, for tests and dry runs
//! - `sqlite_store` / `sqlite_repository`: file-based persistence

pub mod memory_repository;
pub mod memory_store;

#[cfg(feature = "sqlite")]
pub mod sqlite_repository;
#[cfg(feature = "sqlite")]
pub mod sqlite_store;

pub use memory_repository::InMemoryRepository;
pub use memory_store::InMemoryStore;

#[cfg(feature = "sqlite")]
pub use sqlite_repository::SqliteRepository;
#[cfg(feature = "sqlite")]
pub use sqlite_store::SqliteStore;
