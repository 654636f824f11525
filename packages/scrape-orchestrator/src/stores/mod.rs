//! Record store implementations.
//!
//! Available backends:
//! - `MemoryRecordStore` - In-memory storage for tests and development
//! - `PostgresRecordStore` - PostgreSQL storage

pub mod memory;
pub mod postgres;

pub use memory::MemoryRecordStore;
pub use postgres::PostgresRecordStore;
