//! Storage collaborators: the active-set source and the fundamentals store,
//! with in-memory and SQLite backends.

pub mod backend;
pub mod memory;
pub mod sqlite;

pub use backend::{ActiveSetSource, FundamentalsStore, SourceSnapshot, UpsertOutcome};
pub use memory::{MemoryStore, StoredFundamentals};
pub use sqlite::SqliteStore;
