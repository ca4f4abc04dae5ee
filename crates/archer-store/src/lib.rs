//! Database Adapter: the persistence and lineage layer (spec §4.3). Two
//! implementations share the same aggregation rules — `SqliteStore` for
//! real persistence, `InMemoryStore` for tests.

mod adapter;
mod aggregate;
mod memory;
mod sqlite;

pub use adapter::{AnnotationItem, DatabaseAdapter, GenerationMetrics, PromptHistoryEntry};
pub use memory::InMemoryStore;
pub use sqlite::SqliteStore;
