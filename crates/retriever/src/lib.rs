//! Read-only retrieval over the service provider profile database.
//!
//! [`index::ProfileIndex`] is the seam to the external store (SQLite in
//! production, in-memory in tests); [`retriever::Retriever`] implements the
//! three query modes (semantic, tag and hybrid) and all scoring rules on
//! top of it.

pub mod index;
pub mod memory;
pub mod retriever;
pub mod sqlite;

pub use index::{Embedder, ProfileIndex, SemanticHit};
pub use memory::MemoryProfileIndex;
pub use retriever::Retriever;
pub use sqlite::SqliteProfileIndex;
