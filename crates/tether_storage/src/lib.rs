//! Persistence of the fact graph.
//!
//! [`store::Store`] is the seam between the engines and the backends. The
//! Postgres implementation compiles specifications to SQL; the in-memory
//! implementation interprets them directly and backs the test suites.

pub mod errors;
pub mod interning;
pub mod memory;
pub mod postgres;
pub mod results;
mod retry;
pub mod schema;
pub mod store;

pub use errors::{StorageError, StorageResult};
pub use memory::MemoryStore;
pub use postgres::PostgresStore;
pub use store::Store;
