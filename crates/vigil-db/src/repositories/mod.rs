//! Repository implementations for PostgreSQL.

mod payload;
mod registry;

pub use payload::PgPayloadStore;
pub use registry::PgCacheRegistry;
