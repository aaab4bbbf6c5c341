//! The two reconciled stores: the ephemeral sorted-set cache seam and
//! the durable SQLite-backed telemetry store.

pub mod cache;
pub mod durable;

pub use cache::{CacheSnapshot, FeederCache, InMemoryFeederCache, ScoredEntry};
pub use durable::TelemetryDb;
