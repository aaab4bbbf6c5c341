//! Store reconciliation engine.
//!
//! Keeps the durable telemetry store and the sorted-set cache consistent
//! for a bounded time window per domain: read both, canonicalize, diff,
//! fill the gaps in each direction. See `driver.rs` for the pipeline.

pub mod canonical;
pub mod diff;
pub mod domain;
pub mod driver;
pub mod repair;
mod strategy;
pub mod window;

pub use domain::{Domain, NS_SEPARATOR};
pub use driver::{DomainReport, DomainStatus, Reconciler, RunReport, StoreKind, SyncFault};
pub use window::ReconWindow;
