//! Bulk loading of grid maps from the store.
//!
//! The token space is cut into ranges, each loaded by its own [`LoadTask`]
//! on the worker pool. Tasks are independent units of work: one failing
//! range never aborts its siblings.

mod loader;
mod range;
mod task;

pub use loader::{BulkLoader, LoadReport, RangeOutcome};
pub use range::TokenRange;
pub use task::{GridLoadConsumer, LoadTask};
