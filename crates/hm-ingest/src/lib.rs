//! hm-ingest
//!
//! The report ingestion core: validate, tamper-stamp, append to the raw log,
//! fold into the daily rollup, acknowledge.
//!
//! The coordinator owns no storage and no secrets of its own; both are
//! injected at construction and never change afterwards.

mod coordinator;
pub mod reconcile;
mod types;

pub use coordinator::IngestCoordinator;
pub use types::*;
