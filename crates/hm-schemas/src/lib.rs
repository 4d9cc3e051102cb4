//! Shared data model: the inbound wire report, the persisted records, and the
//! read-side projections.

mod check;
mod platform;
mod records;
mod report;

pub use check::{CheckName, CheckResult, CheckSet};
pub use platform::{platform_family, platform_matches};
pub use records::{DailySummary, MachineState, MergeOutcome, RawRecord, RollupUpdate};
pub use report::{split_batch, Report, ReportError, WireReport, WireTimestamp};
