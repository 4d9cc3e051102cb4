//! hm-score
//!
//! Compliance score for one set of check results.
//!
//! Deterministic, pure logic. No IO, no time, no configuration.

use hm_schemas::{CheckName, CheckSet};

pub const MAX_SCORE: u8 = 100;

/// Points deducted when a check is missing or not `ok`.
pub fn penalty(name: CheckName) -> u8 {
    match name {
        CheckName::DiskEncryption => 30,
        CheckName::OsUpdate => 25,
        CheckName::Antivirus => 20,
        CheckName::Sleep => 5,
    }
}

/// Score in `[0, 100]`. Unknown check names carry no weight.
///
/// A set with no passing weighted check scores 0 outright; otherwise each
/// missing or failing check deducts its penalty.
pub fn score(checks: &CheckSet) -> u8 {
    let failing = failing(checks);
    if failing.len() == CheckName::ALL.len() {
        return 0;
    }
    failing
        .into_iter()
        .fold(MAX_SCORE, |acc, name| acc.saturating_sub(penalty(name)))
}

/// Names of the weighted checks that cost points, in penalty order.
pub fn failing(checks: &CheckSet) -> Vec<CheckName> {
    CheckName::ALL
        .into_iter()
        .filter(|name| !checks.passed(*name))
        .collect()
}
