//! Raw-log retention. Owned by the store: the sweeper calls the store's own
//! expiry statement on a fixed cadence, so removal is eventually consistent.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::task::JoinHandle;

use crate::RawRetention;

pub const RETENTION_DAYS: i64 = 30;

/// Records received strictly before this instant are eligible for removal.
pub fn retention_cutoff(now: DateTime<Utc>) -> DateTime<Utc> {
    now - chrono::Duration::days(RETENTION_DAYS)
}

pub fn is_expired(received_at: DateTime<Utc>, now: DateTime<Utc>) -> bool {
    received_at < retention_cutoff(now)
}

/// Purge once immediately, then every `every`. Failures are logged and the
/// next tick tries again.
pub fn spawn_retention_sweeper(raw: Arc<dyn RawRetention>, every: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            match raw.purge_expired(Utc::now()).await {
                Ok(0) => tracing::debug!("retention sweep: nothing expired"),
                Ok(n) => tracing::info!(purged = n, "retention sweep removed raw reports"),
                Err(e) => tracing::warn!(error = %e, "retention sweep failed"),
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn boundary_is_exclusive() {
        let now = Utc.with_ymd_and_hms(2025, 7, 31, 12, 0, 0).unwrap();
        let exactly_30d = now - chrono::Duration::days(30);
        assert!(!is_expired(exactly_30d, now));
        assert!(is_expired(exactly_30d - chrono::Duration::milliseconds(1), now));
        assert!(!is_expired(now - chrono::Duration::days(29), now));
    }
}
