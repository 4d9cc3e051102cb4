use std::future::Future;

use chrono::NaiveDate;
use hm_audit::TamperKey;
use hm_config::BatchPolicy;
use hm_db::{StoreError, Stores};
use hm_schemas::{split_batch, RawRecord, Report, RollupUpdate};
use serde_json::Value;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::{
    AckItem, IngestAck, IngestContext, IngestError, IngestOptions, IngestStats, Rejection, Stage,
};

/// A validated report with its tamper stamp.
struct Stamped {
    report: Report,
    digest: String,
}

/// Single entry point for inbound reports.
///
/// Stages per call: `Validate -> Stamp -> LogAppend -> RollupMerge ->
/// Acknowledge`. Validation and stamping cover the whole batch before the
/// first write, so a refused call has no side effects. Elements are written
/// in submission order.
pub struct IngestCoordinator {
    stores: Stores,
    key: Option<TamperKey>,
    opts: IngestOptions,
    stats: IngestStats,
}

impl IngestCoordinator {
    /// `key = None` is allowed so a misconfigured process still answers; every
    /// ingest then fails closed at the stamp stage.
    pub fn new(stores: Stores, key: Option<TamperKey>, opts: IngestOptions) -> Self {
        Self {
            stores,
            key,
            opts,
            stats: IngestStats::default(),
        }
    }

    pub fn stores(&self) -> &Stores {
        &self.stores
    }

    pub fn options(&self) -> &IngestOptions {
        &self.opts
    }

    pub fn stats(&self) -> &IngestStats {
        &self.stats
    }

    pub async fn ingest(
        &self,
        body: Value,
        ctx: &IngestContext,
    ) -> Result<IngestAck, IngestError> {
        self.stats.batch();

        let (accepted, rejected) = self.validate(body, ctx)?;
        let stamped = self.stamp(accepted)?;

        let mut results = Vec::with_capacity(stamped.len());
        for item in stamped {
            let ack = self.write_one(item, ctx, results.len()).await?;
            self.stats.accepted();
            results.push(ack);
        }

        Ok(IngestAck {
            count: results.len(),
            results,
            rejected,
        })
    }

    // ---- validate ----

    fn validate(
        &self,
        body: Value,
        ctx: &IngestContext,
    ) -> Result<(Vec<Report>, Vec<Rejection>), IngestError> {
        let elements = split_batch(body).map_err(|e| {
            self.stats.rejected(1);
            warn!(error = %e, "report rejected");
            IngestError::InvalidPayload {
                index: None,
                reason: e.to_string(),
            }
        })?;

        if elements.len() > self.opts.max_batch {
            self.stats.rejected(elements.len() as u64);
            warn!(
                size = elements.len(),
                max = self.opts.max_batch,
                "batch rejected: too large"
            );
            return Err(IngestError::InvalidPayload {
                index: None,
                reason: format!(
                    "batch of {} exceeds maximum of {}",
                    elements.len(),
                    self.opts.max_batch
                ),
            });
        }

        let total = elements.len();
        let mut accepted = Vec::with_capacity(total);
        let mut rejected = Vec::new();
        for (index, element) in elements.into_iter().enumerate() {
            match Report::from_json(element, ctx.received_at) {
                Ok(report) => accepted.push(report),
                Err(e) => {
                    warn!(index, error = %e, policy = ?self.opts.policy, "report rejected");
                    match self.opts.policy {
                        BatchPolicy::Atomic => {
                            self.stats.rejected(total as u64);
                            let reason = if total > 1 {
                                format!("report[{index}]: {e}")
                            } else {
                                e.to_string()
                            };
                            return Err(IngestError::InvalidPayload {
                                index: Some(index),
                                reason,
                            });
                        }
                        BatchPolicy::PerItem => {
                            self.stats.rejected(1);
                            rejected.push(Rejection {
                                index,
                                error: e.to_string(),
                            });
                        }
                    }
                }
            }
        }
        Ok((accepted, rejected))
    }

    // ---- stamp ----

    fn stamp(&self, accepted: Vec<Report>) -> Result<Vec<Stamped>, IngestError> {
        let Some(key) = self.key.as_ref() else {
            error!("tamper-stamp secret is not configured; refusing to ingest");
            return Err(IngestError::Config(
                "tamper-stamp shared secret is not configured".to_string(),
            ));
        };
        accepted
            .into_iter()
            .map(|report| {
                let digest = key
                    .stamp(&report.checks_json)
                    .map_err(|e| IngestError::Config(e.to_string()))?;
                Ok(Stamped { report, digest })
            })
            .collect()
    }

    // ---- write ----

    async fn write_one(
        &self,
        item: Stamped,
        ctx: &IngestContext,
        done: usize,
    ) -> Result<AckItem, IngestError> {
        let Stamped { report, digest } = item;
        let day = report.day();
        let score = hm_score::score(&report.checks);

        let record = RawRecord {
            record_id: Uuid::new_v4(),
            seq: 0,
            machine_id: report.machine_id.clone(),
            day,
            received_at: ctx.received_at,
            report_ts: report.timestamp,
            payload: report.payload,
            source_address: ctx.source_address.clone(),
            integrity_digest: digest,
        };
        let record_id = self
            .bounded(
                Stage::LogAppend,
                &record.machine_id,
                day,
                done,
                self.stores.raw.append(&record),
            )
            .await?;

        let update = RollupUpdate {
            machine_id: report.machine_id,
            day,
            last_seen: report.timestamp,
            hostname: report.hostname,
            platform: report.platform,
            arch: report.arch,
            checks: report.checks,
            score,
        };
        let outcome = match self
            .bounded(
                Stage::RollupMerge,
                &update.machine_id,
                day,
                done,
                self.stores.rollup.merge(&update),
            )
            .await
        {
            Ok(o) => o,
            Err(e) => {
                error!(
                    machine_id = %update.machine_id,
                    %day,
                    stage = %Stage::RollupMerge,
                    %record_id,
                    "raw record appended without rollup merge"
                );
                return Err(e);
            }
        };

        if let Err(e) = self
            .bounded(
                Stage::MachineSync,
                &update.machine_id,
                day,
                done,
                self.stores.machines.sync_machine(&update),
            )
            .await
        {
            error!(
                machine_id = %update.machine_id,
                %day,
                stage = %Stage::MachineSync,
                %record_id,
                "rollup merged without machine state sync"
            );
            return Err(e);
        }

        info!(
            machine_id = %update.machine_id,
            %day,
            score,
            rollup_score = outcome.score,
            report_count = outcome.report_count,
            latest = outcome.became_latest,
            "report ingested"
        );

        Ok(AckItem {
            machine_id: update.machine_id,
            day,
            record_id,
            score,
            rollup_score: outcome.score,
            report_count: outcome.report_count,
            became_latest: outcome.became_latest,
        })
    }

    /// Run one store call under the configured timeout.
    async fn bounded<T>(
        &self,
        stage: Stage,
        machine_id: &str,
        day: NaiveDate,
        accepted: usize,
        call: impl Future<Output = Result<T, StoreError>>,
    ) -> Result<T, IngestError> {
        let reason = match tokio::time::timeout(self.opts.store_timeout, call).await {
            Ok(Ok(v)) => return Ok(v),
            Ok(Err(e)) => e.to_string(),
            Err(_) => format!(
                "timed out after {}ms",
                self.opts.store_timeout.as_millis()
            ),
        };
        self.stats.storage_failure();
        warn!(%stage, machine_id, %day, accepted, %reason, "store call failed");
        Err(IngestError::StorageUnavailable {
            stage,
            machine_id: machine_id.to_string(),
            day,
            accepted,
            reason,
        })
    }
}
