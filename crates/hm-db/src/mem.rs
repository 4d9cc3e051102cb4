use std::collections::BTreeMap;

use chrono::{DateTime, NaiveDate, Utc};
use hm_schemas::{DailySummary, MachineState, MergeOutcome, RawRecord, RollupUpdate};
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::{
    retention, DailyRollup, MachineFilter, MachineStates, RawLog, RawRetention, StoreError,
};

/// In-process store. Each map sits behind its own lock; a merge holds the
/// write lock across its read-modify-write.
#[derive(Debug, Default)]
pub struct MemStore {
    raw: RwLock<Vec<RawRecord>>,
    daily: RwLock<BTreeMap<(String, NaiveDate), DailySummary>>,
    machines: RwLock<BTreeMap<String, MachineState>>,
}

impl MemStore {
    pub async fn raw_len(&self) -> usize {
        self.raw.read().await.len()
    }

    pub async fn daily_len(&self) -> usize {
        self.daily.read().await.len()
    }
}

#[async_trait::async_trait]
impl RawLog for MemStore {
    async fn append(&self, record: &RawRecord) -> Result<Uuid, StoreError> {
        let mut raw = self.raw.write().await;
        // Purges only remove, so the tail always holds the highest seq.
        let seq = raw.last().map_or(1, |r| r.seq + 1);
        raw.push(RawRecord {
            seq,
            ..record.clone()
        });
        Ok(record.record_id)
    }

    async fn records_for(
        &self,
        machine_id: &str,
        day: NaiveDate,
    ) -> Result<Vec<RawRecord>, StoreError> {
        let raw = self.raw.read().await;
        let mut out: Vec<RawRecord> = raw
            .iter()
            .filter(|r| r.machine_id == machine_id && r.day == day)
            .cloned()
            .collect();
        out.sort_by_key(|r| r.seq);
        Ok(out)
    }
}

#[async_trait::async_trait]
impl RawRetention for MemStore {
    async fn purge_expired(&self, now: DateTime<Utc>) -> Result<u64, StoreError> {
        let mut raw = self.raw.write().await;
        let before = raw.len();
        raw.retain(|r| !retention::is_expired(r.received_at, now));
        Ok((before - raw.len()) as u64)
    }
}

#[async_trait::async_trait]
impl DailyRollup for MemStore {
    async fn merge(&self, update: &RollupUpdate) -> Result<MergeOutcome, StoreError> {
        let mut daily = self.daily.write().await;
        let key = (update.machine_id.clone(), update.day);
        match daily.get_mut(&key) {
            Some(row) => {
                let latest = row.fold(update);
                Ok(MergeOutcome::from((&*row, latest)))
            }
            None => {
                let row = DailySummary::first(update);
                let outcome = MergeOutcome::from((&row, true));
                daily.insert(key, row);
                Ok(outcome)
            }
        }
    }

    async fn summary(
        &self,
        machine_id: &str,
        day: NaiveDate,
    ) -> Result<Option<DailySummary>, StoreError> {
        let daily = self.daily.read().await;
        Ok(daily.get(&(machine_id.to_string(), day)).cloned())
    }

    async fn summaries_for(&self, machine_id: &str) -> Result<Vec<DailySummary>, StoreError> {
        let daily = self.daily.read().await;
        Ok(daily
            .values()
            .rev()
            .filter(|r| r.machine_id == machine_id)
            .cloned()
            .collect())
    }

    async fn replace(&self, row: &DailySummary) -> Result<(), StoreError> {
        let mut daily = self.daily.write().await;
        daily.insert((row.machine_id.clone(), row.day), row.clone());
        Ok(())
    }
}

#[async_trait::async_trait]
impl MachineStates for MemStore {
    async fn sync_machine(&self, update: &RollupUpdate) -> Result<bool, StoreError> {
        let mut machines = self.machines.write().await;
        match machines.get_mut(&update.machine_id) {
            Some(st) => Ok(st.apply(update)),
            None => {
                machines.insert(update.machine_id.clone(), MachineState::from_update(update));
                Ok(true)
            }
        }
    }

    async fn machine(&self, machine_id: &str) -> Result<Option<MachineState>, StoreError> {
        Ok(self.machines.read().await.get(machine_id).cloned())
    }

    async fn machines(&self, filter: &MachineFilter) -> Result<Vec<MachineState>, StoreError> {
        let machines = self.machines.read().await;
        let mut out: Vec<MachineState> = machines
            .values()
            .filter(|m| filter.matches(m))
            .cloned()
            .collect();
        out.sort_by(|a, b| {
            b.last_seen
                .cmp(&a.last_seen)
                .then(a.machine_id.cmp(&b.machine_id))
        });
        Ok(out)
    }
}
