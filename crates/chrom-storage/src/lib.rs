//! In-memory experiment store.
//!
//! [`MemoryStore`] is both the [`ExperimentRepository`] the orchestrator
//! fetches run configuration from and the [`RecordSink`] every reading and
//! log line is appended to. Rows are tagged with the experiment id (or `None`
//! for readings taken between runs), mirroring the Sensors / UVs / NIRs / Logs
//! tables of the lab database.

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrom_core::{
    ExperimentId, ExperimentRecord, ExperimentRepository, ReadingKind, RecordSink, RunTimeUpdate,
};
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};

/// One persisted reading.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredReading {
    pub kind: ReadingKind,
    pub experiment_id: Option<ExperimentId>,
    pub timestamp: DateTime<Utc>,
    pub payload: serde_json::Value,
}

/// One persisted log line.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredLog {
    pub experiment_id: Option<ExperimentId>,
    pub timestamp: DateTime<Utc>,
    pub text: String,
}

#[derive(Debug, Default)]
struct StoreState {
    records: BTreeMap<ExperimentId, ExperimentRecord>,
    readings: Vec<StoredReading>,
    logs: Vec<StoredLog>,
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    state: RwLock<StoreState>,
    /// When set, every append fails (simulates a lost database link).
    reject_appends: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store or replace an experiment record.
    pub fn insert_record(&self, record: ExperimentRecord) {
        self.state.write().records.insert(record.id, record);
    }

    pub fn record(&self, id: ExperimentId) -> Option<ExperimentRecord> {
        self.state.read().records.get(&id).cloned()
    }

    pub fn set_reject_appends(&self, reject: bool) {
        self.reject_appends.store(reject, Ordering::SeqCst);
    }

    pub fn readings(&self, kind: ReadingKind, experiment_id: Option<ExperimentId>) -> Vec<StoredReading> {
        self.state
            .read()
            .readings
            .iter()
            .filter(|r| r.kind == kind && r.experiment_id == experiment_id)
            .cloned()
            .collect()
    }

    /// Log text for one experiment, oldest first.
    pub fn logs(&self, experiment_id: Option<ExperimentId>) -> Vec<String> {
        self.state
            .read()
            .logs
            .iter()
            .filter(|l| l.experiment_id == experiment_id)
            .map(|l| l.text.clone())
            .collect()
    }

    fn check_appends(&self) -> Result<()> {
        if self.reject_appends.load(Ordering::SeqCst) {
            Err(anyhow!("store is rejecting appends"))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl RecordSink for MemoryStore {
    async fn append_reading(
        &self,
        kind: ReadingKind,
        experiment_id: Option<ExperimentId>,
        timestamp: DateTime<Utc>,
        payload: serde_json::Value,
    ) -> Result<()> {
        self.check_appends()?;
        self.state.write().readings.push(StoredReading {
            kind,
            experiment_id,
            timestamp,
            payload,
        });
        Ok(())
    }

    async fn append_log(
        &self,
        experiment_id: Option<ExperimentId>,
        timestamp: DateTime<Utc>,
        text: &str,
    ) -> Result<()> {
        self.check_appends()?;
        self.state.write().logs.push(StoredLog {
            experiment_id,
            timestamp,
            text: text.to_string(),
        });
        Ok(())
    }
}

#[async_trait]
impl ExperimentRepository for MemoryStore {
    async fn fetch_record(&self, id: ExperimentId) -> Result<Option<ExperimentRecord>> {
        Ok(self.record(id))
    }

    async fn clear_records(&self, id: ExperimentId) -> Result<()> {
        let mut state = self.state.write();
        let before = state.readings.len() + state.logs.len();
        state.readings.retain(|r| r.experiment_id != Some(id));
        state.logs.retain(|l| l.experiment_id != Some(id));
        let removed = before - state.readings.len() - state.logs.len();
        tracing::debug!(experiment_id = id, removed, "Cleared experiment rows");
        Ok(())
    }

    async fn set_run_times(&self, id: ExperimentId, update: RunTimeUpdate) -> Result<()> {
        let mut state = self.state.write();
        let record = state
            .records
            .get_mut(&id)
            .ok_or_else(|| anyhow!("experiment {id} not found"))?;
        match update {
            RunTimeUpdate::Started(at) => record.start_time = Some(at),
            RunTimeUpdate::Finished(at) => record.end_time = Some(at),
            RunTimeUpdate::Cleared => {
                record.start_time = None;
                record.end_time = None;
            }
        }
        Ok(())
    }
}
