//! Run progress messages, sent to both `tracing` and the record sink.

use chrom_core::{ExperimentId, RecordSink};
use chrono::Utc;
use std::sync::Arc;
use tracing::Level;

#[derive(Clone)]
pub struct RunLog {
    sink: Arc<dyn RecordSink>,
    experiment_id: Option<ExperimentId>,
}

impl std::fmt::Debug for RunLog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RunLog")
            .field("experiment_id", &self.experiment_id)
            .finish_non_exhaustive()
    }
}

impl RunLog {
    pub fn new(sink: Arc<dyn RecordSink>, experiment_id: Option<ExperimentId>) -> Self {
        Self {
            sink,
            experiment_id,
        }
    }

    pub fn experiment_id(&self) -> Option<ExperimentId> {
        self.experiment_id
    }

    pub async fn info(&self, text: &str) {
        self.write(Level::INFO, text).await;
    }

    pub async fn warn(&self, text: &str) {
        self.write(Level::WARN, text).await;
    }

    pub async fn error(&self, text: &str) {
        self.write(Level::ERROR, text).await;
    }

    async fn write(&self, level: Level, text: &str) {
        let experiment_id = self.experiment_id;
        if level == Level::ERROR {
            tracing::error!(?experiment_id, "{text}");
        } else if level == Level::WARN {
            tracing::warn!(?experiment_id, "{text}");
        } else {
            tracing::info!(?experiment_id, "{text}");
        }
        if let Err(err) = self
            .sink
            .append_log(experiment_id, Utc::now(), text)
            .await
        {
            tracing::warn!(error = %err, "Failed to persist log line");
        }
    }
}
