//! Perpetual acquisition loop.
//!
//! Each tick reads the probe, the UV and the NIR spectrometer concurrently,
//! appends the results to the shared windows and persists every reading
//! that succeeded. The delay between ticks depends on whether a run is
//! active and is cut short when the intervals or the run flag change.

use crate::gateway::HardwareGateway;
use crate::settings::SamplingSettings;
use crate::state::SharedState;
use chrom_core::{ExperimentId, ReadingKind, RecordSink, SpectrometerKind, Tick};
use chrono::{DateTime, Utc};
use futures::future::join_all;
use serde_json::{Map, Value};
use std::sync::Arc;
use tokio::sync::watch;
use tokio::time::{sleep_until, Instant};

/// Samples every instrument for the orchestrator's whole lifetime.
pub struct SamplingLoop {
    gateway: Arc<HardwareGateway>,
    state: Arc<SharedState>,
    sink: Arc<dyn RecordSink>,
}

impl std::fmt::Debug for SamplingLoop {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SamplingLoop").finish_non_exhaustive()
    }
}

/// Wavelength to absorbance map, keys formatted with two decimals.
fn spectrum_payload(wavelengths: &[f64], absorbance: &[f64]) -> Value {
    let map: Map<String, Value> = wavelengths
        .iter()
        .zip(absorbance)
        .map(|(wl, a)| (format!("{wl:.2}"), Value::from(*a)))
        .collect();
    Value::Object(map)
}

fn interval_for(sampling: &SamplingSettings, running: bool) -> std::time::Duration {
    if running {
        sampling.running_interval
    } else {
        sampling.idle_interval
    }
}

impl SamplingLoop {
    pub fn new(
        gateway: Arc<HardwareGateway>,
        state: Arc<SharedState>,
        sink: Arc<dyn RecordSink>,
    ) -> Self {
        Self {
            gateway,
            state,
            sink,
        }
    }

    /// Take one reading of every instrument.
    ///
    /// Failed reads are logged and left empty.
    pub async fn sample(&self) -> Tick {
        let (sensors, uv, nir) = tokio::join!(
            self.gateway.read_snapshot(),
            self.gateway.read_spectrum(SpectrometerKind::Uv),
            self.gateway.read_spectrum(SpectrometerKind::Nir),
        );
        let sensors = sensors.unwrap_or_else(|err| {
            tracing::warn!(error = %err, "Probe read failed");
            Default::default()
        });
        let uv = uv
            .map_err(|err| tracing::warn!(error = %err, "UV read failed"))
            .ok();
        let nir = nir
            .map_err(|err| tracing::warn!(error = %err, "NIR read failed"))
            .ok();
        Tick { sensors, uv, nir }
    }

    /// Persist each reading of `tick` independently.
    async fn persist(&self, tick: &Tick, experiment_id: Option<ExperimentId>, at: DateTime<Utc>) {
        let mut records = Vec::with_capacity(3);
        if !tick.sensors.is_empty() {
            match serde_json::to_value(&tick.sensors) {
                Ok(payload) => records.push((ReadingKind::Sensor, payload)),
                Err(err) => tracing::warn!(error = %err, "Could not encode sensor snapshot"),
            }
        }
        for (kind, spectrum) in [
            (SpectrometerKind::Uv, &tick.uv),
            (SpectrometerKind::Nir, &tick.nir),
        ] {
            if let Some(absorbance) = spectrum {
                let payload = spectrum_payload(self.gateway.wavelengths(kind), absorbance);
                records.push((kind.into(), payload));
            }
        }

        let writes = records.into_iter().map(|(kind, payload)| async move {
            if let Err(err) = self
                .sink
                .append_reading(kind, experiment_id, at, payload)
                .await
            {
                tracing::warn!(?kind, error = %err, "Failed to persist reading");
            }
        });
        join_all(writes).await;
    }

    /// One full cycle: sample, append, persist.
    pub async fn tick(&self) {
        let at = Utc::now();
        let tick = self.sample().await;
        let appended = self.state.windows.lock().append(tick.clone());
        if !appended {
            tracing::warn!("Every read failed, tick skipped");
            return;
        }
        self.persist(&tick, self.state.experiment_id(), at).await;
    }

    /// Run until `shutdown` flips to `true`.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let mut settings_rx = self.state.subscribe_settings();
        let mut run_rx = self.state.run.subscribe();
        tracing::info!("Sampling loop started");

        loop {
            if *shutdown.borrow() {
                break;
            }
            self.tick().await;

            let running = run_rx.borrow_and_update().is_some();
            let sampling = settings_rx.borrow_and_update().sampling.clone();
            let deadline = Instant::now() + interval_for(&sampling, running);

            // Wait out the delay unless something relevant changes.
            let stop = loop {
                tokio::select! {
                    _ = sleep_until(deadline) => break false,
                    changed = settings_rx.changed() => {
                        if changed.is_err() {
                            break true;
                        }
                        let interval_changed = {
                            let next = settings_rx.borrow_and_update();
                            next.sampling.running_interval != sampling.running_interval
                                || next.sampling.idle_interval != sampling.idle_interval
                        };
                        if interval_changed {
                            tracing::debug!("Sampling interval changed, delay interrupted");
                            break false;
                        }
                    }
                    changed = run_rx.changed() => {
                        if changed.is_err() {
                            break true;
                        }
                        break false;
                    }
                    _ = shutdown.changed() => break true,
                }
            };
            if stop {
                break;
            }
        }

        tracing::info!("Sampling loop stopped");
    }
}
