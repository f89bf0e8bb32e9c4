//! Async front for the synchronous rig drivers.
//!
//! Every driver call is moved onto the blocking pool. Successful pump and
//! valve writes update that device's slot in the command ledger, so
//! [`HardwareGateway::command_state`] always reflects what was last
//! *commanded*. Each slot is its own `watch` channel and is only touched
//! with `send_modify`.

use chrom_core::{
    retry_with_policy, ChromError, ChromResult, DeviceSet, PumpDirection, PumpId, PumpState,
    RetryPolicy, SensorKind, SensorReading, SensorSnapshot, SpectrometerKind, Spectrometer,
    ValveId, ValveState,
};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::watch;

/// Snapshot of the command ledger.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct HardwareCommandState {
    /// Last commanded state per pump.
    pub pumps: BTreeMap<PumpId, PumpState>,
    /// Last commanded state per valve.
    pub valves: BTreeMap<ValveId, ValveState>,
}

impl HardwareCommandState {
    /// All pumps stopped at zero speed and all valves closed.
    pub fn is_safe(&self) -> bool {
        self.pumps.values().all(PumpState::is_safe) && self.valves.values().all(ValveState::is_closed)
    }
}

/// The only path from the controller to the rig drivers.
pub struct HardwareGateway {
    devices: DeviceSet,
    uv_wavelengths: Vec<f64>,
    nir_wavelengths: Vec<f64>,
    pumps: BTreeMap<PumpId, watch::Sender<PumpState>>,
    valves: BTreeMap<ValveId, watch::Sender<ValveState>>,
}

impl std::fmt::Debug for HardwareGateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HardwareGateway")
            .field("pumps", &self.pumps.keys().collect::<Vec<_>>())
            .field("valves", &self.valves.keys().collect::<Vec<_>>())
            .finish_non_exhaustive()
    }
}

/// Run a blocking driver call on the blocking pool.
async fn blocking<T, F>(device: String, operation: &'static str, f: F) -> ChromResult<T>
where
    T: Send + 'static,
    F: FnOnce() -> anyhow::Result<T> + Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await?
        .map_err(|err| ChromError::hardware(device, operation, err))
}

impl HardwareGateway {
    /// Build a gateway, discovering pumps, valves and spectrometer pixel
    /// grids from the drivers.
    pub fn new(devices: DeviceSet) -> Self {
        let pumps = devices
            .pumps
            .pump_ids()
            .into_iter()
            .map(|id| (id, watch::Sender::new(PumpState::default())))
            .collect();
        let valves = devices
            .valves
            .valve_ids()
            .into_iter()
            .map(|id| (id, watch::Sender::new(ValveState::default())))
            .collect();
        Self {
            uv_wavelengths: devices.uv.wavelengths(),
            nir_wavelengths: devices.nir.wavelengths(),
            devices,
            pumps,
            valves,
        }
    }

    /// Pumps found on the bus, ascending.
    pub fn pump_ids(&self) -> Vec<PumpId> {
        self.pumps.keys().copied().collect()
    }

    /// Valves found on the board, ascending.
    pub fn valve_ids(&self) -> Vec<ValveId> {
        self.valves.keys().copied().collect()
    }

    /// Pixel wavelengths of one spectrometer, nm.
    pub fn wavelengths(&self, kind: SpectrometerKind) -> &[f64] {
        match kind {
            SpectrometerKind::Uv => &self.uv_wavelengths,
            SpectrometerKind::Nir => &self.nir_wavelengths,
        }
    }

    fn spectrometer(&self, kind: SpectrometerKind) -> Arc<dyn Spectrometer> {
        match kind {
            SpectrometerKind::Uv => Arc::clone(&self.devices.uv),
            SpectrometerKind::Nir => Arc::clone(&self.devices.nir),
        }
    }

    fn pump_slot(&self, pump: PumpId) -> ChromResult<&watch::Sender<PumpState>> {
        self.pumps
            .get(&pump)
            .ok_or_else(|| ChromError::Configuration(format!("{pump} is not on the bus")))
    }

    fn valve_slot(&self, valve: ValveId) -> ChromResult<&watch::Sender<ValveState>> {
        self.valves
            .get(&valve)
            .ok_or_else(|| ChromError::Configuration(format!("{valve} is not on the board")))
    }

    // =========================================================================
    // Pumps
    // =========================================================================

    /// Set a pump's speed in rpm without starting or stopping it.
    pub async fn set_pump_speed(&self, pump: PumpId, rpm: f64) -> ChromResult<()> {
        let slot = self.pump_slot(pump)?;
        let driver = Arc::clone(&self.devices.pumps);
        blocking(pump.to_string(), "set_speed", move || driver.set_speed(pump, rpm)).await?;
        slot.send_modify(|s| s.speed_rpm = rpm);
        Ok(())
    }

    /// Start or stop a pump.
    pub async fn set_pump_running(&self, pump: PumpId, running: bool) -> ChromResult<()> {
        let slot = self.pump_slot(pump)?;
        let driver = Arc::clone(&self.devices.pumps);
        blocking(pump.to_string(), "set_running", move || {
            driver.set_running(pump, running)
        })
        .await?;
        slot.send_modify(|s| s.running = running);
        Ok(())
    }

    /// Set a pump's rotation direction.
    pub async fn set_pump_direction(&self, pump: PumpId, direction: PumpDirection) -> ChromResult<()> {
        let slot = self.pump_slot(pump)?;
        let driver = Arc::clone(&self.devices.pumps);
        blocking(pump.to_string(), "set_direction", move || {
            driver.set_direction(pump, direction)
        })
        .await?;
        slot.send_modify(|s| s.direction = direction);
        Ok(())
    }

    /// Switch a pump's drain mode.
    pub async fn set_pump_drain(&self, pump: PumpId, drain: bool) -> ChromResult<()> {
        let slot = self.pump_slot(pump)?;
        let driver = Arc::clone(&self.devices.pumps);
        blocking(pump.to_string(), "set_drain", move || driver.set_drain(pump, drain)).await?;
        slot.send_modify(|s| s.drain = drain);
        Ok(())
    }

    /// Stop one pump and return it to its idle configuration.
    ///
    /// The stop and zero-speed writes go first, and every write is
    /// attempted even when an earlier one fails; the first error is
    /// returned.
    async fn initialize_pump(&self, pump: PumpId) -> ChromResult<()> {
        let results = [
            self.set_pump_running(pump, false).await,
            self.set_pump_speed(pump, 0.0).await,
            self.set_pump_direction(pump, PumpDirection::Forward).await,
            self.set_pump_drain(pump, false).await,
        ];
        results.into_iter().collect()
    }

    /// Stop every pump, forward direction, drain off, zero speed.
    ///
    /// Every pump is attempted even when an earlier one fails; the first
    /// error is returned.
    pub async fn initialize_pumps(&self) -> ChromResult<()> {
        let mut first_err = None;
        for pump in self.pump_ids() {
            if let Err(err) = self.initialize_pump(pump).await {
                tracing::warn!(%pump, error = %err, "Pump initialization failed");
                first_err.get_or_insert(err);
            }
        }
        first_err.map_or(Ok(()), Err)
    }

    // =========================================================================
    // Valves
    // =========================================================================

    /// Set a valve's opening, 0 (closed) to 100 percent.
    pub async fn set_valve_opening(&self, valve: ValveId, percent: f64) -> ChromResult<()> {
        let slot = self.valve_slot(valve)?;
        let driver = Arc::clone(&self.devices.valves);
        blocking(valve.to_string(), "set_opening", move || {
            driver.set_opening(valve, percent)
        })
        .await?;
        slot.send_modify(|s| s.opening = percent);
        Ok(())
    }

    /// Close every valve, attempting all of them; the first error is returned.
    pub async fn close_all_valves(&self) -> ChromResult<()> {
        let mut first_err = None;
        for valve in self.valve_ids() {
            if let Err(err) = self.set_valve_opening(valve, 0.0).await {
                tracing::warn!(%valve, error = %err, "Valve close failed");
                first_err.get_or_insert(err);
            }
        }
        first_err.map_or(Ok(()), Err)
    }

    /// Stop all pumps and close all valves, retrying per `policy`.
    pub async fn restore_safe_state(&self, policy: &RetryPolicy) -> ChromResult<()> {
        let pumps = retry_with_policy(policy, "initialize_pumps", || self.initialize_pumps()).await;
        let valves = retry_with_policy(policy, "close_all_valves", || self.close_all_valves()).await;
        pumps.and(valves)
    }

    // =========================================================================
    // Sensors
    // =========================================================================

    /// Read one probe channel.
    pub async fn read_sensor(&self, kind: SensorKind) -> ChromResult<SensorReading> {
        let probe = Arc::clone(&self.devices.probe);
        blocking(kind.to_string(), "read", move || probe.read(kind)).await
    }

    /// Read every probe channel in one blocking call.
    ///
    /// A failed channel is logged and left empty in the snapshot.
    pub async fn read_snapshot(&self) -> ChromResult<SensorSnapshot> {
        let probe = Arc::clone(&self.devices.probe);
        blocking("probe".to_string(), "read", move || {
            let mut snapshot = SensorSnapshot::default();
            for kind in SensorKind::ALL {
                match probe.read(kind) {
                    Ok(reading) => snapshot.set(kind, Some(reading)),
                    Err(err) => tracing::warn!(sensor = %kind, error = %err, "Sensor read failed"),
                }
            }
            Ok(snapshot)
        })
        .await
    }

    /// Read one absorbance spectrum, aligned with [`wavelengths`](Self::wavelengths).
    pub async fn read_spectrum(&self, kind: SpectrometerKind) -> ChromResult<Vec<f64>> {
        let spectrometer = self.spectrometer(kind);
        blocking(kind.to_string(), "read_absorbance", move || {
            spectrometer.read_absorbance()
        })
        .await
    }

    /// Capture the current spectrum as the spectrometer's reference.
    pub async fn set_reference(&self, kind: SpectrometerKind) -> ChromResult<()> {
        let spectrometer = self.spectrometer(kind);
        blocking(kind.to_string(), "set_reference", move || {
            spectrometer.set_reference()
        })
        .await
    }

    /// Capture the current spectrum as the spectrometer's dark background.
    pub async fn set_background(&self, kind: SpectrometerKind) -> ChromResult<()> {
        let spectrometer = self.spectrometer(kind);
        blocking(kind.to_string(), "set_background", move || {
            spectrometer.set_background()
        })
        .await
    }

    // =========================================================================
    // Ledger
    // =========================================================================

    /// Copy of the command ledger.
    pub fn command_state(&self) -> HardwareCommandState {
        HardwareCommandState {
            pumps: self
                .pumps
                .iter()
                .map(|(id, slot)| (*id, slot.borrow().clone()))
                .collect(),
            valves: self
                .valves
                .iter()
                .map(|(id, slot)| (*id, slot.borrow().clone()))
                .collect(),
        }
    }

    /// Watch one pump's commanded state.
    pub fn subscribe_pump(&self, pump: PumpId) -> ChromResult<watch::Receiver<PumpState>> {
        Ok(self.pump_slot(pump)?.subscribe())
    }

    /// Label a pump in the ledger; `None` clears the label.
    pub fn set_pump_alias(&self, pump: PumpId, alias: Option<String>) -> ChromResult<()> {
        self.pump_slot(pump)?.send_modify(|s| s.alias = alias);
        Ok(())
    }

    /// Label a valve in the ledger; `None` clears the label.
    pub fn set_valve_alias(&self, valve: ValveId, alias: Option<String>) -> ChromResult<()> {
        self.valve_slot(valve)?.send_modify(|s| s.alias = alias);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrom_driver_mock::{MockRig, PumpCommand};

    fn gateway() -> (MockRig, HardwareGateway) {
        let rig = MockRig::new([PumpId(7), PumpId(10)], [ValveId(1), ValveId(8)]);
        let gateway = HardwareGateway::new(rig.device_set());
        (rig, gateway)
    }

    #[tokio::test]
    async fn test_ledger_tracks_commands() {
        let (_rig, gw) = gateway();
        gw.set_pump_speed(PumpId(7), 120.0).await.unwrap();
        gw.set_pump_running(PumpId(7), true).await.unwrap();
        gw.set_valve_opening(ValveId(8), 100.0).await.unwrap();
        gw.set_pump_alias(PumpId(7), Some("feed".to_string())).unwrap();

        let state = gw.command_state();
        let pump = &state.pumps[&PumpId(7)];
        assert!(pump.running);
        assert_eq!(pump.speed_rpm, 120.0);
        assert_eq!(pump.alias.as_deref(), Some("feed"));
        assert_eq!(state.valves[&ValveId(8)].opening, 100.0);
        assert!(!state.is_safe());
    }

    #[tokio::test]
    async fn test_unknown_device_is_configuration_error() {
        let (_rig, gw) = gateway();
        let err = gw.set_pump_speed(PumpId(3), 1.0).await.unwrap_err();
        assert!(matches!(err, ChromError::Configuration(_)));
    }

    #[tokio::test]
    async fn test_failed_write_leaves_ledger_unchanged() {
        let (rig, gw) = gateway();
        let err = gw.set_pump_speed(PumpId(7), 10_000.0).await.unwrap_err();
        assert!(matches!(err, ChromError::HardwareCommand { .. }));
        assert_eq!(gw.command_state().pumps[&PumpId(7)].speed_rpm, 0.0);
        assert!(rig.pumps.commands_for(PumpId(7)).is_empty());
    }

    #[tokio::test]
    async fn test_restore_safe_state() {
        let (rig, gw) = gateway();
        gw.set_pump_speed(PumpId(10), 50.0).await.unwrap();
        gw.set_pump_running(PumpId(10), true).await.unwrap();
        gw.set_valve_opening(ValveId(1), 100.0).await.unwrap();

        gw.restore_safe_state(&RetryPolicy::no_retry()).await.unwrap();
        assert!(gw.command_state().is_safe());
        assert!(rig.is_safe());
    }

    #[tokio::test]
    async fn test_failed_direction_write_still_stops_pump() {
        let (rig, gw) = gateway();
        gw.set_pump_speed(PumpId(7), 50.0).await.unwrap();
        gw.set_pump_running(PumpId(7), true).await.unwrap();
        rig.pumps.errors().fail_operation("set_direction");

        let err = gw.restore_safe_state(&RetryPolicy::no_retry()).await.unwrap_err();
        assert!(matches!(err, ChromError::HardwareCommand { .. }));
        assert!(rig.pumps.all_stopped());
        let pump = &gw.command_state().pumps[&PumpId(7)];
        assert!(!pump.running);
        assert_eq!(pump.speed_rpm, 0.0);
        // Drain is still written after the direction failure.
        assert!(rig
            .pumps
            .commands_for(PumpId(7))
            .contains(&PumpCommand::Drain(PumpId(7), false)));
        assert!(rig.valves.all_closed());
    }

    #[tokio::test]
    async fn test_snapshot_reads_every_channel() {
        let (_rig, gw) = gateway();
        let snapshot = gw.read_snapshot().await.unwrap();
        for kind in SensorKind::ALL {
            assert!(snapshot.get(kind).is_some(), "{kind} missing");
        }
        assert_eq!(gw.wavelengths(SpectrometerKind::Uv).len(), 128);
    }
}
