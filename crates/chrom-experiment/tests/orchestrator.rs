//! Run lifecycle on the simulated rig, in virtual time.

use chrom_core::{
    ChromError, ControlCommand, ExperimentRecord, ProcessStage, ReadingKind, SpectrometerKind,
    ValveId,
};
use chrom_driver_mock::MockRig;
use chrom_experiment::{
    ExperimentOrchestrator, ExperimentSettings, HardwareMap, ParameterUpdate, RunOutcome,
};
use chrom_storage::MemoryStore;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

fn record(id: u64, equilibrate_flow: f64) -> ExperimentRecord {
    ExperimentRecord {
        id,
        control_command: ControlCommand {
            equilibrate_flow,
            feed_flow: 2.0,
            feed_time: 0.01,
            wash_flow: 2.0,
            wash_time: 0.01,
            elute_flow: 2.0,
            elute_time: 0.01,
            refresh_flow: 30.0,
            fraction: "F1".to_string(),
        },
        feed_number: "B-07".to_string(),
        phase_wash: String::new(),
        phase_elute: String::new(),
        phase_refresh: String::new(),
        phase_equilibrate: String::new(),
        resin: "D101".to_string(),
        column_height: 50.0,
        column_inner_diameter: 2.0,
        bed_height: 20.0,
        liquid_height: 5.0,
        start_time: None,
        end_time: None,
    }
}

fn settings() -> ExperimentSettings {
    let mut settings = ExperimentSettings::default();
    // 120 s / (5 s + 10 s) = 8 ticks
    settings.equilibrium.window_span = Duration::from_secs(120);
    settings
}

struct Harness {
    rig: MockRig,
    store: Arc<MemoryStore>,
    orchestrator: ExperimentOrchestrator,
}

fn harness() -> Harness {
    let map = HardwareMap::default();
    let rig = MockRig::new(map.pump_addresses.clone(), map.valve_channels.clone());
    let store = Arc::new(MemoryStore::new());
    store.insert_record(record(1, 30.0));
    store.insert_record(record(2, 1.0));
    let orchestrator =
        ExperimentOrchestrator::new(rig.device_set(), map, settings(), store.clone(), store.clone())
            .unwrap();
    Harness {
        rig,
        store,
        orchestrator,
    }
}

async fn wait_for_stage(orchestrator: &ExperimentOrchestrator, stage: ProcessStage) {
    let mut rx = orchestrator.shared_state().subscribe_stage();
    rx.wait_for(|s| *s == stage).await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_full_run_switches_fraction_once() {
    let h = harness();
    h.orchestrator.start(1).await.unwrap();
    h.orchestrator.wait_idle().await.unwrap();

    let fraction = ValveId(9);
    let waste = ValveId(8);
    assert_eq!(h.rig.valves.open_count(fraction), 1);
    // Closed at initialization, open from the start, closed for Elute,
    // reopened for Refresh, closed by the final safe state.
    let waste_writes: Vec<f64> = h
        .rig
        .valves
        .history()
        .into_iter()
        .filter(|(id, _)| *id == waste)
        .map(|(_, percent)| percent)
        .collect();
    assert_eq!(waste_writes, vec![0.0, 100.0, 0.0, 100.0, 0.0]);
    let history = h.rig.valves.history();
    let fraction_opened = history.iter().position(|w| *w == (fraction, 100.0)).unwrap();
    assert_eq!(history[fraction_opened - 1], (waste, 0.0));
    assert_eq!(h.rig.valves.open_count(ValveId(10)), 0);
    assert_eq!(h.rig.valves.open_count(ValveId(11)), 0);
    assert!(h.rig.is_safe());

    let state = h.orchestrator.state();
    assert!(!state.running);
    assert_eq!(state.stage, ProcessStage::Idle);
    assert_eq!(state.last_outcome, Some(RunOutcome::Completed));
    assert!(state.hardware.is_safe());

    let rec = h.store.record(1).unwrap();
    assert!(rec.start_time.is_some());
    assert!(rec.end_time.is_some());

    let logs = h.store.logs(Some(1));
    assert!(logs.iter().any(|l| l == "Experiment has been completed"));
    assert!(logs.iter().any(|l| l.contains("Equilibrium reached in equilibrate")));
    assert!(!h.store.readings(ReadingKind::Sensor, Some(1)).is_empty());
    assert_eq!(h.rig.uv.reference_captures(), 1);
    assert_eq!(h.rig.nir.reference_captures(), 1);

    h.orchestrator.shutdown().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_cancel_mid_feed_restores_safe_state() {
    let h = harness();
    h.orchestrator.start(1).await.unwrap();
    wait_for_stage(&h.orchestrator, ProcessStage::Feed).await;
    assert!(!h.rig.is_safe());

    h.orchestrator.stop().await.unwrap();

    assert!(h.rig.is_safe());
    let state = h.orchestrator.state();
    assert!(state.hardware.is_safe());
    assert!(!state.running);
    assert_eq!(state.stage, ProcessStage::Idle);
    assert_eq!(state.last_outcome, Some(RunOutcome::Cancelled));

    let rec = h.store.record(1).unwrap();
    assert!(rec.start_time.is_none());
    assert!(rec.end_time.is_none());
    assert!(matches!(h.orchestrator.stop().await, Err(ChromError::NotRunning)));
}

#[tokio::test(start_paused = true)]
async fn test_skip_ends_equilibration_wait() {
    let h = harness();
    // 1 BV/h: the minimum volume alone would take 90 minutes.
    h.orchestrator.start(2).await.unwrap();
    wait_for_stage(&h.orchestrator, ProcessStage::Equilibrate).await;

    let asked = Instant::now();
    h.orchestrator.skip_stage().unwrap();
    wait_for_stage(&h.orchestrator, ProcessStage::Feed).await;
    assert!(asked.elapsed() < settings().poll_interval());
    assert!(!h.orchestrator.shared_state().skip_requested());

    let feed_started = Instant::now();
    assert!(matches!(
        h.orchestrator.skip_stage(),
        Err(ChromError::NotSkippable(ProcessStage::Feed))
    ));
    assert!(!h.orchestrator.shared_state().skip_requested());

    // Feed still runs its full 0.01 h.
    wait_for_stage(&h.orchestrator, ProcessStage::Wash).await;
    let feed_time = feed_started.elapsed();
    assert!(feed_time >= Duration::from_secs(36), "{feed_time:?}");
    assert!(feed_time < Duration::from_secs(40), "{feed_time:?}");

    h.orchestrator.stop().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_stop_after_abandoned_wait() {
    let h = harness();
    h.orchestrator.start(1).await.unwrap();
    tokio::select! {
        result = h.orchestrator.wait_idle() => panic!("run ended early: {result:?}"),
        _ = wait_for_stage(&h.orchestrator, ProcessStage::Feed) => {}
    }
    assert!(h.orchestrator.state().running);

    h.orchestrator.stop().await.unwrap();
    assert!(h.rig.is_safe());
    let state = h.orchestrator.state();
    assert!(!state.running);
    assert_eq!(state.last_outcome, Some(RunOutcome::Cancelled));
    h.orchestrator.wait_idle().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_second_start_conflicts() {
    let h = harness();
    h.orchestrator.start(1).await.unwrap();
    assert!(matches!(
        h.orchestrator.start(2).await,
        Err(ChromError::Conflict { experiment_id: 1 })
    ));
    h.orchestrator.stop().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_commands_rejected_when_idle() {
    let h = harness();
    assert!(matches!(h.orchestrator.stop().await, Err(ChromError::NotRunning)));
    assert!(matches!(h.orchestrator.skip_stage(), Err(ChromError::NotRunning)));
}

#[tokio::test(start_paused = true)]
async fn test_invalid_record_never_starts() {
    let h = harness();
    let mut bad = record(3, 30.0);
    bad.control_command.fraction = "F9".to_string();
    h.store.insert_record(bad);

    assert!(matches!(
        h.orchestrator.start(3).await,
        Err(ChromError::Configuration(_))
    ));
    assert!(matches!(
        h.orchestrator.start(42).await,
        Err(ChromError::Configuration(_))
    ));
    assert!(!h.orchestrator.state().running);
    assert!(h.store.record(3).unwrap().start_time.is_none());
    assert!(h.rig.pumps.commands().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_hardware_fault_clears_times() {
    let h = harness();
    h.rig.pumps.errors().fail_operation("set_direction");
    h.orchestrator.start(1).await.unwrap();
    h.orchestrator.wait_idle().await.unwrap();

    let state = h.orchestrator.state();
    assert!(matches!(state.last_outcome, Some(RunOutcome::Failed(_))));
    assert_eq!(state.stage, ProcessStage::Idle);
    assert!(h.rig.pumps.all_stopped());
    let rec = h.store.record(1).unwrap();
    assert!(rec.start_time.is_none());
    assert!(h
        .store
        .logs(Some(1))
        .iter()
        .any(|l| l.starts_with("Experiment execution error")));
}

#[tokio::test(start_paused = true)]
async fn test_live_parameters() {
    let h = harness();
    assert_eq!(h.orchestrator.state().window_capacity, 8);

    h.orchestrator
        .set_parameter(ParameterUpdate::WindowSpan(Duration::from_secs(60)))
        .unwrap();
    assert_eq!(h.orchestrator.state().window_capacity, 4);
    assert_eq!(
        h.orchestrator.parameters().equilibrium.window_span,
        Duration::from_secs(60)
    );

    assert!(h
        .orchestrator
        .set_parameter(ParameterUpdate::PcaComponents(0))
        .is_err());
    assert_eq!(h.orchestrator.parameters().equilibrium.pca_components, 5);
}

#[tokio::test(start_paused = true)]
async fn test_manual_device_commands() {
    let h = harness();
    h.orchestrator.set_background(SpectrometerKind::Uv).await.unwrap();
    h.orchestrator.set_reference(SpectrometerKind::Nir).await.unwrap();
    assert_eq!(h.rig.uv.background_captures(), 1);
    assert_eq!(h.rig.nir.reference_captures(), 1);

    h.orchestrator
        .set_valve_alias(ValveId(8), Some("waste".to_string()))
        .unwrap();
    let state = h.orchestrator.state();
    assert_eq!(state.hardware.valves[&ValveId(8)].alias.as_deref(), Some("waste"));
}
