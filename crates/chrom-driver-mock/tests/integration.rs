//! Driver-level behaviour of the simulated rig through the capability traits.

use chrom_core::{PumpDirection, PumpDriver, PumpId, SensorKind, SensorProbe, Spectrometer, ValveDriver, ValveId};
use chrom_driver_mock::{
    ErrorConfig, ErrorScenario, MockRig, MockSensorProbe, MockSpectrometer, PumpCommand, SignalProfile,
};

#[test]
fn test_rig_starts_safe_and_tracks_commands() {
    let rig = MockRig::new([PumpId(7), PumpId(10)], [ValveId(5), ValveId(8)]);
    assert!(rig.is_safe());

    let devices = rig.device_set();
    devices.pumps.set_direction(PumpId(7), PumpDirection::Reverse).unwrap();
    devices.pumps.set_speed(PumpId(7), 42.0).unwrap();
    devices.pumps.set_running(PumpId(7), true).unwrap();
    devices.valves.set_opening(ValveId(5), 100.0).unwrap();
    assert!(!rig.is_safe());

    assert_eq!(
        rig.pumps.commands_for(PumpId(7)),
        vec![
            PumpCommand::Direction(PumpId(7), PumpDirection::Reverse),
            PumpCommand::Speed(PumpId(7), 42.0),
            PumpCommand::Running(PumpId(7), true),
        ]
    );

    devices.pumps.set_running(PumpId(7), false).unwrap();
    devices.pumps.set_speed(PumpId(7), 0.0).unwrap();
    devices.valves.set_opening(ValveId(5), 0.0).unwrap();
    assert!(rig.is_safe());
}

#[test]
fn test_probe_failure_through_trait_object() {
    let probe = MockSensorProbe::new()
        .with_errors(ErrorConfig::scenario(ErrorScenario::FailAfterN {
            operation: "read",
            count: 2,
        }))
        .with_profile(SensorKind::Level, SignalProfile::Noisy { mean: 250.0, std: 0.5 });
    let rig = MockRig::new([PumpId(10)], [ValveId(8)]).with_probe(probe);
    let devices = rig.device_set();

    assert!(devices.probe.read(SensorKind::Level).is_ok());
    assert!(devices.probe.read(SensorKind::Ph).is_ok());
    let err = devices.probe.read(SensorKind::Orp).unwrap_err();
    assert!(err.to_string().contains("Injected failure"));
}

#[test]
fn test_noisy_spectrometer_is_reproducible() {
    let a = MockSpectrometer::uv().with_noise(5.0).with_seed(11);
    let b = MockSpectrometer::uv().with_noise(5.0).with_seed(11);
    for dev in [&a, &b] {
        dev.set_background().unwrap();
        dev.set_reference().unwrap();
    }
    assert_eq!(a.read_absorbance().unwrap(), b.read_absorbance().unwrap());
}
