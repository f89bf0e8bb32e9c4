//! Closed-loop behaviour of the level controllers against a simple plant.
//!
//! The plant is a column whose gauge distance grows with outlet speed above
//! a 60 rpm inflow: `d += 0.05 * (u - inflow)`.

use chrom_experiment::{FuzzyController, FuzzyParams, LevelController, PidController, PidParams};
use std::time::Duration;

const TARGET: f64 = 500.0;
const START: f64 = 480.0;
const STEPS: usize = 1500;

fn tuned_pid() -> PidController {
    PidController::new(PidParams {
        kp: 3.0,
        ki: 0.1,
        kd: 0.5,
        ..PidParams::default()
    })
    .unwrap()
}

fn fuzzy() -> FuzzyController {
    FuzzyController::new(FuzzyParams::default(), Duration::from_secs(1)).unwrap()
}

/// Simulate `STEPS` control periods; `inflow(k)` is the inflow at step k.
fn simulate(controller: &mut dyn LevelController, inflow: impl Fn(usize) -> f64) -> Vec<f64> {
    controller.set_target(TARGET);
    let mut level = START;
    let mut history = Vec::with_capacity(STEPS);
    for k in 0..STEPS {
        let speed = controller.compute(level);
        level += 0.05 * (speed - inflow(k));
        history.push(level);
    }
    history
}

fn tail_range(history: &[f64]) -> f64 {
    let tail = &history[history.len() - 200..];
    let max = tail.iter().copied().fold(f64::MIN, f64::max);
    let min = tail.iter().copied().fold(f64::MAX, f64::min);
    max - min
}

#[test]
fn test_pid_step_settles() {
    let history = simulate(&mut tuned_pid(), |_| 60.0);
    let last = *history.last().unwrap();
    assert!((last - TARGET).abs() < 0.5, "final level {last}");
    assert!(tail_range(&history) < 0.1);
}

#[test]
fn test_pid_tracks_rising_inflow() {
    let history = simulate(&mut tuned_pid(), |k| 60.0 + 0.02 * k as f64);
    let last = *history.last().unwrap();
    assert!((last - TARGET).abs() < 1.0, "final level {last}");
}

#[test]
fn test_fuzzy_step_settles() {
    let history = simulate(&mut fuzzy(), |_| 60.0);
    let last = *history.last().unwrap();
    assert!((last - TARGET).abs() < 0.5, "final level {last}");
    assert!(tail_range(&history) < 0.1);
}

#[test]
fn test_fuzzy_tracks_rising_inflow() {
    let history = simulate(&mut fuzzy(), |k| 60.0 + 0.02 * k as f64);
    let last = *history.last().unwrap();
    assert!((last - TARGET).abs() < 5.0, "final level {last}");
    assert!(tail_range(&history) < 1.0);
}

/// Surface held above target: the outlet must only ever speed up, within
/// the output bounds.
fn assert_monotonic(controller: &mut dyn LevelController, max: f64) {
    controller.set_target(TARGET);
    let outputs: Vec<f64> = (0..300).map(|_| controller.compute(START)).collect();
    for pair in outputs.windows(2) {
        assert!(pair[1] >= pair[0], "output fell from {} to {}", pair[0], pair[1]);
    }
    assert!(outputs.iter().all(|u| (0.0..=max).contains(u)));
    assert!(outputs[0] > 0.0);
}

#[test]
fn test_pid_monotonic_start() {
    assert_monotonic(&mut PidController::new(PidParams::default()).unwrap(), 400.0);
    assert_monotonic(&mut tuned_pid(), 400.0);
}

#[test]
fn test_fuzzy_monotonic_start() {
    let mut ctl = fuzzy();
    assert_monotonic(&mut ctl, 150.0);
    assert_eq!(ctl.compute(START), 150.0);
}

#[test]
fn test_set_target_resets_state() {
    let mut ctl = fuzzy();
    ctl.set_target(TARGET);
    for _ in 0..50 {
        ctl.compute(START);
    }
    ctl.set_target(TARGET);
    let first = ctl.compute(START);
    let mut fresh = fuzzy();
    fresh.set_target(TARGET);
    assert_eq!(first, fresh.compute(START));
}
