//! Property tests for sliding-window ordering and resizing.

use chrom_core::{SensorSnapshot, SignalWindows, SlidingWindow, Tick};
use proptest::prelude::*;

proptest! {
    #[test]
    fn window_holds_most_recent_in_order(
        capacity in 1usize..32,
        items in prop::collection::vec(any::<i32>(), 0..128),
    ) {
        let mut window = SlidingWindow::new(capacity);
        for item in &items {
            window.push(*item);
        }
        let expected: Vec<i32> = items
            .iter()
            .copied()
            .skip(items.len().saturating_sub(capacity))
            .collect();
        let actual: Vec<i32> = window.iter().copied().collect();
        prop_assert_eq!(actual, expected);
        prop_assert!(window.len() <= window.capacity());
    }

    #[test]
    fn shrinking_drops_oldest(
        capacity in 2usize..32,
        shrink_to in 1usize..32,
        items in prop::collection::vec(any::<u16>(), 1..64),
    ) {
        let mut window = SlidingWindow::new(capacity);
        for item in &items {
            window.push(*item);
        }
        let before: Vec<u16> = window.iter().copied().collect();
        window.resize(shrink_to);
        let after: Vec<u16> = window.iter().copied().collect();
        let keep = before.len().min(shrink_to);
        prop_assert_eq!(&after[..], &before[before.len() - keep..]);
    }

    #[test]
    fn growing_preserves_contents(
        capacity in 1usize..16,
        grow_by in 0usize..16,
        items in prop::collection::vec(any::<u8>(), 0..32),
    ) {
        let mut window = SlidingWindow::new(capacity);
        for item in &items {
            window.push(*item);
        }
        let before: Vec<u8> = window.iter().copied().collect();
        window.resize(capacity + grow_by);
        let after: Vec<u8> = window.iter().copied().collect();
        prop_assert_eq!(before, after);
        prop_assert_eq!(window.capacity(), capacity + grow_by);
    }

    #[test]
    fn signal_windows_stay_in_lock_step(
        capacity in 1usize..10,
        pattern in prop::collection::vec((any::<bool>(), any::<bool>(), any::<bool>()), 0..40),
    ) {
        let mut windows = SignalWindows::new(capacity);
        for (has_sensor, has_uv, has_nir) in pattern {
            let tick = Tick {
                sensors: if has_sensor {
                    SensorSnapshot::chemical(7.0, 200.0, 0.5)
                } else {
                    SensorSnapshot::default()
                },
                uv: has_uv.then(|| vec![0.1; 4]),
                nir: has_nir.then(|| vec![0.2; 4]),
            };
            let appended = windows.append(tick);
            prop_assert_eq!(appended, has_sensor || has_uv || has_nir);
            prop_assert_eq!(windows.sensors.len(), windows.uv.len());
            prop_assert_eq!(windows.uv.len(), windows.nir.len());
        }
    }
}
