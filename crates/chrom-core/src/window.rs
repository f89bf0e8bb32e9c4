//! Fixed-capacity sliding windows of recent readings.
//!
//! The sampling loop appends one [`Tick`] per cycle to a [`SignalWindows`],
//! which advances the sensor, UV and NIR windows together so their lengths
//! never diverge. Callers hold a single lock around the whole struct.

use crate::reading::SensorSnapshot;
use std::collections::VecDeque;
use std::time::Duration;

/// Insertion-ordered buffer keeping the most recent `capacity` items.
#[derive(Debug, Clone, PartialEq)]
pub struct SlidingWindow<T> {
    items: VecDeque<T>,
    capacity: usize,
}

impl<T> SlidingWindow<T> {
    /// Create an empty window. A zero capacity is raised to one.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            items: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Append, evicting the oldest item when full.
    pub fn push(&mut self, item: T) {
        if self.items.len() == self.capacity {
            self.items.pop_front();
        }
        self.items.push_back(item);
    }

    /// Change capacity, dropping the oldest items when shrinking.
    pub fn resize(&mut self, capacity: usize) {
        let capacity = capacity.max(1);
        while self.items.len() > capacity {
            self.items.pop_front();
        }
        self.capacity = capacity;
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.items.len() == self.capacity
    }

    /// Oldest to newest.
    pub fn iter(&self) -> impl Iterator<Item = &T> + '_ {
        self.items.iter()
    }

    pub fn latest(&self) -> Option<&T> {
        self.items.back()
    }

    pub fn clear(&mut self) {
        self.items.clear();
    }
}

/// Window length for a time span sampled at `interval + overhead`.
///
/// `max(1, floor(span / (interval + overhead)))`.
pub fn window_capacity(span: Duration, interval: Duration, overhead: Duration) -> usize {
    let effective = (interval + overhead).as_secs_f64();
    if effective <= 0.0 {
        return 1;
    }
    ((span.as_secs_f64() / effective).floor() as usize).max(1)
}

/// One sampling cycle's worth of readings.
///
/// A failed read is `None` (or an absent channel in the snapshot).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Tick {
    pub sensors: SensorSnapshot,
    pub uv: Option<Vec<f64>>,
    pub nir: Option<Vec<f64>>,
}

impl Tick {
    /// True when every read of the cycle failed.
    pub fn is_empty(&self) -> bool {
        self.sensors.is_empty() && self.uv.is_none() && self.nir.is_none()
    }
}

/// Sensor, UV and NIR windows advanced in lock-step.
#[derive(Debug, Clone, PartialEq)]
pub struct SignalWindows {
    pub sensors: SlidingWindow<SensorSnapshot>,
    pub uv: SlidingWindow<Option<Vec<f64>>>,
    pub nir: SlidingWindow<Option<Vec<f64>>>,
}

impl SignalWindows {
    pub fn new(capacity: usize) -> Self {
        Self {
            sensors: SlidingWindow::new(capacity),
            uv: SlidingWindow::new(capacity),
            nir: SlidingWindow::new(capacity),
        }
    }

    /// Append a tick to all three windows.
    ///
    /// Returns `false` without touching the windows if every read failed.
    pub fn append(&mut self, tick: Tick) -> bool {
        if tick.is_empty() {
            return false;
        }
        self.sensors.push(tick.sensors);
        self.uv.push(tick.uv);
        self.nir.push(tick.nir);
        true
    }

    pub fn resize(&mut self, capacity: usize) {
        self.sensors.resize(capacity);
        self.uv.resize(capacity);
        self.nir.resize(capacity);
    }

    pub fn capacity(&self) -> usize {
        self.sensors.capacity()
    }

    pub fn len(&self) -> usize {
        self.sensors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sensors.is_empty()
    }

    /// All three windows at capacity.
    pub fn is_full(&self) -> bool {
        self.sensors.is_full() && self.uv.is_full() && self.nir.is_full()
    }

    pub fn clear(&mut self) {
        self.sensors.clear();
        self.uv.clear();
        self.nir.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_eviction_keeps_latest() {
        let mut window = SlidingWindow::new(3);
        for i in 1..=5 {
            window.push(i);
        }
        assert_eq!(window.iter().copied().collect::<Vec<_>>(), vec![3, 4, 5]);
        assert_eq!(window.latest(), Some(&5));
        assert!(window.is_full());
    }

    #[test]
    fn test_zero_capacity_raised_to_one() {
        let mut window = SlidingWindow::new(0);
        window.push("a");
        window.push("b");
        assert_eq!(window.capacity(), 1);
        assert_eq!(window.latest(), Some(&"b"));
    }

    #[test]
    fn test_default_capacity() {
        let cap = window_capacity(
            Duration::from_secs(20 * 60),
            Duration::from_secs(5),
            Duration::from_secs(10),
        );
        assert_eq!(cap, 80);
        assert_eq!(
            window_capacity(Duration::from_secs(5), Duration::from_secs(5), Duration::from_secs(10)),
            1
        );
    }

    #[test]
    fn test_empty_tick_skipped() {
        let mut windows = SignalWindows::new(4);
        assert!(!windows.append(Tick::default()));
        assert!(windows.is_empty());

        let tick = Tick {
            sensors: SensorSnapshot::default(),
            uv: Some(vec![0.1, 0.2]),
            nir: None,
        };
        assert!(windows.append(tick));
        assert_eq!(windows.sensors.len(), 1);
        assert_eq!(windows.nir.len(), 1);
        assert_eq!(windows.nir.latest(), Some(&None));
    }
}
