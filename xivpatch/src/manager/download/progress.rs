//! Per-slot download progress.
//!
//! Each download slot owns one [`SlotCounter`]. Only the worker bound to a
//! slot writes its counter; readers (the progress bar, the snapshot) load the
//! atomics without locking and tolerate slightly stale values.
//!
//! ```text
//!  slot 0 ── task 3 ── 1.2 MiB ── 450 KiB/s
//!  slot 1 ── task 4 ── 0.3 MiB ── 380 KiB/s
//!  slot 2 ── idle
//! ```

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use parking_lot::Mutex;

/// Marker for a slot with no bound task.
const UNBOUND: usize = usize::MAX;

/// Width of the rate meter's sliding window.
const RATE_WINDOW: Duration = Duration::from_secs(2);

/// Progress counter for one download slot.
#[derive(Debug)]
pub struct SlotCounter {
    task: AtomicUsize,
    received: AtomicU64,
    /// `f64` bit pattern of the current rate.
    rate_bits: AtomicU64,
}

impl SlotCounter {
    fn new() -> Self {
        Self {
            task: AtomicUsize::new(UNBOUND),
            received: AtomicU64::new(0),
            rate_bits: AtomicU64::new(0f64.to_bits()),
        }
    }

    fn reset(&self) {
        self.task.store(UNBOUND, Ordering::Release);
        self.received.store(0, Ordering::Release);
        self.rate_bits.store(0f64.to_bits(), Ordering::Release);
    }

    fn snapshot(&self, slot: usize) -> SlotSnapshot {
        let task = self.task.load(Ordering::Acquire);
        SlotSnapshot {
            slot,
            task: (task != UNBOUND).then_some(task),
            received_bytes: self.received.load(Ordering::Acquire),
            bytes_per_second: f64::from_bits(self.rate_bits.load(Ordering::Acquire)),
        }
    }
}

/// Fixed set of slot counters, one per download slot.
#[derive(Debug)]
pub struct SlotCounters {
    slots: Vec<SlotCounter>,
}

impl SlotCounters {
    /// Create `count` idle slots.
    pub fn new(count: usize) -> Self {
        Self {
            slots: (0..count).map(|_| SlotCounter::new()).collect(),
        }
    }

    /// Number of slots.
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    /// Whether there are no slots.
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Bind `slot` to a catalog task and clear its counters.
    pub fn bind(&self, slot: usize, task: usize) {
        if let Some(counter) = self.slots.get(slot) {
            counter.received.store(0, Ordering::Release);
            counter.rate_bits.store(0f64.to_bits(), Ordering::Release);
            counter.task.store(task, Ordering::Release);
        }
    }

    /// Record progress for `slot`.
    pub fn record(&self, slot: usize, received_bytes: u64, bytes_per_second: f64) {
        if let Some(counter) = self.slots.get(slot) {
            counter.received.store(received_bytes, Ordering::Release);
            counter
                .rate_bits
                .store(bytes_per_second.to_bits(), Ordering::Release);
        }
    }

    /// Unbind `slot` and zero its counters.
    pub fn release(&self, slot: usize) {
        if let Some(counter) = self.slots.get(slot) {
            counter.reset();
        }
    }

    /// Zero every slot.
    pub fn reset_all(&self) {
        self.slots.iter().for_each(SlotCounter::reset);
    }

    /// Bytes received for `task`, if some slot is bound to it.
    pub fn received_for_task(&self, task: usize) -> Option<u64> {
        self.slots
            .iter()
            .find(|c| c.task.load(Ordering::Acquire) == task)
            .map(|c| c.received.load(Ordering::Acquire))
    }

    /// Snapshot of every slot.
    pub fn snapshot(&self) -> Vec<SlotSnapshot> {
        self.slots
            .iter()
            .enumerate()
            .map(|(slot, counter)| counter.snapshot(slot))
            .collect()
    }
}

/// Point-in-time view of one slot.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SlotSnapshot {
    /// Slot index.
    pub slot: usize,
    /// Catalog index of the bound task, if any.
    pub task: Option<usize>,
    /// Bytes received by the current transfer.
    pub received_bytes: u64,
    /// Current transfer rate.
    pub bytes_per_second: f64,
}

/// Sliding-window transfer rate estimate.
#[derive(Debug)]
pub struct RateMeter {
    samples: Mutex<VecDeque<(Instant, u64)>>,
}

impl Default for RateMeter {
    fn default() -> Self {
        Self::new()
    }
}

impl RateMeter {
    /// Create an empty meter.
    pub fn new() -> Self {
        Self {
            samples: Mutex::new(VecDeque::new()),
        }
    }

    /// Record the running byte total and return the current rate.
    pub fn record(&self, total_bytes: u64) -> f64 {
        self.record_at(total_bytes, Instant::now())
    }

    fn record_at(&self, total_bytes: u64, now: Instant) -> f64 {
        let mut samples = self.samples.lock();
        samples.push_back((now, total_bytes));

        while samples.len() > 2 {
            match samples.front() {
                Some((at, _)) if now.saturating_duration_since(*at) > RATE_WINDOW => {
                    samples.pop_front();
                }
                _ => break,
            }
        }

        let (Some(&(first_at, first_bytes)), Some(&(last_at, last_bytes))) =
            (samples.front(), samples.back())
        else {
            return 0.0;
        };

        let elapsed = last_at.saturating_duration_since(first_at).as_secs_f64();
        if elapsed <= 0.0 {
            return 0.0;
        }
        last_bytes.saturating_sub(first_bytes) as f64 / elapsed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bind_record_release() {
        let counters = SlotCounters::new(2);
        counters.bind(1, 7);
        counters.record(1, 1024, 512.0);

        let snapshot = counters.snapshot();
        assert_eq!(snapshot[0].task, None);
        assert_eq!(snapshot[1].task, Some(7));
        assert_eq!(snapshot[1].received_bytes, 1024);
        assert_eq!(snapshot[1].bytes_per_second, 512.0);
        assert_eq!(counters.received_for_task(7), Some(1024));

        counters.release(1);
        let snapshot = counters.snapshot();
        assert_eq!(snapshot[1].task, None);
        assert_eq!(snapshot[1].received_bytes, 0);
        assert_eq!(counters.received_for_task(7), None);
    }

    #[test]
    fn test_rebind_clears_previous_progress() {
        let counters = SlotCounters::new(1);
        counters.bind(0, 1);
        counters.record(0, 999, 10.0);
        counters.bind(0, 2);

        let snapshot = counters.snapshot();
        assert_eq!(snapshot[0].task, Some(2));
        assert_eq!(snapshot[0].received_bytes, 0);
    }

    #[test]
    fn test_reset_all() {
        let counters = SlotCounters::new(3);
        for slot in 0..3 {
            counters.bind(slot, slot);
            counters.record(slot, 100, 1.0);
        }
        counters.reset_all();
        assert!(counters
            .snapshot()
            .iter()
            .all(|s| s.task.is_none() && s.received_bytes == 0 && s.bytes_per_second == 0.0));
    }

    #[test]
    fn test_out_of_range_slot_ignored() {
        let counters = SlotCounters::new(1);
        counters.bind(5, 1);
        counters.record(5, 10, 1.0);
        assert_eq!(counters.snapshot()[0].task, None);
    }

    #[test]
    fn test_rate_meter() {
        let meter = RateMeter::new();
        let start = Instant::now();

        assert_eq!(meter.record_at(0, start), 0.0);
        let rate = meter.record_at(1000, start + Duration::from_secs(1));
        assert!((rate - 1000.0).abs() < 1e-6);
    }

    #[test]
    fn test_rate_meter_drops_old_samples() {
        let meter = RateMeter::new();
        let start = Instant::now();

        meter.record_at(0, start);
        meter.record_at(100, start + Duration::from_secs(1));
        meter.record_at(200, start + Duration::from_secs(5));
        // Old samples outside the window are gone, leaving the last two.
        let rate = meter.record_at(1200, start + Duration::from_secs(6));
        assert!((rate - 1000.0).abs() < 1e-6);
    }
}
