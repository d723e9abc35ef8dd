//! Bounded in-memory sample history, one ring buffer per farm.

use greenhouse_engine::SensorSample;
use std::collections::{HashMap, VecDeque};
use time::{Duration, OffsetDateTime};

/// Samples retained per farm when `HISTORY_CAPACITY` is unset.
pub const DEFAULT_CAPACITY: usize = 1000;

pub struct SampleHistory {
    capacity: usize,
    farms: HashMap<u32, VecDeque<SensorSample>>,
}

impl SampleHistory {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            farms: HashMap::new(),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Append a sample, evicting the oldest once the farm's buffer is full.
    pub fn push(&mut self, sample: SensorSample) {
        let buf = self
            .farms
            .entry(sample.farm_id)
            .or_insert_with(|| VecDeque::with_capacity(self.capacity.min(64)));
        if buf.len() >= self.capacity {
            buf.pop_front();
        }
        buf.push_back(sample);
    }

    /// Samples for `farm_id` no older than `days` before `now`, oldest first.
    /// A period reaching past the representable date range has no cutoff.
    pub fn since(&self, farm_id: u32, days: u32, now: OffsetDateTime) -> Vec<SensorSample> {
        let cutoff = now.checked_sub(Duration::days(i64::from(days)));
        let mut out: Vec<SensorSample> = self
            .farms
            .get(&farm_id)
            .map(|buf| {
                buf.iter()
                    .filter(|s| cutoff.map_or(true, |c| s.timestamp >= c))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();
        out.sort_by_key(|s| s.timestamp);
        out
    }

    /// Most recent sample by timestamp.
    pub fn latest(&self, farm_id: u32) -> Option<&SensorSample> {
        self.farms
            .get(&farm_id)
            .and_then(|buf| buf.iter().max_by_key(|s| s.timestamp))
    }

    pub fn len(&self, farm_id: u32) -> usize {
        self.farms.get(&farm_id).map_or(0, VecDeque::len)
    }
}

impl Default for SampleHistory {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

// ===========================================================================
// Tests
// ===========================================================================
