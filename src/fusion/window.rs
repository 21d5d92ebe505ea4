//! Per-station bounded time window.
//!
//! Each station keeps a capacity-bounded, time-ordered run of readings.
//! Two readings landing on the same minute are deduplicated by source
//! priority: a live reading displaces a historical one, and within the
//! same priority the newest arrival wins.

use std::collections::VecDeque;

use chrono::{DateTime, Duration as ChronoDuration, Utc};

use crate::types::Reading;

/// What happened to a reading offered to a window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertOutcome {
    /// New minute; appended (possibly evicting the oldest entry).
    Inserted,
    /// Same minute already present; the offer displaced it.
    Replaced,
    /// Same minute already present with higher source priority.
    Rejected,
}

/// Time-ordered ring of readings for one station.
#[derive(Debug, Clone)]
pub struct StationWindow {
    readings: VecDeque<Reading>,
    capacity: usize,
}

impl StationWindow {
    pub fn new(capacity: usize) -> Self {
        Self {
            readings: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Offer a reading, keeping the deque minute-ordered and bounded.
    pub fn insert(&mut self, reading: Reading) -> InsertOutcome {
        let key = reading.minute_key();

        // Same-minute duplicate: settle by source priority, then recency.
        if let Some(pos) = self
            .readings
            .iter()
            .position(|existing| existing.minute_key() == key)
        {
            let existing = &self.readings[pos];
            if reading.source.priority() >= existing.source.priority() {
                self.readings[pos] = reading;
                return InsertOutcome::Replaced;
            }
            return InsertOutcome::Rejected;
        }

        // Readings mostly arrive in order; fall back to a positional
        // insert when a backfill lands out of sequence.
        let pos = self
            .readings
            .partition_point(|existing| existing.minute_key() < key);
        if pos == self.readings.len() {
            self.readings.push_back(reading);
        } else {
            self.readings.insert(pos, reading);
        }

        while self.readings.len() > self.capacity {
            self.readings.pop_front();
        }
        InsertOutcome::Inserted
    }

    pub fn len(&self) -> usize {
        self.readings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.readings.is_empty()
    }

    pub fn latest(&self) -> Option<&Reading> {
        self.readings.back()
    }

    /// Time-ordered copy of the readings not older than `window_minutes`
    /// before this station's newest reading.
    pub fn recent(&self, window_minutes: i64) -> Vec<Reading> {
        let Some(newest) = self.latest() else {
            return Vec::new();
        };
        let cutoff = newest.timestamp - ChronoDuration::minutes(window_minutes);
        self.readings
            .iter()
            .filter(|r| r.timestamp >= cutoff)
            .cloned()
            .collect()
    }

    /// Drop readings older than the cutoff, regardless of capacity.
    pub fn evict_before(&mut self, cutoff: DateTime<Utc>) {
        while let Some(front) = self.readings.front() {
            if front.timestamp >= cutoff {
                break;
            }
            self.readings.pop_front();
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = &Reading> {
        self.readings.iter()
    }
}
