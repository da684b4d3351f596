//! Bounded, time-ordered history of one station's samples.
//!
//! The acquisition loop is the only writer: it appends at the tail and sweeps expired
//! samples from the head after every append. Readers (charts, range averages) work on
//! a [`SampleBuffer::snapshot`] so they never hold a reference into the live buffer.
//!
//! # Invariants
//! - timestamps are non-decreasing from head to tail
//! - after `evict_older_than(h, now)` every sample satisfies `now - timestamp <= h`

use crate::data::Sample;
use crate::error::{AppResult, DaqError};
use chrono::{DateTime, Local, TimeDelta};
use std::collections::VecDeque;

/// Result of a range-average query.
#[derive(Debug, Clone, PartialEq)]
pub enum RangeAverage {
    /// No sample falls inside the range.
    NoData,
    /// Mean per channel position; `None` when the channel had no reading in range.
    Channels(Vec<Option<f64>>),
}

/// Time-ordered sample history.
#[derive(Debug, Clone, Default)]
pub struct SampleBuffer {
    samples: VecDeque<Sample>,
}

impl SampleBuffer {
    /// Empty buffer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a sample at the tail.
    ///
    /// # Errors
    /// `DaqError::BufferOrder` if the sample is older than the current tail.
    pub fn append(&mut self, sample: Sample) -> AppResult<()> {
        if let Some(tail) = self.samples.back() {
            if sample.timestamp < tail.timestamp {
                return Err(DaqError::BufferOrder {
                    tail: tail.timestamp.to_rfc3339(),
                    incoming: sample.timestamp.to_rfc3339(),
                });
            }
        }
        self.samples.push_back(sample);
        Ok(())
    }

    /// Drop samples from the head that are older than `now - horizon`.
    ///
    /// Returns the number of evicted samples.
    pub fn evict_older_than(&mut self, horizon: TimeDelta, now: DateTime<Local>) -> usize {
        let cutoff = now - horizon;
        let mut evicted = 0;
        while let Some(front) = self.samples.front() {
            if front.timestamp < cutoff {
                self.samples.pop_front();
                evicted += 1;
            } else {
                break;
            }
        }
        evicted
    }

    /// Independent copy of the current contents, oldest first.
    pub fn snapshot(&self) -> Vec<Sample> {
        self.samples.iter().cloned().collect()
    }

    /// Samples with `start <= timestamp <= end`, oldest first.
    pub fn samples_in_range(&self, start: DateTime<Local>, end: DateTime<Local>) -> Vec<Sample> {
        self.samples
            .iter()
            .filter(|s| s.timestamp >= start && s.timestamp <= end)
            .cloned()
            .collect()
    }

    /// Per-channel mean temperature over `start..=end`, ignoring missing readings.
    ///
    /// # Errors
    /// `DaqError::Validation` if `start >= end`.
    pub fn average_in_range(
        &self,
        start: DateTime<Local>,
        end: DateTime<Local>,
    ) -> AppResult<RangeAverage> {
        if start >= end {
            return Err(DaqError::Validation(format!(
                "Range start {} must be earlier than end {}",
                start.format("%Y-%m-%d %H:%M:%S"),
                end.format("%Y-%m-%d %H:%M:%S")
            )));
        }

        let in_range: Vec<&Sample> = self
            .samples
            .iter()
            .filter(|s| s.timestamp >= start && s.timestamp <= end)
            .collect();
        if in_range.is_empty() {
            return Ok(RangeAverage::NoData);
        }

        let width = in_range
            .iter()
            .map(|s| s.temperatures.len())
            .max()
            .unwrap_or(0);
        let averages = (0..width)
            .map(|index| {
                let values: Vec<f64> = in_range
                    .iter()
                    .filter_map(|s| s.temperature(index))
                    .collect();
                if values.is_empty() {
                    None
                } else {
                    Some(values.iter().sum::<f64>() / values.len() as f64)
                }
            })
            .collect();

        Ok(RangeAverage::Channels(averages))
    }

    /// Number of buffered samples.
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    /// Whether no sample is buffered.
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Drop every sample.
    pub fn clear(&mut self) {
        self.samples.clear();
    }
}
