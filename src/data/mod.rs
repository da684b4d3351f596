//! Sample model, in-memory buffering, range reports and CSV persistence.
pub mod report;
pub mod sample;
pub mod sample_buffer;
pub mod storage;

pub use report::{parse_local_datetime, AverageReport};
pub use sample::Sample;
pub use sample_buffer::{RangeAverage, SampleBuffer};
pub use storage::CsvSink;

use chrono::TimeDelta;

/// Hours of history kept in memory per station.
pub const RETENTION_HOURS: i64 = 189;

/// Maximum age of a buffered sample.
pub fn retention_horizon() -> TimeDelta {
    TimeDelta::hours(RETENTION_HOURS)
}
