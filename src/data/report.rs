//! Range-average reporting for the operator surface.

use crate::data::RangeAverage;
use crate::error::{AppResult, DaqError};
use chrono::{DateTime, Local, NaiveDate, NaiveTime};
use std::fmt;

const CELLS_PER_LINE: usize = 3;
const CELL_WIDTH: usize = 15;

/// Channel averages paired with the configured channel numbers.
#[derive(Debug, Clone, PartialEq)]
pub struct AverageReport {
    /// `(channel number, mean °C)` in channel order
    pub rows: Vec<(u32, Option<f64>)>,
}

impl AverageReport {
    /// Pair a range average with channel numbers; `None` when the range held no data.
    pub fn new(channels: &[u32], average: &RangeAverage) -> Option<Self> {
        match average {
            RangeAverage::NoData => None,
            RangeAverage::Channels(values) => Some(Self {
                rows: channels
                    .iter()
                    .zip(values.iter())
                    .map(|(&ch, &value)| (ch, value))
                    .collect(),
            }),
        }
    }
}

impl fmt::Display for AverageReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for line in self.rows.chunks(CELLS_PER_LINE) {
            let text: String = line
                .iter()
                .map(|(ch, value)| {
                    let cell = match value {
                        Some(v) => format!("CH{:02}: {:>5.1}°C", ch, v),
                        None => format!("CH{:02}: {:>5}", ch, "--"),
                    };
                    format!("{:<width$}", cell, width = CELL_WIDTH)
                })
                .collect();
            writeln!(f, "{}", text.trim_end())?;
        }
        Ok(())
    }
}

/// Combine operator-entered `YYYY-MM-DD` and `HH:MM` text into a local timestamp.
///
/// # Errors
/// `DaqError::Config` for malformed text or a wall-clock time skipped by a DST change.
pub fn parse_local_datetime(date: &str, time: &str) -> AppResult<DateTime<Local>> {
    let day = NaiveDate::parse_from_str(date.trim(), "%Y-%m-%d")
        .map_err(|e| DaqError::Config(format!("Invalid date '{}': {}", date, e)))?;
    let clock = NaiveTime::parse_from_str(time.trim(), "%H:%M")
        .map_err(|e| DaqError::Config(format!("Invalid time '{}': {}", time, e)))?;
    day.and_time(clock)
        .and_local_timezone(Local)
        .earliest()
        .ok_or_else(|| DaqError::Config(format!("Local time {} {} does not exist", date, time)))
}
