//! Session CSV writer.
//!
//! One file per station per session, named `<YYYYmmdd_HHMMSS>_Station_<n>.csv` and
//! opened in append mode. Every row is flushed as soon as it is written so a crash
//! loses at most the cycle in flight.
use crate::channels::ChannelSet;
use crate::data::Sample;
use crate::error::AppResult;
use crate::station::StationId;
use chrono::{DateTime, Local};
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};

const POWER_COLUMNS: [&str; 4] = ["U(V)", "I(A)", "P(W)", "WP(Wh)"];

/// A writer for session CSV files.
pub struct CsvSink {
    path: PathBuf,
    writer: csv::Writer<File>,
}

impl CsvSink {
    /// Create the session file inside `dir` and write the header row.
    ///
    /// The directory is created if it does not exist yet.
    pub fn create(
        dir: &Path,
        station: StationId,
        started: DateTime<Local>,
        channels: &ChannelSet,
    ) -> AppResult<Self> {
        if !dir.exists() {
            std::fs::create_dir_all(dir)?;
        }
        let path = dir.join(Self::file_name(station, started));
        let file = OpenOptions::new().create(true).append(true).open(&path)?;

        // Rows may be shorter than the header when configured channels exceed the
        // recorder bank, so record length is not enforced.
        let mut writer = csv::WriterBuilder::new().flexible(true).from_writer(file);
        writer.write_record(Self::header(channels))?;
        writer.flush()?;

        tracing::info!("CSV session file created at '{}'.", path.display());
        Ok(Self { path, writer })
    }

    /// Session file name for a station started at `started`.
    pub fn file_name(station: StationId, started: DateTime<Local>) -> String {
        format!(
            "{}_Station_{}.csv",
            started.format("%Y%m%d_%H%M%S"),
            station.file_suffix()
        )
    }

    /// Header row: date, time, one column per configured channel, the four power columns.
    pub fn header(channels: &ChannelSet) -> Vec<String> {
        ["Date".to_string(), "Time".to_string()]
            .into_iter()
            .chain(channels.iter().map(|ch| format!("Temp{}", ch)))
            .chain(POWER_COLUMNS.iter().map(|c| c.to_string()))
            .collect()
    }

    /// Format a sample as a CSV record. Missing temperatures become empty fields.
    pub fn record(sample: &Sample) -> Vec<String> {
        let mut record = Vec::with_capacity(sample.temperatures.len() + 6);
        record.push(sample.timestamp.format("%Y-%m-%d").to_string());
        record.push(sample.timestamp.format("%H:%M:%S").to_string());
        record.extend(
            sample
                .temperatures
                .iter()
                .map(|t| t.map(format_value).unwrap_or_default()),
        );
        record.extend(sample.power_reading().as_array().into_iter().map(format_value));
        record
    }

    /// Append one row and flush it to disk.
    pub fn append(&mut self, sample: &Sample) -> AppResult<()> {
        self.writer.write_record(Self::record(sample))?;
        self.writer.flush()?;
        Ok(())
    }

    /// Location of the session file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Flush and release the file handle. The file stays on disk.
    pub fn close(mut self) -> AppResult<()> {
        self.writer.flush()?;
        tracing::info!("CSV session file '{}' closed.", self.path.display());
        Ok(())
    }
}

// Shortest round-trip form that always carries a decimal point: 110.0, 25.3, -0.1
fn format_value(value: f64) -> String {
    format!("{:?}", value)
}
