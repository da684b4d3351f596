//! Configuration System using Figment
//!
//! Strongly-typed configuration for the acquisition engine. Configuration is loaded from:
//! 1. `config/station_daq.toml` (base configuration)
//! 2. Environment variables prefixed with `STATION_DAQ_`, nested keys separated by `__`
//!    (e.g. `STATION_DAQ_APPLICATION__LOG_LEVEL=debug`)
//!
//! # Example
//! ```toml
//! [application]
//! name = "Freezer test bench"
//! log_level = "info"
//!
//! [acquisition]
//! io_timeout_ms = 2000
//!
//! [[stations]]
//! id = 1
//! save_dir = "D:/data"
//! interval = 60
//! channels = "1-3"
//! display_window = "30min"
//! ```

use crate::channels::ChannelSet;
use crate::error::{AppResult, DaqError};
use crate::hardware::{IoTimeouts, DEFAULT_CONNECT_TIMEOUT_MS, DEFAULT_IO_TIMEOUT_MS};
use crate::station::display::DisplayWindow;
use crate::station::{StationAddresses, StationId};
use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;

/// Default configuration file, relative to the working directory.
pub const DEFAULT_CONFIG_PATH: &str = "config/station_daq.toml";

/// Top-level configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    /// Application settings
    pub application: ApplicationConfig,
    /// Device I/O and lifecycle timing
    #[serde(default)]
    pub acquisition: AcquisitionConfig,
    /// Per-station collection settings
    #[serde(default)]
    pub stations: Vec<StationConfig>,
}

/// Application-level configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApplicationConfig {
    /// Application name
    pub name: String,
    /// Logging level (trace, debug, info, warn, error)
    pub log_level: String,
}

/// Timeouts shared by every station
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AcquisitionConfig {
    /// TCP connect timeout in milliseconds
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_ms: u64,
    /// Per read/write timeout in milliseconds
    #[serde(default = "default_io_timeout")]
    pub io_timeout_ms: u64,
    /// Maximum time `stop` waits for a loop before aborting it, in milliseconds
    #[serde(default = "default_stop_timeout")]
    pub stop_timeout_ms: u64,
}

impl Default for AcquisitionConfig {
    fn default() -> Self {
        Self {
            connect_timeout_ms: default_connect_timeout(),
            io_timeout_ms: default_io_timeout(),
            stop_timeout_ms: default_stop_timeout(),
        }
    }
}

impl AcquisitionConfig {
    /// Socket timeouts for both device clients.
    pub fn timeouts(&self) -> IoTimeouts {
        IoTimeouts {
            connect: Duration::from_millis(self.connect_timeout_ms),
            io: Duration::from_millis(self.io_timeout_ms),
        }
    }

    /// How long `stop` waits for the loop before aborting it.
    pub fn stop_timeout(&self) -> Duration {
        Duration::from_millis(self.stop_timeout_ms)
    }
}

/// Polling cadence of a station.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "u64", into = "u64")]
pub enum PollInterval {
    /// 60 s
    #[default]
    OneMinute,
    /// 180 s
    ThreeMinutes,
    /// 300 s
    FiveMinutes,
}

impl PollInterval {
    /// Interval length in seconds.
    pub fn seconds(self) -> u64 {
        match self {
            PollInterval::OneMinute => 60,
            PollInterval::ThreeMinutes => 180,
            PollInterval::FiveMinutes => 300,
        }
    }

    /// Interval as a sleep duration.
    pub fn as_duration(self) -> Duration {
        Duration::from_secs(self.seconds())
    }
}

impl TryFrom<u64> for PollInterval {
    type Error = DaqError;

    fn try_from(seconds: u64) -> AppResult<Self> {
        match seconds {
            60 => Ok(PollInterval::OneMinute),
            180 => Ok(PollInterval::ThreeMinutes),
            300 => Ok(PollInterval::FiveMinutes),
            other => Err(DaqError::Config(format!(
                "Invalid polling interval {}s. Must be one of: 60, 180, 300",
                other
            ))),
        }
    }
}

impl From<PollInterval> for u64 {
    fn from(interval: PollInterval) -> Self {
        interval.seconds()
    }
}

/// Collection settings for one station
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StationConfig {
    /// Station number (1-6)
    pub id: StationId,
    /// Directory receiving the session CSV files
    pub save_dir: String,
    /// Polling interval in seconds (60, 180 or 300)
    #[serde(default)]
    pub interval: PollInterval,
    /// Recorder channel selector, e.g. "1-3,5"
    #[serde(default = "default_channels")]
    pub channels: String,
    /// Chart time window
    #[serde(default)]
    pub display_window: DisplayWindow,
    /// Override for the recorder address (`host:port`)
    #[serde(default)]
    pub temperature_addr: Option<String>,
    /// Override for the power meter address (`host:port`)
    #[serde(default)]
    pub power_meter_addr: Option<String>,
}

impl StationConfig {
    /// Settings with defaults for everything but the station and save directory.
    pub fn new(id: StationId, save_dir: impl Into<String>) -> Self {
        Self {
            id,
            save_dir: save_dir.into(),
            interval: PollInterval::default(),
            channels: default_channels(),
            display_window: DisplayWindow::default(),
            temperature_addr: None,
            power_meter_addr: None,
        }
    }

    /// Device addresses, honouring overrides.
    pub fn addresses(&self) -> StationAddresses {
        let wired = self.id.default_addresses();
        StationAddresses {
            temperature: self.temperature_addr.clone().unwrap_or(wired.temperature),
            power_meter: self.power_meter_addr.clone().unwrap_or(wired.power_meter),
        }
    }

    /// Check what `start` needs and return the parsed channel set.
    ///
    /// # Errors
    /// `DaqError::Config` for an empty save directory or a malformed channel selector.
    pub fn validate(&self) -> AppResult<ChannelSet> {
        if self.save_dir.trim().is_empty() {
            return Err(DaqError::Config(format!(
                "{}: select a save directory first",
                self.id
            )));
        }
        ChannelSet::parse(&self.channels)
    }

    /// Save directory with surrounding whitespace removed.
    pub fn save_path(&self) -> &Path {
        Path::new(self.save_dir.trim())
    }
}

// Default value functions
fn default_connect_timeout() -> u64 {
    DEFAULT_CONNECT_TIMEOUT_MS
}

fn default_io_timeout() -> u64 {
    DEFAULT_IO_TIMEOUT_MS
}

fn default_stop_timeout() -> u64 {
    10_000
}

fn default_channels() -> String {
    "1-3".to_string()
}

impl Settings {
    /// Load configuration from the default file and environment variables
    pub fn load() -> AppResult<Self> {
        Self::load_from(DEFAULT_CONFIG_PATH)
    }

    /// Load configuration from a specific file path
    pub fn load_from<P: AsRef<Path>>(path: P) -> AppResult<Self> {
        let settings = Figment::new()
            .merge(Toml::file(path.as_ref()))
            .merge(Env::prefixed("STATION_DAQ_").split("__"))
            .extract()?;
        Ok(settings)
    }

    /// Parse configuration from TOML text (no environment overrides)
    pub fn from_toml_str(toml: &str) -> AppResult<Self> {
        Ok(Figment::new().merge(Toml::string(toml)).extract()?)
    }

    /// Validate configuration after loading
    pub fn validate(&self) -> AppResult<()> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.application.log_level.to_lowercase().as_str()) {
            return Err(DaqError::Config(format!(
                "Invalid log_level '{}'. Must be one of: {}",
                self.application.log_level,
                valid_levels.join(", ")
            )));
        }

        if self.acquisition.connect_timeout_ms == 0 || self.acquisition.io_timeout_ms == 0 {
            return Err(DaqError::Config(
                "Device timeouts must be greater than zero".to_string(),
            ));
        }

        let mut ids = HashSet::new();
        for station in &self.stations {
            if !ids.insert(station.id) {
                return Err(DaqError::Config(format!("Duplicate station: {}", station.id)));
            }
            station.validate()?;
        }

        Ok(())
    }

    /// Settings of one station, if configured
    pub fn station(&self, id: StationId) -> Option<&StationConfig> {
        self.stations.iter().find(|s| s.id == id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
        [application]
        name = "Test bench"
        log_level = "info"

        [[stations]]
        id = 1
        save_dir = "data"
        interval = 180
        channels = "1-2"
        display_window = "12hrs"

        [[stations]]
        id = 2
        save_dir = "data"
        temperature_addr = "127.0.0.1:1502"
    "#;

    #[test]
    fn test_parse_config() {
        let settings = Settings::from_toml_str(SAMPLE).unwrap();
        assert!(settings.validate().is_ok());
        assert_eq!(settings.acquisition.io_timeout_ms, DEFAULT_IO_TIMEOUT_MS);

        let first = &settings.stations[0];
        assert_eq!(first.interval, PollInterval::ThreeMinutes);
        assert_eq!(first.display_window, DisplayWindow::TwelveHours);

        let second = settings.station(StationId::new(2).unwrap()).unwrap();
        assert_eq!(second.interval, PollInterval::OneMinute);
        assert_eq!(second.channels, "1-3");
        let addrs = second.addresses();
        assert_eq!(addrs.temperature, "127.0.0.1:1502");
        assert_eq!(addrs.power_meter, "192.168.1.8:3300");
    }

    #[test]
    fn test_rejects_unknown_interval_and_station() {
        let bad_interval = SAMPLE.replace("interval = 180", "interval = 3");
        assert!(Settings::from_toml_str(&bad_interval).is_err());

        let bad_station = SAMPLE.replace("id = 2", "id = 9");
        assert!(Settings::from_toml_str(&bad_station).is_err());
    }

    #[test]
    fn test_invalid_log_level() {
        let mut settings = Settings::from_toml_str(SAMPLE).unwrap();
        settings.application.log_level = "loud".to_string();
        assert!(settings.validate().is_err());
    }

    #[test]
    fn test_duplicate_station_ids() {
        let duplicated = SAMPLE.replace("id = 2", "id = 1");
        let settings = Settings::from_toml_str(&duplicated).unwrap();
        assert!(settings.validate().is_err());
    }

    #[test]
    fn test_station_validation() {
        let id = StationId::new(1).unwrap();
        assert!(matches!(
            StationConfig::new(id, "  ").validate(),
            Err(DaqError::Config(_))
        ));

        let mut config = StationConfig::new(id, "out");
        config.channels = "3-1".to_string();
        assert!(matches!(config.validate(), Err(DaqError::Config(_))));

        config.channels = "1-2,4".to_string();
        assert_eq!(config.validate().unwrap().as_slice(), &[1, 2, 4]);
    }
}
