//! Shared fixtures for the integration tests.
#![allow(dead_code)]

use station_daq::config::{AcquisitionConfig, PollInterval, StationConfig};
use station_daq::hardware::mock::{bank_response, MockPowerMeter, MockTemperatureDevice};
use station_daq::station::StationId;
use std::path::Path;

pub const METER_REPLY: &str = "U +110.0E+0;I +1.0E+0;P +110.0E+0;WP +0.0E+0";

/// Recorder bank of 18 channels: 21.0, 22.0, ... 38.0 °C.
pub fn bank() -> Vec<f64> {
    (0..18).map(|i| 21.0 + i as f64).collect()
}

/// Short timeouts so fault paths resolve quickly.
pub fn fast_acquisition() -> AcquisitionConfig {
    AcquisitionConfig {
        connect_timeout_ms: 500,
        io_timeout_ms: 200,
        stop_timeout_ms: 2000,
    }
}

pub struct Bench {
    pub recorder: MockTemperatureDevice,
    pub meter: MockPowerMeter,
}

impl Bench {
    pub async fn spawn() -> Self {
        Self {
            recorder: MockTemperatureDevice::spawn(bank_response(&bank())).await.unwrap(),
            meter: MockPowerMeter::spawn(METER_REPLY).await.unwrap(),
        }
    }

    /// Station settings pointing at this bench's mock devices.
    pub fn station_config(&self, id: u8, dir: &Path, channels: &str) -> StationConfig {
        let mut config = StationConfig::new(StationId::new(id).unwrap(), dir.display().to_string());
        config.interval = PollInterval::OneMinute;
        config.channels = channels.to_string();
        config.temperature_addr = Some(self.recorder.address());
        config.power_meter_addr = Some(self.meter.address());
        config
    }
}

/// An address nothing listens on.
pub async fn dead_address() -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let address = listener.local_addr().unwrap().to_string();
    drop(listener);
    address
}

pub fn csv_files(dir: &Path) -> Vec<std::path::PathBuf> {
    let mut files: Vec<_> = std::fs::read_dir(dir)
        .unwrap()
        .map(|e| e.unwrap().path())
        .filter(|p| p.extension().is_some_and(|ext| ext == "csv"))
        .collect();
    files.sort();
    files
}
