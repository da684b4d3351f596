//! Station lifecycle: identifiers, the per-station controller, the supervisor arena,
//! the event-sink interface towards the operator surface and the display projection.

pub mod controller;
pub mod display;
pub mod events;
pub mod supervisor;

pub use controller::{StationController, StationState};
pub use display::{format_temperature, DisplayMode, DisplayState, DisplayWindow};
pub use events::{BroadcastEventSink, EventSink, StationEvent, TracingEventSink};
pub use supervisor::Supervisor;

use crate::error::{AppResult, DaqError};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Number of stations the bench is wired for.
pub const STATION_COUNT: u8 = 6;

/// Default Modbus-TCP port of the temperature recorder.
pub const TEMPERATURE_PORT: u16 = 502;

/// Default command port of the power meter.
pub const POWER_METER_PORT: u16 = 3300;

/// Identifier of one of the fixed test stations (1..=6).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub struct StationId(u8);

impl StationId {
    /// Validate a station number.
    pub fn new(number: u8) -> AppResult<Self> {
        if (1..=STATION_COUNT).contains(&number) {
            Ok(Self(number))
        } else {
            Err(DaqError::Config(format!(
                "Station number must be 1-{}, got {}",
                STATION_COUNT, number
            )))
        }
    }

    /// All stations in ascending order.
    pub fn all() -> impl Iterator<Item = StationId> {
        (1..=STATION_COUNT).map(StationId)
    }

    /// Station number, 1-based.
    pub fn number(self) -> u8 {
        self.0
    }

    /// Zero-based slot, for per-station arrays.
    pub fn index(self) -> usize {
        usize::from(self.0 - 1)
    }

    /// Numeric suffix used in session file names.
    pub fn file_suffix(self) -> u8 {
        self.0
    }

    /// Wired network addresses of this station's device pair.
    ///
    /// Recorders sit at `192.168.1.1-6`, power meters at `192.168.1.7-12`.
    pub fn default_addresses(self) -> StationAddresses {
        StationAddresses {
            temperature: format!("192.168.1.{}:{}", self.0, TEMPERATURE_PORT),
            power_meter: format!("192.168.1.{}:{}", self.0 + STATION_COUNT, POWER_METER_PORT),
        }
    }
}

impl TryFrom<u8> for StationId {
    type Error = DaqError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        StationId::new(value)
    }
}

impl From<StationId> for u8 {
    fn from(id: StationId) -> Self {
        id.0
    }
}

impl fmt::Display for StationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Station {}", self.0)
    }
}

/// `host:port` pair of a station's two devices.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StationAddresses {
    /// Temperature recorder
    pub temperature: String,
    /// DC power meter
    pub power_meter: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn station_numbers_are_bounded() {
        assert!(StationId::new(0).is_err());
        assert!(StationId::new(7).is_err());
        assert_eq!(StationId::all().count(), 6);
    }

    #[test]
    fn addresses_follow_wiring_plan() {
        let addrs = StationId::new(3).unwrap().default_addresses();
        assert_eq!(addrs.temperature, "192.168.1.3:502");
        assert_eq!(addrs.power_meter, "192.168.1.9:3300");
    }
}
