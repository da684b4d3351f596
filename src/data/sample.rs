//! One poll cycle's readings.

use crate::hardware::PowerReading;
use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};

/// One poll cycle's readings for a station.
///
/// `temperatures` is indexed by position in the station's channel set; `None` marks a
/// channel that could not be read this cycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    /// Local wall-clock time the cycle completed
    pub timestamp: DateTime<Local>,
    /// °C per selected channel
    pub temperatures: Vec<Option<f64>>,
    /// Volts
    pub voltage: f64,
    /// Amperes
    pub current: f64,
    /// Watts
    pub power: f64,
    /// Watt-hours
    pub accumulated_energy: f64,
}

impl Sample {
    /// Combine one cycle's temperatures and power reading.
    pub fn new(
        timestamp: DateTime<Local>,
        temperatures: Vec<Option<f64>>,
        reading: PowerReading,
    ) -> Self {
        Self {
            timestamp,
            temperatures,
            voltage: reading.voltage,
            current: reading.current,
            power: reading.power,
            accumulated_energy: reading.energy,
        }
    }

    /// The electrical values as a [`PowerReading`].
    pub fn power_reading(&self) -> PowerReading {
        PowerReading {
            voltage: self.voltage,
            current: self.current,
            power: self.power,
            energy: self.accumulated_energy,
        }
    }

    /// Temperature at channel-set position `index`, if present.
    pub fn temperature(&self, index: usize) -> Option<f64> {
        self.temperatures.get(index).copied().flatten()
    }
}
