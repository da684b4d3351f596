//! DC power meter client
//!
//! Protocol Overview:
//! - Transport: TCP, default port 3300
//! - Format: ASCII, LF-terminated
//! - Query: `:MEAS? U,I,P,WH` (voltage, current, power, accumulated energy)
//! - Reply: four `;`-separated fields, each `<NAME> <signed-decimal>E+0`,
//!   e.g. `U +110.14E+0;I +0.0000E+0;P +000.00E+0;WP +00.0000E+0`
//!
//! # Example Usage
//!
//! ```no_run
//! use station_daq::hardware::{IoTimeouts, PowerMeterClient};
//!
//! # async fn demo() -> station_daq::error::AppResult<()> {
//! let mut meter = PowerMeterClient::new(IoTimeouts::default());
//! meter.connect("192.168.1.7:3300").await?;
//! let reading = meter.query().await?;
//! println!("{:.2} V, {:.4} A, {:.2} W", reading.voltage, reading.current, reading.power);
//! meter.disconnect().await;
//! # Ok(())
//! # }
//! ```

use crate::error::{AppResult, DaqError};
use crate::hardware::{discard_stale, open_stream, IoTimeouts};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::time::timeout;

/// Measurement request sent on every poll.
pub const MEASURE_COMMAND: &str = ":MEAS? U,I,P,WH\n";

const FIELD_COUNT: usize = 4;
const EXPONENT_SUFFIX: &str = "E+0";

/// One power meter measurement.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct PowerReading {
    /// Voltage in volts
    pub voltage: f64,
    /// Current in amperes
    pub current: f64,
    /// Active power in watts
    pub power: f64,
    /// Accumulated energy in watt-hours
    pub energy: f64,
}

impl PowerReading {
    /// Values in wire order: U, I, P, WP.
    pub fn as_array(&self) -> [f64; 4] {
        [self.voltage, self.current, self.power, self.energy]
    }

    /// Parse a measurement reply.
    ///
    /// # Errors
    /// `DaqError::Parse` carrying the raw reply when the field count is not four or a
    /// value is not numeric.
    pub fn parse(raw: &str) -> AppResult<Self> {
        let response = raw.trim();
        let fields: Vec<&str> = response.split(';').collect();
        if fields.len() != FIELD_COUNT {
            return Err(DaqError::Parse(format!(
                "Unexpected response format ({} fields): {}",
                fields.len(),
                response
            )));
        }

        let mut values = [0.0; FIELD_COUNT];
        for (slot, field) in values.iter_mut().zip(&fields) {
            *slot = parse_field(field).ok_or_else(|| {
                DaqError::Parse(format!(
                    "Failed to parse field '{}' of response: {}",
                    field, response
                ))
            })?;
        }

        let [voltage, current, power, energy] = values;
        Ok(Self {
            voltage,
            current,
            power,
            energy,
        })
    }
}

fn parse_field(field: &str) -> Option<f64> {
    let token = field.trim().rsplit(' ').next()?;
    let number = token.strip_suffix(EXPONENT_SUFFIX).unwrap_or(token);
    number.parse::<f64>().ok()
}

/// Client for the DC power meter.
pub struct PowerMeterClient {
    stream: Option<BufReader<TcpStream>>,
    address: Option<String>,
    timeouts: IoTimeouts,
    // Set while a query is in flight; still set afterwards if no reply line arrived
    dirty: bool,
}

impl PowerMeterClient {
    /// Create a disconnected client.
    pub fn new(timeouts: IoTimeouts) -> Self {
        Self {
            stream: None,
            address: None,
            timeouts,
            dirty: false,
        }
    }

    /// Open the TCP session.
    pub async fn connect(&mut self, address: &str) -> AppResult<()> {
        self.disconnect().await;
        let stream = open_stream(address, self.timeouts.connect).await?;
        tracing::info!("Connected to power meter at {}", address);
        self.stream = Some(BufReader::new(stream));
        self.address = Some(address.to_string());
        self.dirty = false;
        Ok(())
    }

    /// Close the session. Safe to call when already disconnected.
    pub async fn disconnect(&mut self) {
        if let Some(mut stream) = self.stream.take() {
            if let Err(e) = stream.get_mut().shutdown().await {
                tracing::debug!("Power meter shutdown: {}", e);
            }
            if let Some(address) = self.address.take() {
                tracing::info!("Disconnected power meter at {}", address);
            }
        }
    }

    /// Whether a TCP session is open.
    pub fn is_connected(&self) -> bool {
        self.stream.is_some()
    }

    /// Query voltage, current, power and accumulated energy.
    pub async fn query(&mut self) -> AppResult<PowerReading> {
        let io_timeout = self.timeouts.io;
        let stream = self
            .stream
            .as_mut()
            .ok_or_else(|| DaqError::Connection("Power meter is not connected".to_string()))?;

        // Drop leftovers of earlier replies, both buffered and still on the socket
        let dirty = self.dirty;
        let buffered = stream.buffer().len();
        stream.consume(buffered);
        let quiet = dirty.then_some(io_timeout);
        let discarded = buffered + discard_stale(stream.get_mut(), quiet, "Power meter").await?;
        if discarded > 0 {
            tracing::warn!("Discarded {} stale bytes from power meter", discarded);
        }

        self.dirty = true;
        tracing::debug!("Power meter query: {:?}", MEASURE_COMMAND.trim());
        timeout(io_timeout, stream.get_mut().write_all(MEASURE_COMMAND.as_bytes()))
            .await
            .map_err(|_| DaqError::Protocol("Timeout writing power meter query".to_string()))?
            .map_err(|e| DaqError::Connection(format!("Power meter write failed: {}", e)))?;

        let mut raw = read_line_within(stream, io_timeout).await?;
        if dirty {
            // The meter answers in order: the last line before it goes quiet is ours
            while let Some(next) = next_line_within(stream, io_timeout).await? {
                tracing::warn!("Discarded a late power meter reply");
                raw = next;
            }
        }
        self.dirty = false;

        if !raw.is_ascii() {
            return Err(DaqError::Parse(format!(
                "Non-ASCII response: {}",
                String::from_utf8_lossy(&raw)
            )));
        }
        let response = String::from_utf8_lossy(&raw);
        tracing::debug!("Power meter response: {:?}", response.trim());
        PowerReading::parse(&response)
    }
}

async fn read_line_within(
    stream: &mut BufReader<TcpStream>,
    io_timeout: Duration,
) -> AppResult<Vec<u8>> {
    let mut raw = Vec::new();
    match timeout(io_timeout, stream.read_until(b'\n', &mut raw)).await {
        Ok(Ok(0)) => Err(DaqError::Connection(
            "Power meter closed the connection".to_string(),
        )),
        Ok(Ok(_)) => Ok(raw),
        Ok(Err(e)) => Err(DaqError::Connection(format!("Power meter read failed: {}", e))),
        Err(_) => Err(DaqError::Protocol(format!(
            "Timeout waiting for power meter response after {:?}",
            io_timeout
        ))),
    }
}

/// Read one more line if the meter starts sending within `quiet`.
async fn next_line_within(
    stream: &mut BufReader<TcpStream>,
    quiet: Duration,
) -> AppResult<Option<Vec<u8>>> {
    let available = match timeout(quiet, stream.fill_buf()).await {
        Err(_) => return Ok(None),
        Ok(Ok(buf)) => buf.len(),
        Ok(Err(e)) => {
            return Err(DaqError::Connection(format!("Power meter read failed: {}", e)))
        }
    };
    if available == 0 {
        return Err(DaqError::Connection(
            "Power meter closed the connection".to_string(),
        ));
    }
    read_line_within(stream, quiet).await.map(Some)
}
