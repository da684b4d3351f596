//! Device clients for the two instruments of a station.
//!
//! - [`temperature::TemperatureClient`] talks the binary Modbus-TCP style framing of the
//!   paperless temperature recorder.
//! - [`power_meter::PowerMeterClient`] talks the ASCII query protocol of the DC power meter.
//! - [`mock`] provides loopback TCP stand-ins for both, for tests and bench dry-runs.
//!
//! Both clients own their socket exclusively. They are driven by a single acquisition
//! task, so every operation takes `&mut self` and no internal locking is needed.

pub mod mock;
pub mod power_meter;
pub mod temperature;

pub use power_meter::{PowerMeterClient, PowerReading};
pub use temperature::TemperatureClient;

use crate::error::{AppResult, DaqError};
use std::io::ErrorKind;
use std::time::Duration;
use tokio::io::AsyncReadExt;
use tokio::net::TcpStream;
use tokio::time::timeout;

/// Default connect timeout in milliseconds
pub const DEFAULT_CONNECT_TIMEOUT_MS: u64 = 5000;

/// Default per-operation read/write timeout in milliseconds
pub const DEFAULT_IO_TIMEOUT_MS: u64 = 2000;

/// Upper bound on unsolicited bytes discarded before a request.
const MAX_STALE_BYTES: usize = 16 * 1024;

/// Timeouts applied to every device socket.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IoTimeouts {
    /// Bound on establishing the TCP session
    pub connect: Duration,
    /// Bound on each read or write of a request/response exchange
    pub io: Duration,
}

impl Default for IoTimeouts {
    fn default() -> Self {
        Self {
            connect: Duration::from_millis(DEFAULT_CONNECT_TIMEOUT_MS),
            io: Duration::from_millis(DEFAULT_IO_TIMEOUT_MS),
        }
    }
}

/// Open a TCP session to `address` (`host:port`) within the connect timeout.
pub(crate) async fn open_stream(address: &str, connect_timeout: Duration) -> AppResult<TcpStream> {
    let stream = timeout(connect_timeout, TcpStream::connect(address))
        .await
        .map_err(|_| DaqError::Connection(format!("Connection timeout to {}", address)))?
        .map_err(|e| DaqError::Connection(format!("Failed to connect to {}: {}", address, e)))?;

    // Disable Nagle's algorithm, requests are tiny and latency-bound
    stream.set_nodelay(true)?;

    Ok(stream)
}

/// Discard bytes that arrived while no request was waiting for them.
///
/// Everything already queued on the socket is dropped. When `quiet` is given, the
/// previous exchange did not complete and its reply may still be on the wire, so the
/// socket is also read until it stays silent for that long.
///
/// Returns the number of bytes discarded.
pub(crate) async fn discard_stale(
    stream: &mut TcpStream,
    quiet: Option<Duration>,
    device: &str,
) -> AppResult<usize> {
    let mut scratch = [0u8; 512];
    let mut discarded = 0;

    loop {
        match stream.try_read(&mut scratch) {
            Ok(0) => return Err(DaqError::Connection(format!("{} closed the connection", device))),
            Ok(n) => discarded += n,
            Err(e) if e.kind() == ErrorKind::WouldBlock => break,
            Err(e) => return Err(DaqError::Connection(format!("{} read failed: {}", device, e))),
        }
        check_stale_limit(discarded, device)?;
    }

    if let Some(quiet) = quiet {
        loop {
            match timeout(quiet, stream.read(&mut scratch)).await {
                Err(_) => break,
                Ok(Ok(0)) => {
                    return Err(DaqError::Connection(format!("{} closed the connection", device)))
                }
                Ok(Ok(n)) => discarded += n,
                Ok(Err(e)) => {
                    return Err(DaqError::Connection(format!("{} read failed: {}", device, e)))
                }
            }
            check_stale_limit(discarded, device)?;
        }
    }

    Ok(discarded)
}

fn check_stale_limit(discarded: usize, device: &str) -> AppResult<()> {
    if discarded > MAX_STALE_BYTES {
        return Err(DaqError::Protocol(format!(
            "{} keeps sending unsolicited data ({} bytes discarded)",
            device, discarded
        )));
    }
    Ok(())
}
