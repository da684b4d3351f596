//! Paperless temperature recorder client (Modbus-TCP style framing)
//!
//! Protocol Overview:
//! - Transport: TCP, default port 502
//! - Request: fixed 12-byte frame
//!   `[txn id u16][protocol id u16][length u16 = 6][unit u8][function u8][start u16][count u16]`
//! - Response: 9-byte header `[txn u16][protocol u16][length u16][unit u8][function u8][byte count u8]`
//!   followed by big-endian signed 16-bit words, one per channel, in units of 0.1 °C
//! - Exception responses set the high bit of the function byte; the byte count slot then
//!   carries the exception code
//!
//! The recorder always reports its full 18-channel bank. Picking the operator's channels
//! out of the bank is done by the station, not here.
//!
//! Responses are read frame-by-frame: the header first, then exactly the number of bytes
//! announced by the length field, each read bounded by the I/O timeout.
//!
//! Every request carries transaction id 0, so a reply cannot be matched to its request
//! by id. Bytes queued before a request are discarded. After an exchange that did not
//! complete, the socket is drained until quiet before the next request, and every frame
//! that arrives within the I/O timeout after the first is read: the last one answers the
//! request just sent. Headers are checked against the request's unit and function, so a
//! stream left mid-frame is rejected rather than decoded.

use crate::error::{AppResult, DaqError};
use crate::hardware::{discard_stale, open_stream, IoTimeouts};
use bytes::{BufMut, Bytes, BytesMut};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;

/// Size of the fixed request frame.
pub const REQUEST_LEN: usize = 12;

/// Size of the response header stripped before decoding.
pub const RESPONSE_HEADER_LEN: usize = 9;

/// Largest response accepted from the device.
pub const MAX_RESPONSE_LEN: usize = 1024;

/// Number of channels in the recorder's bank.
pub const DEVICE_CHANNEL_COUNT: usize = 18;

/// Unit address of the recorder.
pub const UNIT_ADDRESS: u8 = 1;

/// Read Input Registers.
pub const FUNCTION_READ_INPUT: u8 = 4;

/// First measurement register (hex).
pub const BANK_START_REGISTER: &str = "0064";

/// Register count covering the whole bank (hex, 18 registers).
pub const BANK_REGISTER_COUNT: &str = "0012";

// Transaction id, protocol id and length field precede the counted part of a frame.
const MBAP_PREFIX_LEN: usize = 6;
const REQUEST_REMAINING_LEN: u16 = 6;

/// Client for the temperature recorder.
pub struct TemperatureClient {
    stream: Option<TcpStream>,
    address: Option<String>,
    timeouts: IoTimeouts,
    // Set while an exchange is in flight; still set afterwards if it did not complete
    dirty: bool,
}

impl TemperatureClient {
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
    ///
    /// # Errors
    /// `DaqError::Connection` if the device cannot be reached within the connect timeout.
    pub async fn connect(&mut self, address: &str) -> AppResult<()> {
        self.disconnect().await;
        let stream = open_stream(address, self.timeouts.connect).await?;
        tracing::info!("Connected to temperature recorder at {}", address);
        self.stream = Some(stream);
        self.address = Some(address.to_string());
        self.dirty = false;
        Ok(())
    }

    /// Close the session. Safe to call when already disconnected.
    pub async fn disconnect(&mut self) {
        if let Some(mut stream) = self.stream.take() {
            if let Err(e) = stream.shutdown().await {
                tracing::debug!("Temperature recorder shutdown: {}", e);
            }
            if let Some(address) = self.address.take() {
                tracing::info!("Disconnected temperature recorder at {}", address);
            }
        }
    }

    /// Whether a TCP session is open.
    pub fn is_connected(&self) -> bool {
        self.stream.is_some()
    }

    /// Send a register read request and return the raw response frame.
    ///
    /// # Arguments
    /// * `unit_address` - Modbus unit id of the recorder
    /// * `function_code` - Modbus function (4 = read input registers)
    /// * `start_register_hex` - First register as exactly four hex digits, e.g. `"0064"`
    /// * `count_hex` - Register count as exactly four hex digits, e.g. `"0012"`
    pub async fn read_channels(
        &mut self,
        unit_address: u8,
        function_code: u8,
        start_register_hex: &str,
        count_hex: &str,
    ) -> AppResult<Bytes> {
        let request = build_request(unit_address, function_code, start_register_hex, count_hex)?;
        let io_timeout = self.timeouts.io;
        let stream = self.stream.as_mut().ok_or_else(|| {
            DaqError::Connection("Temperature recorder is not connected".to_string())
        })?;

        let dirty = self.dirty;
        let discarded =
            discard_stale(stream, dirty.then_some(io_timeout), "Temperature recorder").await?;
        if discarded > 0 {
            tracing::warn!("Discarded {} stale bytes from temperature recorder", discarded);
        }

        self.dirty = true;
        tracing::debug!("Recorder request: {:02X?}", request.as_ref());
        timeout(io_timeout, stream.write_all(&request))
            .await
            .map_err(|_| DaqError::Protocol("Timeout writing recorder request".to_string()))?
            .map_err(|e| DaqError::Connection(format!("Recorder write failed: {}", e)))?;

        let mut frame = read_frame(stream, io_timeout, unit_address, function_code).await?;
        if dirty {
            // A reply owed to an earlier request can still come first. The recorder
            // answers in order, so the last frame before the line goes quiet is ours.
            while let Some(next) =
                next_frame_within(stream, io_timeout, unit_address, function_code).await?
            {
                tracing::warn!("Discarded a late recorder reply");
                frame = next;
            }
        }
        self.dirty = false;
        tracing::debug!("Recorder response: {} bytes", frame.len());
        Ok(frame)
    }

    /// Read and decode the recorder's full channel bank.
    pub async fn read_bank(&mut self) -> AppResult<Vec<f64>> {
        let response = self
            .read_channels(
                UNIT_ADDRESS,
                FUNCTION_READ_INPUT,
                BANK_START_REGISTER,
                BANK_REGISTER_COUNT,
            )
            .await?;
        Self::decode(&response)
    }

    /// Decode a response frame into temperatures in degrees Celsius.
    ///
    /// # Errors
    /// `DaqError::Protocol` if the frame is shorter than the header or the payload
    /// has an odd number of bytes.
    pub fn decode(response: &[u8]) -> AppResult<Vec<f64>> {
        if response.len() < RESPONSE_HEADER_LEN {
            return Err(DaqError::Protocol(format!(
                "Invalid response length: {} bytes, header needs {}",
                response.len(),
                RESPONSE_HEADER_LEN
            )));
        }

        let payload = &response[RESPONSE_HEADER_LEN..];
        if payload.len() % 2 != 0 {
            return Err(DaqError::Protocol(format!(
                "Invalid data length: {} payload bytes, must be even",
                payload.len()
            )));
        }

        Ok(payload
            .chunks_exact(2)
            .map(|word| f64::from(i16::from_be_bytes([word[0], word[1]])) / 10.0)
            .collect())
    }
}

/// Build the fixed 12-byte read request.
pub fn build_request(
    unit_address: u8,
    function_code: u8,
    start_register_hex: &str,
    count_hex: &str,
) -> AppResult<Bytes> {
    let start = parse_register_word(start_register_hex)?;
    let count = parse_register_word(count_hex)?;

    let mut frame = BytesMut::with_capacity(REQUEST_LEN);
    frame.put_u16(0); // transaction id
    frame.put_u16(0); // protocol id
    frame.put_u16(REQUEST_REMAINING_LEN);
    frame.put_u8(unit_address);
    frame.put_u8(function_code);
    frame.put_u16(start);
    frame.put_u16(count);
    Ok(frame.freeze())
}

fn parse_register_word(text: &str) -> AppResult<u16> {
    if text.len() != 4 || !text.chars().all(|c| c.is_ascii_hexdigit()) {
        return Err(DaqError::Config(format!(
            "Register word must be four hex digits, got '{}'",
            text
        )));
    }
    u16::from_str_radix(text, 16)
        .map_err(|e| DaqError::Config(format!("Invalid register word '{}': {}", text, e)))
}

async fn read_frame(
    stream: &mut TcpStream,
    io_timeout: Duration,
    unit_address: u8,
    function_code: u8,
) -> AppResult<Bytes> {
    let mut header = [0u8; RESPONSE_HEADER_LEN];
    read_exact_within(stream, &mut header, io_timeout).await?;

    let function = header[7];
    if header[2..4] != [0, 0] || header[6] != unit_address || function & 0x7F != function_code {
        return Err(DaqError::Protocol(format!(
            "Unexpected recorder header {:02X?}",
            header
        )));
    }
    if function & 0x80 != 0 {
        return Err(DaqError::Protocol(format!(
            "Recorder exception {:#04X} for function {:#04X}",
            header[8],
            function & 0x7F
        )));
    }

    let length = usize::from(u16::from_be_bytes([header[4], header[5]]));
    let total = MBAP_PREFIX_LEN + length;
    if !(RESPONSE_HEADER_LEN..=MAX_RESPONSE_LEN).contains(&total) {
        return Err(DaqError::Protocol(format!(
            "Recorder announced a {} byte frame, expected {}-{}",
            total, RESPONSE_HEADER_LEN, MAX_RESPONSE_LEN
        )));
    }
    if usize::from(header[8]) != total - RESPONSE_HEADER_LEN {
        return Err(DaqError::Protocol(format!(
            "Recorder byte count {} does not match a {} byte frame",
            header[8], total
        )));
    }

    let mut frame = BytesMut::with_capacity(total);
    frame.extend_from_slice(&header);
    frame.resize(total, 0);
    read_exact_within(stream, &mut frame[RESPONSE_HEADER_LEN..], io_timeout).await?;
    Ok(frame.freeze())
}

/// Read one more frame if the recorder starts sending within `quiet`.
async fn next_frame_within(
    stream: &mut TcpStream,
    quiet: Duration,
    unit_address: u8,
    function_code: u8,
) -> AppResult<Option<Bytes>> {
    let mut first = [0u8; 1];
    match timeout(quiet, stream.peek(&mut first)).await {
        Err(_) => Ok(None),
        Ok(Ok(0)) => Err(DaqError::Connection(
            "Recorder closed the connection".to_string(),
        )),
        Ok(Ok(_)) => read_frame(stream, quiet, unit_address, function_code)
            .await
            .map(Some),
        Ok(Err(e)) => Err(DaqError::Connection(format!("Recorder read failed: {}", e))),
    }
}

async fn read_exact_within(
    stream: &mut TcpStream,
    buf: &mut [u8],
    io_timeout: Duration,
) -> AppResult<()> {
    match timeout(io_timeout, stream.read_exact(buf)).await {
        Ok(Ok(_)) => Ok(()),
        Ok(Err(e)) if e.kind() == std::io::ErrorKind::UnexpectedEof => Err(DaqError::Connection(
            "Recorder closed the connection mid-frame".to_string(),
        )),
        Ok(Err(e)) => Err(DaqError::Connection(format!("Recorder read failed: {}", e))),
        Err(_) => Err(DaqError::Protocol(format!(
            "Timeout waiting for recorder response after {:?}",
            io_timeout
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hardware::mock::{bank_response, MockTemperatureDevice};

    /// Recorder on one connection answering request `n` with a one-channel bank of
    /// `n` °C. The first answer is held back for `delay`; with `split` its first five
    /// bytes go out immediately and the rest after the delay.
    async fn spawn_late_recorder(delay: Duration, split: bool) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap().to_string();
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut request = [0u8; REQUEST_LEN];
            let mut n = 0u32;
            while socket.read_exact(&mut request).await.is_ok() {
                n += 1;
                let reply = bank_response(&[f64::from(n)]);
                let mut rest = &reply[..];
                if n == 1 {
                    if split {
                        let _ = socket.write_all(&reply[..5]).await;
                        rest = &reply[5..];
                    }
                    tokio::time::sleep(delay).await;
                }
                if socket.write_all(rest).await.is_err() {
                    break;
                }
            }
        });
        address
    }

    fn fast_timeouts() -> IoTimeouts {
        IoTimeouts {
            connect: Duration::from_secs(1),
            io: Duration::from_millis(100),
        }
    }

    fn frame_with_payload(payload: &[u8]) -> Vec<u8> {
        let mut frame = vec![0, 0, 0, 0, 0, (3 + payload.len()) as u8, 1, 4, payload.len() as u8];
        frame.extend_from_slice(payload);
        frame
    }

    #[test]
    fn test_build_request_layout() {
        let request = build_request(1, 4, "0064", "0012").unwrap();
        assert_eq!(
            request.as_ref(),
            &[0x00, 0x00, 0x00, 0x00, 0x00, 0x06, 0x01, 0x04, 0x00, 0x64, 0x00, 0x12]
        );
    }

    #[test]
    fn test_build_request_rejects_bad_register_words() {
        assert!(matches!(build_request(1, 4, "64", "0012"), Err(DaqError::Config(_))));
        assert!(matches!(build_request(1, 4, "0064", "00G2"), Err(DaqError::Config(_))));
    }

    #[test]
    fn test_decode_signed_words() {
        // 25.3, -0.1, 0.0, -40.0
        let frame = frame_with_payload(&[0x00, 0xFD, 0xFF, 0xFF, 0x00, 0x00, 0xFE, 0x70]);
        let temps = TemperatureClient::decode(&frame).unwrap();
        assert_eq!(temps, vec![25.3, -0.1, 0.0, -40.0]);
    }

    #[test]
    fn test_decode_returns_one_value_per_word() {
        let payload: Vec<u8> = (0..18u16).flat_map(|i| (i * 10).to_be_bytes()).collect();
        let temps = TemperatureClient::decode(&frame_with_payload(&payload)).unwrap();
        assert_eq!(temps.len(), 18);
        assert_eq!(temps[17], 17.0);
    }

    #[test]
    fn test_decode_rejects_short_and_odd() {
        assert!(matches!(
            TemperatureClient::decode(&[0, 0, 0, 0, 0, 3, 1, 4]),
            Err(DaqError::Protocol(_))
        ));
        assert!(matches!(
            TemperatureClient::decode(&frame_with_payload(&[0x01, 0x02, 0x03])),
            Err(DaqError::Protocol(_))
        ));
        // Header only is a valid, empty bank
        assert!(TemperatureClient::decode(&frame_with_payload(&[])).unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_read_bank_against_mock() {
        let temps: Vec<f64> = (0..18).map(|i| 20.0 + f64::from(i) / 10.0).collect();
        let device = MockTemperatureDevice::spawn(bank_response(&temps)).await.unwrap();

        let mut client = TemperatureClient::new(IoTimeouts::default());
        client.connect(&device.address()).await.unwrap();
        let bank = client.read_bank().await.unwrap();
        assert_eq!(bank.len(), DEVICE_CHANNEL_COUNT);
        assert_eq!(bank[0], 20.0);
        assert_eq!(bank[5], 20.5);

        // The device saw exactly the documented request
        let requests = device.requests().await;
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0], build_request(1, 4, "0064", "0012").unwrap().to_vec());

        client.disconnect().await;
        client.disconnect().await;
        assert!(!client.is_connected());
    }

    #[tokio::test]
    async fn test_exception_response_is_protocol_error() {
        let device = MockTemperatureDevice::spawn(vec![0, 0, 0, 0, 0, 3, 1, 0x84, 0x02])
            .await
            .unwrap();
        let mut client = TemperatureClient::new(IoTimeouts::default());
        client.connect(&device.address()).await.unwrap();
        let err = client.read_bank().await.unwrap_err();
        assert!(matches!(err, DaqError::Protocol(ref msg) if msg.contains("0x02")));
    }

    #[tokio::test]
    async fn test_silent_device_times_out() {
        let device = MockTemperatureDevice::spawn_silent().await.unwrap();
        let mut client = TemperatureClient::new(IoTimeouts {
            connect: Duration::from_secs(1),
            io: Duration::from_millis(100),
        });
        client.connect(&device.address()).await.unwrap();
        let err = client.read_bank().await.unwrap_err();
        assert!(matches!(err, DaqError::Protocol(_)));
    }

    /// Five back-to-back reads against [`spawn_late_recorder`]. The first times out;
    /// any later read that succeeds must carry its own request number.
    async fn assert_replies_stay_aligned(client: &mut TemperatureClient) {
        assert!(matches!(client.read_bank().await, Err(DaqError::Protocol(_))));
        for n in 2..=5u32 {
            match client.read_bank().await {
                Ok(bank) => assert_eq!(bank, vec![f64::from(n)], "reply to request {n}"),
                Err(e) => assert!(n < 4, "request {n} failed: {e}"),
            }
        }
    }

    #[tokio::test]
    async fn test_late_reply_is_not_taken_for_the_next_one() {
        let address = spawn_late_recorder(Duration::from_millis(300), false).await;
        let mut client = TemperatureClient::new(fast_timeouts());
        client.connect(&address).await.unwrap();
        assert_replies_stay_aligned(&mut client).await;
    }

    #[tokio::test]
    async fn test_partial_frame_does_not_desync_framing() {
        let address = spawn_late_recorder(Duration::from_millis(300), true).await;
        let mut client = TemperatureClient::new(fast_timeouts());
        client.connect(&address).await.unwrap();
        assert_replies_stay_aligned(&mut client).await;
    }

    #[tokio::test]
    async fn test_frame_for_another_unit_is_rejected() {
        let mut reply = bank_response(&[21.0]);
        reply[6] = 7;
        let device = MockTemperatureDevice::spawn(reply).await.unwrap();
        let mut client = TemperatureClient::new(IoTimeouts::default());
        client.connect(&device.address()).await.unwrap();
        let err = client.read_bank().await.unwrap_err();
        assert!(matches!(err, DaqError::Protocol(ref msg) if msg.contains("header")));
    }

    #[tokio::test]
    async fn test_read_without_connect_fails() {
        let mut client = TemperatureClient::new(IoTimeouts::default());
        assert!(matches!(client.read_bank().await, Err(DaqError::Connection(_))));
    }
}
