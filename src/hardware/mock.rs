//! Mock Hardware Implementations
//!
//! Loopback TCP stand-ins for the two station instruments, for testing without
//! physical hardware and for dry-running a bench configuration.
//!
//! # Available Mocks
//!
//! - `MockTemperatureDevice` - answers every 12-byte request with a configurable frame
//! - `MockPowerMeter` - answers every command line with a configurable ASCII reply
//!
//! Both bind to `127.0.0.1` on an ephemeral port, serve any number of connections,
//! count the ones still open and record what they received. The server task is aborted when the mock is dropped.

use crate::hardware::temperature::REQUEST_LEN;
use std::io;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

/// Build a recorder response frame carrying `temperatures` (°C, 0.1 resolution).
pub fn bank_response(temperatures: &[f64]) -> Vec<u8> {
    let byte_count = temperatures.len() * 2;
    let length = (3 + byte_count) as u16;
    let mut frame = vec![0, 0, 0, 0];
    frame.extend_from_slice(&length.to_be_bytes());
    frame.push(1); // unit
    frame.push(4); // function
    frame.push(byte_count as u8);
    for t in temperatures {
        let raw = (t * 10.0).round() as i16;
        frame.extend_from_slice(&raw.to_be_bytes());
    }
    frame
}

// =============================================================================
// MockTemperatureDevice
// =============================================================================

/// Simulated temperature recorder.
pub struct MockTemperatureDevice {
    address: String,
    response: Arc<Mutex<Option<Vec<u8>>>>,
    requests: Arc<Mutex<Vec<Vec<u8>>>>,
    connections: Arc<AtomicUsize>,
    task: JoinHandle<()>,
}

impl MockTemperatureDevice {
    /// Start a recorder that replies to every request with `response`.
    pub async fn spawn(response: Vec<u8>) -> io::Result<Self> {
        Self::start(Some(response)).await
    }

    /// Start a recorder that accepts requests but never replies.
    pub async fn spawn_silent() -> io::Result<Self> {
        Self::start(None).await
    }

    async fn start(response: Option<Vec<u8>>) -> io::Result<Self> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let address = listener.local_addr()?.to_string();
        let response = Arc::new(Mutex::new(response));
        let requests = Arc::new(Mutex::new(Vec::new()));
        let connections = Arc::new(AtomicUsize::new(0));

        let task = {
            let response = Arc::clone(&response);
            let requests = Arc::clone(&requests);
            let connections = Arc::clone(&connections);
            tokio::spawn(async move {
                while let Ok((socket, _)) = listener.accept().await {
                    let response = Arc::clone(&response);
                    let requests = Arc::clone(&requests);
                    let connections = Arc::clone(&connections);
                    connections.fetch_add(1, Ordering::SeqCst);
                    tokio::spawn(async move {
                        serve_recorder(socket, response, requests).await;
                        connections.fetch_sub(1, Ordering::SeqCst);
                    });
                }
            })
        };

        Ok(Self {
            address,
            response,
            requests,
            connections,
            task,
        })
    }

    /// `host:port` the mock listens on.
    pub fn address(&self) -> String {
        self.address.clone()
    }

    /// Replace the reply frame, `None` silences the device.
    pub async fn set_response(&self, response: Option<Vec<u8>>) {
        *self.response.lock().await = response;
    }

    /// Requests received so far, in order.
    pub async fn requests(&self) -> Vec<Vec<u8>> {
        self.requests.lock().await.clone()
    }

    /// Client connections that have not been closed yet.
    pub fn open_connections(&self) -> usize {
        self.connections.load(Ordering::SeqCst)
    }
}

impl Drop for MockTemperatureDevice {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn serve_recorder(
    mut socket: TcpStream,
    response: Arc<Mutex<Option<Vec<u8>>>>,
    requests: Arc<Mutex<Vec<Vec<u8>>>>,
) {
    let mut request = [0u8; REQUEST_LEN];
    while socket.read_exact(&mut request).await.is_ok() {
        requests.lock().await.push(request.to_vec());
        let reply = response.lock().await.clone();
        if let Some(reply) = reply {
            if socket.write_all(&reply).await.is_err() {
                break;
            }
        }
    }
}

// =============================================================================
// MockPowerMeter
// =============================================================================

/// Simulated DC power meter.
pub struct MockPowerMeter {
    address: String,
    reply: Arc<Mutex<String>>,
    commands: Arc<Mutex<Vec<String>>>,
    connections: Arc<AtomicUsize>,
    task: JoinHandle<()>,
}

impl MockPowerMeter {
    /// Start a meter that answers every command line with `reply` (newline appended).
    pub async fn spawn(reply: &str) -> io::Result<Self> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let address = listener.local_addr()?.to_string();
        let reply = Arc::new(Mutex::new(reply.to_string()));
        let commands = Arc::new(Mutex::new(Vec::new()));
        let connections = Arc::new(AtomicUsize::new(0));

        let task = {
            let reply = Arc::clone(&reply);
            let commands = Arc::clone(&commands);
            let connections = Arc::clone(&connections);
            tokio::spawn(async move {
                while let Ok((socket, _)) = listener.accept().await {
                    let reply = Arc::clone(&reply);
                    let commands = Arc::clone(&commands);
                    let connections = Arc::clone(&connections);
                    connections.fetch_add(1, Ordering::SeqCst);
                    tokio::spawn(async move {
                        serve_meter(socket, reply, commands).await;
                        connections.fetch_sub(1, Ordering::SeqCst);
                    });
                }
            })
        };

        Ok(Self {
            address,
            reply,
            commands,
            connections,
            task,
        })
    }

    /// `host:port` the mock listens on.
    pub fn address(&self) -> String {
        self.address.clone()
    }

    /// Replace the reply line.
    pub async fn set_reply(&self, reply: &str) {
        *self.reply.lock().await = reply.to_string();
    }

    /// Command lines received so far, terminators included.
    pub async fn commands(&self) -> Vec<String> {
        self.commands.lock().await.clone()
    }

    /// Client connections that have not been closed yet.
    pub fn open_connections(&self) -> usize {
        self.connections.load(Ordering::SeqCst)
    }
}

impl Drop for MockPowerMeter {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn serve_meter(
    socket: TcpStream,
    reply: Arc<Mutex<String>>,
    commands: Arc<Mutex<Vec<String>>>,
) {
    let mut reader = BufReader::new(socket);
    loop {
        let mut line = String::new();
        match reader.read_line(&mut line).await {
            Ok(0) | Err(_) => break,
            Ok(_) => {}
        }
        commands.lock().await.push(line);
        let answer = format!("{}\n", reply.lock().await);
        if reader.get_mut().write_all(answer.as_bytes()).await.is_err() {
            break;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bank_response_layout() {
        let frame = bank_response(&[25.3, -0.1]);
        assert_eq!(frame, vec![0, 0, 0, 0, 0, 7, 1, 4, 4, 0x00, 0xFD, 0xFF, 0xFF]);
    }
}
