//! # Station DAQ Core Library
//!
//! Acquisition engine for a test bench of up to six stations. Each station pairs a
//! multi-channel temperature recorder with a DC power meter, both on the network. While a
//! station runs, a dedicated task polls both devices at a fixed interval, appends a row to
//! the session CSV file, keeps a rolling in-memory history for charting and range
//! averages, and notifies the operator surface through an event sink.
//!
//! ## Crate Structure
//!
//! - **`channels`**: Parsing of channel selectors such as `"1-3,5"`.
//! - **`config`**: Figment-based settings (`config/station_daq.toml` plus `STATION_DAQ_*`
//!   environment overrides).
//! - **`data`**: The `Sample` model, the bounded `SampleBuffer`, range-average reports and
//!   the append-only `CsvSink`.
//! - **`error`**: The crate-wide `DaqError` enum and its `ErrorKind` classification.
//! - **`hardware`**: Async TCP clients for the temperature recorder and the power meter,
//!   plus loopback mock devices.
//! - **`station`**: Station identifiers, the per-station controller and its acquisition
//!   loop, the `Supervisor` arena, display state and the `EventSink` interface.
//! - **`tracing_setup`**: Structured logging initialization.

pub mod channels;
pub mod config;
pub mod data;
pub mod error;
pub mod hardware;
pub mod station;
pub mod tracing_setup;
