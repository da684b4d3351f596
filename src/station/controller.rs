//! Per-station lifecycle and acquisition loop.
//!
//! A [`StationController`] owns everything belonging to one station: the sample buffer,
//! the latest-sample channel, the display state and, while running, the acquisition
//! task. The task in turn exclusively owns both device clients and the CSV sink, so
//! sockets and the file handle are released whenever the task ends, however it ends.
//!
//! # State machine
//!
//! ```text
//!   Idle --start()--> Running --stop()--> Idle
//!                        |
//!                        +--fatal loop error--> Idle (forced stop)
//! ```
//!
//! # Cancellation
//!
//! `stop()` clears the running flag and wakes the loop if it is sleeping. A cycle that
//! is already talking to a device finishes first; each socket operation is bounded by
//! the I/O timeout, so the loop converges within one cycle's worth of I/O. If it has
//! not ended within the stop timeout the task is aborted, which drops its sockets and
//! file handle.

use crate::channels::ChannelSet;
use crate::config::StationConfig;
use crate::data::{
    retention_horizon, AverageReport, CsvSink, RangeAverage, Sample, SampleBuffer,
};
use crate::error::{AppResult, DaqError, ErrorKind};
use crate::hardware::temperature::DEVICE_CHANNEL_COUNT;
use crate::hardware::{IoTimeouts, PowerMeterClient, PowerReading, TemperatureClient};
use crate::station::display::{DisplayMode, DisplayState, DisplayWindow};
use crate::station::events::EventSink;
use crate::station::StationId;
use chrono::{DateTime, Local};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Mutex, Notify, RwLock};
use tokio::task::JoinHandle;
use tracing::Instrument;

/// Lifecycle state of a station.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StationState {
    /// No session: devices disconnected, buffer empty
    Idle,
    /// Acquisition task polling the devices
    Running,
}

struct Session {
    task: JoinHandle<()>,
    wake: Arc<Notify>,
    csv_path: PathBuf,
    channels: ChannelSet,
}

/// Owner of one station's device pair, buffer and sink.
pub struct StationController {
    id: StationId,
    timeouts: IoTimeouts,
    stop_timeout: Duration,
    events: Arc<dyn EventSink>,
    buffer: Arc<RwLock<SampleBuffer>>,
    latest: Arc<watch::Sender<Option<Sample>>>,
    display: Mutex<DisplayState>,
    running: Arc<AtomicBool>,
    session: Mutex<Option<Session>>,
}

impl StationController {
    /// Create an idle controller.
    pub fn new(
        id: StationId,
        timeouts: IoTimeouts,
        stop_timeout: Duration,
        events: Arc<dyn EventSink>,
    ) -> Self {
        let (latest, _) = watch::channel(None);
        Self {
            id,
            timeouts,
            stop_timeout,
            events,
            buffer: Arc::new(RwLock::new(SampleBuffer::new())),
            latest: Arc::new(latest),
            display: Mutex::new(DisplayState::default()),
            running: Arc::new(AtomicBool::new(false)),
            session: Mutex::new(None),
        }
    }

    /// Station this controller owns.
    pub fn id(&self) -> StationId {
        self.id
    }

    /// Current lifecycle state.
    pub fn state(&self) -> StationState {
        if self.running.load(Ordering::Acquire) {
            StationState::Running
        } else {
            StationState::Idle
        }
    }

    /// Whether the operator surface should show this station as collecting.
    pub fn is_active(&self) -> bool {
        self.state() == StationState::Running
    }

    /// Start collecting with `config`.
    ///
    /// # Errors
    /// - `DaqError::AlreadyRunning` if the station is collecting
    /// - `DaqError::Config` for a missing save directory or malformed channel selector
    /// - `DaqError::Connection` if either device is unreachable
    /// - `DaqError::Io` if the session file cannot be created
    ///
    /// On error the station stays idle and no connection is left open.
    pub async fn start(&self, config: &StationConfig) -> AppResult<()> {
        let mut session = self.session.lock().await;
        if self.running.load(Ordering::Acquire) {
            return Err(DaqError::AlreadyRunning(self.id));
        }
        if let Some(finished) = session.take() {
            // Left behind by a loop that stopped itself after a fatal error
            if let Err(e) = finished.task.await {
                tracing::warn!(
                    "{}: previous acquisition task ended abnormally: {}",
                    self.id,
                    e
                );
            }
        }

        let channels = config.validate()?;
        if channels.max_channel().unwrap_or(0) as usize > DEVICE_CHANNEL_COUNT {
            tracing::warn!(
                "{}: channels above {} are not provided by the recorder and will be skipped",
                self.id,
                DEVICE_CHANNEL_COUNT
            );
        }

        let addresses = config.addresses();
        let mut temperature = TemperatureClient::new(self.timeouts);
        let mut power_meter = PowerMeterClient::new(self.timeouts);
        if let Err(e) = temperature.connect(&addresses.temperature).await {
            tracing::warn!("{}: {}", self.id, e);
            return Err(e);
        }
        if let Err(e) = power_meter.connect(&addresses.power_meter).await {
            tracing::warn!("{}: {}", self.id, e);
            temperature.disconnect().await;
            return Err(e);
        }

        let started = Local::now();
        let sink = match CsvSink::create(config.save_path(), self.id, started, &channels) {
            Ok(sink) => sink,
            Err(e) => {
                temperature.disconnect().await;
                power_meter.disconnect().await;
                return Err(e);
            }
        };
        let csv_path = sink.path().to_path_buf();

        self.buffer.write().await.clear();
        self.latest.send_replace(None);
        *self.display.lock().await = DisplayState::new(config.display_window);

        let wake = Arc::new(Notify::new());
        self.running.store(true, Ordering::Release);
        let acquisition = AcquisitionLoop {
            id: self.id,
            channels: channels.clone(),
            interval: config.interval.as_duration(),
            temperature,
            power_meter,
            sink: Some(sink),
            buffer: Arc::clone(&self.buffer),
            latest: Arc::clone(&self.latest),
            events: Arc::clone(&self.events),
            running: Arc::clone(&self.running),
            wake: Arc::clone(&wake),
        };
        let span = tracing::info_span!("station", id = self.id.number());
        let task = tokio::spawn(acquisition.run().instrument(span));

        *session = Some(Session {
            task,
            wake,
            csv_path,
            channels: channels.clone(),
        });

        tracing::info!(
            "{} collecting channels [{}] every {}s",
            self.id,
            channels,
            config.interval.seconds()
        );
        self.events.on_state_changed(self.id, true);
        Ok(())
    }

    /// Stop collecting. Does nothing to an idle station beyond making sure it is clean.
    ///
    /// Waits at most the stop timeout for the loop to finish its current cycle, then
    /// aborts it.
    pub async fn stop(&self) {
        let mut session = self.session.lock().await;
        let was_running = self.running.swap(false, Ordering::AcqRel);

        if let Some(active) = session.take() {
            active.wake.notify_one();
            let mut task = active.task;
            match tokio::time::timeout(self.stop_timeout, &mut task).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => tracing::warn!("{}: acquisition task ended abnormally: {}", self.id, e),
                Err(_) => {
                    tracing::warn!(
                        "{}: loop did not stop within {:?}, aborting",
                        self.id,
                        self.stop_timeout
                    );
                    task.abort();
                    let _ = task.await;
                }
            }
        }

        self.buffer.write().await.clear();
        self.latest.send_replace(None);
        self.display.lock().await.resume();

        if was_running {
            tracing::info!("{} stopped", self.id);
            self.events.on_state_changed(self.id, false);
        }
    }

    /// Path of the current session file, while running.
    pub async fn session_file(&self) -> Option<PathBuf> {
        self.running_session(|s| s.csv_path.clone()).await
    }

    /// Channel set of the current session, while running.
    pub async fn channels(&self) -> Option<ChannelSet> {
        self.running_session(|s| s.channels.clone()).await
    }

    // A loop that stopped itself leaves its session behind until the next start
    async fn running_session<T>(&self, f: impl FnOnce(&Session) -> T) -> Option<T> {
        let session = self.session.lock().await;
        if !self.is_active() {
            return None;
        }
        session.as_ref().map(f)
    }

    /// Copy of the buffered samples, oldest first.
    pub async fn snapshot(&self) -> Vec<Sample> {
        self.buffer.read().await.snapshot()
    }

    /// Number of buffered samples.
    pub async fn buffer_len(&self) -> usize {
        self.buffer.read().await.len()
    }

    /// Per-channel average temperature over `start..=end`.
    pub async fn average_in_range(
        &self,
        start: DateTime<Local>,
        end: DateTime<Local>,
    ) -> AppResult<RangeAverage> {
        self.buffer.read().await.average_in_range(start, end)
    }

    /// Range average labelled with channel numbers; `None` when the range holds no data.
    pub async fn average_report(
        &self,
        start: DateTime<Local>,
        end: DateTime<Local>,
    ) -> AppResult<Option<AverageReport>> {
        let average = self.average_in_range(start, end).await?;
        let channels = self.channels().await.map(|c| c.as_slice().to_vec()).unwrap_or_default();
        Ok(AverageReport::new(&channels, &average))
    }

    /// Latest sample; use `borrow()` to pull or `changed()` to be pushed updates.
    pub fn latest_sample(&self) -> watch::Receiver<Option<Sample>> {
        self.latest.subscribe()
    }

    /// Flip the chart between live and paused.
    pub async fn toggle_pause(&self) -> DisplayMode {
        self.display.lock().await.toggle_pause(Local::now())
    }

    /// Change the chart's window width. A paused chart keeps its frozen range.
    pub async fn set_display_window(&self, window: DisplayWindow) {
        self.display.lock().await.set_window(window);
    }

    /// Window width the chart currently uses.
    pub async fn display_window(&self) -> DisplayWindow {
        self.display.lock().await.window()
    }

    /// Time range the chart should currently show.
    pub async fn display_range(&self) -> (DateTime<Local>, DateTime<Local>) {
        self.display.lock().await.visible_range(Local::now())
    }

    /// Samples inside the chart's current time range.
    pub async fn visible_samples(&self) -> Vec<Sample> {
        let (start, end) = self.display_range().await;
        self.buffer.read().await.samples_in_range(start, end)
    }
}

/// State moved into the acquisition task.
struct AcquisitionLoop {
    id: StationId,
    channels: ChannelSet,
    interval: Duration,
    temperature: TemperatureClient,
    power_meter: PowerMeterClient,
    sink: Option<CsvSink>,
    buffer: Arc<RwLock<SampleBuffer>>,
    latest: Arc<watch::Sender<Option<Sample>>>,
    events: Arc<dyn EventSink>,
    running: Arc<AtomicBool>,
    wake: Arc<Notify>,
}

impl AcquisitionLoop {
    async fn run(mut self) {
        if let Err(e) = self.run_cycles().await {
            let fatal = DaqError::LoopFatal(e.to_string());
            tracing::error!("{}: {}", self.id, fatal);
            self.events.on_error(self.id, ErrorKind::LoopFatal, &fatal.to_string());
        }
        self.teardown().await;
    }

    async fn run_cycles(&mut self) -> AppResult<()> {
        while self.running.load(Ordering::Acquire) {
            self.cycle().await?;

            if !self.running.load(Ordering::Acquire) {
                break;
            }
            tokio::select! {
                _ = tokio::time::sleep(self.interval) => {}
                _ = self.wake.notified() => {}
            }
        }
        Ok(())
    }

    async fn cycle(&mut self) -> AppResult<()> {
        let temperatures = match self.temperature.read_bank().await {
            Ok(bank) => self.channels.select(&bank).into_iter().map(Some).collect(),
            Err(e) if !e.is_device_fault() => return Err(e),
            Err(e) => {
                self.device_fault("temperature recorder", &e);
                vec![None; self.channels.count_within(DEVICE_CHANNEL_COUNT)]
            }
        };

        let reading = match self.power_meter.query().await {
            Ok(reading) => reading,
            Err(e) if !e.is_device_fault() => return Err(e),
            Err(e) => {
                self.device_fault("power meter", &e);
                PowerReading::default()
            }
        };

        let now = Local::now();
        let sample = Sample::new(now, temperatures, reading);

        if let Some(sink) = self.sink.as_mut() {
            sink.append(&sample)?;
        }

        {
            let mut buffer = self.buffer.write().await;
            buffer.append(sample.clone())?;
            let evicted = buffer.evict_older_than(retention_horizon(), now);
            if evicted > 0 {
                tracing::debug!("Evicted {} expired samples", evicted);
            }
        }

        self.latest.send_replace(Some(sample.clone()));
        self.events.on_sample_ready(self.id, &sample);
        Ok(())
    }

    fn device_fault(&self, device: &str, error: &DaqError) {
        tracing::warn!("Error collecting {} data: {}", device, error);
        self.events.on_error(
            self.id,
            error.kind(),
            &format!("Error collecting {} data for {}: {}", device, self.id, error),
        );
    }

    async fn teardown(mut self) {
        self.temperature.disconnect().await;
        self.power_meter.disconnect().await;
        if let Some(sink) = self.sink.take() {
            if let Err(e) = sink.close() {
                tracing::warn!("{}: closing session file failed: {}", self.id, e);
            }
        }

        // Still flagged running means nobody called stop(): this is the forced-stop path
        if self.running.swap(false, Ordering::AcqRel) {
            self.buffer.write().await.clear();
            self.latest.send_replace(None);
            tracing::warn!("{} forced to stop", self.id);
            self.events.on_state_changed(self.id, false);
        }
    }
}
