//! Fixed arena of station controllers.
//!
//! The supervisor routes operator commands to the right station and guards application
//! shutdown. Stations are independent: a fault in one never touches another.

use crate::config::{AcquisitionConfig, StationConfig};
use crate::data::{AverageReport, RangeAverage, Sample};
use crate::error::{AppResult, DaqError};
use crate::station::controller::{StationController, StationState};
use crate::station::display::{DisplayMode, DisplayWindow};
use crate::station::events::EventSink;
use crate::station::StationId;
use chrono::{DateTime, Local};
use std::sync::Arc;
use tokio::sync::watch;

/// Owns one [`StationController`] per wired station.
pub struct Supervisor {
    stations: Vec<StationController>,
}

impl Supervisor {
    /// One idle controller per station, all sharing `events`.
    pub fn new(acquisition: &AcquisitionConfig, events: Arc<dyn EventSink>) -> Self {
        let stations = StationId::all()
            .map(|id| {
                StationController::new(
                    id,
                    acquisition.timeouts(),
                    acquisition.stop_timeout(),
                    Arc::clone(&events),
                )
            })
            .collect();
        Self { stations }
    }

    /// Controller of station `id`.
    pub fn station(&self, id: StationId) -> &StationController {
        // StationId is range-checked on construction, so the slot always exists
        &self.stations[id.index()]
    }

    /// Start the station named in `config`.
    pub async fn start(&self, config: &StationConfig) -> AppResult<()> {
        self.station(config.id).start(config).await
    }

    /// Stop station `id`; a no-op when it is idle.
    pub async fn stop(&self, id: StationId) {
        self.station(id).stop().await;
    }

    /// Lifecycle state of station `id`.
    pub fn state(&self, id: StationId) -> StationState {
        self.station(id).state()
    }

    /// Stations currently collecting, in ascending order.
    pub fn active_stations(&self) -> Vec<StationId> {
        self.stations
            .iter()
            .filter(|s| s.is_active())
            .map(StationController::id)
            .collect()
    }

    /// Copy of station `id`'s buffered samples.
    pub async fn snapshot(&self, id: StationId) -> Vec<Sample> {
        self.station(id).snapshot().await
    }

    /// Per-channel average over `start..=end` for station `id`.
    pub async fn average_in_range(
        &self,
        id: StationId,
        start: DateTime<Local>,
        end: DateTime<Local>,
    ) -> AppResult<RangeAverage> {
        self.station(id).average_in_range(start, end).await
    }

    /// Range average of station `id` labelled with its channel numbers.
    pub async fn average_report(
        &self,
        id: StationId,
        start: DateTime<Local>,
        end: DateTime<Local>,
    ) -> AppResult<Option<AverageReport>> {
        self.station(id).average_report(start, end).await
    }

    /// Latest-sample channel of station `id`.
    pub fn latest_sample(&self, id: StationId) -> watch::Receiver<Option<Sample>> {
        self.station(id).latest_sample()
    }

    /// Flip station `id`'s chart between live and paused.
    pub async fn toggle_pause(&self, id: StationId) -> DisplayMode {
        self.station(id).toggle_pause().await
    }

    /// Change the width of station `id`'s chart.
    pub async fn set_display_window(&self, id: StationId, window: DisplayWindow) {
        self.station(id).set_display_window(window).await;
    }

    /// Time range station `id`'s chart currently shows.
    pub async fn display_range(&self, id: StationId) -> (DateTime<Local>, DateTime<Local>) {
        self.station(id).display_range().await
    }

    /// Samples of station `id` inside its chart's range.
    pub async fn visible_samples(&self, id: StationId) -> Vec<Sample> {
        self.station(id).visible_samples().await
    }

    /// Stop every station, whatever its state.
    pub async fn stop_all(&self) {
        for station in &self.stations {
            station.stop().await;
        }
    }

    /// Allow the application to exit only when every station is idle.
    ///
    /// # Errors
    /// `DaqError::Busy` listing the stations that are still collecting. Nothing is
    /// stopped in that case; the operator decides.
    pub async fn shutdown(&self) -> AppResult<()> {
        let active = self.active_stations();
        if !active.is_empty() {
            return Err(DaqError::Busy(active));
        }
        self.stop_all().await;
        tracing::info!("All stations idle, shutdown complete");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::station::events::TracingEventSink;

    fn supervisor() -> Supervisor {
        Supervisor::new(&AcquisitionConfig::default(), Arc::new(TracingEventSink))
    }

    #[tokio::test]
    async fn test_arena_covers_every_station() {
        let supervisor = supervisor();
        for id in StationId::all() {
            assert_eq!(supervisor.station(id).id(), id);
            assert_eq!(supervisor.state(id), StationState::Idle);
        }
        assert!(supervisor.active_stations().is_empty());
    }

    #[tokio::test]
    async fn test_shutdown_when_idle() {
        let supervisor = supervisor();
        supervisor.shutdown().await.unwrap();
        supervisor.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_failed_start_leaves_station_idle() {
        let supervisor = supervisor();
        let id = StationId::new(4).unwrap();
        let mut config = StationConfig::new(id, "");
        config.channels = "1".to_string();

        assert!(supervisor.start(&config).await.is_err());
        assert_eq!(supervisor.state(id), StationState::Idle);
        assert!(supervisor.shutdown().await.is_ok());
    }
}
