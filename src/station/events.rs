//! Event-sink interface between the acquisition engine and the operator surface.
//!
//! The engine never touches widgets. It reports through [`EventSink`] and the GUI (or
//! the CLI) decides how to render. Callbacks are invoked from the station's acquisition
//! task, so implementations must be cheap and must not block.

use crate::data::Sample;
use crate::error::ErrorKind;
use crate::station::StationId;
use tokio::sync::broadcast;

/// Receiver of station notifications.
pub trait EventSink: Send + Sync {
    /// A poll cycle produced a new sample (live display projection).
    fn on_sample_ready(&self, station: StationId, sample: &Sample);

    /// A non-fatal device fault or a fatal loop error occurred.
    fn on_error(&self, station: StationId, kind: ErrorKind, message: &str);

    /// The station became active (collecting) or inactive.
    fn on_state_changed(&self, _station: StationId, _active: bool) {}
}

/// Logs every event through `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingEventSink;

impl EventSink for TracingEventSink {
    fn on_sample_ready(&self, station: StationId, sample: &Sample) {
        tracing::debug!(
            station = station.number(),
            temperatures = ?sample.temperatures,
            power = sample.power,
            "Sample ready"
        );
    }

    fn on_error(&self, station: StationId, kind: ErrorKind, message: &str) {
        tracing::warn!(station = station.number(), %kind, "{}", message);
    }

    fn on_state_changed(&self, station: StationId, active: bool) {
        tracing::info!(station = station.number(), active, "Station state changed");
    }
}

/// Owned form of an event, for fan-out over channels.
#[derive(Debug, Clone, PartialEq)]
pub enum StationEvent {
    /// A poll cycle produced a sample
    SampleReady {
        /// Source station
        station: StationId,
        /// The new sample
        sample: Sample,
    },
    /// A device fault or a fatal loop error
    Error {
        /// Source station
        station: StationId,
        /// Error category
        kind: ErrorKind,
        /// Operator-facing text
        message: String,
    },
    /// The station started or stopped collecting
    StateChanged {
        /// Source station
        station: StationId,
        /// `true` when collecting
        active: bool,
    },
}

impl StationEvent {
    /// Station the event belongs to.
    pub fn station(&self) -> StationId {
        match self {
            StationEvent::SampleReady { station, .. }
            | StationEvent::Error { station, .. }
            | StationEvent::StateChanged { station, .. } => *station,
        }
    }
}

/// Publishes events on a broadcast channel; lagging subscribers lose the oldest events.
#[derive(Debug, Clone)]
pub struct BroadcastEventSink {
    tx: broadcast::Sender<StationEvent>,
}

impl BroadcastEventSink {
    /// Sink keeping at most `capacity` undelivered events per subscriber.
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    /// Receive every event published from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<StationEvent> {
        self.tx.subscribe()
    }

    fn publish(&self, event: StationEvent) {
        // No subscribers is fine, the engine keeps running headless
        let _ = self.tx.send(event);
    }
}

impl EventSink for BroadcastEventSink {
    fn on_sample_ready(&self, station: StationId, sample: &Sample) {
        self.publish(StationEvent::SampleReady {
            station,
            sample: sample.clone(),
        });
    }

    fn on_error(&self, station: StationId, kind: ErrorKind, message: &str) {
        self.publish(StationEvent::Error {
            station,
            kind,
            message: message.to_string(),
        });
    }

    fn on_state_changed(&self, station: StationId, active: bool) {
        self.publish(StationEvent::StateChanged { station, active });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hardware::PowerReading;
    use chrono::Local;

    #[tokio::test]
    async fn test_broadcast_sink_fans_out() {
        let sink = BroadcastEventSink::new(16);
        let mut rx = sink.subscribe();
        let station = StationId::new(2).unwrap();

        sink.on_state_changed(station, true);
        sink.on_error(station, ErrorKind::Parse, "bad reply");
        let sample = Sample::new(Local::now(), vec![Some(20.0)], PowerReading::default());
        sink.on_sample_ready(station, &sample);

        assert_eq!(
            rx.recv().await.unwrap(),
            StationEvent::StateChanged { station, active: true }
        );
        assert!(matches!(
            rx.recv().await.unwrap(),
            StationEvent::Error { kind: ErrorKind::Parse, .. }
        ));
        match rx.recv().await.unwrap() {
            StationEvent::SampleReady { sample: got, .. } => assert_eq!(got, sample),
            other => panic!("unexpected event {:?}", other),
        }
    }

    #[test]
    fn test_publish_without_subscribers() {
        let sink = BroadcastEventSink::new(4);
        sink.on_state_changed(StationId::new(1).unwrap(), false);
    }
}
