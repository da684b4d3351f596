//! Integration tests for a single station against loopback mock devices.

mod common;

use common::{csv_files, dead_address, fast_acquisition, Bench};
use station_daq::data::RangeAverage;
use station_daq::error::{DaqError, ErrorKind};
use station_daq::hardware::mock::MockTemperatureDevice;
use station_daq::hardware::temperature::build_request;
use station_daq::station::{
    BroadcastEventSink, StationController, StationEvent, StationId, StationState,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::time::timeout;

fn controller(id: u8, events: Arc<BroadcastEventSink>) -> StationController {
    let acquisition = fast_acquisition();
    StationController::new(
        StationId::new(id).unwrap(),
        acquisition.timeouts(),
        acquisition.stop_timeout(),
        events,
    )
}

async fn next_matching<F>(rx: &mut broadcast::Receiver<StationEvent>, pred: F) -> StationEvent
where
    F: Fn(&StationEvent) -> bool,
{
    timeout(Duration::from_secs(5), async {
        loop {
            let event = rx.recv().await.unwrap();
            if pred(&event) {
                return event;
            }
        }
    })
    .await
    .expect("event not received in time")
}

#[tokio::test]
async fn test_first_cycle_is_persisted_and_buffered() {
    let bench = Bench::spawn().await;
    let dir = tempfile::tempdir().unwrap();
    let events = Arc::new(BroadcastEventSink::new(64));
    let mut rx = events.subscribe();
    let station = controller(1, events);
    let mut latest = station.latest_sample();

    station
        .start(&bench.station_config(1, dir.path(), "1-2"))
        .await
        .unwrap();
    assert_eq!(station.state(), StationState::Running);

    timeout(Duration::from_secs(5), latest.wait_for(|s| s.is_some()))
        .await
        .unwrap()
        .unwrap();
    let sample = latest.borrow().clone().unwrap();
    assert_eq!(sample.temperatures, vec![Some(21.0), Some(22.0)]);
    assert_eq!(sample.power, 110.0);
    assert_eq!(station.buffer_len().await, 1);

    let event = next_matching(&mut rx, |e| matches!(e, StationEvent::SampleReady { .. })).await;
    assert_eq!(event.station(), StationId::new(1).unwrap());

    let files = csv_files(dir.path());
    assert_eq!(files.len(), 1);
    assert_eq!(station.session_file().await.as_deref(), Some(files[0].as_path()));
    let name = files[0].file_name().unwrap().to_string_lossy().to_string();
    assert!(name.ends_with("_Station_1.csv"), "{name}");

    let content = std::fs::read_to_string(&files[0]).unwrap();
    let lines: Vec<&str> = content.lines().collect();
    assert_eq!(lines[0], "Date,Time,Temp1,Temp2,U(V),I(A),P(W),WP(Wh)");
    assert_eq!(lines.len(), 2);
    assert!(lines[1].ends_with(",21.0,22.0,110.0,1.0,110.0,0.0"), "{}", lines[1]);

    let request = build_request(1, 4, "0064", "0012").unwrap();
    assert_eq!(bench.recorder.requests().await[0], request.to_vec());
    assert_eq!(bench.meter.commands().await[0], ":MEAS? U,I,P,WH\n");

    station.stop().await;
    assert_eq!(station.state(), StationState::Idle);
}

#[tokio::test]
async fn test_stop_is_prompt_and_idempotent() {
    let bench = Bench::spawn().await;
    let dir = tempfile::tempdir().unwrap();
    let events = Arc::new(BroadcastEventSink::new(64));
    let mut rx = events.subscribe();
    let station = controller(2, events);
    let mut latest = station.latest_sample();

    station
        .start(&bench.station_config(2, dir.path(), "1-3"))
        .await
        .unwrap();
    timeout(Duration::from_secs(5), latest.wait_for(|s| s.is_some()))
        .await
        .unwrap()
        .unwrap();

    // The loop is now sleeping for a full minute; stop must wake it
    let started = std::time::Instant::now();
    station.stop().await;
    assert!(started.elapsed() < Duration::from_secs(2));

    assert_eq!(station.state(), StationState::Idle);
    assert!(station.snapshot().await.is_empty());
    assert!(station.latest_sample().borrow().is_none());
    assert!(station.session_file().await.is_none());

    let event = next_matching(&mut rx, |e| {
        matches!(e, StationEvent::StateChanged { active: false, .. })
    })
    .await;
    assert_eq!(event.station(), StationId::new(2).unwrap());

    station.stop().await;
    assert_eq!(station.state(), StationState::Idle);
    assert!(rx.try_recv().is_err(), "second stop must not emit events");

    // File persists, header plus one row
    let files = csv_files(dir.path());
    let content = std::fs::read_to_string(&files[0]).unwrap();
    assert_eq!(content.lines().count(), 2);
}

#[tokio::test]
async fn test_start_while_running_is_rejected() {
    let bench = Bench::spawn().await;
    let dir = tempfile::tempdir().unwrap();
    let station = controller(3, Arc::new(BroadcastEventSink::new(16)));
    let config = bench.station_config(3, dir.path(), "1");

    station.start(&config).await.unwrap();
    assert!(matches!(
        station.start(&config).await,
        Err(DaqError::AlreadyRunning(_))
    ));
    assert_eq!(csv_files(dir.path()).len(), 1);

    station.stop().await;
}

#[tokio::test]
async fn test_connection_failure_leaves_no_trace() {
    let bench = Bench::spawn().await;
    let dir = tempfile::tempdir().unwrap();
    let station = controller(4, Arc::new(BroadcastEventSink::new(16)));

    let mut config = bench.station_config(4, dir.path(), "1-3");
    config.power_meter_addr = Some(dead_address().await);

    let err = station.start(&config).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Connection);
    assert_eq!(station.state(), StationState::Idle);
    assert!(csv_files(dir.path()).is_empty());

    config.temperature_addr = Some(dead_address().await);
    assert!(matches!(
        station.start(&config).await,
        Err(DaqError::Connection(_))
    ));
    assert_eq!(station.state(), StationState::Idle);
}

#[tokio::test]
async fn test_silent_recorder_yields_empty_channels() {
    let bench = Bench::spawn().await;
    let silent = MockTemperatureDevice::spawn_silent().await.unwrap();
    let dir = tempfile::tempdir().unwrap();
    let events = Arc::new(BroadcastEventSink::new(64));
    let mut rx = events.subscribe();
    let station = controller(5, events);
    let mut latest = station.latest_sample();

    let mut config = bench.station_config(5, dir.path(), "1-2");
    config.temperature_addr = Some(silent.address());
    station.start(&config).await.unwrap();

    timeout(Duration::from_secs(5), latest.wait_for(|s| s.is_some()))
        .await
        .unwrap()
        .unwrap();
    let sample = latest.borrow().clone().unwrap();
    assert_eq!(sample.temperatures, vec![None, None]);
    assert_eq!(sample.voltage, 110.0);
    assert_eq!(station.state(), StationState::Running);

    match next_matching(&mut rx, |e| matches!(e, StationEvent::Error { .. })).await {
        StationEvent::Error { kind, .. } => assert_eq!(kind, ErrorKind::Protocol),
        other => panic!("unexpected event {other:?}"),
    }

    let content = std::fs::read_to_string(&csv_files(dir.path())[0]).unwrap();
    let row = content.lines().nth(1).unwrap();
    assert!(row.ends_with(",,,110.0,1.0,110.0,0.0"), "{row}");

    station.stop().await;
}

#[tokio::test]
async fn test_garbled_meter_reply_substitutes_zeros() {
    let bench = Bench::spawn().await;
    bench.meter.set_reply("ERROR").await;
    let dir = tempfile::tempdir().unwrap();
    let station = controller(6, Arc::new(BroadcastEventSink::new(16)));
    let mut latest = station.latest_sample();

    station
        .start(&bench.station_config(6, dir.path(), "3"))
        .await
        .unwrap();
    timeout(Duration::from_secs(5), latest.wait_for(|s| s.is_some()))
        .await
        .unwrap()
        .unwrap();

    let sample = latest.borrow().clone().unwrap();
    assert_eq!(sample.temperatures, vec![Some(23.0)]);
    assert_eq!(
        (sample.voltage, sample.current, sample.power, sample.accumulated_energy),
        (0.0, 0.0, 0.0, 0.0)
    );
    assert_eq!(station.state(), StationState::Running);

    station.stop().await;
}

#[tokio::test]
async fn test_channels_beyond_bank_are_skipped() {
    let bench = Bench::spawn().await;
    let dir = tempfile::tempdir().unwrap();
    let station = controller(1, Arc::new(BroadcastEventSink::new(16)));
    let mut latest = station.latest_sample();

    station
        .start(&bench.station_config(1, dir.path(), "17-20"))
        .await
        .unwrap();
    timeout(Duration::from_secs(5), latest.wait_for(|s| s.is_some()))
        .await
        .unwrap()
        .unwrap();

    let sample = latest.borrow().clone().unwrap();
    assert_eq!(sample.temperatures, vec![Some(37.0), Some(38.0)]);

    let now = chrono::Local::now();
    let average = station
        .average_in_range(now - chrono::TimeDelta::minutes(5), now + chrono::TimeDelta::minutes(1))
        .await
        .unwrap();
    assert_eq!(average, RangeAverage::Channels(vec![Some(37.0), Some(38.0)]));

    let report = station
        .average_report(now - chrono::TimeDelta::minutes(5), now + chrono::TimeDelta::minutes(1))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(report.rows, vec![(17, Some(37.0)), (18, Some(38.0))]);

    station.stop().await;
}
