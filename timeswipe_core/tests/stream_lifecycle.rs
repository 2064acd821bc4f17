//! Start/stop state machine and end-to-end delivery through the driver.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use crossbeam_channel as xch;
use serde_json::json;
use timeswipe_core::mocks::ScriptedFrontend;
use timeswipe_core::{
    AcquisitionCfg, CalibrationPreset, Driver, DriverError, ErrorCode, SampleBatch, StreamState,
};
use timeswipe_hardware::{SimulatedButton, SimulatedFrontend};
use timeswipe_traits::clock::ManualClock;
use timeswipe_traits::{BoxError, RawRow, SensorFrontend};

const WAIT: Duration = Duration::from_secs(3);

fn fast() -> AcquisitionCfg {
    AcquisitionCfg {
        sample_rate_hz: 2000,
        batch_rows: 10,
        settling_ticks: 20,
        ..AcquisitionCfg::default()
    }
}

fn driver_with(fe: impl SensorFrontend + Send + 'static) -> Driver {
    Driver::builder()
        .with_frontend(fe)
        .with_acquisition(fast())
        .with_calibration(CalibrationPreset::identity())
        .build()
        .unwrap()
}

fn collect(driver: &Driver) -> xch::Receiver<SampleBatch> {
    let (tx, rx) = xch::unbounded();
    driver
        .start(move |b, _| {
            let _ = tx.send(b);
        })
        .unwrap();
    rx
}

#[test]
fn stop_without_start_is_rejected() {
    let d = driver_with(ScriptedFrontend::constant([0.0; 4]));
    assert_eq!(d.state(), StreamState::Stopped);
    assert_eq!(d.stop(), Err(DriverError::NotRunning));
}

#[test]
fn double_start_is_rejected_and_restart_works() {
    let d = driver_with(ScriptedFrontend::constant([0.0; 4]));
    let _rx = collect(&d);
    assert_eq!(d.state(), StreamState::Running);
    assert_eq!(d.start(|_, _| {}), Err(DriverError::AlreadyRunning));
    assert_eq!(d.on_button(|_| {}), Err(DriverError::AlreadyRunning));
    assert_eq!(d.on_error(|_| {}), Err(DriverError::AlreadyRunning));
    d.stop().unwrap();
    assert_eq!(d.state(), StreamState::Stopped);
    assert_eq!(d.stop(), Err(DriverError::NotRunning));

    let rx = collect(&d);
    assert!(rx.recv_timeout(WAIT).is_ok());
    d.stop().unwrap();
}

#[test]
fn rows_are_calibrated_with_current_offsets() {
    let d = driver_with(ScriptedFrontend::constant([5.0, 5.0, 5.0, 5.0]));
    d.set_sensor_offsets([1.0, 0.0, 0.0, 0.0]).unwrap();
    let rx = collect(&d);
    let batch = rx.recv_timeout(WAIT).unwrap();
    d.stop().unwrap();
    assert_eq!(batch.len(), 10);
    assert!(batch.rows().iter().all(|r| *r == [4.0, 5.0, 5.0, 5.0]));
}

#[test]
fn batches_arrive_in_tick_order() {
    let d = driver_with(ScriptedFrontend::constant([1.0; 4]));
    let rx = collect(&d);
    let firsts: Vec<u64> = (0..5)
        .map(|_| rx.recv_timeout(WAIT).unwrap().first_tick())
        .collect();
    d.stop().unwrap();
    assert!(firsts.windows(2).all(|w| w[1] >= w[0] + 10), "{firsts:?}");
    // One stale read is dropped after start.
    assert_eq!(firsts[0], 1);
}

#[test]
fn bridge_switch_never_mixes_routings() {
    // The simulated board adds a fixed bias while the bridge is on.
    let d = driver_with(SimulatedFrontend::constant([0.0; 4]));
    let rx = collect(&d);
    let _ = rx.recv_timeout(WAIT).unwrap();
    d.set_bridge(1).unwrap();

    let deadline = Instant::now() + WAIT;
    let mut values = Vec::new();
    while Instant::now() < deadline {
        let b = rx.recv_timeout(WAIT).unwrap();
        values.extend(b.rows().iter().map(|r| r[0]));
        if values.last().is_some_and(|v| *v > 0.0) && values.len() > 50 {
            break;
        }
    }
    d.stop().unwrap();

    let switch = values.iter().position(|v| *v > 0.0).expect("no row after switch");
    assert!(values[..switch].iter().all(|v| *v == 0.0));
    assert!(values[switch..].iter().all(|v| *v == values[switch]));
    assert_eq!(d.get_settings(&serde_json::json!({"Bridge": "?"})).unwrap()["Bridge"], 1);
}

#[test]
fn settings_commands_work_while_running() {
    let d = driver_with(ScriptedFrontend::constant([2.0; 4]));
    let rx = collect(&d);
    let _ = rx.recv_timeout(WAIT).unwrap();
    d.set_sensor_gains([3.0; 4]).unwrap();
    d.set_sensor_transmissions([1.0; 4]).unwrap();
    let deadline = Instant::now() + WAIT;
    let mut seen = false;
    while Instant::now() < deadline {
        let b = rx.recv_timeout(WAIT).unwrap();
        if b.rows().iter().all(|r| *r == [6.0; 4]) {
            seen = true;
            break;
        }
    }
    d.stop().unwrap();
    assert!(seen);
}

#[test]
fn stop_is_bounded_with_a_blocked_consumer() {
    let d = driver_with(ScriptedFrontend::constant([0.0; 4]));
    let calls = Arc::new(AtomicUsize::new(0));
    let (release_tx, release_rx) = xch::unbounded::<()>();
    let (entered_tx, entered_rx) = xch::bounded::<()>(1);
    let c = Arc::clone(&calls);
    d.start(move |_, _| {
        c.fetch_add(1, Ordering::SeqCst);
        let _ = entered_tx.try_send(());
        let _ = release_rx.recv();
    })
    .unwrap();
    entered_rx.recv_timeout(WAIT).unwrap();

    let t0 = Instant::now();
    d.stop().unwrap();
    let elapsed = t0.elapsed();
    assert!(
        elapsed < d.acquisition().stop_grace() + Duration::from_millis(250),
        "stop took {elapsed:?}"
    );

    let after_stop = calls.load(Ordering::SeqCst);
    release_tx.send(()).unwrap();
    std::thread::sleep(Duration::from_millis(100));
    assert_eq!(calls.load(Ordering::SeqCst), after_stop);
}

#[test]
fn faults_become_error_events_and_sampling_continues() {
    let fe = SimulatedFrontend::constant([1.0; 4]);
    let control = fe.control();
    let d = Driver::builder()
        .with_frontend(fe)
        .with_acquisition(AcquisitionCfg {
            startup_discard_ticks: 0,
            ..fast()
        })
        .with_calibration(CalibrationPreset::identity())
        .build()
        .unwrap();
    let (etx, erx) = xch::unbounded();
    d.on_error(move |e| {
        let _ = etx.send(e);
    })
    .unwrap();
    control.fail_next(3);
    let rx = collect(&d);

    let ev = erx.recv_timeout(WAIT).unwrap();
    assert!(ev.contains(ErrorCode::AcquisitionFault));
    let batch = rx.recv_timeout(WAIT).unwrap();
    assert!(batch.rows().iter().all(|r| *r == [1.0; 4]));
    // Faulted ticks contribute no rows.
    assert!(batch.first_tick() >= 3);
    d.stop().unwrap();
    assert!(d.stats().faults >= 3);
}

#[test]
fn missing_calibration_reports_incomplete_and_delivers_nothing() {
    let d = Driver::builder()
        .with_frontend(ScriptedFrontend::constant([1.0; 4]))
        .with_acquisition(fast())
        .build()
        .unwrap();
    let (etx, erx) = xch::unbounded();
    d.on_error(move |e| {
        let _ = etx.send(e);
    })
    .unwrap();
    let rx = collect(&d);
    let ev = erx.recv_timeout(WAIT).unwrap();
    assert!(ev.contains(ErrorCode::ConfigurationIncomplete));
    assert!(rx.recv_timeout(Duration::from_millis(100)).is_err());
    d.stop().unwrap();
}

struct DeadBoard;

impl SensorFrontend for DeadBoard {
    fn read_channels(&mut self, _timeout: Duration) -> Result<RawRow, BoxError> {
        Err("unreachable".into())
    }
    fn set_measuring(&mut self, _on: bool) -> Result<(), BoxError> {
        Err("board did not answer".into())
    }
}

#[test]
fn failed_arming_leaves_stream_stopped() {
    let d = driver_with(DeadBoard);
    let err = d.start(|_, _| {}).unwrap_err();
    assert!(matches!(err, DriverError::AcquisitionFault(ref m) if m.contains("did not answer")));
    assert_eq!(d.state(), StreamState::Stopped);
    assert_eq!(d.stop(), Err(DriverError::NotRunning));
}

#[test]
fn button_counter_survives_restarts() {
    let button = SimulatedButton::new();
    let handle = button.handle();
    let d = Driver::builder()
        .with_frontend(ScriptedFrontend::constant([0.0; 4]))
        .with_button(button)
        .with_button_cfg(timeswipe_core::ButtonCfg {
            poll_ms: 1,
            debounce_n: 2,
        })
        .with_acquisition(fast())
        .with_calibration(CalibrationPreset::identity())
        .build()
        .unwrap();
    let (tx, rx) = xch::unbounded();
    d.on_button(move |e| {
        let _ = tx.send(e);
    })
    .unwrap();

    d.start(|_, _| {}).unwrap();
    handle.press();
    let a = rx.recv_timeout(WAIT).unwrap();
    handle.release();
    let b = rx.recv_timeout(WAIT).unwrap();
    d.stop().unwrap();

    d.start(|_, _| {}).unwrap();
    handle.press();
    let c = rx.recv_timeout(WAIT).unwrap();
    d.stop().unwrap();

    assert_eq!((a.pressed, a.counter), (true, 1));
    assert_eq!((b.pressed, b.counter), (false, 2));
    assert_eq!((c.pressed, c.counter), (true, 3));
}

#[test]
fn dropping_a_running_driver_stops_it() {
    let fe = ScriptedFrontend::constant([0.0; 4]);
    let watch = fe.clone();
    let d = driver_with(fe);
    let rx = collect(&d);
    let _ = rx.recv_timeout(WAIT).unwrap();
    drop(d);
    assert!(!watch.is_measuring());
    let reads = watch.reads();
    std::thread::sleep(Duration::from_millis(50));
    assert_eq!(watch.reads(), reads);
}

#[test]
fn manual_clock_runs_a_slow_rate_without_wall_time() {
    // One tick per second would take ten seconds per batch on the real clock.
    let d = Driver::builder()
        .with_frontend(ScriptedFrontend::constant([2.0; 4]))
        .with_acquisition(AcquisitionCfg {
            sample_rate_hz: 1,
            batch_rows: 10,
            ..AcquisitionCfg::default()
        })
        .with_calibration(CalibrationPreset::identity())
        .with_clock(Box::new(ManualClock::new()))
        .build()
        .unwrap();
    let rx = collect(&d);
    let batch = rx.recv_timeout(WAIT).unwrap();
    d.stop().unwrap();
    assert_eq!(batch.len(), 10);
    assert_eq!(d.stats().late_ticks, 0);
}

#[test]
fn stream_shape_changes_only_while_stopped() {
    let d = driver_with(ScriptedFrontend::constant([0.0; 4]));
    let rx = collect(&d);
    assert_eq!(rx.recv_timeout(WAIT).unwrap().len(), 10);

    let err = d.set_settings(&json!({"SampleRate": 500})).unwrap_err();
    assert!(matches!(err, DriverError::InvalidArgument(_)), "{err:?}");
    assert!(matches!(d.set_burst_size(4), Err(DriverError::InvalidArgument(_))));
    // Calibration keys in the same document are not applied either.
    assert!(d.set_settings(&json!({"Offset": [1, 1, 1, 1], "BurstSize": 4})).is_err());
    assert_eq!(d.settings().offsets, [0.0; 4]);
    assert_eq!(d.acquisition().batch_rows, 10);
    d.stop().unwrap();

    d.set_settings(&json!({"SampleRate": 4000, "BurstSize": 4})).unwrap();
    assert_eq!(d.acquisition().sample_rate_hz, 4000);
    let rx = collect(&d);
    let batch = rx.recv_timeout(WAIT).unwrap();
    d.stop().unwrap();
    assert_eq!(batch.len(), 4);
}

#[test]
fn button_consumer_can_be_replaced_while_the_old_one_is_stuck() {
    let button = SimulatedButton::new();
    let handle = button.handle();
    let d = Driver::builder()
        .with_frontend(ScriptedFrontend::constant([0.0; 4]))
        .with_button(button)
        .with_button_cfg(timeswipe_core::ButtonCfg {
            poll_ms: 1,
            debounce_n: 1,
        })
        .with_acquisition(fast())
        .with_calibration(CalibrationPreset::identity())
        .build()
        .unwrap();
    let (entered_tx, entered_rx) = xch::bounded::<()>(1);
    let (release_tx, release_rx) = xch::unbounded::<()>();
    d.on_button(move |_| {
        let _ = entered_tx.try_send(());
        let _ = release_rx.recv();
    })
    .unwrap();
    d.start(|_, _| {}).unwrap();
    handle.press();
    entered_rx.recv_timeout(WAIT).unwrap();
    d.stop().unwrap();

    let (tx, rx) = xch::unbounded();
    let t0 = Instant::now();
    d.on_button(move |e| {
        let _ = tx.send(e);
    })
    .unwrap();
    assert!(t0.elapsed() < Duration::from_millis(250), "{:?}", t0.elapsed());
    release_tx.send(()).unwrap();

    d.start(|_, _| {}).unwrap();
    handle.release();
    let e = rx.recv_timeout(WAIT).unwrap();
    d.stop().unwrap();
    assert_eq!((e.pressed, e.counter), (false, 2));
}
