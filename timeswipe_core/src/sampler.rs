//! Fixed-rate acquisition thread.
//!
//! The thread owns the hardware for the lifetime of one stream. Every tick it
//! takes one settings snapshot, applies a pending bridge change, polls the
//! button when due, reads one row, and either discards it (startup or
//! settling), reports it as a fault, or calibrates it into the pending batch.
//! Completed batches go to the multiplexer, which never blocks this thread.
//!
//! Pacing uses absolute deadlines. A tick that starts more than one period
//! late re-anchors the schedule at "now" instead of bursting to catch up.
//!
//! Shutdown is checked at every tick boundary; the worst-case exit latency is
//! one in-flight read (bounded by the read timeout) plus one period.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crossbeam_channel as xch;
use timeswipe_traits::clock::Clock;
use timeswipe_traits::{ButtonSource, RawRow, SensorFrontend};

use crate::button::ButtonTracker;
use crate::calibration::calibrate;
use crate::config::AcquisitionCfg;
use crate::error::{DriverError, DriverResult};
use crate::events::{SampleBatch, code_for};
use crate::hw_error::map_hw_error;
use crate::mux::MuxProducer;
use crate::settings::SettingsStore;
use crate::stats::{Stats, bump};

pub(crate) struct ButtonInput {
    pub source: Box<dyn ButtonSource + Send>,
    pub tracker: ButtonTracker,
}

/// Everything the acquisition thread owns while streaming. Handed back on
/// exit so the next `start` can reuse it and the button counter survives.
pub(crate) struct Hardware {
    pub frontend: Box<dyn SensorFrontend + Send>,
    pub button: Option<ButtonInput>,
}

impl Hardware {
    /// Enable conversions and route the board before the first tick.
    pub(crate) fn arm(&mut self, settings: &SettingsStore) -> DriverResult<()> {
        self.frontend
            .set_measuring(true)
            .map_err(|e| map_hw_error(e.as_ref()))?;
        let bridge = settings.snapshot().bridge;
        if let Err(e) = self.frontend.select_bridge(bridge) {
            let _ = self.frontend.set_measuring(false);
            return Err(map_hw_error(e.as_ref()));
        }
        Ok(())
    }
}

/// Per-stream tick state.
pub(crate) struct TickLoop {
    hw: Hardware,
    settings: Arc<SettingsStore>,
    producer: MuxProducer,
    stats: Arc<Stats>,
    batch_rows: usize,
    settling_ticks: u32,
    read_timeout: Duration,
    poll_ticks: u64,
    tick: u64,
    discard_left: u32,
    bridge_epoch: u64,
    pending: Vec<RawRow>,
    pending_first: u64,
    warned_incomplete: bool,
}

impl TickLoop {
    pub(crate) fn new(
        hw: Hardware,
        settings: Arc<SettingsStore>,
        producer: MuxProducer,
        stats: Arc<Stats>,
        cfg: &AcquisitionCfg,
        poll_ticks: u64,
    ) -> Self {
        let bridge_epoch = settings.snapshot().bridge_epoch;
        let batch_rows = cfg.batch_rows.max(1);
        Self {
            hw,
            settings,
            producer,
            stats,
            batch_rows,
            settling_ticks: cfg.settling_ticks,
            read_timeout: cfg.read_timeout,
            poll_ticks: poll_ticks.max(1),
            tick: 0,
            discard_left: cfg.startup_discard_ticks,
            bridge_epoch,
            pending: Vec::with_capacity(batch_rows),
            pending_first: 0,
            warned_incomplete: false,
        }
    }

    pub(crate) fn tick(&mut self) {
        let snap = self.settings.snapshot();

        if snap.bridge_epoch != self.bridge_epoch {
            self.bridge_epoch = snap.bridge_epoch;
            tracing::debug!(tick = self.tick, bridge = ?snap.bridge, "bridge change");
            if let Err(e) = self.hw.frontend.select_bridge(snap.bridge) {
                self.fault(&map_hw_error(e.as_ref()));
            }
            self.discard_left = self.discard_left.max(self.settling_ticks);
        }

        if self.tick % self.poll_ticks == 0 {
            if let Some(b) = self.hw.button.as_mut() {
                let level = b.source.is_pressed();
                if let Some(ev) = b.tracker.poll(level) {
                    tracing::debug!(pressed = ev.pressed, counter = ev.counter, "button");
                    self.producer.publish_button(ev);
                }
            }
        }

        let read = self.hw.frontend.read_channels(self.read_timeout);
        // A discard window swallows rows, never faults.
        let discarding = self.discard_left > 0;
        if discarding {
            self.discard_left -= 1;
        }
        match read {
            Err(e) => {
                bump(&self.stats.faults);
                self.fault(&map_hw_error(e.as_ref()));
            }
            Ok(_) if discarding => bump(&self.stats.discarded_ticks),
            Ok(raw) => match calibrate(&raw, &snap) {
                Ok(row) => self.push_row(row),
                Err(e) => {
                    bump(&self.stats.incomplete_ticks);
                    if !self.warned_incomplete {
                        self.warned_incomplete = true;
                        tracing::warn!(error = %e, "dropping rows until calibration is complete");
                    }
                    self.producer.report(code_for(&e), e.to_string());
                }
            },
        }

        self.tick += 1;
        bump(&self.stats.ticks);
    }

    fn fault(&self, err: &DriverError) {
        tracing::trace!(tick = self.tick, error = %err, "tick fault");
        self.producer.report(code_for(err), err.to_string());
    }

    fn push_row(&mut self, row: RawRow) {
        if self.pending.is_empty() {
            self.pending_first = self.tick;
        }
        self.pending.push(row);
        if self.pending.len() >= self.batch_rows {
            let rows = std::mem::replace(&mut self.pending, Vec::with_capacity(self.batch_rows));
            self.producer
                .publish_batch(SampleBatch::new(self.pending_first, rows));
        }
    }

    /// Disable conversions, drop the partial batch and release the hardware.
    pub(crate) fn finish(mut self) -> Hardware {
        if !self.pending.is_empty() {
            tracing::debug!(rows = self.pending.len(), "discarding partial batch");
        }
        if let Err(e) = self.hw.frontend.set_measuring(false) {
            tracing::warn!(error = %e, "failed to disable measurement");
        }
        self.hw
    }
}

/// Deadline for the tick after the one scheduled at `deadline`.
/// Returns the new deadline and whether the schedule was re-anchored.
pub(crate) fn next_deadline(deadline: Instant, now: Instant, period: Duration) -> (Instant, bool) {
    let next = deadline + period;
    if now > next + period {
        (now, true)
    } else {
        (next, false)
    }
}

/// Where the hardware ended up after the thread was asked to stop.
pub(crate) enum Recovered {
    Returned(Hardware),
    /// The thread is still inside a read; the hardware arrives on the channel.
    Pending(xch::Receiver<Hardware>),
}

pub(crate) struct AcquisitionThread {
    shutdown: Arc<AtomicBool>,
    handback: xch::Receiver<Hardware>,
    handle: JoinHandle<()>,
}

impl AcquisitionThread {
    /// On failure the hardware is handed back disarmed, when it can be recovered.
    pub(crate) fn spawn(
        lp: TickLoop,
        clock: Arc<dyn Clock + Send + Sync>,
        period: Duration,
    ) -> std::result::Result<Self, (DriverError, Option<Hardware>)> {
        let shutdown = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&shutdown);
        let (tx, handback) = xch::bounded(1);
        let slot = Arc::new(parking_lot::Mutex::new(Some(lp)));
        let thread_slot = Arc::clone(&slot);

        let spawned = std::thread::Builder::new()
            .name("timeswipe-acq".into())
            .spawn(move || {
                let Some(mut lp) = thread_slot.lock().take() else {
                    return;
                };
                let stats = Arc::clone(&lp.stats);
                let mut deadline = clock.now();
                while !flag.load(Ordering::Acquire) {
                    lp.tick();
                    let (next, late) = next_deadline(deadline, clock.now(), period);
                    deadline = next;
                    if late {
                        bump(&stats.late_ticks);
                        tracing::trace!("tick overran; re-anchoring schedule");
                    } else {
                        clock.sleep_until(deadline);
                    }
                }
                let _ = tx.send(lp.finish());
                tracing::trace!("acquisition thread exiting");
            });

        match spawned {
            Ok(handle) => Ok(Self {
                shutdown,
                handback,
                handle,
            }),
            Err(e) => {
                let err = DriverError::AcquisitionFault(format!("spawn acquisition thread: {e}"));
                let hw = slot.lock().take().map(TickLoop::finish);
                Err((err, hw))
            }
        }
    }

    /// Ask the loop to stop at its next tick boundary.
    pub(crate) fn signal(&self) {
        self.shutdown.store(true, Ordering::Release);
    }

    /// Wait until `deadline` for the thread to hand the hardware back.
    pub(crate) fn stop(self, deadline: Instant) -> Recovered {
        self.signal();
        match self.handback.recv_deadline(deadline) {
            Ok(hw) => {
                if self.handle.join().is_err() {
                    tracing::warn!("acquisition thread panicked after release");
                }
                Recovered::Returned(hw)
            }
            Err(_) => {
                tracing::warn!("acquisition thread still inside a read; detaching");
                Recovered::Pending(self.handback)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::button::ButtonTracker;
    use crate::config::CalibrationPreset;
    use crate::events::{ButtonEvent, ErrorCode, ErrorEvent};
    use crate::mocks::{ScriptedFrontend, Step};
    use crate::mux::{EventConsumers, EventMux};
    use crate::settings::StreamParams;
    use parking_lot::Mutex;

    struct Rig {
        mux: EventMux,
        lp: TickLoop,
        fe: ScriptedFrontend,
        batches: xch::Receiver<SampleBatch>,
        errors: xch::Receiver<ErrorEvent>,
        buttons: xch::Receiver<ButtonEvent>,
        settings: Arc<SettingsStore>,
    }

    fn rig(fe: ScriptedFrontend, cfg: AcquisitionCfg) -> Rig {
        rig_with_button(fe, cfg, None)
    }

    fn rig_with_button(
        fe: ScriptedFrontend,
        cfg: AcquisitionCfg,
        button: Option<ButtonInput>,
    ) -> Rig {
        let settings = Arc::new(SettingsStore::new(StreamParams::from(&cfg)));
        settings.apply_preset(&CalibrationPreset::identity()).unwrap();
        let (btx, batches) = xch::unbounded();
        let (etx, errors) = xch::unbounded();
        let (ptx, buttons) = xch::unbounded();
        let mut registered = EventConsumers::default();
        registered.button.set(Box::new(move |e: ButtonEvent| {
            let _ = ptx.send(e);
        }));
        registered.error.set(Box::new(move |e: ErrorEvent| {
            let _ = etx.send(e);
        }));
        let consumers = Arc::new(Mutex::new(registered));
        let stats = Arc::new(Stats::default());
        let mut mux = EventMux::new();
        let producer = mux
            .activate(
                cfg.queue_capacity,
                Box::new(move |b: SampleBatch, _: u64| {
                    let _ = btx.send(b);
                }),
                consumers,
                Arc::clone(&stats),
            )
            .unwrap();
        let hw = Hardware {
            frontend: Box::new(fe.clone()),
            button,
        };
        let lp = TickLoop::new(hw, Arc::clone(&settings), producer, stats, &cfg, 1);
        Rig {
            mux,
            lp,
            fe,
            batches,
            errors,
            buttons,
            settings,
        }
    }

    fn cfg(batch_rows: usize, settling: u32, discard: u32) -> AcquisitionCfg {
        AcquisitionCfg {
            batch_rows,
            settling_ticks: settling,
            startup_discard_ticks: discard,
            ..AcquisitionCfg::default()
        }
    }

    const WAIT: Duration = Duration::from_secs(2);

    #[test]
    fn startup_discard_then_batches() {
        let fe = ScriptedFrontend::new((0..7).map(|i| Step::Row([f64::from(i); 4])));
        let mut r = rig(fe, cfg(3, 0, 1));
        for _ in 0..7 {
            r.lp.tick();
        }
        let a = r.batches.recv_timeout(WAIT).unwrap();
        let b = r.batches.recv_timeout(WAIT).unwrap();
        assert_eq!(a.first_tick(), 1);
        assert_eq!(a.rows()[0], [1.0; 4]);
        assert_eq!(b.first_tick(), 4);
        assert_eq!(b.rows()[2], [6.0; 4]);
        r.mux.deactivate(Instant::now() + WAIT);
    }

    #[test]
    fn bridge_change_settles_and_reroutes() {
        let fe = ScriptedFrontend::constant([1.0; 4]);
        let mut r = rig(fe, cfg(1, 2, 0));
        r.lp.tick();
        assert!(r.batches.recv_timeout(WAIT).is_ok());

        r.settings.set_bridge(1).unwrap();
        r.lp.tick();
        r.lp.tick();
        assert!(r.batches.try_recv().is_err());
        r.lp.tick();
        assert_eq!(r.batches.recv_timeout(WAIT).unwrap().first_tick(), 3);
        assert_eq!(r.fe.bridges(), vec![timeswipe_traits::Bridge::On]);
        r.mux.deactivate(Instant::now() + WAIT);
    }

    #[test]
    fn fault_reports_and_continues() {
        let fe = ScriptedFrontend::new([
            Step::Row([1.0; 4]),
            Step::Fault("spi timeout"),
            Step::Row([2.0; 4]),
        ]);
        let mut r = rig(fe, cfg(1, 0, 0));
        for _ in 0..3 {
            r.lp.tick();
        }
        let ev = r.errors.recv_timeout(WAIT).unwrap();
        assert!(ev.contains(ErrorCode::AcquisitionFault));
        assert_eq!(r.batches.recv_timeout(WAIT).unwrap().first_tick(), 0);
        assert_eq!(r.batches.recv_timeout(WAIT).unwrap().first_tick(), 2);
        r.mux.deactivate(Instant::now() + WAIT);
    }

    #[test]
    fn settling_window_keeps_error_and_button_channels_flowing() {
        let fe = ScriptedFrontend::new([
            Step::Row([1.0; 4]),
            Step::Row([1.0; 4]),
            Step::Fault("board busy"),
            Step::Row([1.0; 4]),
            Step::Row([1.0; 4]),
        ]);
        let pin = timeswipe_hardware::SimulatedButton::new();
        let press = pin.handle();
        let button = ButtonInput {
            source: Box::new(pin),
            tracker: ButtonTracker::new(1),
        };
        let mut r = rig_with_button(fe, cfg(1, 3, 0), Some(button));
        r.lp.tick();
        assert_eq!(r.batches.recv_timeout(WAIT).unwrap().first_tick(), 0);

        r.settings.set_bridge(1).unwrap();
        press.press();
        r.lp.tick();
        r.lp.tick();
        r.lp.tick();

        let ev = r.errors.recv_timeout(WAIT).unwrap();
        assert_eq!(ev.count(ErrorCode::AcquisitionFault), 1);
        let pressed = r.buttons.recv_timeout(WAIT).unwrap();
        assert_eq!((pressed.pressed, pressed.counter), (true, 1));
        assert!(r.batches.try_recv().is_err());

        r.lp.tick();
        assert_eq!(r.batches.recv_timeout(WAIT).unwrap().first_tick(), 4);
        assert_eq!(r.lp.stats.faults.load(Ordering::Relaxed), 1);
        assert_eq!(r.lp.stats.discarded_ticks.load(Ordering::Relaxed), 2);
        r.mux.deactivate(Instant::now() + WAIT);
    }

    #[test]
    fn finish_disables_measurement() {
        let fe = ScriptedFrontend::constant([0.0; 4]);
        let mut r = rig(fe, cfg(10, 0, 0));
        r.lp.hw.frontend.set_measuring(true).unwrap();
        assert!(r.fe.is_measuring());
        r.lp.tick();
        let _hw = r.lp.finish();
        assert!(!r.fe.is_measuring());
        assert!(r.batches.try_recv().is_err());
        r.mux.deactivate(Instant::now() + WAIT);
    }

    #[test]
    fn schedule_reanchors_when_far_behind() {
        let t0 = Instant::now();
        let p = Duration::from_millis(1);
        assert_eq!(next_deadline(t0, t0, p), (t0 + p, false));
        assert_eq!(next_deadline(t0, t0 + p * 2, p), (t0 + p, false));
        let late = t0 + p * 5;
        assert_eq!(next_deadline(t0, late, p), (late, true));
    }
}
