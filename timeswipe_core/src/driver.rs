//! Stream controller: the public start/stop lifecycle and command surface.
//!
//! State machine: `Stopped -> Starting -> Running -> Stopping -> Stopped`.
//! `start` and `stop` are serialized by one lock; `state()` and the settings
//! commands never take it, so they are safe to call from any thread and from
//! inside consumer callbacks.

use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};
use std::time::{Duration, Instant};

use crossbeam_channel as xch;
use parking_lot::Mutex;
use serde_json::Value;
use timeswipe_traits::CHANNELS;
use timeswipe_traits::clock::Clock;

use crate::config::{AcquisitionCfg, ButtonCfg};
use crate::error::{DriverError, DriverResult};
use crate::events::{ButtonEvent, ErrorEvent, SampleBatch};
use crate::mux::{EventConsumers, EventMux};
use crate::sampler::{AcquisitionThread, Hardware, Recovered, TickLoop};
use crate::settings::{SettingsStore, Snapshot, StreamParams};
use crate::stats::{Stats, StreamStats};
use crate::util;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamState {
    Stopped,
    Starting,
    Running,
    Stopping,
}

const STOPPED: u8 = 0;
const STARTING: u8 = 1;
const RUNNING: u8 = 2;
const STOPPING: u8 = 3;

impl StreamState {
    fn from_u8(v: u8) -> Self {
        match v {
            STARTING => StreamState::Starting,
            RUNNING => StreamState::Running,
            STOPPING => StreamState::Stopping,
            _ => StreamState::Stopped,
        }
    }
}

/// Where the hardware is between streams.
enum Slot {
    Idle(Hardware),
    /// A detached acquisition thread will hand it back when its read returns.
    Pending(xch::Receiver<Hardware>),
    Lost,
}

struct Inner {
    slot: Slot,
    run: Option<AcquisitionThread>,
    mux: EventMux,
    /// Shape of the current or most recent stream.
    run_cfg: AcquisitionCfg,
}

impl Inner {
    fn take_hardware(&mut self, wait: Duration) -> DriverResult<Hardware> {
        match std::mem::replace(&mut self.slot, Slot::Lost) {
            Slot::Idle(hw) => Ok(hw),
            Slot::Pending(rx) => match rx.recv_timeout(wait) {
                Ok(hw) => Ok(hw),
                Err(xch::RecvTimeoutError::Timeout) => {
                    self.slot = Slot::Pending(rx);
                    Err(DriverError::AcquisitionFault(
                        "previous stream has not released the hardware".into(),
                    ))
                }
                Err(xch::RecvTimeoutError::Disconnected) => Err(DriverError::AcquisitionFault(
                    "hardware lost: acquisition thread exited abnormally".into(),
                )),
            },
            Slot::Lost => Err(DriverError::AcquisitionFault(
                "hardware lost: acquisition thread exited abnormally".into(),
            )),
        }
    }
}

/// Four-channel acquisition driver.
///
/// Build one with [`Driver::builder`](crate::Driver::builder). Dropping a
/// running driver stops the stream.
pub struct Driver {
    pub(crate) settings: Arc<SettingsStore>,
    pub(crate) acq: AcquisitionCfg,
    pub(crate) button_cfg: ButtonCfg,
    pub(crate) clock: Arc<dyn Clock + Send + Sync>,
    state: AtomicU8,
    inner: Mutex<Inner>,
    consumers: Arc<Mutex<EventConsumers>>,
    stats: Arc<Stats>,
}

impl std::fmt::Debug for Driver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Driver")
            .field("state", &self.state())
            .field("acquisition", &self.acq)
            .field("settings", &self.settings.snapshot())
            .finish()
    }
}

impl Driver {
    pub(crate) fn assemble(
        hardware: Hardware,
        settings: Arc<SettingsStore>,
        acq: AcquisitionCfg,
        button_cfg: ButtonCfg,
        clock: Arc<dyn Clock + Send + Sync>,
    ) -> Self {
        Self {
            settings,
            acq: acq.clone(),
            button_cfg,
            clock,
            state: AtomicU8::new(STOPPED),
            inner: Mutex::new(Inner {
                slot: Slot::Idle(hardware),
                run: None,
                mux: EventMux::new(),
                run_cfg: acq.clone(),
            }),
            consumers: Arc::new(Mutex::new(EventConsumers::default())),
            stats: Arc::new(Stats::default()),
        }
    }

    pub fn state(&self) -> StreamState {
        StreamState::from_u8(self.state.load(Ordering::Acquire))
    }

    pub fn is_running(&self) -> bool {
        self.state() == StreamState::Running
    }

    pub fn stats(&self) -> StreamStats {
        self.stats.snapshot()
    }

    /// Acquisition parameters the next (or running) stream uses, including
    /// `SampleRate` and `BurstSize` changes made through the settings.
    pub fn acquisition(&self) -> AcquisitionCfg {
        self.shaped(self.settings.params())
    }

    fn shaped(&self, p: StreamParams) -> AcquisitionCfg {
        AcquisitionCfg {
            sample_rate_hz: p.sample_rate_hz,
            batch_rows: p.batch_rows,
            ..self.acq.clone()
        }
    }

    /// Start streaming into `consumer`.
    ///
    /// The consumer receives every completed batch plus the number of batches
    /// dropped since its previous call. It runs on a dedicated thread and may
    /// block; a slow consumer costs dropped batches, never sampling ticks.
    ///
    /// Hardware failures while arming are returned here and leave the stream
    /// `Stopped`.
    pub fn start<F>(&self, consumer: F) -> DriverResult<()>
    where
        F: FnMut(SampleBatch, u64) + Send + 'static,
    {
        let mut inner = self.inner.lock();
        if self
            .state
            .compare_exchange(STOPPED, STARTING, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(DriverError::AlreadyRunning);
        }
        let acq = self.shaped(self.settings.freeze_params());
        match self.start_locked(&mut inner, acq, Box::new(consumer)) {
            Ok(()) => {
                self.state.store(RUNNING, Ordering::Release);
                tracing::info!(
                    rate_hz = inner.run_cfg.sample_rate_hz,
                    batch_rows = inner.run_cfg.batch_rows,
                    "stream started"
                );
                Ok(())
            }
            Err(e) => {
                self.settings.release_params();
                self.state.store(STOPPED, Ordering::Release);
                tracing::error!(error = %e, "stream failed to start");
                Err(e)
            }
        }
    }

    fn start_locked(
        &self,
        inner: &mut Inner,
        acq: AcquisitionCfg,
        consumer: crate::mux::DataConsumer,
    ) -> DriverResult<()> {
        let mut hw = inner.take_hardware(inner.run_cfg.stop_grace())?;
        inner.run_cfg = acq.clone();
        if let Err(e) = hw.arm(&self.settings) {
            inner.slot = Slot::Idle(hw);
            return Err(e);
        }
        let producer = match inner.mux.activate(
            acq.queue_capacity,
            consumer,
            Arc::clone(&self.consumers),
            Arc::clone(&self.stats),
        ) {
            Ok(p) => p,
            Err(e) => {
                let _ = hw.frontend.set_measuring(false);
                inner.slot = Slot::Idle(hw);
                return Err(e);
            }
        };
        let poll_ticks = util::ticks_for_ms(self.button_cfg.poll_ms, acq.sample_rate_hz);
        let lp = TickLoop::new(
            hw,
            Arc::clone(&self.settings),
            producer,
            Arc::clone(&self.stats),
            &acq,
            poll_ticks,
        );
        let (period, grace) = (acq.period(), acq.stop_grace());
        match AcquisitionThread::spawn(lp, Arc::clone(&self.clock), period) {
            Ok(t) => {
                inner.run = Some(t);
                Ok(())
            }
            Err((e, hw)) => {
                inner.mux.deactivate(Instant::now() + grace);
                inner.slot = hw.map_or(Slot::Lost, Slot::Idle);
                Err(e)
            }
        }
    }

    /// Stop streaming. Returns once no consumer callback can start anymore;
    /// the partial batch is discarded.
    ///
    /// Waits at most [`AcquisitionCfg::stop_grace`] for the workers. A
    /// callback that is still running after that is left to finish on its
    /// own thread but receives nothing further.
    pub fn stop(&self) -> DriverResult<()> {
        let mut inner = self.inner.lock();
        if self
            .state
            .compare_exchange(RUNNING, STOPPING, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(DriverError::NotRunning);
        }
        let started = Instant::now();
        let deadline = started + inner.run_cfg.stop_grace();

        let run = inner.run.take();
        if let Some(t) = run.as_ref() {
            t.signal();
        }
        let report = inner.mux.deactivate(deadline);
        inner.slot = match run.map(|t| t.stop(deadline)) {
            Some(Recovered::Returned(hw)) => Slot::Idle(hw),
            Some(Recovered::Pending(rx)) => Slot::Pending(rx),
            None => Slot::Lost,
        };
        self.settings.release_params();
        self.state.store(STOPPED, Ordering::Release);
        tracing::info!(
            elapsed_ms = started.elapsed().as_millis() as u64,
            detached = report.detached,
            discarded_batches = report.discarded_batches,
            "stream stopped"
        );
        Ok(())
    }

    /// Register the button consumer. Only allowed while stopped; the
    /// registration persists across start/stop cycles.
    pub fn on_button<F>(&self, consumer: F) -> DriverResult<()>
    where
        F: FnMut(ButtonEvent) + Send + 'static,
    {
        let _inner = self.inner.lock();
        if self.state() != StreamState::Stopped {
            return Err(DriverError::AlreadyRunning);
        }
        self.consumers.lock().button.set(Box::new(consumer));
        Ok(())
    }

    /// Register the error consumer. Only allowed while stopped; the
    /// registration persists across start/stop cycles.
    pub fn on_error<F>(&self, consumer: F) -> DriverResult<()>
    where
        F: FnMut(ErrorEvent) + Send + 'static,
    {
        let _inner = self.inner.lock();
        if self.state() != StreamState::Stopped {
            return Err(DriverError::AlreadyRunning);
        }
        self.consumers.lock().error.set(Box::new(consumer));
        Ok(())
    }

    // ── Settings commands (any state) ──────────────────────────────────────

    /// Report the current value of every key in `document`; never writes.
    pub fn get_settings(&self, document: &Value) -> DriverResult<Value> {
        self.settings.get(document)
    }

    /// Apply a settings document: literal values are validated and applied
    /// atomically, `"?"` placeholders are answered.
    pub fn set_settings(&self, document: &Value) -> DriverResult<Value> {
        self.settings.apply(document)
    }

    pub fn set_bridge(&self, selection: i64) -> DriverResult<()> {
        self.settings.set_bridge(selection)
    }

    pub fn set_sensor_offsets(&self, offsets: [f64; CHANNELS]) -> DriverResult<()> {
        self.settings.set_offsets(offsets)
    }

    pub fn set_sensor_gains(&self, gains: [f64; CHANNELS]) -> DriverResult<()> {
        self.settings.set_gains(gains)
    }

    pub fn set_sensor_transmissions(&self, transmissions: [f64; CHANNELS]) -> DriverResult<()> {
        self.settings.set_transmissions(transmissions)
    }

    /// Tick rate for the next stream. `InvalidArgument` while streaming.
    pub fn set_sample_rate(&self, hz: u32) -> DriverResult<()> {
        self.settings.set_sample_rate(hz)
    }

    /// Rows per batch for the next stream. `InvalidArgument` while streaming.
    pub fn set_burst_size(&self, rows: usize) -> DriverResult<()> {
        self.settings.set_burst_size(rows)
    }

    /// Current calibration and routing.
    pub fn settings(&self) -> Arc<Snapshot> {
        self.settings.snapshot()
    }
}

impl Drop for Driver {
    fn drop(&mut self) {
        if self.is_running() {
            let _ = self.stop();
        }
    }
}
