//! Simulated board for development machines and tests.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::time::Duration;

use timeswipe_traits::{BoxError, Bridge, ButtonSource, CHANNELS, RawRow, SensorFrontend};

use crate::error::HwError;

/// Offset added to every channel while the bridge is on, so routing changes
/// are visible in the simulated data.
const BRIDGE_OFFSET_COUNTS: f64 = 100.0;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Waveform {
    /// `midpoint + amplitude * sin(2π (ch+1) t)`, rounded to whole counts.
    Sine { midpoint: f64, amplitude: f64 },
    /// The same row on every read.
    Constant(RawRow),
}

impl Default for Waveform {
    fn default() -> Self {
        Waveform::Sine {
            midpoint: 32767.0,
            amplitude: 3276.0,
        }
    }
}

#[derive(Debug, Default)]
struct Shared {
    fail_next: AtomicU32,
    stuck: AtomicBool,
    reads: AtomicU64,
}

/// Cloneable remote control for a `SimulatedFrontend` owned by another thread.
#[derive(Debug, Clone, Default)]
pub struct SimControl {
    inner: Arc<Shared>,
}

impl SimControl {
    /// Make the next `n` reads fail.
    pub fn fail_next(&self, n: u32) {
        self.inner.fail_next.store(n, Ordering::Relaxed);
    }

    /// Fail every read until cleared.
    pub fn set_stuck(&self, stuck: bool) {
        self.inner.stuck.store(stuck, Ordering::Relaxed);
    }

    /// Successful and failed reads so far.
    pub fn reads(&self) -> u64 {
        self.inner.reads.load(Ordering::Relaxed)
    }
}

pub struct SimulatedFrontend {
    sample_rate_hz: u32,
    tick: u64,
    waveform: Waveform,
    bridge: Bridge,
    measuring: bool,
    control: SimControl,
}

impl SimulatedFrontend {
    pub fn new(sample_rate_hz: u32) -> Self {
        Self {
            sample_rate_hz: sample_rate_hz.max(1),
            tick: 0,
            waveform: Waveform::default(),
            bridge: Bridge::Off,
            measuring: false,
            control: SimControl::default(),
        }
    }

    pub fn constant(row: RawRow) -> Self {
        Self::new(1).with_waveform(Waveform::Constant(row))
    }

    pub fn with_waveform(mut self, waveform: Waveform) -> Self {
        self.waveform = waveform;
        self
    }

    pub fn control(&self) -> SimControl {
        self.control.clone()
    }

    pub fn bridge(&self) -> Bridge {
        self.bridge
    }

    fn next_row(&mut self) -> RawRow {
        let t = self.tick as f64 / f64::from(self.sample_rate_hz);
        self.tick = self.tick.wrapping_add(1);
        let bias = match self.bridge {
            Bridge::On => BRIDGE_OFFSET_COUNTS,
            Bridge::Off => 0.0,
        };
        match self.waveform {
            Waveform::Constant(row) => row.map(|v| v + bias),
            Waveform::Sine {
                midpoint,
                amplitude,
            } => {
                let mut row = [0.0; CHANNELS];
                for (ch, v) in row.iter_mut().enumerate() {
                    let freq = (ch + 1) as f64;
                    *v = (midpoint + amplitude * (std::f64::consts::TAU * freq * t).sin() + bias)
                        .round();
                }
                row
            }
        }
    }
}

impl SensorFrontend for SimulatedFrontend {
    fn read_channels(&mut self, _timeout: Duration) -> Result<RawRow, BoxError> {
        let shared = &self.control.inner;
        shared.reads.fetch_add(1, Ordering::Relaxed);
        if !self.measuring {
            return Err(Box::new(HwError::Simulated("measurement disabled".into())));
        }
        if shared.stuck.load(Ordering::Relaxed) {
            return Err(Box::new(HwError::Timeout));
        }
        let pending = shared.fail_next.load(Ordering::Relaxed);
        if pending > 0 {
            shared.fail_next.store(pending - 1, Ordering::Relaxed);
            return Err(Box::new(HwError::Simulated("injected read fault".into())));
        }
        Ok(self.next_row())
    }

    fn select_bridge(&mut self, bridge: Bridge) -> Result<(), BoxError> {
        tracing::debug!(?bridge, "simulated bridge select");
        self.bridge = bridge;
        Ok(())
    }

    fn set_measuring(&mut self, on: bool) -> Result<(), BoxError> {
        self.measuring = on;
        Ok(())
    }
}

/// Button whose level is driven through a `ButtonHandle`.
#[derive(Debug, Default)]
pub struct SimulatedButton {
    pressed: Arc<AtomicBool>,
}

#[derive(Debug, Clone)]
pub struct ButtonHandle {
    pressed: Arc<AtomicBool>,
}

impl SimulatedButton {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn handle(&self) -> ButtonHandle {
        ButtonHandle {
            pressed: self.pressed.clone(),
        }
    }
}

impl ButtonHandle {
    pub fn press(&self) {
        self.pressed.store(true, Ordering::Relaxed);
    }

    pub fn release(&self) {
        self.pressed.store(false, Ordering::Relaxed);
    }
}

impl ButtonSource for SimulatedButton {
    fn is_pressed(&mut self) -> bool {
        self.pressed.load(Ordering::Relaxed)
    }
}
