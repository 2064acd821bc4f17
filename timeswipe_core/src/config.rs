//! Runtime configuration for the acquisition engine.
//!
//! These are separate from the TOML-deserialized config in `timeswipe_config`;
//! see `conversions` for the mapping.

use std::time::Duration;

use timeswipe_traits::CHANNELS;

use crate::util;

/// Sampler and delivery parameters.
#[derive(Debug, Clone)]
pub struct AcquisitionCfg {
    /// Tick rate in Hz.
    pub sample_rate_hz: u32,
    /// Rows per delivered batch.
    pub batch_rows: usize,
    /// Completed batches buffered for the data consumer before the oldest is dropped.
    pub queue_capacity: usize,
    /// Ticks discarded after every bridge change.
    pub settling_ticks: u32,
    /// Ticks discarded after every start.
    pub startup_discard_ticks: u32,
    /// Upper bound on one hardware read.
    pub read_timeout: Duration,
}

impl Default for AcquisitionCfg {
    fn default() -> Self {
        Self {
            sample_rate_hz: 1000,
            batch_rows: 100,
            queue_capacity: 8,
            settling_ticks: 50,
            startup_discard_ticks: 1,
            read_timeout: Duration::from_millis(5),
        }
    }
}

impl AcquisitionCfg {
    #[inline]
    pub fn period(&self) -> Duration {
        util::period(self.sample_rate_hz)
    }

    /// How long `stop()` waits for each worker before detaching it:
    /// one in-flight read plus four tick periods, never below 20 ms.
    pub fn stop_grace(&self) -> Duration {
        (self.read_timeout + self.period() * 4).max(Duration::from_millis(20))
    }
}

/// Button polling and debouncing.
#[derive(Debug, Clone)]
pub struct ButtonCfg {
    /// Polling interval in milliseconds (rounded to whole ticks).
    pub poll_ms: u64,
    /// Consecutive equal polls required to accept a new level.
    pub debounce_n: u8,
}

impl Default for ButtonCfg {
    fn default() -> Self {
        Self {
            poll_ms: 10,
            debounce_n: 3,
        }
    }
}

/// Calibration applied to the settings store when the driver is built.
/// `None` fields keep the store defaults.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CalibrationPreset {
    pub bridge: Option<i64>,
    pub offsets: Option<[f64; CHANNELS]>,
    pub gains: Option<[f64; CHANNELS]>,
    pub transmissions: Option<[f64; CHANNELS]>,
}

impl CalibrationPreset {
    /// Offsets 0, gains 1, transmissions 1.
    pub fn identity() -> Self {
        Self {
            bridge: None,
            offsets: Some([0.0; CHANNELS]),
            gains: Some([1.0; CHANNELS]),
            transmissions: Some([1.0; CHANNELS]),
        }
    }
}
