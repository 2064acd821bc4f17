//! Type-state builder for `Driver`.
//!
//! `build()` is only available once a sensor front end is set; `try_build()`
//! is always available and reports the missing piece at runtime.

use std::marker::PhantomData;
use std::sync::Arc;

use timeswipe_traits::clock::{Clock, MonotonicClock};
use timeswipe_traits::{ButtonSource, SensorFrontend};

use crate::button::ButtonTracker;
use crate::config::{AcquisitionCfg, ButtonCfg, CalibrationPreset};
use crate::driver::Driver;
use crate::error::{BuildError, Result};
use crate::sampler::{ButtonInput, Hardware};
use crate::settings::{SettingsStore, StreamParams};

/// Highest supported tick rate.
pub const MAX_SAMPLE_RATE_HZ: u32 = 48_000;

// ── Type-state markers ───────────────────────────────────────────────────────

pub struct Missing;
pub struct Set;

pub struct DriverBuilder<F> {
    frontend: Option<Box<dyn SensorFrontend + Send>>,
    button: Option<Box<dyn ButtonSource + Send>>,
    acquisition: Option<AcquisitionCfg>,
    button_cfg: Option<ButtonCfg>,
    calibration: Option<CalibrationPreset>,
    clock: Option<Box<dyn Clock + Send + Sync>>,
    _f: PhantomData<F>,
}

impl Default for DriverBuilder<Missing> {
    fn default() -> Self {
        Self {
            frontend: None,
            button: None,
            acquisition: None,
            button_cfg: None,
            calibration: None,
            clock: None,
            _f: PhantomData,
        }
    }
}

impl Driver {
    pub fn builder() -> DriverBuilder<Missing> {
        DriverBuilder::default()
    }
}

fn invalid(msg: &'static str) -> eyre::Report {
    eyre::Report::new(BuildError::InvalidConfig(msg))
}

fn validate(acq: &AcquisitionCfg, button: &ButtonCfg) -> Result<()> {
    if !(1..=MAX_SAMPLE_RATE_HZ).contains(&acq.sample_rate_hz) {
        return Err(invalid("sample_rate_hz must be in [1, 48000]"));
    }
    if acq.batch_rows == 0 {
        return Err(invalid("batch_rows must be >= 1"));
    }
    if acq.queue_capacity == 0 {
        return Err(invalid("queue_capacity must be >= 1"));
    }
    if acq.read_timeout.is_zero() {
        return Err(invalid("read_timeout must be > 0"));
    }
    if button.poll_ms == 0 {
        return Err(invalid("button poll_ms must be >= 1"));
    }
    if button.debounce_n == 0 {
        return Err(invalid("button debounce_n must be >= 1"));
    }
    Ok(())
}

impl<F> DriverBuilder<F> {
    /// Fallible build available in any type-state.
    pub fn try_build(self) -> Result<Driver> {
        let frontend = self
            .frontend
            .ok_or_else(|| eyre::Report::new(BuildError::MissingFrontend))?;
        let acq = self.acquisition.unwrap_or_default();
        let button_cfg = self.button_cfg.unwrap_or_default();
        validate(&acq, &button_cfg)?;

        let settings = Arc::new(SettingsStore::new(StreamParams::from(&acq)));
        if let Some(preset) = &self.calibration {
            settings
                .apply_preset(preset)
                .map_err(|e| eyre::Report::new(e).wrap_err("invalid calibration"))?;
        }

        let clock: Arc<dyn Clock + Send + Sync> = match self.clock {
            Some(b) => Arc::from(b),
            None => Arc::new(MonotonicClock::new()),
        };
        let hardware = Hardware {
            frontend,
            button: self.button.map(|source| ButtonInput {
                source,
                tracker: ButtonTracker::new(button_cfg.debounce_n),
            }),
        };
        Ok(Driver::assemble(hardware, settings, acq, button_cfg, clock))
    }

    pub fn with_button(mut self, button: impl ButtonSource + Send + 'static) -> Self {
        self.button = Some(Box::new(button));
        self
    }
    pub fn with_acquisition(mut self, acquisition: AcquisitionCfg) -> Self {
        self.acquisition = Some(acquisition);
        self
    }
    pub fn with_button_cfg(mut self, cfg: ButtonCfg) -> Self {
        self.button_cfg = Some(cfg);
        self
    }
    /// Initial calibration; validated like the setters.
    pub fn with_calibration(mut self, preset: CalibrationPreset) -> Self {
        self.calibration = Some(preset);
        self
    }
    /// Provide a custom clock implementation; defaults to `MonotonicClock`.
    pub fn with_clock(mut self, clock: Box<dyn Clock + Send + Sync>) -> Self {
        self.clock = Some(clock);
        self
    }
}

impl DriverBuilder<Missing> {
    pub fn with_frontend(
        self,
        frontend: impl SensorFrontend + Send + 'static,
    ) -> DriverBuilder<Set> {
        DriverBuilder {
            frontend: Some(Box::new(frontend)),
            button: self.button,
            acquisition: self.acquisition,
            button_cfg: self.button_cfg,
            calibration: self.calibration,
            clock: self.clock,
            _f: PhantomData,
        }
    }
}

impl DriverBuilder<Set> {
    /// Validate and build. Only available once a front end is set.
    pub fn build(self) -> Result<Driver> {
        self.try_build()
    }
}
