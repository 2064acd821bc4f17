//! `From` implementations bridging `timeswipe_config` types to `timeswipe_core` types.

use std::time::Duration;

use crate::config::{AcquisitionCfg, ButtonCfg, CalibrationPreset};

// ── AcquisitionCfg ───────────────────────────────────────────────────────────

impl From<&timeswipe_config::Acquisition> for AcquisitionCfg {
    fn from(c: &timeswipe_config::Acquisition) -> Self {
        Self {
            sample_rate_hz: c.sample_rate_hz,
            batch_rows: c.batch_rows,
            queue_capacity: c.queue_capacity,
            settling_ticks: c.settling_ticks,
            startup_discard_ticks: c.startup_discard_ticks,
            read_timeout: Duration::from_millis(c.read_timeout_ms),
        }
    }
}

// ── ButtonCfg ────────────────────────────────────────────────────────────────

impl From<&timeswipe_config::ButtonCfg> for ButtonCfg {
    fn from(c: &timeswipe_config::ButtonCfg) -> Self {
        Self {
            poll_ms: c.poll_ms,
            debounce_n: c.debounce_n,
        }
    }
}

// ── CalibrationPreset ────────────────────────────────────────────────────────

impl From<&timeswipe_config::CalibrationCfg> for CalibrationPreset {
    fn from(c: &timeswipe_config::CalibrationCfg) -> Self {
        Self {
            bridge: c.bridge,
            offsets: c.offsets,
            gains: c.gains,
            transmissions: c.transmissions,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_agree_with_file_config() {
        let from_file = AcquisitionCfg::from(&timeswipe_config::Acquisition::default());
        let core = AcquisitionCfg::default();
        assert_eq!(from_file.sample_rate_hz, core.sample_rate_hz);
        assert_eq!(from_file.batch_rows, core.batch_rows);
        assert_eq!(from_file.read_timeout, core.read_timeout);
        let b = ButtonCfg::from(&timeswipe_config::ButtonCfg::default());
        assert_eq!(b.debounce_n, ButtonCfg::default().debounce_n);
    }
}
