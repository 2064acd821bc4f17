pub mod clock;

pub use clock::{Clock, MonotonicClock};

/// Number of analog input channels on the board.
pub const CHANNELS: usize = 4;

/// One raw reading per channel, in fixed channel order.
pub type RawRow = [f64; CHANNELS];

pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Signal routing of the sensor front end.
///
/// The board toggles bridge excitation for all channels at once, so exactly
/// one selection is active at any time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Hash)]
pub enum Bridge {
    #[default]
    Off,
    On,
}

impl Bridge {
    pub const fn as_i64(self) -> i64 {
        match self {
            Bridge::Off => 0,
            Bridge::On => 1,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UnknownBridge(pub i64);

impl std::fmt::Display for UnknownBridge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "unknown bridge selection {} (expected 0 or 1)", self.0)
    }
}

impl std::error::Error for UnknownBridge {}

impl TryFrom<i64> for Bridge {
    type Error = UnknownBridge;

    fn try_from(v: i64) -> Result<Self, Self::Error> {
        match v {
            0 => Ok(Bridge::Off),
            1 => Ok(Bridge::On),
            other => Err(UnknownBridge(other)),
        }
    }
}

/// Acquisition hardware seen from the sampler.
pub trait SensorFrontend {
    /// Read one row of raw channel values, returning within `timeout` or failing.
    fn read_channels(&mut self, timeout: std::time::Duration) -> Result<RawRow, BoxError>;

    /// Route the front end to `bridge`. Called from the acquisition thread only.
    fn select_bridge(&mut self, _bridge: Bridge) -> Result<(), BoxError> {
        Ok(())
    }

    /// Enable or disable conversions on the board.
    fn set_measuring(&mut self, _on: bool) -> Result<(), BoxError> {
        Ok(())
    }
}

/// Level-sampled user button.
pub trait ButtonSource {
    fn is_pressed(&mut self) -> bool;
}

impl<T: SensorFrontend + ?Sized> SensorFrontend for Box<T> {
    fn read_channels(&mut self, timeout: std::time::Duration) -> Result<RawRow, BoxError> {
        (**self).read_channels(timeout)
    }
    fn select_bridge(&mut self, bridge: Bridge) -> Result<(), BoxError> {
        (**self).select_bridge(bridge)
    }
    fn set_measuring(&mut self, on: bool) -> Result<(), BoxError> {
        (**self).set_measuring(on)
    }
}

impl<T: ButtonSource + ?Sized> ButtonSource for Box<T> {
    fn is_pressed(&mut self) -> bool {
        (**self).is_pressed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bridge_accepts_known_values_only() {
        assert_eq!(Bridge::try_from(0), Ok(Bridge::Off));
        assert_eq!(Bridge::try_from(1), Ok(Bridge::On));
        assert_eq!(Bridge::try_from(2), Err(UnknownBridge(2)));
        assert_eq!(Bridge::try_from(-1), Err(UnknownBridge(-1)));
        assert_eq!(Bridge::On.as_i64(), 1);
    }
}
