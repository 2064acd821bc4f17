//! Raw → physical conversion: `(raw − offset) × gain × transmission` per channel.

use timeswipe_traits::{CHANNELS, RawRow};

use crate::error::{DriverError, DriverResult};
use crate::settings::Snapshot;

/// Convert one channel value. No clamping; finite inputs give finite or
/// infinite results but never panic.
#[inline]
pub fn corrected(raw: f64, offset: f64, gain: f64, transmission: f64) -> f64 {
    (raw - offset) * gain * transmission
}

/// Convert a full row using one settings snapshot.
pub fn calibrate(raw: &RawRow, snap: &Snapshot) -> DriverResult<RawRow> {
    let gains = snap
        .gains
        .as_ref()
        .ok_or_else(|| DriverError::ConfigurationIncomplete("sensor gains not set".into()))?;
    let transmissions = snap.transmissions.as_ref().ok_or_else(|| {
        DriverError::ConfigurationIncomplete("sensor transmissions not set".into())
    })?;

    Ok(std::array::from_fn::<f64, CHANNELS, _>(|ch| {
        corrected(raw[ch], snap.offsets[ch], gains[ch], transmissions[ch])
    }))
}
