//! Maps `Box<dyn Error>` from trait boundaries to typed `DriverError`.
//!
//! The traits in `timeswipe_traits` use `Box<dyn Error + Send + Sync>`; this
//! module converts those to `DriverError::AcquisitionFault`, with an optional
//! feature-gated path for `timeswipe_hardware::HwError` downcasting.

use crate::error::DriverError;

const TIMED_OUT: &str = "read timed out";

/// Map a trait-boundary error to a typed `DriverError`.
///
/// Attempts to downcast known hardware error types first, then falls back
/// to string-based heuristics.
pub fn map_hw_error(e: &(dyn std::error::Error + 'static)) -> DriverError {
    #[cfg(feature = "hardware-errors")]
    {
        use timeswipe_hardware::error::HwError;
        if let Some(hw) = e.downcast_ref::<HwError>() {
            let msg = match hw {
                HwError::Timeout | HwError::DataReadyTimeout => TIMED_OUT.to_string(),
                HwError::FailLine => "board FAIL line asserted".to_string(),
                other => other.to_string(),
            };
            return DriverError::AcquisitionFault(msg);
        }
    }

    let s = e.to_string();
    if s.to_lowercase().contains("timeout") {
        DriverError::AcquisitionFault(TIMED_OUT.to_string())
    } else {
        DriverError::AcquisitionFault(s)
    }
}
