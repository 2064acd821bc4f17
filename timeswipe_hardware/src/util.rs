use std::time::{Duration, Instant};

use crate::error::{HwError, Result};

/// Wait until `ready` returns true or `timeout` expires.
/// Sleeps `poll_interval` between checks instead of spinning.
pub fn wait_until_ready_with_timeout(
    mut ready: impl FnMut() -> bool,
    timeout: Duration,
    poll_interval: Duration,
) -> Result<()> {
    let deadline = Instant::now() + timeout;
    while !ready() {
        if Instant::now() >= deadline {
            return Err(HwError::DataReadyTimeout);
        }
        std::thread::sleep(poll_interval);
    }
    Ok(())
}
