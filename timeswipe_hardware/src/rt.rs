//! Memory locking and CPU pinning for the acquisition process (Linux).

use nix::sched::{CpuSet, sched_setaffinity};
use nix::sys::mman::{MlockAllFlags, mlockall};
use nix::unistd::Pid;

use crate::error::{HwError, Result};

/// Lock resident pages; with `future`, pages mapped later are locked as well.
pub fn lock_memory(future: bool) -> Result<()> {
    let mut flags = MlockAllFlags::MCL_CURRENT;
    if future {
        flags |= MlockAllFlags::MCL_FUTURE;
    }
    mlockall(flags).map_err(|e| HwError::Io(e.into()))
}

/// Pin the calling thread to `cpu`.
pub fn pin_current_thread(cpu: usize) -> Result<()> {
    let mut set = CpuSet::new();
    set.set(cpu).map_err(|e| HwError::Io(e.into()))?;
    sched_setaffinity(Pid::from_raw(0), &set).map_err(|e| HwError::Io(e.into()))
}
