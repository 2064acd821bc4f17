//! Real-time setup for the streaming process (Linux SCHED_FIFO / affinity / mlockall).
//!
//! Applied on the main thread before the driver starts, so the acquisition
//! thread inherits the policy, the CPU mask and the locked address space.

use crate::cli::RtLock;

#[cfg(target_os = "linux")]
pub fn setup_rt_once(rt: bool, prio: Option<i32>, lock: RtLock, rt_cpu: Option<usize>) {
    use std::sync::OnceLock;
    static RT_ONCE: OnceLock<()> = OnceLock::new();

    if !rt {
        return;
    }

    // Apply SCHED_FIFO priority, clamped to the system range.
    fn try_apply_fifo_priority(prio: Option<i32>) -> eyre::Result<i32> {
        use libc::{SCHED_FIFO, sched_get_priority_max, sched_get_priority_min, sched_param};
        let (min, max) = unsafe {
            let min = sched_get_priority_min(SCHED_FIFO);
            let max = sched_get_priority_max(SCHED_FIFO);
            if min < 0 || max < 0 {
                (1, 99)
            } else {
                (min, max)
            }
        };
        let prio_val = prio.unwrap_or(max).clamp(min, max);
        let param = sched_param {
            sched_priority: prio_val,
        };
        let rc = unsafe { libc::sched_setscheduler(0, SCHED_FIFO, &param) };
        if rc != 0 {
            let err = std::io::Error::last_os_error();
            let hint = if err.raw_os_error() == Some(libc::EPERM) {
                "; hint: needs CAP_SYS_NICE or root"
            } else {
                ""
            };
            eyre::bail!("sched_setscheduler(SCHED_FIFO, {prio_val}) failed: {err}{hint}");
        }
        Ok(prio_val)
    }

    #[cfg(feature = "rt")]
    fn try_apply_mem_lock(lock: RtLock) -> eyre::Result<()> {
        match lock {
            RtLock::None => Ok(()),
            RtLock::Current => timeswipe_hardware::rt::lock_memory(false)
                .map_err(|e| eyre::eyre!("mlockall(current) failed: {e}")),
            RtLock::All => timeswipe_hardware::rt::lock_memory(true)
                .or_else(|_| timeswipe_hardware::rt::lock_memory(false))
                .map_err(|e| {
                    eyre::eyre!("mlockall failed: {e}; hint: needs CAP_IPC_LOCK and 'ulimit -l'")
                }),
        }
    }

    #[cfg(not(feature = "rt"))]
    fn try_apply_mem_lock(lock: RtLock) -> eyre::Result<()> {
        if lock == RtLock::None {
            return Ok(());
        }
        eyre::bail!("memory locking requires the `rt` feature")
    }

    #[cfg(feature = "rt")]
    fn try_apply_affinity(cpu: usize) -> eyre::Result<()> {
        timeswipe_hardware::rt::pin_current_thread(cpu)
            .map_err(|e| eyre::eyre!("pin to CPU {cpu} failed: {e}"))
    }

    #[cfg(not(feature = "rt"))]
    fn try_apply_affinity(_cpu: usize) -> eyre::Result<()> {
        eyre::bail!("CPU pinning requires the `rt` feature")
    }

    RT_ONCE.get_or_init(|| {
        match try_apply_mem_lock(lock) {
            Ok(()) => tracing::info!(?lock, "RT: memory lock applied"),
            Err(err) => tracing::warn!(error = %err, "RT: memory lock not applied"),
        }
        match try_apply_fifo_priority(prio) {
            Ok(p) => tracing::info!(prio = p, "RT: SCHED_FIFO applied"),
            Err(err) => tracing::warn!(error = %err, "RT: SCHED_FIFO not applied"),
        }
        let cpu = rt_cpu.unwrap_or(0);
        match try_apply_affinity(cpu) {
            Ok(()) => tracing::info!(cpu, "RT: affinity applied"),
            Err(err) => tracing::warn!(error = %err, "RT: affinity not applied"),
        }
    });
}

#[cfg(not(target_os = "linux"))]
pub fn setup_rt_once(rt: bool, _prio: Option<i32>, _lock: RtLock, _rt_cpu: Option<usize>) {
    if rt {
        tracing::warn!("real-time mode is only supported on Linux; continuing without it");
    }
}
