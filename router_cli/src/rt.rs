//! Real-time scheduling helpers (Linux SCHED_FIFO / affinity / mlockall;
//! macOS mlockall).

use crate::cli::RtLock;

#[cfg(target_os = "linux")]
pub fn setup_rt_once(rt: bool, prio: Option<i32>, lock: RtLock, rt_cpu: Option<usize>) {
    use libc::{
        sched_get_priority_max, sched_get_priority_min, sched_param, sched_setscheduler,
        CPU_ISSET, CPU_SET, CPU_ZERO, SCHED_FIFO,
    };
    use std::sync::OnceLock;
    static RT_ONCE: OnceLock<()> = OnceLock::new();

    if !rt {
        return;
    }

    fn try_apply_mem_lock(lock: RtLock) -> eyre::Result<()> {
        use libc::{mlockall, MCL_CURRENT, MCL_FUTURE};
        let flags = match lock {
            RtLock::None => return Ok(()),
            RtLock::Current => MCL_CURRENT,
            RtLock::All => MCL_CURRENT | MCL_FUTURE,
        };
        let rc = unsafe { mlockall(flags) };
        if rc != 0 {
            let err = std::io::Error::last_os_error();
            // All commonly fails on memlock limits; retry with Current.
            if matches!(lock, RtLock::All)
                && matches!(err.raw_os_error(), Some(c) if c == libc::EPERM || c == libc::ENOMEM)
                && unsafe { mlockall(MCL_CURRENT) } == 0
            {
                return Ok(());
            }
            return Err(eyre::eyre!(
                "mlockall failed: {err}; hint: needs CAP_IPC_LOCK (or root) and sufficient 'ulimit -l'"
            ));
        }
        Ok(())
    }

    fn try_apply_fifo_priority(prio: Option<i32>) -> eyre::Result<()> {
        let (min, max) = unsafe {
            let min = sched_get_priority_min(SCHED_FIFO);
            let max = sched_get_priority_max(SCHED_FIFO);
            if min < 0 || max < 0 { (1, 99) } else { (min, max) }
        };
        let param = sched_param {
            sched_priority: prio.unwrap_or(max).clamp(min, max),
        };
        let rc = unsafe { sched_setscheduler(0, SCHED_FIFO, &param) };
        if rc != 0 {
            Err(eyre::eyre!(
                "{}; hint: needs CAP_SYS_NICE or root",
                std::io::Error::last_os_error()
            ))
        } else {
            Ok(())
        }
    }

    fn try_apply_affinity(rt_cpu: Option<usize>) -> eyre::Result<()> {
        let online = unsafe { libc::sysconf(libc::_SC_NPROCESSORS_ONLN) };
        if online < 1 {
            eyre::bail!("_SC_NPROCESSORS_ONLN < 1");
        }
        let target = rt_cpu.unwrap_or(0);
        if target as libc::c_long >= online {
            eyre::bail!("requested CPU {target} >= online {online}");
        }
        let mut allowed: libc::cpu_set_t = unsafe { std::mem::zeroed() };
        let rc = unsafe {
            libc::sched_getaffinity(0, std::mem::size_of::<libc::cpu_set_t>(), &mut allowed)
        };
        if rc == 0 && !unsafe { CPU_ISSET(target, &allowed) } {
            eyre::bail!("CPU {target} not permitted by current affinity mask");
        }
        let mut desired: libc::cpu_set_t = unsafe { std::mem::zeroed() };
        unsafe {
            CPU_ZERO(&mut desired);
            CPU_SET(target, &mut desired);
        }
        let rc =
            unsafe { libc::sched_setaffinity(0, std::mem::size_of::<libc::cpu_set_t>(), &desired) };
        if rc != 0 {
            Err(eyre::eyre!(std::io::Error::last_os_error()))
        } else {
            Ok(())
        }
    }

    RT_ONCE.get_or_init(|| {
        match try_apply_mem_lock(lock) {
            Ok(()) => tracing::info!(?lock, "RT: memory lock applied"),
            Err(err) => tracing::warn!(%err, "mlockall failed"),
        }
        if let Err(err) = try_apply_fifo_priority(prio) {
            tracing::warn!(%err, "sched_setscheduler(SCHED_FIFO) failed");
        }
        if let Err(err) = try_apply_affinity(rt_cpu) {
            tracing::warn!(%err, "affinity not applied");
        }
    });
}

#[cfg(target_os = "macos")]
pub fn setup_rt_once(rt: bool, _prio: Option<i32>, lock: RtLock, _rt_cpu: Option<usize>) {
    use libc::{mlockall, MCL_CURRENT, MCL_FUTURE};
    use std::sync::OnceLock;
    static RT_ONCE: OnceLock<()> = OnceLock::new();
    if !rt {
        return;
    }
    RT_ONCE.get_or_init(|| {
        let flags = match lock {
            RtLock::None => {
                tracing::info!("RT: memory locking disabled (none)");
                return;
            }
            RtLock::Current => MCL_CURRENT,
            RtLock::All => MCL_CURRENT | MCL_FUTURE,
        };
        if unsafe { mlockall(flags) } != 0 {
            tracing::warn!(error = %std::io::Error::last_os_error(), "mlockall failed");
        }
        tracing::warn!("macOS does not support SCHED_FIFO or affinity; only mlockall applied");
    });
}

#[cfg(not(any(target_os = "linux", target_os = "macos")))]
pub fn setup_rt_once(rt: bool, _prio: Option<i32>, _lock: RtLock, _rt_cpu: Option<usize>) {
    if rt {
        tracing::warn!("real-time setup not supported on this OS");
    }
}
