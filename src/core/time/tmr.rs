//! Timer record and the software timer API.
//!
//! A timer counts down `delay` ticks from `start`, runs its callback in the
//! tick-interrupt context, wakes every task waiting on it, and reloads from
//! `period` if periodic. Delayed tasks share the same record prefix and the
//! same deadline ring; only the expiry path tells them apart.

use core::ptr::NonNull;

use crate::critical::critical_section;
use crate::error::{OsError, OsResult};
use crate::kernel;
use crate::obj::{tmr_obj, ObjHead};
use crate::port;
use crate::sched;
use crate::time;
use crate::types::{Cnt, Event, Fun, ObjId, E_SUCCESS, INFINITE};

/// Timer record. Also the deadline-ring prefix of every task record.
#[repr(C)]
pub struct OsTmr {
    /// Object header; first field of every kernel record.
    pub obj: ObjHead,
    /// Callback for timers, entry function for tasks.
    pub state: Option<Fun>,
    /// Tick at which the current countdown began.
    pub start: Cnt,
    /// Remaining countdown span; `INFINITE` never expires.
    pub delay: Cnt,
    /// Reload span for periodic timers; 0 stops after one shot.
    pub period: Cnt,
}

impl OsTmr {
    pub const fn new() -> Self {
        OsTmr {
            obj: ObjHead::new(ObjId::Stopped),
            state: None,
            start: 0,
            delay: 0,
            period: 0,
        }
    }
}

impl Default for OsTmr {
    fn default() -> Self {
        Self::new()
    }
}

// SAFETY: timer records are only mutated under the kernel lock.
unsafe impl Send for OsTmr {}
unsafe impl Sync for OsTmr {}

/// Initialize a timer with an optional expiry callback.
///
/// The callback runs in the tick-interrupt context with interrupts masked;
/// it may post and wake but must not block.
pub fn tmr_init(tmr: &'static mut OsTmr, state: Option<Fun>) {
    debug_assert!(!port::port_isr_inside());

    critical_section(|_| {
        *tmr = OsTmr::new();
        tmr.state = state;
    });
}

/// Allocate and initialize a timer from the system region.
///
/// Returns `None` when the region is exhausted.
pub fn tmr_create(state: Option<Fun>) -> Option<NonNull<OsTmr>> {
    debug_assert!(!port::port_isr_inside());

    critical_section(|_| unsafe {
        let base = kernel::core_sys_alloc(core::mem::size_of::<OsTmr>());
        let tmr = NonNull::new(base as *mut OsTmr)?;
        (*tmr.as_ptr()).state = state;
        (*tmr.as_ptr()).obj.res = base;
        Some(tmr)
    })
}

unsafe fn priv_tmr_start(tmr: NonNull<OsTmr>) {
    unsafe {
        if (*tmr.as_ptr()).obj.id != ObjId::Stopped {
            time::core_tmr_remove(tmr);
        }
        time::core_tmr_insert(tmr, ObjId::Timer);
    }
}

/// Start a countdown of `delay` ticks; reload from `period` on expiry.
///
/// # Safety
/// `tmr` must point to an initialized timer record.
pub unsafe fn tmr_start(tmr: NonNull<OsTmr>, delay: Cnt, period: Cnt) {
    critical_section(|_| unsafe {
        let t = &mut *tmr.as_ptr();
        t.start = time::sys_time();
        t.delay = delay;
        t.period = period;

        priv_tmr_start(tmr);
    });
}

/// Start a countdown with a new callback.
///
/// # Safety
/// `tmr` must point to an initialized timer record.
pub unsafe fn tmr_start_from(tmr: NonNull<OsTmr>, delay: Cnt, period: Cnt, proc: Fun) {
    critical_section(|_| unsafe {
        let t = &mut *tmr.as_ptr();
        t.state = Some(proc);
        t.start = time::sys_time();
        t.delay = delay;
        t.period = period;

        priv_tmr_start(tmr);
    });
}

/// One-shot countdown to an absolute tick. A deadline already in the past
/// (more than half the counter range behind) is clamped to fire at once.
///
/// # Safety
/// `tmr` must point to an initialized timer record.
pub unsafe fn tmr_start_until(tmr: NonNull<OsTmr>, until: Cnt) {
    critical_section(|_| unsafe {
        let t = &mut *tmr.as_ptr();
        t.start = time::sys_time();
        t.delay = until.wrapping_sub(t.start);
        if t.delay > INFINITE >> 1 {
            t.delay = 0;
        }
        t.period = 0;

        priv_tmr_start(tmr);
    });
}

/// Restart an expired or running timer with a new span, keeping its anchor.
///
/// # Safety
/// `tmr` must point to an initialized timer record.
pub unsafe fn tmr_start_next(tmr: NonNull<OsTmr>, delay: Cnt) {
    critical_section(|_| unsafe {
        (*tmr.as_ptr()).delay = delay;

        priv_tmr_start(tmr);
    });
}

/// Kill a timer: wake all waiters with `STOPPED`, detach from the ring.
///
/// # Safety
/// `tmr` must point to an initialized timer record.
pub unsafe fn tmr_kill(tmr: NonNull<OsTmr>) {
    debug_assert!(!port::port_isr_inside());

    critical_section(|_| unsafe {
        if (*tmr.as_ptr()).obj.id != ObjId::Stopped {
            sched::core_all_wakeup(tmr_obj(tmr), crate::types::E_STOPPED);
            time::core_tmr_remove(tmr);
        }
    });
}

/// Kill a timer and release its storage if it owns one.
///
/// # Safety
/// `tmr` must point to an initialized timer record; the handle must not be
/// used again except to re-init.
pub unsafe fn tmr_delete(tmr: NonNull<OsTmr>) {
    critical_section(|_| unsafe {
        tmr_kill(tmr);
        kernel::core_sys_free((*tmr.as_ptr()).obj.res);
    });
}

/// Non-blocking check: has the timer finished counting?
///
/// # Safety
/// `tmr` must point to an initialized timer record.
pub unsafe fn tmr_take(tmr: NonNull<OsTmr>) -> OsResult<()> {
    critical_section(|_| unsafe {
        if (*tmr.as_ptr()).obj.id == ObjId::Stopped {
            Ok(())
        } else {
            Err(OsError::Timeout)
        }
    })
}

/// Wait up to `delay` ticks for the timer to expire.
///
/// # Safety
/// `tmr` must point to an initialized timer record.
pub unsafe fn tmr_wait_for(tmr: NonNull<OsTmr>, delay: Cnt) -> Event {
    debug_assert!(!port::port_isr_inside());

    critical_section(|_| unsafe {
        if (*tmr.as_ptr()).obj.id == ObjId::Stopped {
            E_SUCCESS
        } else {
            sched::core_tsk_wait_for(tmr_obj(tmr), delay)
        }
    })
}

/// Wait until the absolute tick `time` for the timer to expire.
///
/// # Safety
/// `tmr` must point to an initialized timer record.
pub unsafe fn tmr_wait_until(tmr: NonNull<OsTmr>, time_: Cnt) -> Event {
    debug_assert!(!port::port_isr_inside());

    critical_section(|_| unsafe {
        if (*tmr.as_ptr()).obj.id == ObjId::Stopped {
            E_SUCCESS
        } else {
            sched::core_tsk_wait_until(tmr_obj(tmr), time_)
        }
    })
}

/// Wait indefinitely for the timer to expire.
///
/// # Safety
/// `tmr` must point to an initialized timer record.
pub unsafe fn tmr_wait(tmr: NonNull<OsTmr>) -> Event {
    unsafe { tmr_wait_for(tmr, INFINITE) }
}
