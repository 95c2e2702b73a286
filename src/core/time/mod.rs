//! Time base, deadline ring and tick handling.
//!
//! Sleeping tasks and periodic timers share one ring, sorted by time to
//! fire and anchored by the `WAIT` sentinel whose span is infinite. The
//! tick handler pops expired entries off the head: timers reload and run
//! their callback, delayed tasks wake with `TIMEOUT`. All comparisons are
//! modular differences against each entry's own anchor, so counter
//! wrap-around is invisible.

mod tmr;

pub use tmr::{
    tmr_create, tmr_delete, tmr_init, tmr_kill, tmr_start, tmr_start_from, tmr_start_next,
    tmr_start_until, tmr_take, tmr_wait, tmr_wait_for, tmr_wait_until, OsTmr,
};

use core::ptr::NonNull;

use crate::config;
use crate::critical::critical_section;
use crate::kernel;
use crate::obj::{self, tmr_obj};
use crate::port;
use crate::sched;
use crate::types::{Cnt, Event, ObjId, E_SUCCESS, E_TIMEOUT, INFINITE};

/// Monotonic kernel time in ticks.
pub fn sys_time() -> Cnt {
    #[cfg(feature = "tickless")]
    {
        port::port_sys_time()
    }

    #[cfg(not(feature = "tickless"))]
    critical_section(|_| unsafe { kernel::tick_count() })
}

/// Splice an entry into the deadline ring, sorted by time to fire.
///
/// The walk compares each candidate's remaining span against the new
/// entry's, re-anchored to the candidate's own start; infinite entries are
/// never traversed past, so they pool just before the sentinel.
///
/// # Safety
/// Kernel lock held; `tmr` is not linked in any ring.
pub(crate) unsafe fn priv_tmr_insert(tmr: NonNull<OsTmr>, id: ObjId) {
    unsafe {
        let t = &*tmr.as_ptr();
        let mut nxt = kernel::wait_obj();

        if t.delay != INFINITE {
            loop {
                nxt = (*nxt.as_ptr()).next.unwrap_or(nxt);
                let n = &*obj::tmr_of(nxt).as_ptr();
                if n.delay == INFINITE {
                    break;
                }
                if n.delay > t.start.wrapping_add(t.delay).wrapping_sub(n.start) {
                    break;
                }
            }
        }

        obj::ring_insert(tmr_obj(tmr), id, nxt);
    }
}

/// Insert a deadline and re-arm the hardware comparator, which may now have
/// an earlier target.
///
/// # Safety
/// Kernel lock held; `tmr` is not linked in any ring.
pub(crate) unsafe fn core_tmr_insert(tmr: NonNull<OsTmr>, id: ObjId) {
    unsafe {
        priv_tmr_insert(tmr, id);
        port::port_tmr_force();
    }
}

/// Detach an entry from the deadline ring.
///
/// # Safety
/// Kernel lock held; `tmr` is linked in the deadline ring.
pub(crate) unsafe fn core_tmr_remove(tmr: NonNull<OsTmr>) {
    unsafe { obj::ring_remove(tmr_obj(tmr)) }
}

/// Expiry test, tick mode: the entry has expired once a full `delay` ticks
/// have elapsed since `start`. The `+ 1` accounts for the tick in whose
/// handler we are running.
#[cfg(not(feature = "tickless"))]
unsafe fn priv_tmr_expired(tmr: NonNull<OsTmr>) -> bool {
    unsafe {
        let t = &*tmr.as_ptr();
        let elapsed = kernel::tick_count().wrapping_sub(t.start).wrapping_add(1);
        t.delay < elapsed
    }
}

/// Expiry test, tick-less mode: disarm the comparator, test the deadline,
/// and when still pending re-arm and test again; the second test catches a
/// deadline that slipped past while the comparator was being written.
#[cfg(feature = "tickless")]
unsafe fn priv_tmr_expired(tmr: NonNull<OsTmr>) -> bool {
    unsafe {
        let t = &*tmr.as_ptr();

        port::port_tmr_stop();

        if t.delay == INFINITE {
            return false;
        }
        if t.delay <= port::port_sys_time().wrapping_sub(t.start) {
            return true;
        }

        port::port_tmr_start(t.start.wrapping_add(t.delay));

        if t.delay > port::port_sys_time().wrapping_sub(t.start) {
            return false;
        }

        port::port_tmr_stop();
        true
    }
}

/// Expire a periodic timer: advance its anchor, reload, run the callback,
/// re-file if it has a period, wake every task waiting on it.
unsafe fn priv_tmr_wakeup(tmr: NonNull<OsTmr>, event: Event) {
    unsafe {
        let t = &mut *tmr.as_ptr();
        t.start = t.start.wrapping_add(t.delay);
        t.delay = t.period;

        if let Some(state) = t.state {
            state();
        }

        core_tmr_remove(tmr);
        if t.delay != 0 {
            priv_tmr_insert(tmr, ObjId::Timer);
        }

        sched::core_all_wakeup(tmr_obj(tmr), event);
    }
}

/// Deadline-ring handler: deliver every expiry at or before now, in ring
/// order. Runs in interrupt context with the kernel lock held; timer
/// callbacks may post and wake but must not block.
pub fn core_tmr_handler() {
    critical_section(|_| unsafe {
        loop {
            let wait = kernel::wait_obj();
            let head = obj::tmr_of((*wait.as_ptr()).next.unwrap_or(wait));
            if !priv_tmr_expired(head) {
                break;
            }

            if (*head.as_ptr()).obj.id == ObjId::Timer {
                priv_tmr_wakeup(head, E_SUCCESS);
            } else {
                // id == Delayed
                let _ = sched::core_tsk_wakeup(Some(head.cast()), E_TIMEOUT);
            }
        }
    });
}

/// Periodic tick entry, invoked at `OS_FREQUENCY` in tick mode: advance the
/// counter, deliver expiries, and under round-robin hand the CPU to the
/// next task of the running priority band.
pub fn core_sys_tick() {
    critical_section(|_| unsafe { kernel::tick_increment() });

    core_tmr_handler();

    if config::OS_ROBIN {
        port::port_ctx_switch();
    }
}
