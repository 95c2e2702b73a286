//! Task management.
//!
//! Tasks are caller-supplied records with caller-supplied stacks (or
//! heap-backed twins from [`wrk_create`]). An entry function that returns
//! is restarted on a fresh stack by the stack-break trampoline, so entries
//! do not have to be `-> !`.

mod tcb;

pub use tcb::OsTcb;

use core::ptr::NonNull;

use crate::critical::critical_section;
use crate::error::{OsError, OsResult};
use crate::kernel;
use crate::obj::tsk_obj;
use crate::port;
use crate::sched;
use crate::sync::mutex;
use crate::time;
use crate::types::{
    Cnt, Event, Fun, ObjId, Prio, StkElem, E_STOPPED, E_SUCCESS, E_TIMEOUT, INFINITE,
};

/// Initialize a task and make it ready.
///
/// The entry function does not have to be divergent: when it returns, the
/// kernel resets the task's stack and calls it again.
///
/// # Example
/// ```ignore
/// static mut WORKER: OsTcb = OsTcb::new();
/// static mut WORKER_STK: [StkElem; 256] = [0; 256];
///
/// fn worker() {
///     // ...
/// }
///
/// tsk_init(unsafe { &mut WORKER }, unsafe { &mut WORKER_STK }, 2, worker);
/// ```
pub fn tsk_init(tsk: &'static mut OsTcb, stack: &'static mut [StkElem], prio: Prio, state: Fun) {
    debug_assert!(!port::port_isr_inside());
    assert!(!stack.is_empty());

    critical_section(|_| unsafe {
        *tsk = OsTcb::new();
        tsk.hdr.state = Some(state);
        tsk.basic = prio;
        tsk.prio = prio;
        tsk.stack = stack.as_mut_ptr();
        tsk.stack_size = stack.len();
        tsk.top = priv_stack_top(stack.as_mut_ptr(), stack.len());

        sched::core_tsk_insert(NonNull::from(tsk));
    });
}

/// Allocate a task record plus `size` stack words from the system region,
/// initialize it and make it ready. Returns `None` when the region is
/// exhausted.
pub fn wrk_create(prio: Prio, state: Fun, size: usize) -> Option<NonNull<OsTcb>> {
    debug_assert!(!port::port_isr_inside());
    assert!(size != 0);

    critical_section(|_| unsafe {
        let bytes = core::mem::size_of::<OsTcb>() + size * core::mem::size_of::<StkElem>();
        let base = kernel::core_sys_alloc(bytes);
        let tsk = NonNull::new(base as *mut OsTcb)?;

        let t = &mut *tsk.as_ptr();
        let stack = base.add(core::mem::size_of::<OsTcb>()) as *mut StkElem;
        t.hdr.state = Some(state);
        t.basic = prio;
        t.prio = prio;
        t.stack = stack;
        t.stack_size = size;
        t.top = priv_stack_top(stack, size);
        t.hdr.obj.res = base;

        sched::core_tsk_insert(tsk);
        Some(tsk)
    })
}

#[inline]
fn priv_stack_top(stack: *mut StkElem, len: usize) -> *mut StkElem {
    let end = unsafe { stack.add(len) };
    ((end as usize) & !7) as *mut StkElem
}

/// Restart a stopped task from its recorded entry function.
///
/// # Safety
/// `tsk` must point to an initialized task record.
pub unsafe fn tsk_start(tsk: NonNull<OsTcb>) {
    debug_assert!(!port::port_isr_inside());

    critical_section(|_| unsafe {
        if (*tsk.as_ptr()).hdr.obj.id == ObjId::Stopped {
            (*tsk.as_ptr()).sp = core::ptr::null_mut();
            sched::core_tsk_insert(tsk);
        }
    });
}

/// Restart a stopped task from a new entry function.
///
/// # Safety
/// `tsk` must point to an initialized task record.
pub unsafe fn tsk_start_from(tsk: NonNull<OsTcb>, state: Fun) {
    debug_assert!(!port::port_isr_inside());

    critical_section(|_| unsafe {
        if (*tsk.as_ptr()).hdr.obj.id == ObjId::Stopped {
            (*tsk.as_ptr()).hdr.state = Some(state);
            (*tsk.as_ptr()).sp = core::ptr::null_mut();
            sched::core_tsk_insert(tsk);
        }
    });
}

/// End the current task: wake its joiners (or release its storage when
/// detached) and leave the ready ring for good.
pub fn tsk_stop() -> ! {
    debug_assert!(!port::port_isr_inside());

    unsafe {
        port::port_set_lock();

        let cur = kernel::cur();
        let c = &mut *cur.as_ptr();
        debug_assert!(c.mtx_list.is_none(), "stopping while holding a mutex");

        if c.detached {
            kernel::core_sys_free(c.hdr.obj.res);
        } else {
            sched::core_all_wakeup(NonNull::from(&mut c.join), E_SUCCESS);
        }

        sched::core_tsk_remove(cur);
        sched::core_ctx_switch();
        port::port_clr_lock();
    }

    // the pended switch takes over; nothing ever returns here
    loop {
        core::hint::spin_loop();
    }
}

/// Kill a task: release every mutex it owns, wake its joiners with
/// `STOPPED`, and forcibly unlink it from whichever list holds it. The
/// record can be restarted afterwards.
///
/// # Safety
/// `tsk` must point to an initialized task record.
pub unsafe fn tsk_kill(tsk: NonNull<OsTcb>) {
    debug_assert!(!port::port_isr_inside());

    critical_section(|_| unsafe {
        let t = &mut *tsk.as_ptr();
        if t.hdr.obj.id == ObjId::Stopped {
            return;
        }

        while let Some(m) = t.mtx_list {
            mutex::priv_mtx_kill(m);
        }

        if t.detached {
            kernel::core_sys_free(t.hdr.obj.res);
        } else {
            sched::core_all_wakeup(NonNull::from(&mut t.join), E_STOPPED);
        }

        match t.hdr.obj.id {
            ObjId::Ready => {
                sched::core_tsk_remove(tsk);
                if tsk == kernel::cur() {
                    sched::core_ctx_switch();
                }
            }
            ObjId::Delayed => {
                let guard = t.guard;
                sched::core_tsk_unlink(tsk, E_STOPPED);
                time::core_tmr_remove(tsk.cast());
                sched::core_guard_prio(guard);
            }
            _ => {}
        }
    });
}

/// Kill a task and release its storage if it owns one.
///
/// # Safety
/// `tsk` must point to an initialized task record; the handle must not be
/// used again except to re-init.
pub unsafe fn tsk_delete(tsk: NonNull<OsTcb>) {
    critical_section(|_| unsafe {
        let _ = tsk_detach(tsk);
        tsk_kill(tsk);
    });
}

/// Detach a heap-backed task so it releases its own storage on exit. Any
/// pending joiner is woken with a timeout.
///
/// # Safety
/// `tsk` must point to an initialized task record.
pub unsafe fn tsk_detach(tsk: NonNull<OsTcb>) -> OsResult<()> {
    debug_assert!(!port::port_isr_inside());

    critical_section(|_| unsafe {
        let t = &mut *tsk.as_ptr();

        if t.hdr.obj.id == ObjId::Stopped || t.detached || t.hdr.obj.res.is_null() {
            return Err(OsError::Timeout);
        }

        sched::core_all_wakeup(NonNull::from(&mut t.join), E_TIMEOUT);
        t.detached = true;
        Ok(())
    })
}

/// Wait until `tsk` ends, then release its storage if it owns one.
///
/// # Safety
/// `tsk` must point to an initialized task record.
pub unsafe fn tsk_join(tsk: NonNull<OsTcb>) -> OsResult<()> {
    debug_assert!(!port::port_isr_inside());

    critical_section(|_| unsafe {
        let t = &mut *tsk.as_ptr();

        if t.detached {
            return Err(OsError::Timeout);
        }

        let event = if t.hdr.obj.id != ObjId::Stopped {
            sched::core_tsk_wait_for(NonNull::from(&mut t.join), INFINITE)
        } else {
            E_SUCCESS
        };

        // E_TIMEOUT here means the task detached itself while we waited;
        // its storage is no longer ours to release.
        match event {
            E_TIMEOUT => Err(OsError::Timeout),
            E_STOPPED => {
                kernel::core_sys_free(t.hdr.obj.res);
                Err(OsError::Stopped)
            }
            _ => {
                kernel::core_sys_free(t.hdr.obj.res);
                Ok(())
            }
        }
    })
}

/// Pass the CPU to the next ready task of the same priority.
pub fn tsk_yield() {
    debug_assert!(!port::port_isr_inside());

    critical_section(|_| {
        sched::core_ctx_switch_now();
    });
}

/// Restart the current task from a new entry function on a fresh stack.
pub fn tsk_flip(state: Fun) -> ! {
    debug_assert!(!port::port_isr_inside());

    unsafe {
        port::port_set_lock();
        (*kernel::cur().as_ptr()).hdr.state = Some(state);
    }

    sched::core_tsk_break();
}

/// Change the current task's static priority. The effective priority keeps
/// honouring any inheritance from owned mutexes.
pub fn tsk_prio(prio: Prio) {
    debug_assert!(!port::port_isr_inside());

    critical_section(|_| unsafe {
        let cur = kernel::cur();
        (*cur.as_ptr()).basic = prio;
        sched::core_tsk_prio(cur, prio);
    });
}

// ============ Sleep ============

/// Sleep for `delay` ticks. Returns `E_TIMEOUT` after a full sleep, or
/// `E_STOPPED` when another task resumed this one early.
pub fn tsk_sleep_for(delay: Cnt) -> Event {
    debug_assert!(!port::port_isr_inside());

    critical_section(|_| unsafe { sched::core_tsk_wait_for(kernel::wait_obj(), delay) })
}

/// Sleep until the absolute tick `time`.
pub fn tsk_sleep_until(time_: Cnt) -> Event {
    debug_assert!(!port::port_isr_inside());

    critical_section(|_| unsafe { sched::core_tsk_wait_until(kernel::wait_obj(), time_) })
}

/// Sleep until resumed.
pub fn tsk_sleep() -> Event {
    tsk_sleep_for(INFINITE)
}

// ============ Suspend / resume ============

/// Park a ready task on the sleep sentinel with no deadline. Fails when the
/// task is not currently ready.
///
/// # Safety
/// `tsk` must point to an initialized task record.
pub unsafe fn tsk_suspend(tsk: NonNull<OsTcb>) -> OsResult<()> {
    critical_section(|_| unsafe {
        let t = &mut *tsk.as_ptr();
        if t.hdr.obj.id != ObjId::Ready {
            return Err(OsError::Stopped);
        }

        t.hdr.start = time::sys_time();
        t.hdr.delay = INFINITE;

        sched::core_tsk_append(tsk, kernel::wait_obj());
        sched::core_tsk_remove(tsk);
        time::core_tmr_insert(tsk.cast(), ObjId::Delayed);

        if tsk == kernel::cur() {
            sched::core_ctx_switch_now();
        }
        Ok(())
    })
}

/// Wake a task parked on the sleep sentinel (suspended or sleeping).
///
/// # Safety
/// `tsk` must point to an initialized task record.
pub unsafe fn tsk_resume(tsk: NonNull<OsTcb>) -> OsResult<()> {
    critical_section(|_| unsafe {
        // `guard` goes stale after a wakeup; `id` is the membership truth
        let t = &*tsk.as_ptr();
        if t.hdr.obj.id == ObjId::Delayed && t.guard == Some(kernel::wait_obj()) {
            let _ = sched::core_tsk_wakeup(Some(tsk), E_STOPPED);
            Ok(())
        } else {
            Err(OsError::Stopped)
        }
    })
}

// ============ Task signals ============

/// Wait until every flag in `flags` has been delivered with [`tsk_give`],
/// or `delay` ticks elapse. The current task waits on its own header; the
/// returned event is the mask from the final give, or a failure code.
pub fn tsk_wait_for(flags: u32, delay: Cnt) -> Event {
    debug_assert!(!port::port_isr_inside());

    critical_section(|_| unsafe {
        let cur = kernel::cur();
        (*cur.as_ptr()).flags = flags;
        sched::core_tsk_wait_for(tsk_obj(cur), delay)
    })
}

/// Flag-wait variant with an absolute deadline.
pub fn tsk_wait_until(flags: u32, time_: Cnt) -> Event {
    debug_assert!(!port::port_isr_inside());

    critical_section(|_| unsafe {
        let cur = kernel::cur();
        (*cur.as_ptr()).flags = flags;
        sched::core_tsk_wait_until(tsk_obj(cur), time_)
    })
}

/// Deliver flags to a task blocked in [`tsk_wait_for`]; wakes it once its
/// outstanding mask drains. May be called from interrupt handlers.
///
/// # Safety
/// `tsk` must point to an initialized task record.
pub unsafe fn tsk_give(tsk: NonNull<OsTcb>, flags: u32) {
    critical_section(|_| unsafe {
        let t = &mut *tsk.as_ptr();
        if t.hdr.obj.id == ObjId::Delayed && t.guard == Some(tsk_obj(tsk)) {
            t.flags &= !flags;
            if t.flags == 0 {
                let _ = sched::core_tsk_wakeup(Some(tsk), flags);
            }
        }
    });
}
