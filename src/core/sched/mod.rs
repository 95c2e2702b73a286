//! Scheduler core: ready ring, block/wake, priority inheritance, dispatch.
//!
//! The ready ring is a doubly-linked ring threaded through the idle task's
//! header, sorted by effective priority, highest first, FIFO among equals.
//! Every blocking primitive is the same three moves: append the current task
//! to the object's wait queue, take it out of the ready ring, file its
//! deadline in the timer ring, then hand the CPU over. Wakeup is the exact
//! inverse plus an event stamp.

use core::ptr::NonNull;

use crate::config;
use crate::critical::critical_section;
use crate::kernel;
use crate::obj::{self, tsk_obj, ObjHead};
use crate::port;
use crate::task::OsTcb;
use crate::time;
use crate::types::{Cnt, Event, ObjId, Prio, StkElem, E_SUCCESS, E_TIMEOUT, IMMEDIATE};

// ============ Ready ring ============

/// Splice a task into the ready ring by effective priority.
///
/// The walk starts behind the idle anchor and skips every task of equal or
/// higher priority, so a newcomer lands behind its equals; that ordering is
/// what makes round-robin rotation deterministic.
///
/// # Safety
/// Kernel lock held; `tsk` is not linked in any ring.
pub(crate) unsafe fn priv_tsk_insert(tsk: NonNull<OsTcb>) {
    unsafe {
        let prio = (*tsk.as_ptr()).prio;
        let mut nxt = kernel::idle_obj();

        if prio != 0 {
            loop {
                nxt = (*nxt.as_ptr()).next.unwrap_or(nxt);
                if prio > (*obj::tsk_of(nxt).as_ptr()).prio {
                    break;
                }
            }
        }

        obj::ring_insert(tsk_obj(tsk), ObjId::Ready, nxt);
    }
}

/// Make a task ready. Under round-robin preemption this also requests a
/// context switch when the ring head now outranks the running task, which
/// covers both fresh arrivals and priority changes.
///
/// # Safety
/// Kernel lock held; `tsk` is not linked in any ring.
pub(crate) unsafe fn core_tsk_insert(tsk: NonNull<OsTcb>) {
    unsafe {
        priv_tsk_insert(tsk);

        if config::OS_ROBIN {
            let head = obj::tsk_of((*kernel::idle_obj().as_ptr()).next.unwrap_or(kernel::idle_obj()));
            if (*head.as_ptr()).prio > (*kernel::cur().as_ptr()).prio {
                port::port_ctx_switch();
            }
        }
    }
}

/// Detach a task from the ready ring.
///
/// # Safety
/// Kernel lock held; `tsk` is linked in the ready ring.
pub(crate) unsafe fn core_tsk_remove(tsk: NonNull<OsTcb>) {
    unsafe { obj::ring_remove(tsk_obj(tsk)) }
}

// ============ Wait queues ============

/// Append a task to an object's wait queue, priority-ordered, FIFO among
/// equals, and record the object as the task's guard.
///
/// `back` points at the predecessor's header; for the queue head that is
/// the guarded object itself, which lets unlink patch the predecessor's
/// `queue` slot without knowing whether it is a task or the object.
///
/// # Safety
/// Kernel lock held; `tsk` is not queued anywhere.
pub(crate) unsafe fn core_tsk_append(tsk: NonNull<OsTcb>, obj_: NonNull<ObjHead>) {
    unsafe {
        let prio = (*tsk.as_ptr()).prio;
        (*tsk.as_ptr()).guard = Some(obj_);

        let mut prv = obj_;
        let mut nxt = (*obj_.as_ptr()).queue;

        while let Some(n) = nxt {
            if prio > (*n.as_ptr()).prio {
                break;
            }
            prv = tsk_obj(n);
            nxt = (*n.as_ptr()).hdr.obj.queue;
        }

        if let Some(n) = nxt {
            (*n.as_ptr()).back = Some(tsk_obj(tsk));
        }
        (*tsk.as_ptr()).back = Some(prv);
        (*tsk.as_ptr()).hdr.obj.queue = nxt;
        (*prv.as_ptr()).queue = Some(tsk);
    }
}

/// Take a task out of its wait queue and stamp the wakeup event.
///
/// The task's own `queue` slot is cleared explicitly: a task that waited on
/// itself (flag waits) or on the sleep sentinel ends up with a self-loop
/// there otherwise.
///
/// # Safety
/// Kernel lock held; `tsk` is queued on some object.
pub(crate) unsafe fn core_tsk_unlink(tsk: NonNull<OsTcb>, event: Event) {
    unsafe {
        let t = &mut *tsk.as_ptr();
        let nxt = t.hdr.obj.queue;
        t.event = event;

        if let Some(prv) = t.back {
            if let Some(n) = nxt {
                (*n.as_ptr()).back = Some(prv);
            }
            (*prv.as_ptr()).queue = nxt;
        }
        t.hdr.obj.queue = None;
    }
}

// ============ Block / wake ============

unsafe fn priv_tsk_wait(tsk: NonNull<OsTcb>, obj_: NonNull<ObjHead>) -> Event {
    unsafe {
        core_tsk_append(tsk, obj_);
        core_tsk_remove(tsk);
        time::core_tmr_insert(tsk.cast(), ObjId::Delayed);

        core_ctx_switch_now();

        (*tsk.as_ptr()).event
    }
}

/// Block the current task on `obj` until the absolute tick `time`.
///
/// # Safety
/// Kernel lock held; thread context.
pub(crate) unsafe fn core_tsk_wait_until(obj_: NonNull<ObjHead>, time_: Cnt) -> Event {
    unsafe {
        let cur = kernel::cur();
        let c = &mut *cur.as_ptr();

        c.hdr.start = time::sys_time();
        c.hdr.delay = time_.wrapping_sub(c.hdr.start);

        if c.hdr.delay == IMMEDIATE {
            return E_TIMEOUT;
        }

        priv_tsk_wait(cur, obj_)
    }
}

/// Block the current task on `obj` for `delay` ticks.
///
/// # Safety
/// Kernel lock held; thread context.
pub(crate) unsafe fn core_tsk_wait_for(obj_: NonNull<ObjHead>, delay: Cnt) -> Event {
    unsafe {
        let cur = kernel::cur();
        let c = &mut *cur.as_ptr();

        c.hdr.start = time::sys_time();
        c.hdr.delay = delay;

        if c.hdr.delay == IMMEDIATE {
            return E_TIMEOUT;
        }

        priv_tsk_wait(cur, obj_)
    }
}

/// If the departed waiter's guard was a mutex, re-derive the owner's
/// effective priority.
///
/// # Safety
/// Kernel lock held.
pub(crate) unsafe fn core_guard_prio(guard: Option<NonNull<ObjHead>>) {
    unsafe {
        if let Some(g) = guard {
            if (*g.as_ptr()).id == ObjId::Mutex {
                let m = obj::mtx_of(g);
                if let Some(owner) = (*m.as_ptr()).owner {
                    core_tsk_prio(owner, (*owner.as_ptr()).basic);
                }
            }
        }
    }
}

/// Wake a blocked task: unlink it from its wait queue, drop its deadline,
/// make it ready, and stamp `event` as the result its wait call returns.
///
/// Returns its argument so that [`core_all_wakeup`] can drain a queue with
/// `while wake(head).is_some()`; the return value is a wake-happened
/// predicate as much as a task pointer.
///
/// # Safety
/// Kernel lock held; `tsk`, if some, is blocked (id `Delayed`).
pub(crate) unsafe fn core_tsk_wakeup(
    tsk: Option<NonNull<OsTcb>>,
    event: Event,
) -> Option<NonNull<OsTcb>> {
    unsafe {
        if let Some(t) = tsk {
            let guard = (*t.as_ptr()).guard;
            core_tsk_unlink(t, event);
            time::core_tmr_remove(t.cast());
            core_tsk_insert(t);
            core_guard_prio(guard);
        }

        tsk
    }
}

/// Wake the highest-priority waiter of `obj`, if any.
///
/// # Safety
/// Kernel lock held.
pub(crate) unsafe fn core_one_wakeup(
    obj_: NonNull<ObjHead>,
    event: Event,
) -> Option<NonNull<OsTcb>> {
    unsafe { core_tsk_wakeup((*obj_.as_ptr()).queue, event) }
}

/// Wake every waiter of `obj` in queue order.
///
/// # Safety
/// Kernel lock held.
pub(crate) unsafe fn core_all_wakeup(obj_: NonNull<ObjHead>, event: Event) {
    unsafe { while core_tsk_wakeup((*obj_.as_ptr()).queue, event).is_some() {} }
}

// ============ Priority inheritance ============

/// Re-derive a task's effective priority from a floor value and the
/// highest waiter of every mutex it owns, then re-place the task if the
/// result changed: ready tasks move within the ready ring, blocked tasks
/// are re-appended to their guard's queue. The deadline ring is never
/// touched by a priority change.
///
/// # Safety
/// Kernel lock held.
pub(crate) unsafe fn core_tsk_prio(tsk: NonNull<OsTcb>, prio: Prio) {
    unsafe {
        let mut prio = prio;
        let mut mtx = (*tsk.as_ptr()).mtx_list;
        while let Some(m) = mtx {
            if let Some(w) = (*m.as_ptr()).obj.queue {
                if (*w.as_ptr()).prio > prio {
                    prio = (*w.as_ptr()).prio;
                }
            }
            mtx = (*m.as_ptr()).list;
        }

        let t = &mut *tsk.as_ptr();
        if t.prio != prio {
            t.prio = prio;

            match t.hdr.obj.id {
                ObjId::Ready => {
                    core_tsk_remove(tsk);
                    core_tsk_insert(tsk);
                }
                ObjId::Delayed => {
                    if let Some(g) = t.guard {
                        core_tsk_unlink(tsk, E_SUCCESS);
                        core_tsk_append(tsk, g);
                    }
                }
                _ => {}
            }
        }
    }
}

// ============ Dispatch ============

/// Request a context switch at the next safe point.
#[inline]
pub(crate) fn core_ctx_switch() {
    port::port_ctx_switch();
}

/// Request a context switch and let it happen before returning: the pended
/// switch fires during a one-instruction window with interrupts enabled.
/// When the caller resumes, its wakeup event is already stamped.
#[inline]
pub(crate) fn core_ctx_switch_now() {
    port::port_ctx_switch();
    port::port_ctx_sync();
}

/// Context-switch handoff, invoked from the platform's switch trampoline
/// with the outgoing stack pointer; returns the incoming one.
///
/// The outgoing task, if still ready, rotates behind its priority equals;
/// the incoming task is whatever follows the idle anchor. A task that has
/// never run gets a first frame fabricated on its stack, aimed at its entry
/// function with the stack-break trampoline as return address.
///
/// # Safety
/// Called from the switch trampoline (or host-test scaffolding) only.
#[no_mangle]
pub unsafe extern "C" fn core_tsk_handler(sp: *mut StkElem) -> *mut StkElem {
    if !config::OS_ROBIN {
        time::core_tmr_handler();
    }

    critical_section(|_| unsafe {
        port::port_ctx_reset();

        let cur = kernel::cur();
        (*cur.as_ptr()).sp = sp;

        if (*cur.as_ptr()).hdr.obj.id == ObjId::Ready {
            core_tsk_remove(cur);
            priv_tsk_insert(cur);
        }

        let idle = kernel::idle_obj();
        let next = obj::tsk_of((*idle.as_ptr()).next.unwrap_or(idle));
        kernel::set_cur(next);

        priv_tsk_prepare(next)
    })
}

unsafe fn priv_tsk_prepare(tsk: NonNull<OsTcb>) -> *mut StkElem {
    unsafe {
        let t = &mut *tsk.as_ptr();
        if !t.sp.is_null() {
            return t.sp;
        }

        let state = t.hdr.state.expect("task has no entry function");
        port::port_stk_init(t.top, state)
    }
}

/// Stack-break trampoline.
///
/// Runs when a task's entry function returns: yield once, then reset the
/// stack to the top and call the entry again. Tasks restart forever without
/// any kernel-side lifetime tracking; the entry function observed here may
/// have been replaced in the meantime (`tsk_flip`).
pub fn core_tsk_break() -> ! {
    let cur = unsafe { kernel::cur() };

    loop {
        unsafe {
            port::port_ctx_switch();
            port::port_clr_lock();
            port::port_set_stack((*cur.as_ptr()).top);
            if let Some(state) = (*cur.as_ptr()).hdr.state {
                state();
            }
        }
    }
}
