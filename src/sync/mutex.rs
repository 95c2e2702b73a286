//! Blocking mutex with priority inheritance.
//!
//! A held mutex links into its owner's chain; whenever a waiter arrives or
//! leaves, the owner's effective priority is re-derived as the maximum of
//! its static priority and the highest waiter across every mutex in the
//! chain. Release hands ownership straight to the highest waiter.

use core::cell::UnsafeCell;
use core::ptr::NonNull;

use crate::critical::critical_section;
use crate::error::{event_result, OsError, OsResult};
use crate::kernel;
use crate::obj::ObjHead;
use crate::port;
use crate::sched;
use crate::task::OsTcb;
use crate::types::{Cnt, ObjId, E_STOPPED, IMMEDIATE, INFINITE};

/// Mutex record.
#[repr(C)]
pub struct OsMtx {
    /// Object header; `id` stays `Mutex` so the block/wake machinery can
    /// recognize the guard and recompute the owner on waiter departure.
    pub(crate) obj: ObjHead,
    /// Owning task, if held.
    pub(crate) owner: Option<NonNull<OsTcb>>,
    /// Recursive acquisition depth beyond the first.
    pub(crate) count: u32,
    /// Next mutex in the owner's chain.
    pub(crate) list: Option<NonNull<OsMtx>>,
}

impl OsMtx {
    pub const fn new() -> Self {
        OsMtx {
            obj: ObjHead::new(ObjId::Mutex),
            owner: None,
            count: 0,
            list: None,
        }
    }

    fn hdr(&mut self) -> NonNull<ObjHead> {
        NonNull::from(&mut self.obj)
    }

    /// Reset the mutex to its free state.
    pub fn init(&mut self) {
        debug_assert!(!port::port_isr_inside());

        critical_section(|_| {
            *self = OsMtx::new();
        });
    }

    /// Acquire the mutex, waiting up to `delay` ticks.
    ///
    /// While the caller waits, the owner inherits the caller's priority if
    /// it is higher. Recursive acquisition by the owner nests.
    pub fn wait_for(&mut self, delay: Cnt) -> OsResult<()> {
        debug_assert!(!port::port_isr_inside());

        critical_section(|_| unsafe {
            let cur = kernel::cur();

            match self.owner {
                None => {
                    priv_mtx_link(NonNull::from(&mut *self), cur);
                    Ok(())
                }
                Some(owner) if owner == cur => {
                    debug_assert!(self.count < u32::MAX);
                    self.count += 1;
                    Ok(())
                }
                Some(owner) => {
                    if delay == IMMEDIATE {
                        return Err(OsError::Timeout);
                    }

                    let cur_prio = (*cur.as_ptr()).prio;
                    if (*owner.as_ptr()).prio < cur_prio {
                        sched::core_tsk_prio(owner, cur_prio);
                    }

                    event_result(sched::core_tsk_wait_for(self.hdr(), delay))
                }
            }
        })
    }

    /// Acquire the mutex with an absolute deadline.
    pub fn wait_until(&mut self, time: Cnt) -> OsResult<()> {
        debug_assert!(!port::port_isr_inside());

        critical_section(|_| unsafe {
            let cur = kernel::cur();

            match self.owner {
                None => {
                    priv_mtx_link(NonNull::from(&mut *self), cur);
                    Ok(())
                }
                Some(owner) if owner == cur => {
                    debug_assert!(self.count < u32::MAX);
                    self.count += 1;
                    Ok(())
                }
                Some(owner) => {
                    if time.wrapping_sub(crate::time::sys_time()) == IMMEDIATE {
                        return Err(OsError::Timeout);
                    }

                    let cur_prio = (*cur.as_ptr()).prio;
                    if (*owner.as_ptr()).prio < cur_prio {
                        sched::core_tsk_prio(owner, cur_prio);
                    }

                    event_result(sched::core_tsk_wait_until(self.hdr(), time))
                }
            }
        })
    }

    /// Acquire the mutex, waiting indefinitely.
    pub fn wait(&mut self) -> OsResult<()> {
        self.wait_for(INFINITE)
    }

    /// Try to acquire the mutex without blocking.
    pub fn take(&mut self) -> OsResult<()> {
        self.wait_for(IMMEDIATE)
    }

    /// Release the mutex. Ownership passes to the highest-priority waiter,
    /// if any; the caller's effective priority drops back to whatever its
    /// remaining mutexes still impose.
    ///
    /// # Panics
    /// Releasing a mutex the caller does not own is a contract violation.
    pub fn give(&mut self) {
        debug_assert!(!port::port_isr_inside());

        critical_section(|_| unsafe {
            let cur = kernel::cur();
            assert!(self.owner == Some(cur), "mutex released by non-owner");

            if self.count > 0 {
                self.count -= 1;
                return;
            }

            priv_mtx_unlink(NonNull::from(&mut *self), cur);
            sched::core_tsk_prio(cur, (*cur.as_ptr()).basic);

            if let Some(next) = self.obj.queue {
                priv_mtx_link(NonNull::from(&mut *self), next);
                let _ = sched::core_one_wakeup(self.hdr(), crate::types::E_SUCCESS);
            }
        });
    }

    /// The mutex is currently held.
    #[inline]
    pub fn is_owned(&self) -> bool {
        self.owner.is_some()
    }

    /// Effective priority of the owner, if held.
    pub fn owner_prio(&self) -> Option<crate::types::Prio> {
        self.owner.map(|t| unsafe { (*t.as_ptr()).prio })
    }

    /// Kill the mutex: wake every waiter with `STOPPED` and reset it to the
    /// free state. The former owner's priority is re-derived.
    pub fn kill(&mut self) {
        debug_assert!(!port::port_isr_inside());

        critical_section(|_| unsafe {
            priv_mtx_kill(NonNull::from(&mut *self));
        });
    }
}

impl Default for OsMtx {
    fn default() -> Self {
        Self::new()
    }
}

/// Record `tsk` as the owner and push the mutex onto its chain.
///
/// # Safety
/// Kernel lock held; the mutex is free.
pub(crate) unsafe fn priv_mtx_link(mtx: NonNull<OsMtx>, tsk: NonNull<OsTcb>) {
    unsafe {
        let m = &mut *mtx.as_ptr();
        m.owner = Some(tsk);
        m.count = 0;
        m.list = (*tsk.as_ptr()).mtx_list;
        (*tsk.as_ptr()).mtx_list = Some(mtx);
    }
}

/// Remove the mutex from `tsk`'s chain.
///
/// # Safety
/// Kernel lock held; `tsk` owns the mutex.
unsafe fn priv_mtx_unlink(mtx: NonNull<OsMtx>, tsk: NonNull<OsTcb>) {
    unsafe {
        let m = &mut *mtx.as_ptr();
        m.owner = None;

        let mut link = &mut (*tsk.as_ptr()).mtx_list;
        while let Some(n) = *link {
            if n == mtx {
                *link = m.list;
                break;
            }
            link = &mut (*n.as_ptr()).list;
        }
        m.list = None;
    }
}

/// Kill a mutex held by any task. Used by task kill to strip the victim's
/// chain.
///
/// # Safety
/// Kernel lock held; `mtx` points to an initialized mutex record.
pub(crate) unsafe fn priv_mtx_kill(mtx: NonNull<OsMtx>) {
    unsafe {
        let m = &mut *mtx.as_ptr();
        if let Some(owner) = m.owner {
            priv_mtx_unlink(mtx, owner);
            sched::core_tsk_prio(owner, (*owner.as_ptr()).basic);
        }
        sched::core_all_wakeup(NonNull::from(&mut m.obj), E_STOPPED);
    }
}

/// Allocate and initialize a mutex from the system region.
pub fn mtx_create() -> Option<NonNull<OsMtx>> {
    debug_assert!(!port::port_isr_inside());

    critical_section(|_| unsafe {
        let base = kernel::core_sys_alloc(core::mem::size_of::<OsMtx>());
        let mtx = NonNull::new(base as *mut OsMtx)?;
        (*mtx.as_ptr()).obj.id = ObjId::Mutex;
        (*mtx.as_ptr()).obj.res = base;
        Some(mtx)
    })
}

/// Kill a mutex and release its storage if it owns one.
///
/// # Safety
/// `mtx` must point to an initialized mutex record; the handle must not be
/// used again except to re-init.
pub unsafe fn mtx_delete(mtx: NonNull<OsMtx>) {
    critical_section(|_| unsafe {
        priv_mtx_kill(mtx);
        kernel::core_sys_free((*mtx.as_ptr()).obj.res);
    });
}

// ============ Safe wrapper ============

/// Shareable mutex handle for static declaration.
pub struct Mutex {
    inner: UnsafeCell<OsMtx>,
}

// SAFETY: the inner record is only mutated under the kernel lock.
unsafe impl Sync for Mutex {}
unsafe impl Send for Mutex {}

impl Mutex {
    pub const fn new() -> Self {
        Mutex {
            inner: UnsafeCell::new(OsMtx::new()),
        }
    }

    pub fn wait_for(&self, delay: Cnt) -> OsResult<()> {
        unsafe { (*self.inner.get()).wait_for(delay) }
    }

    pub fn wait_until(&self, time: Cnt) -> OsResult<()> {
        unsafe { (*self.inner.get()).wait_until(time) }
    }

    pub fn wait(&self) -> OsResult<()> {
        unsafe { (*self.inner.get()).wait() }
    }

    pub fn take(&self) -> OsResult<()> {
        unsafe { (*self.inner.get()).take() }
    }

    pub fn give(&self) {
        unsafe { (*self.inner.get()).give() }
    }

    pub fn is_owned(&self) -> bool {
        unsafe { (*self.inner.get()).is_owned() }
    }

    pub fn owner_prio(&self) -> Option<crate::types::Prio> {
        unsafe { (*self.inner.get()).owner_prio() }
    }

    pub fn kill(&self) {
        unsafe { (*self.inner.get()).kill() }
    }
}

impl Default for Mutex {
    fn default() -> Self {
        Self::new()
    }
}
