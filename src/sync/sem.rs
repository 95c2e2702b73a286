//! Counting semaphore.
//!
//! A thin veneer over the wait-queue core: a failed take blocks the caller
//! on the semaphore's queue, a give hands the unit straight to the
//! highest-priority waiter instead of bumping the counter.

use core::cell::UnsafeCell;
use core::ptr::NonNull;

use crate::critical::critical_section;
use crate::error::{event_result, OsError, OsResult};
use crate::kernel;
use crate::obj::ObjHead;
use crate::port;
use crate::sched;
use crate::types::{Cnt, ObjId, E_STOPPED, E_SUCCESS, IMMEDIATE, INFINITE, SEM_COUNTING};

/// Semaphore record.
#[repr(C)]
pub struct OsSem {
    pub(crate) obj: ObjHead,
    /// Current value.
    pub(crate) count: u32,
    /// Value ceiling; [`SEM_COUNTING`] for an unbounded semaphore.
    pub(crate) limit: u32,
}

impl OsSem {
    pub const fn new(count: u32, limit: u32) -> Self {
        OsSem {
            obj: ObjHead::new(ObjId::Sem),
            count,
            limit,
        }
    }

    fn hdr(&mut self) -> NonNull<ObjHead> {
        NonNull::from(&mut self.obj)
    }

    /// Reset the semaphore to an initial value and ceiling.
    pub fn init(&mut self, count: u32, limit: u32) {
        debug_assert!(!port::port_isr_inside());
        debug_assert!(count <= limit);

        critical_section(|_| {
            *self = OsSem::new(count, limit);
        });
    }

    /// Take one unit, waiting up to `delay` ticks for one to appear.
    pub fn wait_for(&mut self, delay: Cnt) -> OsResult<()> {
        debug_assert!(!port::port_isr_inside());

        critical_section(|_| unsafe {
            if self.count > 0 {
                self.count -= 1;
                return Ok(());
            }

            event_result(sched::core_tsk_wait_for(self.hdr(), delay))
        })
    }

    /// Take one unit with an absolute deadline.
    pub fn wait_until(&mut self, time: Cnt) -> OsResult<()> {
        debug_assert!(!port::port_isr_inside());

        critical_section(|_| unsafe {
            if self.count > 0 {
                self.count -= 1;
                return Ok(());
            }

            event_result(sched::core_tsk_wait_until(self.hdr(), time))
        })
    }

    /// Take one unit, waiting indefinitely.
    pub fn wait(&mut self) -> OsResult<()> {
        self.wait_for(INFINITE)
    }

    /// Try to take one unit without blocking.
    pub fn take(&mut self) -> OsResult<()> {
        self.wait_for(IMMEDIATE)
    }

    /// Release one unit. A queued waiter receives it directly; otherwise
    /// the counter grows up to the ceiling. May be called from interrupt
    /// handlers.
    pub fn give(&mut self) -> OsResult<()> {
        critical_section(|_| unsafe {
            if (*self.hdr().as_ptr()).queue.is_some() {
                let _ = sched::core_one_wakeup(self.hdr(), E_SUCCESS);
                return Ok(());
            }

            if self.count >= self.limit {
                return Err(OsError::Timeout);
            }
            self.count += 1;
            Ok(())
        })
    }

    /// Current value.
    pub fn value(&self) -> u32 {
        self.count
    }

    /// Kill the semaphore: wake every waiter with `STOPPED`, reset the
    /// counter.
    pub fn kill(&mut self) {
        debug_assert!(!port::port_isr_inside());

        critical_section(|_| unsafe {
            self.count = 0;
            sched::core_all_wakeup(self.hdr(), E_STOPPED);
        });
    }
}

impl Default for OsSem {
    fn default() -> Self {
        Self::new(0, SEM_COUNTING)
    }
}

/// Allocate and initialize a semaphore from the system region.
pub fn sem_create(count: u32, limit: u32) -> Option<NonNull<OsSem>> {
    debug_assert!(!port::port_isr_inside());

    critical_section(|_| unsafe {
        let base = kernel::core_sys_alloc(core::mem::size_of::<OsSem>());
        let sem = NonNull::new(base as *mut OsSem)?;
        (*sem.as_ptr()).obj.id = ObjId::Sem;
        (*sem.as_ptr()).obj.res = base;
        (*sem.as_ptr()).count = count;
        (*sem.as_ptr()).limit = limit;
        Some(sem)
    })
}

/// Kill a semaphore and release its storage if it owns one.
///
/// # Safety
/// `sem` must point to an initialized semaphore record; the handle must not
/// be used again except to re-init.
pub unsafe fn sem_delete(sem: NonNull<OsSem>) {
    critical_section(|_| unsafe {
        (*sem.as_ptr()).kill();
        kernel::core_sys_free((*sem.as_ptr()).obj.res);
    });
}

// ============ Safe wrapper ============

/// Shareable semaphore handle for static declaration.
pub struct Semaphore {
    inner: UnsafeCell<OsSem>,
}

// SAFETY: the inner record is only mutated under the kernel lock.
unsafe impl Sync for Semaphore {}
unsafe impl Send for Semaphore {}

impl Semaphore {
    pub const fn new(count: u32, limit: u32) -> Self {
        Semaphore {
            inner: UnsafeCell::new(OsSem::new(count, limit)),
        }
    }

    /// Binary semaphore, initially empty.
    pub const fn binary() -> Self {
        Self::new(0, 1)
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

    pub fn give(&self) -> OsResult<()> {
        unsafe { (*self.inner.get()).give() }
    }

    pub fn value(&self) -> u32 {
        unsafe { (*self.inner.get()).value() }
    }

    pub fn kill(&self) {
        unsafe { (*self.inner.get()).kill() }
    }
}
