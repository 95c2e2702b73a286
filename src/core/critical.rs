//! Kernel critical section.
//!
//! Every public kernel entry runs under this lock. On a single core the lock
//! is interrupt masking; the guard saves the previous state so critical
//! sections nest freely (an ISR that was entered with interrupts already
//! masked restores them masked).

#[cfg(not(target_arch = "arm"))]
use core::sync::atomic::{AtomicU32, Ordering};

/// Nesting depth emulation for host builds, where there are no interrupts
/// to mask but the state must still be observable.
#[cfg(not(target_arch = "arm"))]
static NESTING: AtomicU32 = AtomicU32::new(0);

/// RAII guard for the kernel lock.
///
/// Entering disables interrupts; dropping restores the state captured at
/// entry, which preserves nesting.
pub struct CriticalSection {
    #[cfg(target_arch = "arm")]
    was_active: bool,
    #[cfg(not(target_arch = "arm"))]
    _private: (),
}

impl CriticalSection {
    /// Enter a critical section, saving the previous interrupt state.
    #[inline(always)]
    pub fn enter() -> Self {
        #[cfg(target_arch = "arm")]
        {
            let was_active = cortex_m::register::primask::read().is_active();
            cortex_m::interrupt::disable();
            CriticalSection { was_active }
        }

        #[cfg(not(target_arch = "arm"))]
        {
            NESTING.fetch_add(1, Ordering::Acquire);
            CriticalSection { _private: () }
        }
    }
}

impl Drop for CriticalSection {
    #[inline(always)]
    fn drop(&mut self) {
        #[cfg(target_arch = "arm")]
        if self.was_active {
            unsafe { cortex_m::interrupt::enable() };
        }

        #[cfg(not(target_arch = "arm"))]
        NESTING.fetch_sub(1, Ordering::Release);
    }
}

/// Execute a closure under the kernel lock.
///
/// The closure receives a reference to the guard, which can be used to
/// access [`CsCell`](crate::cs_cell::CsCell) protected data.
#[inline]
pub fn critical_section<F, R>(f: F) -> R
where
    F: FnOnce(&CriticalSection) -> R,
{
    let cs = CriticalSection::enter();
    f(&cs)
}
