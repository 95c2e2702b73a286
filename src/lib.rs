//! StateOS-style preemptive real-time kernel in Rust
//!
//! A priority-scheduled kernel for single-core Cortex-M parts:
//! - strict priority scheduling with round-robin among equals
//! - one deadline ring shared by sleeping tasks and periodic timers,
//!   tick-driven or tick-less
//! - priority-ordered wait queues on every blockable object
//! - a blocking mutex with priority inheritance
//! - static storage throughout, with an optional bump region for the
//!   `*_create` constructors

#![no_std]
#![deny(unsafe_op_in_unsafe_fn)]

// ============ Critical Section ============

#[cfg(target_arch = "arm")]
mod cs_impl {
    use cortex_m::interrupt;
    use cortex_m::register::primask;
    use critical_section::{set_impl, Impl, RawRestoreState};

    struct SingleCoreCriticalSection;
    set_impl!(SingleCoreCriticalSection);

    unsafe impl Impl for SingleCoreCriticalSection {
        unsafe fn acquire() -> RawRestoreState {
            let was_active = primask::read().is_active();
            interrupt::disable();
            was_active
        }

        unsafe fn release(was_active: RawRestoreState) {
            if was_active {
                unsafe { interrupt::enable() }
            }
        }
    }
}

// ============ Modules ============

pub mod log;
mod lang_items;

pub mod core;
pub mod port;
pub mod sync;

// ============ Re-exports ============

pub use crate::core::config;
pub use crate::core::critical;
pub use crate::core::critical::{critical_section, CriticalSection};
pub use crate::core::cs_cell;
pub use crate::core::cs_cell::CsCell;
pub use crate::core::error;
pub use crate::core::error::{OsError, OsResult};
pub use crate::core::kernel;
pub use crate::core::kernel::sys_init;
pub use crate::core::obj;
pub use crate::core::sched;
pub use crate::core::task;
pub use crate::core::task::OsTcb;
pub use crate::core::time;
pub use crate::core::time::{sys_time, OsTmr};
pub use crate::core::types;
pub use crate::core::types::*;

pub use crate::sync::mutex::{Mutex, OsMtx};
pub use crate::sync::sem::{OsSem, Semaphore};

#[cfg(all(feature = "pac", target_arch = "arm"))]
pub use stm32_metapac as pac;
