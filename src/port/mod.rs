//! Port layer: CPU-specific context switching, interrupt masking and the
//! tick source.
//!
//! The kernel never touches CPU registers directly; it produces and
//! consumes stack pointers through this seam. Non-ARM builds get a stub
//! port so the kernel logic runs under host tests.

#[cfg(target_arch = "arm")]
pub mod cortex_m;

#[cfg(target_arch = "arm")]
pub use cortex_m::*;

#[cfg(not(target_arch = "arm"))]
pub mod stub {
    #[cfg(feature = "tickless")]
    use crate::types::Cnt;
    use crate::types::{Fun, StkElem};

    pub fn port_sys_init() {}

    /// No context switching on the host; dispatch is driven explicitly by
    /// tests through `core_tsk_handler`.
    pub fn port_ctx_switch() {}

    pub fn port_ctx_reset() {}

    pub fn port_ctx_sync() {}

    pub fn port_clr_lock() {}

    pub fn port_set_lock() {}

    pub unsafe fn port_set_stack(_top: *mut StkElem) {}

    pub fn port_isr_inside() -> bool {
        false
    }

    /// A never-run task "resumes" at its bare stack top.
    pub unsafe fn port_stk_init(top: *mut StkElem, _state: Fun) -> *mut StkElem {
        top
    }

    pub fn port_tmr_force() {}

    #[cfg(feature = "tickless")]
    pub fn port_tmr_start(_deadline: Cnt) {}

    #[cfg(feature = "tickless")]
    pub fn port_tmr_stop() {}

    /// Host time base: the software counter doubles as the "hardware"
    /// count.
    #[cfg(feature = "tickless")]
    pub fn port_sys_time() -> Cnt {
        crate::critical::critical_section(|_| unsafe { crate::kernel::tick_count() })
    }
}

#[cfg(not(target_arch = "arm"))]
pub use stub::*;
