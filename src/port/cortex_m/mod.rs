//! Cortex-M port.
//!
//! Context switches run through the PendSV exception at the lowest
//! priority; tasks execute on PSP while handlers use a dedicated MSP stack.
//! In tick mode SysTick drives the kernel at `OS_FREQUENCY`; in tick-less
//! mode a 32-bit general-purpose timer provides the time base and its
//! compare channel is re-armed to the next deadline.

#![allow(named_asm_labels)]

use core::arch::{asm, naked_asm};

use cortex_m::peripheral::scb::SystemHandler;
#[cfg(not(feature = "tickless"))]
use cortex_m::peripheral::syst::SystClkSource;

use crate::sched::core_tsk_break;
use crate::types::{Fun, StkElem};

/// Dedicated handler-mode stack.
#[no_mangle]
static mut INTERRUPT_STACK: [u64; 256] = [0; 256];

/// One-time hardware bring-up: exception priorities, the PSP/MSP split and
/// the tick source. Called from `sys_init` in thread context.
pub fn port_sys_init() {
    unsafe {
        let mut p = cortex_m::Peripherals::steal();

        // context switch and tick run below every other interrupt
        p.SCB.set_priority(SystemHandler::PendSV, 0xF0);
        p.SCB.set_priority(SystemHandler::SysTick, 0xF0);

        // thread mode moves onto PSP, keeping the live stack; MSP is
        // repointed at the handler stack
        let sp = cortex_m::register::msp::read();
        cortex_m::register::psp::write(sp);
        let mut ctrl = cortex_m::register::control::read();
        ctrl.set_spsel(cortex_m::register::control::Spsel::Psp);
        cortex_m::register::control::write(ctrl);
        cortex_m::asm::isb();

        let top = (&raw const INTERRUPT_STACK as usize)
            + core::mem::size_of::<[u64; 256]>();
        cortex_m::register::msp::write(top as u32);

        #[cfg(not(feature = "tickless"))]
        {
            use crate::config::{CPU_FREQUENCY, OS_FREQUENCY};

            p.SYST.set_reload(CPU_FREQUENCY / OS_FREQUENCY - 1);
            p.SYST.clear_current();
            p.SYST.set_clock_source(SystClkSource::Core);
            p.SYST.enable_interrupt();
            p.SYST.enable_counter();
        }

        #[cfg(feature = "tickless")]
        {
            tickless::init(&mut p.NVIC);

            // SysTick only paces round-robin rotation
            if crate::config::OS_ROBIN {
                use crate::config::{CPU_FREQUENCY, OS_FREQUENCY};

                p.SYST.set_reload(CPU_FREQUENCY / OS_FREQUENCY - 1);
                p.SYST.clear_current();
                p.SYST.set_clock_source(cortex_m::peripheral::syst::SystClkSource::Core);
                p.SYST.enable_interrupt();
                p.SYST.enable_counter();
            }
        }

        cortex_m::interrupt::enable();
    }
}

/// Request a context switch at the next safe point.
#[inline(always)]
pub fn port_ctx_switch() {
    cortex_m::peripheral::SCB::set_pendsv();
}

/// Drop a pending switch request; the dispatcher is already running.
#[inline(always)]
pub fn port_ctx_reset() {
    cortex_m::peripheral::SCB::clear_pendsv();
}

/// Open a one-instruction interrupt window so a pended switch executes
/// before the caller proceeds.
#[inline(always)]
pub fn port_ctx_sync() {
    unsafe {
        cortex_m::interrupt::enable();
        cortex_m::asm::isb();
        cortex_m::interrupt::disable();
    }
}

/// Force interrupts on, destroying any saved state.
#[inline(always)]
pub fn port_clr_lock() {
    unsafe { cortex_m::interrupt::enable() }
}

/// Force interrupts off.
#[inline(always)]
pub fn port_set_lock() {
    cortex_m::interrupt::disable();
}

/// Reset the thread stack pointer; only meaningful right before jumping
/// into an entry function.
#[inline(always)]
pub unsafe fn port_set_stack(top: *mut StkElem) {
    unsafe {
        asm!("msr psp, {0}", in(reg) top, options(nomem, preserves_flags));
    }
}

/// True when executing in handler mode.
#[inline]
pub fn port_isr_inside() -> bool {
    let ipsr: u32;
    unsafe {
        asm!("mrs {}, IPSR", out(reg) ipsr, options(nomem, nostack, preserves_flags));
    }
    ipsr != 0
}

/// Saved context layout: software frame (r4-r11 plus the exception return
/// word) below the hardware frame.
#[repr(C)]
struct StkFrame {
    r4: u32,
    r5: u32,
    r6: u32,
    r7: u32,
    r8: u32,
    r9: u32,
    r10: u32,
    r11: u32,
    exc_return: u32,
    r0: u32,
    r1: u32,
    r2: u32,
    r3: u32,
    r12: u32,
    lr: u32,
    pc: u32,
    xpsr: u32,
}

/// Fabricate the first frame of a never-run task: exception return lands at
/// the entry function with the stack-break trampoline as its return
/// address.
pub unsafe fn port_stk_init(top: *mut StkElem, state: Fun) -> *mut StkElem {
    unsafe {
        let top = ((top as usize) & !7) as *mut u32;
        let frame = (top as *mut StkFrame).sub(1);

        (*frame) = StkFrame {
            r4: 0,
            r5: 0,
            r6: 0,
            r7: 0,
            r8: 0,
            r9: 0,
            r10: 0,
            r11: 0,
            exc_return: 0xFFFF_FFFD,
            r0: 0,
            r1: 0,
            r2: 0,
            r3: 0,
            r12: 0,
            lr: core_tsk_break as *const () as u32,
            pc: (state as *const () as u32) | 1,
            xpsr: 0x0100_0000,
        };

        frame as *mut StkElem
    }
}

/// PendSV: save the outgoing software frame on PSP, let the kernel pick the
/// next stack pointer, restore and return.
#[no_mangle]
#[unsafe(naked)]
pub unsafe extern "C" fn PendSV() {
    naked_asm!(
        "cpsid i",
        "mrs r0, psp",
        "stmdb r0!, {{r4-r11, lr}}",
        "bl {handler}",
        "ldmia r0!, {{r4-r11, lr}}",
        "msr psp, r0",
        "dsb",
        "isb",
        "cpsie i",
        "bx lr",
        handler = sym crate::sched::core_tsk_handler,
    );
}

/// SysTick: the kernel tick in tick mode, the round-robin pacer in
/// tick-less mode.
#[no_mangle]
pub extern "C" fn SysTick() {
    #[cfg(not(feature = "tickless"))]
    crate::time::core_sys_tick();

    #[cfg(feature = "tickless")]
    port_ctx_switch();
}

// ============ Tick-less comparator ============

#[cfg(feature = "tickless")]
mod tickless {
    use stm32_metapac::{Interrupt, RCC, TIM2};

    use crate::config::{CPU_FREQUENCY, OS_FREQUENCY};
    use crate::types::Cnt;

    /// TIM2 free-runs at `OS_FREQUENCY` over its full 32-bit range; the
    /// counter is the kernel time base, compare channel 1 is the deadline.
    pub(super) fn init(nvic: &mut cortex_m::peripheral::NVIC) {
        RCC.apb1enr().modify(|w| w.set_tim2en(true));

        TIM2.cr1().modify(|w| w.set_cen(false));
        TIM2.cnt().write(|w| w.set_cnt(0));
        TIM2.psc().write_value((CPU_FREQUENCY / OS_FREQUENCY - 1) as u16);
        TIM2.arr().write(|w| w.set_arr(u32::MAX));
        TIM2.egr().write(|w| w.set_ug(true));
        TIM2.dier().modify(|w| w.set_ccie(0, false));

        unsafe {
            nvic.set_priority(Interrupt::TIM2, 0xF0);
            cortex_m::peripheral::NVIC::unmask(Interrupt::TIM2);
        }

        TIM2.cr1().modify(|w| w.set_cen(true));
    }

    pub(super) fn now() -> Cnt {
        TIM2.cnt().read().cnt()
    }

    pub(super) fn start(deadline: Cnt) {
        TIM2.ccr(0).write(|w| w.set_ccr(deadline));
        TIM2.sr().modify(|w| w.set_ccif(0, false));
        TIM2.dier().modify(|w| w.set_ccie(0, true));
    }

    pub(super) fn stop() {
        TIM2.dier().modify(|w| w.set_ccie(0, false));
    }
}

/// Monotonic kernel time from the hardware counter.
#[cfg(feature = "tickless")]
pub fn port_sys_time() -> crate::types::Cnt {
    tickless::now()
}

/// Arm the deadline comparator.
#[cfg(feature = "tickless")]
pub fn port_tmr_start(deadline: crate::types::Cnt) {
    tickless::start(deadline);
}

/// Disarm the deadline comparator.
#[cfg(feature = "tickless")]
pub fn port_tmr_stop() {
    tickless::stop();
}

/// Kick the deadline handler; a new ring head may be nearer than the armed
/// compare value.
#[cfg(feature = "tickless")]
pub fn port_tmr_force() {
    cortex_m::peripheral::NVIC::pend(stm32_metapac::Interrupt::TIM2);
}

/// The comparator does not exist in tick mode.
#[cfg(not(feature = "tickless"))]
#[inline(always)]
pub fn port_tmr_force() {}

/// Deadline comparator interrupt.
#[cfg(feature = "tickless")]
#[no_mangle]
pub extern "C" fn TIM2() {
    stm32_metapac::TIM2.sr().modify(|w| {
        w.set_uif(false);
        w.set_ccif(0, false);
    });

    crate::time::core_tmr_handler();
}
