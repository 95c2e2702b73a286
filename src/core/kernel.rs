//! Global kernel state and boot.
//!
//! The kernel is a handful of statics stitched together at `sys_init`: the
//! current-task cell read by the context-switch handler, the `IDLE` task
//! whose header anchors the ready ring, the `WAIT` sentinel that anchors the
//! deadline ring, and the bump allocation region behind the `*_create`
//! constructors.

use core::ptr::NonNull;
use core::sync::atomic::{AtomicBool, Ordering};

use crate::config::{OS_HEAP_SIZE, OS_MAIN_PRIO, OS_STACK_SIZE};
use crate::critical::critical_section;
use crate::cs_cell::CsCell;
use crate::obj::ObjHead;
use crate::port;
use crate::task::OsTcb;
use crate::time::OsTmr;
use crate::types::{Cnt, ObjId, StkElem, INFINITE};

/// System state shared with the context-switch handler.
///
/// `cur` is the first field; the PendSV handler reads it through the
/// exported symbol.
#[repr(C)]
pub struct Sys {
    /// Currently running task.
    pub cur: *mut OsTcb,
    /// Tick counter. In tick mode this is the time base; in tick-less mode
    /// it extends the hardware counter where the hardware is narrower.
    pub cnt: Cnt,
}

/// Global system state.
#[no_mangle]
pub static mut SYSTEM: Sys = Sys {
    cur: core::ptr::null_mut(),
    cnt: 0,
};

static INITED: AtomicBool = AtomicBool::new(false);

/// Main task: the context that called [`sys_init`] keeps running as this
/// task.
static mut MAIN: OsTcb = OsTcb::new();

/// Idle task; its header anchors the ready ring, so the ring head after it
/// is always the highest-priority runnable task.
static mut IDLE: OsTcb = OsTcb::new();

/// Deadline-ring sentinel with an infinite span; finite entries sort before
/// it, sleeping and suspended tasks use its wait queue as their guard.
static mut WAIT: OsTmr = OsTmr::new();

static mut MAIN_STACK: [StkElem; OS_STACK_SIZE] = [0; OS_STACK_SIZE];
static mut IDLE_STACK: [StkElem; OS_STACK_SIZE] = [0; OS_STACK_SIZE];

/// Idle hook, run whenever no task is runnable.
fn idle_hook() {
    #[cfg(target_arch = "arm")]
    cortex_m::asm::wfi();
}

#[inline]
fn stack_top(stack: *mut StkElem, len: usize) -> *mut StkElem {
    let end = unsafe { stack.add(len) };
    ((end as usize) & !7) as *mut StkElem
}

/// Initialize the kernel and adopt the calling context as the main task.
///
/// Must be called exactly once, from thread context, before any other
/// kernel service. On return the tick source is running and preemption is
/// live; the caller simply continues as the main task.
///
/// # Panics
/// Panics if the kernel was already initialized.
pub fn sys_init() {
    assert!(
        !INITED.swap(true, Ordering::SeqCst),
        "kernel already initialized"
    );
    debug_assert!(!port::port_isr_inside());

    critical_section(|_| unsafe {
        let main = &mut *(&raw mut MAIN);
        let idle = &mut *(&raw mut IDLE);
        let wait = &mut *(&raw mut WAIT);

        *main = OsTcb::new();
        main.hdr.obj.id = ObjId::Ready;
        main.basic = OS_MAIN_PRIO;
        main.prio = OS_MAIN_PRIO;
        main.stack = &raw mut MAIN_STACK as *mut StkElem;
        main.stack_size = OS_STACK_SIZE;
        main.top = stack_top(main.stack, OS_STACK_SIZE);

        *idle = OsTcb::new();
        idle.hdr.obj.id = ObjId::Idle;
        idle.hdr.state = Some(idle_hook);
        idle.stack = &raw mut IDLE_STACK as *mut StkElem;
        idle.stack_size = OS_STACK_SIZE;
        idle.top = stack_top(idle.stack, OS_STACK_SIZE);

        // ready ring: IDLE <-> MAIN
        let main_obj = NonNull::from(&mut main.hdr.obj);
        let idle_obj = NonNull::from(&mut idle.hdr.obj);
        main.hdr.obj.prev = Some(idle_obj);
        main.hdr.obj.next = Some(idle_obj);
        idle.hdr.obj.prev = Some(main_obj);
        idle.hdr.obj.next = Some(main_obj);

        // deadline ring: the sentinel alone
        *wait = OsTmr::new();
        wait.obj.id = ObjId::Timer;
        wait.delay = INFINITE;
        let wait_obj = NonNull::from(&mut wait.obj);
        wait.obj.prev = Some(wait_obj);
        wait.obj.next = Some(wait_obj);

        SYSTEM.cur = &raw mut MAIN;
        SYSTEM.cnt = 0;
    });

    port::port_sys_init();
}

/// Tear the kernel back down to its pre-init state so `sys_init` can run
/// again. Host-test plumbing only: any task or object created before the
/// reset still holds stale links.
#[doc(hidden)]
pub unsafe fn sys_reset() {
    unsafe {
        SYSTEM.cur = core::ptr::null_mut();
        SYSTEM.cnt = 0;
        *HEAP_BRK.get_unchecked() = 0;
    }
    INITED.store(false, Ordering::SeqCst);
}

/// The main task record.
#[doc(hidden)]
pub fn main_task() -> *mut OsTcb {
    unsafe { &raw mut MAIN }
}

/// The idle task record.
#[doc(hidden)]
pub fn idle_task() -> *mut OsTcb {
    unsafe { &raw mut IDLE }
}

/// The deadline-ring sentinel.
#[doc(hidden)]
pub fn wait_anchor() -> *mut OsTmr {
    unsafe { &raw mut WAIT }
}

/// Currently running task.
///
/// # Safety
/// The kernel must be initialized.
#[inline(always)]
pub(crate) unsafe fn cur() -> NonNull<OsTcb> {
    unsafe {
        debug_assert!(!SYSTEM.cur.is_null());
        NonNull::new_unchecked(SYSTEM.cur)
    }
}

/// Install a new current task.
#[inline(always)]
pub(crate) unsafe fn set_cur(tsk: NonNull<OsTcb>) {
    unsafe { SYSTEM.cur = tsk.as_ptr() }
}

/// Header of the idle task (ready-ring anchor).
#[inline(always)]
pub(crate) unsafe fn idle_obj() -> NonNull<ObjHead> {
    unsafe { NonNull::new_unchecked(&raw mut IDLE).cast() }
}

/// Header of the deadline-ring sentinel.
#[inline(always)]
pub(crate) unsafe fn wait_obj() -> NonNull<ObjHead> {
    unsafe { NonNull::new_unchecked(&raw mut WAIT).cast() }
}

/// Advance the tick counter by one. Kernel lock held.
#[inline(always)]
pub(crate) unsafe fn tick_increment() {
    unsafe { SYSTEM.cnt = SYSTEM.cnt.wrapping_add(1) }
}

/// Raw tick counter value. Kernel lock held.
#[inline(always)]
pub(crate) unsafe fn tick_count() -> Cnt {
    unsafe { SYSTEM.cnt }
}

// ============ System allocation region ============

#[repr(align(8))]
struct Heap([u8; OS_HEAP_SIZE]);

static mut HEAP: Heap = Heap([0; OS_HEAP_SIZE]);
static HEAP_BRK: CsCell<usize> = CsCell::new(0);

/// Carve a zeroed, 8-byte-aligned block out of the system region. Returns
/// null when the region is exhausted. Blocks are never reclaimed.
///
/// # Safety
/// Kernel lock held.
pub(crate) unsafe fn core_sys_alloc(size: usize) -> *mut u8 {
    if size == 0 {
        return core::ptr::null_mut();
    }

    let size = (size + 7) & !7;
    unsafe {
        let brk = HEAP_BRK.get_unchecked();
        if *brk + size > OS_HEAP_SIZE {
            return core::ptr::null_mut();
        }
        let base = (&raw mut HEAP as *mut u8).add(*brk);
        *brk += size;
        core::ptr::write_bytes(base, 0, size);
        base
    }
}

/// Release a block obtained from [`core_sys_alloc`]. The bump region never
/// reclaims storage; this exists so object deletion has a uniform shape.
///
/// # Safety
/// Kernel lock held.
pub(crate) unsafe fn core_sys_free(_base: *mut u8) {}
