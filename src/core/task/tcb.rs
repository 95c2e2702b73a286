//! Task control block.

use core::ptr::NonNull;

use crate::obj::ObjHead;
use crate::sync::mutex::OsMtx;
use crate::time::OsTmr;
use crate::types::{Event, ObjId, Prio, StkElem};

/// Task control block.
///
/// The first field is a full timer record: a sleeping task and a periodic
/// timer are entries of the same deadline ring and are told apart by
/// `hdr.obj.id` alone. `hdr.state` holds the task's entry function; after
/// the entry returns, the stack-break trampoline resets the stack and
/// invokes it again.
#[repr(C)]
pub struct OsTcb {
    /// Deadline-ring prefix: header, entry function, sleep anchor and span.
    pub hdr: OsTmr,

    /// Predecessor in the wait queue the task is blocked on. Points at the
    /// queue owner's header, which is the guarded object itself for the
    /// queue head.
    pub back: Option<NonNull<ObjHead>>,

    /// Base of the task's private stack.
    pub stack: *mut StkElem,
    /// Stack size in words.
    pub stack_size: usize,
    /// Top of stack (8-byte aligned), where the stack-break trampoline and
    /// first-frame fabrication begin.
    pub top: *mut StkElem,
    /// Saved stack pointer; null until the task first runs.
    pub sp: *mut StkElem,

    /// Static priority.
    pub basic: Prio,
    /// Effective priority after inheritance.
    pub prio: Prio,

    /// Wait root for tasks joining this one.
    pub join: ObjHead,
    /// Detached tasks release their storage on exit instead of waking a
    /// joiner.
    pub detached: bool,

    /// Object whose wait queue holds this task; needed to relocate the task
    /// when its priority changes while blocked.
    pub guard: Option<NonNull<ObjHead>>,

    /// Result code stamped by the waker.
    pub event: Event,

    /// Head of the chain of mutexes this task owns, linked through
    /// `OsMtx::list`. Priority recomputation walks this chain.
    pub mtx_list: Option<NonNull<OsMtx>>,

    /// Scratch for flag-style waits: the mask still outstanding.
    pub flags: u32,
}

impl OsTcb {
    pub const fn new() -> Self {
        OsTcb {
            hdr: OsTmr::new(),
            back: None,
            stack: core::ptr::null_mut(),
            stack_size: 0,
            top: core::ptr::null_mut(),
            sp: core::ptr::null_mut(),
            basic: 0,
            prio: 0,
            join: ObjHead::new(ObjId::Stopped),
            detached: false,
            guard: None,
            event: 0,
            mtx_list: None,
            flags: 0,
        }
    }

    /// Task is linked in the ready ring.
    #[inline]
    pub fn is_ready(&self) -> bool {
        self.hdr.obj.id == ObjId::Ready
    }

    /// Task is linked in the deadline ring (sleeping, suspended or blocked
    /// on an object).
    #[inline]
    pub fn is_delayed(&self) -> bool {
        self.hdr.obj.id == ObjId::Delayed
    }

    /// Task is not linked anywhere.
    #[inline]
    pub fn is_stopped(&self) -> bool {
        self.hdr.obj.id == ObjId::Stopped
    }
}

impl Default for OsTcb {
    fn default() -> Self {
        Self::new()
    }
}

// SAFETY: task records are only mutated under the kernel lock; the stack is
// owned exclusively by the task itself.
unsafe impl Send for OsTcb {}
unsafe impl Sync for OsTcb {}
