//! Core type definitions for the kernel.
//!
//! All deadline arithmetic is carried out on `Cnt` with wrapping operations;
//! absolute tick values are never compared directly.

/// Tick counter type. Wrap-around is part of the contract: comparisons are
/// always of the form `now.wrapping_sub(anchor)`.
pub type Cnt = u32;

/// Task priority. 0 is the lowest priority and belongs to the idle task;
/// larger values run first.
pub type Prio = u32;

/// Wakeup event word. Usually one of the `E_*` constants, but flag-style
/// wakeups deliver the satisfied mask through the same slot.
pub type Event = u32;

/// Task entry point or timer callback.
pub type Fun = fn();

/// Stack element type.
pub type StkElem = u32;

/// Do not wait at all.
pub const IMMEDIATE: Cnt = 0;

/// Wait forever; a sentinel, never a real deadline.
pub const INFINITE: Cnt = Cnt::MAX;

/// The process was released by taking the supervising object.
pub const E_SUCCESS: Event = 0;

/// The process was released by killing the supervising object.
pub const E_STOPPED: Event = !0;

/// The process was released by the end of the countdown.
pub const E_TIMEOUT: Event = !1;

/// Unbounded semaphore limit.
pub const SEM_COUNTING: u32 = !0;

/// Identifies which intrusive list a kernel record currently participates
/// in. This is the ground truth for membership: the link/unlink operations
/// update it in the same critical section as the pointer splices.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ObjId {
    /// Not linked anywhere.
    Stopped = 0,
    /// Task linked in the ready ring.
    Ready,
    /// Task linked in the deadline ring and in some object's wait queue.
    Delayed,
    /// Periodic timer linked in the deadline ring.
    Timer,
    /// The idle task; anchors the ready ring and is never unlinked.
    Idle,
    /// A mutex; never linked in a ring. The id marks the object kind so a
    /// departing waiter can trigger owner-priority recomputation.
    Mutex,
    /// A semaphore; never linked in a ring.
    Sem,
}
