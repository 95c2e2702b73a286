//! Object header and intrusive list bookkeeping.
//!
//! Every kernel record (task, timer, mutex, semaphore) embeds an [`ObjHead`]
//! as its first field. The header carries the record's list membership id,
//! the ready-ring/deadline-ring neighbours, and the head of the record's
//! wait queue. A record sits in at most one ring at a time; `id` says which.
//!
//! Layout invariant: `ObjHead` is the first field of a `#[repr(C)]` record,
//! and `OsTcb` starts with an embedded `OsTmr`, so the pointer casts below
//! are all offset-zero. The deadline ring reads `start`/`delay` through the
//! `OsTmr` view regardless of whether the entry is a timer or a task.

use core::ptr::NonNull;

use crate::sync::mutex::OsMtx;
use crate::task::OsTcb;
use crate::time::OsTmr;
use crate::types::ObjId;

/// Common header of every kernel object.
#[repr(C)]
pub struct ObjHead {
    /// Which intrusive list the record participates in.
    pub id: ObjId,
    /// Owning allocation if the record was heap-created, null otherwise.
    pub res: *mut u8,
    /// Previous ring neighbour (ready ring or deadline ring).
    pub prev: Option<NonNull<ObjHead>>,
    /// Next ring neighbour.
    pub next: Option<NonNull<ObjHead>>,
    /// Head of this object's wait queue: blocked tasks, highest priority
    /// first, FIFO among equals.
    pub queue: Option<NonNull<OsTcb>>,
}

impl ObjHead {
    pub const fn new(id: ObjId) -> Self {
        ObjHead {
            id,
            res: core::ptr::null_mut(),
            prev: None,
            next: None,
            queue: None,
        }
    }
}

// SAFETY: headers are only mutated under the kernel lock.
unsafe impl Send for ObjHead {}
unsafe impl Sync for ObjHead {}

/// View a ring entry as a timer record.
///
/// # Safety
/// `obj` must head a record whose `#[repr(C)]` layout starts with `OsTmr`
/// (any task or timer).
#[inline(always)]
pub(crate) unsafe fn tmr_of(obj: NonNull<ObjHead>) -> NonNull<OsTmr> {
    obj.cast()
}

/// View a ring entry as a task record.
///
/// # Safety
/// `obj` must head an `OsTcb`.
#[inline(always)]
pub(crate) unsafe fn tsk_of(obj: NonNull<ObjHead>) -> NonNull<OsTcb> {
    obj.cast()
}

/// View a wait-queue guard as a mutex record.
///
/// # Safety
/// `obj.id` must be `ObjId::Mutex`.
#[inline(always)]
pub(crate) unsafe fn mtx_of(obj: NonNull<ObjHead>) -> NonNull<OsMtx> {
    obj.cast()
}

/// Header of a task record.
#[inline(always)]
pub(crate) fn tsk_obj(tsk: NonNull<OsTcb>) -> NonNull<ObjHead> {
    tsk.cast()
}

/// Header of a timer record.
#[inline(always)]
pub(crate) fn tmr_obj(tmr: NonNull<OsTmr>) -> NonNull<ObjHead> {
    tmr.cast()
}

/// Splice `obj` into a ring immediately before `nxt`, stamping its id.
///
/// # Safety
/// Kernel lock held; `obj` is not linked anywhere; `nxt` is a live ring
/// member (possibly the anchor itself).
pub(crate) unsafe fn ring_insert(obj: NonNull<ObjHead>, id: ObjId, nxt: NonNull<ObjHead>) {
    unsafe {
        let prv = (*nxt.as_ptr()).prev.unwrap_or(nxt);
        let o = &mut *obj.as_ptr();
        o.id = id;
        o.prev = Some(prv);
        o.next = Some(nxt);
        (*nxt.as_ptr()).prev = Some(obj);
        (*prv.as_ptr()).next = Some(obj);
    }
}

/// Detach `obj` from its ring and mark it stopped. The caller usually
/// re-stamps the id right away (e.g. `Delayed` after leaving the ready
/// ring). Stale neighbour pointers are left behind, as the id alone decides
/// membership.
///
/// # Safety
/// Kernel lock held; `obj` is a live ring member.
pub(crate) unsafe fn ring_remove(obj: NonNull<ObjHead>) {
    unsafe {
        let o = &mut *obj.as_ptr();
        if let (Some(prv), Some(nxt)) = (o.prev, o.next) {
            (*nxt.as_ptr()).prev = Some(prv);
            (*prv.as_ptr()).next = Some(nxt);
        }
        o.id = ObjId::Stopped;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ring_of(anchor: &mut ObjHead) -> NonNull<ObjHead> {
        let p = NonNull::from(anchor);
        unsafe {
            (*p.as_ptr()).prev = Some(p);
            (*p.as_ptr()).next = Some(p);
        }
        p
    }

    #[test]
    fn test_ring_splice() {
        let mut anchor = ObjHead::new(ObjId::Idle);
        let mut a = ObjHead::new(ObjId::Stopped);
        let mut b = ObjHead::new(ObjId::Stopped);
        let ap = ring_of(&mut anchor);
        let an = NonNull::from(&mut a);
        let bn = NonNull::from(&mut b);

        unsafe {
            ring_insert(an, ObjId::Ready, ap);
            assert_eq!((*ap.as_ptr()).next, Some(an));
            assert_eq!((*ap.as_ptr()).prev, Some(an));

            // insert before `a`: order anchor -> b -> a
            ring_insert(bn, ObjId::Ready, an);
            assert_eq!((*ap.as_ptr()).next, Some(bn));
            assert_eq!((*bn.as_ptr()).next, Some(an));
            assert_eq!((*an.as_ptr()).next, Some(ap));

            ring_remove(bn);
            assert_eq!(b.id, ObjId::Stopped);
            assert_eq!((*ap.as_ptr()).next, Some(an));
            assert_eq!((*an.as_ptr()).prev, Some(ap));
        }
    }
}
