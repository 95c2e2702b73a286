//! Host-run kernel tests.
//!
//! These drive the kernel through the stub port: context switches are
//! explicit `core_tsk_handler` calls and the tick is advanced by hand, so
//! each scenario can inspect the rings between steps. Blocking calls return
//! immediately on the host; assertions therefore go against the recorded
//! state (`hdr.obj.id`, `event`, ring order), never against the stale
//! return value of the blocking call itself.

use core::ptr::NonNull;
use std::sync::{Mutex as StdMutex, MutexGuard};

use stateos::obj::ObjHead;
use stateos::sync::mutex::Mutex;
use stateos::sync::sem::Semaphore;
use stateos::task::OsTcb;
use stateos::time::OsTmr;
use stateos::types::*;
use stateos::{kernel, sched, sys_init, task, time};

/// The kernel state is a process-wide singleton; tests take this lock and
/// rebuild it from scratch.
static LOCK: StdMutex<()> = StdMutex::new(());

fn setup() -> MutexGuard<'static, ()> {
    let guard = LOCK.lock().unwrap_or_else(|e| e.into_inner());
    unsafe { kernel::sys_reset() };
    sys_init();
    guard
}

fn noop() {}

/// Create a ready task with a leaked record and stack.
fn spawn(prio: Prio) -> NonNull<OsTcb> {
    let tcb: &'static mut OsTcb = Box::leak(Box::new(OsTcb::new()));
    let stack: &'static mut [StkElem] = Box::leak(Box::new([0; 64]));
    let ptr = NonNull::from(&mut *tcb);
    task::tsk_init(tcb, stack, prio, noop);
    ptr
}

/// Pretend to be `tsk`: the next blocking call is issued by it.
fn run_as(tsk: NonNull<OsTcb>) {
    unsafe { kernel::SYSTEM.cur = tsk.as_ptr() };
}

fn run_as_main() {
    unsafe { kernel::SYSTEM.cur = kernel::main_task() };
}

fn cur() -> *mut OsTcb {
    unsafe { kernel::SYSTEM.cur }
}

/// Drive one context switch, as PendSV would.
fn dispatch() -> *mut OsTcb {
    unsafe { sched::core_tsk_handler(core::ptr::null_mut()) };
    cur()
}

fn tick(n: u32) {
    for _ in 0..n {
        time::core_sys_tick();
    }
}

fn set_time(t: Cnt) {
    unsafe { kernel::SYSTEM.cnt = t };
}

/// Ready-ring contents in dispatch order, idle anchor excluded.
fn ready_order() -> Vec<*mut OsTcb> {
    unsafe {
        let idle = kernel::idle_task();
        let anchor = &raw const (*idle).hdr.obj;
        let mut out = Vec::new();
        let mut n = (*idle).hdr.obj.next.expect("ready ring unlinked");
        while n.as_ptr() as *const ObjHead != anchor {
            out.push(n.cast::<OsTcb>().as_ptr());
            n = (*n.as_ptr()).next.expect("ready ring broken");
        }
        out
    }
}

/// Deadline-ring contents in expiry order, sentinel excluded.
fn deadline_order() -> Vec<*mut OsTmr> {
    unsafe {
        let wait = kernel::wait_anchor();
        let anchor = &raw const (*wait).obj;
        let mut out = Vec::new();
        let mut n = (*wait).obj.next.expect("deadline ring unlinked");
        while n.as_ptr() as *const ObjHead != anchor {
            out.push(n.cast::<OsTmr>().as_ptr());
            n = (*n.as_ptr()).next.expect("deadline ring broken");
        }
        out
    }
}

fn state_of(tsk: NonNull<OsTcb>) -> ObjId {
    unsafe { (*tsk.as_ptr()).hdr.obj.id }
}

fn event_of(tsk: NonNull<OsTcb>) -> Event {
    unsafe { (*tsk.as_ptr()).event }
}

fn prio_of(tsk: NonNull<OsTcb>) -> Prio {
    unsafe { (*tsk.as_ptr()).prio }
}

// ============ Ready ring ============

#[test]
fn ready_ring_sorted_fifo_among_equals() {
    let _g = setup();

    let a3 = spawn(3);
    let b1 = spawn(1);
    let c5 = spawn(5);
    let d3 = spawn(3);
    let e5 = spawn(5);

    // non-increasing priority, later arrivals behind earlier equals,
    // main (prio 0) at the tail just before the idle anchor
    assert_eq!(
        ready_order(),
        vec![
            c5.as_ptr(),
            e5.as_ptr(),
            a3.as_ptr(),
            d3.as_ptr(),
            b1.as_ptr(),
            kernel::main_task(),
        ]
    );

    let prios: Vec<Prio> = ready_order()
        .iter()
        .map(|t| unsafe { (**t).prio })
        .collect();
    assert!(prios.windows(2).all(|w| w[0] >= w[1]));
}

#[test]
fn preemption_readiness() {
    let _g = setup();

    let low = spawn(1);
    assert_eq!(dispatch(), low.as_ptr());

    let high = spawn(5);
    assert_eq!(dispatch(), high.as_ptr());
    assert_eq!(ready_order()[0], high.as_ptr());
    assert_eq!(ready_order()[1], low.as_ptr());
}

#[test]
fn round_robin_rotation() {
    let _g = setup();

    let a = spawn(3);
    let b = spawn(3);
    let c = spawn(3);

    assert_eq!(dispatch(), a.as_ptr());

    tick(1);
    assert_eq!(dispatch(), b.as_ptr());
    assert_eq!(ready_order(), vec![b.as_ptr(), c.as_ptr(), a.as_ptr(), kernel::main_task()]);

    tick(1);
    assert_eq!(dispatch(), c.as_ptr());

    tick(1);
    assert_eq!(dispatch(), a.as_ptr());
}

// ============ Delays and the deadline ring ============

#[test]
fn sleep_resumes_on_deadline_with_timeout() {
    let _g = setup();

    set_time(100);
    run_as_main();
    task::tsk_sleep_for(10);

    let main = unsafe { NonNull::new_unchecked(kernel::main_task()) };
    assert_eq!(state_of(main), ObjId::Delayed);

    tick(9);
    assert_eq!(state_of(main), ObjId::Delayed);

    tick(1);
    assert_eq!(unsafe { kernel::SYSTEM.cnt }, 110);
    assert_eq!(state_of(main), ObjId::Ready);
    assert_eq!(event_of(main), E_TIMEOUT);
}

#[test]
fn sleep_immediate_never_blocks() {
    let _g = setup();

    run_as_main();
    let event = task::tsk_sleep_for(IMMEDIATE);

    let main = unsafe { NonNull::new_unchecked(kernel::main_task()) };
    assert_eq!(event, E_TIMEOUT);
    assert_eq!(state_of(main), ObjId::Ready);
}

#[test]
fn deadline_ring_sorted_by_time_to_fire() {
    let _g = setup();

    let t50: &'static mut OsTmr = Box::leak(Box::new(OsTmr::new()));
    let t10: &'static mut OsTmr = Box::leak(Box::new(OsTmr::new()));
    let t30: &'static mut OsTmr = Box::leak(Box::new(OsTmr::new()));
    let p50 = NonNull::from(&mut *t50);
    let p10 = NonNull::from(&mut *t10);
    let p30 = NonNull::from(&mut *t30);
    time::tmr_init(t50, None);
    time::tmr_init(t10, None);
    time::tmr_init(t30, None);

    unsafe {
        time::tmr_start(p50, 50, 0);
        time::tmr_start(p10, 10, 0);
        time::tmr_start(p30, 30, 0);
    }

    assert_eq!(
        deadline_order(),
        vec![p10.as_ptr(), p30.as_ptr(), p50.as_ptr()]
    );

    // cumulative deadlines are non-decreasing along the ring
    let now = time::sys_time();
    let fires: Vec<Cnt> = deadline_order()
        .iter()
        .map(|t| unsafe { (**t).start.wrapping_add((**t).delay).wrapping_sub(now) })
        .collect();
    assert!(fires.windows(2).all(|w| w[0] <= w[1]));
}

#[test]
fn periodic_timer_reloads_and_wakes() {
    use std::sync::atomic::{AtomicU32, Ordering};
    static FIRED: AtomicU32 = AtomicU32::new(0);

    fn on_fire() {
        FIRED.fetch_add(1, Ordering::Relaxed);
    }

    let _g = setup();
    FIRED.store(0, Ordering::Relaxed);

    let tmr: &'static mut OsTmr = Box::leak(Box::new(OsTmr::new()));
    let ptr = NonNull::from(&mut *tmr);
    time::tmr_init(tmr, Some(on_fire));
    unsafe { time::tmr_start(ptr, 5, 3) };

    // a task waiting on the timer wakes with success at each expiry
    run_as_main();
    unsafe { time::tmr_wait(ptr) };
    let main = unsafe { NonNull::new_unchecked(kernel::main_task()) };
    assert_eq!(state_of(main), ObjId::Delayed);

    tick(5);
    assert_eq!(FIRED.load(Ordering::Relaxed), 1);
    assert_eq!(state_of(main), ObjId::Ready);
    assert_eq!(event_of(main), E_SUCCESS);
    assert_eq!(state_of(ptr.cast()), ObjId::Timer); // reloaded

    tick(3);
    assert_eq!(FIRED.load(Ordering::Relaxed), 2);
}

#[test]
fn one_shot_timer_stops_after_expiry() {
    let _g = setup();

    let tmr: &'static mut OsTmr = Box::leak(Box::new(OsTmr::new()));
    let ptr = NonNull::from(&mut *tmr);
    time::tmr_init(tmr, None);
    unsafe { time::tmr_start(ptr, 4, 0) };

    assert!(unsafe { time::tmr_take(ptr) }.is_err());

    tick(4);
    assert!(unsafe { time::tmr_take(ptr) }.is_ok());
    assert!(deadline_order().is_empty());
}

#[test]
fn counter_wrap_is_invisible() {
    let _g = setup();

    set_time(0xFFFF_FFF0);
    run_as_main();
    task::tsk_sleep_for(0x20);

    let main = unsafe { NonNull::new_unchecked(kernel::main_task()) };
    tick(0x1F);
    assert_eq!(unsafe { kernel::SYSTEM.cnt }, 0x0000_000F);
    assert_eq!(state_of(main), ObjId::Delayed);

    tick(1);
    assert_eq!(unsafe { kernel::SYSTEM.cnt }, 0x0000_0010);
    assert_eq!(state_of(main), ObjId::Ready);
    assert_eq!(event_of(main), E_TIMEOUT);
}

// ============ Wait queues ============

#[test]
fn wake_order_is_priority_then_fifo() {
    let _g = setup();

    let sem: &'static Semaphore = Box::leak(Box::new(Semaphore::new(0, SEM_COUNTING)));

    let w2 = spawn(2);
    let w5a = spawn(5);
    let w3 = spawn(3);
    let w5b = spawn(5);

    for w in [w2, w5a, w3, w5b] {
        run_as(w);
        let _ = sem.wait();
        assert_eq!(state_of(w), ObjId::Delayed);
    }

    run_as_main();
    for expect in [w5a, w5b, w3, w2] {
        let _ = sem.give();
        assert_eq!(state_of(expect), ObjId::Ready);
        assert_eq!(event_of(expect), E_SUCCESS);
    }
}

#[test]
fn kill_wakes_every_waiter_with_stopped() {
    let _g = setup();

    let sem: &'static Semaphore = Box::leak(Box::new(Semaphore::new(0, SEM_COUNTING)));

    let w1 = spawn(2);
    let w2 = spawn(4);

    run_as(w1);
    let _ = sem.wait();
    run_as(w2);
    let _ = sem.wait();

    run_as_main();
    sem.kill();

    assert_eq!(state_of(w1), ObjId::Ready);
    assert_eq!(state_of(w2), ObjId::Ready);
    assert_eq!(event_of(w1), E_STOPPED);
    assert_eq!(event_of(w2), E_STOPPED);

    // the higher-priority waiter heads the ready ring
    assert_eq!(ready_order()[0], w2.as_ptr());
    assert_eq!(dispatch(), w2.as_ptr());
}

#[test]
fn semaphore_take_and_counting() {
    let _g = setup();

    let sem: &'static Semaphore = Box::leak(Box::new(Semaphore::new(1, 1)));

    run_as_main();
    assert!(sem.take().is_ok());
    assert!(sem.take().is_err()); // empty, IMMEDIATE never blocks
    let main = unsafe { NonNull::new_unchecked(kernel::main_task()) };
    assert_eq!(state_of(main), ObjId::Ready);

    assert!(sem.give().is_ok());
    assert_eq!(sem.value(), 1);
    assert!(sem.give().is_err()); // ceiling reached
}

#[test]
fn waiter_timeout_leaves_queue_clean() {
    let _g = setup();

    let sem: &'static Semaphore = Box::leak(Box::new(Semaphore::new(0, SEM_COUNTING)));

    let w = spawn(2);
    run_as(w);
    let _ = sem.wait_for(5);
    assert_eq!(state_of(w), ObjId::Delayed);

    tick(5);
    assert_eq!(state_of(w), ObjId::Ready);
    assert_eq!(event_of(w), E_TIMEOUT);

    // queue is empty again: a give bumps the counter instead of waking
    run_as_main();
    assert!(sem.give().is_ok());
    assert_eq!(sem.value(), 1);
}

// ============ Signals, suspend, kill ============

#[test]
fn task_signals_accumulate_until_mask_drains() {
    let _g = setup();

    let w = spawn(2);
    run_as(w);
    let _ = task::tsk_wait_for(0b11, INFINITE);
    assert_eq!(state_of(w), ObjId::Delayed);

    run_as_main();
    unsafe { task::tsk_give(w, 0b01) };
    assert_eq!(state_of(w), ObjId::Delayed);

    unsafe { task::tsk_give(w, 0b10) };
    assert_eq!(state_of(w), ObjId::Ready);
    assert_eq!(event_of(w), 0b10);
}

#[test]
fn suspend_and_resume() {
    let _g = setup();

    let w = spawn(3);
    assert!(unsafe { task::tsk_suspend(w) }.is_ok());
    assert_eq!(state_of(w), ObjId::Delayed);
    assert!(!ready_order().contains(&w.as_ptr()));

    // an indefinite park never expires
    tick(50);
    assert_eq!(state_of(w), ObjId::Delayed);

    assert!(unsafe { task::tsk_resume(w) }.is_ok());
    assert_eq!(state_of(w), ObjId::Ready);

    assert!(unsafe { task::tsk_resume(w) }.is_err()); // not parked any more
}

#[test]
fn kill_blocked_task_and_join_wake() {
    let _g = setup();

    let sem: &'static Semaphore = Box::leak(Box::new(Semaphore::new(0, SEM_COUNTING)));
    let w = spawn(2);

    run_as_main();
    let _ = unsafe { task::tsk_join(w) };
    let main = unsafe { NonNull::new_unchecked(kernel::main_task()) };
    assert_eq!(state_of(main), ObjId::Delayed);

    run_as(w);
    let _ = sem.wait();

    unsafe { task::tsk_kill(w) };
    assert_eq!(state_of(w), ObjId::Stopped);
    assert!(deadline_order().is_empty() || !deadline_order().contains(&(w.as_ptr() as *mut OsTmr)));

    // the joiner woke with STOPPED
    assert_eq!(state_of(main), ObjId::Ready);
    assert_eq!(event_of(main), E_STOPPED);

    // the record can be restarted
    unsafe { task::tsk_start(w) };
    assert_eq!(state_of(w), ObjId::Ready);
}

// ============ Priority inheritance ============

#[test]
fn priority_inheritance_boost_and_restore() {
    let _g = setup();

    let mtx: &'static Mutex = Box::leak(Box::new(Mutex::new()));

    let low = spawn(1);
    let mid = spawn(2);
    let high = spawn(5);

    run_as(low);
    assert!(mtx.wait().is_ok());
    assert_eq!(mtx.owner_prio(), Some(1));

    run_as(high);
    let _ = mtx.wait();
    assert_eq!(state_of(high), ObjId::Delayed);

    // the owner inherited the waiter's priority and outranks mid now
    assert_eq!(prio_of(low), 5);
    let order = ready_order();
    assert!(order.iter().position(|t| *t == low.as_ptr()).unwrap()
        < order.iter().position(|t| *t == mid.as_ptr()).unwrap());

    run_as(low);
    mtx.give();

    // inheritance gone, ownership transferred to the high waiter
    assert_eq!(prio_of(low), 1);
    assert_eq!(state_of(high), ObjId::Ready);
    assert_eq!(event_of(high), E_SUCCESS);
    assert_eq!(mtx.owner_prio(), Some(5));
    assert_eq!(dispatch(), high.as_ptr());
}

#[test]
fn priority_inheritance_drops_on_waiter_timeout() {
    let _g = setup();

    let mtx: &'static Mutex = Box::leak(Box::new(Mutex::new()));

    let low = spawn(1);
    let high = spawn(5);

    run_as(low);
    assert!(mtx.wait().is_ok());

    run_as(high);
    let _ = mtx.wait_for(5);
    assert_eq!(prio_of(low), 5);

    tick(5);
    assert_eq!(state_of(high), ObjId::Ready);
    assert_eq!(event_of(high), E_TIMEOUT);

    // the departed waiter no longer props the owner up
    assert_eq!(prio_of(low), 1);
    assert!(mtx.is_owned());
}

#[test]
fn priority_change_requeues_blocked_task_on_its_guard() {
    let _g = setup();

    let mtx: &'static Mutex = Box::leak(Box::new(Mutex::new()));
    let sem: &'static Semaphore = Box::leak(Box::new(Semaphore::new(0, SEM_COUNTING)));

    let low = spawn(1);
    let mid = spawn(2);
    let high = spawn(5);

    // low owns the mutex, then blocks on the semaphore behind mid
    run_as(low);
    assert!(mtx.wait().is_ok());
    let _ = sem.wait();
    run_as(mid);
    let _ = sem.wait();

    let low_deadline = unsafe { (*low.as_ptr()).hdr.start };

    // high contends on the mutex: low inherits while blocked, and is
    // re-queued ahead of mid on the semaphore it waits on
    run_as(high);
    let _ = mtx.wait();
    assert_eq!(prio_of(low), 5);
    assert_eq!(state_of(low), ObjId::Delayed);
    assert_eq!(unsafe { (*low.as_ptr()).hdr.start }, low_deadline);

    run_as_main();
    let _ = sem.give();
    assert_eq!(state_of(low), ObjId::Ready);
    assert_eq!(event_of(low), E_SUCCESS);
    assert_eq!(state_of(mid), ObjId::Delayed);
}

#[test]
fn recursive_mutex_nests() {
    let _g = setup();

    let mtx: &'static Mutex = Box::leak(Box::new(Mutex::new()));

    run_as_main();
    assert!(mtx.wait().is_ok());
    assert!(mtx.wait().is_ok());
    mtx.give();
    assert!(mtx.is_owned());
    mtx.give();
    assert!(!mtx.is_owned());
}

// ============ Allocation-backed constructors ============

#[test]
fn created_objects_live_in_the_system_region() {
    let _g = setup();

    let w = task::wrk_create(3, noop, 64).expect("region exhausted");
    assert_eq!(state_of(w), ObjId::Ready);
    assert_eq!(prio_of(w), 3);

    let tmr = time::tmr_create(None).expect("region exhausted");
    unsafe { time::tmr_start(tmr, 2, 0) };
    tick(2);
    assert!(unsafe { time::tmr_take(tmr) }.is_ok());

    unsafe { task::tsk_kill(w) };
    assert_eq!(state_of(w), ObjId::Stopped);
}
