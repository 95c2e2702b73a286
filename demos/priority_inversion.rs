//! Priority inversion demo - mutex priority inheritance.
//!
//! Three tasks: High(5), Med(3), Low(1). Low holds the mutex; when High
//! contends, Low runs at priority 5 until it releases, so Med cannot starve
//! High through Low.

#![no_std]
#![no_main]

use core::sync::atomic::{AtomicU32, Ordering};

use cortex_m_rt::entry;
use defmt::info;

use stateos::task::{tsk_init, OsTcb};
use stateos::types::StkElem;
use stateos::{config, sys_init, task, Mutex};

static HIGH_RUNS: AtomicU32 = AtomicU32::new(0);
static LOW_RUNS: AtomicU32 = AtomicU32::new(0);

static MTX: Mutex = Mutex::new();

static mut HIGH_TCB: OsTcb = OsTcb::new();
static mut HIGH_STK: [StkElem; 256] = [0; 256];
static mut MED_TCB: OsTcb = OsTcb::new();
static mut MED_STK: [StkElem; 256] = [0; 256];
static mut LOW_TCB: OsTcb = OsTcb::new();
static mut LOW_STK: [StkElem; 256] = [0; 256];

fn high_task() {
    task::tsk_sleep_for(50 * config::MSEC);

    loop {
        let n = HIGH_RUNS.fetch_add(1, Ordering::Relaxed) + 1;

        let _ = MTX.wait();
        info!("[HIGH] acquired #{}", n);
        cortex_m::asm::delay(1_000);
        MTX.give();

        task::tsk_sleep_for(100 * config::MSEC);
    }
}

/// CPU-bound middle priority.
fn med_task() {
    loop {
        cortex_m::asm::delay(50_000);
        task::tsk_sleep_for(10 * config::MSEC);
    }
}

/// Holds the mutex for a long stretch.
fn low_task() {
    loop {
        let n = LOW_RUNS.fetch_add(1, Ordering::Relaxed) + 1;

        let _ = MTX.wait();
        info!("[LOW] holding #{}", n);
        cortex_m::asm::delay(100_000);
        MTX.give();

        task::tsk_sleep_for(200 * config::MSEC);
    }
}

#[entry]
fn main() -> ! {
    info!("priority inversion demo: H(5) M(3) L(1)");

    sys_init();

    #[allow(static_mut_refs)]
    unsafe {
        tsk_init(&mut LOW_TCB, &mut LOW_STK, 1, low_task);
        tsk_init(&mut MED_TCB, &mut MED_STK, 3, med_task);
        tsk_init(&mut HIGH_TCB, &mut HIGH_STK, 5, high_task);
    }

    loop {
        task::tsk_sleep_for(config::SEC);
    }
}
