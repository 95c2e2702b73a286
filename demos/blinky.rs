//! Blinky demo - two tasks sharing one LED schedule.
//!
//! Board demo source; build out-of-tree with a board support crate
//! providing the LED pin, e.g.:
//!
//! ```sh
//! cargo new blinky && cp demos/blinky.rs blinky/src/main.rs
//! cargo add stateos cortex-m cortex-m-rt defmt
//! ```

#![no_std]
#![no_main]

use core::sync::atomic::{AtomicBool, Ordering};

use cortex_m_rt::entry;
use defmt::info;

use stateos::task::{tsk_init, OsTcb};
use stateos::types::StkElem;
use stateos::{config, sys_init, task};

static LED_ON: AtomicBool = AtomicBool::new(false);

static mut FAST_TCB: OsTcb = OsTcb::new();
static mut FAST_STK: [StkElem; 256] = [0; 256];
static mut SLOW_TCB: OsTcb = OsTcb::new();
static mut SLOW_STK: [StkElem; 256] = [0; 256];

/// Toggle at 5 Hz.
fn fast_task() {
    loop {
        LED_ON.fetch_xor(true, Ordering::Relaxed);
        task::tsk_sleep_for(100 * config::MSEC);
    }
}

/// Report once a second.
fn slow_task() {
    loop {
        info!("led: {}", LED_ON.load(Ordering::Relaxed));
        task::tsk_sleep_for(config::SEC);
    }
}

#[entry]
fn main() -> ! {
    sys_init();

    #[allow(static_mut_refs)]
    unsafe {
        tsk_init(&mut FAST_TCB, &mut FAST_STK, 2, fast_task);
        tsk_init(&mut SLOW_TCB, &mut SLOW_STK, 1, slow_task);
    }

    // main idles at the lowest task priority
    loop {
        task::tsk_sleep_for(config::SEC);
    }
}
