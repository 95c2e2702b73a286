//! Compile-time kernel configuration.

use crate::types::{Cnt, Prio};

/// System tick frequency in Hz.
pub const OS_FREQUENCY: u32 = 1000;

/// Round-robin preemption. When set, every tick requests a context switch so
/// the dispatcher rotates the running task behind its priority equals; when
/// clear, dispatch happens only at explicit yield/block points.
pub const OS_ROBIN: bool = true;

/// Priority of the main task (the context that called `sys_init`).
pub const OS_MAIN_PRIO: Prio = 0;

/// Default stack size, in words, for the internal main and idle task stacks.
pub const OS_STACK_SIZE: usize = 256;

/// Size of the static allocation region used by the `*_create` constructors,
/// in bytes.
pub const OS_HEAP_SIZE: usize = 4096;

/// Core clock, used to derive the SysTick reload value.
pub const CPU_FREQUENCY: u32 = 16_000_000;

/// One millisecond worth of ticks.
pub const MSEC: Cnt = (OS_FREQUENCY / 1000) as Cnt;

/// One second worth of ticks.
pub const SEC: Cnt = OS_FREQUENCY as Cnt;
