// Copyright 2026 Adam Greig
// Dual licensed under the Apache 2.0 and MIT licenses.

//! Millisecond tick source, used for `now_ms` timestamps throughout the
//! fusion engine (freshness windows, banishment, SPI frame age).
//!
//! SysTick is configured to raise an exception every millisecond; the
//! handler increments a single atomic counter. Everything else only ever
//! reads `Tick::now`.

use core::sync::atomic::{AtomicU32, Ordering};
use stm32ral::syst;
use stm32ral::{modify_reg, write_reg};

use super::rcc::Clocks;

static MILLIS: AtomicU32 = AtomicU32::new(0);

const SYST_CSR_ENABLE: u32 = 1 << 0;
const SYST_CSR_TICKINT: u32 = 1 << 1;
const SYST_CSR_CLKSOURCE: u32 = 1 << 2;

pub struct Tick {
    systick: syst::Instance,
}

impl Tick {
    pub fn new(systick: syst::Instance) -> Self {
        Tick { systick }
    }

    /// Arm SysTick to interrupt once per millisecond against the processor
    /// clock. Call once, after the clock tree is configured.
    pub fn start(&self, clocks: &Clocks) {
        let reload = clocks.hclk() / 1000 - 1;
        write_reg!(syst, self.systick, RVR, reload);
        write_reg!(syst, self.systick, CVR, 0);
        modify_reg!(syst, self.systick, CSR, |r| {
            r | SYST_CSR_CLKSOURCE | SYST_CSR_TICKINT | SYST_CSR_ENABLE
        });
    }

    /// Call from the SysTick exception handler.
    pub fn isr(&self) {
        MILLIS.fetch_add(1, Ordering::Relaxed);
    }

    /// Current millisecond count since `start`, wrapping at `u32::MAX`.
    pub fn now() -> u32 {
        MILLIS.load(Ordering::Relaxed)
    }
}
