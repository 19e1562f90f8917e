// Copyright 2026 Adam Greig
// Dual licensed under the Apache 2.0 and MIT licenses.

//! Timer-driven sampler for the five bit-banged soft-UART receivers
//! (spec §4.3).
//!
//! A single general-purpose timer (TIM6) is configured to interrupt at 8x
//! the configured baud rate. Every tick, every soft-UART pin is sampled
//! once and fed into its own `fusion_core::softuart::SoftUartChannel`; the
//! five state machines never interact with each other, only sharing the
//! timer that paces them.

use fusion_core::softuart::SoftUartChannel;
use stm32ral::tim6;
use stm32ral::{modify_reg, read_reg, write_reg};

use super::gpio::Pin;
use super::rcc::Clocks;

pub const SOFT_UART_CHANNELS: usize = 5;

pub struct SoftUartSampler<'a, const N: usize> {
    tim: tim6::Instance,
    pins: [Pin<'a>; SOFT_UART_CHANNELS],
    pub channels: [SoftUartChannel<N>; SOFT_UART_CHANNELS],
}

impl<'a, const N: usize> SoftUartSampler<'a, N> {
    pub fn new(tim: tim6::Instance, pins: [Pin<'a>; SOFT_UART_CHANNELS]) -> Self {
        SoftUartSampler {
            tim,
            pins,
            channels: [
                SoftUartChannel::new(),
                SoftUartChannel::new(),
                SoftUartChannel::new(),
                SoftUartChannel::new(),
                SoftUartChannel::new(),
            ],
        }
    }

    /// Arm the timer to interrupt at `8 * baud` Hz and enable its update
    /// interrupt. The five channels all assume the same baud rate, which
    /// matches every receiver on the board running its factory default.
    pub fn start(&self, clocks: &Clocks, baud: u32) {
        let target = 8 * baud;
        let fck = clocks.tim_pclk1();
        let psc = (fck / target / 0x1_0000).max(1) - 1;
        let arr = fck / (psc + 1) / target - 1;

        write_reg!(tim6, self.tim, PSC, psc);
        write_reg!(tim6, self.tim, ARR, arr);
        write_reg!(tim6, self.tim, EGR, UG: Update);
        write_reg!(tim6, self.tim, DIER, UIE: Enabled);
        write_reg!(tim6, self.tim, CR1, CEN: Enabled);
    }

    /// Call from the TIM6 interrupt handler: samples all five lines and
    /// advances their state machines by one tick.
    pub fn isr(&mut self) {
        write_reg!(tim6, self.tim, SR, 0);
        for (pin, channel) in self.pins.iter().zip(self.channels.iter_mut()) {
            channel.tick(pin.is_high());
        }
    }
}
