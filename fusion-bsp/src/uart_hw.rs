// Copyright 2026 Adam Greig
// Dual licensed under the Apache 2.0 and MIT licenses.

//! Interrupt-driven, byte-at-a-time hardware UART receiver (spec §4.2).
//!
//! Three of the node's eight receivers land on real USART peripherals.
//! Each one is configured receive-only, one-byte RXNE interrupts: on every
//! RX-complete interrupt the ISR pushes the byte into that peripheral's
//! ring and the peripheral is already re-armed for the next byte (RXNE
//! re-arms itself once `RDR` is read). Framing/overrun errors are cleared
//! and the byte discarded without surfacing anywhere — the NMEA checksum
//! naturally rejects whatever corruption they caused.

use fusion_core::ring::RingBuffer;
use stm32ral::usart;
use stm32ral::{modify_reg, read_reg, write_reg};

use super::rcc::Clocks;

/// One hardware UART, owning its receive ring.
pub struct HwUart<const N: usize> {
    uart: usart::Instance,
    fck: u32,
    pub rx: RingBuffer<N>,
}

impl<const N: usize> HwUart<N> {
    pub fn new(uart: usart::Instance) -> Self {
        HwUart { uart, fck: 0, rx: RingBuffer::new() }
    }

    /// Record the peripheral clock used for baud rate calculation. Call
    /// after the clock tree is configured and before `start`.
    pub fn setup(&mut self, clocks: &Clocks, on_apb2: bool) {
        self.fck = if on_apb2 { clocks.pclk2() } else { clocks.pclk1() };
    }

    /// Configure the baud rate, enable the receiver and its RXNE interrupt.
    ///
    /// `UART::poll_isr` must be invoked from the corresponding interrupt
    /// vector once this returns.
    pub fn start(&self, baud: u32) {
        let brr = self.fck / baud;
        write_reg!(usart, self.uart, BRR, brr);
        write_reg!(usart, self.uart, CR2, STOP: Stop1);
        write_reg!(usart, self.uart, CR1, M: Bit8, PCE: Disabled, RXNEIE: Enabled, RE: Enabled, UE: Enabled);
    }

    pub fn stop(&self) {
        modify_reg!(usart, self.uart, CR1, RE: Disabled, RXNEIE: Disabled);
    }

    /// Call from the USARTx interrupt handler.
    ///
    /// Pushes the received byte into the ring, or discards it (clearing
    /// the error flags) on a framing or overrun error.
    pub fn isr(&self) {
        let rxne = read_reg!(usart, self.uart, ISR, RXNE) != 0;
        if rxne {
            let byte = read_reg!(usart, self.uart, RDR, RDR) as u8;
            self.rx.push(byte);
        }
        // Clear framing/noise/overrun flags unconditionally; a byte that
        // arrived corrupted is simply dropped, never surfaced (spec §4.2).
        write_reg!(usart, self.uart, ICR, ORECF: Clear, FECF: Clear, NECF: Clear);
    }
}

#[cfg(test)]
mod tests {
    // Register-level code isn't host-testable; the ring and NMEA layers it
    // feeds are covered in `fusion-core`.
}
