// Copyright 2026 Adam Greig
// Dual licensed under the Apache 2.0 and MIT licenses.

//! SPI slave publisher for the host link (spec §4.9).
//!
//! The host drives SCK/CS; this node only ever shifts out the most recently
//! published 32-byte frame, one byte per SPI transaction, restarting from
//! byte 0 every time CS is asserted. Whatever the host shifts in on MOSI is
//! read and discarded — the protocol is one-directional.

use core::cell::UnsafeCell;
use core::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use stm32ral::spi;
use stm32ral::{modify_reg, write_reg};

use fusion_core::spi_frame::FRAME_LEN;

/// The fusion task overwrites the whole frame roughly every 200ms; the SPI
/// ISR shifts it out a byte at a time, much faster and entirely
/// asynchronously. A publish landing mid-shift can hand the host a torn
/// frame, but the frame's own CRC (spec §4.9) makes that self-detecting on
/// the host side — the same tolerated-race argument already used for
/// `ModuleState` reads (spec §4.7), so no lock is needed here either.
///
/// CS (NSS) is software-managed (spec §4.9): the pin is wired as a plain
/// GPIO input, not to the SPI peripheral's hardware NSS input, and a GPIO
/// EXTI interrupt on its edges drives `on_select`/`on_deselect` below. `CR1`
/// is configured `SSM: Enabled` accordingly — the peripheral never samples a
/// hardware NSS pin at all.
pub struct SpiSlave {
    spi: spi::Instance,
    frame: UnsafeCell<[u8; FRAME_LEN]>,
    cursor: AtomicUsize,
    selected: AtomicBool,
}

unsafe impl Sync for SpiSlave {}

impl SpiSlave {
    pub fn new(spi: spi::Instance) -> Self {
        SpiSlave {
            spi,
            frame: UnsafeCell::new([0u8; FRAME_LEN]),
            cursor: AtomicUsize::new(0),
            selected: AtomicBool::new(false),
        }
    }

    /// Configure the peripheral as an 8-bit SPI slave, CPOL=0/CPHA=0, MSB
    /// first, software-managed NSS (spec §4.9): CS selection is entirely
    /// driven by the GPIO EXTI edge handler, not by the peripheral's own NSS
    /// pin. `SSI` starts at "not selected" and is flipped by `on_select` /
    /// `on_deselect` to mirror the real CS line's state into the internal
    /// NSS signal, same as `TXEIE`/`RXNEIE`.
    pub fn setup(&self) {
        write_reg!(
            spi,
            self.spi,
            CR1,
            BIDIMODE: Unidirectional,
            CRCEN: Disabled,
            RXONLY: FullDuplex,
            SSM: Enabled,
            SSI: SlaveNotSelected,
            LSBFIRST: MSBFirst,
            MSTR: Slave,
            CPOL: IdleLow,
            CPHA: FirstEdge
        );
        write_reg!(spi, self.spi, CR2, FRXTH: Quarter, DS: EightBit);
        modify_reg!(spi, self.spi, CR1, SPE: Enabled);
    }

    /// Replace the frame that will be shifted out on the next CS assertion.
    /// Called by the fusion task each publish cycle; safe to call at any
    /// point since it only affects bytes not yet latched into the shift
    /// register at the next TXE.
    pub fn publish(&self, frame: [u8; FRAME_LEN]) {
        unsafe { *self.frame.get() = frame };
    }

    /// Call from the CS EXTI handler on a falling edge (host selects us):
    /// rebuild the transmit cursor from byte 0 against whatever is currently
    /// published, clear any stale RXNE, and enable TXE/RXNE so the first
    /// clock edge shifts out `frame[0]`.
    pub fn on_select(&self) {
        self.cursor.store(0, Ordering::Relaxed);
        self.selected.store(true, Ordering::Relaxed);
        modify_reg!(spi, self.spi, CR2, RXNEIE: Disabled, TXEIE: Disabled);
        self.drain_rx();
        modify_reg!(spi, self.spi, CR1, SSI: SlaveSelected);
        let frame = unsafe { &*self.frame.get() };
        unsafe { core::ptr::write_volatile(&self.spi.DR as *const _ as *mut u8, frame[0]) };
        modify_reg!(spi, self.spi, CR2, RXNEIE: Enabled, TXEIE: Enabled);
    }

    /// Call from the CS EXTI handler on a rising edge (host deselects us):
    /// stop shifting, so further host clock edges before the next select
    /// don't advance a cursor nobody's reading.
    pub fn on_deselect(&self) {
        modify_reg!(spi, self.spi, CR2, RXNEIE: Disabled, TXEIE: Disabled);
        self.selected.store(false, Ordering::Relaxed);
        self.cursor.store(0, Ordering::Relaxed);
        modify_reg!(spi, self.spi, CR1, SSI: SlaveNotSelected);
        self.drain_rx();
    }

    fn drain_rx(&self) {
        let sr = unsafe { core::ptr::read_volatile(&self.spi.SR as *const _ as *const u16) };
        if sr & (1 << 0) != 0 {
            unsafe { core::ptr::read_volatile(&self.spi.DR as *const _ as *const u8) };
        }
    }

    /// Call from the SPI interrupt handler. Feeds the next frame byte into
    /// the shift register on TXE and discards whatever arrived on RXNE.
    /// Bytes clocked beyond the 32-byte frame are 0x00 (spec §4.9).
    pub fn isr(&self) {
        let sr = unsafe { core::ptr::read_volatile(&self.spi.SR as *const _ as *const u16) };
        let rxne = sr & (1 << 0) != 0;
        let txe = sr & (1 << 1) != 0;
        let ovr = sr & (1 << 6) != 0;

        if rxne {
            unsafe { core::ptr::read_volatile(&self.spi.DR as *const _ as *const u8) };
        }

        if ovr {
            // Clear OVR by reading DR then SR (already read above).
            let _ = unsafe { core::ptr::read_volatile(&self.spi.DR as *const _ as *const u8) };
        }

        if txe && self.selected.load(Ordering::Relaxed) {
            let idx = self.cursor.load(Ordering::Relaxed);
            let next_idx = idx + 1;
            let frame = unsafe { &*self.frame.get() };
            let byte = if next_idx < FRAME_LEN { frame[next_idx] } else { 0 };
            unsafe { core::ptr::write_volatile(&self.spi.DR as *const _ as *mut u8, byte) };
            let next = if next_idx >= FRAME_LEN { FRAME_LEN } else { next_idx };
            self.cursor.store(next, Ordering::Relaxed);
        }
    }
}
