// Copyright 2026 Adam Greig
// Dual licensed under the Apache 2.0 and MIT licenses.

//! Serial facade over the three hardware and five soft-UART receivers
//! (spec §4.4): drains each ring into its module's line assembler and
//! hands complete lines to the caller for NMEA decoding.

use fusion_bsp::spi_slave::SpiSlave;
use fusion_bsp::uart_hw::HwUart;
use fusion_bsp::uart_soft::{SoftUartSampler, SOFT_UART_CHANNELS};
use fusion_core::config::{ModuleIndex, LINE_BUFFER_LEN, MODULE_COUNT, RING_CAPACITY};
use fusion_core::nmea::LineAssembler;

const HW_UART_CHANNELS: usize = 3;
const DRAIN_CHUNK: usize = 64;

pub struct Serial<'a> {
    hw: [&'a HwUart<RING_CAPACITY>; HW_UART_CHANNELS],
    soft: &'a SoftUartSampler<'a, RING_CAPACITY>,
    lines: [LineAssembler<LINE_BUFFER_LEN>; MODULE_COUNT],
    pub spi: &'a SpiSlave,
}

impl<'a> Serial<'a> {
    pub fn new(
        hw: [&'a HwUart<RING_CAPACITY>; HW_UART_CHANNELS],
        soft: &'a SoftUartSampler<'a, RING_CAPACITY>,
        spi: &'a SpiSlave,
    ) -> Self {
        Serial {
            hw,
            soft,
            lines: [
                LineAssembler::new(), LineAssembler::new(), LineAssembler::new(),
                LineAssembler::new(), LineAssembler::new(), LineAssembler::new(),
                LineAssembler::new(), LineAssembler::new(),
            ],
            spi,
        }
    }

    /// Drain every receiver's ring, feeding complete lines to `on_line`.
    /// Called once per acquisition period from `App::acquisition_tick`.
    pub fn poll<F: FnMut(ModuleIndex, &[u8])>(&mut self, mut on_line: F) {
        let mut buf = [0u8; DRAIN_CHUNK];

        for (i, uart) in self.hw.iter().enumerate() {
            let n = uart.rx.pop_bulk(&mut buf);
            let idx = ModuleIndex::from_zero_based(i).unwrap();
            Self::feed(&mut self.lines[i], &buf[..n], idx, &mut on_line);
        }

        for (i, channel) in self.soft.channels.iter().enumerate() {
            let n = channel.rx.pop_bulk(&mut buf);
            let idx = ModuleIndex::from_zero_based(HW_UART_CHANNELS + i).unwrap();
            Self::feed(&mut self.lines[HW_UART_CHANNELS + i], &buf[..n], idx, &mut on_line);
        }
    }

    fn feed<F: FnMut(ModuleIndex, &[u8])>(
        assembler: &mut LineAssembler<LINE_BUFFER_LEN>,
        bytes: &[u8],
        idx: ModuleIndex,
        on_line: &mut F,
    ) {
        for &byte in bytes {
            if let Some(line) = assembler.feed(byte) {
                on_line(idx, line);
                assembler.reset();
            }
        }
    }
}

const _: () = assert!(SOFT_UART_CHANNELS + HW_UART_CHANNELS == MODULE_COUNT);
