// Copyright 2026 Adam Greig
// Dual licensed under the Apache 2.0 and MIT licenses.

//! Cooperative task harness (spec §2.10): an acquisition task draining
//! serial lines into per-module state, and a fusion task running the
//! outlier-rejecting estimator and publishing a frame to the SPI slave.
//!
//! Both tasks are paced off `Tick::now` from the main poll loop rather than
//! a real scheduler — at these periods (5 ms / 200 ms) a busy-poll `loop {
//! app.poll() }` comfortably keeps up.

use fusion_bsp::tick::Tick;
use fusion_core::config::{ACQUISITION_PERIOD_MS, FUSION_PERIOD_MS};
use fusion_core::fusion::Fusion;
use fusion_core::nmea::{self, Sentence};
use fusion_core::spi_frame;
use fusion_core::state::ModuleStore;

use crate::serial::Serial;

pub struct App<'a> {
    serial: Serial<'a>,
    modules: ModuleStore,
    fusion: Fusion,
    next_acquisition_ms: u32,
    next_fusion_ms: u32,
}

impl<'a> App<'a> {
    pub fn new(serial: Serial<'a>) -> Self {
        App {
            serial,
            modules: ModuleStore::new(),
            fusion: Fusion::new(),
            next_acquisition_ms: 0,
            next_fusion_ms: 0,
        }
    }

    pub fn poll(&mut self) {
        let now = Tick::now();

        if now.wrapping_sub(self.next_acquisition_ms) < u32::MAX / 2 {
            self.acquisition_tick(now);
            self.next_acquisition_ms = now.wrapping_add(ACQUISITION_PERIOD_MS);
        }

        if now.wrapping_sub(self.next_fusion_ms) < u32::MAX / 2 {
            self.fusion_tick(now);
            self.next_fusion_ms = now.wrapping_add(FUSION_PERIOD_MS);
        }
    }

    fn acquisition_tick(&mut self, now_ms: u32) {
        let modules = &mut self.modules;
        self.serial.poll(|idx, line| {
            modules.on_sentence(idx);
            if !nmea::checksum_ok(line) {
                modules.on_checksum_error(idx);
                return;
            }
            match nmea::parse(line) {
                Ok(Sentence::Gga(gga)) => modules.on_gga(idx, &gga, now_ms),
                Ok(Sentence::Rmc(rmc)) => modules.on_rmc(idx, &rmc, now_ms),
                // Checksum already passed above; anything else here (short
                // field count, bad field, unknown sentence type) is a
                // silent parse failure per spec §4.6/§7 — only checksum
                // failures bump a counter.
                Err(_) => {}
            }
        });
    }

    fn fusion_tick(&mut self, now_ms: u32) {
        let result = self.fusion.run(self.modules.all(), now_ms);
        let frame = spi_frame::encode(&result);
        self.serial.spi.publish(frame);
    }
}
