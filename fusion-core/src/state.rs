// Copyright 2026 Adam Greig
// Dual licensed under the Apache 2.0 and MIT licenses.

//! Per-module latest-fix snapshot (spec §3, §4.7).
//!
//! Writer: the acquisition task, on every successfully parsed sentence.
//! Reader: the fusion task, with no locking — the 2 s freshness check in
//! `fusion::Fusion` is what makes a torn read harmless (spec §4.7).

use crate::config::MODULE_COUNT;
use crate::nmea::{Gga, Rmc};

/// Latest decoded state for one GNSS receiver.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct ModuleState {
    pub has_fix: bool,
    pub fix_quality: u8,
    pub satellites: u8,
    pub hdop_centi: u16,
    pub lat_e7: i32,
    pub lon_e7: i32,
    pub alt_cm: i32,
    pub speed_centi_ms: i32,
    pub course_centi_deg: i32,
    pub last_fix_tick: u32,
    pub nmea_sentences: u32,
    pub nmea_checksum_errors: u32,
}

impl ModuleState {
    pub const fn new() -> Self {
        ModuleState {
            has_fix: false,
            fix_quality: 0,
            satellites: 0,
            hdop_centi: 0,
            lat_e7: 0,
            lon_e7: 0,
            alt_cm: 0,
            speed_centi_ms: 0,
            course_centi_deg: 0,
            last_fix_tick: 0,
            nmea_sentences: 0,
            nmea_checksum_errors: 0,
        }
    }

    fn apply_gga(&mut self, gga: &Gga, now_ms: u32) {
        self.has_fix = gga.fix_quality > 0;
        self.fix_quality = gga.fix_quality.min(255) as u8;
        self.satellites = gga.satellites.min(255) as u8;
        self.hdop_centi = gga.hdop_centi.min(65535) as u16;
        self.lat_e7 = clamp_i32(gga.lat_e7);
        self.lon_e7 = clamp_i32(gga.lon_e7);
        self.alt_cm = clamp_i32(gga.alt_cm);
        self.last_fix_tick = now_ms;
    }

    fn apply_rmc(&mut self, rmc: &Rmc, now_ms: u32) {
        if rmc.valid {
            self.lat_e7 = clamp_i32(rmc.lat_e7);
            self.lon_e7 = clamp_i32(rmc.lon_e7);
            self.speed_centi_ms = clamp_i32(rmc.speed_centi_ms);
            self.course_centi_deg = clamp_i32(rmc.course_centi_deg);
            self.last_fix_tick = now_ms;
        }
    }

    fn bump_sentence(&mut self) {
        self.nmea_sentences = self.nmea_sentences.saturating_add(1);
    }

    fn bump_checksum_error(&mut self) {
        self.nmea_checksum_errors = self.nmea_checksum_errors.saturating_add(1);
    }
}

impl Default for ModuleState {
    fn default() -> Self {
        Self::new()
    }
}

fn clamp_i32(v: i64) -> i32 {
    v.clamp(i32::MIN as i64, i32::MAX as i64) as i32
}

/// All `MODULE_COUNT` module snapshots, zero-initialised at start-up.
pub struct ModuleStore {
    modules: [ModuleState; MODULE_COUNT],
}

impl ModuleStore {
    pub const fn new() -> Self {
        ModuleStore { modules: [ModuleState::new(); MODULE_COUNT] }
    }

    pub fn get(&self, index: crate::config::ModuleIndex) -> &ModuleState {
        &self.modules[index.zero_based()]
    }

    pub fn all(&self) -> &[ModuleState; MODULE_COUNT] {
        &self.modules
    }

    /// Apply a decoded GGA sentence to a module's state.
    pub fn on_gga(&mut self, index: crate::config::ModuleIndex, gga: &Gga, now_ms: u32) {
        self.modules[index.zero_based()].apply_gga(gga, now_ms);
    }

    /// Apply a decoded RMC sentence to a module's state.
    pub fn on_rmc(&mut self, index: crate::config::ModuleIndex, rmc: &Rmc, now_ms: u32) {
        self.modules[index.zero_based()].apply_rmc(rmc, now_ms);
    }

    /// Record that a complete line was handed to the parser, whatever the
    /// outcome — counts every assembled sentence, not just the ones that
    /// turn into a fix update (spec §3's `nmea_sentences` counter).
    pub fn on_sentence(&mut self, index: crate::config::ModuleIndex) {
        self.modules[index.zero_based()].bump_sentence();
    }

    /// Record a checksum failure for a module (counter only; no state change).
    pub fn on_checksum_error(&mut self, index: crate::config::ModuleIndex) {
        self.modules[index.zero_based()].bump_checksum_error();
    }
}

impl Default for ModuleStore {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ModuleIndex;
    use crate::nmea::parse;
    use crate::nmea::Sentence;

    #[test]
    fn gga_updates_fix_fields() {
        let mut store = ModuleStore::new();
        let idx = ModuleIndex::new(1).unwrap();
        let line = b"$GPGGA,123519,4807.038,N,01131.000,E,1,08,0.9,545.4,M,46.9,M,,*47";
        store.on_sentence(idx);
        match parse(line).unwrap() {
            Sentence::Gga(gga) => store.on_gga(idx, &gga, 1000),
            _ => unreachable!(),
        }
        let m = store.get(idx);
        assert!(m.has_fix);
        assert_eq!(m.fix_quality, 1);
        assert_eq!(m.satellites, 8);
        assert_eq!(m.hdop_centi, 90);
        assert_eq!(m.lat_e7, 481_173_000);
        assert_eq!(m.last_fix_tick, 1000);
        assert_eq!(m.nmea_sentences, 1);
    }

    #[test]
    fn rmc_invalid_status_does_not_move_position() {
        let mut store = ModuleStore::new();
        let idx = ModuleIndex::new(2).unwrap();
        let line = b"$GPRMC,123519,V,4807.038,N,01131.000,E,022.4,084.4,230394,,*77";
        store.on_sentence(idx);
        match parse(line).unwrap() {
            Sentence::Rmc(rmc) => store.on_rmc(idx, &rmc, 500),
            _ => unreachable!(),
        }
        let m = store.get(idx);
        assert_eq!(m.lat_e7, 0);
        assert_eq!(m.last_fix_tick, 0);
        assert_eq!(m.nmea_sentences, 1);
    }

    #[test]
    fn checksum_error_still_counts_as_a_received_sentence() {
        let mut store = ModuleStore::new();
        let idx = ModuleIndex::new(3).unwrap();
        store.on_sentence(idx);
        store.on_checksum_error(idx);
        store.on_sentence(idx);
        store.on_checksum_error(idx);
        let m = store.get(idx);
        assert_eq!(m.nmea_checksum_errors, 2);
        assert_eq!(m.nmea_sentences, 2);
        assert!(!m.has_fix);
    }

    #[test]
    fn repeated_identical_sentences_are_idempotent_barring_counters() {
        let mut store = ModuleStore::new();
        let idx = ModuleIndex::new(4).unwrap();
        let line = b"$GPGGA,123519,4807.038,N,01131.000,E,1,08,0.9,545.4,M,46.9,M,,*47";
        for tick in [100, 200] {
            store.on_sentence(idx);
            match parse(line).unwrap() {
                Sentence::Gga(gga) => store.on_gga(idx, &gga, tick),
                _ => unreachable!(),
            }
        }
        let m = store.get(idx);
        assert_eq!(m.lat_e7, 481_173_000);
        assert_eq!(m.last_fix_tick, 200);
        assert_eq!(m.nmea_sentences, 2);
    }
}
