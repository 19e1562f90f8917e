// Copyright 2026 Adam Greig
// Dual licensed under the Apache 2.0 and MIT licenses.

//! 32-byte little-endian SPI snapshot frame (spec §4.9).
//!
//! This module only encodes/decodes the frame layout and computes its CRC;
//! the SPI slave state machine (CS edge handling, TXE/RXNE byte shovelling)
//! lives in `fusion-bsp::spi_slave` since it's register-level.

use crate::crc16::crc16_ccitt_false;
use crate::fusion::{FusionResult, FusionStatus};
use core::convert::TryInto;

pub const FRAME_LEN: usize = 32;
pub const MAGIC: u32 = 0x3146_4745; // 'EGF1' little-endian in the frame

/// Encode a `FusionResult` into the 32-byte wire frame.
pub fn encode(result: &FusionResult) -> [u8; FRAME_LEN] {
    let mut frame = [0u8; FRAME_LEN];

    frame[0..4].copy_from_slice(&MAGIC.to_le_bytes());
    frame[4..8].copy_from_slice(&result.last_update_tick.to_le_bytes());
    frame[8..12].copy_from_slice(&result.lat_e7.to_le_bytes());
    frame[12..16].copy_from_slice(&result.lon_e7.to_le_bytes());
    frame[16..20].copy_from_slice(&result.alt_cm.to_le_bytes());
    frame[20..22].copy_from_slice(&result.avg_hdop_centi.to_le_bytes());
    frame[22..24].copy_from_slice(&result.max_residual_cm.to_le_bytes());
    frame[24] = status_code(result.status);
    frame[25] = result.used_modules;
    frame[26] = result.rejected_modules;
    frame[27] = result.has_fix as u8;
    frame[28..30].copy_from_slice(&0u16.to_le_bytes());

    let crc = crc16_ccitt_false(&frame[0..30]);
    frame[30..32].copy_from_slice(&crc.to_le_bytes());

    frame
}

fn status_code(status: FusionStatus) -> u8 {
    match status {
        FusionStatus::NoFix => 0,
        FusionStatus::Ok => 1,
        FusionStatus::Degraded => 2,
        FusionStatus::Interference => 3,
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct DecodedFrame {
    pub last_update_tick: u32,
    pub lat_e7: i32,
    pub lon_e7: i32,
    pub alt_cm: i32,
    pub avg_hdop_centi: u16,
    pub max_residual_cm: u16,
    pub status: u8,
    pub used_modules: u8,
    pub rejected_modules: u8,
    pub has_fix: bool,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum FrameError {
    BadMagic,
    BadCrc,
}

/// Decode and validate a 32-byte frame, primarily for host-side testing of
/// the wire format (the firmware's SPI ISR never decodes its own frames).
pub fn decode(frame: &[u8; FRAME_LEN]) -> Result<DecodedFrame, FrameError> {
    let magic = u32::from_le_bytes(frame[0..4].try_into().unwrap());
    if magic != MAGIC {
        return Err(FrameError::BadMagic);
    }
    let crc_expected = u16::from_le_bytes(frame[30..32].try_into().unwrap());
    let crc_actual = crc16_ccitt_false(&frame[0..30]);
    if crc_actual != crc_expected {
        return Err(FrameError::BadCrc);
    }

    Ok(DecodedFrame {
        last_update_tick: u32::from_le_bytes(frame[4..8].try_into().unwrap()),
        lat_e7: i32::from_le_bytes(frame[8..12].try_into().unwrap()),
        lon_e7: i32::from_le_bytes(frame[12..16].try_into().unwrap()),
        alt_cm: i32::from_le_bytes(frame[16..20].try_into().unwrap()),
        avg_hdop_centi: u16::from_le_bytes(frame[20..22].try_into().unwrap()),
        max_residual_cm: u16::from_le_bytes(frame[22..24].try_into().unwrap()),
        status: frame[24],
        used_modules: frame[25],
        rejected_modules: frame[26],
        has_fix: frame[27] != 0,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_result() -> FusionResult {
        FusionResult {
            has_fix: true,
            status: FusionStatus::Ok,
            lat_e7: 481_173_000,
            lon_e7: 115_166_666,
            alt_cm: 54540,
            used_modules: 8,
            rejected_modules: 0,
            max_residual_cm: 0,
            avg_hdop_centi: 100,
            last_update_tick: 0x0000_1000,
        }
    }

    #[test]
    fn magic_bytes_scenario_7() {
        let frame = encode(&sample_result());
        assert_eq!(&frame[0..4], &[0x45, 0x47, 0x46, 0x31]);
    }

    #[test]
    fn lat_field_scenario_7() {
        let frame = encode(&sample_result());
        let lat = i32::from_le_bytes(frame[8..12].try_into().unwrap());
        assert_eq!(lat, 481_173_000);
    }

    #[test]
    fn crc_is_self_consistent() {
        let frame = encode(&sample_result());
        let crc = u16::from_le_bytes(frame[30..32].try_into().unwrap());
        assert_eq!(crc16_ccitt_false(&frame[0..30]), crc);
    }

    #[test]
    fn round_trips_all_fields() {
        let result = sample_result();
        let frame = encode(&result);
        let decoded = decode(&frame).unwrap();
        assert_eq!(decoded.last_update_tick, result.last_update_tick);
        assert_eq!(decoded.lat_e7, result.lat_e7);
        assert_eq!(decoded.lon_e7, result.lon_e7);
        assert_eq!(decoded.alt_cm, result.alt_cm);
        assert_eq!(decoded.avg_hdop_centi, result.avg_hdop_centi);
        assert_eq!(decoded.max_residual_cm, result.max_residual_cm);
        assert_eq!(decoded.status, 1);
        assert_eq!(decoded.used_modules, result.used_modules);
        assert_eq!(decoded.rejected_modules, result.rejected_modules);
        assert!(decoded.has_fix);
    }

    #[test]
    fn tampered_byte_fails_crc() {
        let mut frame = encode(&sample_result());
        frame[10] ^= 0xFF;
        assert_eq!(decode(&frame), Err(FrameError::BadCrc));
    }

    #[test]
    fn wrong_magic_is_rejected() {
        let mut frame = encode(&sample_result());
        frame[0] = 0;
        assert_eq!(decode(&frame), Err(FrameError::BadMagic));
    }

    #[test]
    fn no_fix_frame_has_zeroed_coordinates() {
        let result = FusionResult::no_fix(42);
        let frame = encode(&result);
        let decoded = decode(&frame).unwrap();
        assert!(!decoded.has_fix);
        assert_eq!(decoded.lat_e7, 0);
        assert_eq!(decoded.status, 0);
    }
}
