// Copyright 2026 Adam Greig
// Dual licensed under the Apache 2.0 and MIT licenses.

//! Checksum validation, tokenisation and GGA/RMC decoding (spec §4.6).

use super::fixed::{parse_coordinate, parse_fixed, parse_time_of_day, parse_uint};
use heapless::Vec;

const MAX_TOKENS: usize = 20;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum NmeaError {
    /// Line doesn't start with `$`.
    NoDollar,
    /// No `*` checksum delimiter found.
    NoStar,
    /// Checksum field is missing a hex digit or isn't valid hex.
    BadChecksumDigits,
    /// Computed XOR doesn't match the two hex digits after `*`.
    ChecksumMismatch,
    /// Fewer than 10 comma-separated fields.
    NotEnoughFields,
    /// A field failed to parse into its expected type.
    BadField,
    /// Sentence type (last 3 chars of token 0) is neither GGA nor RMC.
    UnknownSentence,
}

/// Decoded GGA ("GPS Fix Data") sentence, all fields fixed-point.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Gga {
    pub time_ms_of_day: u32,
    pub lat_e7: i64,
    pub lon_e7: i64,
    pub fix_quality: u32,
    pub satellites: u32,
    pub hdop_centi: u32,
    pub alt_cm: i64,
}

/// Decoded RMC ("Recommended Minimum") sentence.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Rmc {
    pub time_ms_of_day: u32,
    pub valid: bool,
    pub lat_e7: i64,
    pub lon_e7: i64,
    pub speed_centi_ms: i64,
    pub course_centi_deg: i64,
}

/// A successfully typed, decoded sentence.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Sentence {
    Gga(Gga),
    Rmc(Rmc),
}

/// Validate the `$...*hh` checksum framing of a raw (CR/LF-free) NMEA line.
///
/// The expected checksum is the two hex characters following `*`; the
/// actual checksum is the XOR of every byte strictly between `$` and `*`.
pub fn checksum_ok(line: &[u8]) -> bool {
    verify_checksum(line).is_ok()
}

fn verify_checksum(line: &[u8]) -> Result<usize, NmeaError> {
    if line.first() != Some(&b'$') {
        return Err(NmeaError::NoDollar);
    }
    let star = line.iter().position(|&b| b == b'*').ok_or(NmeaError::NoStar)?;
    if star < 2 {
        return Err(NmeaError::NoStar);
    }
    let hex = line.get(star + 1..star + 3).ok_or(NmeaError::BadChecksumDigits)?;
    let hi = hex_digit(hex[0]).ok_or(NmeaError::BadChecksumDigits)?;
    let lo = hex_digit(hex[1]).ok_or(NmeaError::BadChecksumDigits)?;
    let expected = (hi << 4) | lo;

    let actual = line[1..star].iter().fold(0u8, |acc, &b| acc ^ b);
    if actual == expected {
        Ok(star)
    } else {
        Err(NmeaError::ChecksumMismatch)
    }
}

fn hex_digit(b: u8) -> Option<u8> {
    match b {
        b'0'..=b'9' => Some(b - b'0'),
        b'A'..=b'F' => Some(b - b'A' + 10),
        b'a'..=b'f' => Some(b - b'a' + 10),
        _ => None,
    }
}

/// Split a checksum-delimited payload (everything before `*`, after the
/// leading `$`) into up to `MAX_TOKENS` comma-separated fields.
///
/// Note: per spec §9, `*` is *not* a terminator here — it has already been
/// sliced off by `verify_checksum` — so this only splits on `,`. (An earlier
/// revision of this parser used `*` as an extra in-place terminator, which
/// pushed the checksum digits into the token list as a spurious final
/// field; doing the split after truncating at the checksum avoids that.)
fn tokenize<'a>(payload: &'a [u8]) -> Vec<&'a [u8], MAX_TOKENS> {
    let mut tokens = Vec::new();
    for field in payload.split(|&b| b == b',') {
        if tokens.push(field).is_err() {
            break;
        }
    }
    tokens
}

fn as_str(field: &[u8]) -> Option<&str> {
    core::str::from_utf8(field).ok()
}

/// Sentence type is identified by the last three characters of token 0
/// (`GPGGA`, `GNGGA`, `GLGGA`, ... all count as GGA; similarly for RMC).
fn sentence_kind(token0: &[u8]) -> Option<[u8; 3]> {
    if token0.len() < 3 {
        return None;
    }
    let mut kind = [0u8; 3];
    kind.copy_from_slice(&token0[token0.len() - 3..]);
    Some(kind)
}

/// Parse a full raw NMEA line (no `\r`/`\n`): validate checksum, tokenise,
/// and decode GGA or RMC fields.
pub fn parse(line: &[u8]) -> Result<Sentence, NmeaError> {
    let star = verify_checksum(line)?;
    let payload = &line[1..star];
    let tokens = tokenize(payload);

    let token0 = tokens.first().copied().unwrap_or(&[]);
    match sentence_kind(token0) {
        Some(k) if &k == b"GGA" => parse_gga(&tokens).map(Sentence::Gga),
        Some(k) if &k == b"RMC" => parse_rmc(&tokens).map(Sentence::Rmc),
        _ => Err(NmeaError::UnknownSentence),
    }
}

fn field<'a>(tokens: &[&'a [u8]], i: usize) -> Result<&'a str, NmeaError> {
    let raw = tokens.get(i).copied().ok_or(NmeaError::NotEnoughFields)?;
    as_str(raw).ok_or(NmeaError::BadField)
}

fn parse_gga(tokens: &[&[u8]]) -> Result<Gga, NmeaError> {
    if tokens.len() < 10 {
        return Err(NmeaError::NotEnoughFields);
    }
    let time_ms_of_day =
        parse_time_of_day(field(tokens, 1)?).ok_or(NmeaError::BadField)?;
    let lat_e7 = parse_coordinate(field(tokens, 2)?, field(tokens, 3)?, 2)
        .ok_or(NmeaError::BadField)?;
    let lon_e7 = parse_coordinate(field(tokens, 4)?, field(tokens, 5)?, 3)
        .ok_or(NmeaError::BadField)?;
    let fix_quality = parse_uint(field(tokens, 6)?).ok_or(NmeaError::BadField)?;
    let satellites = parse_uint(field(tokens, 7)?).ok_or(NmeaError::BadField)?;
    let hdop_centi = parse_fixed(field(tokens, 8)?, 100).ok_or(NmeaError::BadField)? as u32;
    let alt_cm = parse_fixed(field(tokens, 9)?, 100).ok_or(NmeaError::BadField)?;

    Ok(Gga { time_ms_of_day, lat_e7, lon_e7, fix_quality, satellites, hdop_centi, alt_cm })
}

fn parse_rmc(tokens: &[&[u8]]) -> Result<Rmc, NmeaError> {
    if tokens.len() < 10 {
        return Err(NmeaError::NotEnoughFields);
    }
    let time_ms_of_day =
        parse_time_of_day(field(tokens, 1)?).ok_or(NmeaError::BadField)?;
    let status = field(tokens, 2)?;
    let valid = match status {
        "A" => true,
        "V" => false,
        _ => return Err(NmeaError::BadField),
    };
    let lat_e7 = parse_coordinate(field(tokens, 3)?, field(tokens, 4)?, 2)
        .ok_or(NmeaError::BadField)?;
    let lon_e7 = parse_coordinate(field(tokens, 5)?, field(tokens, 6)?, 3)
        .ok_or(NmeaError::BadField)?;
    // Speed and course are tolerated empty/unparseable (common right after
    // fix acquisition): default to 0 rather than failing the whole sentence,
    // unlike GGA's fields which are all mandatory (spec §4.6).
    let knots_x100 = parse_fixed(field(tokens, 7)?, 100).unwrap_or(0);
    let course_centi_deg = parse_fixed(field(tokens, 8)?, 100).unwrap_or(0);

    // knot = 0.514444 m/s; centi-m/s = knots_x100 * 51444 / 100000, truncated.
    let speed_centi_ms = (knots_x100 * 51444) / 100_000;

    Ok(Rmc { time_ms_of_day, valid, lat_e7, lon_e7, speed_centi_ms, course_centi_deg })
}

#[cfg(test)]
mod tests {
    use super::*;

    const GGA_LINE: &[u8] =
        b"$GPGGA,123519,4807.038,N,01131.000,E,1,08,0.9,545.4,M,46.9,M,,*47";
    const RMC_LINE: &[u8] =
        b"$GPRMC,123519,A,4807.038,N,01131.000,E,022.4,084.4,230394,,*6A";

    #[test]
    fn checksum_scenario_1() {
        assert!(checksum_ok(GGA_LINE));
        let mut tampered = heapless::Vec::<u8, 128>::from_slice(GGA_LINE).unwrap();
        let last = tampered.len() - 1;
        tampered[last] = b'8';
        assert!(!checksum_ok(&tampered));
    }

    #[test]
    fn checksum_rejects_missing_dollar() {
        assert!(!checksum_ok(b"GPGGA,1*00"));
    }

    #[test]
    fn checksum_rejects_missing_star() {
        assert!(!checksum_ok(b"$GPGGA,1"));
    }

    #[test]
    fn checksum_rejects_non_hex_digits() {
        assert!(!checksum_ok(b"$GPGGA,1*ZZ"));
    }

    #[test]
    fn gga_parse_scenario_2() {
        let sentence = parse(GGA_LINE).unwrap();
        match sentence {
            Sentence::Gga(gga) => {
                assert_eq!(gga.fix_quality, 1);
                assert_eq!(gga.satellites, 8);
                assert_eq!(gga.hdop_centi, 90);
                assert_eq!(gga.lat_e7, 481_173_000);
                assert_eq!(gga.lon_e7, 115_166_666);
                assert_eq!(gga.alt_cm, 54540);
                assert_eq!(gga.time_ms_of_day, 45_319_000);
            }
            _ => panic!("expected GGA"),
        }
    }

    #[test]
    fn rmc_parse_scenario_3() {
        let sentence = parse(RMC_LINE).unwrap();
        match sentence {
            Sentence::Rmc(rmc) => {
                assert!(rmc.valid);
                assert_eq!(rmc.lat_e7, 481_173_000);
                assert_eq!(rmc.lon_e7, 115_166_666);
                assert_eq!(rmc.speed_centi_ms, 1152);
                assert_eq!(rmc.course_centi_deg, 8440);
            }
            _ => panic!("expected RMC"),
        }
    }

    #[test]
    fn vendor_prefixes_all_match_gga() {
        for prefix in ["$GPGGA", "$GNGGA", "$GLGGA", "$GAGGA"] {
            let mut line = heapless::Vec::<u8, 128>::new();
            line.extend_from_slice(prefix.as_bytes()).unwrap();
            line.extend_from_slice(b",123519,4807.038,N,01131.000,E,1,08,0.9,545.4,M,46.9,M,,*00")
                .unwrap();
            // recompute checksum so the tampered prefix still validates
            let star = line.iter().position(|&b| b == b'*').unwrap();
            let xor = line[1..star].iter().fold(0u8, |a, &b| a ^ b);
            let hex = b"0123456789ABCDEF";
            line[star + 1] = hex[(xor >> 4) as usize];
            line[star + 2] = hex[(xor & 0xF) as usize];
            assert!(matches!(parse(&line), Ok(Sentence::Gga(_))));
        }
    }

    #[test]
    fn rmc_invalid_status_is_reported() {
        let line = b"$GPRMC,123519,V,4807.038,N,01131.000,E,022.4,084.4,230394,,*77";
        match parse(line) {
            Ok(Sentence::Rmc(rmc)) => assert!(!rmc.valid),
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn rmc_empty_speed_and_course_default_to_zero() {
        // Common right after fix acquisition: speed/course blank, position
        // still valid. These fields must not fail the whole sentence.
        let payload = b"GPRMC,123519,A,4807.038,N,01131.000,E,,,230394,,";
        let xor = payload.iter().fold(0u8, |a, &b| a ^ b);
        let hex = b"0123456789ABCDEF";
        let mut line = heapless::Vec::<u8, 96>::new();
        line.push(b'$').unwrap();
        line.extend_from_slice(payload).unwrap();
        line.push(b'*').unwrap();
        line.push(hex[(xor >> 4) as usize]).unwrap();
        line.push(hex[(xor & 0xF) as usize]).unwrap();
        match parse(&line) {
            Ok(Sentence::Rmc(rmc)) => {
                assert!(rmc.valid);
                assert_eq!(rmc.lat_e7, 481_173_000);
                assert_eq!(rmc.speed_centi_ms, 0);
                assert_eq!(rmc.course_centi_deg, 0);
            }
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn short_sentence_fails_field_count() {
        // checksum covers the truncated payload so this is purely a field-count check
        let payload = b"GPGGA,123519";
        let xor = payload.iter().fold(0u8, |a, &b| a ^ b);
        let hex = b"0123456789ABCDEF";
        let mut line = heapless::Vec::<u8, 64>::new();
        line.push(b'$').unwrap();
        line.extend_from_slice(payload).unwrap();
        line.push(b'*').unwrap();
        line.push(hex[(xor >> 4) as usize]).unwrap();
        line.push(hex[(xor & 0xF) as usize]).unwrap();
        assert_eq!(parse(&line), Err(NmeaError::NotEnoughFields));
    }

    #[test]
    fn unknown_sentence_type_is_rejected() {
        let payload = b"GPGLL,1,2,3,4,5,6,7,8,9,10,11";
        let xor = payload.iter().fold(0u8, |a, &b| a ^ b);
        let hex = b"0123456789ABCDEF";
        let mut line = heapless::Vec::<u8, 128>::new();
        line.push(b'$').unwrap();
        line.extend_from_slice(payload).unwrap();
        line.push(b'*').unwrap();
        line.push(hex[(xor >> 4) as usize]).unwrap();
        line.push(hex[(xor & 0xF) as usize]).unwrap();
        assert_eq!(parse(&line), Err(NmeaError::UnknownSentence));
    }
}
