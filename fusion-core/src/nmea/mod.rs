// Copyright 2026 Adam Greig
// Dual licensed under the Apache 2.0 and MIT licenses.

//! NMEA-0183 line assembly and sentence decoding (spec §2.5, §2.6).

pub mod assembler;
pub mod fixed;
pub mod parser;

pub use assembler::LineAssembler;
pub use parser::{checksum_ok, parse, Gga, NmeaError, Rmc, Sentence};
