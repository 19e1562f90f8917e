// Copyright 2026 Adam Greig
// Dual licensed under the Apache 2.0 and MIT licenses.

//! Per-module NMEA line assembler (spec §4.5).
//!
//! Frames on `LF`, silently drops `CR`, and silently resets on overflow
//! rather than ever blocking or corrupting a subsequent line.

use heapless::Vec;

/// Assembles a byte stream into NUL-free, CR/LF-free lines up to
/// `N` bytes long.
pub struct LineAssembler<const N: usize> {
    buf: Vec<u8, N>,
}

impl<const N: usize> LineAssembler<N> {
    pub const fn new() -> Self {
        LineAssembler { buf: Vec::new() }
    }

    /// Feed one byte. Returns `Some(line)` when a complete, non-empty line
    /// has just been framed by an `LF`; the returned slice never contains
    /// `CR` or `LF`.
    pub fn feed(&mut self, byte: u8) -> Option<&[u8]> {
        match byte {
            b'\r' => None,
            b'\n' => {
                if self.buf.is_empty() {
                    None
                } else {
                    Some(self.buf.as_slice())
                }
            }
            _ => {
                if self.buf.push(byte).is_err() {
                    // Line too long: drop it silently and resync on the
                    // next LF.
                    self.buf.clear();
                }
                None
            }
        }
    }

    /// Must be called right after a `feed` that returned `Some(..)`, to
    /// reset the buffer for the next line.
    pub fn reset(&mut self) {
        self.buf.clear();
    }
}

impl<const N: usize> Default for LineAssembler<N> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn feed_line(asm: &mut LineAssembler<96>, line: &[u8]) -> Option<heapless::Vec<u8, 96>> {
        let mut out = None;
        for &b in line {
            if let Some(l) = asm.feed(b) {
                out = Some(heapless::Vec::from_slice(l).unwrap());
                asm.reset();
            }
        }
        out
    }

    #[test]
    fn basic_line_framing() {
        let mut asm: LineAssembler<96> = LineAssembler::new();
        let out = feed_line(&mut asm, b"$GPGGA,123519*47\r\n");
        assert_eq!(out.unwrap().as_slice(), b"$GPGGA,123519*47");
    }

    #[test]
    fn cr_is_ignored_not_framed() {
        let mut asm: LineAssembler<96> = LineAssembler::new();
        assert!(asm.feed(b'\r').is_none());
        assert!(asm.feed(b'A').is_none());
        assert!(asm.feed(b'\r').is_none());
        let out = asm.feed(b'\n');
        assert_eq!(out, Some(&b"A"[..]));
    }

    #[test]
    fn empty_line_is_not_delivered() {
        let mut asm: LineAssembler<96> = LineAssembler::new();
        assert!(asm.feed(b'\n').is_none());
        assert!(asm.feed(b'\r').is_none());
        assert!(asm.feed(b'\n').is_none());
    }

    #[test]
    fn overflow_resets_and_next_line_recovers() {
        let mut asm: LineAssembler<8> = LineAssembler::new();
        for _ in 0..20 {
            assert!(asm.feed(b'X').is_none());
        }
        // buffer was reset silently; a short line afterwards still frames
        let out = feed_line(&mut asm, b"abc");
        assert_eq!(out.unwrap().as_slice(), b"abc");
    }

    #[test]
    fn delivered_line_never_contains_cr_or_lf() {
        let mut asm: LineAssembler<96> = LineAssembler::new();
        let out = feed_line(&mut asm, b"$GPRMC,1\r,2\r*00\r\n").unwrap();
        assert!(!out.contains(&b'\r'));
        assert!(!out.contains(&b'\n'));
    }
}
