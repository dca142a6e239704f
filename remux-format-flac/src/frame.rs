// Remux
// Copyright (c) 2026 The Project Remux Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! FLAC frame-header parsing and sync scanning.

use remux_core::errors::{invalid_format_error, Result};
use remux_core::io::BitReader;

/// A parsed FLAC frame header.
#[derive(Copy, Clone, Debug)]
pub struct FrameHeader {
    /// Samples in the frame.
    pub block_size: u32,
    /// The coded sample (variable block size) or frame (fixed block size) number.
    pub position: u64,
    pub variable_block_size: bool,
    /// Length of the header in bytes, CRC included.
    pub header_len: usize,
}

impl FrameHeader {
    /// The first sample of the frame, given the stream's fixed block size when frame-numbered.
    pub fn start_sample(&self, fixed_block_size: u32) -> u64 {
        if self.variable_block_size {
            self.position
        }
        else {
            self.position * u64::from(fixed_block_size)
        }
    }
}

/// Returns true if two bytes look like a frame sync code: 14 sync bits plus a zero reserved bit.
#[inline]
pub fn is_sync_pair(b0: u8, b1: u8) -> bool {
    b0 == 0xff && (b1 & 0xfc) == 0xf8
}

/// Parse a frame header starting at the front of `data`. The trailing CRC-8 is verified, which
/// filters false sync matches inside compressed payloads.
pub fn parse_frame_header(data: &[u8]) -> Result<FrameHeader> {
    if data.len() < 6 {
        return invalid_format_error("flac: truncated frame header");
    }
    if !is_sync_pair(data[0], data[1]) {
        return invalid_format_error("flac: missing frame sync");
    }

    let mut bs = BitReader::new(data);
    bs.skip_bits(15)?;
    let variable_block_size = bs.read_bit()?;

    let block_size_bits = bs.read_bits(4)?;
    let sample_rate_bits = bs.read_bits(4)?;
    // Channel assignment and sample size.
    bs.skip_bits(4 + 3)?;
    if bs.read_bit()? {
        return invalid_format_error("flac: reserved header bit set");
    }

    let position = read_utf8_coded(&mut bs)?;

    let block_size = match block_size_bits {
        0b0000 => return invalid_format_error("flac: reserved block size"),
        0b0001 => 192,
        n @ 0b0010..=0b0101 => 576 << (n - 2),
        0b0110 => bs.read_bits(8)? + 1,
        0b0111 => bs.read_bits(16)? + 1,
        n => 256 << (n - 8),
    };

    // End-of-header sample rate forms.
    match sample_rate_bits {
        0b1100 => {
            bs.skip_bits(8)?;
        }
        0b1101 | 0b1110 => {
            bs.skip_bits(16)?;
        }
        0b1111 => return invalid_format_error("flac: invalid sample rate code"),
        _ => (),
    }

    let header_len = bs.pos() / 8;
    let crc = match data.get(header_len) {
        Some(&crc) => crc,
        None => return invalid_format_error("flac: truncated frame header"),
    };

    if crc8(&data[..header_len]) != crc {
        return invalid_format_error("flac: frame header crc mismatch");
    }

    Ok(FrameHeader { block_size, position, variable_block_size, header_len: header_len + 1 })
}

/// Read the UTF-8-style coded frame/sample number (up to 36 bits over 7 bytes).
fn read_utf8_coded(bs: &mut BitReader<'_>) -> Result<u64> {
    let first = bs.read_bits(8)? as u8;

    let extra_bytes = match first.leading_ones() {
        0 => return Ok(u64::from(first)),
        1 => return invalid_format_error("flac: invalid coded number"),
        n if n <= 7 => n - 1,
        _ => return invalid_format_error("flac: invalid coded number"),
    };

    let mask = 0xffu8 >> (extra_bytes + 2);
    let mut value = u64::from(first & mask);

    for _ in 0..extra_bytes {
        let byte = bs.read_bits(8)?;
        if byte & 0xc0 != 0x80 {
            return invalid_format_error("flac: invalid coded number continuation");
        }
        value = (value << 6) | u64::from(byte & 0x3f);
    }

    Ok(value)
}

/// CRC-8 with polynomial 0x07, as used by FLAC frame headers.
fn crc8(data: &[u8]) -> u8 {
    let mut crc = 0u8;
    for &byte in data {
        crc ^= byte;
        for _ in 0..8 {
            crc = if crc & 0x80 != 0 { (crc << 1) ^ 0x07 } else { crc << 1 };
        }
    }
    crc
}

/// Build a valid frame header for tests and synthetic streams.
#[cfg(test)]
pub fn build_frame_header(frame_number: u64, block_size_bits: u32) -> Vec<u8> {
    assert!(frame_number < 0x80, "only single-byte coded numbers are supported here");

    let mut out = vec![
        0xff,
        0xf8,
        ((block_size_bits as u8) << 4) | 0b1001, // 44.1 kHz code
        0b0001_0100,                             // stereo, 16-bit, reserved 0
        frame_number as u8,
    ];
    out.push(crc8(&out));
    out
}

#[cfg(test)]
mod tests {
    use super::{build_frame_header, parse_frame_header};

    #[test]
    fn verify_frame_header_parse() {
        // Block size code 0b1100 = 4096 samples.
        let header = build_frame_header(3, 0b1100);
        let parsed = parse_frame_header(&header).unwrap();

        assert_eq!(parsed.block_size, 4096);
        assert_eq!(parsed.position, 3);
        assert!(!parsed.variable_block_size);
        assert_eq!(parsed.header_len, header.len());
        assert_eq!(parsed.start_sample(4096), 3 * 4096);
    }

    #[test]
    fn verify_crc_rejects_corruption() {
        let mut header = build_frame_header(0, 0b1100);
        header[2] ^= 0x10;
        assert!(parse_frame_header(&header).is_err());
    }
}
