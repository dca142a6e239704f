// Remux
// Copyright (c) 2026 The Project Remux Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Vorbis identification- and setup-header inspection.
//!
//! The setup header is scanned in reverse (bytes reversed and each byte bit-reversed) to locate
//! the framing bit and the mode-header block without decoding codebooks. The per-mode block
//! flags, combined with the two block sizes from the identification header, drive per-packet
//! sample-duration computation.

use remux_core::errors::{invalid_format_error, Result};
use remux_core::io::{BitReader, SliceReader};

pub const VORBIS_HEADER_TYPE_IDENT: u8 = 1;
pub const VORBIS_HEADER_TYPE_COMMENT: u8 = 3;
pub const VORBIS_HEADER_TYPE_SETUP: u8 = 5;

const VORBIS_MAGIC: &[u8; 6] = b"vorbis";

/// The Vorbis identification header.
#[derive(Clone, Debug)]
pub struct VorbisIdentHeader {
    pub channels: u8,
    pub sample_rate: u32,
    pub blocksize_0: u32,
    pub blocksize_1: u32,
}

impl VorbisIdentHeader {
    /// Parse an identification header packet (`\x01vorbis...`).
    pub fn parse(data: &[u8]) -> Result<VorbisIdentHeader> {
        let mut reader = SliceReader::from_vec(data.to_vec());

        if reader.len() < 30 {
            return invalid_format_error("vorbis: truncated identification header");
        }
        if reader.read_u8()? != VORBIS_HEADER_TYPE_IDENT {
            return invalid_format_error("vorbis: not an identification header");
        }
        if reader.read_bytes(6)? != VORBIS_MAGIC {
            return invalid_format_error("vorbis: missing header magic");
        }

        let version = reader.read_u32_le()?;
        if version != 0 {
            return invalid_format_error("vorbis: unsupported version");
        }

        let channels = reader.read_u8()?;
        let sample_rate = reader.read_u32_le()?;

        // Bitrate maximum, nominal, and minimum.
        reader.skip(12)?;

        let blocksizes = reader.read_u8()?;
        let blocksize_0 = 1u32 << (blocksizes & 0x0f);
        let blocksize_1 = 1u32 << (blocksizes >> 4);

        if blocksize_0 > blocksize_1 {
            return invalid_format_error("vorbis: blocksize 0 exceeds blocksize 1");
        }

        Ok(VorbisIdentHeader { channels, sample_rate, blocksize_0, blocksize_1 })
    }
}

/// Returns true if the packet is a Vorbis header packet of the given type.
pub fn is_header_packet(data: &[u8], header_type: u8) -> bool {
    data.len() >= 7 && data[0] == header_type && &data[1..7] == VORBIS_MAGIC
}

/// The mode table recovered from a setup header.
#[derive(Clone, Debug)]
pub struct VorbisModeInfo {
    /// Per-mode block flag: false selects `blocksize_0`, true selects `blocksize_1`.
    pub mode_block_flags: Vec<bool>,
    /// The number of bits encoding a mode number in an audio packet.
    pub mode_bits: u32,
    pub blocksize_0: u32,
    pub blocksize_1: u32,
}

impl VorbisModeInfo {
    /// Recover the mode table from the setup header by reverse scanning.
    pub fn parse(setup: &[u8], ident: &VorbisIdentHeader) -> Result<VorbisModeInfo> {
        if !is_header_packet(setup, VORBIS_HEADER_TYPE_SETUP) {
            return invalid_format_error("vorbis: not a setup header");
        }

        // Vorbis packs bits least-significant first. Reversing the byte order and bit order of
        // the whole packet lets the trailer (framing bit and mode headers) be read with an
        // ordinary most-significant-first reader.
        let reversed: Vec<u8> = setup.iter().rev().map(|b| b.reverse_bits()).collect();
        let mut bs = BitReader::new(&reversed);

        // Locate the framing bit.
        let mut got_framing_bit = false;
        while bs.bits_left() > 97 {
            if bs.read_bit()? {
                got_framing_bit = true;
                break;
            }
        }
        if !got_framing_bit {
            return invalid_format_error("vorbis: missing framing bit in setup header");
        }

        // Walk backwards through candidate mode headers. Each mode is mapping(8), transform(16),
        // window(16), blockflag(1) when read in reverse. A candidate count is confirmed when the
        // preceding 6-bit field encodes exactly that count.
        let mut reversed_flags: Vec<bool> = Vec::new();
        let mut mode_count = 0u32;
        let mut last_mode_count = None;

        while bs.bits_left() >= 97 {
            let mapping = bs.read_bits(8)?;
            let transform = bs.read_bits(16)?;
            let window = bs.read_bits(16)?;
            if mapping > 63 || transform != 0 || window != 0 {
                break;
            }

            reversed_flags.push(bs.read_bit()?);
            mode_count += 1;
            if mode_count > 64 {
                break;
            }

            let mut peek = bs.clone();
            if peek.read_bits(6)? + 1 == mode_count {
                last_mode_count = Some(mode_count);
            }
        }

        let mode_count = match last_mode_count {
            Some(count) => count as usize,
            None => return invalid_format_error("vorbis: no mode header found in setup header"),
        };

        // The scan visited modes last-to-first.
        let mode_block_flags: Vec<bool> =
            reversed_flags[..mode_count].iter().rev().copied().collect();

        let mode_bits = ilog(mode_count as u32 - 1);

        Ok(VorbisModeInfo {
            mode_block_flags,
            mode_bits,
            blocksize_0: ident.blocksize_0,
            blocksize_1: ident.blocksize_1,
        })
    }

    /// The block size of an audio packet, from its mode number.
    pub fn packet_block_size(&self, packet: &[u8]) -> Result<u32> {
        let first = match packet.first() {
            Some(&b) => b,
            None => return invalid_format_error("vorbis: empty packet"),
        };

        // Bit 0, read least-significant first, is the packet type flag.
        if first & 0x01 != 0 {
            return invalid_format_error("vorbis: not an audio packet");
        }

        let mut mode = 0u32;
        for i in 0..self.mode_bits {
            let bit_idx = (1 + i) as usize;
            let byte = match packet.get(bit_idx / 8) {
                Some(&b) => b,
                None => return invalid_format_error("vorbis: truncated audio packet"),
            };
            mode |= u32::from((byte >> (bit_idx % 8)) & 1) << i;
        }

        match self.mode_block_flags.get(mode as usize) {
            Some(true) => Ok(self.blocksize_1),
            Some(false) => Ok(self.blocksize_0),
            None => invalid_format_error("vorbis: mode number out of range"),
        }
    }

    /// The number of samples an audio packet contributes: half the overlap-added window, which
    /// is `(previous_block_size + current_block_size) / 4`. The first audio packet produces no
    /// output; pass `None` as the previous block size for it.
    pub fn packet_sample_count(&self, prev_block_size: Option<u32>, block_size: u32) -> u32 {
        match prev_block_size {
            Some(prev) => (prev + block_size) / 4,
            None => 0,
        }
    }
}

fn ilog(mut value: u32) -> u32 {
    let mut bits = 0;
    while value > 0 {
        bits += 1;
        value >>= 1;
    }
    bits
}

#[cfg(test)]
mod tests {
    use super::{ilog, VorbisIdentHeader, VorbisModeInfo};

    fn ident_header(channels: u8, sample_rate: u32, blocksizes: u8) -> Vec<u8> {
        let mut data = vec![1u8];
        data.extend_from_slice(b"vorbis");
        data.extend_from_slice(&0u32.to_le_bytes());
        data.push(channels);
        data.extend_from_slice(&sample_rate.to_le_bytes());
        data.extend_from_slice(&[0u8; 12]);
        data.push(blocksizes);
        data.push(0x01);
        data
    }

    /// Assemble a setup header whose trailer contains `flags.len()` modes with the given block
    /// flags. Bits are packed least-significant first, as Vorbis does.
    fn setup_header(flags: &[bool]) -> Vec<u8> {
        struct LsbWriter {
            bytes: Vec<u8>,
            bit: u32,
        }

        impl LsbWriter {
            fn push_bits(&mut self, value: u32, count: u32) {
                for i in 0..count {
                    let bit = (value >> i) & 1;
                    if self.bit == 0 {
                        self.bytes.push(0);
                    }
                    let last = self.bytes.last_mut().unwrap();
                    *last |= (bit as u8) << self.bit;
                    self.bit = (self.bit + 1) % 8;
                }
            }
        }

        let mut w = LsbWriter { bytes: vec![], bit: 0 };

        // Padding standing in for the codebook part of a real setup header.
        for _ in 0..32 {
            w.push_bits(0, 8);
        }

        w.push_bits(flags.len() as u32 - 1, 6);
        for &flag in flags {
            w.push_bits(u32::from(flag), 1);
            w.push_bits(0, 16); // windowtype
            w.push_bits(0, 16); // transformtype
            w.push_bits(0, 8); // mapping
        }
        w.push_bits(1, 1); // framing bit
        // Pad the final byte.
        while w.bit != 0 {
            w.push_bits(0, 1);
        }

        let mut data = vec![5u8];
        data.extend_from_slice(b"vorbis");
        data.extend_from_slice(&w.bytes);
        data
    }

    #[test]
    fn verify_ident_header() {
        let header = VorbisIdentHeader::parse(&ident_header(2, 44_100, 0xb8)).unwrap();
        assert_eq!(header.channels, 2);
        assert_eq!(header.sample_rate, 44_100);
        assert_eq!(header.blocksize_0, 256);
        assert_eq!(header.blocksize_1, 2048);
    }

    #[test]
    fn verify_mode_scan_and_packet_duration() {
        let ident = VorbisIdentHeader::parse(&ident_header(2, 44_100, 0xb8)).unwrap();
        let setup = setup_header(&[false, true]);

        let modes = VorbisModeInfo::parse(&setup, &ident).unwrap();
        assert_eq!(modes.mode_block_flags, vec![false, true]);
        assert_eq!(modes.mode_bits, 1);

        // Audio packet selecting mode 0 (short block): type bit 0, mode bit 0.
        assert_eq!(modes.packet_block_size(&[0b0000_0000, 0]).unwrap(), 256);
        // Mode 1 (long block): bit 1 set.
        assert_eq!(modes.packet_block_size(&[0b0000_0010, 0]).unwrap(), 2048);

        assert_eq!(modes.packet_sample_count(None, 256), 0);
        assert_eq!(modes.packet_sample_count(Some(256), 2048), 576);
        assert_eq!(modes.packet_sample_count(Some(2048), 2048), 1024);
    }

    #[test]
    fn verify_ilog() {
        assert_eq!(ilog(0), 0);
        assert_eq!(ilog(1), 1);
        assert_eq!(ilog(2), 2);
        assert_eq!(ilog(3), 2);
        assert_eq!(ilog(7), 3);
    }
}
