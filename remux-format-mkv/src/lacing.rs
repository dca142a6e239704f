// Remux
// Copyright (c) 2026 The Project Remux Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Block parsing and lacing expansion.

use remux_core::errors::{invalid_format_error, Result};
use remux_core::io::SliceReader;

use crate::ebml::{read_signed_vint, read_vint};

enum Lacing {
    None,
    Xiph,
    FixedSize,
    Ebml,
}

fn parse_lacing_flags(flags: u8) -> Lacing {
    match (flags >> 1) & 0b11 {
        0b00 => Lacing::None,
        0b01 => Lacing::Xiph,
        0b10 => Lacing::FixedSize,
        _ => Lacing::Ebml,
    }
}

/// One frame extracted from a block. Laced frames inherit the block's key flag and reference
/// list; their timestamps and durations are distributed by the caller.
pub struct BlockFrame {
    pub track: u64,
    /// Timestamp relative to the cluster, in ticks.
    pub rel_ts: i16,
    /// Frame index within the block's lace.
    pub lace_index: u32,
    /// Total frames in the block's lace.
    pub lace_count: u32,
    pub key: bool,
    pub data: Box<[u8]>,
}

/// Parse a `SimpleBlock` or `Block` payload and expand its lacing.
///
/// `is_simple` selects the `SimpleBlock` interpretation of the flags byte, where bit 7 is the
/// key-frame flag; plain `Block`s signal key frames by the absence of reference blocks, which the
/// caller resolves.
pub fn parse_block(payload: &[u8], is_simple: bool) -> Result<Vec<BlockFrame>> {
    let mut reader = SliceReader::from_vec(payload.to_vec());

    let (track, _) = read_vint(&mut reader)?;
    let rel_ts = reader.read_i16()?;
    let flags = reader.read_u8()?;

    let key = is_simple && flags & 0x80 != 0;

    let mut frames = Vec::new();

    match parse_lacing_flags(flags) {
        Lacing::None => {
            let data = Box::from(reader.read_remaining());
            frames.push(BlockFrame { track, rel_ts, lace_index: 0, lace_count: 1, key, data });
        }
        lacing @ (Lacing::Xiph | Lacing::Ebml) => {
            // The stored count excludes the final frame, whose size is deduced from the block.
            let stored = reader.read_u8()? as usize;
            let sizes = match lacing {
                Lacing::Xiph => read_xiph_sizes(&mut reader, stored)?,
                _ => read_ebml_sizes(&mut reader, stored)?,
            };

            let lace_count = (stored + 1) as u32;
            for (idx, size) in sizes.iter().enumerate() {
                let data = Box::from(reader.read_bytes(*size as usize)?);
                frames.push(BlockFrame {
                    track,
                    rel_ts,
                    lace_index: idx as u32,
                    lace_count,
                    key,
                    data,
                });
            }

            let data = Box::from(reader.read_remaining());
            frames.push(BlockFrame {
                track,
                rel_ts,
                lace_index: lace_count - 1,
                lace_count,
                key,
                data,
            });
        }
        Lacing::FixedSize => {
            let lace_count = reader.read_u8()? as u32 + 1;
            let total = reader.bytes_remaining();
            if total % lace_count as usize != 0 {
                return invalid_format_error("mkv: fixed lacing does not divide block evenly");
            }

            let frame_size = total / lace_count as usize;
            for idx in 0..lace_count {
                let data = Box::from(reader.read_bytes(frame_size)?);
                frames.push(BlockFrame { track, rel_ts, lace_index: idx, lace_count, key, data });
            }
        }
    }

    Ok(frames)
}

/// Xiph lace sizes: 255-accumulating counts with a sub-255 terminator per frame.
fn read_xiph_sizes(reader: &mut SliceReader, count: usize) -> Result<Vec<u64>> {
    let mut sizes = Vec::with_capacity(count);
    let mut accumulated = 0u64;

    while sizes.len() < count {
        let byte = reader.read_u8()? as u64;
        accumulated += byte;
        if byte < 255 {
            sizes.push(accumulated);
            accumulated = 0;
        }
    }

    Ok(sizes)
}

/// EBML lace sizes: the first is an absolute vint, the rest signed deltas.
fn read_ebml_sizes(reader: &mut SliceReader, count: usize) -> Result<Vec<u64>> {
    let mut sizes: Vec<u64> = Vec::with_capacity(count);

    for _ in 0..count {
        match sizes.last().copied() {
            Some(last) => {
                let delta = read_signed_vint(reader)?;
                let size = last
                    .checked_add_signed(delta)
                    .ok_or(remux_core::errors::Error::InvalidFormat("mkv: invalid lace delta"))?;
                sizes.push(size);
            }
            None => {
                let (size, _) = read_vint(reader)?;
                sizes.push(size);
            }
        }
    }

    Ok(sizes)
}

#[cfg(test)]
mod tests {
    use super::parse_block;

    fn simple_block_header(track: u8, rel_ts: i16, flags: u8) -> Vec<u8> {
        let mut out = vec![0x80 | track];
        out.extend_from_slice(&rel_ts.to_be_bytes());
        out.push(flags);
        out
    }

    #[test]
    fn verify_unlaced_block() {
        let mut block = simple_block_header(1, -5, 0x80);
        block.extend_from_slice(&[9, 9, 9]);

        let frames = parse_block(&block, true).unwrap();
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].track, 1);
        assert_eq!(frames[0].rel_ts, -5);
        assert!(frames[0].key);
        assert_eq!(&*frames[0].data, &[9, 9, 9]);
    }

    #[test]
    fn verify_xiph_lacing_sizes_sum() {
        // Three frames of 300, 255, and 10 bytes under Xiph lacing.
        let mut block = simple_block_header(2, 0, 0x02);
        block.push(2); // stored sizes
        block.extend_from_slice(&[255, 45]); // 300
        block.extend_from_slice(&[255, 0]); // 255
        let payload_start = block.len();
        block.extend_from_slice(&vec![1u8; 300]);
        block.extend_from_slice(&vec![2u8; 255]);
        block.extend_from_slice(&vec![3u8; 10]);

        let frames = parse_block(&block, true).unwrap();
        assert_eq!(frames.len(), 3);

        // The lacing-header bytes are not part of any frame: the expanded sizes must sum to the
        // block payload minus the lacing header.
        let total: usize = frames.iter().map(|f| f.data.len()).sum();
        assert_eq!(total, block.len() - payload_start);
        assert_eq!(frames[0].data.len(), 300);
        assert_eq!(frames[1].data.len(), 255);
        assert_eq!(frames[2].data.len(), 10);
    }

    #[test]
    fn verify_fixed_lacing() {
        let mut block = simple_block_header(1, 0, 0x04);
        block.push(3); // four frames
        block.extend_from_slice(&[7u8; 32]);

        let frames = parse_block(&block, true).unwrap();
        assert_eq!(frames.len(), 4);
        assert!(frames.iter().all(|f| f.data.len() == 8));
    }

    #[test]
    fn verify_ebml_lacing() {
        // Frames of 100, 90, 95 bytes: absolute 100, delta -10, last deduced.
        let mut block = simple_block_header(1, 0, 0x06);
        block.push(2);
        block.push(0x80 | 100); // vint 100
        // Signed vint -10: value = -10 + 63 = 53 in one byte.
        block.push(0x80 | 53);
        block.extend_from_slice(&vec![1u8; 100]);
        block.extend_from_slice(&vec![2u8; 90]);
        block.extend_from_slice(&vec![3u8; 95]);

        let frames = parse_block(&block, true).unwrap();
        assert_eq!(frames.len(), 3);
        assert_eq!(frames[0].data.len(), 100);
        assert_eq!(frames[1].data.len(), 90);
        assert_eq!(frames[2].data.len(), 95);
    }
}
