// Remux
// Copyright (c) 2026 The Project Remux Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! VP8 and VP9 uncompressed-header inspection.

use remux_core::errors::{invalid_format_error, Result};
use remux_core::io::BitReader;

const VP9_SYNC_CODE: u32 = 0x49_83_42;

/// The VP9 colour spaces signalled in the uncompressed header.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Vp9ColorSpace {
    Unknown,
    Bt601,
    Bt709,
    Smpte170,
    Smpte240,
    Bt2020,
    Reserved,
    Rgb,
}

impl Vp9ColorSpace {
    fn from_code(code: u32) -> Vp9ColorSpace {
        match code {
            0 => Vp9ColorSpace::Unknown,
            1 => Vp9ColorSpace::Bt601,
            2 => Vp9ColorSpace::Bt709,
            3 => Vp9ColorSpace::Smpte170,
            4 => Vp9ColorSpace::Smpte240,
            5 => Vp9ColorSpace::Bt2020,
            6 => Vp9ColorSpace::Reserved,
            _ => Vp9ColorSpace::Rgb,
        }
    }
}

/// Fields read from the uncompressed header of a VP9 key frame.
#[derive(Clone, Debug)]
pub struct Vp9FrameInfo {
    pub profile: u8,
    pub bit_depth: u8,
    pub color_space: Vp9ColorSpace,
    pub subsampling_x: bool,
    pub subsampling_y: bool,
    pub width: u32,
    pub height: u32,
}

impl Vp9FrameInfo {
    /// Parse the uncompressed header of a key frame packet.
    pub fn parse(data: &[u8]) -> Result<Vp9FrameInfo> {
        let mut bs = BitReader::new(data);

        let frame_marker = bs.read_bits(2)?;
        if frame_marker != 0b10 {
            return invalid_format_error("vp9: invalid frame marker");
        }

        let profile_low = bs.read_bits(1)?;
        let profile_high = bs.read_bits(1)?;
        let profile = ((profile_high << 1) | profile_low) as u8;
        if profile == 3 {
            // reserved_zero
            bs.skip_bits(1)?;
        }

        let show_existing_frame = bs.read_bit()?;
        if show_existing_frame {
            return invalid_format_error("vp9: cannot extract parameters from a repeated frame");
        }

        let frame_type = bs.read_bits(1)?;
        if frame_type != 0 {
            return invalid_format_error("vp9: expected a key frame");
        }

        // show_frame, error_resilient_mode
        bs.skip_bits(2)?;

        let sync_code = bs.read_bits(24)?;
        if sync_code != VP9_SYNC_CODE {
            return invalid_format_error("vp9: invalid sync code");
        }

        let bit_depth = if profile >= 2 {
            if bs.read_bit()? {
                12
            }
            else {
                10
            }
        }
        else {
            8
        };

        let color_space = Vp9ColorSpace::from_code(bs.read_bits(3)?);

        let (subsampling_x, subsampling_y) = if color_space != Vp9ColorSpace::Rgb {
            // color_range
            bs.skip_bits(1)?;
            if profile == 1 || profile == 3 {
                let sx = bs.read_bit()?;
                let sy = bs.read_bit()?;
                // reserved_zero
                bs.skip_bits(1)?;
                (sx, sy)
            }
            else {
                (true, true)
            }
        }
        else {
            if profile == 1 || profile == 3 {
                // reserved_zero
                bs.skip_bits(1)?;
            }
            (false, false)
        };

        let width = bs.read_bits(16)? + 1;
        let height = bs.read_bits(16)? + 1;

        Ok(Vp9FrameInfo {
            profile,
            bit_depth,
            color_space,
            subsampling_x,
            subsampling_y,
            width,
            height,
        })
    }

    /// Map the picture size to a VP9 level, returned as the two-digit level number (10 for level
    /// 1, 41 for level 4.1, and so on).
    pub fn level(&self) -> u8 {
        // Maximum luma picture size per level, from the VP9 levels table.
        const LEVELS: [(u32, u8); 9] = [
            (36_864, 10),
            (73_728, 11),
            (122_880, 20),
            (245_760, 21),
            (552_960, 30),
            (983_040, 31),
            (2_228_224, 40),
            (8_912_896, 50),
            (35_651_584, 60),
        ];

        let picture_size = self.width.saturating_mul(self.height);
        for (max_size, level) in LEVELS {
            if picture_size <= max_size {
                return level;
            }
        }
        62
    }

    /// The canonical codec parameter string, e.g. `vp09.00.31.08`.
    pub fn codec_parameter_string(&self) -> String {
        format!("vp09.{:02}.{:02}.{:02}", self.profile, self.level(), self.bit_depth)
    }
}

/// Returns true if a VP9 packet is a key frame.
pub fn vp9_is_key_frame(data: &[u8]) -> bool {
    let mut bs = BitReader::new(data);

    let mut parse = || -> Result<bool> {
        let frame_marker = bs.read_bits(2)?;
        if frame_marker != 0b10 {
            return Ok(false);
        }

        let profile_low = bs.read_bits(1)?;
        let profile_high = bs.read_bits(1)?;
        if (profile_high << 1) | profile_low == 3 {
            bs.skip_bits(1)?;
        }

        if bs.read_bit()? {
            // show_existing_frame repeats an already decoded frame.
            return Ok(false);
        }

        Ok(bs.read_bits(1)? == 0)
    };

    parse().unwrap_or(false)
}

/// Returns true if a VP8 packet is a key frame: the inverse of the `frame_type` bit in the first
/// byte of the frame tag.
pub fn vp8_is_key_frame(data: &[u8]) -> bool {
    data.first().map_or(false, |&b| b & 0x01 == 0)
}

#[cfg(test)]
mod tests {
    use super::{vp8_is_key_frame, vp9_is_key_frame, Vp9ColorSpace, Vp9FrameInfo};

    /// Assemble a minimal VP9 profile-0 key frame header for the given size.
    fn vp9_key_header(width: u32, height: u32) -> Vec<u8> {
        let mut bits: Vec<bool> = Vec::new();
        let mut push_bits = |value: u32, count: u32| {
            for i in (0..count).rev() {
                bits.push((value >> i) & 1 == 1);
            }
        };

        push_bits(0b10, 2); // frame_marker
        push_bits(0, 1); // profile low
        push_bits(0, 1); // profile high
        push_bits(0, 1); // show_existing_frame
        push_bits(0, 1); // frame_type = key
        push_bits(1, 1); // show_frame
        push_bits(0, 1); // error_resilient
        push_bits(0x49, 8);
        push_bits(0x83, 8);
        push_bits(0x42, 8);
        push_bits(2, 3); // color_space = bt709
        push_bits(0, 1); // color_range
        push_bits(width - 1, 16);
        push_bits(height - 1, 16);

        let mut bytes = vec![0u8; (bits.len() + 7) / 8];
        for (i, bit) in bits.iter().enumerate() {
            if *bit {
                bytes[i / 8] |= 1 << (7 - (i % 8));
            }
        }
        bytes
    }

    #[test]
    fn verify_vp9_header_parse() {
        let header = vp9_key_header(1920, 1080);
        let info = Vp9FrameInfo::parse(&header).unwrap();

        assert_eq!(info.profile, 0);
        assert_eq!(info.bit_depth, 8);
        assert_eq!(info.color_space, Vp9ColorSpace::Bt709);
        assert!(info.subsampling_x && info.subsampling_y);
        assert_eq!((info.width, info.height), (1920, 1080));
        assert_eq!(info.level(), 40);
        assert_eq!(info.codec_parameter_string(), "vp09.00.40.08");

        assert!(vp9_is_key_frame(&header));
    }

    #[test]
    fn verify_vp9_level_mapping() {
        let small = Vp9FrameInfo::parse(&vp9_key_header(192, 192)).unwrap();
        assert_eq!(small.level(), 10);

        let hd = Vp9FrameInfo::parse(&vp9_key_header(1280, 720)).unwrap();
        assert_eq!(hd.level(), 31);
    }

    #[test]
    fn verify_vp8_key_frame_bit() {
        assert!(vp8_is_key_frame(&[0x50, 0x01, 0x00]));
        assert!(!vp8_is_key_frame(&[0x51, 0x01, 0x00]));
    }
}
