// Remux
// Copyright (c) 2026 The Project Remux Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! AV1 OBU iteration and sequence-header inspection.

use remux_core::errors::{invalid_format_error, Result};
use remux_core::io::BitReader;

pub const OBU_SEQUENCE_HEADER: u8 = 1;
pub const OBU_TEMPORAL_DELIMITER: u8 = 2;
pub const OBU_FRAME_HEADER: u8 = 3;
pub const OBU_FRAME: u8 = 6;

/// A single OBU: its type and payload bytes.
pub struct Obu<'a> {
    pub obu_type: u8,
    pub payload: &'a [u8],
}

/// Iterate the OBUs in a low-overhead bitstream packet (every OBU carries a size field, as
/// required inside containers).
pub fn iter_obus(data: &[u8]) -> ObuIter<'_> {
    ObuIter { data, pos: 0 }
}

pub struct ObuIter<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Iterator for ObuIter<'a> {
    type Item = Obu<'a>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.pos >= self.data.len() {
            return None;
        }

        let header = self.data[self.pos];
        // forbidden bit
        if header & 0x80 != 0 {
            return None;
        }

        let obu_type = (header >> 3) & 0x0f;
        let has_extension = header & 0x04 != 0;
        let has_size = header & 0x02 != 0;

        let mut pos = self.pos + 1;
        if has_extension {
            pos += 1;
        }

        let size = if has_size {
            let mut bs = BitReader::new(self.data.get(pos..)?);
            let size = bs.read_leb128().ok()?;
            pos += bs.pos() / 8;
            size as usize
        }
        else {
            // Without a size field, the OBU extends to the end of the packet.
            self.data.len() - pos
        };

        let payload = self.data.get(pos..pos + size)?;
        self.pos = pos + size;

        Some(Obu { obu_type, payload })
    }
}

/// Fields read from an AV1 sequence header OBU.
#[derive(Clone, Debug)]
pub struct Av1SequenceInfo {
    pub profile: u8,
    pub level: u8,
    pub tier: bool,
    pub reduced_still_picture_header: bool,
    pub bit_depth: u8,
    pub monochrome: bool,
    pub subsampling_x: bool,
    pub subsampling_y: bool,
    pub chroma_sample_position: u8,
    pub max_width: u32,
    pub max_height: u32,
}

impl Av1SequenceInfo {
    /// Locate and parse the sequence header OBU within a packet.
    pub fn find_in_packet(data: &[u8]) -> Result<Option<Av1SequenceInfo>> {
        for obu in iter_obus(data) {
            if obu.obu_type == OBU_SEQUENCE_HEADER {
                return Av1SequenceInfo::parse(obu.payload).map(Some);
            }
        }
        Ok(None)
    }

    /// Parse a sequence header OBU payload.
    pub fn parse(payload: &[u8]) -> Result<Av1SequenceInfo> {
        let mut bs = BitReader::new(payload);

        let profile = bs.read_bits(3)? as u8;
        // still_picture
        bs.skip_bits(1)?;
        let reduced_still_picture_header = bs.read_bit()?;

        let mut level = 0;
        let mut tier = false;
        let mut decoder_model_info_present = false;
        let mut buffer_delay_length = 0;

        if reduced_still_picture_header {
            level = bs.read_bits(5)? as u8;
        }
        else {
            // timing_info_present_flag
            let timing_info_present = bs.read_bit()?;
            let mut equal_picture_interval = false;
            if timing_info_present {
                // num_units_in_display_tick, time_scale
                bs.skip_bits(64)?;
                equal_picture_interval = bs.read_bit()?;
                if equal_picture_interval {
                    read_uvlc(&mut bs)?;
                }

                decoder_model_info_present = bs.read_bit()?;
                if decoder_model_info_present {
                    buffer_delay_length = bs.read_bits(5)? + 1;
                    // num_units_in_decoding_tick, buffer_removal_time_length,
                    // frame_presentation_time_length
                    bs.skip_bits(32 + 5 + 5)?;
                }
            }

            let initial_display_delay_present = bs.read_bit()?;
            let operating_points_cnt = bs.read_bits(5)? + 1;

            for i in 0..operating_points_cnt {
                // operating_point_idc
                bs.skip_bits(12)?;
                let seq_level_idx = bs.read_bits(5)? as u8;
                let seq_tier = if seq_level_idx > 7 { bs.read_bit()? } else { false };

                if i == 0 {
                    level = seq_level_idx;
                    tier = seq_tier;
                }

                if decoder_model_info_present {
                    // decoder_model_present_for_this_op
                    if bs.read_bit()? {
                        // decoder_buffer_delay, encoder_buffer_delay, low_delay_mode_flag
                        bs.skip_bits(2 * buffer_delay_length + 1)?;
                    }
                }

                if initial_display_delay_present {
                    // initial_display_delay_present_for_this_op
                    if bs.read_bit()? {
                        bs.skip_bits(4)?;
                    }
                }
            }
        }

        let frame_width_bits = bs.read_bits(4)? + 1;
        let frame_height_bits = bs.read_bits(4)? + 1;
        let max_width = bs.read_bits(frame_width_bits)? + 1;
        let max_height = bs.read_bits(frame_height_bits)? + 1;

        if !reduced_still_picture_header {
            // frame_id_numbers_present_flag
            if bs.read_bit()? {
                // delta_frame_id_length_minus_2, additional_frame_id_length_minus_1
                bs.skip_bits(4 + 3)?;
            }
        }

        // use_128x128_superblock, enable_filter_intra, enable_intra_edge_filter
        bs.skip_bits(3)?;

        if !reduced_still_picture_header {
            // enable_interintra_compound, enable_masked_compound, enable_warped_motion,
            // enable_dual_filter, enable_order_hint
            bs.skip_bits(4)?;
            let enable_order_hint = bs.read_bit()?;
            if enable_order_hint {
                // enable_jnt_comp, enable_ref_frame_mvs
                bs.skip_bits(2)?;
            }

            // seq_choose_screen_content_tools
            let seq_force_screen_content_tools =
                if bs.read_bit()? { 2 } else { bs.read_bits(1)? };

            if seq_force_screen_content_tools > 0 {
                // seq_choose_integer_mv
                if !bs.read_bit()? {
                    // seq_force_integer_mv
                    bs.skip_bits(1)?;
                }
            }

            if enable_order_hint {
                // order_hint_bits_minus_1
                bs.skip_bits(3)?;
            }
        }

        // enable_superres, enable_cdef, enable_restoration
        bs.skip_bits(3)?;

        // color_config
        let high_bitdepth = bs.read_bit()?;
        let bit_depth = if profile == 2 && high_bitdepth {
            if bs.read_bit()? {
                12
            }
            else {
                10
            }
        }
        else if high_bitdepth {
            10
        }
        else {
            8
        };

        let monochrome = if profile == 1 { false } else { bs.read_bit()? };

        // color_description_present_flag
        let mut matrix_identity = false;
        if bs.read_bit()? {
            // color_primaries, transfer_characteristics
            bs.skip_bits(16)?;
            let matrix_coefficients = bs.read_bits(8)?;
            matrix_identity = matrix_coefficients == 0;
        }

        let (subsampling_x, subsampling_y, chroma_sample_position);

        if monochrome {
            // color_range
            bs.skip_bits(1)?;
            subsampling_x = true;
            subsampling_y = true;
            chroma_sample_position = 0;
        }
        else if matrix_identity {
            subsampling_x = false;
            subsampling_y = false;
            chroma_sample_position = 0;
        }
        else {
            // color_range
            bs.skip_bits(1)?;

            if profile == 0 {
                subsampling_x = true;
                subsampling_y = true;
            }
            else if profile == 1 {
                subsampling_x = false;
                subsampling_y = false;
            }
            else if bit_depth == 12 {
                subsampling_x = bs.read_bit()?;
                subsampling_y = if subsampling_x { bs.read_bit()? } else { false };
            }
            else {
                subsampling_x = true;
                subsampling_y = false;
            }

            chroma_sample_position = if subsampling_x && subsampling_y {
                bs.read_bits(2)? as u8
            }
            else {
                0
            };
        }

        if profile == 2 && bit_depth != 12 && subsampling_x && subsampling_y {
            return invalid_format_error("av1: invalid chroma subsampling for profile 2");
        }

        Ok(Av1SequenceInfo {
            profile,
            level,
            tier,
            reduced_still_picture_header,
            bit_depth,
            monochrome,
            subsampling_x,
            subsampling_y,
            chroma_sample_position,
            max_width,
            max_height,
        })
    }

    /// The canonical codec parameter string, e.g. `av01.0.04M.08`.
    pub fn codec_parameter_string(&self) -> String {
        format!(
            "av01.{}.{:02}{}.{:02}",
            self.profile,
            self.level,
            if self.tier { 'H' } else { 'M' },
            self.bit_depth
        )
    }
}

fn read_uvlc(bs: &mut BitReader<'_>) -> Result<u32> {
    let mut leading_zeros = 0;
    while !bs.read_bit()? {
        leading_zeros += 1;
        if leading_zeros > 32 {
            return invalid_format_error("av1: invalid uvlc code");
        }
    }

    if leading_zeros == 32 {
        return Ok(u32::MAX);
    }

    let value = bs.read_bits(leading_zeros)?;
    Ok(value + (1 << leading_zeros) - 1)
}

/// Returns true if an AV1 temporal unit begins with a key frame.
///
/// `sequence` supplies the active sequence header when one is known; a packet whose sequence
/// header declares `reduced_still_picture_header` is always a key frame.
pub fn is_key_frame(data: &[u8], sequence: Option<&Av1SequenceInfo>) -> bool {
    let mut reduced = sequence.map_or(false, |s| s.reduced_still_picture_header);

    for obu in iter_obus(data) {
        match obu.obu_type {
            OBU_SEQUENCE_HEADER => {
                if let Ok(info) = Av1SequenceInfo::parse(obu.payload) {
                    reduced = info.reduced_still_picture_header;
                }
            }
            OBU_FRAME | OBU_FRAME_HEADER => {
                if reduced {
                    return true;
                }

                let mut bs = BitReader::new(obu.payload);
                // show_existing_frame
                match bs.read_bit() {
                    Ok(false) => (),
                    _ => return false,
                }
                // frame_type == KEY_FRAME
                return bs.read_bits(2).map_or(false, |ty| ty == 0);
            }
            _ => (),
        }
    }

    // A temporal unit with no frame OBU can still be a key unit when the active sequence header
    // declares reduced still pictures.
    reduced
}

#[cfg(test)]
mod tests {
    use super::{is_key_frame, iter_obus, Av1SequenceInfo, OBU_SEQUENCE_HEADER};

    /// A minimal reduced-still-picture sequence header: profile 0, level 0, 8-bit 4:2:0,
    /// 64x64 maximum frame size.
    fn reduced_sequence_header_payload() -> Vec<u8> {
        let mut bits: Vec<bool> = Vec::new();
        let mut push_bits = |value: u32, count: u32| {
            for i in (0..count).rev() {
                bits.push((value >> i) & 1 == 1);
            }
        };

        push_bits(0, 3); // seq_profile
        push_bits(1, 1); // still_picture
        push_bits(1, 1); // reduced_still_picture_header
        push_bits(0, 5); // seq_level_idx
        push_bits(5, 4); // frame_width_bits_minus_1
        push_bits(5, 4); // frame_height_bits_minus_1
        push_bits(63, 6); // max_frame_width_minus_1
        push_bits(63, 6); // max_frame_height_minus_1
        push_bits(0, 3); // superblock/filter-intra/edge-filter flags
        push_bits(0, 3); // superres/cdef/restoration
        push_bits(0, 1); // high_bitdepth
        push_bits(0, 1); // mono_chrome
        push_bits(0, 1); // color_description_present_flag
        push_bits(0, 1); // color_range
        push_bits(0, 2); // chroma_sample_position

        let mut bytes = vec![0u8; (bits.len() + 7) / 8];
        for (i, bit) in bits.iter().enumerate() {
            if *bit {
                bytes[i / 8] |= 1 << (7 - (i % 8));
            }
        }
        bytes
    }

    fn sequence_header_obu() -> Vec<u8> {
        let payload = reduced_sequence_header_payload();
        let mut obu = vec![(OBU_SEQUENCE_HEADER << 3) | 0x02, payload.len() as u8];
        obu.extend_from_slice(&payload);
        obu
    }

    #[test]
    fn verify_obu_iteration() {
        let obu = sequence_header_obu();
        let obus: Vec<_> = iter_obus(&obu).collect();
        assert_eq!(obus.len(), 1);
        assert_eq!(obus[0].obu_type, OBU_SEQUENCE_HEADER);
    }

    #[test]
    fn verify_sequence_header_parse() {
        let info = Av1SequenceInfo::find_in_packet(&sequence_header_obu()).unwrap().unwrap();

        assert_eq!(info.profile, 0);
        assert_eq!(info.level, 0);
        assert!(info.reduced_still_picture_header);
        assert_eq!(info.bit_depth, 8);
        assert!(info.subsampling_x && info.subsampling_y);
        assert_eq!((info.max_width, info.max_height), (64, 64));
        assert_eq!(info.codec_parameter_string(), "av01.0.00M.08");
    }

    #[test]
    fn verify_reduced_still_picture_is_key() {
        assert!(is_key_frame(&sequence_header_obu(), None));
    }
}
