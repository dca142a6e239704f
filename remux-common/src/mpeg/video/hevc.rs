// Remux
// Copyright (c) 2026 The Project Remux Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! HEVC (H.265) parameter-set extraction and decoder configuration records.

use remux_core::errors::{invalid_format_error, Result};
use remux_core::io::{strip_emulation_prevention, BitReader};

use super::{iter_nal_units, NalFraming};

pub const NAL_TYPE_VPS: u8 = 32;
pub const NAL_TYPE_SPS: u8 = 33;
pub const NAL_TYPE_PPS: u8 = 34;
pub const NAL_TYPE_SEI_PREFIX: u8 = 39;

/// The type of a NAL unit.
#[inline]
pub fn nal_unit_type(nal: &[u8]) -> Option<u8> {
    nal.first().map(|&b| (b >> 1) & 0x3f)
}

/// Returns true if any NAL unit in the packet is an IRAP slice (types 16 through 23).
pub fn is_key_frame(data: &[u8], framing: NalFraming) -> bool {
    iter_nal_units(data, framing)
        .filter_map(nal_unit_type)
        .any(|ty| ty >= 16 && ty <= 23)
}

/// The profile, tier, and level syntax structure of an SPS or VPS.
#[derive(Clone, Debug, Default)]
pub struct ProfileTierLevel {
    pub general_profile_space: u8,
    pub general_tier_flag: bool,
    pub general_profile_idc: u8,
    pub general_profile_compatibility_flags: u32,
    /// The 48 constraint indicator bits, packed into the low bits.
    pub general_constraint_indicator_flags: u64,
    pub general_level_idc: u8,
}

impl ProfileTierLevel {
    fn parse(bs: &mut BitReader<'_>, max_sub_layers_minus1: u32) -> Result<ProfileTierLevel> {
        let general_profile_space = bs.read_bits(2)? as u8;
        let general_tier_flag = bs.read_bit()?;
        let general_profile_idc = bs.read_bits(5)? as u8;
        let general_profile_compatibility_flags = bs.read_bits(32)?;
        let general_constraint_indicator_flags = bs.read_bits_64(48)?;
        let general_level_idc = bs.read_bits(8)? as u8;

        let mut profile_present = [false; 8];
        let mut level_present = [false; 8];

        for i in 0..max_sub_layers_minus1 as usize {
            profile_present[i] = bs.read_bit()?;
            level_present[i] = bs.read_bit()?;
        }

        if max_sub_layers_minus1 > 0 {
            for _ in max_sub_layers_minus1..8 {
                bs.skip_bits(2)?;
            }
        }

        for i in 0..max_sub_layers_minus1 as usize {
            if profile_present[i] {
                bs.skip_bits(88)?;
            }
            if level_present[i] {
                bs.skip_bits(8)?;
            }
        }

        Ok(ProfileTierLevel {
            general_profile_space,
            general_tier_flag,
            general_profile_idc,
            general_profile_compatibility_flags,
            general_constraint_indicator_flags,
            general_level_idc,
        })
    }
}

/// Fields read from an HEVC sequence parameter set.
#[derive(Clone, Debug)]
pub struct SpsSummary {
    pub ptl: ProfileTierLevel,
    pub max_sub_layers_minus1: u8,
    pub temporal_id_nesting: bool,
    pub chroma_format_idc: u8,
    pub pic_width_in_luma_samples: u32,
    pub pic_height_in_luma_samples: u32,
    pub bit_depth_luma_minus8: u8,
    pub bit_depth_chroma_minus8: u8,
    /// From the VUI bitstream restriction, zero when absent.
    pub min_spatial_segmentation_idc: u16,
}

impl SpsSummary {
    /// Parse an SPS NAL unit (two header bytes included).
    pub fn parse(nal: &[u8]) -> Result<SpsSummary> {
        if nal_unit_type(nal) != Some(NAL_TYPE_SPS) {
            return invalid_format_error("hevc: not a sequence parameter set");
        }
        if nal.len() < 3 {
            return invalid_format_error("hevc: truncated sequence parameter set");
        }

        let rbsp = strip_emulation_prevention(&nal[2..]);
        let mut bs = BitReader::new(&rbsp);

        // sps_video_parameter_set_id
        bs.skip_bits(4)?;
        let max_sub_layers_minus1 = bs.read_bits(3)?;
        let temporal_id_nesting = bs.read_bit()?;

        let ptl = ProfileTierLevel::parse(&mut bs, max_sub_layers_minus1)?;

        // sps_seq_parameter_set_id
        bs.read_exp_golomb()?;

        let chroma_format_idc = bs.read_exp_golomb()? as u8;
        if chroma_format_idc == 3 {
            // separate_colour_plane_flag
            bs.read_bit()?;
        }

        let pic_width_in_luma_samples = bs.read_exp_golomb()?;
        let pic_height_in_luma_samples = bs.read_exp_golomb()?;

        // conformance_window_flag
        if bs.read_bit()? {
            for _ in 0..4 {
                bs.read_exp_golomb()?;
            }
        }

        let bit_depth_luma_minus8 = bs.read_exp_golomb()? as u8;
        let bit_depth_chroma_minus8 = bs.read_exp_golomb()? as u8;

        let log2_max_pic_order_cnt_lsb_minus4 = bs.read_exp_golomb()?;

        // sps_sub_layer_ordering_info_present_flag
        let ordering_info_present = bs.read_bit()?;
        let first = if ordering_info_present { 0 } else { max_sub_layers_minus1 };
        for _ in first..=max_sub_layers_minus1 {
            // sps_max_dec_pic_buffering_minus1, sps_max_num_reorder_pics, sps_max_latency_increase
            bs.read_exp_golomb()?;
            bs.read_exp_golomb()?;
            bs.read_exp_golomb()?;
        }

        // Coding block and transform block size bounds.
        for _ in 0..6 {
            bs.read_exp_golomb()?;
        }

        // scaling_list_enabled_flag
        if bs.read_bit()? {
            // sps_scaling_list_data_present_flag
            if bs.read_bit()? {
                skip_scaling_list_data(&mut bs)?;
            }
        }

        // amp_enabled_flag, sample_adaptive_offset_enabled_flag
        bs.skip_bits(2)?;

        // pcm_enabled_flag
        if bs.read_bit()? {
            bs.skip_bits(8)?;
            bs.read_exp_golomb()?;
            bs.read_exp_golomb()?;
            bs.skip_bits(1)?;
        }

        let num_short_term_ref_pic_sets = bs.read_exp_golomb()?;
        if num_short_term_ref_pic_sets > 64 {
            return invalid_format_error("hevc: too many short-term reference picture sets");
        }
        skip_short_term_ref_pic_sets(&mut bs, num_short_term_ref_pic_sets)?;

        // long_term_ref_pics_present_flag
        if bs.read_bit()? {
            let num_long_term = bs.read_exp_golomb()?;
            for _ in 0..num_long_term {
                bs.skip_bits(log2_max_pic_order_cnt_lsb_minus4 + 4)?;
                bs.skip_bits(1)?;
            }
        }

        // sps_temporal_mvp_enabled_flag, strong_intra_smoothing_enabled_flag
        bs.skip_bits(2)?;

        let mut min_spatial_segmentation_idc = 0;

        // vui_parameters_present_flag
        if bs.read_bit()? {
            min_spatial_segmentation_idc = parse_vui(&mut bs, max_sub_layers_minus1)?;
        }

        Ok(SpsSummary {
            ptl,
            max_sub_layers_minus1: max_sub_layers_minus1 as u8,
            temporal_id_nesting,
            chroma_format_idc,
            pic_width_in_luma_samples,
            pic_height_in_luma_samples,
            bit_depth_luma_minus8,
            bit_depth_chroma_minus8,
            min_spatial_segmentation_idc,
        })
    }

    /// The canonical codec parameter string, per ISO/IEC 14496-15 Annex E, e.g.
    /// `hvc1.1.6.L93.B0`.
    pub fn codec_parameter_string(&self) -> String {
        codec_parameter_string(&self.ptl)
    }
}

fn skip_scaling_list_data(bs: &mut BitReader<'_>) -> Result<()> {
    for size_id in 0..4 {
        let matrix_count = if size_id == 3 { 2 } else { 6 };
        for _ in 0..matrix_count {
            // scaling_list_pred_mode_flag
            if !bs.read_bit()? {
                // scaling_list_pred_matrix_id_delta
                bs.read_exp_golomb()?;
            }
            else {
                let coef_num = std::cmp::min(64, 1 << (4 + (size_id << 1)));
                if size_id > 1 {
                    // scaling_list_dc_coef_minus8
                    bs.read_signed_exp_golomb()?;
                }
                for _ in 0..coef_num {
                    // scaling_list_delta_coef
                    bs.read_signed_exp_golomb()?;
                }
            }
        }
    }
    Ok(())
}

fn skip_short_term_ref_pic_sets(bs: &mut BitReader<'_>, count: u32) -> Result<()> {
    // NumDeltaPocs per set is needed to size predicted sets.
    let mut num_delta_pocs = vec![0u32; count as usize];

    for idx in 0..count as usize {
        let inter_prediction = idx != 0 && bs.read_bit()?;

        if inter_prediction {
            // delta_rps_sign, abs_delta_rps_minus1
            bs.skip_bits(1)?;
            bs.read_exp_golomb()?;

            let ref_num_deltas = num_delta_pocs[idx - 1];
            let mut derived = 0;
            for _ in 0..=ref_num_deltas {
                let used_by_curr_pic = bs.read_bit()?;
                let use_delta = if !used_by_curr_pic { bs.read_bit()? } else { true };
                if used_by_curr_pic || use_delta {
                    derived += 1;
                }
            }
            num_delta_pocs[idx] = derived;
        }
        else {
            let num_negative = bs.read_exp_golomb()?;
            let num_positive = bs.read_exp_golomb()?;
            if num_negative > 16 || num_positive > 16 {
                return invalid_format_error("hevc: invalid reference picture set");
            }
            for _ in 0..num_negative + num_positive {
                // delta_poc_minus1, used_by_curr_pic_flag
                bs.read_exp_golomb()?;
                bs.skip_bits(1)?;
            }
            num_delta_pocs[idx] = num_negative + num_positive;
        }
    }

    Ok(())
}

/// Parse VUI parameters, returning `min_spatial_segmentation_idc`.
fn parse_vui(bs: &mut BitReader<'_>, max_sub_layers_minus1: u32) -> Result<u16> {
    // aspect_ratio_info_present_flag
    if bs.read_bit()? {
        let aspect_ratio_idc = bs.read_bits(8)?;
        if aspect_ratio_idc == 255 {
            bs.skip_bits(32)?;
        }
    }

    // overscan_info_present_flag
    if bs.read_bit()? {
        bs.skip_bits(1)?;
    }

    // video_signal_type_present_flag
    if bs.read_bit()? {
        bs.skip_bits(4)?;
        // colour_description_present_flag
        if bs.read_bit()? {
            bs.skip_bits(24)?;
        }
    }

    // chroma_loc_info_present_flag
    if bs.read_bit()? {
        bs.read_exp_golomb()?;
        bs.read_exp_golomb()?;
    }

    // neutral_chroma_indication_flag, field_seq_flag, frame_field_info_present_flag
    bs.skip_bits(3)?;

    // default_display_window_flag
    if bs.read_bit()? {
        for _ in 0..4 {
            bs.read_exp_golomb()?;
        }
    }

    // vui_timing_info_present_flag
    if bs.read_bit()? {
        bs.skip_bits(64)?;
        // vui_poc_proportional_to_timing_flag
        if bs.read_bit()? {
            bs.read_exp_golomb()?;
        }
        // vui_hrd_parameters_present_flag
        if bs.read_bit()? {
            skip_hrd_parameters(bs, max_sub_layers_minus1)?;
        }
    }

    // bitstream_restriction_flag
    if bs.read_bit()? {
        // tiles_fixed_structure, motion_vectors_over_pic_boundaries, restricted_ref_pic_lists
        bs.skip_bits(3)?;
        let min_spatial_segmentation_idc = bs.read_exp_golomb()?;
        return Ok(min_spatial_segmentation_idc.min(0x0fff) as u16);
    }

    Ok(0)
}

fn skip_hrd_parameters(bs: &mut BitReader<'_>, max_sub_layers_minus1: u32) -> Result<()> {
    let nal_hrd = bs.read_bit()?;
    let vcl_hrd = bs.read_bit()?;
    let mut sub_pic_hrd = false;

    if nal_hrd || vcl_hrd {
        sub_pic_hrd = bs.read_bit()?;
        if sub_pic_hrd {
            bs.skip_bits(19)?;
        }
        // bit_rate_scale, cpb_size_scale
        bs.skip_bits(8)?;
        if sub_pic_hrd {
            bs.skip_bits(4)?;
        }
        // initial/au/dpb delay lengths
        bs.skip_bits(15)?;
    }

    for _ in 0..=max_sub_layers_minus1 {
        let fixed_pic_rate_general = bs.read_bit()?;
        let fixed_pic_rate_within_cvs = if fixed_pic_rate_general { true } else { bs.read_bit()? };

        let mut low_delay = false;
        if fixed_pic_rate_within_cvs {
            // elemental_duration_in_tc_minus1
            bs.read_exp_golomb()?;
        }
        else {
            low_delay = bs.read_bit()?;
        }

        let cpb_cnt = if low_delay { 1 } else { bs.read_exp_golomb()? + 1 };

        for _ in 0..(u32::from(nal_hrd) + u32::from(vcl_hrd)) {
            for _ in 0..cpb_cnt {
                // bit_rate_value_minus1, cpb_size_value_minus1
                bs.read_exp_golomb()?;
                bs.read_exp_golomb()?;
                if sub_pic_hrd {
                    bs.read_exp_golomb()?;
                    bs.read_exp_golomb()?;
                }
                // cbr_flag
                bs.skip_bits(1)?;
            }
        }
    }

    Ok(())
}

/// Fields read from an HEVC picture parameter set.
#[derive(Clone, Debug)]
pub struct PpsSummary {
    pub tiles_enabled: bool,
    pub entropy_coding_sync_enabled: bool,
}

impl PpsSummary {
    /// Parse a PPS NAL unit (two header bytes included).
    pub fn parse(nal: &[u8]) -> Result<PpsSummary> {
        if nal_unit_type(nal) != Some(NAL_TYPE_PPS) {
            return invalid_format_error("hevc: not a picture parameter set");
        }
        if nal.len() < 3 {
            return invalid_format_error("hevc: truncated picture parameter set");
        }

        let rbsp = strip_emulation_prevention(&nal[2..]);
        let mut bs = BitReader::new(&rbsp);

        // pps_pic_parameter_set_id, pps_seq_parameter_set_id
        bs.read_exp_golomb()?;
        bs.read_exp_golomb()?;

        // dependent_slice_segments_enabled_flag, output_flag_present_flag
        bs.skip_bits(2)?;
        // num_extra_slice_header_bits
        bs.skip_bits(3)?;
        // sign_data_hiding_enabled_flag, cabac_init_present_flag
        bs.skip_bits(2)?;

        // num_ref_idx_l0/l1_default_active_minus1
        bs.read_exp_golomb()?;
        bs.read_exp_golomb()?;
        // init_qp_minus26
        bs.read_signed_exp_golomb()?;

        // constrained_intra_pred_flag, transform_skip_enabled_flag
        bs.skip_bits(2)?;

        // cu_qp_delta_enabled_flag
        if bs.read_bit()? {
            bs.read_exp_golomb()?;
        }

        // pps_cb_qp_offset, pps_cr_qp_offset
        bs.read_signed_exp_golomb()?;
        bs.read_signed_exp_golomb()?;

        // pps_slice_chroma_qp_offsets_present, weighted_pred, weighted_bipred,
        // transquant_bypass_enabled
        bs.skip_bits(4)?;

        let tiles_enabled = bs.read_bit()?;
        let entropy_coding_sync_enabled = bs.read_bit()?;

        Ok(PpsSummary { tiles_enabled, entropy_coding_sync_enabled })
    }

    /// The `parallelismType` field of the decoder configuration record.
    pub fn parallelism_type(&self) -> u8 {
        match (self.tiles_enabled, self.entropy_coding_sync_enabled) {
            // Mixed parallelism cannot be expressed, the field stays unknown.
            (true, true) => 0,
            (true, false) => 2,
            (false, true) => 3,
            (false, false) => 1,
        }
    }
}

/// One NAL-unit array of an `HEVCDecoderConfigurationRecord`.
#[derive(Clone, Debug)]
pub struct NalUnitArray {
    pub completeness: bool,
    pub nal_unit_type: u8,
    pub nal_units: Vec<Box<[u8]>>,
}

/// An `HEVCDecoderConfigurationRecord`, as defined in ISO/IEC 14496-15 section 8.3.3.1.
#[derive(Clone, Debug)]
pub struct HevcDecoderConfigurationRecord {
    pub ptl: ProfileTierLevel,
    pub min_spatial_segmentation_idc: u16,
    pub parallelism_type: u8,
    pub chroma_format_idc: u8,
    pub bit_depth_luma_minus8: u8,
    pub bit_depth_chroma_minus8: u8,
    pub avg_frame_rate: u16,
    pub constant_frame_rate: u8,
    pub num_temporal_layers: u8,
    pub temporal_id_nested: bool,
    pub length_size_minus_one: u8,
    pub arrays: Vec<NalUnitArray>,
}

impl HevcDecoderConfigurationRecord {
    /// Build a record from the parameter sets found in a packet.
    ///
    /// Returns `None` when the packet carries no SPS.
    pub fn build_from_packet(
        data: &[u8],
        framing: NalFraming,
    ) -> Result<Option<HevcDecoderConfigurationRecord>> {
        let mut vps = Vec::new();
        let mut sps = Vec::new();
        let mut pps = Vec::new();
        let mut sei = Vec::new();

        for nal in iter_nal_units(data, framing) {
            match nal_unit_type(nal) {
                Some(NAL_TYPE_VPS) => vps.push(Box::<[u8]>::from(nal)),
                Some(NAL_TYPE_SPS) => sps.push(Box::<[u8]>::from(nal)),
                Some(NAL_TYPE_PPS) => pps.push(Box::<[u8]>::from(nal)),
                Some(NAL_TYPE_SEI_PREFIX) => sei.push(Box::<[u8]>::from(nal)),
                _ => (),
            }
        }

        let sps_summary = match sps.first() {
            Some(nal) => SpsSummary::parse(nal)?,
            None => return Ok(None),
        };

        let parallelism_type = match pps.first() {
            Some(nal) => PpsSummary::parse(nal)?.parallelism_type(),
            None => 0,
        };

        let mut arrays = Vec::new();
        for (ty, nals) in
            [(NAL_TYPE_VPS, vps), (NAL_TYPE_SPS, sps), (NAL_TYPE_PPS, pps), (NAL_TYPE_SEI_PREFIX, sei)]
        {
            if !nals.is_empty() {
                arrays.push(NalUnitArray { completeness: true, nal_unit_type: ty, nal_units: nals });
            }
        }

        Ok(Some(HevcDecoderConfigurationRecord {
            ptl: sps_summary.ptl.clone(),
            min_spatial_segmentation_idc: sps_summary.min_spatial_segmentation_idc,
            parallelism_type,
            chroma_format_idc: sps_summary.chroma_format_idc,
            bit_depth_luma_minus8: sps_summary.bit_depth_luma_minus8,
            bit_depth_chroma_minus8: sps_summary.bit_depth_chroma_minus8,
            avg_frame_rate: 0,
            constant_frame_rate: 0,
            num_temporal_layers: sps_summary.max_sub_layers_minus1 + 1,
            temporal_id_nested: sps_summary.temporal_id_nesting,
            length_size_minus_one: 3,
            arrays,
        }))
    }

    /// Parse a serialized record.
    pub fn parse(buf: &[u8]) -> Result<HevcDecoderConfigurationRecord> {
        let mut reader = remux_core::io::SliceReader::from_vec(buf.to_vec());

        let version = reader.read_u8()?;
        if version != 1 {
            return invalid_format_error("hevc: unexpected configuration record version");
        }

        let byte = reader.read_u8()?;
        let general_profile_space = byte >> 6;
        let general_tier_flag = byte & 0x20 != 0;
        let general_profile_idc = byte & 0x1f;
        let general_profile_compatibility_flags = reader.read_u32()?;
        let general_constraint_indicator_flags =
            (u64::from(reader.read_u32()?) << 16) | u64::from(reader.read_u16()?);
        let general_level_idc = reader.read_u8()?;

        let min_spatial_segmentation_idc = reader.read_u16()? & 0x0fff;
        let parallelism_type = reader.read_u8()? & 0x03;
        let chroma_format_idc = reader.read_u8()? & 0x03;
        let bit_depth_luma_minus8 = reader.read_u8()? & 0x07;
        let bit_depth_chroma_minus8 = reader.read_u8()? & 0x07;
        let avg_frame_rate = reader.read_u16()?;

        let byte = reader.read_u8()?;
        let constant_frame_rate = byte >> 6;
        let num_temporal_layers = (byte >> 3) & 0x07;
        let temporal_id_nested = byte & 0x04 != 0;
        let length_size_minus_one = byte & 0x03;

        let num_arrays = reader.read_u8()?;
        let mut arrays = Vec::with_capacity(num_arrays as usize);
        for _ in 0..num_arrays {
            let byte = reader.read_u8()?;
            let completeness = byte & 0x80 != 0;
            let nal_unit_type = byte & 0x3f;

            let num_nalus = reader.read_u16()?;
            let mut nal_units = Vec::with_capacity(num_nalus as usize);
            for _ in 0..num_nalus {
                let len = reader.read_u16()? as usize;
                nal_units.push(reader.read_boxed_slice(len)?);
            }

            arrays.push(NalUnitArray { completeness, nal_unit_type, nal_units });
        }

        Ok(HevcDecoderConfigurationRecord {
            ptl: ProfileTierLevel {
                general_profile_space,
                general_tier_flag,
                general_profile_idc,
                general_profile_compatibility_flags,
                general_constraint_indicator_flags,
                general_level_idc,
            },
            min_spatial_segmentation_idc,
            parallelism_type,
            chroma_format_idc,
            bit_depth_luma_minus8,
            bit_depth_chroma_minus8,
            avg_frame_rate,
            constant_frame_rate,
            num_temporal_layers,
            temporal_id_nested,
            length_size_minus_one,
            arrays,
        })
    }

    /// Serialize the record per ISO/IEC 14496-15 section 8.3.3.1.
    pub fn serialize(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(128);

        out.push(1);
        out.push(
            (self.ptl.general_profile_space << 6)
                | (u8::from(self.ptl.general_tier_flag) << 5)
                | (self.ptl.general_profile_idc & 0x1f),
        );
        out.extend_from_slice(&self.ptl.general_profile_compatibility_flags.to_be_bytes());
        out.extend_from_slice(&self.ptl.general_constraint_indicator_flags.to_be_bytes()[2..]);
        out.push(self.ptl.general_level_idc);
        out.extend_from_slice(&(0xf000 | self.min_spatial_segmentation_idc).to_be_bytes());
        out.push(0xfc | (self.parallelism_type & 0x03));
        out.push(0xfc | (self.chroma_format_idc & 0x03));
        out.push(0xf8 | (self.bit_depth_luma_minus8 & 0x07));
        out.push(0xf8 | (self.bit_depth_chroma_minus8 & 0x07));
        out.extend_from_slice(&self.avg_frame_rate.to_be_bytes());
        out.push(
            (self.constant_frame_rate << 6)
                | ((self.num_temporal_layers & 0x07) << 3)
                | (u8::from(self.temporal_id_nested) << 2)
                | (self.length_size_minus_one & 0x03),
        );

        out.push(self.arrays.len() as u8);
        for array in &self.arrays {
            out.push((u8::from(array.completeness) << 7) | (array.nal_unit_type & 0x3f));
            out.extend_from_slice(&(array.nal_units.len() as u16).to_be_bytes());
            for nal in &array.nal_units {
                out.extend_from_slice(&(nal.len() as u16).to_be_bytes());
                out.extend_from_slice(nal);
            }
        }

        out
    }

    /// The canonical codec parameter string.
    pub fn codec_parameter_string(&self) -> String {
        codec_parameter_string(&self.ptl)
    }
}

/// Assemble the codec parameter string per ISO/IEC 14496-15 Annex E, e.g. `hvc1.1.6.L93.B0`.
pub fn codec_parameter_string(ptl: &ProfileTierLevel) -> String {
    let mut out = String::from("hvc1.");

    match ptl.general_profile_space {
        1 => out.push('A'),
        2 => out.push('B'),
        3 => out.push('C'),
        _ => (),
    }
    out.push_str(&ptl.general_profile_idc.to_string());

    // Compatibility flags are serialized bit-reversed.
    let reversed = ptl.general_profile_compatibility_flags.reverse_bits();
    out.push_str(&format!(".{:X}", reversed));

    out.push('.');
    out.push(if ptl.general_tier_flag { 'H' } else { 'L' });
    out.push_str(&ptl.general_level_idc.to_string());

    // Constraint bytes, trailing zero bytes omitted.
    let constraint_bytes = ptl.general_constraint_indicator_flags.to_be_bytes();
    let constraint_bytes = &constraint_bytes[2..];
    let last_nonzero = constraint_bytes.iter().rposition(|&b| b != 0);

    match last_nonzero {
        Some(last) => {
            for byte in &constraint_bytes[..=last] {
                out.push_str(&format!(".{:X}", byte));
            }
        }
        None => out.push_str(".B0"),
    }

    out
}

#[cfg(test)]
mod tests {
    use super::super::NalFraming;
    use super::{is_key_frame, nal_unit_type, ProfileTierLevel};

    #[test]
    fn verify_nal_unit_type() {
        // SPS: type 33 -> first byte (33 << 1) = 0x42.
        assert_eq!(nal_unit_type(&[0x42, 0x01]), Some(33));
        // IDR_W_RADL: type 19 -> (19 << 1) = 0x26.
        assert_eq!(nal_unit_type(&[0x26, 0x01]), Some(19));
    }

    #[test]
    fn verify_key_frame_detection() {
        // IDR_W_RADL (19) is a key frame.
        let key = [0x00, 0x00, 0x00, 0x01, 0x26, 0x01, 0xaf];
        assert!(is_key_frame(&key, NalFraming::AnnexB));

        // TRAIL_R (1) is not.
        let delta = [0x00, 0x00, 0x00, 0x01, 0x02, 0x01, 0xaf];
        assert!(!is_key_frame(&delta, NalFraming::AnnexB));
    }

    #[test]
    fn verify_codec_parameter_string() {
        // Main profile, level 93, tier L: the widely quoted "hvc1.1.6.L93.B0" example.
        let ptl = ProfileTierLevel {
            general_profile_space: 0,
            general_tier_flag: false,
            general_profile_idc: 1,
            general_profile_compatibility_flags: 0x6000_0000,
            general_constraint_indicator_flags: 0xb000_0000_0000,
            general_level_idc: 93,
        };

        assert_eq!(super::codec_parameter_string(&ptl), "hvc1.1.6.L93.B0");
    }
}
