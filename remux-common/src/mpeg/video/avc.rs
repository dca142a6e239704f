// Remux
// Copyright (c) 2026 The Project Remux Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! AVC (H.264) parameter-set extraction and decoder configuration records.

use remux_core::errors::{invalid_format_error, Result};
use remux_core::io::{strip_emulation_prevention, BitReader};

use super::{iter_nal_units, NalFraming};

const NAL_TYPE_IDR: u8 = 5;
const NAL_TYPE_SPS: u8 = 7;
const NAL_TYPE_PPS: u8 = 8;
const NAL_TYPE_SPS_EXT: u8 = 13;

/// AVC profiles that extend the decoder configuration record with chroma format and bit-depth
/// fields, per ISO/IEC 14496-15 section 5.3.3.1.
const HIGH_PROFILES: [u8; 4] = [100, 110, 122, 144];

/// The type of a NAL unit.
#[inline]
pub fn nal_unit_type(nal: &[u8]) -> Option<u8> {
    nal.first().map(|&b| b & 0x1f)
}

/// Returns true if any NAL unit in the packet is an IDR slice.
pub fn is_key_frame(data: &[u8], framing: NalFraming) -> bool {
    iter_nal_units(data, framing).any(|nal| nal_unit_type(nal) == Some(NAL_TYPE_IDR))
}

/// Fields read from a sequence parameter set.
#[derive(Clone, Debug)]
pub struct SpsSummary {
    pub profile_idc: u8,
    pub constraint_flags: u8,
    pub level_idc: u8,
    pub chroma_format_idc: u8,
    pub bit_depth_luma_minus8: u8,
    pub bit_depth_chroma_minus8: u8,
}

impl SpsSummary {
    /// Parse the leading fields of an SPS NAL unit (header byte included).
    pub fn parse(nal: &[u8]) -> Result<SpsSummary> {
        if nal_unit_type(nal) != Some(NAL_TYPE_SPS) {
            return invalid_format_error("avc: not a sequence parameter set");
        }

        let rbsp = strip_emulation_prevention(&nal[1..]);
        let mut bs = BitReader::new(&rbsp);

        let profile_idc = bs.read_bits(8)? as u8;
        let constraint_flags = bs.read_bits(8)? as u8;
        let level_idc = bs.read_bits(8)? as u8;

        // seq_parameter_set_id
        bs.read_exp_golomb()?;

        let mut chroma_format_idc = 1;
        let mut bit_depth_luma_minus8 = 0;
        let mut bit_depth_chroma_minus8 = 0;

        if HIGH_PROFILES.contains(&profile_idc) {
            chroma_format_idc = bs.read_exp_golomb()? as u8;
            if chroma_format_idc == 3 {
                // separate_colour_plane_flag
                bs.read_bit()?;
            }
            bit_depth_luma_minus8 = bs.read_exp_golomb()? as u8;
            bit_depth_chroma_minus8 = bs.read_exp_golomb()? as u8;
        }

        Ok(SpsSummary {
            profile_idc,
            constraint_flags,
            level_idc,
            chroma_format_idc,
            bit_depth_luma_minus8,
            bit_depth_chroma_minus8,
        })
    }

    /// The canonical codec parameter string, e.g. `avc1.640028`.
    pub fn codec_parameter_string(&self) -> String {
        format!("avc1.{:02x}{:02x}{:02x}", self.profile_idc, self.constraint_flags, self.level_idc)
    }
}

/// An `AVCDecoderConfigurationRecord`, as defined in ISO/IEC 14496-15 section 5.3.3.1.
#[derive(Clone, Debug)]
pub struct AvcDecoderConfigurationRecord {
    pub avc_profile_indication: u8,
    pub profile_compatibility: u8,
    pub avc_level_indication: u8,
    /// The length in bytes, minus one, of the NAL unit length prefixes. Always 3 for records
    /// built by this module.
    pub length_size_minus_one: u8,
    pub sps: Vec<Box<[u8]>>,
    pub pps: Vec<Box<[u8]>>,
    pub sps_ext: Vec<Box<[u8]>>,
    pub chroma_format_idc: u8,
    pub bit_depth_luma_minus8: u8,
    pub bit_depth_chroma_minus8: u8,
}

impl AvcDecoderConfigurationRecord {
    /// Build a record from the parameter sets found in a packet. The packet may use either
    /// framing; a key-frame packet produced by an encoder normally carries SPS and PPS in front
    /// of the slice data.
    ///
    /// Returns `None` when the packet carries no SPS.
    pub fn build_from_packet(
        data: &[u8],
        framing: NalFraming,
    ) -> Result<Option<AvcDecoderConfigurationRecord>> {
        let mut sps = Vec::new();
        let mut pps = Vec::new();
        let mut sps_ext = Vec::new();

        for nal in iter_nal_units(data, framing) {
            match nal_unit_type(nal) {
                Some(NAL_TYPE_SPS) => sps.push(Box::from(nal)),
                Some(NAL_TYPE_PPS) => pps.push(Box::from(nal)),
                Some(NAL_TYPE_SPS_EXT) => sps_ext.push(Box::from(nal)),
                _ => (),
            }
        }

        let first_sps = match sps.first() {
            Some(nal) => SpsSummary::parse(nal)?,
            None => return Ok(None),
        };

        Ok(Some(AvcDecoderConfigurationRecord {
            avc_profile_indication: first_sps.profile_idc,
            profile_compatibility: first_sps.constraint_flags,
            avc_level_indication: first_sps.level_idc,
            length_size_minus_one: 3,
            sps,
            pps,
            sps_ext,
            chroma_format_idc: first_sps.chroma_format_idc,
            bit_depth_luma_minus8: first_sps.bit_depth_luma_minus8,
            bit_depth_chroma_minus8: first_sps.bit_depth_chroma_minus8,
        }))
    }

    /// Parse a serialized record.
    pub fn parse(buf: &[u8]) -> Result<AvcDecoderConfigurationRecord> {
        let mut reader = remux_core::io::SliceReader::from_vec(buf.to_vec());

        let version = reader.read_u8()?;
        if version != 1 {
            return invalid_format_error("avc: unexpected configuration record version");
        }

        let avc_profile_indication = reader.read_u8()?;
        let profile_compatibility = reader.read_u8()?;
        let avc_level_indication = reader.read_u8()?;
        let length_size_minus_one = reader.read_u8()? & 0x03;

        let num_sps = reader.read_u8()? & 0x1f;
        let mut sps = Vec::with_capacity(num_sps as usize);
        for _ in 0..num_sps {
            let len = reader.read_u16()? as usize;
            sps.push(reader.read_boxed_slice(len)?);
        }

        let num_pps = reader.read_u8()?;
        let mut pps = Vec::with_capacity(num_pps as usize);
        for _ in 0..num_pps {
            let len = reader.read_u16()? as usize;
            pps.push(reader.read_boxed_slice(len)?);
        }

        let mut chroma_format_idc = 1;
        let mut bit_depth_luma_minus8 = 0;
        let mut bit_depth_chroma_minus8 = 0;
        let mut sps_ext = Vec::new();

        // The profile-specific extension is only present for the high profiles, and only when
        // the writer included it.
        if HIGH_PROFILES.contains(&avc_profile_indication) && reader.bytes_remaining() >= 4 {
            chroma_format_idc = reader.read_u8()? & 0x03;
            bit_depth_luma_minus8 = reader.read_u8()? & 0x07;
            bit_depth_chroma_minus8 = reader.read_u8()? & 0x07;

            let num_sps_ext = reader.read_u8()?;
            for _ in 0..num_sps_ext {
                let len = reader.read_u16()? as usize;
                sps_ext.push(reader.read_boxed_slice(len)?);
            }
        }

        Ok(AvcDecoderConfigurationRecord {
            avc_profile_indication,
            profile_compatibility,
            avc_level_indication,
            length_size_minus_one,
            sps,
            pps,
            sps_ext,
            chroma_format_idc,
            bit_depth_luma_minus8,
            bit_depth_chroma_minus8,
        })
    }

    /// Serialize the record per ISO/IEC 14496-15 section 5.3.3.1.
    pub fn serialize(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(64);

        out.push(1);
        out.push(self.avc_profile_indication);
        out.push(self.profile_compatibility);
        out.push(self.avc_level_indication);
        out.push(0xfc | (self.length_size_minus_one & 0x03));

        out.push(0xe0 | (self.sps.len() as u8 & 0x1f));
        for sps in &self.sps {
            out.extend_from_slice(&(sps.len() as u16).to_be_bytes());
            out.extend_from_slice(sps);
        }

        out.push(self.pps.len() as u8);
        for pps in &self.pps {
            out.extend_from_slice(&(pps.len() as u16).to_be_bytes());
            out.extend_from_slice(pps);
        }

        if HIGH_PROFILES.contains(&self.avc_profile_indication) {
            out.push(0xfc | (self.chroma_format_idc & 0x03));
            out.push(0xf8 | (self.bit_depth_luma_minus8 & 0x07));
            out.push(0xf8 | (self.bit_depth_chroma_minus8 & 0x07));
            out.push(self.sps_ext.len() as u8);
            for ext in &self.sps_ext {
                out.extend_from_slice(&(ext.len() as u16).to_be_bytes());
                out.extend_from_slice(ext);
            }
        }

        out
    }

    /// The canonical codec parameter string.
    pub fn codec_parameter_string(&self) -> String {
        format!(
            "avc1.{:02x}{:02x}{:02x}",
            self.avc_profile_indication, self.profile_compatibility, self.avc_level_indication
        )
    }
}

#[cfg(test)]
mod tests {
    use super::super::NalFraming;
    use super::{is_key_frame, AvcDecoderConfigurationRecord, SpsSummary};

    // A baseline profile SPS for 64x64: profile 66, constraints 0xc0, level 30.
    const TEST_SPS: [u8; 9] = [0x67, 0x42, 0xc0, 0x1e, 0x8c, 0x68, 0x42, 0x01, 0x09];
    const TEST_PPS: [u8; 4] = [0x68, 0xce, 0x3c, 0x80];

    fn annex_b_key_packet() -> Vec<u8> {
        let mut data = Vec::new();
        data.extend_from_slice(&[0, 0, 0, 1]);
        data.extend_from_slice(&TEST_SPS);
        data.extend_from_slice(&[0, 0, 0, 1]);
        data.extend_from_slice(&TEST_PPS);
        data.extend_from_slice(&[0, 0, 1]);
        data.extend_from_slice(&[0x65, 0x88, 0x84, 0x00]);
        data
    }

    #[test]
    fn verify_sps_summary() {
        let sps = SpsSummary::parse(&TEST_SPS).unwrap();
        assert_eq!(sps.profile_idc, 66);
        assert_eq!(sps.constraint_flags, 0xc0);
        assert_eq!(sps.level_idc, 30);
        assert_eq!(sps.codec_parameter_string(), "avc1.42c01e");
    }

    #[test]
    fn verify_key_frame_detection() {
        assert!(is_key_frame(&annex_b_key_packet(), NalFraming::AnnexB));

        let delta = [0x00, 0x00, 0x00, 0x01, 0x41, 0x9a, 0x00];
        assert!(!is_key_frame(&delta, NalFraming::AnnexB));
    }

    #[test]
    fn verify_record_round_trip() {
        let record =
            AvcDecoderConfigurationRecord::build_from_packet(&annex_b_key_packet(), NalFraming::AnnexB)
                .unwrap()
                .unwrap();

        assert_eq!(record.length_size_minus_one, 3);
        assert_eq!(record.sps.len(), 1);
        assert_eq!(record.pps.len(), 1);

        let serialized = record.serialize();
        let parsed = AvcDecoderConfigurationRecord::parse(&serialized).unwrap();

        assert_eq!(parsed.avc_profile_indication, 66);
        assert_eq!(parsed.sps, record.sps);
        assert_eq!(parsed.pps, record.pps);
        assert_eq!(parsed.serialize(), serialized);
    }
}
