// Remux
// Copyright (c) 2026 The Project Remux Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! MPEG audio (MP3) and ADTS (AAC) frame-header inspection.

use remux_core::errors::{invalid_format_error, unsupported_codec_error, Result};

/// The length in bytes of a MPEG frame header word.
pub const MPEG_HEADER_LEN: usize = 4;

/// The `XING` four-CC identifying a variable-bit-rate bookkeeping frame.
pub const XING_TAG: u32 = 0x58696e67;
/// The `INFO` four-CC identifying a constant-bit-rate bookkeeping frame.
pub const INFO_TAG: u32 = 0x496e666f;

/// Bit-rate lookup table for MPEG version 1 layer 1.
const BIT_RATES_MPEG1_L1: [u32; 15] = [
    0, 32_000, 64_000, 96_000, 128_000, 160_000, 192_000, 224_000, 256_000, 288_000, 320_000,
    352_000, 384_000, 416_000, 448_000,
];

/// Bit-rate lookup table for MPEG version 1 layer 2.
const BIT_RATES_MPEG1_L2: [u32; 15] = [
    0, 32_000, 48_000, 56_000, 64_000, 80_000, 96_000, 112_000, 128_000, 160_000, 192_000, 224_000,
    256_000, 320_000, 384_000,
];

/// Bit-rate lookup table for MPEG version 1 layer 3.
const BIT_RATES_MPEG1_L3: [u32; 15] = [
    0, 32_000, 40_000, 48_000, 56_000, 64_000, 80_000, 96_000, 112_000, 128_000, 160_000, 192_000,
    224_000, 256_000, 320_000,
];

/// Bit-rate lookup table for MPEG version 2 & 2.5 audio layer 1.
const BIT_RATES_MPEG2_L1: [u32; 15] = [
    0, 32_000, 48_000, 56_000, 64_000, 80_000, 96_000, 112_000, 128_000, 144_000, 160_000, 176_000,
    192_000, 224_000, 256_000,
];

/// Bit-rate lookup table for MPEG version 2 & 2.5 audio layers 2 & 3.
const BIT_RATES_MPEG2_L23: [u32; 15] = [
    0, 8_000, 16_000, 24_000, 32_000, 40_000, 48_000, 56_000, 64_000, 80_000, 96_000, 112_000,
    128_000, 144_000, 160_000,
];

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum MpegVersion {
    Mpeg1,
    Mpeg2,
    Mpeg2p5,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum MpegLayer {
    Layer1,
    Layer2,
    Layer3,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ChannelMode {
    Mono,
    Stereo,
    DualMono,
    JointStereo,
}

/// A parsed MPEG audio frame header.
#[derive(Copy, Clone, Debug)]
pub struct MpegFrameHeader {
    pub version: MpegVersion,
    pub layer: MpegLayer,
    pub bitrate: u32,
    pub sample_rate: u32,
    pub channel_mode: ChannelMode,
    pub has_padding: bool,
    pub has_crc: bool,
    /// The total frame size in bytes, header included.
    pub frame_len: usize,
}

impl MpegFrameHeader {
    pub fn channel_count(&self) -> u32 {
        match self.channel_mode {
            ChannelMode::Mono => 1,
            _ => 2,
        }
    }

    /// The number of audio samples carried by one frame.
    pub fn samples_per_frame(&self) -> u32 {
        match (self.layer, self.version) {
            (MpegLayer::Layer1, _) => 384,
            (MpegLayer::Layer2, _) => 1152,
            (MpegLayer::Layer3, MpegVersion::Mpeg1) => 1152,
            (MpegLayer::Layer3, _) => 576,
        }
    }

    /// The offset from the start of the frame at which a Xing/Info tag would sit, which depends
    /// on the version and channel mode.
    pub fn xing_offset(&self) -> usize {
        let side_info_len = match (self.version, self.channel_mode) {
            (MpegVersion::Mpeg1, ChannelMode::Mono) => 17,
            (MpegVersion::Mpeg1, _) => 32,
            (_, ChannelMode::Mono) => 9,
            (_, _) => 17,
        };
        MPEG_HEADER_LEN + side_info_len
    }
}

/// Returns true if the provided frame header word is synced.
#[inline(always)]
pub fn is_frame_header_word_synced(sync: u32) -> bool {
    (sync & 0xffe0_0000) == 0xffe0_0000
}

/// Quickly check if a header sync word may be valid.
#[inline]
pub fn check_header(header: u32) -> bool {
    // Version (0x1 is not allowed).
    if (header >> 19) & 0x3 == 0x1 {
        return false;
    }
    // Layer (0x0 is not allowed).
    if (header >> 17) & 0x3 == 0x0 {
        return false;
    }
    // Bitrate (0xf is not allowed).
    if (header >> 12) & 0xf == 0xf {
        return false;
    }
    // Sample rate (0x3 is not allowed).
    if (header >> 10) & 0x3 == 0x3 {
        return false;
    }
    true
}

/// Parse a MPEG audio frame header word.
pub fn parse_mpeg_header(header: u32) -> Result<MpegFrameHeader> {
    // The MPEG audio header is structured as follows:
    //
    // 0b1111_1111 0b111v_vlly 0brrrr_hhpx 0bmmmm_coee
    // where:
    //     vv   = version, ll = layer      , y = crc
    //     rrrr = bitrate, hh = sample rate, p = padding , x  = private bit
    //     mmmm = mode   , c  = copyright  , o = original, ee = emphasis

    if !is_frame_header_word_synced(header) {
        return invalid_format_error("mpa: frame sync not found");
    }

    let version = match (header & 0x18_0000) >> 19 {
        0b00 => MpegVersion::Mpeg2p5,
        0b10 => MpegVersion::Mpeg2,
        0b11 => MpegVersion::Mpeg1,
        _ => return invalid_format_error("mpa: invalid MPEG version"),
    };

    let layer = match (header & 0x6_0000) >> 17 {
        0b01 => MpegLayer::Layer3,
        0b10 => MpegLayer::Layer2,
        0b11 => MpegLayer::Layer1,
        _ => return invalid_format_error("mpa: invalid MPEG layer"),
    };

    let bitrate = match ((header & 0xf000) >> 12, version, layer) {
        // "Free" bit-rate. Note, this is NOT variable bit-rate and is not a mandatory feature of
        // MP3 decoders.
        (0b0000, _, _) => return unsupported_codec_error("mpa: free bit-rate is not supported"),
        // Invalid bit-rate.
        (0b1111, _, _) => return invalid_format_error("mpa: invalid bit-rate"),
        // MPEG 1 bit-rates.
        (i, MpegVersion::Mpeg1, MpegLayer::Layer1) => BIT_RATES_MPEG1_L1[i as usize],
        (i, MpegVersion::Mpeg1, MpegLayer::Layer2) => BIT_RATES_MPEG1_L2[i as usize],
        (i, MpegVersion::Mpeg1, MpegLayer::Layer3) => BIT_RATES_MPEG1_L3[i as usize],
        // MPEG 2 bit-rates.
        (i, _, MpegLayer::Layer1) => BIT_RATES_MPEG2_L1[i as usize],
        (i, _, _) => BIT_RATES_MPEG2_L23[i as usize],
    };

    let sample_rate = match ((header & 0xc00) >> 10, version) {
        (0b00, MpegVersion::Mpeg1) => 44_100,
        (0b01, MpegVersion::Mpeg1) => 48_000,
        (0b10, MpegVersion::Mpeg1) => 32_000,
        (0b00, MpegVersion::Mpeg2) => 22_050,
        (0b01, MpegVersion::Mpeg2) => 24_000,
        (0b10, MpegVersion::Mpeg2) => 16_000,
        (0b00, MpegVersion::Mpeg2p5) => 11_025,
        (0b01, MpegVersion::Mpeg2p5) => 12_000,
        (0b10, MpegVersion::Mpeg2p5) => 8_000,
        _ => return invalid_format_error("mpa: invalid sample rate"),
    };

    let channel_mode = match (header & 0xc0) >> 6 {
        0b00 => ChannelMode::Stereo,
        0b01 => ChannelMode::JointStereo,
        0b10 => ChannelMode::DualMono,
        _ => ChannelMode::Mono,
    };

    let has_padding = header & 0x200 != 0;
    let has_crc = header & 0x1_0000 == 0;

    // Constants for size calculation from ISO/IEC 11172-3 section 2.4.3.1.
    let factor = match layer {
        MpegLayer::Layer1 => 12,
        MpegLayer::Layer2 => 144,
        MpegLayer::Layer3 if version == MpegVersion::Mpeg1 => 144,
        MpegLayer::Layer3 => 72,
    };

    // The header specifies the total frame size in "slots". For layers 2 & 3 a slot is 1 byte,
    // however for layer 1 a slot is 4 bytes.
    let slot_size = match layer {
        MpegLayer::Layer1 => 4,
        _ => 1,
    };

    let frame_len =
        ((factor * bitrate / sample_rate) as usize + usize::from(has_padding)) * slot_size;

    Ok(MpegFrameHeader {
        version,
        layer,
        bitrate,
        sample_rate,
        channel_mode,
        has_padding,
        has_crc,
        frame_len,
    })
}

/// Scan `data` for the first byte offset at which a plausible MPEG frame header begins.
pub fn find_frame_sync(data: &[u8]) -> Option<(usize, MpegFrameHeader)> {
    if data.len() < MPEG_HEADER_LEN {
        return None;
    }

    for offset in 0..=data.len() - MPEG_HEADER_LEN {
        let word = u32::from_be_bytes([
            data[offset],
            data[offset + 1],
            data[offset + 2],
            data[offset + 3],
        ]);

        if is_frame_header_word_synced(word) && check_header(word) {
            if let Ok(header) = parse_mpeg_header(word) {
                return Some((offset, header));
            }
        }
    }

    None
}

/// Returns the Xing/Info tag four-CC if the frame carries one.
pub fn read_xing_tag(frame: &[u8], header: &MpegFrameHeader) -> Option<u32> {
    let offset = header.xing_offset();
    let tag = frame.get(offset..offset + 4)?;
    let tag = u32::from_be_bytes([tag[0], tag[1], tag[2], tag[3]]);
    (tag == XING_TAG || tag == INFO_TAG).then_some(tag)
}

/// AAC sampling frequencies by ADTS/AudioSpecificConfig index.
pub const AAC_SAMPLE_RATES: [u32; 13] = [
    96_000, 88_200, 64_000, 48_000, 44_100, 32_000, 24_000, 22_050, 16_000, 12_000, 11_025, 8_000,
    7_350,
];

/// A parsed ADTS frame header.
#[derive(Copy, Clone, Debug)]
pub struct AdtsFrameHeader {
    /// The MPEG-4 audio object type (1 = AAC Main, 2 = AAC LC, ...).
    pub object_type: u8,
    pub sample_rate_idx: u8,
    pub sample_rate: u32,
    pub channel_configuration: u8,
    /// The total frame length in bytes, header included.
    pub frame_len: usize,
    /// The header length: 7 bytes, or 9 with a CRC.
    pub header_len: usize,
}

impl AdtsFrameHeader {
    /// The number of audio samples carried by one AAC frame.
    pub const SAMPLES_PER_FRAME: u32 = 1024;

    /// Parse an ADTS frame header from the front of `data`.
    pub fn parse(data: &[u8]) -> Result<AdtsFrameHeader> {
        if data.len() < 7 {
            return invalid_format_error("adts: truncated frame header");
        }

        // Sync word: 12 set bits.
        if data[0] != 0xff || data[1] & 0xf0 != 0xf0 {
            return invalid_format_error("adts: missing frame sync");
        }

        // Layer must be 0.
        if data[1] & 0x06 != 0 {
            return invalid_format_error("adts: invalid layer");
        }

        let protection_absent = data[1] & 0x01 != 0;
        let object_type = (data[2] >> 6) + 1;
        let sample_rate_idx = (data[2] >> 2) & 0x0f;

        let sample_rate = match AAC_SAMPLE_RATES.get(sample_rate_idx as usize) {
            Some(&rate) => rate,
            None => return invalid_format_error("adts: invalid sampling frequency index"),
        };

        let channel_configuration = ((data[2] & 0x01) << 2) | (data[3] >> 6);

        let frame_len = ((usize::from(data[3] & 0x03) << 11)
            | (usize::from(data[4]) << 3)
            | (usize::from(data[5]) >> 5)) as usize;

        if frame_len < 7 {
            return invalid_format_error("adts: invalid frame length");
        }

        Ok(AdtsFrameHeader {
            object_type,
            sample_rate_idx,
            sample_rate,
            channel_configuration,
            frame_len,
            header_len: if protection_absent { 7 } else { 9 },
        })
    }

    /// Assemble an `AudioSpecificConfig` for this frame's stream parameters.
    pub fn audio_specific_config(&self) -> Vec<u8> {
        build_audio_specific_config(
            self.object_type,
            self.sample_rate_idx,
            self.channel_configuration,
        )
    }

    /// Serialize a 7-byte ADTS header for a frame of `payload_len` data bytes.
    pub fn serialize(&self, payload_len: usize) -> [u8; 7] {
        let frame_len = payload_len + 7;
        [
            0xff,
            0xf1,
            ((self.object_type - 1) << 6) | (self.sample_rate_idx << 2)
                | (self.channel_configuration >> 2),
            ((self.channel_configuration & 0x03) << 6) | ((frame_len >> 11) & 0x03) as u8,
            ((frame_len >> 3) & 0xff) as u8,
            (((frame_len & 0x07) << 5) | 0x1f) as u8,
            0xfc,
        ]
    }
}

/// Assemble a two-byte `AudioSpecificConfig` from the object type, sampling-frequency index, and
/// channel configuration.
pub fn build_audio_specific_config(object_type: u8, sample_rate_idx: u8, channels: u8) -> Vec<u8> {
    vec![
        (object_type << 3) | (sample_rate_idx >> 1),
        ((sample_rate_idx & 0x01) << 7) | ((channels & 0x0f) << 3),
    ]
}

/// The AAC codec parameter string, e.g. `mp4a.40.2`.
pub fn aac_codec_parameter_string(object_type: u8) -> String {
    format!("mp4a.40.{}", object_type)
}

#[cfg(test)]
mod tests {
    use super::{
        find_frame_sync, parse_mpeg_header, AdtsFrameHeader, ChannelMode, MpegLayer, MpegVersion,
    };

    // MPEG1 Layer 3, 128 kbps, 44.1 kHz, no padding, joint stereo.
    const TEST_HEADER: u32 = 0xfffb_9040;

    #[test]
    fn verify_mpeg_header_parse() {
        let header = parse_mpeg_header(TEST_HEADER).unwrap();

        assert_eq!(header.version, MpegVersion::Mpeg1);
        assert_eq!(header.layer, MpegLayer::Layer3);
        assert_eq!(header.bitrate, 128_000);
        assert_eq!(header.sample_rate, 44_100);
        assert_eq!(header.channel_mode, ChannelMode::JointStereo);
        assert_eq!(header.samples_per_frame(), 1152);
        assert_eq!(header.frame_len, 417);
        assert_eq!(header.xing_offset(), 36);
    }

    #[test]
    fn verify_frame_sync_scan() {
        let mut data = vec![0x00, 0x12, 0x34];
        data.extend_from_slice(&TEST_HEADER.to_be_bytes());
        data.extend_from_slice(&[0u8; 8]);

        let (offset, header) = find_frame_sync(&data).unwrap();
        assert_eq!(offset, 3);
        assert_eq!(header.bitrate, 128_000);
    }

    #[test]
    fn verify_adts_header_round_trip() {
        // AAC LC, 44.1 kHz (index 4), 2 channels, 7-byte header + 100 bytes payload.
        let header = AdtsFrameHeader {
            object_type: 2,
            sample_rate_idx: 4,
            sample_rate: 44_100,
            channel_configuration: 2,
            frame_len: 107,
            header_len: 7,
        };

        let bytes = header.serialize(100);
        let parsed = AdtsFrameHeader::parse(&bytes).unwrap();

        assert_eq!(parsed.object_type, 2);
        assert_eq!(parsed.sample_rate, 44_100);
        assert_eq!(parsed.channel_configuration, 2);
        assert_eq!(parsed.frame_len, 107);
        assert_eq!(parsed.header_len, 7);

        assert_eq!(parsed.audio_specific_config(), vec![0x12, 0x10]);
        assert_eq!(super::aac_codec_parameter_string(parsed.object_type), "mp4a.40.2");
    }
}
