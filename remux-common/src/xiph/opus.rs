// Remux
// Copyright (c) 2026 The Project Remux Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Opus identification-header inspection.

use remux_core::errors::{invalid_format_error, Result};
use remux_core::io::SliceReader;

pub const OPUS_MAGIC: &[u8; 8] = b"OpusHead";

/// All Opus streams are timed against a 48 kHz clock regardless of the input sample rate.
pub const OPUS_SAMPLE_RATE: u32 = 48_000;

/// The Opus identification header, as defined in RFC 7845 section 5.1.
#[derive(Clone, Debug)]
pub struct OpusIdHeader {
    pub channel_count: u8,
    /// Samples (at 48 kHz) to discard from the start of the decoded stream.
    pub pre_skip: u16,
    /// The sample rate of the original input, informational only.
    pub input_sample_rate: u32,
    /// Output gain in Q7.8 dB.
    pub output_gain: i16,
    pub mapping_family: u8,
    /// Stream counts and the channel mapping table, present for mapping families other than 0.
    pub mapping: Option<OpusChannelMapping>,
}

#[derive(Clone, Debug)]
pub struct OpusChannelMapping {
    pub stream_count: u8,
    pub coupled_count: u8,
    pub mapping: Box<[u8]>,
}

impl OpusIdHeader {
    /// Parse a 19-or-more-byte identification header.
    pub fn parse(data: &[u8]) -> Result<OpusIdHeader> {
        let mut reader = SliceReader::from_vec(data.to_vec());

        if reader.len() < 19 {
            return invalid_format_error("opus: truncated identification header");
        }
        if reader.read_bytes(8)? != OPUS_MAGIC {
            return invalid_format_error("opus: missing OpusHead magic");
        }

        let version = reader.read_u8()?;
        if version != 1 {
            return invalid_format_error("opus: unsupported header version");
        }

        let channel_count = reader.read_u8()?;
        let pre_skip = reader.read_u16_le()?;
        let input_sample_rate = reader.read_u32_le()?;
        let output_gain = reader.read_i16_le()?;
        let mapping_family = reader.read_u8()?;

        let mapping = if mapping_family != 0 {
            let stream_count = reader.read_u8()?;
            let coupled_count = reader.read_u8()?;
            let mapping = reader.read_boxed_slice(channel_count as usize)?;
            Some(OpusChannelMapping { stream_count, coupled_count, mapping })
        }
        else {
            None
        };

        Ok(OpusIdHeader {
            channel_count,
            pre_skip,
            input_sample_rate,
            output_gain,
            mapping_family,
            mapping,
        })
    }

    /// Serialize the identification header.
    pub fn serialize(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(19);

        out.extend_from_slice(OPUS_MAGIC);
        out.push(1);
        out.push(self.channel_count);
        out.extend_from_slice(&self.pre_skip.to_le_bytes());
        out.extend_from_slice(&self.input_sample_rate.to_le_bytes());
        out.extend_from_slice(&self.output_gain.to_le_bytes());
        out.push(self.mapping_family);

        if let Some(mapping) = &self.mapping {
            out.push(mapping.stream_count);
            out.push(mapping.coupled_count);
            out.extend_from_slice(&mapping.mapping);
        }

        out
    }

    /// Create a default header for the given channel count and pre-skip.
    pub fn new(channel_count: u8, pre_skip: u16, input_sample_rate: u32) -> OpusIdHeader {
        OpusIdHeader {
            channel_count,
            pre_skip,
            input_sample_rate,
            output_gain: 0,
            mapping_family: 0,
            mapping: None,
        }
    }
}

/// The duration in 48 kHz samples of a single Opus packet, from the TOC byte and frame-count
/// code, per RFC 6716 section 3.1.
pub fn packet_sample_count(packet: &[u8]) -> Option<u32> {
    let &toc = packet.first()?;

    let config = toc >> 3;
    // Frame duration in 48 kHz samples per the configuration table.
    let frame_samples = match config {
        0..=11 => match config & 0x03 {
            0 => 480,
            1 => 960,
            2 => 1920,
            _ => 2880,
        },
        12..=15 => {
            if config & 0x01 == 0 {
                480
            }
            else {
                960
            }
        }
        _ => match config & 0x03 {
            0 => 120,
            1 => 240,
            2 => 480,
            _ => 960,
        },
    };

    let frame_count = match toc & 0x03 {
        0 => 1,
        1 | 2 => 2,
        _ => u32::from(*packet.get(1)? & 0x3f),
    };

    Some(frame_samples * frame_count)
}

#[cfg(test)]
mod tests {
    use super::{packet_sample_count, OpusIdHeader};

    #[test]
    fn verify_header_round_trip() {
        let header = OpusIdHeader::new(2, 312, 48_000);
        let bytes = header.serialize();
        assert_eq!(bytes.len(), 19);

        let parsed = OpusIdHeader::parse(&bytes).unwrap();
        assert_eq!(parsed.channel_count, 2);
        assert_eq!(parsed.pre_skip, 312);
        assert_eq!(parsed.input_sample_rate, 48_000);
        assert_eq!(parsed.mapping_family, 0);
    }

    #[test]
    fn verify_packet_sample_count() {
        // Config 15 (20 ms fullband hybrid), one frame.
        assert_eq!(packet_sample_count(&[15 << 3, 0x00]), Some(960));
        // Config 14 (10 ms fullband hybrid), one frame.
        assert_eq!(packet_sample_count(&[14 << 3, 0x00]), Some(480));
        // Config 31, two frames (code 1): 20 ms CELT frames.
        assert_eq!(packet_sample_count(&[(31 << 3) | 1, 0x00]), Some(1920));
    }
}
