// Remux
// Copyright (c) 2026 The Project Remux Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Sample-description (`stsd`) entry parsing and construction.

use log::warn;

use remux_common::xiph::opus::OpusIdHeader;
use remux_core::errors::Result;
use remux_core::io::SliceReader;
use remux_core::track::{
    AudioCodec, AudioTrackInfo, ColorPrimaries, ColorSpace, MatrixCoefficients, TrackInfo,
    TransferCharacteristics, VideoCodec, VideoTrackInfo,
};

use crate::atoms::{parse_es_descriptor, read_child_box, read_full_box, write_box, write_full_box};

/// Parse the first sample entry of an `stsd` box into track info. The slice cursor sits at the
/// first entry.
pub fn parse_sample_entry(slice: &mut SliceReader) -> Result<Option<TrackInfo>> {
    let entry = read_child_box(slice)?;
    let mut body = SliceReader::from_vec(slice.read_bytes(entry.data_len)?.to_vec());

    match &entry.fourcc {
        b"avc1" | b"avc3" => parse_video_entry(&mut body, VideoCodec::Avc, b"avcC"),
        b"hvc1" | b"hev1" => parse_video_entry(&mut body, VideoCodec::Hevc, b"hvcC"),
        b"vp08" => parse_video_entry(&mut body, VideoCodec::Vp8, b"vpcC"),
        b"vp09" => parse_video_entry(&mut body, VideoCodec::Vp9, b"vpcC"),
        b"av01" => parse_video_entry(&mut body, VideoCodec::Av1, b"av1C"),
        b"mp4v" => parse_video_entry(&mut body, VideoCodec::Mpeg4, b"esds"),
        b"mp4a" => parse_mp4a_entry(&mut body),
        b"Opus" => parse_opus_entry(&mut body),
        b"fLaC" => parse_flac_entry(&mut body),
        b"sowt" => parse_pcm_entry(&mut body, AudioCodec::PcmS16),
        b"twos" => parse_pcm_entry(&mut body, AudioCodec::PcmS16Be),
        b"alaw" => parse_pcm_entry(&mut body, AudioCodec::Alaw),
        b"ulaw" => parse_pcm_entry(&mut body, AudioCodec::Ulaw),
        other => {
            warn!("unsupported sample entry {}", String::from_utf8_lossy(other));
            Ok(None)
        }
    }
}

/// Skip the fixed visual sample entry fields, returning `(width, height)`.
fn read_visual_fields(body: &mut SliceReader) -> Result<(u32, u32)> {
    // reserved + data_reference_index + pre_defined/reserved.
    body.skip(6 + 2 + 16)?;
    let width = u32::from(body.read_u16()?);
    let height = u32::from(body.read_u16()?);
    // resolutions, reserved, frame_count, compressor name, depth, pre_defined.
    body.skip(4 + 4 + 4 + 2 + 32 + 2 + 2)?;
    Ok((width, height))
}

fn parse_video_entry(
    body: &mut SliceReader,
    codec: VideoCodec,
    config_fourcc: &[u8; 4],
) -> Result<Option<TrackInfo>> {
    let (width, height) = read_visual_fields(body)?;

    let mut decoder_config = None;
    let mut color = None;

    while body.bytes_remaining() >= 8 {
        let child = read_child_box(body)?;
        let payload = body.read_bytes(child.data_len)?.to_vec();

        if &child.fourcc == config_fourcc {
            match config_fourcc {
                b"esds" => {
                    // The MPEG-4 visual configuration is the decoder specific info.
                    let mut esds = SliceReader::from_vec(payload.clone());
                    read_full_box(&mut esds)?;
                    if let Ok(descriptor) = parse_es_descriptor(&mut esds) {
                        decoder_config = descriptor.decoder_specific_info;
                    }
                }
                b"vpcC" => {
                    let mut vpcc = SliceReader::from_vec(payload.clone());
                    read_full_box(&mut vpcc)?;
                    // profile, level.
                    vpcc.skip(2)?;
                    let packed = vpcc.read_u8()?;
                    let full_range = packed & 0x01 != 0;
                    let primaries = vpcc.read_u8()?;
                    let transfer = vpcc.read_u8()?;
                    let matrix = vpcc.read_u8()?;

                    color = Some(ColorSpace {
                        primaries: ColorPrimaries::from_code(primaries),
                        transfer: TransferCharacteristics::from_code(transfer),
                        matrix: MatrixCoefficients::from_code(matrix),
                        full_range: Some(full_range),
                    });
                    decoder_config = Some(payload.clone().into());
                }
                _ => decoder_config = Some(payload.clone().into()),
            }
        }
        else if &child.fourcc == b"colr" {
            let mut colr = SliceReader::from_vec(payload);
            let colour_type = colr.read_quad_bytes()?;
            if &colour_type == b"nclx" {
                let primaries = colr.read_u16()? as u8;
                let transfer = colr.read_u16()? as u8;
                let matrix = colr.read_u16()? as u8;
                let full_range = colr.read_u8()? & 0x80 != 0;

                color = Some(ColorSpace {
                    primaries: ColorPrimaries::from_code(primaries),
                    transfer: TransferCharacteristics::from_code(transfer),
                    matrix: MatrixCoefficients::from_code(matrix),
                    full_range: Some(full_range),
                });
            }
        }
    }

    Ok(Some(TrackInfo::Video(VideoTrackInfo {
        codec,
        coded_width: width,
        coded_height: height,
        rotation: Default::default(),
        color,
        decoder_config,
    })))
}

/// Skip the fixed audio sample entry fields, returning `(channel_count, sample_rate)`.
fn read_audio_fields(body: &mut SliceReader) -> Result<(u32, u32)> {
    // reserved + data_reference_index.
    body.skip(6 + 2)?;
    let version = body.read_u16()?;
    // revision + vendor.
    body.skip(2 + 4)?;
    let channel_count = u32::from(body.read_u16()?);
    // sample size, pre_defined, reserved.
    body.skip(2 + 2 + 2)?;
    let sample_rate = body.read_u32()? >> 16;

    // QuickTime sound descriptor versions carry extra fields.
    match version {
        1 => body.skip(16)?,
        2 => body.skip(36)?,
        _ => (),
    }

    Ok((channel_count, sample_rate))
}

fn parse_mp4a_entry(body: &mut SliceReader) -> Result<Option<TrackInfo>> {
    let (channel_count, sample_rate) = read_audio_fields(body)?;

    let mut codec = AudioCodec::Aac;
    let mut decoder_config = None;

    while body.bytes_remaining() >= 8 {
        let child = read_child_box(body)?;
        let payload = body.read_bytes(child.data_len)?.to_vec();

        if &child.fourcc == b"esds" {
            let mut esds = SliceReader::from_vec(payload);
            read_full_box(&mut esds)?;
            let descriptor = parse_es_descriptor(&mut esds)?;

            codec = match descriptor.object_type {
                0x40 | 0x66 | 0x67 | 0x68 => AudioCodec::Aac,
                0x69 | 0x6b => AudioCodec::Mp3,
                other => {
                    warn!("unsupported audio object type {:#04x}", other);
                    return Ok(None);
                }
            };
            decoder_config = descriptor.decoder_specific_info;
        }
    }

    Ok(Some(TrackInfo::Audio(AudioTrackInfo {
        codec,
        channel_count,
        sample_rate,
        decoder_config,
    })))
}

fn parse_opus_entry(body: &mut SliceReader) -> Result<Option<TrackInfo>> {
    let (channel_count, sample_rate) = read_audio_fields(body)?;

    let mut decoder_config = None;

    while body.bytes_remaining() >= 8 {
        let child = read_child_box(body)?;
        let payload = body.read_bytes(child.data_len)?.to_vec();

        if &child.fourcc == b"dOps" {
            // dOps stores the identification fields big-endian; re-emit them as an OpusHead so
            // every container exposes the same decoder configuration.
            let mut dops = SliceReader::from_vec(payload);
            // version
            dops.skip(1)?;
            let channels = dops.read_u8()?;
            let pre_skip = dops.read_u16()?;
            let input_sample_rate = dops.read_u32()?;
            let output_gain = dops.read_i16()?;
            let mapping_family = dops.read_u8()?;

            let mut head = OpusIdHeader::new(channels, pre_skip, input_sample_rate);
            head.output_gain = output_gain;
            head.mapping_family = mapping_family;
            decoder_config = Some(head.serialize().into());
        }
    }

    Ok(Some(TrackInfo::Audio(AudioTrackInfo {
        codec: AudioCodec::Opus,
        channel_count,
        sample_rate,
        decoder_config,
    })))
}

fn parse_flac_entry(body: &mut SliceReader) -> Result<Option<TrackInfo>> {
    let (channel_count, sample_rate) = read_audio_fields(body)?;

    let mut decoder_config = None;

    while body.bytes_remaining() >= 8 {
        let child = read_child_box(body)?;
        let payload = body.read_bytes(child.data_len)?.to_vec();

        if &child.fourcc == b"dfLa" {
            let mut dfla = SliceReader::from_vec(payload);
            read_full_box(&mut dfla)?;
            // The first metadata block is STREAMINFO; its 34-byte payload is the decoder
            // configuration.
            dfla.skip(4)?;
            if dfla.bytes_remaining() >= 34 {
                decoder_config = Some(Box::from(dfla.read_bytes(34)?));
            }
        }
    }

    Ok(Some(TrackInfo::Audio(AudioTrackInfo {
        codec: AudioCodec::Flac,
        channel_count,
        sample_rate,
        decoder_config,
    })))
}

fn parse_pcm_entry(body: &mut SliceReader, codec: AudioCodec) -> Result<Option<TrackInfo>> {
    let (channel_count, sample_rate) = read_audio_fields(body)?;

    Ok(Some(TrackInfo::Audio(AudioTrackInfo {
        codec,
        channel_count,
        sample_rate,
        decoder_config: None,
    })))
}

// Write side.

/// Build a complete sample entry box for the track.
pub fn build_sample_entry(info: &TrackInfo) -> Result<Vec<u8>> {
    match info {
        TrackInfo::Video(video) => build_video_entry(video),
        TrackInfo::Audio(audio) => build_audio_entry(audio),
        TrackInfo::Subtitle(_) => {
            remux_core::errors::encoding_error("isomp4: subtitle sample entries are not written")
        }
    }
}

fn visual_fields(width: u32, height: u32) -> Vec<u8> {
    let mut out = Vec::with_capacity(70);
    out.extend_from_slice(&[0u8; 6]);
    out.extend_from_slice(&1u16.to_be_bytes()); // data_reference_index
    out.extend_from_slice(&[0u8; 16]);
    out.extend_from_slice(&(width as u16).to_be_bytes());
    out.extend_from_slice(&(height as u16).to_be_bytes());
    out.extend_from_slice(&0x0048_0000u32.to_be_bytes()); // 72 dpi
    out.extend_from_slice(&0x0048_0000u32.to_be_bytes());
    out.extend_from_slice(&0u32.to_be_bytes());
    out.extend_from_slice(&1u16.to_be_bytes()); // frame_count
    out.extend_from_slice(&[0u8; 32]); // compressor name
    out.extend_from_slice(&0x0018u16.to_be_bytes()); // depth
    out.extend_from_slice(&u16::MAX.to_be_bytes()); // pre_defined
    out
}

fn build_video_entry(video: &VideoTrackInfo) -> Result<Vec<u8>> {
    let (fourcc, config_fourcc): (&[u8; 4], &[u8; 4]) = match video.codec {
        VideoCodec::Avc => (b"avc1", b"avcC"),
        VideoCodec::Hevc => (b"hvc1", b"hvcC"),
        VideoCodec::Vp8 => (b"vp08", b"vpcC"),
        VideoCodec::Vp9 => (b"vp09", b"vpcC"),
        VideoCodec::Av1 => (b"av01", b"av1C"),
        VideoCodec::Mpeg4 => (b"mp4v", b"esds"),
    };

    let config = match &video.decoder_config {
        Some(config) => config.as_ref(),
        None => {
            return remux_core::errors::encoding_error(
                "isomp4: video codec requires a decoder configuration",
            )
        }
    };

    let mut payload = visual_fields(video.coded_width, video.coded_height);
    write_box(&mut payload, config_fourcc, config);

    if let Some(color) = &video.color {
        let mut colr = Vec::new();
        colr.extend_from_slice(b"nclx");
        colr.extend_from_slice(
            &u16::from(color.primaries.map_or(2, |p| p.code())).to_be_bytes(),
        );
        colr.extend_from_slice(&u16::from(color.transfer.map_or(2, |t| t.code())).to_be_bytes());
        colr.extend_from_slice(&u16::from(color.matrix.map_or(2, |m| m.code())).to_be_bytes());
        colr.push(if color.full_range == Some(true) { 0x80 } else { 0x00 });
        write_box(&mut payload, b"colr", &colr);
    }

    let mut out = Vec::new();
    write_box(&mut out, fourcc, &payload);
    Ok(out)
}

fn audio_fields(channel_count: u32, sample_rate: u32) -> Vec<u8> {
    let mut out = Vec::with_capacity(28);
    out.extend_from_slice(&[0u8; 6]);
    out.extend_from_slice(&1u16.to_be_bytes()); // data_reference_index
    out.extend_from_slice(&[0u8; 8]); // version, revision, vendor
    out.extend_from_slice(&(channel_count as u16).to_be_bytes());
    out.extend_from_slice(&16u16.to_be_bytes()); // sample size
    out.extend_from_slice(&[0u8; 4]); // pre_defined, reserved
    out.extend_from_slice(&(sample_rate << 16).to_be_bytes());
    out
}

fn build_audio_entry(audio: &AudioTrackInfo) -> Result<Vec<u8>> {
    let mut payload = audio_fields(audio.channel_count, audio.sample_rate);

    let fourcc: &[u8; 4] = match audio.codec {
        AudioCodec::Aac => {
            let esds = crate::atoms::build_es_descriptor(0x40, audio.decoder_config.as_deref());
            write_full_box(&mut payload, b"esds", 0, 0, &esds);
            b"mp4a"
        }
        AudioCodec::Mp3 => {
            let esds = crate::atoms::build_es_descriptor(0x6b, None);
            write_full_box(&mut payload, b"esds", 0, 0, &esds);
            b"mp4a"
        }
        AudioCodec::Opus => {
            let head = match &audio.decoder_config {
                Some(config) => OpusIdHeader::parse(config)?,
                None => OpusIdHeader::new(audio.channel_count as u8, 0, audio.sample_rate),
            };

            let mut dops = Vec::new();
            dops.push(0); // version
            dops.push(head.channel_count);
            dops.extend_from_slice(&head.pre_skip.to_be_bytes());
            dops.extend_from_slice(&head.input_sample_rate.to_be_bytes());
            dops.extend_from_slice(&head.output_gain.to_be_bytes());
            dops.push(head.mapping_family);
            write_box(&mut payload, b"dOps", &dops);
            b"Opus"
        }
        AudioCodec::Flac => {
            let streaminfo = match &audio.decoder_config {
                Some(config) => config.as_ref(),
                None => {
                    return remux_core::errors::encoding_error(
                        "isomp4: flac requires a STREAMINFO decoder configuration",
                    )
                }
            };

            let mut dfla = Vec::new();
            // Last-block flag + STREAMINFO type, 24-bit length.
            dfla.push(0x80);
            dfla.extend_from_slice(&(streaminfo.len() as u32).to_be_bytes()[1..]);
            dfla.extend_from_slice(streaminfo);
            let mut body = Vec::new();
            write_full_box(&mut body, b"dfLa", 0, 0, &dfla);
            payload.extend_from_slice(&body);
            b"fLaC"
        }
        AudioCodec::PcmS16 => b"sowt",
        AudioCodec::PcmS16Be => b"twos",
        AudioCodec::Alaw => b"alaw",
        AudioCodec::Ulaw => b"ulaw",
        _ => {
            return remux_core::errors::encoding_error(
                "isomp4: audio codec cannot be stored in mp4",
            )
        }
    };

    let mut out = Vec::new();
    write_box(&mut out, fourcc, &payload);
    Ok(out)
}

#[cfg(test)]
mod tests {
    use remux_core::io::SliceReader;
    use remux_core::track::{AudioCodec, AudioTrackInfo, TrackInfo};

    use super::{build_sample_entry, parse_sample_entry};

    #[test]
    fn verify_mp4a_entry_round_trip() {
        let info = TrackInfo::Audio(AudioTrackInfo {
            codec: AudioCodec::Aac,
            channel_count: 2,
            sample_rate: 48_000,
            decoder_config: Some(vec![0x11, 0x90].into()),
        });

        let entry = build_sample_entry(&info).unwrap();
        let mut slice = SliceReader::from_vec(entry);
        let parsed = parse_sample_entry(&mut slice).unwrap().unwrap();

        match parsed {
            TrackInfo::Audio(audio) => {
                assert_eq!(audio.codec, AudioCodec::Aac);
                assert_eq!(audio.channel_count, 2);
                assert_eq!(audio.sample_rate, 48_000);
                assert_eq!(audio.decoder_config.as_deref(), Some(&[0x11u8, 0x90][..]));
            }
            _ => panic!("expected audio info"),
        }
    }

    #[test]
    fn verify_opus_entry_round_trip() {
        let head = remux_common::xiph::opus::OpusIdHeader::new(2, 312, 48_000);
        let info = TrackInfo::Audio(AudioTrackInfo {
            codec: AudioCodec::Opus,
            channel_count: 2,
            sample_rate: 48_000,
            decoder_config: Some(head.serialize().into()),
        });

        let entry = build_sample_entry(&info).unwrap();
        let mut slice = SliceReader::from_vec(entry);
        let parsed = parse_sample_entry(&mut slice).unwrap().unwrap();

        match parsed {
            TrackInfo::Audio(audio) => {
                assert_eq!(audio.codec, AudioCodec::Opus);
                let config = audio.decoder_config.unwrap();
                let parsed_head =
                    remux_common::xiph::opus::OpusIdHeader::parse(&config).unwrap();
                assert_eq!(parsed_head.pre_skip, 312);
            }
            _ => panic!("expected audio info"),
        }
    }
}
