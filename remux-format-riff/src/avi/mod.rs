// Remux
// Copyright (c) 2026 The Project Remux Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

pub mod muxer;

use std::sync::Arc;

use async_trait::async_trait;
use bitflags::bitflags;
use log::{debug, warn};

use remux_core::demux::{Demuxer, FormatInfo, InputTrack, PacketOptions, TrackReader};
use remux_core::errors::{invalid_format_error, Result};
use remux_core::io::{Reader, SliceReader};
use remux_core::packet::{EncodedPacket, PacketType};
use remux_core::probe::DemuxerRegistration;
use remux_core::track::{
    AudioCodec, AudioTrackInfo, TrackInfo, VideoCodec, VideoTrackInfo,
};
use remux_core::util::sort::binary_search_less_or_equal;

use crate::common::{read_chunk_header, ChunkHeader};
use crate::AVI_FORMAT_INFO;

bitflags! {
    /// Flags of an `idx1` index entry.
    #[derive(Copy, Clone, Debug)]
    pub struct IndexFlags: u32 {
        /// The entry is a `rec ` list rather than a data chunk.
        const LIST = 0x0000_0001;
        /// The chunk is a key frame.
        const KEYFRAME = 0x0000_0010;
        /// The chunk does not affect stream timing.
        const NO_TIME = 0x0000_0100;
    }
}

bitflags! {
    /// Flags of the `avih` main header.
    #[derive(Copy, Clone, Debug, Default)]
    pub struct MainHeaderFlags: u32 {
        const HAS_INDEX = 0x0000_0010;
        const MUST_USE_INDEX = 0x0000_0020;
        const IS_INTERLEAVED = 0x0000_0100;
    }
}

/// One entry of a stream's sample table.
#[derive(Copy, Clone, Debug)]
struct SampleEntry {
    /// Absolute file offset of the chunk payload.
    offset: u64,
    size: u32,
    key: bool,
    /// Start position in stream units (frames, or samples for fixed-size audio).
    start: u64,
    /// Length in stream units.
    dur: u32,
}

enum StreamKind {
    Video { codec: VideoCodec, width: u32, height: u32 },
    Audio { codec: AudioCodec, channel_count: u32, sample_rate: u32 },
}

struct AviStream {
    /// Zero-based stream index; chunk names derive from it.
    index: u32,
    kind: StreamKind,
    /// Stream units per second are `rate / scale`.
    scale: u32,
    rate: u32,
    samples: Vec<SampleEntry>,
}

impl AviStream {
    fn units_per_second(&self) -> f64 {
        f64::from(self.rate) / f64::from(self.scale.max(1))
    }
}

/// AVI demultiplexer.
///
/// The legacy flat `idx1` table, when present, provides the whole sample table up front;
/// otherwise the `movi` list is scanned once.
pub struct AviDemuxer {
    reader: Arc<Reader>,
    streams: Vec<AviStream>,
}

impl AviDemuxer {
    /// Probe check: a `RIFF` header with an `AVI ` form type.
    pub async fn can_read(reader: &Reader) -> Result<bool> {
        let mut head = match reader.slice(0, 12).await? {
            Some(head) if head.len() == 12 => head,
            _ => return Ok(false),
        };

        if &head.read_quad_bytes()? != b"RIFF" {
            return Ok(false);
        }
        head.skip(4)?;
        Ok(&head.read_quad_bytes()? == b"AVI ")
    }

    /// Open a demuxer over the stream behind `reader`.
    pub async fn open(reader: Arc<Reader>) -> Result<Arc<AviDemuxer>> {
        let mut head = match reader.slice(0, 12).await? {
            Some(head) if head.len() == 12 => head,
            _ => return invalid_format_error("avi: truncated RIFF header"),
        };

        if &head.read_quad_bytes()? != b"RIFF" {
            return invalid_format_error("avi: not a RIFF stream");
        }
        let riff_size = head.read_u32_le()?;
        if &head.read_quad_bytes()? != b"AVI " {
            return invalid_format_error("avi: not an AVI form");
        }

        let riff_end = (12 + u64::from(riff_size)).min(reader.byte_len().await?);

        let mut streams: Vec<AviStream> = Vec::new();
        let mut movi: Option<(u64, u64)> = None;
        let mut index_entries = Vec::new();
        let mut pos = 12u64;

        while pos < riff_end {
            let chunk = match read_chunk_header(&reader, pos, false).await? {
                Some(chunk) => chunk,
                None => break,
            };

            match &chunk.id {
                b"LIST" => {
                    let mut list_type = match reader.slice(chunk.data_pos, 4).await? {
                        Some(slice) if slice.len() == 4 => slice,
                        _ => break,
                    };

                    match &list_type.read_quad_bytes()? {
                        b"hdrl" => {
                            parse_hdrl(&reader, &chunk, &mut streams).await?;
                        }
                        b"movi" => {
                            // Index offsets are measured from the position of the list type.
                            movi = Some((chunk.data_pos, chunk.data_pos + u64::from(chunk.size)));
                        }
                        other => {
                            debug!("ignoring list {}", String::from_utf8_lossy(other));
                        }
                    }
                }
                b"idx1" => {
                    let mut body = match reader.slice(chunk.data_pos, u64::from(chunk.size)).await? {
                        Some(body) => body,
                        None => break,
                    };
                    while body.bytes_remaining() >= 16 {
                        let ckid = body.read_quad_bytes()?;
                        let flags = IndexFlags::from_bits_truncate(body.read_u32_le()?);
                        let offset = body.read_u32_le()?;
                        let size = body.read_u32_le()?;
                        index_entries.push((ckid, flags, offset, size));
                    }
                }
                _ => debug!("ignoring chunk {}", String::from_utf8_lossy(&chunk.id)),
            }

            pos = chunk.next_pos();
        }

        let (movi_start, movi_end) = match movi {
            Some(movi) => movi,
            None => return invalid_format_error("avi: missing movi list"),
        };

        if streams.is_empty() {
            return invalid_format_error("avi: missing stream headers");
        }

        if index_entries.is_empty() {
            scan_movi(&reader, movi_start, movi_end, &mut streams).await?;
        }
        else {
            apply_index(&reader, movi_start, &index_entries, &mut streams).await?;
        }

        Ok(Arc::new(AviDemuxer { reader, streams }))
    }

    async fn packet_by_index(
        &self,
        stream_idx: usize,
        index: usize,
        opts: PacketOptions,
    ) -> Result<Option<EncodedPacket>> {
        let stream = &self.streams[stream_idx];
        let entry = match stream.samples.get(index) {
            Some(entry) => *entry,
            None => return Ok(None),
        };

        let ups = stream.units_per_second();
        let timestamp = entry.start as f64 / ups;
        let duration = f64::from(entry.dur) / ups;
        let kind = if entry.key { PacketType::Key } else { PacketType::Delta };

        if opts.metadata_only {
            return Ok(Some(EncodedPacket::new_metadata_only(
                kind,
                timestamp,
                duration,
                index as i64,
                u64::from(entry.size),
            )));
        }

        let data = match self.reader.slice(entry.offset, u64::from(entry.size)).await? {
            Some(mut slice) => slice.read_remaining().to_vec(),
            None => return invalid_format_error("avi: chunk data out of range"),
        };

        Ok(Some(EncodedPacket::new(data, kind, timestamp, duration, index as i64)))
    }

    fn index_at_time(&self, stream_idx: usize, time: f64) -> Option<usize> {
        let stream = &self.streams[stream_idx];
        if time < 0.0 {
            return None;
        }

        let target = (time * stream.units_per_second()) as u64;
        let index = binary_search_less_or_equal(&stream.samples, target, |s| s.start)?;

        let entry = stream.samples[index];
        (target < entry.start + u64::from(entry.dur)).then_some(index)
    }
}

async fn parse_hdrl(
    reader: &Reader,
    hdrl: &ChunkHeader,
    streams: &mut Vec<AviStream>,
) -> Result<()> {
    let end = hdrl.data_pos + u64::from(hdrl.size);
    let mut pos = hdrl.data_pos + 4;

    while pos < end {
        let chunk = match read_chunk_header(reader, pos, false).await? {
            Some(chunk) => chunk,
            None => break,
        };

        if &chunk.id == b"LIST" {
            let mut list_type = match reader.slice(chunk.data_pos, 4).await? {
                Some(slice) if slice.len() == 4 => slice,
                _ => break,
            };

            if &list_type.read_quad_bytes()? == b"strl" {
                if let Some(stream) =
                    parse_strl(reader, &chunk, streams.len() as u32).await?
                {
                    streams.push(stream);
                }
            }
        }

        pos = chunk.next_pos();
    }

    Ok(())
}

async fn parse_strl(
    reader: &Reader,
    strl: &ChunkHeader,
    index: u32,
) -> Result<Option<AviStream>> {
    let end = strl.data_pos + u64::from(strl.size);
    let mut pos = strl.data_pos + 4;

    let mut fcc_type = [0u8; 4];
    let mut scale = 1u32;
    let mut rate = 1u32;
    let mut strf: Option<SliceReader> = None;

    while pos < end {
        let chunk = match read_chunk_header(reader, pos, false).await? {
            Some(chunk) => chunk,
            None => break,
        };

        match &chunk.id {
            b"strh" => {
                let mut body = match reader.slice(chunk.data_pos, u64::from(chunk.size)).await? {
                    Some(body) => body,
                    None => return invalid_format_error("avi: truncated strh"),
                };

                fcc_type = body.read_quad_bytes()?;
                // fccHandler, flags, priority+language, initialFrames.
                body.skip(16)?;
                scale = body.read_u32_le()?;
                rate = body.read_u32_le()?;
            }
            b"strf" => {
                strf = reader.slice(chunk.data_pos, u64::from(chunk.size)).await?;
            }
            _ => (),
        }

        pos = chunk.next_pos();
    }

    let mut strf = match strf {
        Some(strf) => strf,
        None => return invalid_format_error("avi: stream without strf"),
    };

    let kind = match &fcc_type {
        b"vids" => {
            // BITMAPINFOHEADER.
            strf.skip(4)?;
            let width = strf.read_i32_le()?.unsigned_abs();
            let height = strf.read_i32_le()?.unsigned_abs();
            strf.skip(4)?;
            let compression = strf.read_quad_bytes()?;

            match video_codec_from_fourcc(&compression) {
                Some(codec) => StreamKind::Video { codec, width, height },
                None => {
                    warn!(
                        "unsupported video fourcc {}",
                        String::from_utf8_lossy(&compression)
                    );
                    return Ok(None);
                }
            }
        }
        b"auds" => {
            // WAVEFORMATEX.
            let format_tag = strf.read_u16_le()?;
            let channel_count = u32::from(strf.read_u16_le()?);
            let sample_rate = strf.read_u32_le()?;
            strf.skip(6)?;
            let bits_per_sample = strf.read_u16_le()?;

            match audio_codec_from_format_tag(format_tag, bits_per_sample) {
                Some(codec) => StreamKind::Audio { codec, channel_count, sample_rate },
                None => {
                    warn!("unsupported audio format tag {:#06x}", format_tag);
                    return Ok(None);
                }
            }
        }
        other => {
            debug!("ignoring stream type {}", String::from_utf8_lossy(other));
            return Ok(None);
        }
    };

    Ok(Some(AviStream { index, kind, scale: scale.max(1), rate: rate.max(1), samples: Vec::new() }))
}

/// Static video FourCC to codec mapping.
fn video_codec_from_fourcc(fourcc: &[u8; 4]) -> Option<VideoCodec> {
    let mut upper = *fourcc;
    upper.make_ascii_uppercase();

    match &upper {
        b"H264" | b"X264" | b"AVC1" | b"DAVC" => Some(VideoCodec::Avc),
        b"H265" | b"X265" | b"HVC1" | b"HEVC" => Some(VideoCodec::Hevc),
        b"VP80" => Some(VideoCodec::Vp8),
        b"VP90" => Some(VideoCodec::Vp9),
        b"AV01" => Some(VideoCodec::Av1),
        b"FMP4" | b"MP4V" | b"XVID" | b"DIVX" | b"DX50" => Some(VideoCodec::Mpeg4),
        _ => None,
    }
}

/// Static audio format-tag to codec mapping.
fn audio_codec_from_format_tag(tag: u16, bits: u16) -> Option<AudioCodec> {
    match (tag, bits) {
        (0x0001, 8) => Some(AudioCodec::PcmU8),
        (0x0001, 16) => Some(AudioCodec::PcmS16),
        (0x0001, 24) => Some(AudioCodec::PcmS24),
        (0x0001, 32) => Some(AudioCodec::PcmS32),
        (0x0003, 32) => Some(AudioCodec::PcmF32),
        (0x0003, 64) => Some(AudioCodec::PcmF64),
        (0x0006, _) => Some(AudioCodec::Alaw),
        (0x0007, _) => Some(AudioCodec::Ulaw),
        (0x0055, _) => Some(AudioCodec::Mp3),
        (0x00ff, _) => Some(AudioCodec::Aac),
        (0x2000, _) => Some(AudioCodec::Ac3),
        _ => None,
    }
}

/// Decode the stream index from a chunk id of the form `NNdc`, `NNdb`, `NNwb`, or `NNpc`.
fn stream_of_chunk_id(ckid: &[u8; 4]) -> Option<(u32, [u8; 2])> {
    let d1 = (ckid[0] as char).to_digit(10)?;
    let d0 = (ckid[1] as char).to_digit(10)?;
    Some((d1 * 10 + d0, [ckid[2], ckid[3]]))
}

fn push_sample(stream: &mut AviStream, offset: u64, size: u32, key: bool) {
    let (start, dur) = match &stream.kind {
        // Fixed-size audio samples: position in sample units from cumulative bytes.
        StreamKind::Audio { codec, channel_count, .. } if codec.is_pcm() => {
            let block = codec.pcm_sample_size().unwrap_or(1) * (*channel_count).max(1);
            let start = stream.samples.last().map_or(0, |s| s.start + u64::from(s.dur));
            (start, size / block.max(1))
        }
        // One chunk is one stream unit (a video frame, or a compressed audio chunk).
        _ => (stream.samples.len() as u64, 1),
    };

    stream.samples.push(SampleEntry { offset, size, key, start, dur });
}

/// Populate sample tables from the flat `idx1` table.
async fn apply_index(
    reader: &Reader,
    movi_start: u64,
    entries: &[([u8; 4], IndexFlags, u32, u32)],
    streams: &mut [AviStream],
) -> Result<()> {
    // Offsets may be relative to the movi list or absolute. Probe the first data entry.
    let mut base = movi_start;
    if let Some((ckid, _, offset, _)) = entries.iter().find(|(_, f, ..)| !f.contains(IndexFlags::LIST))
    {
        if let Some(mut probe) = reader.slice(u64::from(*offset), 4).await? {
            if probe.len() == 4 && &probe.read_quad_bytes()? == ckid {
                base = 0;
                debug!("idx1 uses absolute offsets");
            }
        }
    }

    for (ckid, flags, offset, size) in entries {
        if flags.contains(IndexFlags::LIST) {
            continue;
        }

        let (stream_idx, kind) = match stream_of_chunk_id(ckid) {
            Some(decoded) => decoded,
            None => continue,
        };

        // Palette chunks carry no media data.
        if &kind == b"pc" {
            continue;
        }

        if let Some(stream) = streams.iter_mut().find(|s| s.index == stream_idx) {
            // The entry points at the chunk id; payload begins 8 bytes later.
            let payload = base + u64::from(*offset) + 8;
            push_sample(stream, payload, *size, flags.contains(IndexFlags::KEYFRAME));
        }
    }

    Ok(())
}

/// Build sample tables by scanning the `movi` list when no index is present. Every chunk is
/// conservatively treated as a key frame for audio, and as delta for video except the first.
async fn scan_movi(
    reader: &Reader,
    movi_start: u64,
    movi_end: u64,
    streams: &mut [AviStream],
) -> Result<()> {
    let mut pos = movi_start + 4;

    while pos < movi_end {
        let chunk = match read_chunk_header(reader, pos, false).await? {
            Some(chunk) => chunk,
            None => break,
        };

        if &chunk.id == b"LIST" {
            // Descend into rec lists.
            pos = chunk.data_pos + 4;
            continue;
        }

        if let Some((stream_idx, kind)) = stream_of_chunk_id(&chunk.id) {
            if &kind != b"pc" {
                if let Some(stream) = streams.iter_mut().find(|s| s.index == stream_idx) {
                    let key = match stream.kind {
                        StreamKind::Audio { .. } => true,
                        StreamKind::Video { .. } => stream.samples.is_empty(),
                    };
                    push_sample(stream, chunk.data_pos, chunk.size, key);
                }
            }
        }

        pos = chunk.next_pos();
    }

    Ok(())
}

#[async_trait]
impl Demuxer for AviDemuxer {
    fn format_info(&self) -> &'static FormatInfo {
        &AVI_FORMAT_INFO
    }

    async fn tracks(self: Arc<Self>) -> Result<Vec<InputTrack>> {
        let mut tracks = Vec::new();

        for (idx, stream) in self.streams.iter().enumerate() {
            let info = match &stream.kind {
                StreamKind::Video { codec, width, height } => TrackInfo::Video(VideoTrackInfo {
                    codec: *codec,
                    coded_width: *width,
                    coded_height: *height,
                    rotation: Default::default(),
                    color: None,
                    decoder_config: None,
                }),
                StreamKind::Audio { codec, channel_count, sample_rate } => {
                    TrackInfo::Audio(AudioTrackInfo {
                        codec: *codec,
                        channel_count: *channel_count,
                        sample_rate: *sample_rate,
                        decoder_config: None,
                    })
                }
            };

            let reader = Arc::new(AviTrackReader { demuxer: self.clone(), stream_idx: idx });

            tracks.push(InputTrack::new(
                stream.index + 1,
                info,
                "und".to_string(),
                None,
                stream.units_per_second(),
                reader,
            ));
        }

        Ok(tracks)
    }

    async fn compute_duration(self: Arc<Self>) -> Result<f64> {
        let mut duration = 0f64;
        for stream in &self.streams {
            if let Some(last) = stream.samples.last() {
                let end = (last.start + u64::from(last.dur)) as f64 / stream.units_per_second();
                duration = duration.max(end);
            }
        }
        Ok(duration)
    }

    fn dispose(&self) {
        self.reader.dispose();
    }
}

struct AviTrackReader {
    demuxer: Arc<AviDemuxer>,
    stream_idx: usize,
}

impl AviTrackReader {
    fn stream(&self) -> &AviStream {
        &self.demuxer.streams[self.stream_idx]
    }
}

#[async_trait]
impl TrackReader for AviTrackReader {
    async fn first_timestamp(&self) -> Result<f64> {
        Ok(0.0)
    }

    async fn compute_duration(&self) -> Result<f64> {
        let stream = self.stream();
        Ok(stream.samples.last().map_or(0.0, |last| {
            (last.start + u64::from(last.dur)) as f64 / stream.units_per_second()
        }))
    }

    async fn first_packet(&self, opts: PacketOptions) -> Result<Option<EncodedPacket>> {
        self.demuxer.packet_by_index(self.stream_idx, 0, opts).await
    }

    async fn packet_at(&self, time: f64, opts: PacketOptions) -> Result<Option<EncodedPacket>> {
        match self.demuxer.index_at_time(self.stream_idx, time) {
            Some(index) => self.demuxer.packet_by_index(self.stream_idx, index, opts).await,
            None => Ok(None),
        }
    }

    async fn next_packet(
        &self,
        packet: &EncodedPacket,
        opts: PacketOptions,
    ) -> Result<Option<EncodedPacket>> {
        let index = packet.sequence_number();
        if index < 0 {
            return invalid_format_error("avi: packet has no sequence number");
        }
        self.demuxer.packet_by_index(self.stream_idx, index as usize + 1, opts).await
    }

    async fn key_packet_at(&self, time: f64, opts: PacketOptions) -> Result<Option<EncodedPacket>> {
        let index = match self.demuxer.index_at_time(self.stream_idx, time) {
            Some(index) => index,
            None => return Ok(None),
        };

        // Walk back to the nearest key sample.
        let stream = self.stream();
        let key_index = (0..=index).rev().find(|&i| stream.samples[i].key);

        match key_index {
            Some(key_index) => self.demuxer.packet_by_index(self.stream_idx, key_index, opts).await,
            None => Ok(None),
        }
    }

    async fn next_key_packet(
        &self,
        packet: &EncodedPacket,
        opts: PacketOptions,
    ) -> Result<Option<EncodedPacket>> {
        let index = packet.sequence_number();
        if index < 0 {
            return invalid_format_error("avi: packet has no sequence number");
        }

        let stream = self.stream();
        let next = ((index as usize + 1)..stream.samples.len()).find(|&i| stream.samples[i].key);

        match next {
            Some(next) => self.demuxer.packet_by_index(self.stream_idx, next, opts).await,
            None => Ok(None),
        }
    }

    async fn codec_parameter_string(&self) -> Result<Option<String>> {
        Ok(Some(match &self.stream().kind {
            StreamKind::Video { codec, .. } => codec.tag().to_string(),
            StreamKind::Audio { codec, .. } => codec.tag().to_string(),
        }))
    }

    async fn decoder_config(&self) -> Result<Option<Box<[u8]>>> {
        Ok(None)
    }
}

/// The probe registration for the AVI format.
pub fn registration() -> DemuxerRegistration {
    DemuxerRegistration {
        info: &AVI_FORMAT_INFO,
        can_read: |reader| Box::pin(AviDemuxer::can_read(reader)),
        open: |reader| {
            Box::pin(async move {
                let demuxer = AviDemuxer::open(reader).await?;
                Ok(demuxer as Arc<dyn Demuxer>)
            })
        },
    }
}
