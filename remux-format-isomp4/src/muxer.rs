// Remux
// Copyright (c) 2026 The Project Remux Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use std::sync::Arc;

use async_trait::async_trait;
use log::debug;

use remux_common::mpeg::video::{annex_b_to_length_prefixed, is_annex_b, NalFraming};
use remux_core::demux::FormatInfo;
use remux_core::errors::{encoding_error, Result};
use remux_core::io::Writer;
use remux_core::mux::{Interleaver, Muxer, OutputTrackOptions};
use remux_core::packet::EncodedPacket;
use remux_core::probe::MuxerRegistration;
use remux_core::sync::AsyncMutex;
use remux_core::track::{AudioCodec, TrackInfo, VideoCodec};

use crate::atoms::{write_box, write_full_box};
use crate::stsd::build_sample_entry;
use crate::ISOMP4_FORMAT_INFO;

/// The timescale used for video tracks.
const VIDEO_TIMESCALE: u32 = 90_000;

/// The movie-header timescale.
const MOVIE_TIMESCALE: u32 = 1_000;

/// Fragment target duration in seconds, in fragmented mode.
const FRAGMENT_TARGET_SECONDS: f64 = 1.0;

/// Options for the ISOBMFF muxer.
#[derive(Clone, Copy, Default)]
pub struct Mp4MuxerOptions {
    /// Write a fragmented (`moof`/`mdat`) stream instead of a progressive file.
    pub fragmented: bool,
}

struct RecordedSample {
    offset: u64,
    size: u32,
    pts: i64,
    dur: u32,
    key: bool,
}

/// A sample buffered for the open fragment.
struct PendingSample {
    data: Vec<u8>,
    pts: i64,
    dur: u32,
    key: bool,
}

struct TrackState {
    id: u32,
    options: OutputTrackOptions,
    timescale: u32,
    /// Finished decoder configuration, possibly derived from the first packet.
    decoder_config: Option<Box<[u8]>>,
    /// Recorded samples (progressive mode).
    samples: Vec<RecordedSample>,
    /// Buffered samples of the open fragment (fragmented mode).
    pending: Vec<PendingSample>,
    end_ts: i64,
}

struct MuxState {
    writer: Writer,
    options: Mp4MuxerOptions,
    tracks: Vec<TrackState>,
    interleaver: Interleaver,
    header_written: bool,
    finalized: bool,
    mdat_size_pos: u64,
    fragment_sequence: u32,
    fragment_start: f64,
}

/// ISO Base Media File Format multiplexer.
///
/// In progressive mode, sample data is appended into one `mdat` while per-track tables
/// accumulate, and the `moov` is emitted at finalization. In fragmented mode the `moov` (with
/// `mvex`) comes first and packets are emitted as `moof`+`mdat` pairs; a new fragment begins only
/// when every open track can start with a key frame.
pub struct Mp4Muxer {
    state: AsyncMutex<MuxState>,
}

impl Mp4Muxer {
    pub fn new(writer: Writer, options: Mp4MuxerOptions) -> Arc<Mp4Muxer> {
        Arc::new(Mp4Muxer {
            state: AsyncMutex::new(MuxState {
                writer,
                options,
                tracks: Vec::new(),
                interleaver: Interleaver::new(),
                header_written: false,
                finalized: false,
                mdat_size_pos: 0,
                fragment_sequence: 1,
                fragment_start: 0.0,
            }),
        })
    }
}

fn ticks(seconds: f64, timescale: u32) -> i64 {
    (seconds * f64::from(timescale)).round() as i64
}

fn track_timescale(options: &OutputTrackOptions) -> u32 {
    match &options.info {
        TrackInfo::Audio(info) if info.sample_rate > 0 => info.sample_rate,
        _ => VIDEO_TIMESCALE,
    }
}

/// Derive a missing decoder configuration from the first packet, and normalize AVC/HEVC packet
/// framing to length prefixes.
fn prepare_sample(track: &mut TrackState, packet: &EncodedPacket) -> Result<Vec<u8>> {
    let data = packet.data();

    match &track.options.info {
        TrackInfo::Video(info) => match info.codec {
            VideoCodec::Avc | VideoCodec::Hevc => {
                let converted = if is_annex_b(data) {
                    Some(annex_b_to_length_prefixed(data)?)
                }
                else {
                    None
                };

                if track.decoder_config.is_none() {
                    let bytes = converted.as_deref().unwrap_or(data);
                    let framing = NalFraming::LengthPrefixed(4);

                    track.decoder_config = if info.codec == VideoCodec::Avc {
                        remux_common::mpeg::video::avc::AvcDecoderConfigurationRecord::
                            build_from_packet(bytes, framing)?
                        .map(|r| r.serialize().into())
                    }
                    else {
                        remux_common::mpeg::video::hevc::HevcDecoderConfigurationRecord::
                            build_from_packet(bytes, framing)?
                        .map(|r| r.serialize().into())
                    };
                }

                Ok(converted.unwrap_or_else(|| data.to_vec()))
            }
            VideoCodec::Vp9 => {
                if track.decoder_config.is_none() && packet.is_key() {
                    let frame = remux_common::vpx::Vp9FrameInfo::parse(data)?;
                    track.decoder_config = Some(build_vpcc(&frame, info.color.as_ref()).into());
                }
                Ok(data.to_vec())
            }
            VideoCodec::Av1 => {
                if track.decoder_config.is_none() {
                    if let Some(sequence) =
                        remux_common::av1::Av1SequenceInfo::find_in_packet(data)?
                    {
                        let header_obu = remux_common::av1::iter_obus(data)
                            .find(|obu| obu.obu_type == remux_common::av1::OBU_SEQUENCE_HEADER)
                            .map(|obu| obu.payload.to_vec());
                        track.decoder_config =
                            Some(build_av1c(&sequence, header_obu.as_deref()).into());
                    }
                }
                Ok(data.to_vec())
            }
            _ => Ok(data.to_vec()),
        },
        _ => Ok(data.to_vec()),
    }
}

/// Assemble a `vpcC` payload (full box header included) from a parsed VP9 key-frame header.
fn build_vpcc(
    frame: &remux_common::vpx::Vp9FrameInfo,
    color: Option<&remux_core::track::ColorSpace>,
) -> Vec<u8> {
    let mut payload = Vec::with_capacity(12);
    // Full box: version 1, no flags.
    payload.push(1);
    payload.extend_from_slice(&[0, 0, 0]);
    payload.push(frame.profile);
    payload.push(frame.level());

    let subsampling = (u8::from(frame.subsampling_x) << 1) | u8::from(frame.subsampling_y);
    let full_range = color.and_then(|c| c.full_range).unwrap_or(false);
    payload.push((frame.bit_depth << 4) | (subsampling << 1) | u8::from(full_range));

    payload.push(color.and_then(|c| c.primaries).map_or(2, |p| p.code()));
    payload.push(color.and_then(|c| c.transfer).map_or(2, |t| t.code()));
    payload.push(color.and_then(|c| c.matrix).map_or(2, |m| m.code()));
    payload.extend_from_slice(&0u16.to_be_bytes());
    payload
}

/// Assemble an `av1C` payload from a parsed sequence header.
fn build_av1c(
    sequence: &remux_common::av1::Av1SequenceInfo,
    header_obu: Option<&[u8]>,
) -> Vec<u8> {
    let mut payload = Vec::with_capacity(4);
    payload.push(0x81); // marker + version 1
    payload.push((sequence.profile << 5) | (sequence.level & 0x1f));
    payload.push(
        (u8::from(sequence.tier) << 7)
            | (u8::from(sequence.bit_depth > 8) << 6)
            | (u8::from(sequence.bit_depth == 12) << 5)
            | (u8::from(sequence.monochrome) << 4)
            | (u8::from(sequence.subsampling_x) << 3)
            | (u8::from(sequence.subsampling_y) << 2)
            | (sequence.chroma_sample_position & 0x03),
    );
    payload.push(0);

    if let Some(obu) = header_obu {
        // Re-wrap the sequence header as a sized OBU.
        payload.push((remux_common::av1::OBU_SEQUENCE_HEADER << 3) | 0x02);
        let mut len = obu.len();
        loop {
            let mut byte = (len & 0x7f) as u8;
            len >>= 7;
            if len > 0 {
                byte |= 0x80;
            }
            payload.push(byte);
            if len == 0 {
                break;
            }
        }
        payload.extend_from_slice(obu);
    }

    payload
}

fn requires_decoder_config(info: &TrackInfo) -> bool {
    matches!(
        info,
        TrackInfo::Video(video) if matches!(video.codec, VideoCodec::Mpeg4)
    ) || matches!(
        info,
        TrackInfo::Audio(audio) if audio.codec == AudioCodec::Flac
    )
}

async fn write_ftyp(state: &mut MuxState) -> Result<()> {
    let mut payload = Vec::new();
    payload.extend_from_slice(b"isom");
    payload.extend_from_slice(&0x200u32.to_be_bytes());
    for brand in [b"isom", b"iso2", b"iso6", b"mp41"] {
        payload.extend_from_slice(brand);
    }

    let mut out = Vec::new();
    write_box(&mut out, b"ftyp", &payload);
    state.writer.write(&out).await?;
    Ok(())
}

async fn write_progressive_header(state: &mut MuxState) -> Result<()> {
    write_ftyp(state).await?;

    // Open the single mdat; its size is patched during finalization.
    state.mdat_size_pos = state.writer.pos();
    state.writer.write_u32(0).await?;
    state.writer.write_ascii("mdat").await?;

    state.header_written = true;
    Ok(())
}

fn build_tkhd(track: &TrackState, movie_duration: u64) -> Vec<u8> {
    let mut payload = Vec::new();
    payload.extend_from_slice(&[0u8; 8]); // creation + modification
    payload.extend_from_slice(&track.id.to_be_bytes());
    payload.extend_from_slice(&[0u8; 4]);
    payload.extend_from_slice(&(movie_duration as u32).to_be_bytes());
    payload.extend_from_slice(&[0u8; 8]);
    payload.extend_from_slice(&0u16.to_be_bytes()); // layer
    payload.extend_from_slice(&0u16.to_be_bytes()); // alternate group
    let volume: u16 = match &track.options.info {
        TrackInfo::Audio(_) => 0x0100,
        _ => 0,
    };
    payload.extend_from_slice(&volume.to_be_bytes());
    payload.extend_from_slice(&0u16.to_be_bytes());

    // Unity matrix with the rotation in the upper-left 2x2.
    let (width, height, rotation) = match &track.options.info {
        TrackInfo::Video(video) => (video.coded_width, video.coded_height, video.rotation),
        _ => (0, 0, Default::default()),
    };
    let m = rotation.fixed_point_matrix();
    for value in [m[0], m[1], 0, m[2], m[3], 0, 0, 0, 0x4000_0000] {
        payload.extend_from_slice(&value.to_be_bytes());
    }

    payload.extend_from_slice(&(width << 16).to_be_bytes());
    payload.extend_from_slice(&(height << 16).to_be_bytes());

    let mut out = Vec::new();
    // Flags: track enabled + in movie.
    write_full_box(&mut out, b"tkhd", 0, 0x3, &payload);
    out
}

fn build_mdia(track: &TrackState, duration_ticks: u64) -> Result<Vec<u8>> {
    let mut mdhd = Vec::new();
    mdhd.extend_from_slice(&[0u8; 8]);
    mdhd.extend_from_slice(&track.timescale.to_be_bytes());
    mdhd.extend_from_slice(&(duration_ticks as u32).to_be_bytes());
    // Language: und.
    mdhd.extend_from_slice(&0x55c4u16.to_be_bytes());
    mdhd.extend_from_slice(&0u16.to_be_bytes());

    let (handler, handler_name): (&[u8; 4], &[u8]) = match &track.options.info {
        TrackInfo::Video(_) => (b"vide", b"VideoHandler\0"),
        TrackInfo::Audio(_) => (b"soun", b"SoundHandler\0"),
        TrackInfo::Subtitle(_) => (b"text", b"TextHandler\0"),
    };

    let mut hdlr = Vec::new();
    hdlr.extend_from_slice(&[0u8; 4]);
    hdlr.extend_from_slice(handler);
    hdlr.extend_from_slice(&[0u8; 12]);
    hdlr.extend_from_slice(handler_name);

    let mut minf = Vec::new();
    match &track.options.info {
        TrackInfo::Video(_) => {
            write_full_box(&mut minf, b"vmhd", 0, 1, &[0u8; 8]);
        }
        _ => {
            write_full_box(&mut minf, b"smhd", 0, 0, &[0u8; 4]);
        }
    }

    // dinf/dref: self-contained data.
    let mut dref = Vec::new();
    dref.extend_from_slice(&1u32.to_be_bytes());
    write_full_box(&mut dref, b"url ", 0, 1, &[]);
    let mut dinf = Vec::new();
    write_full_box(&mut dinf, b"dref", 0, 0, &dref);
    write_box(&mut minf, b"dinf", &dinf);

    minf.extend_from_slice(&build_stbl(track)?);

    let mut mdia = Vec::new();
    write_full_box(&mut mdia, b"mdhd", 0, 0, &mdhd);
    write_full_box(&mut mdia, b"hdlr", 0, 0, &hdlr);
    write_box(&mut mdia, b"minf", &minf);

    let mut out = Vec::new();
    write_box(&mut out, b"mdia", &mdia);
    Ok(out)
}

fn build_stbl(track: &TrackState) -> Result<Vec<u8>> {
    let mut info = track.options.info.clone();
    match &mut info {
        TrackInfo::Video(video) => video.decoder_config = track.decoder_config.clone(),
        TrackInfo::Audio(audio) => {
            if audio.decoder_config.is_none() {
                audio.decoder_config = track.decoder_config.clone();
            }
        }
        TrackInfo::Subtitle(_) => (),
    }

    let entry = build_sample_entry(&info)?;

    let mut stsd = Vec::new();
    stsd.extend_from_slice(&1u32.to_be_bytes());
    stsd.extend_from_slice(&entry);

    let mut stbl = Vec::new();
    write_full_box(&mut stbl, b"stsd", 0, 0, &stsd);

    // stts: run-length encoded decode deltas.
    let mut runs: Vec<(u32, u32)> = Vec::new();
    for sample in &track.samples {
        match runs.last_mut() {
            Some((count, dur)) if *dur == sample.dur => *count += 1,
            _ => runs.push((1, sample.dur)),
        }
    }
    let mut stts = Vec::new();
    stts.extend_from_slice(&(runs.len() as u32).to_be_bytes());
    for (count, dur) in runs {
        stts.extend_from_slice(&count.to_be_bytes());
        stts.extend_from_slice(&dur.to_be_bytes());
    }
    write_full_box(&mut stbl, b"stts", 0, 0, &stts);

    // stss: only when not every sample is a key sample.
    if track.samples.iter().any(|s| !s.key) {
        let keys: Vec<u32> = track
            .samples
            .iter()
            .enumerate()
            .filter(|(_, s)| s.key)
            .map(|(i, _)| i as u32 + 1)
            .collect();

        let mut stss = Vec::new();
        stss.extend_from_slice(&(keys.len() as u32).to_be_bytes());
        for key in keys {
            stss.extend_from_slice(&key.to_be_bytes());
        }
        write_full_box(&mut stbl, b"stss", 0, 0, &stss);
    }

    // One sample per chunk.
    let mut stsc = Vec::new();
    stsc.extend_from_slice(&1u32.to_be_bytes());
    stsc.extend_from_slice(&1u32.to_be_bytes());
    stsc.extend_from_slice(&1u32.to_be_bytes());
    stsc.extend_from_slice(&1u32.to_be_bytes());
    write_full_box(&mut stbl, b"stsc", 0, 0, &stsc);

    let mut stsz = Vec::new();
    stsz.extend_from_slice(&0u32.to_be_bytes());
    stsz.extend_from_slice(&(track.samples.len() as u32).to_be_bytes());
    for sample in &track.samples {
        stsz.extend_from_slice(&sample.size.to_be_bytes());
    }
    write_full_box(&mut stbl, b"stsz", 0, 0, &stsz);

    let use_co64 = track.samples.iter().any(|s| s.offset > u64::from(u32::MAX));
    if use_co64 {
        let mut co64 = Vec::new();
        co64.extend_from_slice(&(track.samples.len() as u32).to_be_bytes());
        for sample in &track.samples {
            co64.extend_from_slice(&sample.offset.to_be_bytes());
        }
        write_full_box(&mut stbl, b"co64", 0, 0, &co64);
    }
    else {
        let mut stco = Vec::new();
        stco.extend_from_slice(&(track.samples.len() as u32).to_be_bytes());
        for sample in &track.samples {
            stco.extend_from_slice(&(sample.offset as u32).to_be_bytes());
        }
        write_full_box(&mut stbl, b"stco", 0, 0, &stco);
    }

    let mut out = Vec::new();
    write_box(&mut out, b"stbl", &stbl);
    Ok(out)
}

fn build_moov(state: &MuxState, fragmented: bool) -> Result<Vec<u8>> {
    let movie_duration = state
        .tracks
        .iter()
        .map(|t| {
            (t.end_ts.max(0) as f64 / f64::from(t.timescale) * f64::from(MOVIE_TIMESCALE)) as u64
        })
        .max()
        .unwrap_or(0);

    let mut mvhd = Vec::new();
    mvhd.extend_from_slice(&[0u8; 8]);
    mvhd.extend_from_slice(&MOVIE_TIMESCALE.to_be_bytes());
    mvhd.extend_from_slice(&(movie_duration as u32).to_be_bytes());
    mvhd.extend_from_slice(&0x0001_0000u32.to_be_bytes()); // rate
    mvhd.extend_from_slice(&0x0100u16.to_be_bytes()); // volume
    mvhd.extend_from_slice(&[0u8; 10]);
    for value in [0x0001_0000u32, 0, 0, 0, 0x0001_0000, 0, 0, 0, 0x4000_0000] {
        mvhd.extend_from_slice(&value.to_be_bytes());
    }
    mvhd.extend_from_slice(&[0u8; 24]);
    mvhd.extend_from_slice(&(state.tracks.len() as u32 + 1).to_be_bytes());

    let mut moov = Vec::new();
    write_full_box(&mut moov, b"mvhd", 0, 0, &mvhd);

    for track in &state.tracks {
        let duration_ticks = track.end_ts.max(0) as u64;

        let mut trak = Vec::new();
        trak.extend_from_slice(&build_tkhd(track, movie_duration));
        trak.extend_from_slice(&build_mdia(track, duration_ticks)?);

        let mut out = Vec::new();
        write_box(&mut out, b"trak", &trak);
        moov.extend_from_slice(&out);
    }

    if fragmented {
        let mut mvex = Vec::new();
        for track in &state.tracks {
            let mut trex = Vec::new();
            trex.extend_from_slice(&track.id.to_be_bytes());
            trex.extend_from_slice(&1u32.to_be_bytes()); // sample description index
            trex.extend_from_slice(&0u32.to_be_bytes()); // default duration
            trex.extend_from_slice(&0u32.to_be_bytes()); // default size
            trex.extend_from_slice(&0x0001_0000u32.to_be_bytes()); // non-sync default
            write_full_box(&mut mvex, b"trex", 0, 0, &trex);
        }
        write_box(&mut moov, b"mvex", &mvex);
    }

    let mut out = Vec::new();
    write_box(&mut out, b"moov", &moov);
    Ok(out)
}

async fn write_fragmented_header(state: &mut MuxState) -> Result<()> {
    write_ftyp(state).await?;
    let moov = build_moov(state, true)?;
    state.writer.write(&moov).await?;
    state.header_written = true;
    Ok(())
}

/// Emit the buffered samples as one `moof`+`mdat` pair.
async fn flush_fragment(state: &mut MuxState) -> Result<()> {
    if state.tracks.iter().all(|t| t.pending.is_empty()) {
        return Ok(());
    }

    let sequence = state.fragment_sequence;
    state.fragment_sequence += 1;

    // Lay out the mdat: samples per track, in track order.
    let mut data = Vec::new();
    let mut track_layout = Vec::new();

    for track in &state.tracks {
        let start = data.len();
        for sample in &track.pending {
            data.extend_from_slice(&sample.data);
        }
        track_layout.push(start);
    }

    // The moof is assembled twice: once to learn its size, then with final data offsets. The
    // trun data offset is relative to the start of the moof.
    let build = |state: &MuxState, moof_len: usize| -> Vec<u8> {
        let mut moof = Vec::new();

        let mut mfhd = Vec::new();
        mfhd.extend_from_slice(&sequence.to_be_bytes());
        write_full_box(&mut moof, b"mfhd", 0, 0, &mfhd);

        for (track, &layout_start) in state.tracks.iter().zip(&track_layout) {
            if track.pending.is_empty() {
                continue;
            }

            let mut traf = Vec::new();

            // tfhd: default-base-is-moof.
            let mut tfhd = Vec::new();
            tfhd.extend_from_slice(&track.id.to_be_bytes());
            write_full_box(&mut traf, b"tfhd", 0, 0x20000, &tfhd);

            // tfdt: the decode time of the first pending sample.
            let mut tfdt = Vec::new();
            let base = track.pending.first().map_or(0, |s| s.pts.max(0) as u64);
            tfdt.extend_from_slice(&base.to_be_bytes());
            write_full_box(&mut traf, b"tfdt", 1, 0, &tfdt);

            // trun: data offset, per-sample duration, size, and flags.
            let mut trun = Vec::new();
            trun.extend_from_slice(&(track.pending.len() as u32).to_be_bytes());
            let data_offset = moof_len + 8 + layout_start;
            trun.extend_from_slice(&(data_offset as i32).to_be_bytes());
            for sample in &track.pending {
                trun.extend_from_slice(&sample.dur.to_be_bytes());
                trun.extend_from_slice(&(sample.data.len() as u32).to_be_bytes());
                let flags: u32 = if sample.key { 0x0200_0000 } else { 0x0101_0000 };
                trun.extend_from_slice(&flags.to_be_bytes());
            }
            write_full_box(&mut traf, b"trun", 0, 0x1 | 0x100 | 0x200 | 0x400, &trun);

            let mut out = Vec::new();
            write_box(&mut out, b"traf", &traf);
            moof.extend_from_slice(&out);
        }

        let mut out = Vec::new();
        write_box(&mut out, b"moof", &moof);
        out
    };

    let probe = build(state, 0);
    let moof = build(state, probe.len());
    debug_assert_eq!(probe.len(), moof.len());

    state.writer.write(&moof).await?;

    let mut mdat = Vec::new();
    write_box(&mut mdat, b"mdat", &data);
    state.writer.write(&mdat).await?;

    debug!("flushed fragment {} ({} bytes)", sequence, moof.len() + mdat.len());

    for track in &mut state.tracks {
        track.pending.clear();
    }

    Ok(())
}

async fn drain(state: &mut MuxState, force: bool) -> Result<()> {
    loop {
        if !force && !state.interleaver.ready() {
            break;
        }

        if state.options.fragmented {
            // Close the open fragment at a key boundary past the target duration.
            if let Some((_, ts)) = state.interleaver.peek() {
                if ts - state.fragment_start >= FRAGMENT_TARGET_SECONDS
                    && state.interleaver.all_heads_key()
                    && state.tracks.iter().any(|t| !t.pending.is_empty())
                {
                    flush_fragment(state).await?;
                    state.fragment_start = ts;
                }
            }
        }

        let (track_id, packet) = match state.interleaver.pop() {
            Some(popped) => popped,
            None => break,
        };

        let track_idx = state
            .tracks
            .iter()
            .position(|t| t.id == track_id)
            .expect("packet for unknown track");

        let data = prepare_sample(&mut state.tracks[track_idx], &packet)?;
        let track = &mut state.tracks[track_idx];
        let pts = ticks(packet.timestamp(), track.timescale);
        let dur = ticks(packet.duration(), track.timescale).max(0) as u32;
        track.end_ts = track.end_ts.max(pts + i64::from(dur));

        if state.options.fragmented {
            state.tracks[track_idx].pending.push(PendingSample {
                data,
                pts,
                dur,
                key: packet.is_key(),
            });
        }
        else {
            let offset = state.writer.pos();
            state.writer.write(&data).await?;
            state.tracks[track_idx].samples.push(RecordedSample {
                offset,
                size: data.len() as u32,
                pts,
                dur,
                key: packet.is_key(),
            });
        }
    }

    Ok(())
}

#[async_trait]
impl Muxer for Mp4Muxer {
    fn format_info(&self) -> &'static FormatInfo {
        &ISOMP4_FORMAT_INFO
    }

    async fn start(&self) -> Result<()> {
        Ok(())
    }

    async fn add_track(&self, options: OutputTrackOptions) -> Result<u32> {
        let mut state = self.state.lock().await;

        if state.header_written {
            return encoding_error("isomp4: tracks must be added before the first packet");
        }

        if options.info.decoder_config().is_none() && requires_decoder_config(&options.info) {
            return encoding_error("isomp4: codec requires a decoder configuration");
        }
        if matches!(options.info, TrackInfo::Subtitle(_)) {
            return encoding_error("isomp4: subtitle tracks are not written");
        }

        let id = state.tracks.len() as u32 + 1;
        let timescale = track_timescale(&options);
        let decoder_config = options.info.decoder_config().map(Box::from);

        state.tracks.push(TrackState {
            id,
            options,
            timescale,
            decoder_config,
            samples: Vec::new(),
            pending: Vec::new(),
            end_ts: 0,
        });
        state.interleaver.add_track(id);

        Ok(id)
    }

    async fn write_packet(&self, track_id: u32, packet: &EncodedPacket) -> Result<()> {
        let mut state = self.state.lock().await;

        if state.finalized {
            return encoding_error("isomp4: output already finalized");
        }
        if packet.is_metadata_only() {
            return encoding_error("isomp4: cannot write a metadata-only packet");
        }

        if !state.header_written {
            if state.options.fragmented {
                // The fragmented header needs decoder configurations; derive missing ones from
                // this first packet before the moov is written.
                let track_idx = state.tracks.iter().position(|t| t.id == track_id);
                if let Some(track_idx) = track_idx {
                    prepare_sample(&mut state.tracks[track_idx], packet)?;
                }
                write_fragmented_header(&mut state).await?;
            }
            else {
                write_progressive_header(&mut state).await?;
            }
        }

        state.interleaver.push(track_id, packet.clone())?;
        drain(&mut state, false).await
    }

    async fn finalize(&self) -> Result<()> {
        let mut state = self.state.lock().await;

        if state.finalized {
            return Ok(());
        }

        if !state.header_written {
            if state.options.fragmented {
                write_fragmented_header(&mut state).await?;
            }
            else {
                write_progressive_header(&mut state).await?;
            }
        }

        state.interleaver.close_all();
        drain(&mut state, true).await?;

        if state.options.fragmented {
            flush_fragment(&mut state).await?;
        }
        else {
            // Patch the mdat size, then append the moov.
            let end = state.writer.pos();
            let mdat_size_pos = state.mdat_size_pos;
            state.writer.seek(mdat_size_pos)?;
            state.writer.write_u32((end - mdat_size_pos) as u32).await?;
            state.writer.seek(end)?;

            let moov = build_moov(&state, false)?;
            state.writer.write(&moov).await?;
        }

        state.finalized = true;
        state.writer.flush().await
    }
}

/// The registry entry for the ISOBMFF output format.
pub fn registration() -> MuxerRegistration {
    MuxerRegistration {
        info: &ISOMP4_FORMAT_INFO,
        new_muxer: |writer| Ok(Mp4Muxer::new(writer, Mp4MuxerOptions::default()) as _),
    }
}
