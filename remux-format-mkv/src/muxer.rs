// Remux
// Copyright (c) 2026 The Project Remux Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use std::sync::Arc;

use async_trait::async_trait;
use log::debug;

use remux_core::demux::FormatInfo;
use remux_core::errors::{encoding_error, Result};
use remux_core::io::Writer;
use remux_core::mux::{Interleaver, Muxer, OutputTrackOptions};
use remux_core::packet::EncodedPacket;
use remux_core::probe::MuxerRegistration;
use remux_core::sync::AsyncMutex;
use remux_core::track::{AudioCodec, Codec, ColorSpace, MatrixCoefficients, TrackInfo, VideoCodec};

use crate::codecs::codec_id_of;
use crate::ebml::{
    write_element, write_float_element, write_id, write_size, write_size_wide,
    write_string_element, write_unknown_size, write_unsigned_element,
};
use crate::element_ids as ids;
use crate::MKV_FORMAT_INFO;

/// Nanoseconds per timestamp tick written by this muxer (the Matroska default scale: one tick is
/// one millisecond).
const TIMESTAMP_SCALE_NS: u64 = 1_000_000;

/// The hard limit on a cluster's span: relative block timestamps are signed 16-bit ticks.
const MAX_CLUSTER_SPAN_TICKS: i64 = i16::MAX as i64;

/// A new cluster is begun at a key-frame boundary once the open one spans this many ticks.
const TARGET_CLUSTER_SPAN_TICKS: i64 = 1_000;

/// Bytes reserved for the seek head at the front of the segment.
const SEEK_HEAD_RESERVED: usize = 80;

struct TrackState {
    /// Matroska track number (1-based).
    number: u64,
    options: OutputTrackOptions,
}

struct MuxState {
    writer: Writer,
    tracks: Vec<TrackState>,
    interleaver: Interleaver,
    header_written: bool,
    finalized: bool,
    // Patch positions recorded while writing the header.
    segment_size_pos: u64,
    segment_data_pos: u64,
    seek_head_pos: u64,
    duration_pos: u64,
    info_pos: u64,
    tracks_pos: u64,
    // Open cluster state.
    cluster_start_pos: Option<u64>,
    cluster_size_pos: u64,
    cluster_ts: i64,
    /// Largest block end timestamp written, in ticks.
    max_end_ts: i64,
    /// Cue entries `(time_ticks, cluster_pos_rel)`, one per cluster.
    cues: Vec<(u64, u64)>,
}

/// Matroska/WebM multiplexer.
///
/// Cluster creation is gated on "key frame queued everywhere": a new cluster begins only when
/// every open track's next queued packet is a key frame, keeping every cluster seekable. On
/// finalize the segment size, duration, seek head, and cues are back-patched; on unseekable
/// targets the segment and clusters are written sizeless and the patches are skipped.
pub struct MkvMuxer {
    state: AsyncMutex<MuxState>,
}

impl MkvMuxer {
    pub fn new(writer: Writer) -> Arc<MkvMuxer> {
        Arc::new(MkvMuxer {
            state: AsyncMutex::new(MuxState {
                writer,
                tracks: Vec::new(),
                interleaver: Interleaver::new(),
                header_written: false,
                finalized: false,
                segment_size_pos: 0,
                segment_data_pos: 0,
                seek_head_pos: 0,
                duration_pos: 0,
                info_pos: 0,
                tracks_pos: 0,
                cluster_start_pos: None,
                cluster_size_pos: 0,
                cluster_ts: 0,
                max_end_ts: 0,
                cues: Vec::new(),
            }),
        })
    }
}

fn seconds_to_ticks(seconds: f64) -> i64 {
    (seconds * 1e9 / TIMESTAMP_SCALE_NS as f64).round() as i64
}

fn build_ebml_header(webm: bool) -> Vec<u8> {
    let mut payload = Vec::new();
    write_unsigned_element(&mut payload, ids::EBML_VERSION, 1);
    write_unsigned_element(&mut payload, ids::EBML_READ_VERSION, 1);
    write_unsigned_element(&mut payload, ids::EBML_MAX_ID_LENGTH, 4);
    write_unsigned_element(&mut payload, ids::EBML_MAX_SIZE_LENGTH, 8);
    write_string_element(&mut payload, ids::DOC_TYPE, if webm { "webm" } else { "matroska" });
    write_unsigned_element(&mut payload, ids::DOC_TYPE_VERSION, 4);
    write_unsigned_element(&mut payload, ids::DOC_TYPE_READ_VERSION, 2);

    let mut out = Vec::new();
    write_element(&mut out, ids::EBML, &payload);
    out
}

fn requires_decoder_config(codec: Codec) -> bool {
    matches!(
        codec,
        Codec::Video(VideoCodec::Avc)
            | Codec::Video(VideoCodec::Hevc)
            | Codec::Audio(AudioCodec::Vorbis)
    )
}

fn build_track_entry(track: &TrackState) -> Result<Vec<u8>> {
    let info = &track.options.info;

    let codec_id = match codec_id_of(info.codec()) {
        Some(id) => id,
        None => return encoding_error("mkv: codec cannot be stored in matroska"),
    };

    let mut entry = Vec::new();
    write_unsigned_element(&mut entry, ids::TRACK_NUMBER, track.number);
    write_unsigned_element(&mut entry, ids::TRACK_UID, track.number);

    let track_type = match info {
        TrackInfo::Video(_) => 1,
        TrackInfo::Audio(_) => 2,
        TrackInfo::Subtitle(_) => 17,
    };
    write_unsigned_element(&mut entry, ids::TRACK_TYPE, track_type);
    write_unsigned_element(&mut entry, ids::FLAG_LACING, 0);

    if let Some(language) = &track.options.language {
        write_string_element(&mut entry, ids::LANGUAGE, language);
    }
    if let Some(name) = &track.options.name {
        write_string_element(&mut entry, ids::NAME, name);
    }

    write_string_element(&mut entry, ids::CODEC_ID, codec_id);

    if let Some(config) = info.decoder_config() {
        write_element(&mut entry, ids::CODEC_PRIVATE, config);
    }
    else if requires_decoder_config(info.codec()) {
        return encoding_error("mkv: codec requires a decoder configuration");
    }

    match info {
        TrackInfo::Video(video) => {
            if let Some(rate) = track.options.frame_rate {
                if rate > 0.0 {
                    write_unsigned_element(
                        &mut entry,
                        ids::DEFAULT_DURATION,
                        (1e9 / rate).round() as u64,
                    );
                }
            }

            let mut payload = Vec::new();
            write_unsigned_element(&mut payload, ids::PIXEL_WIDTH, u64::from(video.coded_width));
            write_unsigned_element(&mut payload, ids::PIXEL_HEIGHT, u64::from(video.coded_height));

            if let Some(color) = &video.color {
                let mut colour = Vec::new();
                if let Some(matrix) = color.matrix {
                    write_unsigned_element(
                        &mut colour,
                        ids::MATRIX_COEFFICIENTS,
                        u64::from(matrix.code()),
                    );
                }
                if let Some(transfer) = color.transfer {
                    write_unsigned_element(
                        &mut colour,
                        ids::TRANSFER_CHARACTERISTICS,
                        u64::from(transfer.code()),
                    );
                }
                if let Some(primaries) = color.primaries {
                    write_unsigned_element(
                        &mut colour,
                        ids::PRIMARIES,
                        u64::from(primaries.code()),
                    );
                }
                if let Some(full_range) = color.full_range {
                    write_unsigned_element(&mut colour, ids::RANGE, if full_range { 2 } else { 1 });
                }
                if !colour.is_empty() {
                    write_element(&mut payload, ids::COLOUR, &colour);
                }
            }

            if video.rotation != remux_core::track::Rotation::None {
                // The projection pose roll stores counter-clockwise degrees.
                let mut projection = Vec::new();
                write_unsigned_element(&mut projection, ids::PROJECTION_TYPE, 0);
                write_float_element(
                    &mut projection,
                    ids::PROJECTION_POSE_ROLL,
                    -(video.rotation.degrees() as f64),
                );
                write_element(&mut payload, ids::PROJECTION, &projection);
            }

            write_element(&mut entry, ids::VIDEO, &payload);
        }
        TrackInfo::Audio(audio) => {
            let mut payload = Vec::new();
            write_float_element(
                &mut payload,
                ids::SAMPLING_FREQUENCY,
                f64::from(audio.sample_rate),
            );
            write_unsigned_element(&mut payload, ids::CHANNELS, u64::from(audio.channel_count));
            write_element(&mut entry, ids::AUDIO, &payload);
        }
        TrackInfo::Subtitle(_) => (),
    }

    let mut out = Vec::new();
    write_element(&mut out, ids::TRACK_ENTRY, &entry);
    Ok(out)
}

async fn write_header(state: &mut MuxState) -> Result<()> {
    let webm = !state.tracks.is_empty()
        && state.tracks.iter().all(|t| {
            matches!(
                t.options.info.codec(),
                Codec::Video(VideoCodec::Vp8)
                    | Codec::Video(VideoCodec::Vp9)
                    | Codec::Video(VideoCodec::Av1)
                    | Codec::Audio(AudioCodec::Opus)
                    | Codec::Audio(AudioCodec::Vorbis)
            )
        });

    let header = build_ebml_header(webm);
    state.writer.write(&header).await?;

    // Segment with a patchable (or, when streaming, unknown) size.
    let mut segment_head = Vec::new();
    write_id(&mut segment_head, ids::SEGMENT);
    state.writer.write(&segment_head).await?;

    state.segment_size_pos = state.writer.pos();
    let mut size = Vec::new();
    if state.writer.is_seekable() {
        write_size_wide(&mut size, 0);
    }
    else {
        write_unknown_size(&mut size);
    }
    state.writer.write(&size).await?;
    state.segment_data_pos = state.writer.pos();

    // Reserve space for the seek head, rewritten during finalization.
    state.seek_head_pos = state.writer.pos();
    let mut void = Vec::new();
    write_id(&mut void, ids::VOID);
    write_size(&mut void, SEEK_HEAD_RESERVED as u64);
    void.extend_from_slice(&[0u8; SEEK_HEAD_RESERVED]);
    state.writer.write(&void).await?;

    // Info, with a patchable duration. The duration element is written last within the payload
    // so its value bytes sit at a computable offset.
    state.info_pos = state.writer.pos();

    let mut info = Vec::new();
    write_unsigned_element(&mut info, ids::TIMESTAMP_SCALE, TIMESTAMP_SCALE_NS);
    write_string_element(&mut info, ids::MUXING_APP, "remux");
    write_string_element(&mut info, ids::WRITING_APP, "remux");
    write_float_element(&mut info, ids::DURATION, 0.0);

    let mut out = Vec::new();
    write_element(&mut out, ids::INFO, &info);
    // The eight duration value bytes are the final bytes of the info element.
    state.duration_pos = state.info_pos + out.len() as u64 - 8;
    state.writer.write(&out).await?;

    // Tracks.
    state.tracks_pos = state.writer.pos();
    let mut tracks_payload = Vec::new();
    for track in &state.tracks {
        tracks_payload.extend_from_slice(&build_track_entry(track)?);
    }
    let mut out = Vec::new();
    write_element(&mut out, ids::TRACKS, &tracks_payload);
    state.writer.write(&out).await?;

    state.header_written = true;
    Ok(())
}

async fn close_cluster(state: &mut MuxState) -> Result<()> {
    if state.cluster_start_pos.take().is_none() {
        return Ok(());
    }

    if state.writer.is_seekable() {
        let end = state.writer.pos();
        let payload_len = end - state.cluster_size_pos - 8;
        let mut size = Vec::new();
        write_size_wide(&mut size, payload_len);

        state.writer.seek(state.cluster_size_pos)?;
        state.writer.write(&size).await?;
        state.writer.seek(end)?;
    }

    Ok(())
}

async fn open_cluster(state: &mut MuxState, ts: i64) -> Result<()> {
    let pos = state.writer.pos();

    let mut head = Vec::new();
    write_id(&mut head, ids::CLUSTER);
    state.writer.write(&head).await?;

    state.cluster_size_pos = state.writer.pos();
    let mut size = Vec::new();
    if state.writer.is_seekable() {
        write_size_wide(&mut size, 0);
    }
    else {
        write_unknown_size(&mut size);
    }
    state.writer.write(&size).await?;

    let mut ts_element = Vec::new();
    write_unsigned_element(&mut ts_element, ids::TIMESTAMP, ts.max(0) as u64);
    state.writer.write(&ts_element).await?;

    state.cluster_start_pos = Some(pos);
    state.cluster_ts = ts.max(0);
    state.cues.push((ts.max(0) as u64, pos - state.segment_data_pos));

    debug!("opened cluster at {} (ts {} ticks)", pos, ts);
    Ok(())
}

async fn write_simple_block(
    state: &mut MuxState,
    track_number: u64,
    packet: &EncodedPacket,
    data: &[u8],
) -> Result<()> {
    let ts = seconds_to_ticks(packet.timestamp());
    let rel = ts - state.cluster_ts;

    if rel > MAX_CLUSTER_SPAN_TICKS || rel < i64::from(i16::MIN) {
        return encoding_error("mkv: block timestamp exceeds the cluster span limit");
    }

    let mut payload = Vec::new();
    // Track numbers written by this muxer stay below 127: one marker byte.
    payload.push(0x80 | track_number as u8);
    payload.extend_from_slice(&(rel as i16).to_be_bytes());
    payload.push(if packet.is_key() { 0x80 } else { 0x00 });
    payload.extend_from_slice(data);

    let mut out = Vec::new();
    write_element(&mut out, ids::SIMPLE_BLOCK, &payload);
    state.writer.write(&out).await?;

    state.max_end_ts = state.max_end_ts.max(ts + seconds_to_ticks(packet.duration()));
    Ok(())
}

/// Rewrite the colour-space bits of a VP9 profile-0 key-frame header. Some encoders emit
/// `UNKNOWN` even when the colour space is signalled out of band.
fn patch_vp9_color(frame: &mut [u8], color: &ColorSpace) {
    if frame.len() < 5 {
        return;
    }

    // Profile-0 uncompressed header layout: marker(2) profile(2) show_existing(1) frame_type(1)
    // show_frame(1) error_resilient(1), then the 24-bit sync code. The colour space code is the
    // top three bits of the following byte. Other profiles shift the field off byte alignment
    // and are left untouched.
    if frame[0] & 0xc0 != 0x80 || frame[0] & 0x30 != 0 {
        return;
    }
    if frame[1..4] != [0x49, 0x83, 0x42] {
        return;
    }
    if frame[4] >> 5 != 0 {
        return;
    }

    let code: u8 = match color.matrix {
        Some(MatrixCoefficients::Bt709) => 2,
        Some(MatrixCoefficients::Bt470bg) | Some(MatrixCoefficients::Smpte170m) => 3,
        Some(MatrixCoefficients::Bt2020Ncl) => 5,
        _ => return,
    };

    frame[4] = (frame[4] & 0x1f) | (code << 5);
}

async fn drain(state: &mut MuxState, force: bool) -> Result<()> {
    loop {
        if !force && !state.interleaver.ready() {
            break;
        }

        // Decide whether a cluster boundary is due before popping.
        let next_ts = match state.interleaver.peek() {
            Some((_, ts)) => seconds_to_ticks(ts),
            None => break,
        };

        let span = next_ts - state.cluster_ts;
        let over_span = state.cluster_start_pos.is_some() && span > MAX_CLUSTER_SPAN_TICKS;

        let needs_new = state.cluster_start_pos.is_none()
            || over_span
            || (span >= TARGET_CLUSTER_SPAN_TICKS && state.interleaver.all_heads_key());

        if over_span && !state.interleaver.all_heads_key() && !force {
            // Exceeding the representable cluster span with a delta frame at the head cannot
            // produce a valid file.
            return encoding_error("mkv: cluster span exceeds the 2^15 ms limit");
        }

        if needs_new {
            close_cluster(state).await?;
            open_cluster(state, next_ts).await?;
        }

        let (track_id, packet) = match state.interleaver.pop() {
            Some(popped) => popped,
            None => break,
        };

        let track = state
            .tracks
            .iter()
            .find(|t| t.number == u64::from(track_id))
            .expect("packet for unknown track");
        let track_number = track.number;

        // Patch the VP9 colour space into the raw frame bytes when needed.
        let vp9_color = match &track.options.info {
            TrackInfo::Video(info) if info.codec == VideoCodec::Vp9 && packet.is_key() => {
                info.color.clone()
            }
            _ => None,
        };

        match vp9_color {
            Some(color) => {
                let mut data = packet.data().to_vec();
                patch_vp9_color(&mut data, &color);
                write_simple_block(state, track_number, &packet, &data).await?;
            }
            None => {
                let data = packet.shared_data();
                write_simple_block(state, track_number, &packet, &data).await?;
            }
        }
    }

    Ok(())
}

fn build_seek_head(state: &MuxState, cues_pos: u64) -> Vec<u8> {
    let mut payload = Vec::new();

    for (id, pos) in [
        (ids::INFO, state.info_pos),
        (ids::TRACKS, state.tracks_pos),
        (ids::CUES, cues_pos),
    ] {
        let mut seek = Vec::new();

        let mut seek_id = Vec::new();
        write_id(&mut seek_id, id);
        write_element(&mut seek, ids::SEEK_ID, &seek_id);
        write_unsigned_element(&mut seek, ids::SEEK_POSITION, pos - state.segment_data_pos);

        write_element(&mut payload, ids::SEEK, &seek);
    }

    let mut out = Vec::new();
    write_element(&mut out, ids::SEEK_HEAD, &payload);
    out
}

#[async_trait]
impl Muxer for MkvMuxer {
    fn format_info(&self) -> &'static FormatInfo {
        &MKV_FORMAT_INFO
    }

    async fn start(&self) -> Result<()> {
        Ok(())
    }

    async fn add_track(&self, options: OutputTrackOptions) -> Result<u32> {
        let mut state = self.state.lock().await;

        if state.header_written {
            return encoding_error("mkv: tracks must be added before the first packet");
        }

        if codec_id_of(options.info.codec()).is_none() {
            return encoding_error("mkv: codec cannot be stored in matroska");
        }
        if options.info.decoder_config().is_none() && requires_decoder_config(options.info.codec())
        {
            return encoding_error("mkv: codec requires a decoder configuration");
        }

        let number = state.tracks.len() as u64 + 1;
        state.tracks.push(TrackState { number, options });
        state.interleaver.add_track(number as u32);

        Ok(number as u32)
    }

    async fn write_packet(&self, track_id: u32, packet: &EncodedPacket) -> Result<()> {
        let mut state = self.state.lock().await;

        if state.finalized {
            return encoding_error("mkv: output already finalized");
        }
        if packet.is_metadata_only() {
            return encoding_error("mkv: cannot write a metadata-only packet");
        }

        if !state.header_written {
            write_header(&mut state).await?;
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
            write_header(&mut state).await?;
        }

        state.interleaver.close_all();
        drain(&mut state, true).await?;
        close_cluster(&mut state).await?;
        state.finalized = true;

        // Cues: one point per cluster against the first track.
        let cues_pos = state.writer.pos();
        let first_track = state.tracks.first().map_or(1, |t| t.number);

        let mut cues_payload = Vec::new();
        for &(time, cluster_pos) in &state.cues {
            let mut point = Vec::new();
            write_unsigned_element(&mut point, ids::CUE_TIME, time);

            let mut positions = Vec::new();
            write_unsigned_element(&mut positions, ids::CUE_TRACK, first_track);
            write_unsigned_element(&mut positions, ids::CUE_CLUSTER_POSITION, cluster_pos);
            write_element(&mut point, ids::CUE_TRACK_POSITIONS, &positions);

            write_element(&mut cues_payload, ids::CUE_POINT, &point);
        }

        let mut cues_out = Vec::new();
        write_element(&mut cues_out, ids::CUES, &cues_payload);
        state.writer.write(&cues_out).await?;

        let end = state.writer.pos();

        if state.writer.is_seekable() {
            // Patch the segment size.
            let segment_size_pos = state.segment_size_pos;
            let mut size = Vec::new();
            write_size_wide(&mut size, end - state.segment_data_pos);
            state.writer.seek(segment_size_pos)?;
            state.writer.write(&size).await?;

            // Patch the duration.
            let duration_pos = state.duration_pos;
            let duration_ticks = state.max_end_ts.max(0) as f64;
            state.writer.seek(duration_pos)?;
            state.writer.write(&duration_ticks.to_be_bytes()).await?;

            // Rewrite the reserved void as the seek head, re-voiding the remainder.
            let seek_head = build_seek_head(&state, cues_pos);
            debug_assert!(seek_head.len() + 2 <= SEEK_HEAD_RESERVED + 2);

            let seek_head_pos = state.seek_head_pos;
            state.writer.seek(seek_head_pos)?;
            state.writer.write(&seek_head).await?;

            let used = seek_head.len();
            let remainder = (SEEK_HEAD_RESERVED + 2).saturating_sub(used);
            if remainder >= 2 {
                let mut void = Vec::new();
                write_id(&mut void, ids::VOID);
                write_size(&mut void, (remainder - 2) as u64);
                void.resize(remainder, 0);
                state.writer.write(&void).await?;
            }

            state.writer.seek(end)?;
        }

        state.writer.flush().await
    }
}

/// The registry entry for the Matroska output format.
pub fn registration() -> MuxerRegistration {
    MuxerRegistration { info: &MKV_FORMAT_INFO, new_muxer: |writer| Ok(MkvMuxer::new(writer) as _) }
}
