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
use remux_core::track::{AudioCodec, TrackInfo, VideoCodec};
use remux_core::util::num::approximate_rational;

use super::{IndexFlags, MainHeaderFlags};
use crate::AVI_FORMAT_INFO;

struct TrackState {
    /// Zero-based AVI stream index.
    stream_index: u32,
    info: TrackInfo,
    /// `rate / scale` stream units per second.
    scale: u32,
    rate: u32,
    /// File position of the stream's `strh` payload, for back-patching.
    strh_pos: u64,
    /// Chunks written (video frames / audio chunks).
    chunks: u32,
    /// Audio samples written, for fixed-size streams.
    samples: u64,
    max_chunk: u32,
    bytes: u64,
}

impl TrackState {
    fn chunk_id(&self) -> [u8; 4] {
        let suffix: &[u8; 2] = match self.info {
            TrackInfo::Video(_) => b"dc",
            _ => b"wb",
        };
        [
            b'0' + (self.stream_index / 10) as u8,
            b'0' + (self.stream_index % 10) as u8,
            suffix[0],
            suffix[1],
        ]
    }
}

struct IdxEntry {
    ckid: [u8; 4],
    flags: IndexFlags,
    /// Offset from the start of the `movi` list to the chunk id.
    offset: u32,
    size: u32,
}

struct MuxState {
    writer: Writer,
    tracks: Vec<TrackState>,
    interleaver: Interleaver,
    header_written: bool,
    finalized: bool,
    /// Patch positions recorded while writing the header.
    riff_size_pos: u64,
    avih_pos: u64,
    movi_size_pos: u64,
    /// Position of the `movi` list type fourcc; index offsets count from here.
    movi_start: u64,
    index: Vec<IdxEntry>,
}

/// AVI multiplexer.
///
/// Writes the RIFF header with placeholder `hdrl` fields, appends interleaved data chunks into
/// the `movi` list while recording a flat `idx1` table, and back-patches every header field on
/// finalize.
pub struct AviMuxer {
    state: AsyncMutex<MuxState>,
}

impl AviMuxer {
    pub fn new(writer: Writer) -> Arc<AviMuxer> {
        Arc::new(AviMuxer {
            state: AsyncMutex::new(MuxState {
                writer,
                tracks: Vec::new(),
                interleaver: Interleaver::new(),
                header_written: false,
                finalized: false,
                riff_size_pos: 0,
                avih_pos: 0,
                movi_size_pos: 0,
                movi_start: 0,
                index: Vec::new(),
            }),
        })
    }
}

const AVIH_LEN: u32 = 56;
const STRH_LEN: u32 = 56;

async fn write_header(state: &mut MuxState) -> Result<()> {
    let writer = &mut state.writer;

    writer.write_ascii("RIFF").await?;
    state.riff_size_pos = writer.pos();
    writer.write_u32_le(0).await?;
    writer.write_ascii("AVI ").await?;

    // hdrl list: avih plus one strl per stream.
    let strl_len = 12 + 8 + STRH_LEN + 8 + strf_len_max() as u32;
    let hdrl_len = 4 + 8 + AVIH_LEN + state.tracks.len() as u32 * (8 + strl_len - 8);

    writer.write_ascii("LIST").await?;
    let hdrl_size_pos = writer.pos();
    writer.write_u32_le(hdrl_len).await?;
    writer.write_ascii("hdrl").await?;

    writer.write_ascii("avih").await?;
    writer.write_u32_le(AVIH_LEN).await?;
    state.avih_pos = writer.pos();
    writer.write(&[0u8; AVIH_LEN as usize]).await?;

    for track in &mut state.tracks {
        let strf = build_strf(&track.info);

        writer.write_ascii("LIST").await?;
        writer.write_u32_le(4 + 8 + STRH_LEN + 8 + strf.len() as u32).await?;
        writer.write_ascii("strl").await?;

        writer.write_ascii("strh").await?;
        writer.write_u32_le(STRH_LEN).await?;
        track.strh_pos = writer.pos();
        writer.write(&build_strh(track)).await?;

        writer.write_ascii("strf").await?;
        writer.write_u32_le(strf.len() as u32).await?;
        writer.write(&strf).await?;
    }

    // The hdrl length depends on the actual strf sizes; patch it now that they are known.
    let hdrl_end = writer.pos();
    writer.seek(hdrl_size_pos)?;
    writer.write_u32_le((hdrl_end - hdrl_size_pos - 4) as u32).await?;
    writer.seek(hdrl_end)?;

    writer.write_ascii("LIST").await?;
    state.movi_size_pos = writer.pos();
    writer.write_u32_le(0).await?;
    state.movi_start = writer.pos();
    writer.write_ascii("movi").await?;

    state.header_written = true;
    Ok(())
}

/// An upper bound of the strf payload length, used for the provisional hdrl size.
fn strf_len_max() -> usize {
    40
}

fn build_strh(track: &TrackState) -> Vec<u8> {
    let mut out = Vec::with_capacity(STRH_LEN as usize);

    let (fcc_type, fcc_handler): (&[u8; 4], [u8; 4]) = match &track.info {
        TrackInfo::Video(info) => (b"vids", video_fourcc(info.codec)),
        _ => (b"auds", [0u8; 4]),
    };

    out.extend_from_slice(fcc_type);
    out.extend_from_slice(&fcc_handler);
    out.extend_from_slice(&0u32.to_le_bytes()); // flags
    out.extend_from_slice(&0u16.to_le_bytes()); // priority
    out.extend_from_slice(&0u16.to_le_bytes()); // language
    out.extend_from_slice(&0u32.to_le_bytes()); // initialFrames
    out.extend_from_slice(&track.scale.to_le_bytes());
    out.extend_from_slice(&track.rate.to_le_bytes());
    out.extend_from_slice(&0u32.to_le_bytes()); // start
    out.extend_from_slice(&0u32.to_le_bytes()); // length, patched on finalize
    out.extend_from_slice(&0u32.to_le_bytes()); // suggestedBufferSize, patched
    out.extend_from_slice(&u32::MAX.to_le_bytes()); // quality
    out.extend_from_slice(&sample_size_of(&track.info).to_le_bytes());

    // rcFrame.
    let (w, h) = match &track.info {
        TrackInfo::Video(info) => (info.coded_width as u16, info.coded_height as u16),
        _ => (0, 0),
    };
    out.extend_from_slice(&0u16.to_le_bytes());
    out.extend_from_slice(&0u16.to_le_bytes());
    out.extend_from_slice(&w.to_le_bytes());
    out.extend_from_slice(&h.to_le_bytes());

    out
}

fn build_strf(info: &TrackInfo) -> Vec<u8> {
    match info {
        TrackInfo::Video(info) => {
            // BITMAPINFOHEADER.
            let mut out = Vec::with_capacity(40);
            out.extend_from_slice(&40u32.to_le_bytes());
            out.extend_from_slice(&(info.coded_width as i32).to_le_bytes());
            out.extend_from_slice(&(info.coded_height as i32).to_le_bytes());
            out.extend_from_slice(&1u16.to_le_bytes());
            out.extend_from_slice(&24u16.to_le_bytes());
            out.extend_from_slice(&video_fourcc(info.codec));
            out.extend_from_slice(&(info.coded_width * info.coded_height * 3).to_le_bytes());
            out.extend_from_slice(&[0u8; 16]);
            out
        }
        TrackInfo::Audio(info) => {
            // WAVEFORMATEX.
            let block_align = info
                .codec
                .pcm_sample_size()
                .map(|s| s * info.channel_count.max(1))
                .unwrap_or(1) as u16;
            let bits = info.codec.pcm_sample_size().map(|s| s * 8).unwrap_or(0) as u16;

            let mut out = Vec::with_capacity(18);
            out.extend_from_slice(&audio_format_tag(info.codec).to_le_bytes());
            out.extend_from_slice(&(info.channel_count as u16).to_le_bytes());
            out.extend_from_slice(&info.sample_rate.to_le_bytes());
            out.extend_from_slice(
                &(info.sample_rate * u32::from(block_align)).to_le_bytes(),
            );
            out.extend_from_slice(&block_align.to_le_bytes());
            out.extend_from_slice(&bits.to_le_bytes());
            out.extend_from_slice(&0u16.to_le_bytes()); // cbSize
            out
        }
        TrackInfo::Subtitle(_) => unreachable!("subtitle tracks are rejected in add_track"),
    }
}

fn sample_size_of(info: &TrackInfo) -> u32 {
    match info {
        TrackInfo::Audio(info) if info.codec.is_pcm() => {
            info.codec.pcm_sample_size().unwrap_or(1) * info.channel_count.max(1)
        }
        _ => 0,
    }
}

fn video_fourcc(codec: VideoCodec) -> [u8; 4] {
    match codec {
        VideoCodec::Avc => *b"H264",
        VideoCodec::Hevc => *b"H265",
        VideoCodec::Vp8 => *b"VP80",
        VideoCodec::Vp9 => *b"VP90",
        VideoCodec::Av1 => *b"AV01",
        VideoCodec::Mpeg4 => *b"FMP4",
    }
}

fn audio_format_tag(codec: AudioCodec) -> u16 {
    match codec {
        AudioCodec::PcmU8 | AudioCodec::PcmS16 | AudioCodec::PcmS24 | AudioCodec::PcmS32 => 0x0001,
        AudioCodec::PcmF32 | AudioCodec::PcmF64 => 0x0003,
        AudioCodec::Alaw => 0x0006,
        AudioCodec::Ulaw => 0x0007,
        AudioCodec::Mp3 => 0x0055,
        AudioCodec::Aac => 0x00ff,
        AudioCodec::Ac3 => 0x2000,
        _ => 0x0000,
    }
}

async fn drain_interleaver(state: &mut MuxState, force: bool) -> Result<()> {
    loop {
        if !force && !state.interleaver.ready() {
            break;
        }

        let (track_id, packet) = match state.interleaver.pop() {
            Some(popped) => popped,
            None => break,
        };

        let track_idx = state
            .tracks
            .iter()
            .position(|t| t.stream_index + 1 == track_id)
            .expect("packet for unknown track");

        let ckid = state.tracks[track_idx].chunk_id();
        let data = packet.data();

        let chunk_pos = state.writer.pos();
        state.writer.write(&ckid).await?;
        state.writer.write_u32_le(data.len() as u32).await?;
        state.writer.write(data).await?;
        if data.len() % 2 != 0 {
            state.writer.write_u8(0).await?;
        }

        let flags =
            if packet.is_key() { IndexFlags::KEYFRAME } else { IndexFlags::empty() };

        state.index.push(IdxEntry {
            ckid,
            flags,
            offset: (chunk_pos - state.movi_start) as u32,
            size: data.len() as u32,
        });

        let track = &mut state.tracks[track_idx];
        track.chunks += 1;
        track.bytes += data.len() as u64;
        track.max_chunk = track.max_chunk.max(data.len() as u32);

        if let TrackInfo::Audio(info) = &track.info {
            if info.codec.is_pcm() {
                let block = sample_size_of(&track.info).max(1);
                track.samples += data.len() as u64 / u64::from(block);
            }
        }
    }

    Ok(())
}

#[async_trait]
impl Muxer for AviMuxer {
    fn format_info(&self) -> &'static FormatInfo {
        &AVI_FORMAT_INFO
    }

    async fn start(&self) -> Result<()> {
        Ok(())
    }

    async fn add_track(&self, options: OutputTrackOptions) -> Result<u32> {
        let mut state = self.state.lock().await;

        if state.header_written {
            return encoding_error("avi: tracks must be added before the first packet");
        }

        let (scale, rate) = match &options.info {
            TrackInfo::Video(_) => {
                let fps = options.frame_rate.unwrap_or(30.0);
                let (rate, scale) = approximate_rational(fps, 100_000);
                (scale, rate)
            }
            TrackInfo::Audio(info) if info.codec.is_pcm() => (1, info.sample_rate),
            TrackInfo::Audio(info) => {
                // One chunk per unit; derive units from the frame-rate hint when provided,
                // falling back to packets-as-units against the sample rate.
                match options.frame_rate {
                    Some(rate) => {
                        let (rate, scale) = approximate_rational(rate, 100_000);
                        (scale, rate)
                    }
                    None => (1, info.sample_rate),
                }
            }
            TrackInfo::Subtitle(_) => {
                return encoding_error("avi: subtitle tracks cannot be stored in AVI")
            }
        };

        let stream_index = state.tracks.len() as u32;
        let track_id = stream_index + 1;

        state.tracks.push(TrackState {
            stream_index,
            info: options.info,
            scale: scale.max(1),
            rate: rate.max(1),
            strh_pos: 0,
            chunks: 0,
            samples: 0,
            max_chunk: 0,
            bytes: 0,
        });
        state.interleaver.add_track(track_id);

        Ok(track_id)
    }

    async fn write_packet(&self, track_id: u32, packet: &EncodedPacket) -> Result<()> {
        let mut state = self.state.lock().await;

        if state.finalized {
            return encoding_error("avi: output already finalized");
        }
        if packet.is_metadata_only() {
            return encoding_error("avi: cannot write a metadata-only packet");
        }

        if !state.header_written {
            write_header(&mut state).await?;
        }

        state.interleaver.push(track_id, packet.clone())?;
        drain_interleaver(&mut state, false).await
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
        drain_interleaver(&mut state, true).await?;
        state.finalized = true;

        // Close the movi list.
        let movi_end = state.writer.pos();
        let movi_size = (movi_end - state.movi_start) as u32;

        // idx1, assembled in memory first.
        let mut idx_payload = Vec::with_capacity(state.index.len() * 16);
        for IdxEntry { ckid, flags, offset, size } in &state.index {
            idx_payload.extend_from_slice(ckid);
            idx_payload.extend_from_slice(&flags.bits().to_le_bytes());
            idx_payload.extend_from_slice(&offset.to_le_bytes());
            idx_payload.extend_from_slice(&size.to_le_bytes());
        }
        state.writer.write_ascii("idx1").await?;
        state.writer.write_u32_le(idx_payload.len() as u32).await?;
        state.writer.write(&idx_payload).await?;

        let file_end = state.writer.pos();

        debug!("finalizing avi: {} index entries, {} bytes", state.index.len(), file_end);

        // Patch the RIFF and movi sizes.
        let riff_size_pos = state.riff_size_pos;
        state.writer.seek(riff_size_pos)?;
        state.writer.write_u32_le((file_end - riff_size_pos - 4) as u32).await?;

        let movi_size_pos = state.movi_size_pos;
        state.writer.seek(movi_size_pos)?;
        state.writer.write_u32_le(movi_size).await?;

        // Patch the main header.
        let video = state.tracks.iter().find(|t| matches!(t.info, TrackInfo::Video(_)));

        // Without a video track the per-frame timing fields are meaningless and stay zero.
        let (micro_sec_per_frame, total_frames, width, height) = match video {
            Some(track) => {
                let mspf =
                    (1_000_000f64 * f64::from(track.scale) / f64::from(track.rate)).round() as u32;
                let (w, h) = match &track.info {
                    TrackInfo::Video(info) => (info.coded_width, info.coded_height),
                    _ => (0, 0),
                };
                (mspf, track.chunks, w, h)
            }
            None => (0, 0, 0, 0),
        };

        let duration = micro_sec_per_frame as f64 * total_frames as f64 / 1_000_000.0;
        let total_bytes: u64 = state.tracks.iter().map(|t| t.bytes).sum();
        let max_bytes_per_sec =
            if duration > 0.0 { (total_bytes as f64 / duration) as u32 } else { 0 };
        let max_chunk = state.tracks.iter().map(|t| t.max_chunk).max().unwrap_or(0);

        let mut avih = Vec::with_capacity(AVIH_LEN as usize);
        avih.extend_from_slice(&micro_sec_per_frame.to_le_bytes());
        avih.extend_from_slice(&max_bytes_per_sec.to_le_bytes());
        avih.extend_from_slice(&0u32.to_le_bytes()); // paddingGranularity
        avih.extend_from_slice(
            &(MainHeaderFlags::HAS_INDEX | MainHeaderFlags::IS_INTERLEAVED).bits().to_le_bytes(),
        );
        avih.extend_from_slice(&total_frames.to_le_bytes());
        avih.extend_from_slice(&0u32.to_le_bytes()); // initialFrames
        avih.extend_from_slice(&(state.tracks.len() as u32).to_le_bytes());
        avih.extend_from_slice(&max_chunk.to_le_bytes());
        avih.extend_from_slice(&width.to_le_bytes());
        avih.extend_from_slice(&height.to_le_bytes());
        avih.extend_from_slice(&[0u8; 16]);

        let avih_pos = state.avih_pos;
        state.writer.seek(avih_pos)?;
        state.writer.write(&avih).await?;

        // Patch the per-stream length and suggested buffer size.
        for i in 0..state.tracks.len() {
            let (strh_pos, length, max_chunk) = {
                let track = &state.tracks[i];
                let length = match &track.info {
                    TrackInfo::Audio(info) if info.codec.is_pcm() => track.samples as u32,
                    _ => track.chunks,
                };
                (track.strh_pos, length, track.max_chunk)
            };

            state.writer.seek(strh_pos + 32)?;
            state.writer.write_u32_le(length).await?;
            state.writer.write_u32_le(max_chunk).await?;
        }

        state.writer.seek(file_end)?;
        state.writer.flush().await
    }
}

/// The registry entry for the AVI output format.
pub fn registration() -> MuxerRegistration {
    MuxerRegistration { info: &AVI_FORMAT_INFO, new_muxer: |writer| Ok(AviMuxer::new(writer) as _) }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use remux_core::demux::{Demuxer, PacketOptions};
    use remux_core::io::{BufSource, Reader, SharedBufferTarget, Writer};
    use remux_core::mux::{Muxer, OutputTrackOptions};
    use remux_core::packet::{EncodedPacket, PacketType};
    use remux_core::track::{
        AudioCodec, AudioTrackInfo, TrackInfo, VideoCodec, VideoTrackInfo,
    };

    use super::AviMuxer;
    use crate::avi::AviDemuxer;

    fn video_options() -> OutputTrackOptions {
        let mut options = OutputTrackOptions::new(TrackInfo::Video(VideoTrackInfo {
            codec: VideoCodec::Avc,
            coded_width: 320,
            coded_height: 240,
            rotation: Default::default(),
            color: None,
            decoder_config: None,
        }));
        options.frame_rate = Some(25.0);
        options
    }

    fn audio_options() -> OutputTrackOptions {
        OutputTrackOptions::new(TrackInfo::Audio(AudioTrackInfo {
            codec: AudioCodec::PcmS16,
            channel_count: 2,
            sample_rate: 48_000,
            decoder_config: None,
        }))
    }

    #[tokio::test]
    async fn verify_write_then_read_round_trip() {
        let (target, buffer) = SharedBufferTarget::new();
        let muxer = AviMuxer::new(Writer::new(Box::new(target)));
        muxer.start().await.unwrap();

        let video = muxer.add_track(video_options()).await.unwrap();
        let audio = muxer.add_track(audio_options()).await.unwrap();

        for i in 0..5u32 {
            let kind = if i % 2 == 0 { PacketType::Key } else { PacketType::Delta };
            let video_packet =
                EncodedPacket::new(vec![0xa0 | i as u8; 101], kind, f64::from(i) * 0.04, 0.04, -1);
            muxer.write_packet(video, &video_packet).await.unwrap();

            // 0.04 s of 48 kHz stereo s16: 1920 frames.
            let audio_packet = EncodedPacket::new(
                vec![i as u8; 1920 * 4],
                PacketType::Key,
                f64::from(i) * 0.04,
                0.04,
                -1,
            );
            muxer.write_packet(audio, &audio_packet).await.unwrap();
        }

        muxer.finalize().await.unwrap();
        let bytes = buffer.contents();

        let reader = Arc::new(Reader::new(Arc::new(BufSource::new(bytes))));
        assert!(AviDemuxer::can_read(&reader).await.unwrap());

        let demuxer = AviDemuxer::open(reader).await.unwrap();
        let tracks = demuxer.clone().tracks().await.unwrap();
        assert_eq!(tracks.len(), 2);

        // Video packets come back in timestamp order with the right key flags.
        let video_track =
            tracks.iter().find(|t| matches!(t.info, TrackInfo::Video(_))).unwrap();
        let mut packet =
            video_track.first_packet(PacketOptions::default()).await.unwrap().unwrap();
        assert!(packet.is_key());
        assert_eq!(packet.data()[0], 0xa0);

        let mut count = 1;
        while let Some(next) =
            video_track.next_packet(&packet, PacketOptions::default()).await.unwrap()
        {
            assert!(next.timestamp() > packet.timestamp());
            assert_eq!(next.is_key(), count % 2 == 0);
            packet = next;
            count += 1;
        }
        assert_eq!(count, 5);

        // Key-packet lookup returns the closest preceding key frame.
        let key = video_track.key_packet_at(0.05, PacketOptions::default()).await.unwrap().unwrap();
        assert!(key.is_key());
        assert!((key.timestamp() - 0.04).abs() < 1e-9 || key.timestamp() == 0.0);

        let duration = demuxer.compute_duration().await.unwrap();
        assert!((duration - 0.2).abs() < 1e-6);
    }

    #[tokio::test]
    async fn verify_subtitle_rejected() {
        use remux_core::track::{SubtitleCodec, SubtitleTrackInfo};

        let (target, _buffer) = SharedBufferTarget::new();
        let muxer = AviMuxer::new(Writer::new(Box::new(target)));

        let options = OutputTrackOptions::new(TrackInfo::Subtitle(SubtitleTrackInfo {
            codec: SubtitleCodec::WebVtt,
            config: None,
        }));

        assert!(muxer.add_track(options).await.is_err());
    }
}
