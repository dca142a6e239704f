// Remux
// Copyright (c) 2026 The Project Remux Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use std::sync::Arc;

use async_trait::async_trait;
use log::debug;

use remux_common::mpeg::audio::{parse_mpeg_header, MpegFrameHeader, XING_TAG};
use remux_core::demux::FormatInfo;
use remux_core::errors::{encoding_error, Result};
use remux_core::io::Writer;
use remux_core::mux::{Muxer, OutputTrackOptions};
use remux_core::packet::EncodedPacket;
use remux_core::probe::MuxerRegistration;
use remux_core::sync::AsyncMutex;
use remux_core::track::{AudioCodec, TrackInfo};
use remux_metadata::MetadataTags;

use crate::MP3_FORMAT_INFO;

/// Options for the MP3 muxer.
#[derive(Default)]
pub struct Mp3MuxerOptions {
    /// Tags to serialize as a leading ID3v2.4 header.
    pub tags: Option<MetadataTags>,
    /// Reserve and back-patch a Xing frame. Disabled automatically on unseekable targets.
    pub write_xing: bool,
}

impl Mp3MuxerOptions {
    pub fn new() -> Self {
        Mp3MuxerOptions { tags: None, write_xing: true }
    }
}

struct XingReservation {
    /// Offset of the reserved frame.
    offset: u64,
    /// The frame header word the reservation was sized from.
    header_word: u32,
    header: MpegFrameHeader,
}

struct MuxState {
    writer: Writer,
    options: Mp3MuxerOptions,
    track_added: bool,
    xing: Option<XingReservation>,
    started_frames: bool,
    frame_count: u64,
    /// Offsets of each frame relative to the Xing frame, for the seek table.
    frame_offsets: Vec<u64>,
}

/// MP3 stream multiplexer.
///
/// Frames are appended verbatim. An updatable Xing frame is reserved at the head of the stream
/// and back-patched with the frame count, file size, and a 100-entry seek table on finalize.
pub struct Mp3Muxer {
    state: AsyncMutex<MuxState>,
}

impl Mp3Muxer {
    pub fn new(writer: Writer, options: Mp3MuxerOptions) -> Arc<Mp3Muxer> {
        Arc::new(Mp3Muxer {
            state: AsyncMutex::new(MuxState {
                writer,
                options,
                track_added: false,
                xing: None,
                started_frames: false,
                frame_count: 0,
                frame_offsets: Vec::new(),
            }),
        })
    }
}

#[async_trait]
impl Muxer for Mp3Muxer {
    fn format_info(&self) -> &'static FormatInfo {
        &MP3_FORMAT_INFO
    }

    async fn start(&self) -> Result<()> {
        let mut state = self.state.lock().await;

        if let Some(tags) = &state.options.tags {
            let tag = remux_metadata::id3v2::write_id3v2_4(tags);
            if !tag.is_empty() {
                state.writer.write(&tag).await?;
            }
        }

        Ok(())
    }

    async fn add_track(&self, options: OutputTrackOptions) -> Result<u32> {
        let mut state = self.state.lock().await;

        if state.track_added {
            return encoding_error("mp3: only one audio track is supported");
        }

        match &options.info {
            TrackInfo::Audio(info) if info.codec == AudioCodec::Mp3 => (),
            _ => return encoding_error("mp3: only the mp3 codec can be written"),
        }

        state.track_added = true;
        Ok(1)
    }

    async fn write_packet(&self, track_id: u32, packet: &EncodedPacket) -> Result<()> {
        let mut state = self.state.lock().await;
        let state = &mut *state;

        if !state.track_added || track_id != 1 {
            return encoding_error("mp3: packet written to unknown track");
        }

        let data = packet.data();
        if data.len() < 4 {
            return encoding_error("mp3: packet too short for a frame header");
        }

        let header_word = u32::from_be_bytes([data[0], data[1], data[2], data[3]]);
        let header = match parse_mpeg_header(header_word) {
            Ok(header) => header,
            Err(_) => return encoding_error("mp3: packet does not begin with a frame header"),
        };

        // Reserve the Xing frame slot before the first audio frame.
        if !state.started_frames {
            state.started_frames = true;

            if state.options.write_xing && state.writer.is_seekable() {
                let offset = state.writer.pos();
                let placeholder = make_placeholder_frame(header_word, &header);
                state.writer.write(&placeholder).await?;
                state.xing = Some(XingReservation { offset, header_word, header });
            }
        }

        if let Some(xing) = &state.xing {
            let rel = state.writer.pos() - xing.offset;
            state.frame_offsets.push(rel);
        }

        state.writer.write(data).await?;
        state.frame_count += 1;

        Ok(())
    }

    async fn finalize(&self) -> Result<()> {
        let mut state = self.state.lock().await;

        let end = state.writer.pos();

        if let Some(xing) = state.xing.take() {
            let file_size = end - xing.offset;
            let frame =
                build_xing_frame(&xing, state.frame_count, file_size, &state.frame_offsets);

            debug!("patching xing frame: {} frames, {} bytes", state.frame_count, file_size);

            state.writer.seek(xing.offset)?;
            state.writer.write(&frame).await?;
            state.writer.seek(end)?;
        }

        state.writer.flush().await
    }
}

/// An empty frame sized to hold the Xing payload, emitted as a placeholder.
fn make_placeholder_frame(header_word: u32, header: &MpegFrameHeader) -> Vec<u8> {
    let mut frame = vec![0u8; header.frame_len];
    frame[..4].copy_from_slice(&header_word.to_be_bytes());
    frame
}

/// Assemble the finished Xing frame: header word, zeroed side info, then the `Xing` payload with
/// frame count, byte count, and, when the frame is large enough, the 100-entry seek table.
fn build_xing_frame(
    xing: &XingReservation,
    frame_count: u64,
    file_size: u64,
    frame_offsets: &[u64],
) -> Vec<u8> {
    let mut frame = make_placeholder_frame(xing.header_word, &xing.header);

    let offset = xing.header.xing_offset();
    let with_toc = offset + 4 + 4 + 4 + 4 + 100 <= frame.len();

    let mut pos = offset;
    frame[pos..pos + 4].copy_from_slice(&XING_TAG.to_be_bytes());
    pos += 4;

    let flags: u32 = if with_toc { 0x7 } else { 0x3 };
    frame[pos..pos + 4].copy_from_slice(&flags.to_be_bytes());
    pos += 4;

    frame[pos..pos + 4].copy_from_slice(&(frame_count as u32).to_be_bytes());
    pos += 4;

    frame[pos..pos + 4].copy_from_slice(&(file_size as u32).to_be_bytes());
    pos += 4;

    if with_toc {
        // Each entry maps the i-th percentile of playback time to a scaled byte offset.
        for i in 0..100usize {
            let entry = if frame_offsets.is_empty() || file_size == 0 {
                0
            }
            else {
                let frame_idx = (i * frame_offsets.len()) / 100;
                let byte_offset = frame_offsets[frame_idx];
                ((byte_offset * 256) / file_size).min(255) as u8
            };
            frame[pos + i] = entry;
        }
    }

    frame
}

/// The registry entry for the MP3 output format. Constructed without tags; callers wanting tag
/// output use [`Mp3Muxer::new`] directly.
pub fn registration() -> MuxerRegistration {
    MuxerRegistration {
        info: &MP3_FORMAT_INFO,
        new_muxer: |writer| Ok(Mp3Muxer::new(writer, Mp3MuxerOptions::new()) as _),
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use remux_core::demux::{Demuxer, PacketOptions};
    use remux_core::io::{BufSource, Reader, SharedBufferTarget, Writer};
    use remux_core::mux::{Muxer, OutputTrackOptions};
    use remux_core::packet::{EncodedPacket, PacketType};
    use remux_core::track::{AudioCodec, AudioTrackInfo, TrackInfo};

    use super::{Mp3Muxer, Mp3MuxerOptions};
    use crate::demuxer::Mp3Demuxer;

    const FRAME_HEADER: [u8; 4] = [0xff, 0xfb, 0x90, 0x40];
    const FRAME_LEN: usize = 417;
    const FRAME_DUR: f64 = 1152.0 / 44_100.0;

    fn frame_packet(index: usize) -> EncodedPacket {
        let mut data = vec![index as u8; FRAME_LEN];
        data[..4].copy_from_slice(&FRAME_HEADER);
        EncodedPacket::new(data, PacketType::Key, index as f64 * FRAME_DUR, FRAME_DUR, -1)
    }

    fn track_options() -> OutputTrackOptions {
        OutputTrackOptions::new(TrackInfo::Audio(AudioTrackInfo {
            codec: AudioCodec::Mp3,
            channel_count: 2,
            sample_rate: 44_100,
            decoder_config: None,
        }))
    }

    #[tokio::test]
    async fn verify_write_then_read_round_trip() {
        let (target, buffer) = SharedBufferTarget::new();
        let writer = Writer::new(Box::new(target));

        let mut tags = remux_metadata::MetadataTags::default();
        tags.title = Some("roundtrip".to_string());
        let mut options = Mp3MuxerOptions::new();
        options.tags = Some(tags);

        let muxer = Mp3Muxer::new(writer, options);
        muxer.start().await.unwrap();
        let track = muxer.add_track(track_options()).await.unwrap();

        for i in 0..4 {
            muxer.write_packet(track, &frame_packet(i)).await.unwrap();
        }
        muxer.finalize().await.unwrap();

        let bytes = buffer.contents();
        // ID3 tag + Xing frame + 4 audio frames.
        assert!(bytes.len() > 5 * FRAME_LEN);

        let reader = Arc::new(Reader::new(Arc::new(BufSource::new(bytes))));
        let demuxer = Mp3Demuxer::open(reader).await.unwrap();

        assert_eq!(demuxer.tags().title.as_deref(), Some("roundtrip"));

        let duration = demuxer.clone().compute_duration().await.unwrap();
        assert!((duration - 4.0 * FRAME_DUR).abs() < 1e-9);

        let tracks = demuxer.tracks().await.unwrap();
        let first = tracks[0].first_packet(PacketOptions::default()).await.unwrap().unwrap();
        // The Xing frame is skipped; the first packet is the first audio frame.
        assert_eq!(first.sequence_number(), 0);
        assert_eq!(first.data()[4], 0);
    }

    #[tokio::test]
    async fn verify_codec_is_checked() {
        let (target, _buffer) = SharedBufferTarget::new();
        let muxer = Mp3Muxer::new(Writer::new(Box::new(target)), Mp3MuxerOptions::new());
        muxer.start().await.unwrap();

        let bad = OutputTrackOptions::new(TrackInfo::Audio(AudioTrackInfo {
            codec: AudioCodec::Aac,
            channel_count: 2,
            sample_rate: 44_100,
            decoder_config: None,
        }));

        assert!(muxer.add_track(bad).await.is_err());
    }
}
