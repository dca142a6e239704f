// Remux
// Copyright (c) 2026 The Project Remux Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use std::sync::Arc;

use async_trait::async_trait;
use log::debug;

use remux_common::mpeg::audio::{
    find_frame_sync, parse_mpeg_header, read_xing_tag, MpegFrameHeader, MPEG_HEADER_LEN,
};
use remux_core::demux::{Demuxer, FormatInfo, InputTrack, PacketOptions, TrackReader};
use remux_core::errors::{invalid_format_error, Result};
use remux_core::io::Reader;
use remux_core::packet::{EncodedPacket, PacketType};
use remux_core::probe::DemuxerRegistration;
use remux_core::sync::AsyncMutex;
use remux_core::track::{AudioCodec, AudioTrackInfo, TrackInfo};
use remux_core::util::sort::binary_search_less_or_equal;
use remux_metadata::MetadataTags;

use crate::MP3_FORMAT_INFO;

/// The number of bytes fetched per forward scan step.
const SCAN_WINDOW: u64 = 16 * 1024;

/// The maximum MPEG audio frame length, header included.
const MAX_FRAME_LEN: u64 = 2881;

/// One indexed MPEG audio frame.
#[derive(Copy, Clone, Debug)]
struct FrameEntry {
    offset: u64,
    len: u32,
    start_sample: u64,
    samples: u32,
}

struct ScanState {
    frames: Vec<FrameEntry>,
    next_offset: u64,
    next_sample: u64,
    done: bool,
}

/// MPEG audio (MP3) stream demultiplexer.
///
/// The stream is indexed progressively: frames are discovered by walking frame headers forward
/// from the first audio frame, and only as far as retrievals require.
pub struct Mp3Demuxer {
    reader: Arc<Reader>,
    sample_rate: u32,
    channel_count: u32,
    /// Total frame count from a Xing/Info tag, when present.
    xing_frame_count: Option<u64>,
    tags: MetadataTags,
    state: AsyncMutex<ScanState>,
}

impl Mp3Demuxer {
    /// Probe check: an optional ID3v2 tag followed by two consecutive, agreeing MPEG frame
    /// headers.
    pub async fn can_read(reader: &Reader) -> Result<bool> {
        let start = match skip_id3_tags(reader, 0).await? {
            Some(start) => start,
            None => return Ok(false),
        };

        let window = match reader.slice(start, SCAN_WINDOW).await? {
            Some(window) => window,
            None => return Ok(false),
        };

        let (delta, header) = match find_frame_sync(window.as_bytes()) {
            Some(found) => found,
            None => return Ok(false),
        };

        // The next frame must immediately follow and agree on the stream parameters.
        let next_offset = start + delta as u64 + header.frame_len as u64;
        let next = match reader.slice(next_offset, MPEG_HEADER_LEN as u64).await? {
            Some(mut slice) if slice.len() >= MPEG_HEADER_LEN => slice.read_u32()?,
            _ => return Ok(false),
        };

        match parse_mpeg_header(next) {
            Ok(next) => Ok(next.sample_rate == header.sample_rate && next.layer == header.layer),
            Err(_) => Ok(false),
        }
    }

    /// Open a demuxer over the stream behind `reader`.
    pub async fn open(reader: Arc<Reader>) -> Result<Arc<Mp3Demuxer>> {
        let mut tags = MetadataTags::default();

        // Read any leading ID3v2 tags into the track metadata.
        let mut pos = 0u64;
        loop {
            let head = match reader.slice(pos, remux_metadata::id3v2::ID3V2_HEADER_LEN as u64).await?
            {
                Some(head) => head,
                None => return invalid_format_error("mp3: empty stream"),
            };

            match remux_metadata::id3v2::tag_total_size(head.as_bytes()) {
                Some(size) => {
                    if let Some(tag) = reader.slice(pos, size).await? {
                        if let Ok((parsed, _)) = remux_metadata::id3v2::parse(tag.as_bytes()) {
                            tags = parsed;
                        }
                    }
                    pos += size;
                }
                None => break,
            }
        }

        let window = match reader.slice(pos, SCAN_WINDOW).await? {
            Some(window) => window,
            None => return invalid_format_error("mp3: no audio frames"),
        };

        let (delta, header) = match find_frame_sync(window.as_bytes()) {
            Some(found) => found,
            None => return invalid_format_error("mp3: no frame sync found"),
        };

        let mut first_frame_offset = pos + delta as u64;
        let mut xing_frame_count = None;

        // A Xing/Info bookkeeping frame occupies the first frame slot but carries no audio.
        if let Some(frame) = reader.slice(first_frame_offset, header.frame_len as u64).await? {
            if read_xing_tag(frame.as_bytes(), &header).is_some() {
                xing_frame_count = parse_xing_frame_count(frame.as_bytes(), &header);
                first_frame_offset += header.frame_len as u64;
                debug!("skipping xing frame, {} total frames", xing_frame_count.unwrap_or(0));
            }
        }

        Ok(Arc::new(Mp3Demuxer {
            reader,
            sample_rate: header.sample_rate,
            channel_count: header.channel_count(),
            xing_frame_count,
            tags,
            state: AsyncMutex::new(ScanState {
                frames: Vec::new(),
                next_offset: first_frame_offset,
                next_sample: 0,
                done: false,
            }),
        }))
    }

    /// The tags read from any leading ID3v2 header.
    pub fn tags(&self) -> &MetadataTags {
        &self.tags
    }

    /// Index one more frame. Returns false at end of stream.
    async fn scan_one(&self, state: &mut ScanState) -> Result<bool> {
        if state.done {
            return Ok(false);
        }

        let slice = match self.reader.slice(state.next_offset, MAX_FRAME_LEN).await? {
            Some(slice) => slice,
            None => {
                state.done = true;
                return Ok(false);
            }
        };

        let header = match header_at(slice.as_bytes()) {
            Some(header) => header,
            None => {
                // Resync across tag padding or garbage; give up past one window.
                match self.resync(state.next_offset).await? {
                    Some((offset, header)) => {
                        state.next_offset = offset;
                        header
                    }
                    None => {
                        state.done = true;
                        return Ok(false);
                    }
                }
            }
        };

        if slice.len() < header.frame_len {
            // Truncated final frame.
            state.done = true;
            return Ok(false);
        }

        let samples = header.samples_per_frame();
        state.frames.push(FrameEntry {
            offset: state.next_offset,
            len: header.frame_len as u32,
            start_sample: state.next_sample,
            samples,
        });
        state.next_offset += header.frame_len as u64;
        state.next_sample += u64::from(samples);

        Ok(true)
    }

    async fn resync(&self, from: u64) -> Result<Option<(u64, MpegFrameHeader)>> {
        let window = match self.reader.slice(from, SCAN_WINDOW).await? {
            Some(window) => window,
            None => return Ok(None),
        };

        Ok(find_frame_sync(window.as_bytes()).map(|(delta, header)| (from + delta as u64, header)))
    }

    /// Ensure at least `count` frames are indexed, or the stream is exhausted.
    async fn ensure_frames(&self, state: &mut ScanState, count: usize) -> Result<()> {
        while state.frames.len() < count && self.scan_one(state).await? {}
        Ok(())
    }

    /// Ensure the frame containing `sample` is indexed, or the stream is exhausted.
    async fn ensure_sample(&self, state: &mut ScanState, sample: u64) -> Result<()> {
        while state.next_sample <= sample && self.scan_one(state).await? {}
        Ok(())
    }

    async fn packet_for(&self, entry: FrameEntry, index: usize, opts: PacketOptions) -> Result<EncodedPacket> {
        let timestamp = entry.start_sample as f64 / f64::from(self.sample_rate);
        let duration = f64::from(entry.samples) / f64::from(self.sample_rate);

        if opts.metadata_only {
            return Ok(EncodedPacket::new_metadata_only(
                PacketType::Key,
                timestamp,
                duration,
                index as i64,
                u64::from(entry.len),
            ));
        }

        let data = match self.reader.slice(entry.offset, u64::from(entry.len)).await? {
            Some(mut slice) => slice.read_remaining().to_vec(),
            None => return invalid_format_error("mp3: frame data out of range"),
        };

        Ok(EncodedPacket::new(data, PacketType::Key, timestamp, duration, index as i64))
    }

    async fn packet_by_index(&self, index: usize, opts: PacketOptions) -> Result<Option<EncodedPacket>> {
        let mut state = self.state.lock().await;
        self.ensure_frames(&mut state, index + 1).await?;

        match state.frames.get(index).copied() {
            Some(entry) => Ok(Some(self.packet_for(entry, index, opts).await?)),
            None => Ok(None),
        }
    }

    async fn packet_at_time(&self, time: f64, opts: PacketOptions) -> Result<Option<EncodedPacket>> {
        if time < 0.0 {
            return Ok(None);
        }

        let target = (time * f64::from(self.sample_rate)) as u64;

        let mut state = self.state.lock().await;
        self.ensure_sample(&mut state, target).await?;

        let index =
            match binary_search_less_or_equal(&state.frames, target, |f| f.start_sample) {
                Some(index) => index,
                None => return Ok(None),
            };

        let entry = state.frames[index];
        if target >= entry.start_sample + u64::from(entry.samples) {
            // Past the final frame.
            return Ok(None);
        }

        Ok(Some(self.packet_for(entry, index, opts).await?))
    }

    async fn total_samples(&self) -> Result<u64> {
        if let Some(frames) = self.xing_frame_count {
            let mut state = self.state.lock().await;
            self.ensure_frames(&mut state, 1).await?;
            if let Some(first) = state.frames.first() {
                return Ok(frames * u64::from(first.samples));
            }
        }

        let mut state = self.state.lock().await;
        while self.scan_one(&mut state).await? {}
        Ok(state.next_sample)
    }
}

fn header_at(data: &[u8]) -> Option<MpegFrameHeader> {
    if data.len() < MPEG_HEADER_LEN {
        return None;
    }
    let word = u32::from_be_bytes([data[0], data[1], data[2], data[3]]);
    parse_mpeg_header(word).ok()
}

/// Extract the total frame count from a Xing/Info frame, when the frames field is flagged.
fn parse_xing_frame_count(frame: &[u8], header: &MpegFrameHeader) -> Option<u64> {
    let offset = header.xing_offset();
    let after_tag = frame.get(offset + 4..)?;

    let flags = u32::from_be_bytes(after_tag.get(..4)?.try_into().ok()?);
    if flags & 0x1 == 0 {
        return None;
    }

    let frames = u32::from_be_bytes(after_tag.get(4..8)?.try_into().ok()?);
    Some(u64::from(frames))
}

async fn skip_id3_tags(reader: &Reader, mut pos: u64) -> Result<Option<u64>> {
    loop {
        let head = match reader.slice(pos, remux_metadata::id3v2::ID3V2_HEADER_LEN as u64).await? {
            Some(head) => head,
            None => return Ok(None),
        };

        match remux_metadata::id3v2::tag_total_size(head.as_bytes()) {
            Some(size) => pos += size,
            None => return Ok(Some(pos)),
        }
    }
}

#[async_trait]
impl Demuxer for Mp3Demuxer {
    fn format_info(&self) -> &'static FormatInfo {
        &MP3_FORMAT_INFO
    }

    async fn tracks(self: Arc<Self>) -> Result<Vec<InputTrack>> {
        let info = TrackInfo::Audio(AudioTrackInfo {
            codec: AudioCodec::Mp3,
            channel_count: self.channel_count,
            sample_rate: self.sample_rate,
            decoder_config: None,
        });

        let time_resolution = f64::from(self.sample_rate);
        let reader = Arc::new(Mp3TrackReader { demuxer: self.clone() });

        Ok(vec![InputTrack::new(1, info, "und".to_string(), None, time_resolution, reader)])
    }

    async fn compute_duration(self: Arc<Self>) -> Result<f64> {
        Ok(self.total_samples().await? as f64 / f64::from(self.sample_rate))
    }

    fn dispose(&self) {
        self.reader.dispose();
    }
}

struct Mp3TrackReader {
    demuxer: Arc<Mp3Demuxer>,
}

#[async_trait]
impl TrackReader for Mp3TrackReader {
    async fn first_timestamp(&self) -> Result<f64> {
        Ok(0.0)
    }

    async fn compute_duration(&self) -> Result<f64> {
        let samples = self.demuxer.total_samples().await?;
        Ok(samples as f64 / f64::from(self.demuxer.sample_rate))
    }

    async fn first_packet(&self, opts: PacketOptions) -> Result<Option<EncodedPacket>> {
        self.demuxer.packet_by_index(0, opts).await
    }

    async fn packet_at(&self, time: f64, opts: PacketOptions) -> Result<Option<EncodedPacket>> {
        self.demuxer.packet_at_time(time, opts).await
    }

    async fn next_packet(
        &self,
        packet: &EncodedPacket,
        opts: PacketOptions,
    ) -> Result<Option<EncodedPacket>> {
        let index = packet.sequence_number();
        if index < 0 {
            return invalid_format_error("mp3: packet has no sequence number");
        }
        self.demuxer.packet_by_index(index as usize + 1, opts).await
    }

    async fn key_packet_at(&self, time: f64, opts: PacketOptions) -> Result<Option<EncodedPacket>> {
        // Every MPEG audio frame is independently decodable.
        self.demuxer.packet_at_time(time, opts).await
    }

    async fn next_key_packet(
        &self,
        packet: &EncodedPacket,
        opts: PacketOptions,
    ) -> Result<Option<EncodedPacket>> {
        self.next_packet(packet, opts).await
    }

    async fn codec_parameter_string(&self) -> Result<Option<String>> {
        Ok(Some("mp3".to_string()))
    }

    async fn decoder_config(&self) -> Result<Option<Box<[u8]>>> {
        Ok(None)
    }
}

/// The probe registration for the MP3 format.
pub fn registration() -> DemuxerRegistration {
    DemuxerRegistration {
        info: &MP3_FORMAT_INFO,
        can_read: |reader| Box::pin(Mp3Demuxer::can_read(reader)),
        open: |reader| {
            Box::pin(async move {
                let demuxer = Mp3Demuxer::open(reader).await?;
                Ok(demuxer as Arc<dyn Demuxer>)
            })
        },
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use remux_core::demux::{Demuxer, PacketOptions};
    use remux_core::io::{BufSource, Reader};

    use super::Mp3Demuxer;

    // MPEG1 Layer 3, 128 kbps, 44.1 kHz, no padding: 417-byte frames of 1152 samples.
    const FRAME_HEADER: [u8; 4] = [0xff, 0xfb, 0x90, 0x40];
    const FRAME_LEN: usize = 417;
    const SAMPLES_PER_FRAME: u32 = 1152;

    fn test_frame() -> Vec<u8> {
        let mut frame = vec![0u8; FRAME_LEN];
        frame[..4].copy_from_slice(&FRAME_HEADER);
        frame
    }

    fn test_stream(frames: usize) -> Vec<u8> {
        let mut data = Vec::new();
        for _ in 0..frames {
            data.extend_from_slice(&test_frame());
        }
        data
    }

    fn reader_over(data: Vec<u8>) -> Arc<Reader> {
        Arc::new(Reader::new(Arc::new(BufSource::new(data))))
    }

    #[tokio::test]
    async fn verify_can_read() {
        assert!(Mp3Demuxer::can_read(&reader_over(test_stream(3))).await.unwrap());
        assert!(!Mp3Demuxer::can_read(&reader_over(vec![0u8; 512])).await.unwrap());
    }

    #[tokio::test]
    async fn verify_packet_timing() {
        let demuxer = Mp3Demuxer::open(reader_over(test_stream(5))).await.unwrap();
        let tracks = demuxer.clone().tracks().await.unwrap();
        let track = &tracks[0];

        let first = track.first_packet(PacketOptions::default()).await.unwrap().unwrap();
        assert_eq!(first.timestamp(), 0.0);
        assert_eq!(first.byte_length(), FRAME_LEN as u64);

        let expected_dur = f64::from(SAMPLES_PER_FRAME) / 44_100.0;
        assert!((first.duration() - expected_dur).abs() < 1e-9);

        // The packet containing t = 2.5 frame durations is frame 2.
        let packet =
            track.packet_at(2.5 * expected_dur, PacketOptions::default()).await.unwrap().unwrap();
        assert_eq!(packet.sequence_number(), 2);

        let next = track.next_packet(&packet, PacketOptions::default()).await.unwrap().unwrap();
        assert_eq!(next.sequence_number(), 3);

        // Past the end of the stream.
        assert!(track.packet_at(10.0, PacketOptions::default()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn verify_duration_with_id3_and_xing() {
        // Stream layout: ID3v2 tag, then a Xing frame, then three audio frames.
        let mut tags = remux_metadata::MetadataTags::default();
        tags.title = Some("test".to_string());

        let mut data = remux_metadata::id3v2::write_id3v2_4(&tags);

        let mut xing = test_frame();
        let offset = 36; // MPEG1, non-mono.
        xing[offset..offset + 4].copy_from_slice(b"Xing");
        xing[offset + 4..offset + 8].copy_from_slice(&0x0001u32.to_be_bytes());
        xing[offset + 8..offset + 12].copy_from_slice(&3u32.to_be_bytes());
        data.extend_from_slice(&xing);

        data.extend_from_slice(&test_stream(3));

        let demuxer = Mp3Demuxer::open(reader_over(data)).await.unwrap();
        assert_eq!(demuxer.tags().title.as_deref(), Some("test"));

        let duration = demuxer.clone().compute_duration().await.unwrap();
        let expected = 3.0 * f64::from(SAMPLES_PER_FRAME) / 44_100.0;
        assert!((duration - expected).abs() < 1e-9);

        // The Xing frame must not become packet 0.
        let tracks = demuxer.tracks().await.unwrap();
        let first = tracks[0].first_packet(PacketOptions::default()).await.unwrap().unwrap();
        assert_eq!(first.timestamp(), 0.0);
        assert_eq!(first.sequence_number(), 0);
    }
}
