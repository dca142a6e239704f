// Remux
// Copyright (c) 2026 The Project Remux Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use std::sync::Arc;

use async_trait::async_trait;

use remux_common::mpeg::audio::{aac_codec_parameter_string, AdtsFrameHeader};
use remux_core::demux::{Demuxer, FormatInfo, InputTrack, PacketOptions, TrackReader};
use remux_core::errors::{invalid_format_error, Result};
use remux_core::io::Reader;
use remux_core::packet::{EncodedPacket, PacketType};
use remux_core::probe::DemuxerRegistration;
use remux_core::sync::AsyncMutex;
use remux_core::track::{AudioCodec, AudioTrackInfo, TrackInfo};
use remux_core::util::sort::binary_search_less_or_equal;

use crate::ADTS_FORMAT_INFO;

/// The maximum ADTS frame length: 13 bits of size.
const MAX_FRAME_LEN: u64 = 1 << 13;

#[derive(Copy, Clone, Debug)]
struct FrameEntry {
    offset: u64,
    /// Offset of the AAC payload within the frame.
    payload_offset: u8,
    len: u32,
    index: u64,
}

struct ScanState {
    frames: Vec<FrameEntry>,
    next_offset: u64,
    done: bool,
}

/// ADTS (AAC) stream demultiplexer.
pub struct AdtsDemuxer {
    reader: Arc<Reader>,
    first_header: AdtsFrameHeader,
    state: AsyncMutex<ScanState>,
}

impl AdtsDemuxer {
    /// Probe check: two consecutive, agreeing ADTS frame headers.
    pub async fn can_read(reader: &Reader) -> Result<bool> {
        let head = match reader.slice(0, 16).await? {
            Some(head) => head,
            None => return Ok(false),
        };

        let first = match AdtsFrameHeader::parse(head.as_bytes()) {
            Ok(first) => first,
            Err(_) => return Ok(false),
        };

        let next = match reader.slice(first.frame_len as u64, 16).await? {
            Some(next) => next,
            None => return Ok(false),
        };

        match AdtsFrameHeader::parse(next.as_bytes()) {
            Ok(next) => Ok(next.sample_rate == first.sample_rate
                && next.channel_configuration == first.channel_configuration),
            Err(_) => Ok(false),
        }
    }

    /// Open a demuxer over the stream behind `reader`.
    pub async fn open(reader: Arc<Reader>) -> Result<Arc<AdtsDemuxer>> {
        let head = match reader.slice(0, 16).await? {
            Some(head) => head,
            None => return invalid_format_error("adts: empty stream"),
        };

        let first_header = AdtsFrameHeader::parse(head.as_bytes())?;

        Ok(Arc::new(AdtsDemuxer {
            reader,
            first_header,
            state: AsyncMutex::new(ScanState { frames: Vec::new(), next_offset: 0, done: false }),
        }))
    }

    fn sample_rate(&self) -> u32 {
        self.first_header.sample_rate
    }

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

        let header = match AdtsFrameHeader::parse(slice.as_bytes()) {
            Ok(header) => header,
            Err(_) => {
                state.done = true;
                return Ok(false);
            }
        };

        if slice.len() < header.frame_len {
            state.done = true;
            return Ok(false);
        }

        state.frames.push(FrameEntry {
            offset: state.next_offset,
            payload_offset: header.header_len as u8,
            len: header.frame_len as u32,
            index: state.frames.len() as u64,
        });
        state.next_offset += header.frame_len as u64;

        Ok(true)
    }

    async fn ensure_frames(&self, state: &mut ScanState, count: usize) -> Result<()> {
        while state.frames.len() < count && self.scan_one(state).await? {}
        Ok(())
    }

    async fn packet_for(&self, entry: FrameEntry, opts: PacketOptions) -> Result<EncodedPacket> {
        let spf = f64::from(AdtsFrameHeader::SAMPLES_PER_FRAME);
        let rate = f64::from(self.sample_rate());
        let timestamp = entry.index as f64 * spf / rate;
        let duration = spf / rate;

        let payload_len = u64::from(entry.len) - u64::from(entry.payload_offset);

        if opts.metadata_only {
            return Ok(EncodedPacket::new_metadata_only(
                PacketType::Key,
                timestamp,
                duration,
                entry.index as i64,
                payload_len,
            ));
        }

        // Strip the ADTS header; packets carry raw AAC frames.
        let start = entry.offset + u64::from(entry.payload_offset);
        let data = match self.reader.slice(start, payload_len).await? {
            Some(mut slice) => slice.read_remaining().to_vec(),
            None => return invalid_format_error("adts: frame data out of range"),
        };

        Ok(EncodedPacket::new(data, PacketType::Key, timestamp, duration, entry.index as i64))
    }

    async fn packet_by_index(&self, index: usize, opts: PacketOptions) -> Result<Option<EncodedPacket>> {
        let mut state = self.state.lock().await;
        self.ensure_frames(&mut state, index + 1).await?;

        match state.frames.get(index).copied() {
            Some(entry) => Ok(Some(self.packet_for(entry, opts).await?)),
            None => Ok(None),
        }
    }

    async fn packet_at_time(&self, time: f64, opts: PacketOptions) -> Result<Option<EncodedPacket>> {
        if time < 0.0 {
            return Ok(None);
        }

        let spf = u64::from(AdtsFrameHeader::SAMPLES_PER_FRAME);
        let target_sample = (time * f64::from(self.sample_rate())) as u64;
        let target_frame = target_sample / spf;

        let mut state = self.state.lock().await;
        self.ensure_frames(&mut state, target_frame as usize + 1).await?;

        let index = match binary_search_less_or_equal(&state.frames, target_frame, |f| f.index) {
            Some(index) => index,
            None => return Ok(None),
        };

        if state.frames[index].index < target_frame {
            // The stream ended before the requested time.
            return Ok(None);
        }

        let entry = state.frames[index];
        Ok(Some(self.packet_for(entry, opts).await?))
    }
}

#[async_trait]
impl Demuxer for AdtsDemuxer {
    fn format_info(&self) -> &'static FormatInfo {
        &ADTS_FORMAT_INFO
    }

    async fn tracks(self: Arc<Self>) -> Result<Vec<InputTrack>> {
        let info = TrackInfo::Audio(AudioTrackInfo {
            codec: AudioCodec::Aac,
            channel_count: u32::from(self.first_header.channel_configuration),
            sample_rate: self.sample_rate(),
            decoder_config: Some(self.first_header.audio_specific_config().into()),
        });

        let time_resolution = f64::from(self.sample_rate());
        let reader = Arc::new(AdtsTrackReader { demuxer: self.clone() });

        Ok(vec![InputTrack::new(1, info, "und".to_string(), None, time_resolution, reader)])
    }

    async fn compute_duration(self: Arc<Self>) -> Result<f64> {
        let mut state = self.state.lock().await;
        while self.scan_one(&mut state).await? {}

        let spf = f64::from(AdtsFrameHeader::SAMPLES_PER_FRAME);
        Ok(state.frames.len() as f64 * spf / f64::from(self.sample_rate()))
    }

    fn dispose(&self) {
        self.reader.dispose();
    }
}

struct AdtsTrackReader {
    demuxer: Arc<AdtsDemuxer>,
}

#[async_trait]
impl TrackReader for AdtsTrackReader {
    async fn first_timestamp(&self) -> Result<f64> {
        Ok(0.0)
    }

    async fn compute_duration(&self) -> Result<f64> {
        self.demuxer.clone().compute_duration().await
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
            return invalid_format_error("adts: packet has no sequence number");
        }
        self.demuxer.packet_by_index(index as usize + 1, opts).await
    }

    async fn key_packet_at(&self, time: f64, opts: PacketOptions) -> Result<Option<EncodedPacket>> {
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
        Ok(Some(aac_codec_parameter_string(self.demuxer.first_header.object_type)))
    }

    async fn decoder_config(&self) -> Result<Option<Box<[u8]>>> {
        Ok(Some(self.demuxer.first_header.audio_specific_config().into()))
    }
}

/// The probe registration for the ADTS format.
pub fn registration() -> DemuxerRegistration {
    DemuxerRegistration {
        info: &ADTS_FORMAT_INFO,
        can_read: |reader| Box::pin(AdtsDemuxer::can_read(reader)),
        open: |reader| {
            Box::pin(async move {
                let demuxer = AdtsDemuxer::open(reader).await?;
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

    use super::AdtsDemuxer;
    use remux_common::mpeg::audio::AdtsFrameHeader;

    fn test_stream(frames: usize, payload_len: usize) -> Vec<u8> {
        let header = AdtsFrameHeader {
            object_type: 2,
            sample_rate_idx: 4,
            sample_rate: 44_100,
            channel_configuration: 2,
            frame_len: payload_len + 7,
            header_len: 7,
        };

        let mut data = Vec::new();
        for i in 0..frames {
            data.extend_from_slice(&header.serialize(payload_len));
            data.extend_from_slice(&vec![i as u8; payload_len]);
        }
        data
    }

    fn reader_over(data: Vec<u8>) -> Arc<Reader> {
        Arc::new(Reader::new(Arc::new(BufSource::new(data))))
    }

    #[tokio::test]
    async fn verify_can_read_and_packets() {
        let reader = reader_over(test_stream(4, 100));
        assert!(AdtsDemuxer::can_read(&reader).await.unwrap());

        let demuxer = AdtsDemuxer::open(reader).await.unwrap();
        let tracks = demuxer.clone().tracks().await.unwrap();
        let track = &tracks[0];

        let first = track.first_packet(PacketOptions::default()).await.unwrap().unwrap();
        // The ADTS header must be stripped.
        assert_eq!(first.data().len(), 100);
        assert_eq!(first.timestamp(), 0.0);

        let second = track.next_packet(&first, PacketOptions::default()).await.unwrap().unwrap();
        assert_eq!(second.data(), &vec![1u8; 100][..]);

        let duration = demuxer.compute_duration().await.unwrap();
        assert!((duration - 4.0 * 1024.0 / 44_100.0).abs() < 1e-9);

        assert_eq!(
            track.decoder_config().await.unwrap().as_deref(),
            Some(&[0x12u8, 0x10][..])
        );
    }
}
