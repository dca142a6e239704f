// Remux
// Copyright (c) 2026 The Project Remux Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use std::sync::Arc;

use async_trait::async_trait;
use log::debug;

use remux_core::demux::{Demuxer, FormatInfo, InputTrack, PacketOptions, TrackReader};
use remux_core::errors::{invalid_format_error, Result};
use remux_core::io::Reader;
use remux_core::packet::{EncodedPacket, PacketType};
use remux_core::probe::DemuxerRegistration;
use remux_core::sync::AsyncMutex;
use remux_core::track::{AudioCodec, AudioTrackInfo, TrackInfo};
use remux_core::util::sort::binary_search_less_or_equal;

use crate::frame::{is_sync_pair, parse_frame_header};
use crate::FLAC_FORMAT_INFO;

const FLAC_MARKER: &[u8; 4] = b"fLaC";

/// The number of bytes fetched per forward scan step.
const SCAN_WINDOW: u64 = 64 * 1024;

/// Fields of the mandatory STREAMINFO metadata block.
#[derive(Clone, Debug)]
struct StreamInfo {
    min_block_size: u16,
    sample_rate: u32,
    channel_count: u32,
    total_samples: u64,
    /// The raw 34-byte STREAMINFO payload, exposed as the decoder configuration.
    raw: Box<[u8]>,
}

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
    done: bool,
}

/// Native FLAC stream demultiplexer: the `fLaC` marker, a METADATA_BLOCK sequence, then frames.
///
/// Frames carry no length field; each frame ends where the next CRC-validated sync header
/// begins, so the stream is indexed by a forward scan.
pub struct FlacDemuxer {
    reader: Arc<Reader>,
    info: StreamInfo,
    first_frame_offset: u64,
    state: AsyncMutex<ScanState>,
}

impl FlacDemuxer {
    /// Probe check: the `fLaC` stream marker.
    pub async fn can_read(reader: &Reader) -> Result<bool> {
        match reader.slice(0, 4).await? {
            Some(head) => Ok(head.as_bytes() == &FLAC_MARKER[..]),
            None => Ok(false),
        }
    }

    /// Open a demuxer over the stream behind `reader`.
    pub async fn open(reader: Arc<Reader>) -> Result<Arc<FlacDemuxer>> {
        let mut head = match reader.slice(0, 4).await? {
            Some(head) if head.len() == 4 => head,
            _ => return invalid_format_error("flac: truncated stream"),
        };
        if head.read_quad_bytes()? != *FLAC_MARKER {
            return invalid_format_error("flac: missing fLaC marker");
        }

        // Walk the metadata blocks; STREAMINFO is required first.
        let mut pos = 4u64;
        let mut info = None;

        loop {
            let mut header = match reader.slice(pos, 4).await? {
                Some(header) if header.len() == 4 => header,
                _ => return invalid_format_error("flac: truncated metadata block"),
            };

            let flags = header.read_u8()?;
            let last = flags & 0x80 != 0;
            let block_type = flags & 0x7f;
            let size = header.read_u24()?;

            if block_type == 0 {
                let body = match reader.slice(pos + 4, u64::from(size)).await? {
                    Some(body) if body.len() == size as usize => body,
                    _ => return invalid_format_error("flac: truncated STREAMINFO"),
                };
                info = Some(parse_stream_info(body.as_bytes())?);
            }
            else {
                debug!("skipping metadata block type {} ({} bytes)", block_type, size);
            }

            pos += 4 + u64::from(size);
            if last {
                break;
            }
        }

        let info = match info {
            Some(info) => info,
            None => return invalid_format_error("flac: missing STREAMINFO"),
        };

        Ok(Arc::new(FlacDemuxer {
            reader,
            info,
            first_frame_offset: pos,
            state: AsyncMutex::new(ScanState { frames: Vec::new(), next_offset: pos, done: false }),
        }))
    }

    /// Find the next CRC-validated frame sync at or after `from`. Returns the offset.
    async fn find_sync(&self, from: u64) -> Result<Option<u64>> {
        let mut base = from;

        loop {
            let window = match self.reader.slice(base, SCAN_WINDOW).await? {
                Some(window) if window.len() >= 6 => window,
                _ => return Ok(None),
            };
            let bytes = window.as_bytes();

            for i in 0..bytes.len() - 1 {
                if is_sync_pair(bytes[i], bytes[i + 1])
                    && parse_frame_header(&bytes[i..]).is_ok()
                {
                    return Ok(Some(base + i as u64));
                }
            }

            if (window.len() as u64) < SCAN_WINDOW {
                return Ok(None);
            }

            // Overlap by one byte so a sync pair straddling the boundary is found.
            base += SCAN_WINDOW - 1;
        }
    }

    /// Index one more frame. Returns false at end of stream.
    async fn scan_one(&self, state: &mut ScanState) -> Result<bool> {
        if state.done {
            return Ok(false);
        }

        let offset = match self.find_sync(state.next_offset).await? {
            Some(offset) => offset,
            None => {
                state.done = true;
                return Ok(false);
            }
        };

        let header_slice = match self.reader.slice(offset, 64).await? {
            Some(slice) => slice,
            None => {
                state.done = true;
                return Ok(false);
            }
        };

        let header = match parse_frame_header(header_slice.as_bytes()) {
            Ok(header) => header,
            Err(_) => {
                state.done = true;
                return Ok(false);
            }
        };

        // The frame ends at the next sync, or at end of stream.
        let end = match self.find_sync(offset + header.header_len as u64).await? {
            Some(end) => end,
            None => self.reader.byte_len().await?,
        };

        state.frames.push(FrameEntry {
            offset,
            len: (end - offset) as u32,
            start_sample: header.start_sample(u32::from(self.info.min_block_size)),
            samples: header.block_size,
        });
        state.next_offset = end;

        Ok(true)
    }

    async fn ensure_frames(&self, state: &mut ScanState, count: usize) -> Result<()> {
        while state.frames.len() < count && self.scan_one(state).await? {}
        Ok(())
    }

    async fn ensure_sample(&self, state: &mut ScanState, sample: u64) -> Result<()> {
        loop {
            let covered = state
                .frames
                .last()
                .map_or(0, |last| last.start_sample + u64::from(last.samples));
            if covered > sample || !self.scan_one(state).await? {
                return Ok(());
            }
        }
    }

    async fn packet_for(&self, entry: FrameEntry, index: usize, opts: PacketOptions) -> Result<EncodedPacket> {
        let rate = f64::from(self.info.sample_rate);
        let timestamp = entry.start_sample as f64 / rate;
        let duration = f64::from(entry.samples) / rate;

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
            None => return invalid_format_error("flac: frame data out of range"),
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

        let target = (time * f64::from(self.info.sample_rate)) as u64;

        let mut state = self.state.lock().await;
        self.ensure_sample(&mut state, target).await?;

        let index = match binary_search_less_or_equal(&state.frames, target, |f| f.start_sample) {
            Some(index) => index,
            None => return Ok(None),
        };

        let entry = state.frames[index];
        if target >= entry.start_sample + u64::from(entry.samples) {
            return Ok(None);
        }

        Ok(Some(self.packet_for(entry, index, opts).await?))
    }
}

fn parse_stream_info(data: &[u8]) -> Result<StreamInfo> {
    if data.len() < 34 {
        return invalid_format_error("flac: STREAMINFO too short");
    }

    let min_block_size = u16::from_be_bytes([data[0], data[1]]);

    // Sample rate (20 bits), channels-1 (3), bits-1 (5), total samples (36) packed across
    // bytes 10 through 17.
    let sample_rate = (u32::from(data[10]) << 12) | (u32::from(data[11]) << 4) | (u32::from(data[12]) >> 4);
    let channel_count = ((data[12] >> 1) & 0x07) as u32 + 1;
    let total_samples = (u64::from(data[13] & 0x0f) << 32)
        | (u64::from(data[14]) << 24)
        | (u64::from(data[15]) << 16)
        | (u64::from(data[16]) << 8)
        | u64::from(data[17]);

    if sample_rate == 0 {
        return invalid_format_error("flac: invalid sample rate");
    }

    Ok(StreamInfo {
        min_block_size,
        sample_rate,
        channel_count,
        total_samples,
        raw: Box::from(&data[..34]),
    })
}

#[async_trait]
impl Demuxer for FlacDemuxer {
    fn format_info(&self) -> &'static FormatInfo {
        &FLAC_FORMAT_INFO
    }

    async fn tracks(self: Arc<Self>) -> Result<Vec<InputTrack>> {
        let info = TrackInfo::Audio(AudioTrackInfo {
            codec: AudioCodec::Flac,
            channel_count: self.info.channel_count,
            sample_rate: self.info.sample_rate,
            decoder_config: Some(self.info.raw.clone()),
        });

        let time_resolution = f64::from(self.info.sample_rate);
        let reader = Arc::new(FlacTrackReader { demuxer: self.clone() });

        Ok(vec![InputTrack::new(1, info, "und".to_string(), None, time_resolution, reader)])
    }

    async fn compute_duration(self: Arc<Self>) -> Result<f64> {
        if self.info.total_samples > 0 {
            return Ok(self.info.total_samples as f64 / f64::from(self.info.sample_rate));
        }

        let mut state = self.state.lock().await;
        while self.scan_one(&mut state).await? {}

        let samples =
            state.frames.last().map_or(0, |last| last.start_sample + u64::from(last.samples));
        Ok(samples as f64 / f64::from(self.info.sample_rate))
    }

    fn dispose(&self) {
        self.reader.dispose();
    }
}

struct FlacTrackReader {
    demuxer: Arc<FlacDemuxer>,
}

#[async_trait]
impl TrackReader for FlacTrackReader {
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
            return invalid_format_error("flac: packet has no sequence number");
        }
        self.demuxer.packet_by_index(index as usize + 1, opts).await
    }

    async fn key_packet_at(&self, time: f64, opts: PacketOptions) -> Result<Option<EncodedPacket>> {
        // Every FLAC frame is independently decodable.
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
        Ok(Some("flac".to_string()))
    }

    async fn decoder_config(&self) -> Result<Option<Box<[u8]>>> {
        Ok(Some(self.demuxer.info.raw.clone()))
    }
}

/// The probe registration for the FLAC format.
pub fn registration() -> DemuxerRegistration {
    DemuxerRegistration {
        info: &FLAC_FORMAT_INFO,
        can_read: |reader| Box::pin(FlacDemuxer::can_read(reader)),
        open: |reader| {
            Box::pin(async move {
                let demuxer = FlacDemuxer::open(reader).await?;
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

    use super::FlacDemuxer;
    use crate::frame::build_frame_header;

    fn stream_info_block(sample_rate: u32, channels: u32, total_samples: u64) -> Vec<u8> {
        let mut block = vec![0x80, 0, 0, 34]; // last block, type 0, 34 bytes
        let mut body = vec![0u8; 34];
        // min/max block size: 4096.
        body[0..2].copy_from_slice(&4096u16.to_be_bytes());
        body[2..4].copy_from_slice(&4096u16.to_be_bytes());
        body[10] = (sample_rate >> 12) as u8;
        body[11] = (sample_rate >> 4) as u8;
        body[12] = (((sample_rate & 0x0f) as u8) << 4) | (((channels - 1) as u8) << 1);
        body[13] = (0x0f & (total_samples >> 32) as u8) | 0x00;
        body[14..18].copy_from_slice(&(total_samples as u32).to_be_bytes());
        block.extend_from_slice(&body);
        block
    }

    fn flac_file(frames: usize) -> Vec<u8> {
        let mut data = b"fLaC".to_vec();
        data.extend_from_slice(&stream_info_block(44_100, 2, frames as u64 * 4096));

        for i in 0..frames {
            // Block size code 0b1100 = 4096 samples.
            data.extend_from_slice(&build_frame_header(i as u64, 0b1100));
            // Payload bytes that cannot false-sync.
            data.extend_from_slice(&[0x00; 32]);
        }
        data
    }

    fn reader_over(data: Vec<u8>) -> Arc<Reader> {
        Arc::new(Reader::new(Arc::new(BufSource::new(data))))
    }

    #[tokio::test]
    async fn verify_open_and_packets() {
        let reader = reader_over(flac_file(3));
        assert!(FlacDemuxer::can_read(&reader).await.unwrap());

        let demuxer = FlacDemuxer::open(reader).await.unwrap();

        let duration = demuxer.clone().compute_duration().await.unwrap();
        assert!((duration - 3.0 * 4096.0 / 44_100.0).abs() < 1e-9);

        let tracks = demuxer.tracks().await.unwrap();
        let track = &tracks[0];

        let first = track.first_packet(PacketOptions::default()).await.unwrap().unwrap();
        assert_eq!(first.timestamp(), 0.0);
        assert!((first.duration() - 4096.0 / 44_100.0).abs() < 1e-9);

        let second = track.next_packet(&first, PacketOptions::default()).await.unwrap().unwrap();
        assert!((second.timestamp() - 4096.0 / 44_100.0).abs() < 1e-9);

        // The frame payload is delimited by the next sync.
        assert_eq!(first.data().len(), 6 + 32);
    }
}
