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
use remux_core::errors::{invalid_format_error, unsupported_codec_error, Result};
use remux_core::io::{Reader, SliceReader};
use remux_core::packet::{EncodedPacket, PacketType};
use remux_core::probe::DemuxerRegistration;
use remux_core::track::{AudioCodec, AudioTrackInfo, TrackInfo};

use crate::common::read_chunk_header;
use crate::WAVE_FORMAT_INFO;

/// Audio frames per virtual packet.
const FRAMES_PER_PACKET: u64 = 2048;

const WAVE_FORMAT_PCM: u16 = 0x0001;
const WAVE_FORMAT_IEEE_FLOAT: u16 = 0x0003;
const WAVE_FORMAT_ALAW: u16 = 0x0006;
const WAVE_FORMAT_MULAW: u16 = 0x0007;
const WAVE_FORMAT_EXTENSIBLE: u16 = 0xfffe;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
enum RiffForm {
    /// Little-endian `RIFF`.
    Riff,
    /// Big-endian `RIFX`.
    Rifx,
    /// 64-bit `RF64` with a `ds64` size chunk.
    Rf64,
}

/// The parsed `fmt ` chunk.
#[derive(Clone, Debug)]
struct WaveFormat {
    codec: AudioCodec,
    channel_count: u32,
    sample_rate: u32,
    block_align: u32,
}

/// WAVE (RIFF/RIFX/RF64) demultiplexer.
///
/// The sample data is one contiguous PCM stream; the demuxer exposes it as fixed-length virtual
/// packets and seeks by plain arithmetic.
pub struct WaveDemuxer {
    reader: Arc<Reader>,
    format: WaveFormat,
    data_pos: u64,
    data_len: u64,
}

impl WaveDemuxer {
    /// Probe check: a RIFF/RIFX/RF64 header with a `WAVE` form type.
    pub async fn can_read(reader: &Reader) -> Result<bool> {
        let mut head = match reader.slice(0, 12).await? {
            Some(head) if head.len() == 12 => head,
            _ => return Ok(false),
        };

        let tag = head.read_quad_bytes()?;
        if &tag != b"RIFF" && &tag != b"RIFX" && &tag != b"RF64" {
            return Ok(false);
        }

        head.skip(4)?;
        Ok(&head.read_quad_bytes()? == b"WAVE")
    }

    /// Open a demuxer over the stream behind `reader`.
    pub async fn open(reader: Arc<Reader>) -> Result<Arc<WaveDemuxer>> {
        let mut head = match reader.slice(0, 12).await? {
            Some(head) if head.len() == 12 => head,
            _ => return invalid_format_error("wave: truncated RIFF header"),
        };

        let form = match &head.read_quad_bytes()? {
            b"RIFF" => RiffForm::Riff,
            b"RIFX" => RiffForm::Rifx,
            b"RF64" => RiffForm::Rf64,
            _ => return invalid_format_error("wave: not a RIFF stream"),
        };

        head.skip(4)?;
        if &head.read_quad_bytes()? != b"WAVE" {
            return invalid_format_error("wave: not a WAVE form");
        }

        let big_endian = form == RiffForm::Rifx;
        let mut pos = 12u64;
        let mut format = None;
        let mut data: Option<(u64, u64)> = None;
        let mut ds64_data_len = None;

        while let Some(chunk) = read_chunk_header(&reader, pos, big_endian).await? {
            match &chunk.id {
                b"ds64" => {
                    // RF64 sizes: riff size, data size, sample count.
                    if let Some(mut body) = reader.slice(chunk.data_pos, 24).await? {
                        body.skip(8)?;
                        ds64_data_len = Some(body.read_u64_le()?);
                    }
                }
                b"fmt " => {
                    let mut body = match reader.slice(chunk.data_pos, u64::from(chunk.size)).await? {
                        Some(body) => body,
                        None => return invalid_format_error("wave: truncated fmt chunk"),
                    };
                    format = Some(parse_fmt(&mut body, big_endian)?);
                }
                b"data" => {
                    // An RF64 data chunk stores its true size in ds64.
                    let size = if chunk.size == u32::MAX {
                        ds64_data_len
                            .ok_or(remux_core::errors::Error::InvalidFormat(
                                "wave: rf64 data chunk without ds64",
                            ))?
                    }
                    else {
                        u64::from(chunk.size)
                    };
                    data = Some((chunk.data_pos, size));

                    // The format chunk is mandated to precede the data chunk; stop here so
                    // unseekable-style streams do not require reading past the sample data.
                    if format.is_some() {
                        break;
                    }
                }
                _ => debug!("ignoring chunk {}", String::from_utf8_lossy(&chunk.id)),
            }

            pos = chunk.next_pos();
        }

        let format = match format {
            Some(format) => format,
            None => return invalid_format_error("wave: missing fmt chunk"),
        };
        let (data_pos, mut data_len) = match data {
            Some(data) => data,
            None => return invalid_format_error("wave: missing data chunk"),
        };

        // Clamp to the real source size; truncated files are common.
        let source_len = reader.byte_len().await?;
        data_len = data_len.min(source_len.saturating_sub(data_pos));
        // Whole frames only.
        data_len -= data_len % u64::from(format.block_align);

        Ok(Arc::new(WaveDemuxer { reader, format, data_pos, data_len }))
    }

    fn frame_count(&self) -> u64 {
        self.data_len / u64::from(self.format.block_align)
    }

    fn packet_count(&self) -> u64 {
        (self.frame_count() + FRAMES_PER_PACKET - 1) / FRAMES_PER_PACKET
    }

    async fn packet_by_index(&self, index: u64, opts: PacketOptions) -> Result<Option<EncodedPacket>> {
        if index >= self.packet_count() {
            return Ok(None);
        }

        let block_align = u64::from(self.format.block_align);
        let start_frame = index * FRAMES_PER_PACKET;
        let frames = FRAMES_PER_PACKET.min(self.frame_count() - start_frame);

        let rate = f64::from(self.format.sample_rate);
        let timestamp = start_frame as f64 / rate;
        let duration = frames as f64 / rate;
        let byte_len = frames * block_align;

        if opts.metadata_only {
            return Ok(Some(EncodedPacket::new_metadata_only(
                PacketType::Key,
                timestamp,
                duration,
                index as i64,
                byte_len,
            )));
        }

        let offset = self.data_pos + start_frame * block_align;
        let data = match self.reader.slice(offset, byte_len).await? {
            Some(mut slice) => slice.read_remaining().to_vec(),
            None => return invalid_format_error("wave: sample data out of range"),
        };

        Ok(Some(EncodedPacket::new(data, PacketType::Key, timestamp, duration, index as i64)))
    }
}

fn parse_fmt(body: &mut SliceReader, big_endian: bool) -> Result<WaveFormat> {
    let read_u16 =
        |body: &mut SliceReader| if big_endian { body.read_u16() } else { body.read_u16_le() };
    let read_u32 =
        |body: &mut SliceReader| if big_endian { body.read_u32() } else { body.read_u32_le() };

    let mut format_tag = read_u16(body)?;
    let channel_count = u32::from(read_u16(body)?);
    let sample_rate = read_u32(body)?;
    // nAvgBytesPerSec
    read_u32(body)?;
    let block_align = u32::from(read_u16(body)?);
    let bits_per_sample = read_u16(body)?;

    if format_tag == WAVE_FORMAT_EXTENSIBLE {
        // cbSize, valid bits, channel mask, then the sub-format GUID whose first two bytes are
        // the real format tag.
        body.skip(8)?;
        format_tag = body.read_u16_le()?;
    }

    let codec = match (format_tag, bits_per_sample) {
        (WAVE_FORMAT_PCM, 8) => AudioCodec::PcmU8,
        (WAVE_FORMAT_PCM, 16) => {
            if big_endian {
                AudioCodec::PcmS16Be
            }
            else {
                AudioCodec::PcmS16
            }
        }
        (WAVE_FORMAT_PCM, 24) => {
            if big_endian {
                AudioCodec::PcmS24Be
            }
            else {
                AudioCodec::PcmS24
            }
        }
        (WAVE_FORMAT_PCM, 32) => {
            if big_endian {
                AudioCodec::PcmS32Be
            }
            else {
                AudioCodec::PcmS32
            }
        }
        (WAVE_FORMAT_IEEE_FLOAT, 32) => AudioCodec::PcmF32,
        (WAVE_FORMAT_IEEE_FLOAT, 64) => AudioCodec::PcmF64,
        (WAVE_FORMAT_ALAW, _) => AudioCodec::Alaw,
        (WAVE_FORMAT_MULAW, _) => AudioCodec::Ulaw,
        _ => return unsupported_codec_error("wave: unsupported format tag"),
    };

    if channel_count == 0 || sample_rate == 0 || block_align == 0 {
        return invalid_format_error("wave: invalid fmt chunk");
    }

    Ok(WaveFormat { codec, channel_count, sample_rate, block_align })
}

#[async_trait]
impl Demuxer for WaveDemuxer {
    fn format_info(&self) -> &'static FormatInfo {
        &WAVE_FORMAT_INFO
    }

    async fn tracks(self: Arc<Self>) -> Result<Vec<InputTrack>> {
        let info = TrackInfo::Audio(AudioTrackInfo {
            codec: self.format.codec,
            channel_count: self.format.channel_count,
            sample_rate: self.format.sample_rate,
            decoder_config: None,
        });

        let time_resolution = f64::from(self.format.sample_rate);
        let reader = Arc::new(WaveTrackReader { demuxer: self.clone() });

        Ok(vec![InputTrack::new(1, info, "und".to_string(), None, time_resolution, reader)])
    }

    async fn compute_duration(self: Arc<Self>) -> Result<f64> {
        Ok(self.frame_count() as f64 / f64::from(self.format.sample_rate))
    }

    fn dispose(&self) {
        self.reader.dispose();
    }
}

struct WaveTrackReader {
    demuxer: Arc<WaveDemuxer>,
}

#[async_trait]
impl TrackReader for WaveTrackReader {
    async fn first_timestamp(&self) -> Result<f64> {
        Ok(0.0)
    }

    async fn compute_duration(&self) -> Result<f64> {
        let frames = self.demuxer.frame_count();
        Ok(frames as f64 / f64::from(self.demuxer.format.sample_rate))
    }

    async fn first_packet(&self, opts: PacketOptions) -> Result<Option<EncodedPacket>> {
        self.demuxer.packet_by_index(0, opts).await
    }

    async fn packet_at(&self, time: f64, opts: PacketOptions) -> Result<Option<EncodedPacket>> {
        if time < 0.0 {
            return Ok(None);
        }

        let frame = (time * f64::from(self.demuxer.format.sample_rate)) as u64;
        if frame >= self.demuxer.frame_count() {
            return Ok(None);
        }

        self.demuxer.packet_by_index(frame / FRAMES_PER_PACKET, opts).await
    }

    async fn next_packet(
        &self,
        packet: &EncodedPacket,
        opts: PacketOptions,
    ) -> Result<Option<EncodedPacket>> {
        let index = packet.sequence_number();
        if index < 0 {
            return invalid_format_error("wave: packet has no sequence number");
        }
        self.demuxer.packet_by_index(index as u64 + 1, opts).await
    }

    async fn key_packet_at(&self, time: f64, opts: PacketOptions) -> Result<Option<EncodedPacket>> {
        self.packet_at(time, opts).await
    }

    async fn next_key_packet(
        &self,
        packet: &EncodedPacket,
        opts: PacketOptions,
    ) -> Result<Option<EncodedPacket>> {
        self.next_packet(packet, opts).await
    }

    async fn codec_parameter_string(&self) -> Result<Option<String>> {
        Ok(Some(self.demuxer.format.codec.tag().to_string()))
    }

    async fn decoder_config(&self) -> Result<Option<Box<[u8]>>> {
        Ok(None)
    }
}

/// The probe registration for the WAVE format.
pub fn registration() -> DemuxerRegistration {
    DemuxerRegistration {
        info: &WAVE_FORMAT_INFO,
        can_read: |reader| Box::pin(WaveDemuxer::can_read(reader)),
        open: |reader| {
            Box::pin(async move {
                let demuxer = WaveDemuxer::open(reader).await?;
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
    use remux_core::track::{AudioCodec, TrackInfo};

    use super::WaveDemuxer;

    fn wave_file(frames: u32) -> Vec<u8> {
        let data_len = frames * 4; // 16-bit stereo
        let mut out = Vec::new();
        out.extend_from_slice(b"RIFF");
        out.extend_from_slice(&(36 + data_len).to_le_bytes());
        out.extend_from_slice(b"WAVE");

        out.extend_from_slice(b"fmt ");
        out.extend_from_slice(&16u32.to_le_bytes());
        out.extend_from_slice(&1u16.to_le_bytes()); // PCM
        out.extend_from_slice(&2u16.to_le_bytes()); // stereo
        out.extend_from_slice(&48_000u32.to_le_bytes());
        out.extend_from_slice(&(48_000u32 * 4).to_le_bytes());
        out.extend_from_slice(&4u16.to_le_bytes()); // block align
        out.extend_from_slice(&16u16.to_le_bytes());

        out.extend_from_slice(b"data");
        out.extend_from_slice(&data_len.to_le_bytes());
        out.extend_from_slice(&vec![0u8; data_len as usize]);
        out
    }

    fn reader_over(data: Vec<u8>) -> Arc<Reader> {
        Arc::new(Reader::new(Arc::new(BufSource::new(data))))
    }

    #[tokio::test]
    async fn verify_open_and_packets() {
        let reader = reader_over(wave_file(48_000));
        assert!(WaveDemuxer::can_read(&reader).await.unwrap());

        let demuxer = WaveDemuxer::open(reader).await.unwrap();
        assert_eq!(demuxer.clone().compute_duration().await.unwrap(), 1.0);

        let tracks = demuxer.tracks().await.unwrap();
        let track = &tracks[0];
        match &track.info {
            TrackInfo::Audio(info) => {
                assert_eq!(info.codec, AudioCodec::PcmS16);
                assert_eq!(info.channel_count, 2);
                assert_eq!(info.sample_rate, 48_000);
            }
            _ => panic!("expected an audio track"),
        }

        let first = track.first_packet(PacketOptions::default()).await.unwrap().unwrap();
        assert_eq!(first.timestamp(), 0.0);
        assert_eq!(first.byte_length(), 2048 * 4);

        // Seek into the middle of the stream.
        let packet = track.packet_at(0.5, PacketOptions::default()).await.unwrap().unwrap();
        assert!(packet.timestamp() <= 0.5 && 0.5 < packet.end_timestamp());

        // Past the end.
        assert!(track.packet_at(1.5, PacketOptions::default()).await.unwrap().is_none());
    }
}
