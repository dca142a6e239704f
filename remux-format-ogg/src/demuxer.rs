// Remux
// Copyright (c) 2026 The Project Remux Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use std::sync::Arc;

use async_trait::async_trait;
use log::{debug, warn};

use remux_common::xiph::opus::{self, OpusIdHeader, OPUS_SAMPLE_RATE};
use remux_common::xiph::vorbis::{
    self, VorbisIdentHeader, VorbisModeInfo, VORBIS_HEADER_TYPE_COMMENT, VORBIS_HEADER_TYPE_IDENT,
    VORBIS_HEADER_TYPE_SETUP,
};
use remux_common::xiph::lace_packets;
use remux_core::demux::{Demuxer, FormatInfo, InputTrack, PacketOptions, TrackReader};
use remux_core::errors::{invalid_format_error, Result};
use remux_core::io::Reader;
use remux_core::packet::{EncodedPacket, PacketType};
use remux_core::probe::DemuxerRegistration;
use remux_core::sync::AsyncMutex;
use remux_core::track::{AudioCodec, AudioTrackInfo, TrackInfo};

use crate::page::{read_page_at, sync_next_page, Page, OGG_PAGE_MARKER, OGG_PAGE_MAX_SIZE};
use crate::OGG_FORMAT_INFO;

/// Bisection terminates once the candidate range is this small and a linear walk takes over.
const BISECT_LINEAR_THRESHOLD: u64 = 128 * 1024;

/// The per-codec state of one logical bitstream.
enum StreamCodec {
    Vorbis {
        ident: VorbisIdentHeader,
        modes: VorbisModeInfo,
        /// The three header packets, Xiph-laced, as other containers expect the decoder
        /// description.
        codec_private: Box<[u8]>,
    },
    Opus {
        head: OpusIdHeader,
        id_packet: Box<[u8]>,
    },
}

impl StreamCodec {
    fn sample_rate(&self) -> u32 {
        match self {
            StreamCodec::Vorbis { ident, .. } => ident.sample_rate,
            StreamCodec::Opus { .. } => OPUS_SAMPLE_RATE,
        }
    }

    /// The granule value corresponding to presentation time zero.
    fn granule_offset(&self) -> i64 {
        match self {
            StreamCodec::Vorbis { .. } => 0,
            StreamCodec::Opus { head, .. } => i64::from(head.pre_skip),
        }
    }

    /// The duration of `packet` in granule units. For Vorbis this depends on the previous
    /// packet's block size, threaded through `prev_block`.
    fn packet_duration(&self, packet: &[u8], prev_block: &mut Option<u32>) -> u32 {
        match self {
            StreamCodec::Vorbis { modes, .. } => match modes.packet_block_size(packet) {
                Ok(block) => {
                    let dur = modes.packet_sample_count(*prev_block, block);
                    *prev_block = Some(block);
                    dur
                }
                Err(_) => 0,
            },
            StreamCodec::Opus { .. } => opus::packet_sample_count(packet).unwrap_or(0),
        }
    }
}

struct LogicalStream {
    serial: u32,
    codec: StreamCodec,
    /// Position of the first audio packet: page offset and segment index.
    data_start: (u64, usize),
}

/// A read cursor over the packets of one logical bitstream.
struct Cursor {
    page: Page,
    /// Index of the next unconsumed segment.
    seg: usize,
}

/// Ogg demultiplexer.
///
/// Logical bitstreams are enumerated from the beginning-of-stream pages. Seeking bisects on byte
/// position, validated by the per-page CRC, then anchors packet timing on a page granule and
/// walks forward.
pub struct OggDemuxer {
    reader: Arc<Reader>,
    streams: Vec<LogicalStream>,
    /// Serializes packet walks; the reader cache is shared across cooperative callers.
    lock: AsyncMutex<()>,
}

impl OggDemuxer {
    /// Probe check: the `OggS` capture pattern.
    pub async fn can_read(reader: &Reader) -> Result<bool> {
        match reader.slice(0, 4).await? {
            Some(head) => Ok(head.as_bytes() == &OGG_PAGE_MARKER[..]),
            None => Ok(false),
        }
    }

    /// Open a demuxer over the stream behind `reader`.
    pub async fn open(reader: Arc<Reader>) -> Result<Arc<OggDemuxer>> {
        // Collect the beginning-of-stream pages; they precede all other pages.
        let mut bos_pages = Vec::new();
        let mut pos = 0u64;

        loop {
            let page = match read_page_at(&reader, pos).await? {
                Some(page) if page.is_bos => page,
                _ => break,
            };
            pos = page.end_offset;
            bos_pages.push(page);
        }

        if bos_pages.is_empty() {
            return invalid_format_error("ogg: no beginning-of-stream pages");
        }

        let mut streams = Vec::new();

        for bos in &bos_pages {
            let serial = bos.serial;
            let (sizes, _) = bos.packet_sizes();
            let first_packet = match sizes.first() {
                Some(&size) => &bos.body[..size],
                None => continue,
            };

            if first_packet.starts_with(b"OpusHead") {
                let head = OpusIdHeader::parse(first_packet)?;

                // The OpusTags packet follows; skip it to find the audio data.
                let mut cursor = Cursor { page: bos.clone(), seg: bos.lacing.len() };
                let tags =
                    read_stream_packet(&reader, serial, &mut cursor).await?;
                if tags.is_none() {
                    return invalid_format_error("ogg: missing OpusTags packet");
                }

                streams.push(LogicalStream {
                    serial,
                    codec: StreamCodec::Opus { head, id_packet: Box::from(first_packet) },
                    data_start: (cursor.page.offset, cursor.seg),
                });
            }
            else if vorbis::is_header_packet(first_packet, VORBIS_HEADER_TYPE_IDENT) {
                let ident = VorbisIdentHeader::parse(first_packet)?;
                let ident_packet = first_packet.to_vec();

                let mut cursor = Cursor { page: bos.clone(), seg: bos.lacing.len() };

                let comment = match read_stream_packet(&reader, serial, &mut cursor).await? {
                    Some((_, comment))
                        if vorbis::is_header_packet(&comment, VORBIS_HEADER_TYPE_COMMENT) =>
                    {
                        comment
                    }
                    _ => return invalid_format_error("ogg: missing vorbis comment header"),
                };

                let setup = match read_stream_packet(&reader, serial, &mut cursor).await? {
                    Some((_, setup))
                        if vorbis::is_header_packet(&setup, VORBIS_HEADER_TYPE_SETUP) =>
                    {
                        setup
                    }
                    _ => return invalid_format_error("ogg: missing vorbis setup header"),
                };

                let modes = VorbisModeInfo::parse(&setup, &ident)?;
                let codec_private = lace_packets(&[&ident_packet, &comment, &setup]);

                streams.push(LogicalStream {
                    serial,
                    codec: StreamCodec::Vorbis {
                        ident,
                        modes,
                        codec_private: codec_private.into(),
                    },
                    data_start: (cursor.page.offset, cursor.seg),
                });
            }
            else {
                warn!("ignoring logical bitstream {:#010x} with unknown codec", serial);
            }
        }

        if streams.is_empty() {
            return invalid_format_error("ogg: no supported logical bitstreams");
        }

        Ok(Arc::new(OggDemuxer { reader, streams, lock: AsyncMutex::new(()) }))
    }

    fn stream(&self, idx: usize) -> &LogicalStream {
        &self.streams[idx]
    }

    /// Read the first audio packet of a stream.
    async fn first_audio_packet(
        &self,
        idx: usize,
        opts: PacketOptions,
    ) -> Result<Option<EncodedPacket>> {
        let _guard = self.lock.lock().await;
        let stream = self.stream(idx);

        let mut cursor = match cursor_at(&self.reader, stream.data_start).await? {
            Some(cursor) => cursor,
            None => return Ok(None),
        };

        let packet = match read_stream_packet(&self.reader, stream.serial, &mut cursor).await? {
            Some(packet) => packet,
            None => return Ok(None),
        };

        let mut prev_block = None;
        let dur = stream.codec.packet_duration(&packet.1, &mut prev_block);

        Ok(Some(self.make_packet(idx, packet.0, &packet.1, 0, dur, opts)))
    }

    fn make_packet(
        &self,
        idx: usize,
        seq: i64,
        data: &[u8],
        start_granule: i64,
        dur: u32,
        opts: PacketOptions,
    ) -> EncodedPacket {
        let stream = self.stream(idx);
        let rate = f64::from(stream.codec.sample_rate());
        let timestamp = (start_granule - stream.codec.granule_offset()) as f64 / rate;
        let duration = f64::from(dur) / rate;

        // Every Opus and Vorbis audio packet is independently presentable after decoder reset.
        if opts.metadata_only {
            EncodedPacket::new_metadata_only(
                PacketType::Key,
                timestamp,
                duration,
                seq,
                data.len() as u64,
            )
        }
        else {
            EncodedPacket::new(data.to_vec(), PacketType::Key, timestamp, duration, seq)
        }
    }

    /// Find the packet at `time` by CRC-validated bisection and an anchored forward walk.
    async fn packet_at_time(
        &self,
        idx: usize,
        time: f64,
        opts: PacketOptions,
    ) -> Result<Option<EncodedPacket>> {
        let _guard = self.lock.lock().await;
        let stream = self.stream(idx);
        let rate = f64::from(stream.codec.sample_rate());

        let target_granule =
            (time * rate).floor() as i64 + stream.codec.granule_offset();
        if target_granule < 0 {
            return Ok(None);
        }

        let (mut cursor, mut end_granule, mut prev_block) =
            self.anchor_before(idx, target_granule as u64).await?;

        // Walk forward packet by packet until the target falls inside a packet interval.
        loop {
            let (seq, data) =
                match read_stream_packet(&self.reader, stream.serial, &mut cursor).await? {
                    Some(packet) => packet,
                    None => return Ok(None),
                };

            let dur = stream.codec.packet_duration(&data, &mut prev_block);
            let start = end_granule;
            end_granule += i64::from(dur);

            if target_granule < end_granule || (dur == 0 && target_granule == start) {
                return Ok(Some(self.make_packet(idx, seq, &data, start, dur, opts)));
            }
        }
    }

    /// Locate a walk anchor at or before `target_granule`: a cursor positioned after the last
    /// packet completing on the anchor page, the anchor granule, and the Vorbis block-size state
    /// of the packet preceding the cursor.
    async fn anchor_before(
        &self,
        idx: usize,
        target_granule: u64,
    ) -> Result<(Cursor, i64, Option<u32>)> {
        let stream = self.stream(idx);
        let serial = stream.serial;
        let file_len = self.reader.byte_len().await?;

        let data_start_offset = stream.data_start.0;

        // Bisect on byte position. Invalid or foreign pages are skipped by the scan.
        let mut lo = data_start_offset;
        let mut hi = file_len;
        let mut anchor: Option<Page> = None;

        while hi > lo && hi - lo > BISECT_LINEAR_THRESHOLD {
            let mid = lo + (hi - lo) / 2;

            let page = find_stream_page(&self.reader, mid, hi, serial).await?;
            match page {
                Some(page) if page.granule != u64::MAX && page.granule < target_granule => {
                    lo = page.end_offset;
                    anchor = Some(page);
                }
                _ => hi = mid,
            }
        }

        // Short linear walk: advance to the last page whose granule stays below the target.
        let mut pos = anchor.as_ref().map_or(data_start_offset, |page| page.end_offset);
        loop {
            let page = match find_stream_page(&self.reader, pos, file_len, serial).await? {
                Some(page) => page,
                None => break,
            };

            if page.granule != u64::MAX && page.granule >= target_granule {
                break;
            }

            pos = page.end_offset;
            if page.granule != u64::MAX {
                anchor = Some(page);
            }
        }

        match anchor {
            Some(page) => {
                let granule = page.granule as i64;
                let prev_block = match &stream.codec {
                    StreamCodec::Vorbis { modes, .. } => {
                        last_packet_on_page(&self.reader, serial, &page)
                            .await?
                            .and_then(|data| modes.packet_block_size(&data).ok())
                    }
                    StreamCodec::Opus { .. } => None,
                };

                let seg = seg_after_last_complete(&page);
                Ok((Cursor { page, seg }, granule, prev_block))
            }
            None => {
                // No anchor: walk from the first audio packet.
                let cursor = cursor_at(&self.reader, stream.data_start)
                    .await?
                    .ok_or(remux_core::errors::Error::InvalidFormat("ogg: empty stream"))?;
                Ok((cursor, 0, None))
            }
        }
    }

    async fn total_granule(&self, idx: usize) -> Result<Option<u64>> {
        let stream = self.stream(idx);
        let file_len = self.reader.byte_len().await?;

        // Scan the tail for the last page of this stream, widening the window as needed.
        let mut window = OGG_PAGE_MAX_SIZE;
        loop {
            let from = file_len.saturating_sub(window);
            let mut pos = from;
            let mut last = None;

            while let Some(page) = find_stream_page(&self.reader, pos, file_len, stream.serial).await? {
                pos = page.end_offset;
                if page.granule != u64::MAX {
                    last = Some(page.granule);
                }
            }

            if last.is_some() || from == 0 {
                return Ok(last);
            }
            window *= 2;
        }
    }
}

/// Position a cursor at `(page_offset, seg)`.
async fn cursor_at(reader: &Reader, position: (u64, usize)) -> Result<Option<Cursor>> {
    match read_page_at(reader, position.0).await? {
        Some(page) => Ok(Some(Cursor { page, seg: position.1 })),
        None => Ok(None),
    }
}

/// The index of the first segment after the last packet completing on `page`.
fn seg_after_last_complete(page: &Page) -> usize {
    match page.lacing.iter().rposition(|&lace| lace < 255) {
        Some(idx) => idx + 1,
        None => 0,
    }
}

/// Find the next valid page of `serial` at or after `from`.
async fn find_stream_page(
    reader: &Reader,
    from: u64,
    limit: u64,
    serial: u32,
) -> Result<Option<Page>> {
    let mut pos = from;
    loop {
        let page = match sync_next_page(reader, pos, limit).await? {
            Some(page) => page,
            None => return Ok(None),
        };
        if page.serial == serial {
            return Ok(Some(page));
        }
        pos = page.end_offset;
    }
}

/// Assemble the last packet completing on `page`, following continuation runs back through
/// preceding pages of the same stream when necessary.
async fn last_packet_on_page(reader: &Reader, serial: u32, page: &Page) -> Result<Option<Vec<u8>>> {
    let (sizes, _) = page.packet_sizes();
    let n_complete = sizes.len();
    if n_complete == 0 {
        return Ok(None);
    }

    // Does the last completed packet start on this page?
    let continued = page.continuation_len();
    let before_last: usize = sizes[..n_complete - 1].iter().sum();

    if n_complete > 1 || !page.is_continuation {
        let start = before_last;
        return Ok(Some(page.body[start..start + sizes[n_complete - 1]].to_vec()));
    }

    // The sole completing packet continues from earlier pages; gather its earlier chunks.
    let mut chunks = vec![page.body[..continued].to_vec()];
    let mut search_end = page.offset;

    for _ in 0..64 {
        let prev = match previous_stream_page(reader, serial, search_end).await? {
            Some(prev) => prev,
            None => break,
        };

        let tail = partial_tail_len(&prev);
        if tail == 0 {
            break;
        }
        chunks.push(prev.body[prev.body.len() - tail..].to_vec());

        // The run started on this page unless the whole page is one continuing 255-run.
        let (prev_sizes, _) = prev.packet_sizes();
        if !(prev.is_continuation && prev_sizes.is_empty()) {
            break;
        }
        search_end = prev.offset;
    }

    chunks.reverse();
    Ok(Some(chunks.concat()))
}

/// The number of trailing body bytes belonging to a packet that does not complete on this page.
fn partial_tail_len(page: &Page) -> usize {
    let mut current = 0usize;
    for &lace in &page.lacing {
        current += lace as usize;
        if lace < 255 {
            current = 0;
        }
    }
    current
}

/// Find the page of `serial` immediately preceding byte offset `before`.
async fn previous_stream_page(reader: &Reader, serial: u32, before: u64) -> Result<Option<Page>> {
    let mut window = OGG_PAGE_MAX_SIZE;

    loop {
        let from = before.saturating_sub(window);
        let mut pos = from;
        let mut last = None;

        while let Some(page) = find_stream_page(reader, pos, before, serial).await? {
            if page.end_offset > before {
                break;
            }
            pos = page.end_offset;
            last = Some(page);
        }

        if last.is_some() || from == 0 {
            return Ok(last);
        }
        window *= 2;
    }
}

/// Read the packet at the cursor, advancing the cursor past it. Returns the packet's sequence
/// number (derived from its start position) and its assembled data.
async fn read_stream_packet(
    reader: &Reader,
    serial: u32,
    cursor: &mut Cursor,
) -> Result<Option<(i64, Vec<u8>)>> {
    // Normalize onto a page with unconsumed segments.
    while cursor.seg >= cursor.page.lacing.len() {
        let next = match find_stream_page(reader, cursor.page.end_offset, u64::MAX, serial).await? {
            Some(next) => next,
            None => return Ok(None),
        };
        cursor.page = next;
        cursor.seg = 0;

        // A continuation run at the head of a fresh page belongs to a packet consumed through
        // the previous page's trailing 255-segments; it is only skipped when the cursor was
        // positioned directly on this page.
    }

    let seq = ((cursor.page.offset as i64) << 8) | cursor.seg as i64;
    let mut body_pos: usize = cursor.page.lacing[..cursor.seg].iter().map(|&l| l as usize).sum();
    let mut data = Vec::new();

    loop {
        if cursor.seg >= cursor.page.lacing.len() {
            let next =
                match find_stream_page(reader, cursor.page.end_offset, u64::MAX, serial).await? {
                    Some(next) => next,
                    None => {
                        // Truncated final packet.
                        debug!("dropping truncated packet at end of stream");
                        return Ok(None);
                    }
                };

            if !next.is_continuation {
                // The packet was cut short; surface what was assembled.
                cursor.page = next;
                cursor.seg = 0;
                return Ok(Some((seq, data)));
            }

            cursor.page = next;
            cursor.seg = 0;
            body_pos = 0;
        }

        let lace = cursor.page.lacing[cursor.seg] as usize;
        data.extend_from_slice(&cursor.page.body[body_pos..body_pos + lace]);
        body_pos += lace;
        cursor.seg += 1;

        if lace < 255 {
            return Ok(Some((seq, data)));
        }
    }
}

#[async_trait]
impl Demuxer for OggDemuxer {
    fn format_info(&self) -> &'static FormatInfo {
        &OGG_FORMAT_INFO
    }

    async fn tracks(self: Arc<Self>) -> Result<Vec<InputTrack>> {
        let mut tracks = Vec::new();

        for (idx, stream) in self.streams.iter().enumerate() {
            let (codec, channel_count, decoder_config) = match &stream.codec {
                StreamCodec::Vorbis { ident, codec_private, .. } => {
                    (AudioCodec::Vorbis, u32::from(ident.channels), Some(codec_private.clone()))
                }
                StreamCodec::Opus { head, id_packet } => {
                    (AudioCodec::Opus, u32::from(head.channel_count), Some(id_packet.clone()))
                }
            };

            let info = TrackInfo::Audio(AudioTrackInfo {
                codec,
                channel_count,
                sample_rate: stream.codec.sample_rate(),
                decoder_config,
            });

            let reader = Arc::new(OggTrackReader { demuxer: self.clone(), stream_idx: idx });

            tracks.push(InputTrack::new(
                stream.serial,
                info,
                "und".to_string(),
                None,
                f64::from(stream.codec.sample_rate()),
                reader,
            ));
        }

        Ok(tracks)
    }

    async fn compute_duration(self: Arc<Self>) -> Result<f64> {
        let mut duration = 0f64;

        for idx in 0..self.streams.len() {
            let stream = self.stream(idx);
            if let Some(granule) = self.total_granule(idx).await? {
                let rate = f64::from(stream.codec.sample_rate());
                let end =
                    (granule as i64 - stream.codec.granule_offset()).max(0) as f64 / rate;
                duration = duration.max(end);
            }
        }

        Ok(duration)
    }

    fn dispose(&self) {
        self.reader.dispose();
    }
}

struct OggTrackReader {
    demuxer: Arc<OggDemuxer>,
    stream_idx: usize,
}

#[async_trait]
impl TrackReader for OggTrackReader {
    async fn first_timestamp(&self) -> Result<f64> {
        let stream = self.demuxer.stream(self.stream_idx);
        let rate = f64::from(stream.codec.sample_rate());
        Ok(-(stream.codec.granule_offset() as f64) / rate)
    }

    async fn compute_duration(&self) -> Result<f64> {
        let stream = self.demuxer.stream(self.stream_idx);
        match self.demuxer.total_granule(self.stream_idx).await? {
            Some(granule) => {
                let rate = f64::from(stream.codec.sample_rate());
                Ok((granule as i64 - stream.codec.granule_offset()).max(0) as f64 / rate)
            }
            None => Ok(0.0),
        }
    }

    async fn first_packet(&self, opts: PacketOptions) -> Result<Option<EncodedPacket>> {
        self.demuxer.first_audio_packet(self.stream_idx, opts).await
    }

    async fn packet_at(&self, time: f64, opts: PacketOptions) -> Result<Option<EncodedPacket>> {
        self.demuxer.packet_at_time(self.stream_idx, time, opts).await
    }

    async fn next_packet(
        &self,
        packet: &EncodedPacket,
        opts: PacketOptions,
    ) -> Result<Option<EncodedPacket>> {
        let _guard = self.demuxer.lock.lock().await;
        let stream = self.demuxer.stream(self.stream_idx);
        let rate = f64::from(stream.codec.sample_rate());

        let seq = packet.sequence_number();
        if seq < 0 {
            return invalid_format_error("ogg: packet has no sequence number");
        }

        let position = ((seq >> 8) as u64, (seq & 0xff) as usize);
        let mut cursor = match cursor_at(&self.demuxer.reader, position).await? {
            Some(cursor) => cursor,
            None => return Ok(None),
        };

        // Re-read the current packet to restore the Vorbis block-size state, then read the next.
        let current =
            match read_stream_packet(&self.demuxer.reader, stream.serial, &mut cursor).await? {
                Some((_, data)) => data,
                None => return Ok(None),
            };

        let mut prev_block = match &stream.codec {
            StreamCodec::Vorbis { modes, .. } => modes.packet_block_size(&current).ok(),
            StreamCodec::Opus { .. } => None,
        };

        let (next_seq, next_data) =
            match read_stream_packet(&self.demuxer.reader, stream.serial, &mut cursor).await? {
                Some(next) => next,
                None => return Ok(None),
            };

        let dur = stream.codec.packet_duration(&next_data, &mut prev_block);
        let start_granule = ((packet.timestamp() + packet.duration()) * rate).round() as i64
            + stream.codec.granule_offset();

        Ok(Some(self.demuxer.make_packet(
            self.stream_idx,
            next_seq,
            &next_data,
            start_granule,
            dur,
            opts,
        )))
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
        let stream = self.demuxer.stream(self.stream_idx);
        Ok(Some(match &stream.codec {
            StreamCodec::Vorbis { .. } => "vorbis".to_string(),
            StreamCodec::Opus { .. } => "opus".to_string(),
        }))
    }

    async fn decoder_config(&self) -> Result<Option<Box<[u8]>>> {
        let stream = self.demuxer.stream(self.stream_idx);
        Ok(Some(match &stream.codec {
            StreamCodec::Vorbis { codec_private, .. } => codec_private.clone(),
            StreamCodec::Opus { id_packet, .. } => id_packet.clone(),
        }))
    }
}

/// The probe registration for the Ogg format.
pub fn registration() -> DemuxerRegistration {
    DemuxerRegistration {
        info: &OGG_FORMAT_INFO,
        can_read: |reader| Box::pin(OggDemuxer::can_read(reader)),
        open: |reader| {
            Box::pin(async move {
                let demuxer = OggDemuxer::open(reader).await?;
                Ok(demuxer as Arc<dyn Demuxer>)
            })
        },
    }
}
