// Remux
// Copyright (c) 2026 The Project Remux Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use log::{debug, warn};

use remux_core::demux::{Demuxer, FormatInfo, InputTrack, PacketOptions, TrackReader};
use remux_core::errors::{invalid_format_error, Result};
use remux_core::io::{Reader, SliceReader};
use remux_core::packet::{EncodedPacket, PacketType};
use remux_core::probe::DemuxerRegistration;
use remux_core::sync::AsyncMutex;
use remux_core::track::{
    AudioTrackInfo, ColorPrimaries, ColorSpace, MatrixCoefficients, Rotation, SubtitleTrackInfo,
    TrackInfo, TransferCharacteristics, VideoTrackInfo,
};
use remux_core::util::lang::normalize_language;
use remux_core::util::sort::{binary_search_less_or_equal, insert_sorted, sort_by_references};

use crate::codecs::codec_from_id;
use crate::ebml::{
    read_float, read_signed, read_string, read_unsigned, ElementHeader,
};
use crate::element_ids as ids;
use crate::element_ids::is_top_level;
use crate::lacing::parse_block;
use crate::MKV_FORMAT_INFO;

/// Bound of the forward scan used to regain element synchronization.
const RESYNC_LIMIT: u64 = 10 * 1024 * 1024;

/// Loaded clusters kept in the demuxer's list before the oldest are released.
const MAX_LOADED_CLUSTERS: usize = 16;

struct MkvTrack {
    number: u64,
    info: TrackInfo,
    language: String,
    name: Option<String>,
    default_duration_ns: Option<u64>,
    codec_delay_ns: u64,
}

/// One expanded frame of a cluster, in presentation order.
#[derive(Clone)]
struct ClusterBlock {
    /// Absolute timestamp in ticks.
    ts: i64,
    /// Duration in ticks.
    dur: u64,
    key: bool,
    data: Arc<[u8]>,
}

struct Cluster {
    offset: u64,
    end_offset: u64,
    /// Presentation-sorted blocks per track number.
    by_track: HashMap<u64, Vec<ClusterBlock>>,
    /// Tracks that have at least one key block in this cluster.
    key_tracks: Vec<u64>,
}

struct SegmentState {
    /// Loaded clusters, sorted by file offset. Grows under the segment mutex during seeks.
    clusters: Vec<Arc<Cluster>>,
}

/// Matroska/WebM demultiplexer.
pub struct MkvDemuxer {
    reader: Arc<Reader>,
    tracks: Vec<MkvTrack>,
    /// Nanoseconds per timestamp tick.
    timestamp_scale: u64,
    /// Duration from the segment info, in ticks.
    info_duration: Option<f64>,
    /// Offset of the first cluster.
    first_cluster_offset: Option<u64>,
    /// End of the segment payload.
    segment_end: u64,
    /// Per-track cue points `(time_ticks, cluster_offset)`, sorted by time.
    cues: HashMap<u64, Vec<(u64, u64)>>,
    state: AsyncMutex<SegmentState>,
}

impl MkvDemuxer {
    /// Probe check: an EBML header whose DocType is `matroska` or `webm`.
    pub async fn can_read(reader: &Reader) -> Result<bool> {
        let mut head = match reader.slice(0, 64).await? {
            Some(head) if head.len() >= 4 => head,
            _ => return Ok(false),
        };

        if head.as_bytes()[..4] != 0x1a45_dfa3u32.to_be_bytes() {
            return Ok(false);
        }

        // Advance past the EBML element header, then look for the DocType child.
        if ElementHeader::read(&mut head).is_err() {
            return Ok(false);
        }

        while head.bytes_remaining() > 2 {
            let child = match ElementHeader::read(&mut head) {
                Ok(child) => child,
                Err(_) => break,
            };
            let len = child.data_len.unwrap_or(0) as usize;
            if len > head.bytes_remaining() {
                break;
            }

            if child.id == ids::DOC_TYPE {
                let doc_type = read_string(&mut head, len)?;
                return Ok(doc_type == "matroska" || doc_type == "webm");
            }
            head.skip(len)?;
        }

        // Assume Matroska when the DocType sits beyond the probe window.
        Ok(true)
    }

    /// Open a demuxer over the stream behind `reader`.
    pub async fn open(reader: Arc<Reader>) -> Result<Arc<MkvDemuxer>> {
        let file_len = reader.byte_len().await?;

        // EBML header.
        let mut head = match reader.slice(0, 4096).await? {
            Some(head) => head,
            None => return invalid_format_error("mkv: empty stream"),
        };

        let ebml = ElementHeader::read(&mut head)?;
        if ebml.id != ids::EBML {
            return invalid_format_error("mkv: missing EBML header");
        }
        let ebml_end = ebml.data_pos
            + ebml.data_len.ok_or(remux_core::errors::Error::InvalidFormat(
                "mkv: EBML header must be sized",
            ))?;

        // Segment element.
        let mut seg_head = match reader.slice(ebml_end, 16).await? {
            Some(head) => head,
            None => return invalid_format_error("mkv: missing segment"),
        };
        let segment = ElementHeader::read(&mut seg_head)?;
        if segment.id != ids::SEGMENT {
            return invalid_format_error("mkv: missing segment element");
        }

        let segment_start = segment.data_pos;
        let segment_end = match segment.data_len {
            Some(len) => (segment.data_pos + len).min(file_len),
            None => file_len,
        };

        let mut timestamp_scale = 1_000_000u64;
        let mut info_duration = None;
        let mut tracks = Vec::new();
        let mut first_cluster_offset = None;
        let mut cues_offset: Option<u64> = None;
        let mut raw_cues: Vec<(u64, Vec<(u64, u64)>)> = Vec::new();

        // Walk the top-level children of the segment until the first cluster.
        let mut pos = segment_start;
        while pos < segment_end {
            let header = match read_element_header_at(&reader, pos).await? {
                Some(header) => header,
                None => break,
            };

            let known = ids::ELEMENTS.contains_key(&header.id);
            if !known {
                // Local recovery: a bounded forward scan for a known level-0/1 element id.
                match resync(&reader, pos, segment_end).await? {
                    Some(found) => {
                        warn!("resynced to element {:#x} at {}", found.1, found.0);
                        pos = found.0;
                        continue;
                    }
                    None => break,
                }
            }

            let data_len = header.data_len;

            match header.id {
                ids::INFO => {
                    let body = fetch_sized(&reader, &header).await?;
                    parse_info(body, &mut timestamp_scale, &mut info_duration)?;
                }
                ids::TRACKS => {
                    let body = fetch_sized(&reader, &header).await?;
                    tracks = parse_tracks(body)?;
                }
                ids::SEEK_HEAD => {
                    let body = fetch_sized(&reader, &header).await?;
                    if let Some(offset) = parse_seek_head(body, ids::CUES)? {
                        cues_offset = Some(segment_start + offset);
                    }
                }
                ids::CUES => {
                    let body = fetch_sized(&reader, &header).await?;
                    raw_cues = parse_cues(body, segment_start)?;
                }
                ids::CLUSTER => {
                    first_cluster_offset = Some(header.pos);
                    break;
                }
                _ => debug!("skipping top-level element {:#x}", header.id),
            }

            pos = match data_len {
                Some(len) => header.data_pos + len,
                None => break,
            };
        }

        // Fetch the cues through the seek head when they sit after the clusters.
        if raw_cues.is_empty() {
            if let Some(offset) = cues_offset {
                if let Some(header) = read_element_header_at(&reader, offset).await? {
                    if header.id == ids::CUES {
                        let body = fetch_sized(&reader, &header).await?;
                        raw_cues = parse_cues(body, segment_start)?;
                    }
                }
            }
        }

        if tracks.is_empty() {
            return invalid_format_error("mkv: no supported tracks");
        }

        // Distribute segment-level cues across tracks. A cue point that names only some tracks is
        // replayed to every other track at the same cluster position.
        let mut cues: HashMap<u64, Vec<(u64, u64)>> = HashMap::new();
        for (time, positions) in &raw_cues {
            let fallback = positions.first().map(|&(_, pos)| pos);
            for track in &tracks {
                let position = positions
                    .iter()
                    .find(|&&(track_num, _)| track_num == track.number)
                    .map(|&(_, pos)| pos)
                    .or(fallback);

                if let Some(position) = position {
                    cues.entry(track.number).or_default().push((*time, position));
                }
            }
        }
        for positions in cues.values_mut() {
            positions.sort_by_key(|&(time, _)| time);
        }

        Ok(Arc::new(MkvDemuxer {
            reader,
            tracks,
            timestamp_scale,
            info_duration,
            first_cluster_offset,
            segment_end,
            cues,
            state: AsyncMutex::new(SegmentState { clusters: Vec::new() }),
        }))
    }

    fn ticks_per_second(&self) -> f64 {
        1e9 / self.timestamp_scale as f64
    }

    fn ticks_to_seconds(&self, ticks: i64) -> f64 {
        ticks as f64 / self.ticks_per_second()
    }

    fn seconds_to_ticks(&self, seconds: f64) -> i64 {
        (seconds * self.ticks_per_second()).floor() as i64
    }

    /// Load the cluster at `offset`, consulting and growing the cluster list. Runs under the
    /// segment mutex.
    async fn load_cluster(
        &self,
        state: &mut SegmentState,
        offset: u64,
    ) -> Result<Option<Arc<Cluster>>> {
        if offset >= self.segment_end {
            return Ok(None);
        }

        if let Ok(idx) = state.clusters.binary_search_by_key(&offset, |c| c.offset) {
            return Ok(Some(state.clusters[idx].clone()));
        }

        let header = match read_element_header_at(&self.reader, offset).await? {
            Some(header) => header,
            None => return Ok(None),
        };

        let header = if header.id != ids::CLUSTER {
            // Out of sync; try to recover within bounds.
            match resync(&self.reader, offset, self.segment_end).await? {
                Some((pos, id)) if id == ids::CLUSTER => {
                    match read_element_header_at(&self.reader, pos).await? {
                        Some(header) => header,
                        None => return Ok(None),
                    }
                }
                _ => return Ok(None),
            }
        }
        else {
            header
        };

        let cluster = Arc::new(self.parse_cluster(&header).await?);

        insert_sorted(&mut state.clusters, cluster.clone(), |c| c.offset);

        // Release the oldest clusters beyond the retention bound; re-parsing is cheap through
        // the reader cache.
        if state.clusters.len() > MAX_LOADED_CLUSTERS {
            let victim = state
                .clusters
                .iter()
                .position(|c| c.offset != cluster.offset)
                .unwrap_or(0);
            let removed = state.clusters.remove(victim);
            self.reader.forget(removed.offset, removed.end_offset - removed.offset);
        }

        Ok(Some(cluster))
    }

    async fn parse_cluster(&self, header: &ElementHeader) -> Result<Cluster> {
        // Sizeless clusters, common in livestreamed files, end where the next top-level element
        // begins.
        let data_end = match header.data_len {
            Some(len) => header.data_pos + len,
            None => {
                find_sizeless_end(&self.reader, header.data_pos, self.segment_end).await?
            }
        };

        let len = data_end - header.data_pos;
        let mut body = match self.reader.slice(header.data_pos, len).await? {
            Some(body) => body,
            None => return invalid_format_error("mkv: cluster out of range"),
        };

        struct RawBlock {
            rel_ts: i16,
            key: bool,
            refs: Vec<i64>,
            dur: Option<u64>,
            frames: Vec<crate::lacing::BlockFrame>,
        }

        let mut cluster_ts = 0u64;
        let mut raw: HashMap<u64, Vec<RawBlock>> = HashMap::new();

        while body.bytes_remaining() > 1 {
            let child = ElementHeader::read(&mut body)?;
            let child_len = match child.data_len {
                Some(len) => len as usize,
                None => break,
            };
            if child_len > body.bytes_remaining() {
                break;
            }

            match child.id {
                ids::TIMESTAMP => {
                    cluster_ts = read_unsigned(&mut body, child_len)?;
                }
                ids::SIMPLE_BLOCK => {
                    let payload = body.read_bytes(child_len)?;
                    if let Ok(frames) = parse_block(payload, true) {
                        if let Some(first) = frames.first() {
                            let track = first.track;
                            let key = first.key;
                            let rel_ts = first.rel_ts;
                            raw.entry(track).or_default().push(RawBlock {
                                rel_ts,
                                key,
                                refs: Vec::new(),
                                dur: None,
                                frames,
                            });
                        }
                    }
                }
                ids::BLOCK_GROUP => {
                    let group = body.read_bytes(child_len)?.to_vec();
                    if let Some(block) = parse_block_group(&group)? {
                        if let Some(first) = block.frames.first() {
                            let track = first.track;
                            raw.entry(track).or_default().push(RawBlock {
                                rel_ts: first.rel_ts,
                                // A Block without reference blocks is a key frame.
                                key: block.refs.is_empty(),
                                refs: block.refs,
                                dur: block.dur,
                                frames: block.frames,
                            });
                        }
                    }
                }
                _ => {
                    body.skip(child_len)?;
                }
            }
        }

        let mut by_track = HashMap::new();
        let mut key_tracks = Vec::new();

        for (track_num, mut blocks) in raw {
            let track = self.tracks.iter().find(|t| t.number == track_num);
            let default_dur_ticks = track
                .and_then(|t| t.default_duration_ns)
                .map(|ns| ns / self.timestamp_scale);
            let codec_delay_ticks =
                track.map_or(0, |t| t.codec_delay_ns / self.timestamp_scale) as i64;

            // Order blocks so referenced frames precede their referrers (decode order), then
            // produce the presentation list by a stable timestamp sort.
            if blocks.iter().any(|b| !b.refs.is_empty()) {
                blocks = sort_by_references(
                    blocks,
                    |b| i64::from(b.rel_ts),
                    |b| b.refs.iter().map(|&r| i64::from(b.rel_ts) + r).collect(),
                );
            }

            let mut expanded: Vec<ClusterBlock> = Vec::new();
            for block in blocks {
                let lace_count = block.frames.len() as u64;
                let frame_dur = match (block.dur, default_dur_ticks) {
                    // An explicit block duration covers the whole lace, distributed evenly.
                    (Some(dur), _) => dur / lace_count.max(1),
                    (None, Some(dur)) => dur,
                    (None, None) => 0,
                };

                let base_ts =
                    cluster_ts as i64 + i64::from(block.rel_ts) - codec_delay_ticks;

                for (idx, frame) in block.frames.into_iter().enumerate() {
                    expanded.push(ClusterBlock {
                        ts: base_ts + idx as i64 * frame_dur as i64,
                        dur: frame_dur,
                        key: block.key,
                        data: Arc::from(frame.data),
                    });
                }
            }

            expanded.sort_by_key(|b| b.ts);

            // Fill unknown durations from the gap to the following block; the final block takes
            // its predecessor's duration.
            for i in 0..expanded.len().saturating_sub(1) {
                if expanded[i].dur == 0 {
                    expanded[i].dur = (expanded[i + 1].ts - expanded[i].ts).max(0) as u64;
                }
            }
            if let [.., prev, last] = &mut expanded[..] {
                if last.dur == 0 {
                    last.dur = prev.dur;
                }
            }

            if expanded.iter().any(|b| b.key) {
                key_tracks.push(track_num);
            }
            by_track.insert(track_num, expanded);
        }

        Ok(Cluster { offset: header.pos, end_offset: data_end, by_track, key_tracks })
    }

    /// Locate a packet: consult the track cues, walk clusters forward, and fall back to earlier
    /// cues when a cue lies about its cluster.
    async fn packet_at_time(
        &self,
        track_num: u64,
        time: f64,
        opts: PacketOptions,
        keys_only: bool,
    ) -> Result<Option<EncodedPacket>> {
        let target = self.seconds_to_ticks(time);
        if time < 0.0 {
            return Ok(None);
        }

        let mut state = self.state.lock().await;

        let empty = Vec::new();
        let cues = self.cues.get(&track_num).unwrap_or(&empty);
        let mut cue_idx = binary_search_less_or_equal(cues, target as u64, |&(time, _)| time);

        loop {
            let start_offset = match cue_idx {
                Some(idx) => cues[idx].1,
                None => match self.first_cluster_offset {
                    Some(offset) => offset,
                    None => return Ok(None),
                },
            };

            match self
                .scan_for_target(&mut state, track_num, start_offset, target, keys_only)
                .await?
            {
                ScanOutcome::Found(block, seq) => {
                    return Ok(Some(self.make_packet(&block, seq, opts)));
                }
                ScanOutcome::BeforeCluster if cue_idx.is_some() => {
                    // The cue pointed past the target; retry from the previous cue.
                    debug!("cue lookup fell back for track {}", track_num);
                    cue_idx = match cue_idx.unwrap() {
                        0 => None,
                        idx => Some(idx - 1),
                    };
                }
                _ => return Ok(None),
            }
        }
    }

    async fn scan_for_target(
        &self,
        state: &mut SegmentState,
        track_num: u64,
        start_offset: u64,
        target: i64,
        keys_only: bool,
    ) -> Result<ScanOutcome> {
        let mut offset = start_offset;
        let mut best: Option<(ClusterBlock, i64)> = None;
        let mut first_seen_ts: Option<i64> = None;

        while let Some(cluster) = self.load_cluster(state, offset).await? {
            if let Some(blocks) = cluster.by_track.get(&track_num) {
                for (idx, block) in blocks.iter().enumerate() {
                    if first_seen_ts.is_none() {
                        first_seen_ts = Some(block.ts);
                    }
                    if block.ts > target {
                        break;
                    }
                    if !keys_only || block.key {
                        best = Some((block.clone(), make_seq(cluster.offset, idx)));
                    }
                }

                if let Some(first) = blocks.first() {
                    if first.ts > target {
                        // This cluster begins after the target.
                        return match best {
                            Some((block, seq)) => Ok(ScanOutcome::Found(block, seq)),
                            None => Ok(ScanOutcome::BeforeCluster),
                        };
                    }
                }

                // Does the best candidate already contain the target?
                if let Some((block, seq)) = &best {
                    if target < block.ts + block.dur as i64 {
                        return Ok(ScanOutcome::Found(block.clone(), *seq));
                    }
                }
            }

            offset = cluster.end_offset;
        }

        match best {
            Some((block, seq)) => Ok(ScanOutcome::Found(block, seq)),
            None if first_seen_ts.map_or(true, |ts| ts > target) => Ok(ScanOutcome::BeforeCluster),
            None => Ok(ScanOutcome::NotFound),
        }
    }

    fn make_packet(&self, block: &ClusterBlock, seq: i64, opts: PacketOptions) -> EncodedPacket {
        let kind = if block.key { PacketType::Key } else { PacketType::Delta };
        let timestamp = self.ticks_to_seconds(block.ts);
        let duration = self.ticks_to_seconds(block.dur as i64).max(0.0);

        if opts.metadata_only {
            EncodedPacket::new_metadata_only(kind, timestamp, duration, seq, block.data.len() as u64)
        }
        else {
            EncodedPacket::new(block.data.clone(), kind, timestamp, duration, seq)
        }
    }

    /// Fetch the block after `seq` for the track, walking into following clusters as needed.
    async fn packet_after(
        &self,
        track_num: u64,
        seq: i64,
        opts: PacketOptions,
        keys_only: bool,
    ) -> Result<Option<EncodedPacket>> {
        let (cluster_offset, mut idx) = split_seq(seq);
        let mut state = self.state.lock().await;

        let mut offset = cluster_offset;
        let mut skip_through = true;

        while let Some(cluster) = self.load_cluster(&mut state, offset).await? {
            if let Some(blocks) = cluster.by_track.get(&track_num) {
                let start = if skip_through { idx + 1 } else { 0 };
                for (i, block) in blocks.iter().enumerate().skip(start) {
                    if !keys_only || block.key {
                        let seq = make_seq(cluster.offset, i);
                        return Ok(Some(self.make_packet(block, seq, opts)));
                    }
                }
            }

            offset = cluster.end_offset;
            skip_through = false;
            idx = 0;
        }

        Ok(None)
    }

    async fn first_track_packet(
        &self,
        track_num: u64,
        opts: PacketOptions,
    ) -> Result<Option<EncodedPacket>> {
        let mut state = self.state.lock().await;

        let mut offset = match self.first_cluster_offset {
            Some(offset) => offset,
            None => return Ok(None),
        };

        while let Some(cluster) = self.load_cluster(&mut state, offset).await? {
            if let Some(block) = cluster.by_track.get(&track_num).and_then(|b| b.first()) {
                let seq = make_seq(cluster.offset, 0);
                return Ok(Some(self.make_packet(block, seq, opts)));
            }
            offset = cluster.end_offset;
        }

        Ok(None)
    }

    async fn track_duration(&self, track_num: u64) -> Result<f64> {
        let mut state = self.state.lock().await;

        let mut offset = match self.first_cluster_offset {
            Some(offset) => offset,
            None => return Ok(0.0),
        };
        let mut end = 0f64;

        while let Some(cluster) = self.load_cluster(&mut state, offset).await? {
            if let Some(last) = cluster.by_track.get(&track_num).and_then(|b| b.last()) {
                end = end.max(self.ticks_to_seconds(last.ts + last.dur as i64));
            }
            offset = cluster.end_offset;
        }

        Ok(end)
    }
}

enum ScanOutcome {
    Found(ClusterBlock, i64),
    /// The whole scanned range starts after the target.
    BeforeCluster,
    NotFound,
}

fn make_seq(cluster_offset: u64, idx: usize) -> i64 {
    ((cluster_offset as i64) << 16) | idx as i64
}

fn split_seq(seq: i64) -> (u64, usize) {
    ((seq >> 16) as u64, (seq & 0xffff) as usize)
}

async fn read_element_header_at(reader: &Reader, pos: u64) -> Result<Option<ElementHeader>> {
    let mut head = match reader.slice(pos, 12).await? {
        Some(head) if head.len() >= 2 => head,
        _ => return Ok(None),
    };

    match ElementHeader::read(&mut head) {
        Ok(header) => Ok(Some(header)),
        Err(_) => Ok(None),
    }
}

/// Fetch the payload of a sized element as one slice.
async fn fetch_sized(reader: &Reader, header: &ElementHeader) -> Result<SliceReader> {
    let len = header
        .data_len
        .ok_or(remux_core::errors::Error::InvalidFormat("mkv: element must be sized"))?;

    match reader.slice(header.data_pos, len).await? {
        Some(slice) if slice.len() as u64 == len => Ok(slice),
        _ => invalid_format_error("mkv: element payload out of range"),
    }
}

/// Bounded forward scan for the next known level-0/1 element id. Returns its offset and id.
async fn resync(reader: &Reader, from: u64, limit: u64) -> Result<Option<(u64, u32)>> {
    let scan_end = (from + RESYNC_LIMIT).min(limit);
    let mut base = from;

    const WINDOW: u64 = 64 * 1024;

    while base < scan_end {
        let window = match reader.slice(base, WINDOW.min(scan_end - base)).await? {
            Some(window) if window.len() >= 4 => window,
            _ => return Ok(None),
        };
        let bytes = window.as_bytes();

        for i in 0..bytes.len() - 3 {
            let id = u32::from_be_bytes([bytes[i], bytes[i + 1], bytes[i + 2], bytes[i + 3]]);
            if is_top_level(id) {
                return Ok(Some((base + i as u64, id)));
            }
        }

        if (window.len() as u64) < WINDOW.min(scan_end - base) {
            return Ok(None);
        }
        base += WINDOW - 3;
    }

    Ok(None)
}

/// Find the end of a sizeless element by scanning its children until a top-level id appears.
async fn find_sizeless_end(reader: &Reader, data_pos: u64, segment_end: u64) -> Result<u64> {
    let mut pos = data_pos;

    while pos < segment_end {
        let header = match read_element_header_at(reader, pos).await? {
            Some(header) => header,
            None => return Ok(pos),
        };

        if is_top_level(header.id) {
            return Ok(pos);
        }

        match header.data_len {
            Some(len) => pos = header.data_pos + len,
            None => return Ok(header.pos),
        }
    }

    Ok(segment_end)
}

fn parse_info(
    mut body: SliceReader,
    timestamp_scale: &mut u64,
    duration: &mut Option<f64>,
) -> Result<()> {
    while body.bytes_remaining() > 1 {
        let child = ElementHeader::read(&mut body)?;
        let len = child.data_len.unwrap_or(0) as usize;
        if len > body.bytes_remaining() {
            break;
        }

        match child.id {
            ids::TIMESTAMP_SCALE => *timestamp_scale = read_unsigned(&mut body, len)?.max(1),
            ids::DURATION => *duration = Some(read_float(&mut body, len)?),
            _ => body.skip(len)?,
        }
    }
    Ok(())
}

fn parse_seek_head(mut body: SliceReader, wanted_id: u32) -> Result<Option<u64>> {
    let mut result = None;

    while body.bytes_remaining() > 1 {
        let child = ElementHeader::read(&mut body)?;
        let len = child.data_len.unwrap_or(0) as usize;
        if len > body.bytes_remaining() {
            break;
        }

        if child.id == ids::SEEK {
            let mut seek = SliceReader::from_vec(body.read_bytes(len)?.to_vec());
            let mut id = None;
            let mut position = None;

            while seek.bytes_remaining() > 1 {
                let entry = ElementHeader::read(&mut seek)?;
                let entry_len = entry.data_len.unwrap_or(0) as usize;
                if entry_len > seek.bytes_remaining() {
                    break;
                }

                match entry.id {
                    ids::SEEK_ID => {
                        let bytes = seek.read_bytes(entry_len)?;
                        let mut value = 0u32;
                        for &b in bytes.iter().take(4) {
                            value = (value << 8) | u32::from(b);
                        }
                        id = Some(value);
                    }
                    ids::SEEK_POSITION => position = Some(read_unsigned(&mut seek, entry_len)?),
                    _ => seek.skip(entry_len)?,
                }
            }

            if id == Some(wanted_id) {
                result = position;
            }
        }
        else {
            body.skip(len)?;
        }
    }

    Ok(result)
}

fn parse_cues(mut body: SliceReader, segment_start: u64) -> Result<Vec<(u64, Vec<(u64, u64)>)>> {
    let mut cues = Vec::new();

    while body.bytes_remaining() > 1 {
        let child = ElementHeader::read(&mut body)?;
        let len = child.data_len.unwrap_or(0) as usize;
        if len > body.bytes_remaining() {
            break;
        }

        if child.id != ids::CUE_POINT {
            body.skip(len)?;
            continue;
        }

        let mut point = SliceReader::from_vec(body.read_bytes(len)?.to_vec());
        let mut time = None;
        let mut positions = Vec::new();

        while point.bytes_remaining() > 1 {
            let entry = ElementHeader::read(&mut point)?;
            let entry_len = entry.data_len.unwrap_or(0) as usize;
            if entry_len > point.bytes_remaining() {
                break;
            }

            match entry.id {
                ids::CUE_TIME => time = Some(read_unsigned(&mut point, entry_len)?),
                ids::CUE_TRACK_POSITIONS => {
                    let mut tp = SliceReader::from_vec(point.read_bytes(entry_len)?.to_vec());
                    let mut track = None;
                    let mut cluster_pos = None;

                    while tp.bytes_remaining() > 1 {
                        let field = ElementHeader::read(&mut tp)?;
                        let field_len = field.data_len.unwrap_or(0) as usize;
                        if field_len > tp.bytes_remaining() {
                            break;
                        }

                        match field.id {
                            ids::CUE_TRACK => track = Some(read_unsigned(&mut tp, field_len)?),
                            ids::CUE_CLUSTER_POSITION => {
                                cluster_pos = Some(read_unsigned(&mut tp, field_len)?)
                            }
                            _ => tp.skip(field_len)?,
                        }
                    }

                    if let (Some(track), Some(pos)) = (track, cluster_pos) {
                        positions.push((track, segment_start + pos));
                    }
                }
                _ => point.skip(entry_len)?,
            }
        }

        if let Some(time) = time {
            if !positions.is_empty() {
                cues.push((time, positions));
            }
        }
    }

    Ok(cues)
}

struct ParsedBlockGroup {
    frames: Vec<crate::lacing::BlockFrame>,
    dur: Option<u64>,
    refs: Vec<i64>,
}

fn parse_block_group(group: &[u8]) -> Result<Option<ParsedBlockGroup>> {
    let mut body = SliceReader::from_vec(group.to_vec());

    let mut frames = None;
    let mut dur = None;
    let mut refs = Vec::new();

    while body.bytes_remaining() > 1 {
        let child = ElementHeader::read(&mut body)?;
        let len = child.data_len.unwrap_or(0) as usize;
        if len > body.bytes_remaining() {
            break;
        }

        match child.id {
            ids::BLOCK => {
                let payload = body.read_bytes(len)?;
                frames = Some(parse_block(payload, false)?);
            }
            ids::BLOCK_DURATION => dur = Some(read_unsigned(&mut body, len)?),
            ids::REFERENCE_BLOCK => refs.push(read_signed(&mut body, len)?),
            _ => body.skip(len)?,
        }
    }

    Ok(frames.map(|frames| ParsedBlockGroup { frames, dur, refs }))
}

fn parse_tracks(mut body: SliceReader) -> Result<Vec<MkvTrack>> {
    let mut tracks = Vec::new();

    while body.bytes_remaining() > 1 {
        let child = ElementHeader::read(&mut body)?;
        let len = child.data_len.unwrap_or(0) as usize;
        if len > body.bytes_remaining() {
            break;
        }

        if child.id != ids::TRACK_ENTRY {
            body.skip(len)?;
            continue;
        }

        let entry = SliceReader::from_vec(body.read_bytes(len)?.to_vec());
        if let Some(track) = parse_track_entry(entry)? {
            tracks.push(track);
        }
    }

    Ok(tracks)
}

fn parse_track_entry(mut entry: SliceReader) -> Result<Option<MkvTrack>> {
    let mut number = None;
    let mut track_type = 0u64;
    let mut codec_id = String::new();
    let mut codec_private: Option<Box<[u8]>> = None;
    let mut default_duration_ns = None;
    let mut codec_delay_ns = 0;
    let mut language = String::from("und");
    let mut name = None;

    let mut width = 0u32;
    let mut height = 0u32;
    let mut color: Option<ColorSpace> = None;
    let mut rotation = Rotation::None;

    let mut sample_rate = 0u32;
    let mut channels = 1u32;
    let mut bit_depth = None;

    while entry.bytes_remaining() > 1 {
        let child = ElementHeader::read(&mut entry)?;
        let len = child.data_len.unwrap_or(0) as usize;
        if len > entry.bytes_remaining() {
            break;
        }

        match child.id {
            ids::TRACK_NUMBER => number = Some(read_unsigned(&mut entry, len)?),
            ids::TRACK_TYPE => track_type = read_unsigned(&mut entry, len)?,
            ids::CODEC_ID => codec_id = read_string(&mut entry, len)?,
            ids::CODEC_PRIVATE => {
                codec_private = Some(Box::from(entry.read_bytes(len)?));
            }
            ids::DEFAULT_DURATION => default_duration_ns = Some(read_unsigned(&mut entry, len)?),
            ids::CODEC_DELAY => codec_delay_ns = read_unsigned(&mut entry, len)?,
            ids::LANGUAGE | ids::LANGUAGE_BCP47 => {
                language = normalize_language(&read_string(&mut entry, len)?);
            }
            ids::NAME => name = Some(read_string(&mut entry, len)?),
            ids::VIDEO => {
                let mut video = SliceReader::from_vec(entry.read_bytes(len)?.to_vec());
                parse_video_element(&mut video, &mut width, &mut height, &mut color, &mut rotation)?;
            }
            ids::AUDIO => {
                let mut audio = SliceReader::from_vec(entry.read_bytes(len)?.to_vec());
                while audio.bytes_remaining() > 1 {
                    let field = ElementHeader::read(&mut audio)?;
                    let field_len = field.data_len.unwrap_or(0) as usize;
                    if field_len > audio.bytes_remaining() {
                        break;
                    }
                    match field.id {
                        ids::SAMPLING_FREQUENCY => {
                            sample_rate = read_float(&mut audio, field_len)? as u32;
                        }
                        ids::CHANNELS => channels = read_unsigned(&mut audio, field_len)? as u32,
                        ids::BIT_DEPTH => bit_depth = Some(read_unsigned(&mut audio, field_len)?),
                        _ => audio.skip(field_len)?,
                    }
                }
            }
            _ => entry.skip(len)?,
        }
    }

    let number = match number {
        Some(number) => number,
        None => return Ok(None),
    };

    let codec = match codec_from_id(&codec_id, bit_depth) {
        Some(codec) => codec,
        None => {
            warn!("ignoring track {} with unsupported codec id {}", number, codec_id);
            return Ok(None);
        }
    };

    // Track types: 1 video, 2 audio, 17 subtitle.
    let info = match (track_type, codec) {
        (1, remux_core::track::Codec::Video(codec)) => TrackInfo::Video(VideoTrackInfo {
            codec,
            coded_width: width,
            coded_height: height,
            rotation,
            color,
            decoder_config: codec_private,
        }),
        (2, remux_core::track::Codec::Audio(codec)) => TrackInfo::Audio(AudioTrackInfo {
            codec,
            channel_count: channels,
            sample_rate,
            decoder_config: codec_private,
        }),
        (17, remux_core::track::Codec::Subtitle(codec)) => TrackInfo::Subtitle(SubtitleTrackInfo {
            codec,
            config: codec_private.map(|c| String::from_utf8_lossy(&c).into_owned()),
        }),
        _ => {
            warn!("ignoring track {} whose type and codec disagree", number);
            return Ok(None);
        }
    };

    Ok(Some(MkvTrack { number, info, language, name, default_duration_ns, codec_delay_ns }))
}

fn parse_video_element(
    video: &mut SliceReader,
    width: &mut u32,
    height: &mut u32,
    color: &mut Option<ColorSpace>,
    rotation: &mut Rotation,
) -> Result<()> {
    while video.bytes_remaining() > 1 {
        let field = ElementHeader::read(video)?;
        let field_len = field.data_len.unwrap_or(0) as usize;
        if field_len > video.bytes_remaining() {
            break;
        }

        match field.id {
            ids::PIXEL_WIDTH => *width = read_unsigned(video, field_len)? as u32,
            ids::PIXEL_HEIGHT => *height = read_unsigned(video, field_len)? as u32,
            ids::COLOUR => {
                let mut colour = SliceReader::from_vec(video.read_bytes(field_len)?.to_vec());
                let mut cs = ColorSpace::default();

                while colour.bytes_remaining() > 1 {
                    let entry = ElementHeader::read(&mut colour)?;
                    let entry_len = entry.data_len.unwrap_or(0) as usize;
                    if entry_len > colour.bytes_remaining() {
                        break;
                    }
                    match entry.id {
                        ids::MATRIX_COEFFICIENTS => {
                            cs.matrix = MatrixCoefficients::from_code(
                                read_unsigned(&mut colour, entry_len)? as u8,
                            );
                        }
                        ids::TRANSFER_CHARACTERISTICS => {
                            cs.transfer = TransferCharacteristics::from_code(
                                read_unsigned(&mut colour, entry_len)? as u8,
                            );
                        }
                        ids::PRIMARIES => {
                            cs.primaries = ColorPrimaries::from_code(
                                read_unsigned(&mut colour, entry_len)? as u8,
                            );
                        }
                        ids::RANGE => {
                            cs.full_range =
                                Some(read_unsigned(&mut colour, entry_len)? == 2);
                        }
                        _ => colour.skip(entry_len)?,
                    }
                }

                if !cs.is_empty() {
                    *color = Some(cs);
                }
            }
            ids::PROJECTION => {
                let mut projection = SliceReader::from_vec(video.read_bytes(field_len)?.to_vec());
                while projection.bytes_remaining() > 1 {
                    let entry = ElementHeader::read(&mut projection)?;
                    let entry_len = entry.data_len.unwrap_or(0) as usize;
                    if entry_len > projection.bytes_remaining() {
                        break;
                    }
                    if entry.id == ids::PROJECTION_POSE_ROLL {
                        let roll = read_float(&mut projection, entry_len)?;
                        // The roll is nominally counter-clockwise, but producers disagree on the
                        // sign; accept whichever convention lands on a right-angle rotation.
                        *rotation = Rotation::from_degrees((-roll).round() as i32)
                            .or_else(|| Rotation::from_degrees(roll.round() as i32))
                            .unwrap_or(Rotation::None);
                    }
                    else {
                        projection.skip(entry_len)?;
                    }
                }
            }
            _ => video.skip(field_len)?,
        }
    }

    Ok(())
}

#[async_trait]
impl Demuxer for MkvDemuxer {
    fn format_info(&self) -> &'static FormatInfo {
        &MKV_FORMAT_INFO
    }

    async fn tracks(self: Arc<Self>) -> Result<Vec<InputTrack>> {
        let mut tracks = Vec::new();

        for (idx, track) in self.tracks.iter().enumerate() {
            let reader = Arc::new(MkvTrackReader { demuxer: self.clone(), track_idx: idx });

            tracks.push(InputTrack::new(
                track.number as u32,
                track.info.clone(),
                track.language.clone(),
                track.name.clone(),
                self.ticks_per_second(),
                reader,
            ));
        }

        Ok(tracks)
    }

    async fn compute_duration(self: Arc<Self>) -> Result<f64> {
        if let Some(duration) = self.info_duration {
            return Ok(duration / self.ticks_per_second());
        }

        let mut max = 0f64;
        for track in &self.tracks {
            max = max.max(self.track_duration(track.number).await?);
        }
        Ok(max)
    }

    fn dispose(&self) {
        self.reader.dispose();
    }
}

struct MkvTrackReader {
    demuxer: Arc<MkvDemuxer>,
    track_idx: usize,
}

impl MkvTrackReader {
    fn track(&self) -> &MkvTrack {
        &self.demuxer.tracks[self.track_idx]
    }
}

#[async_trait]
impl TrackReader for MkvTrackReader {
    async fn first_timestamp(&self) -> Result<f64> {
        match self.first_packet(PacketOptions::METADATA_ONLY).await? {
            Some(packet) => Ok(packet.timestamp()),
            None => Ok(0.0),
        }
    }

    async fn compute_duration(&self) -> Result<f64> {
        self.demuxer.track_duration(self.track().number).await
    }

    async fn first_packet(&self, opts: PacketOptions) -> Result<Option<EncodedPacket>> {
        self.demuxer.first_track_packet(self.track().number, opts).await
    }

    async fn packet_at(&self, time: f64, opts: PacketOptions) -> Result<Option<EncodedPacket>> {
        self.demuxer.packet_at_time(self.track().number, time, opts, false).await
    }

    async fn next_packet(
        &self,
        packet: &EncodedPacket,
        opts: PacketOptions,
    ) -> Result<Option<EncodedPacket>> {
        let seq = packet.sequence_number();
        if seq < 0 {
            return invalid_format_error("mkv: packet has no sequence number");
        }
        self.demuxer.packet_after(self.track().number, seq, opts, false).await
    }

    async fn key_packet_at(&self, time: f64, opts: PacketOptions) -> Result<Option<EncodedPacket>> {
        self.demuxer.packet_at_time(self.track().number, time, opts, true).await
    }

    async fn next_key_packet(
        &self,
        packet: &EncodedPacket,
        opts: PacketOptions,
    ) -> Result<Option<EncodedPacket>> {
        let seq = packet.sequence_number();
        if seq < 0 {
            return invalid_format_error("mkv: packet has no sequence number");
        }
        self.demuxer.packet_after(self.track().number, seq, opts, true).await
    }

    async fn codec_parameter_string(&self) -> Result<Option<String>> {
        // Containers carrying full decoder configurations can derive precise strings; fall back
        // to inspecting the first packet for codecs whose parameters live in the bitstream.
        match &self.track().info {
            TrackInfo::Video(info) => match (info.codec, &info.decoder_config) {
                (remux_core::track::VideoCodec::Avc, Some(config)) => {
                    let record =
                        remux_common::mpeg::video::avc::AvcDecoderConfigurationRecord::parse(
                            config,
                        )?;
                    Ok(Some(record.codec_parameter_string()))
                }
                (remux_core::track::VideoCodec::Hevc, Some(config)) => {
                    let record =
                        remux_common::mpeg::video::hevc::HevcDecoderConfigurationRecord::parse(
                            config,
                        )?;
                    Ok(Some(record.codec_parameter_string()))
                }
                (remux_core::track::VideoCodec::Vp9, _) => {
                    match self.first_packet(PacketOptions::default()).await? {
                        Some(packet) => {
                            let info =
                                remux_common::vpx::Vp9FrameInfo::parse(packet.data())?;
                            Ok(Some(info.codec_parameter_string()))
                        }
                        None => Ok(None),
                    }
                }
                (remux_core::track::VideoCodec::Av1, _) => {
                    match self.first_packet(PacketOptions::default()).await? {
                        Some(packet) => Ok(remux_common::av1::Av1SequenceInfo::find_in_packet(
                            packet.data(),
                        )?
                        .map(|info| info.codec_parameter_string())),
                        None => Ok(None),
                    }
                }
                (codec, _) => Ok(Some(codec.tag().to_string())),
            },
            TrackInfo::Audio(info) => match info.codec {
                remux_core::track::AudioCodec::Aac => {
                    // Object type 2 (LC) unless the configuration says otherwise.
                    let object_type = info
                        .decoder_config
                        .as_ref()
                        .and_then(|c| c.first().map(|&b| b >> 3))
                        .unwrap_or(2);
                    Ok(Some(remux_common::mpeg::audio::aac_codec_parameter_string(object_type)))
                }
                codec => Ok(Some(codec.tag().to_string())),
            },
            TrackInfo::Subtitle(info) => Ok(Some(info.codec.tag().to_string())),
        }
    }

    async fn decoder_config(&self) -> Result<Option<Box<[u8]>>> {
        Ok(self.track().info.decoder_config().map(Box::from))
    }
}

/// The probe registration for the Matroska/WebM format.
pub fn registration() -> DemuxerRegistration {
    DemuxerRegistration {
        info: &MKV_FORMAT_INFO,
        can_read: |reader| Box::pin(MkvDemuxer::can_read(reader)),
        open: |reader| {
            Box::pin(async move {
                let demuxer = MkvDemuxer::open(reader).await?;
                Ok(demuxer as Arc<dyn Demuxer>)
            })
        },
    }
}
