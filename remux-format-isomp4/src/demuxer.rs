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
use remux_core::track::{AudioCodec, Rotation, TrackInfo, VideoCodec};
use remux_core::util::lang::normalize_language;
use remux_core::util::sort::{binary_search_less_or_equal, insert_sorted};

use crate::atoms::{for_each_child, read_box_header_at, read_full_box, BoxHeader};
use crate::ISOMP4_FORMAT_INFO;

/// One sample of a non-fragmented track.
#[derive(Copy, Clone, Debug)]
struct Sample {
    offset: u64,
    size: u32,
    pts: i64,
    dur: u32,
    key: bool,
}

/// The decomposed `stbl` of a non-fragmented track.
struct SampleTable {
    /// Samples in decode order.
    samples: Vec<Sample>,
    /// Sample indices sorted by presentation timestamp.
    by_pts: Vec<u32>,
}

impl SampleTable {
    /// The index (into `by_pts`) of the last sample whose PTS is at or before `target`.
    fn rank_at(&self, target: i64) -> Option<usize> {
        binary_search_less_or_equal(&self.by_pts, target, |&idx| {
            self.samples[idx as usize].pts
        })
    }

    fn sample_at_rank(&self, rank: usize) -> Option<&Sample> {
        self.by_pts.get(rank).map(|&idx| &self.samples[idx as usize])
    }
}

/// Per-track defaults from `trex`.
#[derive(Copy, Clone, Debug, Default)]
struct TrackDefaults {
    sample_duration: u32,
    sample_size: u32,
    sample_flags: u32,
}

/// One sample within a fragment, in presentation order.
#[derive(Copy, Clone, Debug)]
struct FragSample {
    offset: u64,
    size: u32,
    pts: i64,
    dur: u32,
    key: bool,
}

struct FragTrack {
    samples: Vec<FragSample>,
    start_ts: i64,
    end_ts: i64,
}

/// An ISOBMFF movie fragment: one `moof` plus its `mdat` byte range.
struct Fragment {
    moof_offset: u64,
    /// End of the fragment's data, where the next top-level box begins.
    end_offset: u64,
    by_track: HashMap<u32, FragTrack>,
    /// False while the start timestamp is inferred by summing preceding fragment durations.
    start_is_final: bool,
    /// Offset of the next fragment's `moof`, linked lazily during walks.
    next: Option<u64>,
}

struct Mp4Track {
    id: u32,
    timescale: u32,
    language: String,
    info: TrackInfo,
    table: Option<SampleTable>,
}

struct FragmentState {
    /// Parsed fragments, sorted by `moof_offset`.
    fragments: Vec<Fragment>,
    /// Cumulative decode durations per track, tracking sequential walks for files without
    /// `tfdt` boxes.
    walked_to: u64,
}

/// ISO Base Media File Format (MP4/MOV) demultiplexer.
pub struct Mp4Demuxer {
    reader: Arc<Reader>,
    tracks: Vec<Mp4Track>,
    movie_timescale: u32,
    movie_duration: u64,
    fragmented: bool,
    defaults: HashMap<u32, TrackDefaults>,
    /// Start of the box sequence after `moov`, where the fragment walk begins.
    first_moof_search: u64,
    /// `tfra` random-access entries per track: `(time_ticks, moof_offset)`.
    tfra: HashMap<u32, Vec<(u64, u64)>>,
    /// The fragment list grows under this mutex during seeks.
    state: AsyncMutex<FragmentState>,
}

impl Mp4Demuxer {
    /// Probe check: an `ftyp` box (or bare `moov`/`moof` for headerless fragments).
    pub async fn can_read(reader: &Reader) -> Result<bool> {
        let head = match reader.slice(0, 12).await? {
            Some(head) if head.len() >= 12 => head,
            _ => return Ok(false),
        };
        let bytes = head.as_bytes();

        Ok(&bytes[4..8] == b"ftyp" || &bytes[4..8] == b"moov" || &bytes[4..8] == b"moof")
    }

    /// Open a demuxer over the stream behind `reader`.
    pub async fn open(reader: Arc<Reader>) -> Result<Arc<Mp4Demuxer>> {
        let file_len = reader.byte_len().await?;

        // Read top-level boxes in order until the movie box is found.
        let mut pos = 0u64;
        let mut moov: Option<BoxHeader> = None;

        while pos < file_len {
            let header = match read_box_header_at(&reader, pos).await? {
                Some(header) => header,
                None => break,
            };

            match &header.fourcc {
                b"moov" => {
                    moov = Some(header);
                    break;
                }
                other => debug!("skipping top-level box {}", String::from_utf8_lossy(other)),
            }

            pos = header.end();
        }

        let moov = match moov {
            Some(moov) => moov,
            None => return invalid_format_error("isomp4: missing moov box"),
        };

        let mut body = match reader.slice(moov.data_pos, moov.data_len).await? {
            Some(body) if body.len() as u64 == moov.data_len
                => body,
            _ => return invalid_format_error("isomp4: moov out of range"),
        };

        let mut movie_timescale = 1000u32;
        let mut movie_duration = 0u64;
        let mut tracks = Vec::new();
        let mut defaults = HashMap::new();
        let mut fragmented = false;

        for_each_child(&mut body, |fourcc, child| {
            match &fourcc {
                b"mvhd" => {
                    let (version, _) = read_full_box(child)?;
                    if version == 1 {
                        child.skip(16)?;
                        movie_timescale = child.read_u32()?;
                        movie_duration = child.read_u64()?;
                    }
                    else {
                        child.skip(8)?;
                        movie_timescale = child.read_u32()?;
                        movie_duration = u64::from(child.read_u32()?);
                    }
                }
                b"trak" => {
                    if let Some(track) = parse_trak(child)? {
                        tracks.push(track);
                    }
                }
                b"mvex" => {
                    fragmented = true;
                    for_each_child(child, |fourcc, grand| {
                        if &fourcc == b"trex" {
                            read_full_box(grand)?;
                            let track_id = grand.read_u32()?;
                            // default_sample_description_index
                            grand.skip(4)?;
                            let sample_duration = grand.read_u32()?;
                            let sample_size = grand.read_u32()?;
                            let sample_flags = grand.read_u32()?;
                            defaults.insert(
                                track_id,
                                TrackDefaults { sample_duration, sample_size, sample_flags },
                            );
                        }
                        Ok(())
                    })?;
                }
                _ => (),
            }
            Ok(())
        })?;

        if tracks.is_empty() {
            return invalid_format_error("isomp4: no supported tracks");
        }

        // For fragmented files, consult the mfra/tfra random-access table when present.
        let mut tfra = HashMap::new();
        if fragmented {
            if let Some(table) = read_mfra(&reader, file_len).await? {
                tfra = table;
            }
        }

        Ok(Arc::new(Mp4Demuxer {
            reader,
            tracks,
            movie_timescale,
            movie_duration,
            fragmented,
            defaults,
            first_moof_search: moov.end(),
            tfra,
            state: AsyncMutex::new(FragmentState { fragments: Vec::new(), walked_to: 0 }),
        }))
    }

    fn track(&self, idx: usize) -> &Mp4Track {
        &self.tracks[idx]
    }

    fn make_packet(
        &self,
        track: &Mp4Track,
        pts: i64,
        dur: u32,
        key: bool,
        size: u32,
        seq: i64,
        data: Option<Vec<u8>>,
    ) -> EncodedPacket {
        let kind = if key { PacketType::Key } else { PacketType::Delta };
        let scale = f64::from(track.timescale);
        let timestamp = pts as f64 / scale;
        let duration = f64::from(dur) / scale;

        match data {
            Some(data) => EncodedPacket::new(data, kind, timestamp, duration, seq),
            None => {
                EncodedPacket::new_metadata_only(kind, timestamp, duration, seq, u64::from(size))
            }
        }
    }

    async fn load_sample_data(&self, offset: u64, size: u32) -> Result<Vec<u8>> {
        match self.reader.slice(offset, u64::from(size)).await? {
            Some(mut slice) if slice.len() == size as usize => Ok(slice.read_remaining().to_vec()),
            _ => invalid_format_error("isomp4: sample data out of range"),
        }
    }

    // Non-fragmented access: the sample table is sorted by presentation timestamp and seeks are
    // a single binary search.

    async fn table_packet(
        &self,
        track_idx: usize,
        rank: usize,
        opts: PacketOptions,
    ) -> Result<Option<EncodedPacket>> {
        let track = self.track(track_idx);
        let table = track.table.as_ref().expect("progressive track has a sample table");

        let sample = match table.sample_at_rank(rank) {
            Some(sample) => *sample,
            None => return Ok(None),
        };

        let data = if opts.metadata_only {
            None
        }
        else {
            Some(self.load_sample_data(sample.offset, sample.size).await?)
        };

        Ok(Some(self.make_packet(
            track,
            sample.pts,
            sample.dur,
            sample.key,
            sample.size,
            rank as i64,
            data,
        )))
    }

    async fn table_packet_at(
        &self,
        track_idx: usize,
        time: f64,
        opts: PacketOptions,
        keys_only: bool,
    ) -> Result<Option<EncodedPacket>> {
        let track = self.track(track_idx);
        let table = track.table.as_ref().expect("progressive track has a sample table");

        if time < 0.0 {
            return Ok(None);
        }
        let target = (time * f64::from(track.timescale)).floor() as i64;

        let mut rank = match table.rank_at(target) {
            Some(rank) => rank,
            None => return Ok(None),
        };

        // Outside the track entirely?
        if let Some(sample) = table.sample_at_rank(rank) {
            let is_last = rank + 1 == table.by_pts.len();
            if is_last && target >= sample.pts + i64::from(sample.dur) {
                return Ok(None);
            }
        }

        if keys_only {
            while let Some(sample) = table.sample_at_rank(rank) {
                if sample.key {
                    break;
                }
                if rank == 0 {
                    return Ok(None);
                }
                rank -= 1;
            }
        }

        self.table_packet(track_idx, rank, opts).await
    }

    // Fragmented access.

    /// The exclusive fragment-lookup protocol: under the segment mutex, poll `best_match`
    /// against the already-loaded fragments; while it reports an imperfect match, walk forward
    /// from the nearest random-access point reading one `moof` at a time, inserting each parsed
    /// fragment in sorted order and linking `next` pointers, re-polling after each.
    async fn fragment_lookup<F>(
        &self,
        track_id: u32,
        latest_timestamp: i64,
        mut best_match: F,
    ) -> Result<Option<(usize, usize)>>
    where
        F: FnMut(&[Fragment]) -> (Option<(usize, usize)>, bool),
    {
        let mut state = self.state.lock().await;

        let (mut best, correct) = best_match(&state.fragments);
        if correct {
            return Ok(best);
        }

        // Jump to the nearest tfra entry at or before the target, or continue the sequential
        // walk where it last stopped.
        let mut pos = match self.tfra.get(&track_id).and_then(|entries| {
            binary_search_less_or_equal(entries, latest_timestamp.max(0) as u64, |&(t, _)| t)
                .map(|idx| entries[idx].1)
        }) {
            Some(offset) => offset,
            None => state.walked_to.max(self.first_moof_search),
        };

        loop {
            // Skip boxes until the next moof.
            let header = match read_box_header_at(&self.reader, pos).await? {
                Some(header) => header,
                None => break,
            };

            if &header.fourcc != b"moof" {
                pos = header.end();
                continue;
            }

            // Already parsed?
            let already =
                state.fragments.binary_search_by_key(&header.pos, |f| f.moof_offset).is_ok();

            if !already {
                let fragment = self.parse_fragment(&state, &header).await?;
                let end = fragment.end_offset;

                let idx = insert_sorted(&mut state.fragments, fragment, |f| f.moof_offset);

                // Establish the next-fragment links around the insertion.
                if idx > 0 {
                    state.fragments[idx - 1].next = Some(header.pos);
                }
                if let Some(following) = state.fragments.get(idx + 1) {
                    let next_offset = following.moof_offset;
                    state.fragments[idx].next = Some(next_offset);
                }

                state.walked_to = state.walked_to.max(end);
            }

            let (new_best, correct) = best_match(&state.fragments);
            best = new_best;
            if correct {
                return Ok(best);
            }

            // Terminate once the walk has passed the latest timestamp of interest.
            let past = state
                .fragments
                .iter()
                .rev()
                .find(|f| f.by_track.contains_key(&track_id))
                .map_or(false, |f| {
                    f.by_track.get(&track_id).map_or(false, |t| t.start_ts > latest_timestamp)
                });
            if past {
                break;
            }

            pos = match state.fragments.binary_search_by_key(&header.pos, |f| f.moof_offset) {
                Ok(idx) => state.fragments[idx].end_offset,
                Err(_) => header.end(),
            };
        }

        // The best fragment seen is returned even if imperfect.
        Ok(best)
    }

    /// Parse one `moof` and its sample data ranges into a fragment.
    async fn parse_fragment(&self, state: &FragmentState, header: &BoxHeader) -> Result<Fragment> {
        let mut body = match self.reader.slice(header.data_pos, header.data_len).await? {
            Some(body) => body,
            None => return invalid_format_error("isomp4: moof out of range"),
        };

        struct TrafData {
            track_id: u32,
            base_data_offset: Option<u64>,
            default_base_is_moof: bool,
            tfdt: Option<u64>,
            default_dur: Option<u32>,
            default_size: Option<u32>,
            default_flags: Option<u32>,
            runs: Vec<TrunData>,
        }

        struct TrunData {
            data_offset: Option<i32>,
            first_sample_flags: Option<u32>,
            samples: Vec<(Option<u32>, Option<u32>, Option<u32>, i32)>,
        }

        let mut trafs: Vec<TrafData> = Vec::new();

        for_each_child(&mut body, |fourcc, child| {
            if &fourcc != b"traf" {
                return Ok(());
            }

            let mut traf = TrafData {
                track_id: 0,
                base_data_offset: None,
                default_base_is_moof: false,
                tfdt: None,
                default_dur: None,
                default_size: None,
                default_flags: None,
                runs: Vec::new(),
            };

            for_each_child(child, |fourcc, grand| {
                match &fourcc {
                    b"tfhd" => {
                        let (_, flags) = read_full_box(grand)?;
                        traf.track_id = grand.read_u32()?;
                        if flags & 0x1 != 0 {
                            traf.base_data_offset = Some(grand.read_u64()?);
                        }
                        if flags & 0x2 != 0 {
                            grand.skip(4)?;
                        }
                        if flags & 0x8 != 0 {
                            traf.default_dur = Some(grand.read_u32()?);
                        }
                        if flags & 0x10 != 0 {
                            traf.default_size = Some(grand.read_u32()?);
                        }
                        if flags & 0x20 != 0 {
                            traf.default_flags = Some(grand.read_u32()?);
                        }
                        traf.default_base_is_moof = flags & 0x20000 != 0;
                    }
                    b"tfdt" => {
                        let (version, _) = read_full_box(grand)?;
                        traf.tfdt = Some(if version == 1 {
                            grand.read_u64()?
                        }
                        else {
                            u64::from(grand.read_u32()?)
                        });
                    }
                    b"trun" => {
                        let (version, flags) = read_full_box(grand)?;
                        let count = grand.read_u32()?;

                        let mut run = TrunData {
                            data_offset: None,
                            first_sample_flags: None,
                            samples: Vec::with_capacity(count as usize),
                        };

                        if flags & 0x1 != 0 {
                            run.data_offset = Some(grand.read_i32()?);
                        }
                        if flags & 0x4 != 0 {
                            run.first_sample_flags = Some(grand.read_u32()?);
                        }

                        for _ in 0..count {
                            let dur = if flags & 0x100 != 0 { Some(grand.read_u32()?) } else { None };
                            let size = if flags & 0x200 != 0 { Some(grand.read_u32()?) } else { None };
                            let sflags =
                                if flags & 0x400 != 0 { Some(grand.read_u32()?) } else { None };
                            let cts = if flags & 0x800 != 0 {
                                if version == 0 {
                                    grand.read_u32()? as i32
                                }
                                else {
                                    grand.read_i32()?
                                }
                            }
                            else {
                                0
                            };
                            run.samples.push((dur, size, sflags, cts));
                        }

                        traf.runs.push(run);
                    }
                    _ => (),
                }
                Ok(())
            })?;

            trafs.push(traf);
            Ok(())
        })?;

        // Find the fragment's end: the box following the moof's mdat(s).
        let mut end_offset = header.end();
        loop {
            match read_box_header_at(&self.reader, end_offset).await? {
                Some(next) if &next.fourcc == b"mdat" => end_offset = next.end(),
                _ => break,
            }
        }

        let mut by_track = HashMap::new();
        let mut start_is_final = true;
        let mut prev_traf_end: Option<u64> = None;

        for traf in trafs {
            let trex = self.defaults.get(&traf.track_id).copied().unwrap_or_default();
            if !self.tracks.iter().any(|t| t.id == traf.track_id) {
                continue;
            }

            // Base decode time: from tfdt, or by summing the durations of preceding fragments.
            // The summed value only becomes final once every preceding fragment has been walked.
            let start_dts = match traf.tfdt {
                Some(tfdt) => tfdt as i64,
                None => {
                    let preceding_walked =
                        header.pos <= state.walked_to.max(self.first_moof_search);
                    start_is_final = start_is_final && preceding_walked;
                    state
                        .fragments
                        .iter()
                        .filter(|f| f.moof_offset < header.pos)
                        .filter_map(|f| f.by_track.get(&traf.track_id))
                        .map(|t| t.end_ts - t.start_ts)
                        .sum::<i64>()
                }
            };

            let mut dts = start_dts;
            let mut samples = Vec::new();

            // Without an explicit base, offsets are measured from the start of the moof, or from
            // the end of the previous track fragment's data in the legacy addressing mode.
            let base = traf.base_data_offset.unwrap_or_else(|| {
                if traf.default_base_is_moof {
                    header.pos
                }
                else {
                    prev_traf_end.unwrap_or(header.pos)
                }
            });
            let mut data_pos = base;

            for run in &traf.runs {
                if let Some(offset) = run.data_offset {
                    data_pos = base.wrapping_add_signed(i64::from(offset));
                }

                for (idx, &(dur, size, sflags, cts)) in run.samples.iter().enumerate() {
                    let dur = dur.or(traf.default_dur).unwrap_or(trex.sample_duration);
                    let size = size.or(traf.default_size).unwrap_or(trex.sample_size);
                    let flags = if idx == 0 {
                        run.first_sample_flags
                            .or(sflags)
                            .or(traf.default_flags)
                            .unwrap_or(trex.sample_flags)
                    }
                    else {
                        sflags.or(traf.default_flags).unwrap_or(trex.sample_flags)
                    };

                    // sample_is_non_sync_sample
                    let key = flags & 0x0001_0000 == 0;

                    samples.push(FragSample {
                        offset: data_pos,
                        size,
                        pts: dts + i64::from(cts),
                        dur,
                        key,
                    });

                    data_pos += u64::from(size);
                    dts += i64::from(dur);
                }
            }

            // Presentation order.
            samples.sort_by_key(|s| s.pts);

            let start_ts = samples.first().map_or(start_dts, |s| s.pts);
            let end_ts = samples.last().map_or(start_dts, |s| s.pts + i64::from(s.dur));
            let end_ts = end_ts.max(dts);

            by_track.insert(traf.track_id, FragTrack { samples, start_ts, end_ts });
            prev_traf_end = Some(data_pos);
        }

        Ok(Fragment { moof_offset: header.pos, end_offset, by_track, start_is_final, next: None })
    }

    async fn fragment_packet_at(
        &self,
        track_idx: usize,
        time: f64,
        opts: PacketOptions,
        keys_only: bool,
    ) -> Result<Option<EncodedPacket>> {
        let track_id = self.track(track_idx).id;
        let timescale = f64::from(self.track(track_idx).timescale);

        if time < 0.0 {
            return Ok(None);
        }
        let target = (time * timescale).floor() as i64;

        let found = self
            .fragment_lookup(track_id, target, |fragments| {
                best_fragment_sample(fragments, track_id, target, keys_only)
            })
            .await?;

        let (frag_idx, sample_idx) = match found {
            Some(found) => found,
            None => return Ok(None),
        };

        let state = self.state.lock().await;
        let fragment = &state.fragments[frag_idx];
        let sample = fragment.by_track[&track_id].samples[sample_idx];
        let seq = make_frag_seq(fragment.moof_offset, sample_idx);
        drop(state);

        let data = if opts.metadata_only {
            None
        }
        else {
            Some(self.load_sample_data(sample.offset, sample.size).await?)
        };

        Ok(Some(self.make_packet(
            self.track(track_idx),
            sample.pts,
            sample.dur,
            sample.key,
            sample.size,
            seq,
            data,
        )))
    }

    async fn fragment_packet_after(
        &self,
        track_idx: usize,
        seq: i64,
        opts: PacketOptions,
        keys_only: bool,
    ) -> Result<Option<EncodedPacket>> {
        let track_id = self.track(track_idx).id;
        let (moof_offset, idx) = split_frag_seq(seq);

        let found = self
            .fragment_lookup(track_id, i64::MAX, |fragments| {
                next_fragment_sample(fragments, track_id, moof_offset, idx, keys_only)
            })
            .await?;

        let (frag_idx, sample_idx) = match found {
            Some(found) => found,
            None => return Ok(None),
        };

        let state = self.state.lock().await;
        let fragment = &state.fragments[frag_idx];
        let sample = fragment.by_track[&track_id].samples[sample_idx];
        let seq = make_frag_seq(fragment.moof_offset, sample_idx);
        drop(state);

        let data = if opts.metadata_only {
            None
        }
        else {
            Some(self.load_sample_data(sample.offset, sample.size).await?)
        };

        Ok(Some(self.make_packet(
            self.track(track_idx),
            sample.pts,
            sample.dur,
            sample.key,
            sample.size,
            seq,
            data,
        )))
    }
}

/// Inspect loaded fragments for the sample at `target`. Returns the best candidate and whether
/// it is known correct (the target provably falls inside a loaded fragment).
fn best_fragment_sample(
    fragments: &[Fragment],
    track_id: u32,
    target: i64,
    keys_only: bool,
) -> (Option<(usize, usize)>, bool) {
    let mut best: Option<(usize, usize, i64)> = None;

    for (frag_idx, fragment) in fragments.iter().enumerate() {
        let track = match fragment.by_track.get(&track_id) {
            Some(track) => track,
            None => continue,
        };

        for (sample_idx, sample) in track.samples.iter().enumerate() {
            if sample.pts > target {
                break;
            }
            if keys_only && !sample.key {
                continue;
            }
            match best {
                Some((.., pts)) if pts >= sample.pts => (),
                _ => best = Some((frag_idx, sample_idx, sample.pts)),
            }
        }
    }

    match best {
        Some((frag_idx, sample_idx, pts)) => {
            let fragment = &fragments[frag_idx];
            let track = &fragment.by_track[&track_id];
            let sample = &track.samples[sample_idx];

            // Correct when the target falls inside this sample, or inside this fragment and the
            // following fragment is already linked (no gap can hide a better sample).
            let contains = target < sample.pts + i64::from(sample.dur);
            let within_fragment = target < track.end_ts && fragment.start_is_final;
            (Some((frag_idx, sample_idx)), (contains || within_fragment) && pts <= target)
        }
        None => (None, false),
    }
}

/// Locate the sample following `(moof_offset, idx)` in presentation order.
fn next_fragment_sample(
    fragments: &[Fragment],
    track_id: u32,
    moof_offset: u64,
    idx: usize,
    keys_only: bool,
) -> (Option<(usize, usize)>, bool) {
    let frag_idx = match fragments.binary_search_by_key(&moof_offset, |f| f.moof_offset) {
        Ok(idx) => idx,
        Err(_) => return (None, false),
    };

    // Within the same fragment first.
    if let Some(track) = fragments[frag_idx].by_track.get(&track_id) {
        for (i, sample) in track.samples.iter().enumerate().skip(idx + 1) {
            if !keys_only || sample.key {
                return (Some((frag_idx, i)), true);
            }
        }
    }

    // Then along the linked fragments.
    let mut current = frag_idx;
    loop {
        let next_offset = match fragments[current].next {
            Some(next) => next,
            None => return (None, false),
        };
        let next_idx = match fragments.binary_search_by_key(&next_offset, |f| f.moof_offset) {
            Ok(idx) => idx,
            Err(_) => return (None, false),
        };

        if let Some(track) = fragments[next_idx].by_track.get(&track_id) {
            for (i, sample) in track.samples.iter().enumerate() {
                if !keys_only || sample.key {
                    return (Some((next_idx, i)), true);
                }
            }
        }

        current = next_idx;
    }
}

fn make_frag_seq(moof_offset: u64, idx: usize) -> i64 {
    ((moof_offset as i64) << 16) | idx as i64
}

fn split_frag_seq(seq: i64) -> (u64, usize) {
    ((seq >> 16) as u64, (seq & 0xffff) as usize)
}

/// Locate and parse the `mfra` box at the end of the file via its trailing `mfro`.
async fn read_mfra(reader: &Reader, file_len: u64) -> Result<Option<HashMap<u32, Vec<(u64, u64)>>>> {
    if file_len < 16 {
        return Ok(None);
    }

    let mut tail = match reader.slice(file_len - 16, 16).await? {
        Some(tail) if tail.len() == 16 => tail,
        _ => return Ok(None),
    };

    tail.skip(4)?;
    if tail.read_quad_bytes()? != *b"mfro" {
        return Ok(None);
    }
    tail.skip(4)?;
    let mfra_size = u64::from(tail.read_u32()?);
    if mfra_size > file_len {
        return Ok(None);
    }

    let mfra_pos = file_len - mfra_size;
    let header = match read_box_header_at(reader, mfra_pos).await? {
        Some(header) if &header.fourcc == b"mfra" => header,
        _ => return Ok(None),
    };

    let mut body = match reader.slice(header.data_pos, header.data_len).await? {
        Some(body) => body,
        None => return Ok(None),
    };

    let mut table: HashMap<u32, Vec<(u64, u64)>> = HashMap::new();

    for_each_child(&mut body, |fourcc, child| {
        if &fourcc != b"tfra" {
            return Ok(());
        }

        let (version, _) = read_full_box(child)?;
        let track_id = child.read_u32()?;
        let sizes = child.read_u32()?;
        let len_traf = ((sizes >> 4) & 0x3) + 1;
        let len_trun = ((sizes >> 2) & 0x3) + 1;
        let len_sample = (sizes & 0x3) + 1;
        let count = child.read_u32()?;

        let mut entries = Vec::with_capacity(count as usize);
        for _ in 0..count {
            let (time, moof_offset) = if version == 1 {
                (child.read_u64()?, child.read_u64()?)
            }
            else {
                (u64::from(child.read_u32()?), u64::from(child.read_u32()?))
            };
            child.skip((len_traf + len_trun + len_sample) as usize)?;
            entries.push((time, moof_offset));
        }

        table.insert(track_id, entries);
        Ok(())
    })?;

    debug!("loaded tfra entries for {} tracks", table.len());
    Ok(Some(table))
}

// moov parsing.

fn parse_trak(body: &mut SliceReader) -> Result<Option<Mp4Track>> {
    let mut track_id = 0u32;
    let mut rotation = Rotation::None;
    let mut timescale = 0u32;
    let mut language = String::from("und");
    let mut handler = [0u8; 4];
    let mut info: Option<TrackInfo> = None;
    let mut stbl_tables: Option<StblTables> = None;
    let mut edit_media_time: i64 = 0;

    for_each_child(body, |fourcc, child| {
        match &fourcc {
            b"tkhd" => {
                let (version, _) = read_full_box(child)?;
                if version == 1 {
                    child.skip(16)?;
                    track_id = child.read_u32()?;
                    child.skip(4 + 8)?;
                }
                else {
                    child.skip(8)?;
                    track_id = child.read_u32()?;
                    child.skip(4 + 4)?;
                }
                // layer, alternate group, volume, reserved.
                child.skip(8)?;
                let mut matrix = [0i32; 9];
                for value in &mut matrix {
                    *value = child.read_i32()?;
                }
                rotation = Rotation::from_fixed_point_matrix(&[
                    matrix[0], matrix[1], matrix[3], matrix[4],
                ])
                .unwrap_or(Rotation::None);
            }
            b"edts" => {
                for_each_child(child, |fourcc, grand| {
                    if &fourcc == b"elst" {
                        let (version, _) = read_full_box(grand)?;
                        let count = grand.read_u32()?;
                        for _ in 0..count {
                            let (_, media_time) = if version == 1 {
                                (grand.read_u64()?, grand.read_i64()?)
                            }
                            else {
                                (u64::from(grand.read_u32()?), i64::from(grand.read_i32()?))
                            };
                            grand.skip(4)?;
                            // The first normal edit's media time offsets every presentation
                            // timestamp (encoder priming).
                            if media_time > 0 && edit_media_time == 0 {
                                edit_media_time = media_time;
                            }
                        }
                    }
                    Ok(())
                })?;
            }
            b"mdia" => {
                for_each_child(child, |fourcc, grand| {
                    match &fourcc {
                        b"mdhd" => {
                            let (version, _) = read_full_box(grand)?;
                            if version == 1 {
                                grand.skip(16)?;
                                timescale = grand.read_u32()?;
                                grand.skip(8)?;
                            }
                            else {
                                grand.skip(8)?;
                                timescale = grand.read_u32()?;
                                grand.skip(4)?;
                            }
                            let packed = grand.read_u16()?;
                            language = unpack_language(packed);
                        }
                        b"hdlr" => {
                            read_full_box(grand)?;
                            grand.skip(4)?;
                            handler = grand.read_quad_bytes()?;
                        }
                        b"minf" => {
                            for_each_child(grand, |fourcc, great| {
                                if &fourcc == b"stbl" {
                                    let (entry_info, tables) = parse_stbl(great)?;
                                    info = entry_info;
                                    stbl_tables = Some(tables);
                                }
                                Ok(())
                            })?;
                        }
                        _ => (),
                    }
                    Ok(())
                })?;
            }
            _ => (),
        }
        Ok(())
    })?;

    let mut info = match info {
        Some(info) => info,
        None => {
            warn!("ignoring track {} ({}) with unsupported sample entry", track_id, {
                String::from_utf8_lossy(&handler)
            });
            return Ok(None);
        }
    };

    if let TrackInfo::Video(video) = &mut info {
        video.rotation = rotation;
    }

    let table = stbl_tables.map(|tables| tables.build(edit_media_time));

    Ok(Some(Mp4Track {
        id: track_id,
        timescale: timescale.max(1),
        language: normalize_language(&language),
        info,
        table,
    }))
}

fn unpack_language(packed: u16) -> String {
    if packed == 0 || packed == 0x7fff {
        return "und".to_string();
    }
    let chars = [
        (((packed >> 10) & 0x1f) as u8 + 0x60) as char,
        (((packed >> 5) & 0x1f) as u8 + 0x60) as char,
        ((packed & 0x1f) as u8 + 0x60) as char,
    ];
    chars.iter().collect()
}

#[derive(Default)]
struct StblTables {
    /// `(sample_count, sample_delta)` runs.
    stts: Vec<(u32, u32)>,
    /// `(sample_count, composition_offset)` runs.
    ctts: Vec<(u32, i32)>,
    /// `(first_chunk, samples_per_chunk)` entries.
    stsc: Vec<(u32, u32)>,
    /// Constant size, or per-sample sizes.
    stsz_constant: u32,
    stsz: Vec<u32>,
    sample_count: u32,
    /// Chunk offsets from stco/co64.
    chunk_offsets: Vec<u64>,
    /// Key sample numbers (1-based); empty means every sample is a key sample.
    stss: Option<Vec<u32>>,
}

impl StblTables {
    /// Decompose the timing, size, and chunk runs into flat per-sample records.
    fn build(self, edit_media_time: i64) -> SampleTable {
        let count = self.sample_count as usize;
        let mut samples = Vec::with_capacity(count);

        // Per-sample sizes.
        let size_of = |idx: usize| -> u32 {
            if self.stsz_constant != 0 {
                self.stsz_constant
            }
            else {
                self.stsz.get(idx).copied().unwrap_or(0)
            }
        };

        // Expand decode-delta runs into cumulative DTS.
        let mut dts_values = Vec::with_capacity(count);
        let mut dts = 0i64;
        for &(run_count, delta) in &self.stts {
            for _ in 0..run_count {
                if dts_values.len() == count {
                    break;
                }
                dts_values.push(dts);
                dts += i64::from(delta);
            }
        }
        while dts_values.len() < count {
            dts_values.push(dts);
        }

        // Durations per sample.
        let mut durations = Vec::with_capacity(count);
        for &(run_count, delta) in &self.stts {
            for _ in 0..run_count {
                if durations.len() == count {
                    break;
                }
                durations.push(delta);
            }
        }
        while durations.len() < count {
            durations.push(0);
        }

        // Composition offsets.
        let mut cts_values = vec![0i32; count];
        let mut idx = 0usize;
        for &(run_count, offset) in &self.ctts {
            for _ in 0..run_count {
                if idx >= count {
                    break;
                }
                cts_values[idx] = offset;
                idx += 1;
            }
        }

        // Sample offsets from the sample-to-chunk mapping and chunk offsets.
        let mut offsets = vec![0u64; count];
        let mut sample_idx = 0usize;
        for (entry_idx, &(first_chunk, per_chunk)) in self.stsc.iter().enumerate() {
            let last_chunk = self
                .stsc
                .get(entry_idx + 1)
                .map(|&(next_first, _)| next_first - 1)
                .unwrap_or(self.chunk_offsets.len() as u32);

            for chunk in first_chunk..=last_chunk {
                let base = match self.chunk_offsets.get(chunk as usize - 1) {
                    Some(&base) => base,
                    None => break,
                };
                let mut pos = base;
                for _ in 0..per_chunk {
                    if sample_idx >= count {
                        break;
                    }
                    offsets[sample_idx] = pos;
                    pos += u64::from(size_of(sample_idx));
                    sample_idx += 1;
                }
            }
        }

        // Key samples.
        let mut keys = vec![self.stss.is_none(); count];
        if let Some(stss) = &self.stss {
            for &sample_number in stss {
                if let Some(flag) = keys.get_mut(sample_number as usize - 1) {
                    *flag = true;
                }
            }
        }

        for idx in 0..count {
            samples.push(Sample {
                offset: offsets[idx],
                size: size_of(idx),
                pts: dts_values[idx] + i64::from(cts_values[idx]) - edit_media_time,
                dur: durations[idx],
                key: keys[idx],
            });
        }

        let mut by_pts: Vec<u32> = (0..count as u32).collect();
        by_pts.sort_by_key(|&idx| samples[idx as usize].pts);

        SampleTable { samples, by_pts }
    }
}

fn parse_stbl(body: &mut SliceReader) -> Result<(Option<TrackInfo>, StblTables)> {
    let mut info = None;
    let mut tables = StblTables::default();

    for_each_child(body, |fourcc, child| {
        match &fourcc {
            b"stsd" => {
                read_full_box(child)?;
                let count = child.read_u32()?;
                if count > 0 {
                    info = crate::stsd::parse_sample_entry(child)?;
                }
            }
            b"stts" => {
                read_full_box(child)?;
                let count = child.read_u32()?;
                for _ in 0..count {
                    let sample_count = child.read_u32()?;
                    let delta = child.read_u32()?;
                    tables.stts.push((sample_count, delta));
                }
            }
            b"ctts" => {
                let (version, _) = read_full_box(child)?;
                let count = child.read_u32()?;
                for _ in 0..count {
                    let sample_count = child.read_u32()?;
                    let offset = if version == 0 {
                        child.read_u32()? as i32
                    }
                    else {
                        child.read_i32()?
                    };
                    tables.ctts.push((sample_count, offset));
                }
            }
            b"stsc" => {
                read_full_box(child)?;
                let count = child.read_u32()?;
                for _ in 0..count {
                    let first_chunk = child.read_u32()?;
                    let per_chunk = child.read_u32()?;
                    // sample_description_index
                    child.skip(4)?;
                    tables.stsc.push((first_chunk, per_chunk));
                }
            }
            b"stsz" => {
                read_full_box(child)?;
                tables.stsz_constant = child.read_u32()?;
                tables.sample_count = child.read_u32()?;
                if tables.stsz_constant == 0 {
                    for _ in 0..tables.sample_count {
                        tables.stsz.push(child.read_u32()?);
                    }
                }
            }
            b"stco" => {
                read_full_box(child)?;
                let count = child.read_u32()?;
                for _ in 0..count {
                    tables.chunk_offsets.push(u64::from(child.read_u32()?));
                }
            }
            b"co64" => {
                read_full_box(child)?;
                let count = child.read_u32()?;
                for _ in 0..count {
                    tables.chunk_offsets.push(child.read_u64()?);
                }
            }
            b"stss" => {
                read_full_box(child)?;
                let count = child.read_u32()?;
                let mut stss = Vec::with_capacity(count as usize);
                for _ in 0..count {
                    stss.push(child.read_u32()?);
                }
                tables.stss = Some(stss);
            }
            _ => (),
        }
        Ok(())
    })?;

    Ok((info, tables))
}

#[async_trait]
impl Demuxer for Mp4Demuxer {
    fn format_info(&self) -> &'static FormatInfo {
        &ISOMP4_FORMAT_INFO
    }

    async fn tracks(self: Arc<Self>) -> Result<Vec<InputTrack>> {
        let mut tracks = Vec::new();

        for (idx, track) in self.tracks.iter().enumerate() {
            let reader = Arc::new(Mp4TrackReader { demuxer: self.clone(), track_idx: idx });

            tracks.push(InputTrack::new(
                track.id,
                track.info.clone(),
                track.language.clone(),
                None,
                f64::from(track.timescale),
                reader,
            ));
        }

        Ok(tracks)
    }

    async fn compute_duration(self: Arc<Self>) -> Result<f64> {
        if self.movie_duration > 0 && !self.fragmented {
            return Ok(self.movie_duration as f64 / f64::from(self.movie_timescale));
        }

        let mut max = 0f64;
        for idx in 0..self.tracks.len() {
            let reader = Mp4TrackReader { demuxer: self.clone(), track_idx: idx };
            max = max.max(reader.compute_duration().await?);
        }
        Ok(max)
    }

    fn dispose(&self) {
        self.reader.dispose();
    }
}

struct Mp4TrackReader {
    demuxer: Arc<Mp4Demuxer>,
    track_idx: usize,
}

impl Mp4TrackReader {
    fn track(&self) -> &Mp4Track {
        self.demuxer.track(self.track_idx)
    }

    fn is_fragmented(&self) -> bool {
        self.demuxer.fragmented
            || self.track().table.as_ref().map_or(true, |t| t.samples.is_empty())
    }
}

#[async_trait]
impl TrackReader for Mp4TrackReader {
    async fn first_timestamp(&self) -> Result<f64> {
        match self.first_packet(PacketOptions::METADATA_ONLY).await? {
            Some(packet) => Ok(packet.timestamp()),
            None => Ok(0.0),
        }
    }

    async fn compute_duration(&self) -> Result<f64> {
        let track = self.track();

        if !self.is_fragmented() {
            let table = track.table.as_ref().expect("progressive track has a sample table");
            let end = table
                .by_pts
                .last()
                .map(|&idx| {
                    let sample = &table.samples[idx as usize];
                    sample.pts + i64::from(sample.dur)
                })
                .unwrap_or(0);
            return Ok(end as f64 / f64::from(track.timescale));
        }

        // Walk every fragment; the lookup terminates at end of file.
        let track_id = track.id;
        self.demuxer
            .fragment_lookup(track_id, i64::MAX, |fragments| {
                let best = fragments
                    .iter()
                    .enumerate()
                    .filter_map(|(i, f)| {
                        f.by_track.get(&track_id).map(|t| (i, t.samples.len().saturating_sub(1)))
                    })
                    .last();
                (best, false)
            })
            .await?;

        let state = self.demuxer.state.lock().await;
        let end = state
            .fragments
            .iter()
            .filter_map(|f| f.by_track.get(&track_id))
            .map(|t| t.end_ts)
            .max()
            .unwrap_or(0);

        Ok(end as f64 / f64::from(track.timescale))
    }

    async fn first_packet(&self, opts: PacketOptions) -> Result<Option<EncodedPacket>> {
        if !self.is_fragmented() {
            return self.demuxer.table_packet(self.track_idx, 0, opts).await;
        }
        self.demuxer.fragment_packet_at(self.track_idx, 0.0, opts, false).await
    }

    async fn packet_at(&self, time: f64, opts: PacketOptions) -> Result<Option<EncodedPacket>> {
        if !self.is_fragmented() {
            return self.demuxer.table_packet_at(self.track_idx, time, opts, false).await;
        }
        self.demuxer.fragment_packet_at(self.track_idx, time, opts, false).await
    }

    async fn next_packet(
        &self,
        packet: &EncodedPacket,
        opts: PacketOptions,
    ) -> Result<Option<EncodedPacket>> {
        let seq = packet.sequence_number();
        if seq < 0 {
            return invalid_format_error("isomp4: packet has no sequence number");
        }

        if !self.is_fragmented() {
            return self.demuxer.table_packet(self.track_idx, seq as usize + 1, opts).await;
        }
        self.demuxer.fragment_packet_after(self.track_idx, seq, opts, false).await
    }

    async fn key_packet_at(&self, time: f64, opts: PacketOptions) -> Result<Option<EncodedPacket>> {
        if !self.is_fragmented() {
            return self.demuxer.table_packet_at(self.track_idx, time, opts, true).await;
        }
        self.demuxer.fragment_packet_at(self.track_idx, time, opts, true).await
    }

    async fn next_key_packet(
        &self,
        packet: &EncodedPacket,
        opts: PacketOptions,
    ) -> Result<Option<EncodedPacket>> {
        let seq = packet.sequence_number();
        if seq < 0 {
            return invalid_format_error("isomp4: packet has no sequence number");
        }

        if !self.is_fragmented() {
            let track = self.track();
            let table = track.table.as_ref().expect("progressive track has a sample table");
            let mut rank = seq as usize + 1;
            while let Some(sample) = table.sample_at_rank(rank) {
                if sample.key {
                    return self.demuxer.table_packet(self.track_idx, rank, opts).await;
                }
                rank += 1;
            }
            return Ok(None);
        }
        self.demuxer.fragment_packet_after(self.track_idx, seq, opts, true).await
    }

    async fn codec_parameter_string(&self) -> Result<Option<String>> {
        match &self.track().info {
            TrackInfo::Video(info) => match (info.codec, &info.decoder_config) {
                (VideoCodec::Avc, Some(config)) => {
                    let record =
                        remux_common::mpeg::video::avc::AvcDecoderConfigurationRecord::parse(
                            config,
                        )?;
                    Ok(Some(record.codec_parameter_string()))
                }
                (VideoCodec::Hevc, Some(config)) => {
                    let record =
                        remux_common::mpeg::video::hevc::HevcDecoderConfigurationRecord::parse(
                            config,
                        )?;
                    Ok(Some(record.codec_parameter_string()))
                }
                (VideoCodec::Vp9, _) | (VideoCodec::Av1, _) => {
                    // Derive the full parameter string from the first packet's bitstream rather
                    // than from container defaults.
                    match self.first_packet(PacketOptions::default()).await? {
                        Some(packet) if info.codec == VideoCodec::Vp9 => {
                            let frame = remux_common::vpx::Vp9FrameInfo::parse(packet.data())?;
                            Ok(Some(frame.codec_parameter_string()))
                        }
                        Some(packet) => Ok(remux_common::av1::Av1SequenceInfo::find_in_packet(
                            packet.data(),
                        )?
                        .map(|s| s.codec_parameter_string())),
                        None => Ok(None),
                    }
                }
                (codec, _) => Ok(Some(codec.tag().to_string())),
            },
            TrackInfo::Audio(info) => match info.codec {
                AudioCodec::Aac => {
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

/// The probe registration for the ISOBMFF format.
pub fn registration() -> DemuxerRegistration {
    DemuxerRegistration {
        info: &ISOMP4_FORMAT_INFO,
        can_read: |reader| Box::pin(Mp4Demuxer::can_read(reader)),
        open: |reader| {
            Box::pin(async move {
                let demuxer = Mp4Demuxer::open(reader).await?;
                Ok(demuxer as Arc<dyn Demuxer>)
            })
        },
    }
}
