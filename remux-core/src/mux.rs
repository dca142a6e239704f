// Remux
// Copyright (c) 2026 The Project Remux Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The `mux` module provides the traits and support structures necessary to implement media
//! muxers.

use std::collections::VecDeque;
use std::sync::Arc;

use async_trait::async_trait;

use crate::demux::FormatInfo;
use crate::errors::{encoding_error, Result};
use crate::packet::EncodedPacket;
use crate::track::TrackInfo;

/// Per-track options supplied when adding a track to an output.
#[derive(Clone, Debug)]
pub struct OutputTrackOptions {
    /// Codec-level track metadata.
    pub info: TrackInfo,
    /// The track language.
    pub language: Option<String>,
    /// A human-readable track name.
    pub name: Option<String>,
    /// A frame-rate hint for containers that store one (AVI, ISOBMFF timescale derivation).
    pub frame_rate: Option<f64>,
}

impl OutputTrackOptions {
    /// Create options carrying only codec metadata.
    pub fn new(info: TrackInfo) -> Self {
        OutputTrackOptions { info, language: None, name: None, frame_rate: None }
    }
}

/// A `Muxer` constructs a container append-only from encoded packets.
///
/// Every public method is serialized behind the muxer's own mutex, so concurrent cooperative
/// callers observe a consistent output. Packets fed to a track must be non-decreasing in
/// timestamp; the muxer interleaves tracks internally.
#[async_trait]
pub trait Muxer: Send + Sync {
    /// Get basic information about the container format being written.
    fn format_info(&self) -> &'static FormatInfo;

    /// Write any container preamble. Called once before the first track is added.
    async fn start(&self) -> Result<()>;

    /// Add a track, returning its identifier. All tracks must be added before the first packet
    /// is written.
    async fn add_track(&self, options: OutputTrackOptions) -> Result<u32>;

    /// Queue a packet for the given track. The muxer decides when queued packets are actually
    /// interleaved into the container.
    async fn write_packet(&self, track_id: u32, packet: &EncodedPacket) -> Result<()>;

    /// Finish the container: drain queued packets, write indexes, and back-patch any sizes or
    /// bookkeeping structures.
    async fn finalize(&self) -> Result<()>;
}

/// An `Output` wraps a muxer with a small stateful façade mirroring the input side.
pub struct Output {
    muxer: Arc<dyn Muxer>,
}

impl Output {
    /// Create an output over a muxer and write the container preamble.
    pub async fn new(muxer: Arc<dyn Muxer>) -> Result<Output> {
        muxer.start().await?;
        Ok(Output { muxer })
    }

    /// Get basic information about the container format being written.
    pub fn format_info(&self) -> &'static FormatInfo {
        self.muxer.format_info()
    }

    /// Add a track to the output.
    pub async fn add_track(&self, options: OutputTrackOptions) -> Result<OutputTrack> {
        let id = self.muxer.add_track(options).await?;
        Ok(OutputTrack { muxer: self.muxer.clone(), id })
    }

    /// Finalize the container.
    pub async fn finalize(self) -> Result<()> {
        self.muxer.finalize().await
    }
}

/// An `OutputTrack` is the handle through which packets are fed into a muxer.
#[derive(Clone)]
pub struct OutputTrack {
    muxer: Arc<dyn Muxer>,
    id: u32,
}

impl OutputTrack {
    /// The identifier of the track within the output container.
    pub fn id(&self) -> u32 {
        self.id
    }

    /// Queue a packet on this track.
    pub async fn write(&self, packet: &EncodedPacket) -> Result<()> {
        self.muxer.write_packet(self.id, packet).await
    }
}

struct QueuedTrack {
    id: u32,
    queue: VecDeque<EncodedPacket>,
    closed: bool,
}

/// An `Interleaver` holds the per-track packet queues of a muxer and selects the next packet to
/// write: the packet with the lowest presentation timestamp among the heads of all queues. Ties
/// break by track order, stably.
///
/// A selection is only made while every open track has a queued packet, since an empty open
/// queue could still produce an earlier packet. Closing a track (or finalizing, which closes all
/// tracks) releases that constraint.
#[derive(Default)]
pub struct Interleaver {
    tracks: Vec<QueuedTrack>,
}

impl Interleaver {
    pub fn new() -> Self {
        Default::default()
    }

    /// Register a track queue.
    pub fn add_track(&mut self, id: u32) {
        debug_assert!(self.tracks.iter().all(|t| t.id != id));
        self.tracks.push(QueuedTrack { id, queue: VecDeque::new(), closed: false });
    }

    /// Queue a packet. Packets on one track must be pushed in non-decreasing timestamp order.
    pub fn push(&mut self, id: u32, packet: EncodedPacket) -> Result<()> {
        let track = match self.tracks.iter_mut().find(|t| t.id == id) {
            Some(track) => track,
            None => return encoding_error("packet written to unknown track"),
        };

        if track.closed {
            return encoding_error("packet written to closed track");
        }

        if let Some(last) = track.queue.back() {
            if packet.timestamp() < last.timestamp() {
                return encoding_error("packet timestamps must be non-decreasing");
            }
        }

        track.queue.push_back(packet);
        Ok(())
    }

    /// Close a track: no further packets will arrive on it.
    pub fn close(&mut self, id: u32) {
        if let Some(track) = self.tracks.iter_mut().find(|t| t.id == id) {
            track.closed = true;
        }
    }

    /// Close every track, releasing the interleave constraint for finalization.
    pub fn close_all(&mut self) {
        for track in &mut self.tracks {
            track.closed = true;
        }
    }

    /// Returns true if every open track has at least one queued packet.
    pub fn ready(&self) -> bool {
        self.tracks.iter().all(|t| t.closed || !t.queue.is_empty())
    }

    /// Returns true if every queue is empty.
    pub fn is_empty(&self) -> bool {
        self.tracks.iter().all(|t| t.queue.is_empty())
    }

    /// Returns true if the head packet of every non-empty queue is a key packet and every open
    /// track has a queued packet. Used to gate fragment and cluster boundaries.
    pub fn all_heads_key(&self) -> bool {
        self.ready() && self.tracks.iter().all(|t| t.queue.front().map_or(true, |p| p.is_key()))
    }

    /// Peek the track id and timestamp of the packet that would be popped next.
    pub fn peek(&self) -> Option<(u32, f64)> {
        if !self.ready() {
            return None;
        }

        self.tracks
            .iter()
            .filter_map(|t| t.queue.front().map(|p| (t.id, p.timestamp())))
            .min_by(|a, b| a.1.total_cmp(&b.1))
    }

    /// Pop the packet with the lowest head timestamp, if a selection can be made.
    pub fn pop(&mut self) -> Option<(u32, EncodedPacket)> {
        let (id, _) = self.peek()?;
        let track = self.tracks.iter_mut().find(|t| t.id == id)?;
        track.queue.pop_front().map(|p| (id, p))
    }
}

#[cfg(test)]
mod tests {
    use super::Interleaver;
    use crate::packet::{EncodedPacket, PacketType};

    fn packet(ts: f64, key: bool) -> EncodedPacket {
        let kind = if key { PacketType::Key } else { PacketType::Delta };
        EncodedPacket::new(vec![0u8; 4], kind, ts, 0.02, -1)
    }

    #[test]
    fn verify_interleave_order() {
        let mut il = Interleaver::new();
        il.add_track(1);
        il.add_track(2);

        il.push(1, packet(0.0, true)).unwrap();
        // Track 2 has nothing queued: no selection possible yet.
        assert!(il.pop().is_none());

        il.push(2, packet(0.01, true)).unwrap();
        il.push(1, packet(0.02, false)).unwrap();

        assert_eq!(il.pop().unwrap().0, 1);
        assert_eq!(il.pop().unwrap().0, 2);
        // Track 2 is empty again.
        assert!(il.pop().is_none());

        il.close(2);
        assert_eq!(il.pop().unwrap().0, 1);
    }

    #[test]
    fn verify_monotonicity_enforced() {
        let mut il = Interleaver::new();
        il.add_track(1);

        il.push(1, packet(1.0, true)).unwrap();
        assert!(il.push(1, packet(0.5, false)).is_err());
    }

    #[test]
    fn verify_key_gate() {
        let mut il = Interleaver::new();
        il.add_track(1);
        il.add_track(2);

        il.push(1, packet(0.0, true)).unwrap();
        assert!(!il.all_heads_key());

        il.push(2, packet(0.0, false)).unwrap();
        assert!(!il.all_heads_key());

        il.pop().unwrap();
        il.push(1, packet(0.5, true)).unwrap();
        il.pop().unwrap();
        il.push(2, packet(0.5, true)).unwrap();
        assert!(il.all_heads_key());
    }
}
