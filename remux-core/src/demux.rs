// Remux
// Copyright (c) 2026 The Project Remux Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The `demux` module provides the traits and support structures necessary to implement media
//! demuxers.

use std::sync::Arc;

use async_trait::async_trait;

use crate::errors::Result;
use crate::packet::EncodedPacket;
use crate::track::{Codec, TrackInfo, TrackType};

/// Basic information about a container format.
#[derive(Copy, Clone, Debug)]
pub struct FormatInfo {
    /// A short ASCII-only string identifying the format.
    pub short_name: &'static str,
    /// A longer, more descriptive, string identifying the format.
    pub long_name: &'static str,
    /// The canonical media type of the format.
    pub mime_type: &'static str,
}

/// Options common to all packet-retrieval operations.
#[derive(Copy, Clone, Debug, Default)]
pub struct PacketOptions {
    /// Request a metadata-only packet: timing and size are populated, while the data buffer is an
    /// empty placeholder. Avoids loading sample bytes when only timing is needed.
    pub metadata_only: bool,
}

impl PacketOptions {
    /// Options requesting a metadata-only packet.
    pub const METADATA_ONLY: PacketOptions = PacketOptions { metadata_only: true };
}

/// Packet-retrieval operations backing one track of a demuxer.
///
/// All operations for the same track are serialized by the demuxer; operations on different
/// tracks of the same demuxer may interleave cooperatively.
#[async_trait]
pub trait TrackReader: Send + Sync {
    /// The timestamp of the first packet, in seconds.
    async fn first_timestamp(&self) -> Result<f64>;

    /// Compute the duration of the track in seconds: the end timestamp of its final packet.
    async fn compute_duration(&self) -> Result<f64>;

    /// Get the first packet of the track.
    async fn first_packet(&self, opts: PacketOptions) -> Result<Option<EncodedPacket>>;

    /// Get the packet whose presentation interval contains `time` (in seconds), or the last
    /// packet starting before `time` if intervals have gaps. Returns `None` when `time` falls
    /// outside the track.
    async fn packet_at(&self, time: f64, opts: PacketOptions) -> Result<Option<EncodedPacket>>;

    /// Get the packet following `packet` in presentation order.
    async fn next_packet(
        &self,
        packet: &EncodedPacket,
        opts: PacketOptions,
    ) -> Result<Option<EncodedPacket>>;

    /// Get the latest key packet whose timestamp is at or before `time`.
    async fn key_packet_at(&self, time: f64, opts: PacketOptions)
        -> Result<Option<EncodedPacket>>;

    /// Get the first key packet following `packet` in presentation order.
    async fn next_key_packet(
        &self,
        packet: &EncodedPacket,
        opts: PacketOptions,
    ) -> Result<Option<EncodedPacket>>;

    /// Get the codec parameter string for the track (e.g. `avc1.64001f`). May need to inspect the
    /// first packet for codecs whose containers do not carry the parameters.
    async fn codec_parameter_string(&self) -> Result<Option<String>>;

    /// Get the decoder configuration blob, building one from the bitstream when the container
    /// does not carry it.
    async fn decoder_config(&self) -> Result<Option<Box<[u8]>>>;
}

/// An `InputTrack` is an independently coded media bitstream within a container, along with the
/// operations to retrieve its packets.
#[derive(Clone)]
pub struct InputTrack {
    /// A unique identifier for the track within its container.
    pub id: u32,
    /// Codec-level track metadata.
    pub info: TrackInfo,
    /// The BCP-47 or ISO 639-2 language of the track. `und` when undetermined.
    pub language: String,
    /// A human-readable track name, if the container carries one.
    pub name: Option<String>,
    /// The time resolution of the track in ticks per second.
    pub time_resolution: f64,
    reader: Arc<dyn TrackReader>,
}

impl InputTrack {
    /// Assemble a track from its metadata and packet-retrieval backing.
    pub fn new(
        id: u32,
        info: TrackInfo,
        language: String,
        name: Option<String>,
        time_resolution: f64,
        reader: Arc<dyn TrackReader>,
    ) -> Self {
        InputTrack { id, info, language, name, time_resolution, reader }
    }

    /// The track type.
    pub fn track_type(&self) -> TrackType {
        self.info.track_type()
    }

    /// The codec identifier.
    pub fn codec(&self) -> Codec {
        self.info.codec()
    }

    /// The timestamp of the first packet, in seconds.
    pub async fn first_timestamp(&self) -> Result<f64> {
        self.reader.first_timestamp().await
    }

    /// Compute the duration of the track in seconds.
    pub async fn compute_duration(&self) -> Result<f64> {
        self.reader.compute_duration().await
    }

    /// Get the first packet of the track.
    pub async fn first_packet(&self, opts: PacketOptions) -> Result<Option<EncodedPacket>> {
        self.reader.first_packet(opts).await
    }

    /// Get the packet containing `time` (in seconds).
    pub async fn packet_at(&self, time: f64, opts: PacketOptions) -> Result<Option<EncodedPacket>> {
        self.reader.packet_at(time, opts).await
    }

    /// Get the packet following `packet` in presentation order.
    pub async fn next_packet(
        &self,
        packet: &EncodedPacket,
        opts: PacketOptions,
    ) -> Result<Option<EncodedPacket>> {
        self.reader.next_packet(packet, opts).await
    }

    /// Get the latest key packet at or before `time`.
    pub async fn key_packet_at(
        &self,
        time: f64,
        opts: PacketOptions,
    ) -> Result<Option<EncodedPacket>> {
        self.reader.key_packet_at(time, opts).await
    }

    /// Get the first key packet following `packet`.
    pub async fn next_key_packet(
        &self,
        packet: &EncodedPacket,
        opts: PacketOptions,
    ) -> Result<Option<EncodedPacket>> {
        self.reader.next_key_packet(packet, opts).await
    }

    /// Get the codec parameter string for the track.
    pub async fn codec_parameter_string(&self) -> Result<Option<String>> {
        self.reader.codec_parameter_string().await
    }

    /// Get the decoder configuration blob for the track.
    pub async fn decoder_config(&self) -> Result<Option<Box<[u8]>>> {
        self.reader.decoder_config().await
    }
}

/// A `Demuxer` is a container parser. It exposes the tracks encapsulated in a container and, per
/// track, packet-retrieval operations with seeking.
///
/// Demuxers parse lazily: opening one reads only as much of the container as needed to enumerate
/// tracks, and indexes (fragments, clusters, cues) are materialized on demand during seeks.
#[async_trait]
pub trait Demuxer: Send + Sync {
    /// Get basic information about the container format.
    fn format_info(&self) -> &'static FormatInfo;

    /// Get the list of tracks in the container.
    async fn tracks(self: Arc<Self>) -> Result<Vec<InputTrack>>;

    /// Compute the duration of the container in seconds: the maximum of the track durations.
    async fn compute_duration(self: Arc<Self>) -> Result<f64>;

    /// Dispose the demuxer. Pending retrievals complete or fail with
    /// [`crate::errors::Error::Disposed`].
    fn dispose(&self);
}
