// Remux
// Copyright (c) 2026 The Project Remux Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The `packet` module defines the encoded packet structure.

use std::sync::Arc;

/// The type of an encoded packet.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum PacketType {
    /// The packet can be decoded without reference to any other packet.
    Key,
    /// The packet references one or more previously decoded packets.
    Delta,
}

/// An `EncodedPacket` contains a discrete amount of encoded data for a single codec bitstream.
///
/// Packets are immutable value types. Demuxers produce them and muxers consume them; neither
/// retains references into a packet after the call returns.
///
/// A packet may be *metadata-only*: its `data` buffer is empty while `byte_length` still records
/// the size of the encoded data in the container. Metadata-only packets are produced when a caller
/// only needs timing information and wants to avoid loading sample data.
#[derive(Clone)]
pub struct EncodedPacket {
    /// The encoded data. May be empty for a metadata-only packet.
    data: Arc<[u8]>,
    /// The packet type.
    kind: PacketType,
    /// The presentation timestamp in seconds. May be negative; samples whose end timestamp is
    /// negative are not intended to be presented.
    timestamp: f64,
    /// The duration in seconds. Never negative.
    duration: f64,
    /// An identifier compatible with the packet's position in the stream: packets later in
    /// presentation order compare greater. Negative when undefined.
    sequence_number: i64,
    /// The size of the encoded data in the container, even when `data` is a placeholder.
    byte_length: u64,
}

impl EncodedPacket {
    /// Create a new packet carrying its encoded data.
    pub fn new(
        data: impl Into<Arc<[u8]>>,
        kind: PacketType,
        timestamp: f64,
        duration: f64,
        sequence_number: i64,
    ) -> Self {
        let data = data.into();
        assert!(duration >= 0.0, "packet duration must be non-negative");

        let byte_length = data.len() as u64;

        EncodedPacket { data, kind, timestamp, duration, sequence_number, byte_length }
    }

    /// Create a metadata-only packet: an empty data buffer standing in for `byte_length` bytes of
    /// encoded data.
    pub fn new_metadata_only(
        kind: PacketType,
        timestamp: f64,
        duration: f64,
        sequence_number: i64,
        byte_length: u64,
    ) -> Self {
        assert!(duration >= 0.0, "packet duration must be non-negative");

        EncodedPacket {
            data: Vec::new().into(),
            kind,
            timestamp,
            duration,
            sequence_number,
            byte_length,
        }
    }

    /// Get an immutable slice of the packet data buffer.
    #[inline]
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Get a cheap clone of the packet data buffer.
    #[inline]
    pub fn shared_data(&self) -> Arc<[u8]> {
        self.data.clone()
    }

    /// The packet type.
    #[inline]
    pub fn kind(&self) -> PacketType {
        self.kind
    }

    /// Returns true if this is a key packet.
    #[inline]
    pub fn is_key(&self) -> bool {
        self.kind == PacketType::Key
    }

    /// The presentation timestamp in seconds.
    #[inline]
    pub fn timestamp(&self) -> f64 {
        self.timestamp
    }

    /// The duration in seconds.
    #[inline]
    pub fn duration(&self) -> f64 {
        self.duration
    }

    /// The presentation end timestamp in seconds.
    #[inline]
    pub fn end_timestamp(&self) -> f64 {
        self.timestamp + self.duration
    }

    /// The packet's sequence number. Negative when undefined.
    #[inline]
    pub fn sequence_number(&self) -> i64 {
        self.sequence_number
    }

    /// The size of the encoded data in the container. Valid even for metadata-only packets.
    #[inline]
    pub fn byte_length(&self) -> u64 {
        self.byte_length
    }

    /// Returns true if the packet carries no data but stands in for `byte_length` bytes.
    #[inline]
    pub fn is_metadata_only(&self) -> bool {
        self.data.is_empty() && self.byte_length > 0
    }

    /// Return a copy of this packet with a different timestamp and duration.
    pub fn with_timing(&self, timestamp: f64, duration: f64) -> Self {
        assert!(duration >= 0.0, "packet duration must be non-negative");

        EncodedPacket { timestamp, duration, ..self.clone() }
    }
}

#[cfg(test)]
mod tests {
    use super::{EncodedPacket, PacketType};

    #[test]
    fn verify_metadata_only() {
        let full = EncodedPacket::new(vec![1, 2, 3], PacketType::Key, 0.0, 0.02, 0);
        assert!(!full.is_metadata_only());
        assert_eq!(full.byte_length(), 3);

        let meta = EncodedPacket::new_metadata_only(PacketType::Key, 0.0, 0.02, 0, 3);
        assert!(meta.is_metadata_only());
        assert_eq!(meta.byte_length(), 3);
        assert!(meta.data().is_empty());
    }

    #[test]
    fn verify_end_timestamp() {
        let packet = EncodedPacket::new(vec![0u8; 4], PacketType::Delta, -0.0065, 0.02, 1);
        assert!(packet.timestamp() < 0.0);
        assert!(packet.end_timestamp() > 0.0);
    }
}
