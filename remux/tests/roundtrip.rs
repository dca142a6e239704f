// Remux
// Copyright (c) 2026 The Project Remux Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Cross-format round-trip: demuxed packets, remuxed into a codec-compatible container and
//! demuxed again, must match in type, timing, and data.

use std::sync::Arc;

use remux::core::demux::{Demuxer, PacketOptions};
use remux::core::io::{BufSource, Reader, SharedBufferTarget, Writer};
use remux::core::mux::{Muxer, OutputTrackOptions};
use remux::core::packet::{EncodedPacket, PacketType};
use remux::core::track::{AudioCodec, AudioTrackInfo, TrackInfo};

const PRE_SKIP: u16 = 312;
const PACKET_SAMPLES: u32 = 960;
const PACKET_COUNT: u32 = 25;

fn opus_track_options() -> OutputTrackOptions {
    let head = remux::common::xiph::opus::OpusIdHeader::new(2, PRE_SKIP, 48_000);
    OutputTrackOptions::new(TrackInfo::Audio(AudioTrackInfo {
        codec: AudioCodec::Opus,
        channel_count: 2,
        sample_rate: 48_000,
        decoder_config: Some(head.serialize().into()),
    }))
}

fn opus_packet(index: u32) -> EncodedPacket {
    let mut data = vec![0u8; 60 + (index as usize % 7)];
    data[0] = 31 << 3;
    for (i, byte) in data.iter_mut().enumerate().skip(1) {
        *byte = (index as u8).wrapping_mul(31).wrapping_add(i as u8);
    }

    let ts = (f64::from(index) * f64::from(PACKET_SAMPLES) - f64::from(PRE_SKIP)) / 48_000.0;
    EncodedPacket::new(data, PacketType::Key, ts, f64::from(PACKET_SAMPLES) / 48_000.0, -1)
}

async fn collect_packets(demuxer: Arc<dyn Demuxer>) -> Vec<EncodedPacket> {
    let tracks = demuxer.tracks().await.unwrap();
    let track = &tracks[0];

    let mut out = Vec::new();
    let mut packet = track.first_packet(PacketOptions::default()).await.unwrap();
    while let Some(current) = packet {
        packet = track.next_packet(&current, PacketOptions::default()).await.unwrap();
        out.push(current);
    }
    out
}

async fn mux_packets(format: &str, packets: &[EncodedPacket]) -> Vec<u8> {
    let (target, buffer) = SharedBufferTarget::new();
    let muxer = remux::muxer(format, Writer::new(Box::new(target))).unwrap();
    muxer.start().await.unwrap();

    let track = muxer.add_track(opus_track_options()).await.unwrap();
    for packet in packets {
        muxer.write_packet(track, packet).await.unwrap();
    }
    muxer.finalize().await.unwrap();
    buffer.contents()
}

fn assert_packets_match(a: &[EncodedPacket], b: &[EncodedPacket], time_epsilon: f64) {
    assert_eq!(a.len(), b.len());

    for (left, right) in a.iter().zip(b) {
        assert_eq!(left.kind(), right.kind());
        assert!((left.timestamp() - right.timestamp()).abs() < time_epsilon);
        assert!((left.duration() - right.duration()).abs() < time_epsilon);
        assert_eq!(left.byte_length(), right.byte_length());
        assert_eq!(left.data(), right.data());
    }
}

#[tokio::test]
async fn verify_ogg_to_mkv_round_trip() {
    let source_packets: Vec<EncodedPacket> = (0..PACKET_COUNT).map(opus_packet).collect();

    // Mux into Ogg and read the packets back.
    let ogg_bytes = mux_packets("ogg", &source_packets).await;
    let reader = Arc::new(Reader::new(Arc::new(BufSource::new(ogg_bytes))));
    let demuxer = remux::open(reader).await.unwrap();
    assert_eq!(demuxer.format_info().short_name, "ogg");
    let from_ogg = collect_packets(demuxer).await;

    assert_packets_match(&source_packets, &from_ogg, 1e-6);

    // Remux into Matroska and read them back again. Matroska's millisecond tick coarsens the
    // timing, but data and ordering are bit-exact.
    let mkv_bytes = mux_packets("mkv", &from_ogg).await;
    let reader = Arc::new(Reader::new(Arc::new(BufSource::new(mkv_bytes))));
    let demuxer = remux::open(reader).await.unwrap();
    assert_eq!(demuxer.format_info().short_name, "mkv");
    let from_mkv = collect_packets(demuxer).await;

    assert_packets_match(&from_ogg, &from_mkv, 2e-3);

    // Per-track packet sequences are monotone non-decreasing in end timestamp.
    for window in from_mkv.windows(2) {
        assert!(window[1].end_timestamp() + 1e-9 >= window[0].end_timestamp());
    }
}

#[tokio::test]
async fn verify_mp4_round_trip() {
    let source_packets: Vec<EncodedPacket> = (0..PACKET_COUNT).map(opus_packet).collect();

    let mp4_bytes = mux_packets("isomp4", &source_packets).await;
    let reader = Arc::new(Reader::new(Arc::new(BufSource::new(mp4_bytes))));
    let demuxer = remux::open(reader).await.unwrap();
    assert_eq!(demuxer.format_info().short_name, "isomp4");

    let from_mp4 = collect_packets(demuxer).await;

    // MP4 cannot represent the negative pre-skip timestamps; packets shift by the pre-skip but
    // data and durations survive exactly.
    assert_eq!(from_mp4.len(), source_packets.len());
    for (left, right) in source_packets.iter().zip(&from_mp4) {
        assert_eq!(left.data(), right.data());
        assert!((left.duration() - right.duration()).abs() < 1e-6);
    }
}
