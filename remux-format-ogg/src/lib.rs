// Remux
// Copyright (c) 2026 The Project Remux Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! An Ogg demuxer and muxer for Project Remux.

mod demuxer;
mod muxer;
mod page;

pub use demuxer::{registration, OggDemuxer};
pub use muxer::{registration as muxer_registration, OggMuxer};

use remux_core::demux::FormatInfo;

pub const OGG_FORMAT_INFO: FormatInfo = FormatInfo {
    short_name: "ogg",
    long_name: "Xiph Ogg",
    mime_type: "application/ogg",
};

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use remux_core::demux::{Demuxer, PacketOptions};
    use remux_core::io::{BufSource, Reader, SharedBufferTarget, Writer};
    use remux_core::mux::{Muxer, OutputTrackOptions};
    use remux_core::packet::{EncodedPacket, PacketType};
    use remux_core::track::{AudioCodec, AudioTrackInfo, TrackInfo};

    use crate::demuxer::OggDemuxer;
    use crate::muxer::OggMuxer;

    const PRE_SKIP: u16 = 312;
    /// 20 ms at 48 kHz.
    const PACKET_SAMPLES: u32 = 960;

    /// An Opus packet with a TOC selecting 20 ms CELT fullband, single frame.
    fn opus_packet(index: u32, len: usize) -> EncodedPacket {
        let mut data = vec![0u8; len];
        data[0] = (31 << 3) | 0; // config 31, one frame
        for (i, byte) in data.iter_mut().enumerate().skip(1) {
            *byte = (index as u8).wrapping_add(i as u8);
        }

        let ts = (index as f64 * f64::from(PACKET_SAMPLES) - f64::from(PRE_SKIP)) / 48_000.0;
        EncodedPacket::new(data, PacketType::Key, ts, f64::from(PACKET_SAMPLES) / 48_000.0, -1)
    }

    fn opus_track_options() -> OutputTrackOptions {
        let head = remux_common::xiph::opus::OpusIdHeader::new(2, PRE_SKIP, 48_000);
        OutputTrackOptions::new(TrackInfo::Audio(AudioTrackInfo {
            codec: AudioCodec::Opus,
            channel_count: 2,
            sample_rate: 48_000,
            decoder_config: Some(head.serialize().into()),
        }))
    }

    #[tokio::test]
    async fn verify_opus_write_then_read_round_trip() {
        let (target, buffer) = SharedBufferTarget::new();
        let muxer = OggMuxer::new(Writer::new(Box::new(target)));
        muxer.start().await.unwrap();

        let track = muxer.add_track(opus_track_options()).await.unwrap();
        for i in 0..20 {
            muxer.write_packet(track, &opus_packet(i, 120)).await.unwrap();
        }
        muxer.finalize().await.unwrap();

        let bytes = buffer.contents();
        let reader = Arc::new(Reader::new(Arc::new(BufSource::new(bytes))));
        assert!(OggDemuxer::can_read(&reader).await.unwrap());

        let demuxer = OggDemuxer::open(reader).await.unwrap();
        let tracks = demuxer.clone().tracks().await.unwrap();
        assert_eq!(tracks.len(), 1);
        let track = &tracks[0];

        // The first packet starts at the negative pre-skip offset.
        let first = track.first_packet(PacketOptions::default()).await.unwrap().unwrap();
        assert!((first.timestamp() - (-f64::from(PRE_SKIP) / 48_000.0)).abs() < 1e-9);
        assert_eq!(first.data().len(), 120);

        // Walking forward yields contiguous timing.
        let second = track.next_packet(&first, PacketOptions::default()).await.unwrap().unwrap();
        assert!((second.timestamp() - first.end_timestamp()).abs() < 1e-9);

        // Seek into the middle of the stream.
        let packet = track.packet_at(0.15, PacketOptions::default()).await.unwrap().unwrap();
        assert!(packet.timestamp() <= 0.15 && 0.15 < packet.end_timestamp() + 1e-9);

        // Total duration excludes the pre-skip samples.
        let duration = demuxer.compute_duration().await.unwrap();
        let expected = (20.0 * f64::from(PACKET_SAMPLES) - f64::from(PRE_SKIP)) / 48_000.0;
        assert!((duration - expected).abs() < 1e-6);
    }

    #[tokio::test]
    async fn verify_large_packet_spans_pages() {
        let (target, buffer) = SharedBufferTarget::new();
        let muxer = OggMuxer::new(Writer::new(Box::new(target)));
        muxer.start().await.unwrap();

        let track = muxer.add_track(opus_track_options()).await.unwrap();

        // A packet larger than one page's 255-segment capacity (65 KiB).
        muxer.write_packet(track, &opus_packet(0, 66_000)).await.unwrap();
        muxer.write_packet(track, &opus_packet(1, 120)).await.unwrap();
        muxer.finalize().await.unwrap();

        let reader = Arc::new(Reader::new(Arc::new(BufSource::new(buffer.contents()))));
        let demuxer = OggDemuxer::open(reader).await.unwrap();
        let tracks = demuxer.tracks().await.unwrap();

        let first = tracks[0].first_packet(PacketOptions::default()).await.unwrap().unwrap();
        assert_eq!(first.data().len(), 66_000);

        let second =
            tracks[0].next_packet(&first, PacketOptions::default()).await.unwrap().unwrap();
        assert_eq!(second.data().len(), 120);
    }
}
