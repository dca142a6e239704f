// Remux
// Copyright (c) 2026 The Project Remux Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! A Matroska/WebM demuxer and muxer for Project Remux.

mod codecs;
mod demuxer;
mod ebml;
mod element_ids;
mod lacing;
mod muxer;

pub use demuxer::{registration, MkvDemuxer};
pub use muxer::{registration as muxer_registration, MkvMuxer};

use remux_core::demux::FormatInfo;

pub const MKV_FORMAT_INFO: FormatInfo = FormatInfo {
    short_name: "mkv",
    long_name: "Matroska / WebM",
    mime_type: "video/x-matroska",
};

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use remux_core::demux::{Demuxer, PacketOptions};
    use remux_core::io::{BufSource, Reader, SharedBufferTarget, Writer};
    use remux_core::mux::{Muxer, OutputTrackOptions};
    use remux_core::packet::{EncodedPacket, PacketType};
    use remux_core::track::{
        AudioCodec, AudioTrackInfo, TrackInfo, VideoCodec, VideoTrackInfo,
    };

    use crate::demuxer::MkvDemuxer;
    use crate::muxer::MkvMuxer;

    fn video_options() -> OutputTrackOptions {
        let mut options = OutputTrackOptions::new(TrackInfo::Video(VideoTrackInfo {
            codec: VideoCodec::Vp9,
            coded_width: 640,
            coded_height: 360,
            rotation: Default::default(),
            color: None,
            decoder_config: None,
        }));
        options.frame_rate = Some(25.0);
        options.language = Some("eng".to_string());
        options
    }

    fn audio_options() -> OutputTrackOptions {
        OutputTrackOptions::new(TrackInfo::Audio(AudioTrackInfo {
            codec: AudioCodec::Opus,
            channel_count: 2,
            sample_rate: 48_000,
            decoder_config: Some(
                remux_common::xiph::opus::OpusIdHeader::new(2, 312, 48_000).serialize().into(),
            ),
        }))
    }

    fn video_packet(index: u32, key: bool) -> EncodedPacket {
        let kind = if key { PacketType::Key } else { PacketType::Delta };
        EncodedPacket::new(
            vec![0x30 | index as u8; 64],
            kind,
            f64::from(index) * 0.04,
            0.04,
            -1,
        )
    }

    fn audio_packet(index: u32) -> EncodedPacket {
        EncodedPacket::new(
            vec![0x60 | index as u8; 32],
            PacketType::Key,
            f64::from(index) * 0.02,
            0.02,
            -1,
        )
    }

    async fn mux_sample_file() -> Vec<u8> {
        let (target, buffer) = SharedBufferTarget::new();
        let muxer = MkvMuxer::new(Writer::new(Box::new(target)));
        muxer.start().await.unwrap();

        let video = muxer.add_track(video_options()).await.unwrap();
        let audio = muxer.add_track(audio_options()).await.unwrap();

        for i in 0..50u32 {
            // Key frames every 25 video frames.
            muxer.write_packet(video, &video_packet(i, i % 25 == 0)).await.unwrap();
            muxer.write_packet(audio, &audio_packet(2 * i)).await.unwrap();
            muxer.write_packet(audio, &audio_packet(2 * i + 1)).await.unwrap();
        }
        muxer.finalize().await.unwrap();

        buffer.contents()
    }

    #[tokio::test]
    async fn verify_write_then_read_round_trip() {
        let bytes = mux_sample_file().await;

        let reader = Arc::new(Reader::new(Arc::new(BufSource::new(bytes))));
        assert!(MkvDemuxer::can_read(&reader).await.unwrap());

        let demuxer = MkvDemuxer::open(reader).await.unwrap();
        let tracks = demuxer.clone().tracks().await.unwrap();
        assert_eq!(tracks.len(), 2);

        let video = tracks.iter().find(|t| matches!(t.info, TrackInfo::Video(_))).unwrap();
        assert_eq!(video.language, "eng");
        match &video.info {
            TrackInfo::Video(info) => {
                assert_eq!(info.codec, VideoCodec::Vp9);
                assert_eq!((info.coded_width, info.coded_height), (640, 360));
            }
            _ => panic!("expected video info"),
        }

        // First packet and sequential walk.
        let first = video.first_packet(PacketOptions::default()).await.unwrap().unwrap();
        assert_eq!(first.timestamp(), 0.0);
        assert!(first.is_key());

        let second = video.next_packet(&first, PacketOptions::default()).await.unwrap().unwrap();
        assert!((second.timestamp() - 0.04).abs() < 2e-3);
        assert!(!second.is_key());

        // Seek by time.
        let packet = video.packet_at(1.0, PacketOptions::default()).await.unwrap().unwrap();
        assert!(packet.timestamp() <= 1.0 && 1.0 < packet.end_timestamp() + 2e-3);

        // Key packet lookup: t = 1.5 s lies in the second half, whose key frame is at 1.0 s.
        let key = video.key_packet_at(1.5, PacketOptions::default()).await.unwrap().unwrap();
        assert!(key.is_key());
        assert!((key.timestamp() - 1.0).abs() < 2e-3);
        assert!(key.timestamp() <= packet.timestamp() + 2e-3 || packet.timestamp() < 1.0);

        // Duration from the segment info.
        let duration = demuxer.compute_duration().await.unwrap();
        assert!((duration - 2.0).abs() < 0.01);

        // The audio track walks independently.
        let audio = tracks.iter().find(|t| matches!(t.info, TrackInfo::Audio(_))).unwrap();
        let a0 = audio.first_packet(PacketOptions::default()).await.unwrap().unwrap();
        assert_eq!(a0.data().len(), 32);
        let a1 = audio.next_packet(&a0, PacketOptions::default()).await.unwrap().unwrap();
        assert!((a1.timestamp() - 0.02).abs() < 2e-3);
    }

    #[tokio::test]
    async fn verify_metadata_only_packets() {
        let bytes = mux_sample_file().await;
        let reader = Arc::new(Reader::new(Arc::new(BufSource::new(bytes))));
        let demuxer = MkvDemuxer::open(reader).await.unwrap();
        let tracks = demuxer.tracks().await.unwrap();

        let video = tracks.iter().find(|t| matches!(t.info, TrackInfo::Video(_))).unwrap();
        let meta = video.first_packet(PacketOptions::METADATA_ONLY).await.unwrap().unwrap();

        assert!(meta.is_metadata_only());
        assert_eq!(meta.byte_length(), 64);
        assert!(meta.data().is_empty());
    }
}
