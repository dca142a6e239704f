// Remux
// Copyright (c) 2026 The Project Remux Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! An ISO Base Media File Format (MP4/MOV) demuxer and muxer for Project Remux.

mod atoms;
mod demuxer;
mod muxer;
mod stsd;

pub use demuxer::{registration, Mp4Demuxer};
pub use muxer::{registration as muxer_registration, Mp4Muxer, Mp4MuxerOptions};

use remux_core::demux::FormatInfo;

pub const ISOMP4_FORMAT_INFO: FormatInfo = FormatInfo {
    short_name: "isomp4",
    long_name: "ISO Base Media File Format",
    mime_type: "video/mp4",
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

    use crate::atoms::{write_box, write_full_box};
    use crate::demuxer::Mp4Demuxer;
    use crate::muxer::{Mp4Muxer, Mp4MuxerOptions};

    // A baseline AVC SPS/PPS pair for synthetic packets.
    const TEST_SPS: [u8; 9] = [0x67, 0x42, 0xc0, 0x1e, 0x8c, 0x68, 0x42, 0x01, 0x09];
    const TEST_PPS: [u8; 4] = [0x68, 0xce, 0x3c, 0x80];

    fn avc_packet(index: u32, fps: f64, key: bool) -> EncodedPacket {
        // Annex-B framing; the muxer must convert to length prefixes.
        let mut data = Vec::new();
        if key {
            data.extend_from_slice(&[0, 0, 0, 1]);
            data.extend_from_slice(&TEST_SPS);
            data.extend_from_slice(&[0, 0, 0, 1]);
            data.extend_from_slice(&TEST_PPS);
        }
        data.extend_from_slice(&[0, 0, 0, 1]);
        data.push(if key { 0x65 } else { 0x41 });
        data.extend_from_slice(&[index as u8; 24]);

        let kind = if key { PacketType::Key } else { PacketType::Delta };
        EncodedPacket::new(data, kind, f64::from(index) / fps, 1.0 / fps, -1)
    }

    fn video_track_options() -> OutputTrackOptions {
        let mut options = OutputTrackOptions::new(TrackInfo::Video(VideoTrackInfo {
            codec: VideoCodec::Avc,
            coded_width: 320,
            coded_height: 240,
            rotation: Default::default(),
            color: None,
            decoder_config: None,
        }));
        options.frame_rate = Some(30.0);
        options
    }

    /// Scenario: a progressive MP4 with a 30 fps AVC track, key frames every 30 frames.
    #[tokio::test]
    async fn verify_progressive_avc_seek() {
        let (target, buffer) = SharedBufferTarget::new();
        let muxer = Mp4Muxer::new(Writer::new(Box::new(target)), Mp4MuxerOptions::default());
        muxer.start().await.unwrap();

        let track = muxer.add_track(video_track_options()).await.unwrap();
        for i in 0..300u32 {
            muxer.write_packet(track, &avc_packet(i, 30.0, i % 30 == 0)).await.unwrap();
        }
        muxer.finalize().await.unwrap();

        let bytes = buffer.contents();
        let reader = Arc::new(Reader::new(Arc::new(BufSource::new(bytes))));
        assert!(Mp4Demuxer::can_read(&reader).await.unwrap());

        let demuxer = Mp4Demuxer::open(reader).await.unwrap();
        let tracks = demuxer.clone().tracks().await.unwrap();
        assert_eq!(tracks.len(), 1);
        let track = &tracks[0];

        // The AVC decoder configuration was built from the bitstream.
        let config = track.decoder_config().await.unwrap().unwrap();
        let record =
            remux_common::mpeg::video::avc::AvcDecoderConfigurationRecord::parse(&config)
                .unwrap();
        assert_eq!(record.length_size_minus_one, 3);
        assert_eq!(
            track.codec_parameter_string().await.unwrap().as_deref(),
            Some("avc1.42c01e")
        );

        // Key packet at t = 5.0 is the frame at exactly 5.0 seconds.
        let key = track.key_packet_at(5.0, PacketOptions::default()).await.unwrap().unwrap();
        assert!(key.is_key());
        assert!((key.timestamp() - 5.0).abs() < 1e-6);

        // The packet containing 5.033 starts at 5.0; its successor starts at 5.0333...
        let packet = track.packet_at(5.033, PacketOptions::default()).await.unwrap().unwrap();
        assert!((packet.timestamp() - 5.0).abs() < 1e-6);
        let next = track.next_packet(&packet, PacketOptions::default()).await.unwrap().unwrap();
        assert!((next.timestamp() - 151.0 / 30.0).abs() < 1e-6);

        // Sample data is stored length-prefixed.
        assert_eq!(&packet.data()[..2], &[0x00, 0x00]);

        let duration = demuxer.compute_duration().await.unwrap();
        assert!((duration - 10.0).abs() < 0.01);
    }

    /// Scenario: three 2-second fragments without `tfdt`; the start timestamps come from the
    /// sequential fragment walk summing preceding durations.
    #[tokio::test]
    async fn verify_fragmented_without_tfdt() {
        let bytes = build_no_tfdt_file();
        let reader = Arc::new(Reader::new(Arc::new(BufSource::new(bytes))));

        let demuxer = Mp4Demuxer::open(reader).await.unwrap();
        let tracks = demuxer.clone().tracks().await.unwrap();
        let track = &tracks[0];

        // get_packet(5.0) triggers the walk through all three fragments.
        let packet = track.packet_at(5.0, PacketOptions::default()).await.unwrap().unwrap();
        assert!((packet.timestamp() - 5.0).abs() < 1e-6);
        assert_eq!(packet.data().len(), 8);

        let duration = demuxer.compute_duration().await.unwrap();
        assert!((duration - 6.0).abs() < 1e-6);
    }

    /// Round trip through the fragmented muxer.
    #[tokio::test]
    async fn verify_fragmented_round_trip() {
        let (target, buffer) = SharedBufferTarget::new();
        let muxer = Mp4Muxer::new(
            Writer::new(Box::new(target)),
            Mp4MuxerOptions { fragmented: true },
        );
        muxer.start().await.unwrap();

        let options = OutputTrackOptions::new(TrackInfo::Audio(AudioTrackInfo {
            codec: AudioCodec::Aac,
            channel_count: 2,
            sample_rate: 48_000,
            decoder_config: Some(vec![0x11, 0x90].into()),
        }));
        let track = muxer.add_track(options).await.unwrap();

        // 1024-sample AAC frames.
        let dur = 1024.0 / 48_000.0;
        for i in 0..200u32 {
            let packet = EncodedPacket::new(
                vec![i as u8; 64],
                PacketType::Key,
                f64::from(i) * dur,
                dur,
                -1,
            );
            muxer.write_packet(track, &packet).await.unwrap();
        }
        muxer.finalize().await.unwrap();

        let reader = Arc::new(Reader::new(Arc::new(BufSource::new(buffer.contents()))));
        let demuxer = Mp4Demuxer::open(reader).await.unwrap();
        let tracks = demuxer.clone().tracks().await.unwrap();
        let track = &tracks[0];

        let first = track.first_packet(PacketOptions::default()).await.unwrap().unwrap();
        assert_eq!(first.timestamp(), 0.0);
        assert_eq!(first.data(), &vec![0u8; 64][..]);

        let mid = track.packet_at(2.0, PacketOptions::default()).await.unwrap().unwrap();
        assert!(mid.timestamp() <= 2.0 && 2.0 < mid.end_timestamp() + 1e-9);

        let next = track.next_packet(&mid, PacketOptions::default()).await.unwrap().unwrap();
        assert!((next.timestamp() - mid.end_timestamp()).abs() < 1e-6);

        let duration = demuxer.compute_duration().await.unwrap();
        assert!((duration - 200.0 * dur).abs() < 1e-3);
    }

    /// Assemble a fragmented file by hand: `ftyp` + `moov` (with `mvex` defaults) + three
    /// `moof`+`mdat` fragments of two 1-second samples each, with no `tfdt` anywhere.
    fn build_no_tfdt_file() -> Vec<u8> {
        let mut out = Vec::new();

        let mut ftyp = Vec::new();
        ftyp.extend_from_slice(b"isom");
        ftyp.extend_from_slice(&0x200u32.to_be_bytes());
        ftyp.extend_from_slice(b"isom");
        write_box(&mut out, b"ftyp", &ftyp);

        // moov.
        let mut mvhd = Vec::new();
        mvhd.extend_from_slice(&[0u8; 8]);
        mvhd.extend_from_slice(&1000u32.to_be_bytes()); // timescale
        mvhd.extend_from_slice(&0u32.to_be_bytes()); // duration
        mvhd.extend_from_slice(&0x0001_0000u32.to_be_bytes());
        mvhd.extend_from_slice(&0x0100u16.to_be_bytes());
        mvhd.extend_from_slice(&[0u8; 10]);
        for value in [0x0001_0000u32, 0, 0, 0, 0x0001_0000, 0, 0, 0, 0x4000_0000] {
            mvhd.extend_from_slice(&value.to_be_bytes());
        }
        mvhd.extend_from_slice(&[0u8; 24]);
        mvhd.extend_from_slice(&2u32.to_be_bytes());

        let mut moov = Vec::new();
        write_full_box(&mut moov, b"mvhd", 0, 0, &mvhd);

        // trak with an empty sample table.
        let mut tkhd = Vec::new();
        tkhd.extend_from_slice(&[0u8; 8]);
        tkhd.extend_from_slice(&1u32.to_be_bytes()); // track id
        tkhd.extend_from_slice(&[0u8; 8]);
        tkhd.extend_from_slice(&[0u8; 8]);
        tkhd.extend_from_slice(&0x0100u16.to_be_bytes());
        tkhd.extend_from_slice(&0u16.to_be_bytes());
        for value in [0x0001_0000u32, 0, 0, 0, 0x0001_0000, 0, 0, 0, 0x4000_0000] {
            tkhd.extend_from_slice(&value.to_be_bytes());
        }
        tkhd.extend_from_slice(&[0u8; 8]);

        let mut mdhd = Vec::new();
        mdhd.extend_from_slice(&[0u8; 8]);
        mdhd.extend_from_slice(&1000u32.to_be_bytes()); // timescale
        mdhd.extend_from_slice(&0u32.to_be_bytes());
        mdhd.extend_from_slice(&0x55c4u16.to_be_bytes());
        mdhd.extend_from_slice(&0u16.to_be_bytes());

        let mut hdlr = Vec::new();
        hdlr.extend_from_slice(&[0u8; 4]);
        hdlr.extend_from_slice(b"soun");
        hdlr.extend_from_slice(&[0u8; 12]);
        hdlr.extend_from_slice(b"Sound\0");

        let info = TrackInfo::Audio(AudioTrackInfo {
            codec: AudioCodec::Aac,
            channel_count: 2,
            sample_rate: 48_000,
            decoder_config: Some(vec![0x11, 0x90].into()),
        });
        let entry = crate::stsd::build_sample_entry(&info).unwrap();

        let mut stsd = Vec::new();
        stsd.extend_from_slice(&1u32.to_be_bytes());
        stsd.extend_from_slice(&entry);

        let mut stbl = Vec::new();
        write_full_box(&mut stbl, b"stsd", 0, 0, &stsd);
        write_full_box(&mut stbl, b"stts", 0, 0, &0u32.to_be_bytes());
        write_full_box(&mut stbl, b"stsc", 0, 0, &0u32.to_be_bytes());
        let mut stsz = Vec::new();
        stsz.extend_from_slice(&0u32.to_be_bytes());
        stsz.extend_from_slice(&0u32.to_be_bytes());
        write_full_box(&mut stbl, b"stsz", 0, 0, &stsz);
        write_full_box(&mut stbl, b"stco", 0, 0, &0u32.to_be_bytes());

        let mut minf = Vec::new();
        write_full_box(&mut minf, b"smhd", 0, 0, &[0u8; 4]);
        let mut dref = Vec::new();
        dref.extend_from_slice(&1u32.to_be_bytes());
        write_full_box(&mut dref, b"url ", 0, 1, &[]);
        let mut dinf = Vec::new();
        write_full_box(&mut dinf, b"dref", 0, 0, &dref);
        write_box(&mut minf, b"dinf", &dinf);
        write_box(&mut minf, b"stbl", &stbl);

        let mut mdia = Vec::new();
        write_full_box(&mut mdia, b"mdhd", 0, 0, &mdhd);
        write_full_box(&mut mdia, b"hdlr", 0, 0, &hdlr);
        write_box(&mut mdia, b"minf", &minf);

        let mut trak = Vec::new();
        write_full_box(&mut trak, b"tkhd", 0, 3, &tkhd);
        write_box(&mut trak, b"mdia", &mdia);
        write_box(&mut moov, b"trak", &trak);

        // mvex/trex: 1-second default sample duration, 8-byte default size, sync defaults.
        let mut trex = Vec::new();
        trex.extend_from_slice(&1u32.to_be_bytes());
        trex.extend_from_slice(&1u32.to_be_bytes());
        trex.extend_from_slice(&1000u32.to_be_bytes());
        trex.extend_from_slice(&8u32.to_be_bytes());
        trex.extend_from_slice(&0u32.to_be_bytes());
        let mut mvex = Vec::new();
        write_full_box(&mut mvex, b"trex", 0, 0, &trex);
        write_box(&mut moov, b"mvex", &mvex);

        write_box(&mut out, b"moov", &moov);

        // Three fragments of two samples each; no tfdt.
        for frag in 0..3u32 {
            let mut traf = Vec::new();

            let mut tfhd = Vec::new();
            tfhd.extend_from_slice(&1u32.to_be_bytes());
            write_full_box(&mut traf, b"tfhd", 0, 0x20000, &tfhd);

            // trun with only a data offset; durations, sizes, and flags come from trex.
            let mut trun = Vec::new();
            trun.extend_from_slice(&2u32.to_be_bytes());
            // The moof below is a fixed size; the data offset points just past its mdat header.
            let mut probe = Vec::new();
            write_box(&mut probe, b"traf", &{
                let mut t = traf.clone();
                let mut tr = trun.clone();
                tr.extend_from_slice(&0i32.to_be_bytes());
                write_full_box(&mut t, b"trun", 0, 0x1, &tr);
                t
            });
            let moof_len = 8 + 16 + probe.len(); // moof header + mfhd + traf

            trun.extend_from_slice(&((moof_len + 8) as i32).to_be_bytes());
            write_full_box(&mut traf, b"trun", 0, 0x1, &trun);

            let mut moof = Vec::new();
            let mut mfhd = Vec::new();
            mfhd.extend_from_slice(&(frag + 1).to_be_bytes());
            write_full_box(&mut moof, b"mfhd", 0, 0, &mfhd);
            write_box(&mut moof, b"traf", &traf);

            let mut moof_box = Vec::new();
            write_box(&mut moof_box, b"moof", &moof);
            assert_eq!(moof_box.len(), moof_len);
            out.extend_from_slice(&moof_box);

            let mut data = Vec::new();
            data.extend_from_slice(&[frag as u8 * 2; 8]);
            data.extend_from_slice(&[frag as u8 * 2 + 1; 8]);
            write_box(&mut out, b"mdat", &data);
        }

        out
    }
}
