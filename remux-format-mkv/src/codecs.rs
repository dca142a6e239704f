// Remux
// Copyright (c) 2026 The Project Remux Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Matroska codec-id string translation.

use remux_core::track::{AudioCodec, Codec, SubtitleCodec, VideoCodec};

/// Map a Matroska `CodecID` to a codec, using the sample bit depth for PCM variants.
pub fn codec_from_id(id: &str, bit_depth: Option<u64>) -> Option<Codec> {
    let codec = match id {
        "V_MPEG4/ISO/AVC" => Codec::Video(VideoCodec::Avc),
        "V_MPEGH/ISO/HEVC" => Codec::Video(VideoCodec::Hevc),
        "V_VP8" => Codec::Video(VideoCodec::Vp8),
        "V_VP9" => Codec::Video(VideoCodec::Vp9),
        "V_AV1" => Codec::Video(VideoCodec::Av1),
        "V_MPEG4/ISO/ASP" | "V_MPEG4/ISO/SP" => Codec::Video(VideoCodec::Mpeg4),

        "A_MPEG/L3" => Codec::Audio(AudioCodec::Mp3),
        "A_OPUS" => Codec::Audio(AudioCodec::Opus),
        "A_VORBIS" => Codec::Audio(AudioCodec::Vorbis),
        "A_FLAC" => Codec::Audio(AudioCodec::Flac),
        "A_AC3" => Codec::Audio(AudioCodec::Ac3),
        "A_ALAW" => Codec::Audio(AudioCodec::Alaw),
        "A_MULAW" => Codec::Audio(AudioCodec::Ulaw),

        "A_PCM/INT/LIT" => Codec::Audio(match bit_depth {
            Some(8) => AudioCodec::PcmU8,
            Some(24) => AudioCodec::PcmS24,
            Some(32) => AudioCodec::PcmS32,
            _ => AudioCodec::PcmS16,
        }),
        "A_PCM/INT/BIG" => Codec::Audio(match bit_depth {
            Some(24) => AudioCodec::PcmS24Be,
            Some(32) => AudioCodec::PcmS32Be,
            _ => AudioCodec::PcmS16Be,
        }),
        "A_PCM/FLOAT/IEEE" => Codec::Audio(match bit_depth {
            Some(64) => AudioCodec::PcmF64,
            _ => AudioCodec::PcmF32,
        }),

        "S_TEXT/WEBVTT" => Codec::Subtitle(SubtitleCodec::WebVtt),

        _ if id.starts_with("A_AAC") => Codec::Audio(AudioCodec::Aac),
        _ => return None,
    };

    Some(codec)
}

/// Map a codec to its Matroska `CodecID`.
pub fn codec_id_of(codec: Codec) -> Option<&'static str> {
    Some(match codec {
        Codec::Video(VideoCodec::Avc) => "V_MPEG4/ISO/AVC",
        Codec::Video(VideoCodec::Hevc) => "V_MPEGH/ISO/HEVC",
        Codec::Video(VideoCodec::Vp8) => "V_VP8",
        Codec::Video(VideoCodec::Vp9) => "V_VP9",
        Codec::Video(VideoCodec::Av1) => "V_AV1",
        Codec::Video(VideoCodec::Mpeg4) => "V_MPEG4/ISO/ASP",

        Codec::Audio(AudioCodec::Aac) => "A_AAC",
        Codec::Audio(AudioCodec::Mp3) => "A_MPEG/L3",
        Codec::Audio(AudioCodec::Opus) => "A_OPUS",
        Codec::Audio(AudioCodec::Vorbis) => "A_VORBIS",
        Codec::Audio(AudioCodec::Flac) => "A_FLAC",
        Codec::Audio(AudioCodec::Ac3) => "A_AC3",
        Codec::Audio(AudioCodec::Alaw) => "A_ALAW",
        Codec::Audio(AudioCodec::Ulaw) => "A_MULAW",
        Codec::Audio(AudioCodec::PcmU8)
        | Codec::Audio(AudioCodec::PcmS16)
        | Codec::Audio(AudioCodec::PcmS24)
        | Codec::Audio(AudioCodec::PcmS32) => "A_PCM/INT/LIT",
        Codec::Audio(AudioCodec::PcmS16Be)
        | Codec::Audio(AudioCodec::PcmS24Be)
        | Codec::Audio(AudioCodec::PcmS32Be) => "A_PCM/INT/BIG",
        Codec::Audio(AudioCodec::PcmF32) | Codec::Audio(AudioCodec::PcmF64) => "A_PCM/FLOAT/IEEE",

        Codec::Subtitle(SubtitleCodec::WebVtt) => "S_TEXT/WEBVTT",
    })
}

#[cfg(test)]
mod tests {
    use remux_core::track::{AudioCodec, Codec, VideoCodec};

    use super::{codec_from_id, codec_id_of};

    #[test]
    fn verify_codec_id_round_trip() {
        assert_eq!(codec_from_id("V_VP9", None), Some(Codec::Video(VideoCodec::Vp9)));
        assert_eq!(
            codec_from_id("A_PCM/INT/LIT", Some(24)),
            Some(Codec::Audio(AudioCodec::PcmS24))
        );
        assert_eq!(codec_from_id("A_AAC/MPEG4/LC", None), Some(Codec::Audio(AudioCodec::Aac)));
        assert_eq!(codec_from_id("V_UNKNOWN", None), None);

        assert_eq!(codec_id_of(Codec::Video(VideoCodec::Avc)), Some("V_MPEG4/ISO/AVC"));
        assert_eq!(codec_id_of(Codec::Audio(AudioCodec::Opus)), Some("A_OPUS"));
    }
}
