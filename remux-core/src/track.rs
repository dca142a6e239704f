// Remux
// Copyright (c) 2026 The Project Remux Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The `track` module defines track types and per-track codec metadata.

use std::fmt;

/// The track type.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum TrackType {
    /// An audio track.
    Audio,
    /// A video track.
    Video,
    /// A subtitle track.
    Subtitle,
}

/// Video codec identifiers.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum VideoCodec {
    Avc,
    Hevc,
    Vp8,
    Vp9,
    Av1,
    Mpeg4,
}

impl VideoCodec {
    /// The codec tag string.
    pub fn tag(&self) -> &'static str {
        match self {
            VideoCodec::Avc => "avc",
            VideoCodec::Hevc => "hevc",
            VideoCodec::Vp8 => "vp8",
            VideoCodec::Vp9 => "vp9",
            VideoCodec::Av1 => "av1",
            VideoCodec::Mpeg4 => "mpeg4",
        }
    }
}

/// Audio codec identifiers.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum AudioCodec {
    Aac,
    Mp3,
    Opus,
    Vorbis,
    Flac,
    Ac3,
    Alaw,
    Ulaw,
    PcmU8,
    PcmS16,
    PcmS16Be,
    PcmS24,
    PcmS24Be,
    PcmS32,
    PcmS32Be,
    PcmF32,
    PcmF64,
}

impl AudioCodec {
    /// The codec tag string.
    pub fn tag(&self) -> &'static str {
        match self {
            AudioCodec::Aac => "aac",
            AudioCodec::Mp3 => "mp3",
            AudioCodec::Opus => "opus",
            AudioCodec::Vorbis => "vorbis",
            AudioCodec::Flac => "flac",
            AudioCodec::Ac3 => "ac3",
            AudioCodec::Alaw => "alaw",
            AudioCodec::Ulaw => "ulaw",
            AudioCodec::PcmU8 => "pcm-u8",
            AudioCodec::PcmS16 => "pcm-s16",
            AudioCodec::PcmS16Be => "pcm-s16be",
            AudioCodec::PcmS24 => "pcm-s24",
            AudioCodec::PcmS24Be => "pcm-s24be",
            AudioCodec::PcmS32 => "pcm-s32",
            AudioCodec::PcmS32Be => "pcm-s32be",
            AudioCodec::PcmF32 => "pcm-f32",
            AudioCodec::PcmF64 => "pcm-f64",
        }
    }

    /// Returns true if the codec is an uncompressed PCM variant.
    pub fn is_pcm(&self) -> bool {
        matches!(
            self,
            AudioCodec::PcmU8
                | AudioCodec::PcmS16
                | AudioCodec::PcmS16Be
                | AudioCodec::PcmS24
                | AudioCodec::PcmS24Be
                | AudioCodec::PcmS32
                | AudioCodec::PcmS32Be
                | AudioCodec::PcmF32
                | AudioCodec::PcmF64
        )
    }

    /// The number of bytes per single-channel sample for PCM variants.
    pub fn pcm_sample_size(&self) -> Option<u32> {
        match self {
            AudioCodec::PcmU8 | AudioCodec::Alaw | AudioCodec::Ulaw => Some(1),
            AudioCodec::PcmS16 | AudioCodec::PcmS16Be => Some(2),
            AudioCodec::PcmS24 | AudioCodec::PcmS24Be => Some(3),
            AudioCodec::PcmS32 | AudioCodec::PcmS32Be => Some(4),
            AudioCodec::PcmF32 => Some(4),
            AudioCodec::PcmF64 => Some(8),
            _ => None,
        }
    }
}

/// Subtitle codec identifiers.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum SubtitleCodec {
    WebVtt,
}

impl SubtitleCodec {
    /// The codec tag string.
    pub fn tag(&self) -> &'static str {
        match self {
            SubtitleCodec::WebVtt => "webvtt",
        }
    }
}

/// A codec identifier for any track type.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum Codec {
    Video(VideoCodec),
    Audio(AudioCodec),
    Subtitle(SubtitleCodec),
}

impl Codec {
    /// The codec tag string.
    pub fn tag(&self) -> &'static str {
        match self {
            Codec::Video(codec) => codec.tag(),
            Codec::Audio(codec) => codec.tag(),
            Codec::Subtitle(codec) => codec.tag(),
        }
    }

    /// The track type this codec belongs to.
    pub fn track_type(&self) -> TrackType {
        match self {
            Codec::Video(_) => TrackType::Video,
            Codec::Audio(_) => TrackType::Audio,
            Codec::Subtitle(_) => TrackType::Subtitle,
        }
    }
}

impl fmt::Display for Codec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

/// Clockwise display rotation of a video track.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub enum Rotation {
    #[default]
    None,
    Clockwise90,
    Clockwise180,
    Clockwise270,
}

impl Rotation {
    /// Create a rotation from clockwise degrees. The amount must be a multiple of 90; any other
    /// value returns `None`.
    pub fn from_degrees(degrees: i32) -> Option<Rotation> {
        match degrees.rem_euclid(360) {
            0 => Some(Rotation::None),
            90 => Some(Rotation::Clockwise90),
            180 => Some(Rotation::Clockwise180),
            270 => Some(Rotation::Clockwise270),
            _ => None,
        }
    }

    /// The rotation in clockwise degrees.
    pub fn degrees(&self) -> u32 {
        match self {
            Rotation::None => 0,
            Rotation::Clockwise90 => 90,
            Rotation::Clockwise180 => 180,
            Rotation::Clockwise270 => 270,
        }
    }

    /// The rotation as a 2x2 transformation in 16.16 fixed point, row-major `[a, b, c, d]`,
    /// matching the upper-left of an ISOBMFF `tkhd` matrix.
    pub fn fixed_point_matrix(&self) -> [i32; 4] {
        const ONE: i32 = 0x0001_0000;
        match self {
            Rotation::None => [ONE, 0, 0, ONE],
            Rotation::Clockwise90 => [0, ONE, -ONE, 0],
            Rotation::Clockwise180 => [-ONE, 0, 0, -ONE],
            Rotation::Clockwise270 => [0, -ONE, ONE, 0],
        }
    }

    /// Recover a rotation from the upper-left 2x2 of a `tkhd` matrix. Matrices that are not pure
    /// multiples of 90 degree rotations return `None`.
    pub fn from_fixed_point_matrix(m: &[i32; 4]) -> Option<Rotation> {
        const ONE: i32 = 0x0001_0000;
        const NEG_ONE: i32 = -ONE;
        match *m {
            [ONE, 0, 0, ONE] => Some(Rotation::None),
            [0, ONE, NEG_ONE, 0] => Some(Rotation::Clockwise90),
            [NEG_ONE, 0, 0, NEG_ONE] => Some(Rotation::Clockwise180),
            [0, NEG_ONE, ONE, 0] => Some(Rotation::Clockwise270),
            _ => None,
        }
    }
}

/// Colour primaries, as defined by ISO/IEC 23091-2.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ColorPrimaries {
    Bt709,
    Bt470bg,
    Smpte170m,
    Bt2020,
    Smpte432,
}

impl ColorPrimaries {
    pub fn from_code(code: u8) -> Option<ColorPrimaries> {
        match code {
            1 => Some(ColorPrimaries::Bt709),
            5 => Some(ColorPrimaries::Bt470bg),
            6 => Some(ColorPrimaries::Smpte170m),
            9 => Some(ColorPrimaries::Bt2020),
            12 => Some(ColorPrimaries::Smpte432),
            _ => None,
        }
    }

    pub fn code(&self) -> u8 {
        match self {
            ColorPrimaries::Bt709 => 1,
            ColorPrimaries::Bt470bg => 5,
            ColorPrimaries::Smpte170m => 6,
            ColorPrimaries::Bt2020 => 9,
            ColorPrimaries::Smpte432 => 12,
        }
    }
}

/// Transfer characteristics, as defined by ISO/IEC 23091-2.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum TransferCharacteristics {
    Bt709,
    Smpte170m,
    Linear,
    Srgb,
    Pq,
    Hlg,
}

impl TransferCharacteristics {
    pub fn from_code(code: u8) -> Option<TransferCharacteristics> {
        match code {
            1 => Some(TransferCharacteristics::Bt709),
            6 => Some(TransferCharacteristics::Smpte170m),
            8 => Some(TransferCharacteristics::Linear),
            13 => Some(TransferCharacteristics::Srgb),
            16 => Some(TransferCharacteristics::Pq),
            18 => Some(TransferCharacteristics::Hlg),
            _ => None,
        }
    }

    pub fn code(&self) -> u8 {
        match self {
            TransferCharacteristics::Bt709 => 1,
            TransferCharacteristics::Smpte170m => 6,
            TransferCharacteristics::Linear => 8,
            TransferCharacteristics::Srgb => 13,
            TransferCharacteristics::Pq => 16,
            TransferCharacteristics::Hlg => 18,
        }
    }
}

/// Matrix coefficients, as defined by ISO/IEC 23091-2.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum MatrixCoefficients {
    Identity,
    Bt709,
    Bt470bg,
    Smpte170m,
    Bt2020Ncl,
}

impl MatrixCoefficients {
    pub fn from_code(code: u8) -> Option<MatrixCoefficients> {
        match code {
            0 => Some(MatrixCoefficients::Identity),
            1 => Some(MatrixCoefficients::Bt709),
            5 => Some(MatrixCoefficients::Bt470bg),
            6 => Some(MatrixCoefficients::Smpte170m),
            9 => Some(MatrixCoefficients::Bt2020Ncl),
            _ => None,
        }
    }

    pub fn code(&self) -> u8 {
        match self {
            MatrixCoefficients::Identity => 0,
            MatrixCoefficients::Bt709 => 1,
            MatrixCoefficients::Bt470bg => 5,
            MatrixCoefficients::Smpte170m => 6,
            MatrixCoefficients::Bt2020Ncl => 9,
        }
    }
}

/// A colour-space descriptor for a video track. All fields are optional since containers routinely
/// omit some or all of them.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ColorSpace {
    pub primaries: Option<ColorPrimaries>,
    pub transfer: Option<TransferCharacteristics>,
    pub matrix: Option<MatrixCoefficients>,
    pub full_range: Option<bool>,
}

impl ColorSpace {
    /// Returns true if every field is unset.
    pub fn is_empty(&self) -> bool {
        self.primaries.is_none()
            && self.transfer.is_none()
            && self.matrix.is_none()
            && self.full_range.is_none()
    }
}

/// Codec-level metadata for a video track.
#[derive(Clone, Debug)]
pub struct VideoTrackInfo {
    pub codec: VideoCodec,
    /// The width of the coded picture in pixels, before rotation.
    pub coded_width: u32,
    /// The height of the coded picture in pixels, before rotation.
    pub coded_height: u32,
    /// The clockwise rotation to apply at presentation.
    pub rotation: Rotation,
    /// The colour space, when signalled.
    pub color: Option<ColorSpace>,
    /// The decoder configuration blob (e.g. an `AVCDecoderConfigurationRecord`), when the codec
    /// requires one.
    pub decoder_config: Option<Box<[u8]>>,
}

/// Codec-level metadata for an audio track.
#[derive(Clone, Debug)]
pub struct AudioTrackInfo {
    pub codec: AudioCodec,
    pub channel_count: u32,
    pub sample_rate: u32,
    /// The decoder configuration blob (e.g. an AAC `AudioSpecificConfig`), when the codec requires
    /// one.
    pub decoder_config: Option<Box<[u8]>>,
}

/// Codec-level metadata for a subtitle track.
#[derive(Clone, Debug)]
pub struct SubtitleTrackInfo {
    pub codec: SubtitleCodec,
    /// Header/preamble text required to interpret the subtitle cues.
    pub config: Option<String>,
}

/// Per-track codec metadata, polymorphic over the track type.
#[derive(Clone, Debug)]
pub enum TrackInfo {
    Video(VideoTrackInfo),
    Audio(AudioTrackInfo),
    Subtitle(SubtitleTrackInfo),
}

impl TrackInfo {
    /// The track type.
    pub fn track_type(&self) -> TrackType {
        match self {
            TrackInfo::Video(_) => TrackType::Video,
            TrackInfo::Audio(_) => TrackType::Audio,
            TrackInfo::Subtitle(_) => TrackType::Subtitle,
        }
    }

    /// The codec identifier.
    pub fn codec(&self) -> Codec {
        match self {
            TrackInfo::Video(info) => Codec::Video(info.codec),
            TrackInfo::Audio(info) => Codec::Audio(info.codec),
            TrackInfo::Subtitle(info) => Codec::Subtitle(info.codec),
        }
    }

    /// The decoder configuration blob, if one is carried.
    pub fn decoder_config(&self) -> Option<&[u8]> {
        match self {
            TrackInfo::Video(info) => info.decoder_config.as_deref(),
            TrackInfo::Audio(info) => info.decoder_config.as_deref(),
            TrackInfo::Subtitle(_) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::Rotation;

    #[test]
    fn verify_rotation_round_trip() {
        for degrees in [0, 90, 180, 270] {
            let rotation = Rotation::from_degrees(degrees).unwrap();
            assert_eq!(rotation.degrees(), degrees as u32);
            let matrix = rotation.fixed_point_matrix();
            assert_eq!(Rotation::from_fixed_point_matrix(&matrix), Some(rotation));
        }

        assert_eq!(Rotation::from_degrees(-90), Some(Rotation::Clockwise270));
        assert_eq!(Rotation::from_degrees(450), Some(Rotation::Clockwise90));
        assert_eq!(Rotation::from_degrees(45), None);
    }
}
