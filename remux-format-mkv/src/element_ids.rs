// Remux
// Copyright (c) 2026 The Project Remux Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The Matroska v4 / WebM element ids used by the demuxer and muxer, and their datatype table.

use phf::phf_map;

pub const EBML: u32 = 0x1a45_dfa3;
pub const EBML_VERSION: u32 = 0x4286;
pub const EBML_READ_VERSION: u32 = 0x42f7;
pub const EBML_MAX_ID_LENGTH: u32 = 0x42f2;
pub const EBML_MAX_SIZE_LENGTH: u32 = 0x42f3;
pub const DOC_TYPE: u32 = 0x4282;
pub const DOC_TYPE_VERSION: u32 = 0x4287;
pub const DOC_TYPE_READ_VERSION: u32 = 0x4285;

pub const SEGMENT: u32 = 0x1853_8067;

pub const SEEK_HEAD: u32 = 0x114d_9b74;
pub const SEEK: u32 = 0x4dbb;
pub const SEEK_ID: u32 = 0x53ab;
pub const SEEK_POSITION: u32 = 0x53ac;

pub const INFO: u32 = 0x1549_a966;
pub const TIMESTAMP_SCALE: u32 = 0x2ad7_b1;
pub const DURATION: u32 = 0x4489;
pub const MUXING_APP: u32 = 0x4d80;
pub const WRITING_APP: u32 = 0x5741;

pub const TRACKS: u32 = 0x1654_ae6b;
pub const TRACK_ENTRY: u32 = 0xae;
pub const TRACK_NUMBER: u32 = 0xd7;
pub const TRACK_UID: u32 = 0x73c5;
pub const TRACK_TYPE: u32 = 0x83;
pub const FLAG_LACING: u32 = 0x9c;
pub const DEFAULT_DURATION: u32 = 0x23e3_83;
pub const NAME: u32 = 0x536e;
pub const LANGUAGE: u32 = 0x22b5_9c;
pub const LANGUAGE_BCP47: u32 = 0x22b5_9d;
pub const CODEC_ID: u32 = 0x86;
pub const CODEC_PRIVATE: u32 = 0x63a2;
pub const CODEC_DELAY: u32 = 0x56aa;
pub const SEEK_PRE_ROLL: u32 = 0x56bb;

pub const VIDEO: u32 = 0xe0;
pub const PIXEL_WIDTH: u32 = 0xb0;
pub const PIXEL_HEIGHT: u32 = 0xba;
pub const COLOUR: u32 = 0x55b0;
pub const MATRIX_COEFFICIENTS: u32 = 0x55b1;
pub const RANGE: u32 = 0x55b9;
pub const TRANSFER_CHARACTERISTICS: u32 = 0x55ba;
pub const PRIMARIES: u32 = 0x55bb;
pub const PROJECTION: u32 = 0x7670;
pub const PROJECTION_TYPE: u32 = 0x7671;
pub const PROJECTION_POSE_ROLL: u32 = 0x7675;

pub const AUDIO: u32 = 0xe1;
pub const SAMPLING_FREQUENCY: u32 = 0xb5;
pub const CHANNELS: u32 = 0x9f;
pub const BIT_DEPTH: u32 = 0x6264;

pub const CLUSTER: u32 = 0x1f43_b675;
pub const TIMESTAMP: u32 = 0xe7;
pub const SIMPLE_BLOCK: u32 = 0xa3;
pub const BLOCK_GROUP: u32 = 0xa0;
pub const BLOCK: u32 = 0xa1;
pub const BLOCK_DURATION: u32 = 0x9b;
pub const REFERENCE_BLOCK: u32 = 0xfb;

pub const CUES: u32 = 0x1c53_bb6b;
pub const CUE_POINT: u32 = 0xbb;
pub const CUE_TIME: u32 = 0xb3;
pub const CUE_TRACK_POSITIONS: u32 = 0xb7;
pub const CUE_TRACK: u32 = 0xf7;
pub const CUE_CLUSTER_POSITION: u32 = 0xf1;

pub const TAGS: u32 = 0x1254_c367;
pub const ATTACHMENTS: u32 = 0x1941_a469;
pub const CHAPTERS: u32 = 0x1043_a770;

pub const VOID: u32 = 0xec;
pub const CRC32: u32 = 0xbf;

/// The EBML datatype of an element.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ElementType {
    Master,
    Unsigned,
    Signed,
    Float,
    String,
    Binary,
}

/// Datatypes of the elements the demuxer interprets. Unknown ids are treated as binary and
/// skipped.
pub static ELEMENTS: phf::Map<u32, ElementType> = phf_map! {
    0x1a45_dfa3u32 => ElementType::Master,
    0x4286u32 => ElementType::Unsigned,
    0x42f7u32 => ElementType::Unsigned,
    0x42f2u32 => ElementType::Unsigned,
    0x42f3u32 => ElementType::Unsigned,
    0x4282u32 => ElementType::String,
    0x4287u32 => ElementType::Unsigned,
    0x4285u32 => ElementType::Unsigned,

    0x1853_8067u32 => ElementType::Master,

    0x114d_9b74u32 => ElementType::Master,
    0x4dbbu32 => ElementType::Master,
    0x53abu32 => ElementType::Binary,
    0x53acu32 => ElementType::Unsigned,

    0x1549_a966u32 => ElementType::Master,
    0x2ad7_b1u32 => ElementType::Unsigned,
    0x4489u32 => ElementType::Float,
    0x4d80u32 => ElementType::String,
    0x5741u32 => ElementType::String,

    0x1654_ae6bu32 => ElementType::Master,
    0xaeu32 => ElementType::Master,
    0xd7u32 => ElementType::Unsigned,
    0x73c5u32 => ElementType::Unsigned,
    0x83u32 => ElementType::Unsigned,
    0x9cu32 => ElementType::Unsigned,
    0x23e3_83u32 => ElementType::Unsigned,
    0x536eu32 => ElementType::String,
    0x22b5_9cu32 => ElementType::String,
    0x22b5_9du32 => ElementType::String,
    0x86u32 => ElementType::String,
    0x63a2u32 => ElementType::Binary,
    0x56aau32 => ElementType::Unsigned,
    0x56bbu32 => ElementType::Unsigned,

    0xe0u32 => ElementType::Master,
    0xb0u32 => ElementType::Unsigned,
    0xbau32 => ElementType::Unsigned,
    0x55b0u32 => ElementType::Master,
    0x55b1u32 => ElementType::Unsigned,
    0x55b9u32 => ElementType::Unsigned,
    0x55bau32 => ElementType::Unsigned,
    0x55bbu32 => ElementType::Unsigned,
    0x7670u32 => ElementType::Master,
    0x7671u32 => ElementType::Unsigned,
    0x7675u32 => ElementType::Float,

    0xe1u32 => ElementType::Master,
    0xb5u32 => ElementType::Float,
    0x9fu32 => ElementType::Unsigned,
    0x6264u32 => ElementType::Unsigned,

    0x1f43_b675u32 => ElementType::Master,
    0xe7u32 => ElementType::Unsigned,
    0xa3u32 => ElementType::Binary,
    0xa0u32 => ElementType::Master,
    0xa1u32 => ElementType::Binary,
    0x9bu32 => ElementType::Unsigned,
    0xfbu32 => ElementType::Signed,

    0x1c53_bb6bu32 => ElementType::Master,
    0xbbu32 => ElementType::Master,
    0xb3u32 => ElementType::Unsigned,
    0xb7u32 => ElementType::Master,
    0xf7u32 => ElementType::Unsigned,
    0xf1u32 => ElementType::Unsigned,

    0x1254_c367u32 => ElementType::Master,
    0x1941_a469u32 => ElementType::Master,
    0x1043_a770u32 => ElementType::Master,

    0xecu32 => ElementType::Binary,
    0xbfu32 => ElementType::Binary,
};

/// Ids that may start a level-0 or level-1 element; the resync scan looks for these.
pub fn is_top_level(id: u32) -> bool {
    matches!(
        id,
        EBML | SEGMENT | SEEK_HEAD | INFO | TRACKS | CLUSTER | CUES | TAGS | ATTACHMENTS | CHAPTERS
    )
}
