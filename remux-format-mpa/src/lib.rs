// Remux
// Copyright (c) 2026 The Project Remux Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! MP3 and ADTS (AAC) stream demuxers and an MP3 muxer for Project Remux.

mod adts;
mod demuxer;
mod muxer;

pub use adts::{registration as adts_registration, AdtsDemuxer};
pub use demuxer::{registration as mp3_registration, Mp3Demuxer};
pub use muxer::{registration as mp3_muxer_registration, Mp3Muxer, Mp3MuxerOptions};

use remux_core::demux::FormatInfo;

pub const MP3_FORMAT_INFO: FormatInfo = FormatInfo {
    short_name: "mp3",
    long_name: "MPEG Audio Layer III Native",
    mime_type: "audio/mpeg",
};

pub const ADTS_FORMAT_INFO: FormatInfo = FormatInfo {
    short_name: "adts",
    long_name: "Audio Data Transport Stream",
    mime_type: "audio/aac",
};
