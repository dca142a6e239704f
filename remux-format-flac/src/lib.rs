// Remux
// Copyright (c) 2026 The Project Remux Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! A native FLAC stream demuxer for Project Remux.

mod demuxer;
mod frame;

pub use demuxer::{registration, FlacDemuxer};

use remux_core::demux::FormatInfo;

pub const FLAC_FORMAT_INFO: FormatInfo = FormatInfo {
    short_name: "flac",
    long_name: "Free Lossless Audio Codec Native",
    mime_type: "audio/flac",
};
