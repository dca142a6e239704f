// Remux
// Copyright (c) 2026 The Project Remux Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! WAVE and AVI (RIFF-family) demuxers and an AVI muxer for Project Remux.

mod avi;
mod common;
mod wave;

pub use avi::muxer::{registration as avi_muxer_registration, AviMuxer};
pub use avi::{registration as avi_registration, AviDemuxer};
pub use wave::{registration as wave_registration, WaveDemuxer};

use remux_core::demux::FormatInfo;

pub const WAVE_FORMAT_INFO: FormatInfo = FormatInfo {
    short_name: "wave",
    long_name: "Waveform Audio File Format",
    mime_type: "audio/wav",
};

pub const AVI_FORMAT_INFO: FormatInfo = FormatInfo {
    short_name: "avi",
    long_name: "Audio Video Interleave",
    mime_type: "video/x-msvideo",
};
