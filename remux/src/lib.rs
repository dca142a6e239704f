// Remux
// Copyright (c) 2026 The Project Remux Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Project Remux is a pure Rust media container demuxing and muxing engine.
//!
//! Remux parses container byte streams into a uniform track/packet model, emits container byte
//! streams from that same model, and extracts codec-specific parameters from compressed
//! elementary streams when the container does not carry them. It never decodes or encodes media
//! samples.
//!
//! # Reading
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use remux::core::demux::PacketOptions;
//! use remux::core::io::{BufSource, Reader};
//!
//! # async fn example(bytes: Vec<u8>) -> remux::core::errors::Result<()> {
//! let reader = Arc::new(Reader::new(Arc::new(BufSource::new(bytes))));
//! let demuxer = remux::open(reader).await?;
//!
//! for track in demuxer.clone().tracks().await? {
//!     let mut packet = track.first_packet(PacketOptions::default()).await?;
//!     while let Some(current) = packet {
//!         // Feed `current` to a decoder, or to a muxer.
//!         packet = track.next_packet(&current, PacketOptions::default()).await?;
//!     }
//! }
//! # Ok(())
//! # }
//! ```
//!
//! # Writing
//!
//! An output format is selected by short name through [`muxer`], or a muxer is constructed
//! directly from its crate for format-specific options.

use std::sync::Arc;

use once_cell::sync::Lazy;

pub use remux_common as common;
pub use remux_core as core;
pub use remux_metadata as metadata;

#[cfg(feature = "flac")]
pub use remux_format_flac as flac;
#[cfg(feature = "isomp4")]
pub use remux_format_isomp4 as isomp4;
#[cfg(feature = "mkv")]
pub use remux_format_mkv as mkv;
#[cfg(feature = "mpa")]
pub use remux_format_mpa as mpa;
#[cfg(feature = "ogg")]
pub use remux_format_ogg as ogg;
#[cfg(feature = "riff")]
pub use remux_format_riff as riff;

use remux_core::demux::Demuxer;
use remux_core::errors::{invalid_format_error, Result};
use remux_core::io::{Reader, Writer};
use remux_core::mux::Muxer;
use remux_core::probe;

static REGISTRY_SEEDED: Lazy<()> = Lazy::new(|| {
    // Demuxers are probed in registration order; the cheap magic-number checks come first and
    // the frame-header scans (MP3, ADTS) last.
    #[cfg(feature = "isomp4")]
    probe::register_demuxer(isomp4::registration());
    #[cfg(feature = "mkv")]
    probe::register_demuxer(mkv::registration());
    #[cfg(feature = "ogg")]
    probe::register_demuxer(ogg::registration());
    #[cfg(feature = "riff")]
    {
        probe::register_demuxer(riff::wave_registration());
        probe::register_demuxer(riff::avi_registration());
    }
    #[cfg(feature = "flac")]
    probe::register_demuxer(flac::registration());
    #[cfg(feature = "mpa")]
    {
        probe::register_demuxer(mpa::adts_registration());
        probe::register_demuxer(mpa::mp3_registration());
    }

    #[cfg(feature = "isomp4")]
    probe::register_muxer(isomp4::muxer_registration());
    #[cfg(feature = "mkv")]
    probe::register_muxer(mkv::muxer_registration());
    #[cfg(feature = "ogg")]
    probe::register_muxer(ogg::muxer_registration());
    #[cfg(feature = "riff")]
    probe::register_muxer(riff::avi_muxer_registration());
    #[cfg(feature = "mpa")]
    probe::register_muxer(mpa::mp3_muxer_registration());
});

/// Seed the process-wide format registry with the enabled formats. Idempotent; called
/// automatically by [`open`] and [`muxer`], and before any direct use of
/// [`remux_core::probe::detect`].
pub fn init() {
    Lazy::force(&REGISTRY_SEEDED);
}

/// Sniff the source behind `reader` and open the matching demuxer.
pub async fn open(reader: Arc<Reader>) -> Result<Arc<dyn Demuxer>> {
    init();

    match probe::detect(reader).await? {
        Some(demuxer) => Ok(demuxer),
        None => invalid_format_error("no registered format recognizes the stream"),
    }
}

/// Instantiate the muxer registered under `short_name` (`isomp4`, `mkv`, `ogg`, `avi`, `mp3`)
/// over `writer`.
pub fn muxer(short_name: &str, writer: Writer) -> Result<Arc<dyn Muxer>> {
    init();
    probe::muxer_for(short_name, writer)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use remux_core::io::{BufSource, Reader};

    #[tokio::test]
    async fn verify_probe_dispatch() {
        // A WAVE header must land on the wave demuxer.
        let mut wave = Vec::new();
        wave.extend_from_slice(b"RIFF");
        wave.extend_from_slice(&36u32.to_le_bytes());
        wave.extend_from_slice(b"WAVE");
        wave.extend_from_slice(b"fmt ");
        wave.extend_from_slice(&16u32.to_le_bytes());
        wave.extend_from_slice(&1u16.to_le_bytes());
        wave.extend_from_slice(&1u16.to_le_bytes());
        wave.extend_from_slice(&8000u32.to_le_bytes());
        wave.extend_from_slice(&16000u32.to_le_bytes());
        wave.extend_from_slice(&2u16.to_le_bytes());
        wave.extend_from_slice(&16u16.to_le_bytes());
        wave.extend_from_slice(b"data");
        wave.extend_from_slice(&0u32.to_le_bytes());

        let reader = Arc::new(Reader::new(Arc::new(BufSource::new(wave))));
        let demuxer = crate::open(reader).await.unwrap();
        assert_eq!(demuxer.format_info().short_name, "wave");

        // Unrecognized bytes are rejected.
        let reader = Arc::new(Reader::new(Arc::new(BufSource::new(vec![0u8; 256]))));
        assert!(crate::open(reader).await.is_err());
    }

    #[tokio::test]
    async fn verify_muxer_dispatch() {
        use remux_core::io::{BufferTarget, Writer};

        let writer = Writer::new(Box::new(BufferTarget::new()));
        let muxer = crate::muxer("mkv", writer).unwrap();
        assert_eq!(muxer.format_info().short_name, "mkv");

        let writer = Writer::new(Box::new(BufferTarget::new()));
        assert!(crate::muxer("nope", writer).is_err());
    }
}
