// Remux
// Copyright (c) 2026 The Project Remux Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The `probe` module implements format sniffing and the process-wide format registry.
//!
//! Each input format registers a `can_read` check that inspects the first bytes of a source
//! through the cached reader; [`detect`] runs the checks in registration order and instantiates
//! the first matching demuxer. Output formats are selected explicitly by short name.
//!
//! The registry is process-wide mutable state. It must be seeded (normally by the umbrella
//! crate's default registration) before the first call to [`detect`] or [`muxer_for`].

use std::sync::Arc;

use futures::future::BoxFuture;
use once_cell::sync::Lazy;
use parking_lot::RwLock;

use crate::demux::{Demuxer, FormatInfo};
use crate::errors::{unsupported_codec_error, Result};
use crate::io::{Reader, Writer};
use crate::mux::Muxer;

/// The signature of a format's sniffing check.
pub type CanRead = for<'a> fn(&'a Reader) -> BoxFuture<'a, Result<bool>>;

/// The signature of a demuxer constructor.
pub type OpenDemuxer = fn(Arc<Reader>) -> BoxFuture<'static, Result<Arc<dyn Demuxer>>>;

/// The signature of a muxer constructor.
pub type NewMuxer = fn(Writer) -> Result<Arc<dyn Muxer>>;

/// A registered input format.
#[derive(Copy, Clone)]
pub struct DemuxerRegistration {
    pub info: &'static FormatInfo,
    pub can_read: CanRead,
    pub open: OpenDemuxer,
}

/// A registered output format.
#[derive(Copy, Clone)]
pub struct MuxerRegistration {
    pub info: &'static FormatInfo,
    pub new_muxer: NewMuxer,
}

#[derive(Default)]
struct Registry {
    demuxers: Vec<DemuxerRegistration>,
    muxers: Vec<MuxerRegistration>,
}

static REGISTRY: Lazy<RwLock<Registry>> = Lazy::new(|| RwLock::new(Registry::default()));

/// Register an input format. Formats are probed in registration order; registering the same
/// short name twice replaces the earlier entry.
pub fn register_demuxer(registration: DemuxerRegistration) {
    let mut registry = REGISTRY.write();
    registry.demuxers.retain(|r| r.info.short_name != registration.info.short_name);
    registry.demuxers.push(registration);
}

/// Register an output format.
pub fn register_muxer(registration: MuxerRegistration) {
    let mut registry = REGISTRY.write();
    registry.muxers.retain(|r| r.info.short_name != registration.info.short_name);
    registry.muxers.push(registration);
}

/// List the registered input formats.
pub fn registered_demuxers() -> Vec<&'static FormatInfo> {
    REGISTRY.read().demuxers.iter().map(|r| r.info).collect()
}

/// List the registered output formats.
pub fn registered_muxers() -> Vec<&'static FormatInfo> {
    REGISTRY.read().muxers.iter().map(|r| r.info).collect()
}

/// Sniff the source behind `reader` and instantiate the matching demuxer.
///
/// Returns `Ok(None)` when no registered format recognizes the stream.
pub async fn detect(reader: Arc<Reader>) -> Result<Option<Arc<dyn Demuxer>>> {
    let candidates: Vec<DemuxerRegistration> = REGISTRY.read().demuxers.clone();

    for candidate in candidates {
        if (candidate.can_read)(&reader).await? {
            let demuxer = (candidate.open)(reader.clone()).await?;
            return Ok(Some(demuxer));
        }
    }

    Ok(None)
}

/// Instantiate the muxer registered under `short_name` over `writer`.
pub fn muxer_for(short_name: &str, writer: Writer) -> Result<Arc<dyn Muxer>> {
    let registration = REGISTRY
        .read()
        .muxers
        .iter()
        .find(|r| r.info.short_name == short_name)
        .copied();

    match registration {
        Some(registration) => (registration.new_muxer)(writer),
        None => unsupported_codec_error("unknown output format"),
    }
}
