// Remux
// Copyright (c) 2026 The Project Remux Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The `io` module implements byte- and bit-level I/O over asynchronous sources and targets.
//!
//! Reading is structured in two layers. A [`Reader`] maps random byte-range requests onto a
//! [`Source`] and caches recently fetched ranges. Parsers obtain a [`SliceReader`] over a cached
//! range and then read from it synchronously; the only suspension point on the read path is an
//! uncached range fetch.
//!
//! Writing mirrors this: a [`Writer`] serializes byte output onto a [`Target`], suspending only
//! on `write` and `flush`.

mod bitstream;
mod reader;
mod slice;
mod source;
mod target;
mod writer;

pub use bitstream::{strip_emulation_prevention, BitReader};
pub use reader::{Reader, DEFAULT_CACHE_BUDGET};
pub use slice::SliceReader;
pub use source::{BufSource, Source};
pub use target::{
    AsyncWriteTarget, BufferTarget, SharedBuffer, SharedBufferTarget, StreamTarget, Target,
    TargetChunk,
};
pub use writer::Writer;
