// Remux
// Copyright (c) 2026 The Project Remux Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use async_trait::async_trait;

use crate::errors::Result;

/// A `Source` provides random access to a byte stream of known length.
///
/// Both operations may suspend: implementations backed by files, blobs, or HTTP range requests
/// complete asynchronously. Failures surface as [`crate::errors::Error::IoError`].
#[async_trait]
pub trait Source: Send + Sync {
    /// Get the total length of the source in bytes.
    async fn byte_len(&self) -> Result<u64>;

    /// Read the byte range `[start, end)`. The range is guaranteed by the caller to lie within
    /// the source.
    async fn read_range(&self, start: u64, end: u64) -> Result<Vec<u8>>;
}

/// An in-memory byte buffer source.
pub struct BufSource {
    buf: Vec<u8>,
}

impl BufSource {
    /// Create a source over the provided buffer.
    pub fn new(buf: impl Into<Vec<u8>>) -> Self {
        BufSource { buf: buf.into() }
    }
}

#[async_trait]
impl Source for BufSource {
    async fn byte_len(&self) -> Result<u64> {
        Ok(self.buf.len() as u64)
    }

    async fn read_range(&self, start: u64, end: u64) -> Result<Vec<u8>> {
        let start = start.min(self.buf.len() as u64) as usize;
        let end = end.min(self.buf.len() as u64) as usize;
        Ok(self.buf[start..end].to_vec())
    }
}
