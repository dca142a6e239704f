// Remux
// Copyright (c) 2026 The Project Remux Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use std::io;

use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::io::{AsyncSeekExt, AsyncWriteExt};
use tokio::sync::mpsc;

use crate::errors::{Error, Result};

/// A `Target` accepts sequenced byte output from a muxer.
///
/// `write` and `flush` are suspension points; `seek` is not, so targets that require asynchronous
/// repositioning defer it until the next write. Targets that cannot seek at all report
/// `is_seekable() == false`, and muxers fall back to streaming-friendly output (sizeless elements)
/// where the container allows it.
#[async_trait]
pub trait Target: Send {
    /// Write `buf` at the current position and advance the position.
    async fn write(&mut self, buf: &[u8]) -> Result<()>;

    /// Reposition the output cursor. Backward seeks are used by muxers during finalization to
    /// back-patch sizes and indexes.
    fn seek(&mut self, pos: u64) -> Result<()>;

    /// Flush any buffered output.
    async fn flush(&mut self) -> Result<()>;

    /// Returns true if the target supports repositioning.
    fn is_seekable(&self) -> bool;
}

fn unseekable_error<T>() -> Result<T> {
    Err(Error::IoError(Box::new(io::Error::new(
        io::ErrorKind::Unsupported,
        "target is not seekable",
    ))))
}

/// An in-memory, seekable target. The finished container is retrieved with
/// [`BufferTarget::into_inner`].
#[derive(Default)]
pub struct BufferTarget {
    buf: Vec<u8>,
    pos: usize,
}

impl BufferTarget {
    pub fn new() -> Self {
        Default::default()
    }

    /// Consume the target and return the written bytes.
    pub fn into_inner(self) -> Vec<u8> {
        self.buf
    }

    /// View the written bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.buf
    }
}

#[async_trait]
impl Target for BufferTarget {
    async fn write(&mut self, buf: &[u8]) -> Result<()> {
        let end = self.pos + buf.len();
        if end > self.buf.len() {
            self.buf.resize(end, 0);
        }
        self.buf[self.pos..end].copy_from_slice(buf);
        self.pos = end;
        Ok(())
    }

    fn seek(&mut self, pos: u64) -> Result<()> {
        self.pos = pos as usize;
        if self.pos > self.buf.len() {
            self.buf.resize(self.pos, 0);
        }
        Ok(())
    }

    async fn flush(&mut self) -> Result<()> {
        Ok(())
    }

    fn is_seekable(&self) -> bool {
        true
    }
}

/// A seekable in-memory target whose buffer stays accessible after the muxer has consumed the
/// target. The second half of the pair observes everything written.
pub struct SharedBufferTarget {
    buf: Arc<Mutex<Vec<u8>>>,
    pos: usize,
}

impl SharedBufferTarget {
    /// Create the target and its observing handle.
    pub fn new() -> (Self, SharedBuffer) {
        let buf = Arc::new(Mutex::new(Vec::new()));
        (SharedBufferTarget { buf: buf.clone(), pos: 0 }, SharedBuffer { buf })
    }
}

/// The observing handle of a [`SharedBufferTarget`].
#[derive(Clone)]
pub struct SharedBuffer {
    buf: Arc<Mutex<Vec<u8>>>,
}

impl SharedBuffer {
    /// Copy the bytes written so far.
    pub fn contents(&self) -> Vec<u8> {
        self.buf.lock().clone()
    }
}

#[async_trait]
impl Target for SharedBufferTarget {
    async fn write(&mut self, buf: &[u8]) -> Result<()> {
        let mut inner = self.buf.lock();
        let end = self.pos + buf.len();
        if end > inner.len() {
            inner.resize(end, 0);
        }
        inner[self.pos..end].copy_from_slice(buf);
        self.pos = end;
        Ok(())
    }

    fn seek(&mut self, pos: u64) -> Result<()> {
        self.pos = pos as usize;
        let mut inner = self.buf.lock();
        if self.pos > inner.len() {
            inner.resize(self.pos, 0);
        }
        Ok(())
    }

    async fn flush(&mut self) -> Result<()> {
        Ok(())
    }

    fn is_seekable(&self) -> bool {
        true
    }
}

/// A chunk of output produced by a [`StreamTarget`].
#[derive(Debug)]
pub struct TargetChunk {
    /// The byte offset of the chunk within the output.
    pub pos: u64,
    /// The chunk data.
    pub data: Vec<u8>,
}

/// A forward-only target that hands written chunks to a channel, for streaming back-ends that
/// upload or pipe output as it is produced.
pub struct StreamTarget {
    tx: mpsc::UnboundedSender<TargetChunk>,
    pos: u64,
}

impl StreamTarget {
    /// Create a stream target and the receiving end for its chunks.
    pub fn new() -> (Self, mpsc::UnboundedReceiver<TargetChunk>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (StreamTarget { tx, pos: 0 }, rx)
    }
}

#[async_trait]
impl Target for StreamTarget {
    async fn write(&mut self, buf: &[u8]) -> Result<()> {
        let chunk = TargetChunk { pos: self.pos, data: buf.to_vec() };
        self.pos += buf.len() as u64;
        self.tx.send(chunk).map_err(|_| {
            Error::IoError(Box::new(io::Error::new(
                io::ErrorKind::BrokenPipe,
                "stream target receiver dropped",
            )))
        })
    }

    fn seek(&mut self, _pos: u64) -> Result<()> {
        unseekable_error()
    }

    async fn flush(&mut self) -> Result<()> {
        Ok(())
    }

    fn is_seekable(&self) -> bool {
        false
    }
}

/// An adapter over any `tokio` writable, seekable byte sink (typically a file).
///
/// Seeks are deferred and applied immediately before the next write or flush, keeping
/// [`Target::seek`] synchronous.
pub struct AsyncWriteTarget<W> {
    inner: W,
    pending_seek: Option<u64>,
}

impl<W> AsyncWriteTarget<W>
where
    W: tokio::io::AsyncWrite + tokio::io::AsyncSeek + Unpin + Send,
{
    pub fn new(inner: W) -> Self {
        AsyncWriteTarget { inner, pending_seek: None }
    }

    /// Consume the adapter and return the inner sink.
    pub fn into_inner(self) -> W {
        self.inner
    }

    async fn apply_pending_seek(&mut self) -> Result<()> {
        if let Some(pos) = self.pending_seek.take() {
            self.inner.seek(io::SeekFrom::Start(pos)).await?;
        }
        Ok(())
    }
}

#[async_trait]
impl<W> Target for AsyncWriteTarget<W>
where
    W: tokio::io::AsyncWrite + tokio::io::AsyncSeek + Unpin + Send,
{
    async fn write(&mut self, buf: &[u8]) -> Result<()> {
        self.apply_pending_seek().await?;
        self.inner.write_all(buf).await?;
        Ok(())
    }

    fn seek(&mut self, pos: u64) -> Result<()> {
        self.pending_seek = Some(pos);
        Ok(())
    }

    async fn flush(&mut self) -> Result<()> {
        self.apply_pending_seek().await?;
        self.inner.flush().await?;
        Ok(())
    }

    fn is_seekable(&self) -> bool {
        true
    }
}
