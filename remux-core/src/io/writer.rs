// Remux
// Copyright (c) 2026 The Project Remux Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use crate::errors::Result;
use crate::io::target::Target;

/// A `Writer` produces sequenced byte output on a [`Target`].
///
/// The writer maintains a single monotonically advancing cursor. Muxers may seek backward only to
/// back-patch sizes and indexes during finalization; on unseekable targets they must instead emit
/// sizeless structures where the container allows.
pub struct Writer {
    target: Box<dyn Target>,
    pos: u64,
    tracked: Option<Vec<(u64, u64)>>,
}

impl Writer {
    /// Create a writer over the provided target.
    pub fn new(target: Box<dyn Target>) -> Self {
        Writer { target, pos: 0, tracked: None }
    }

    /// The current output position.
    #[inline]
    pub fn pos(&self) -> u64 {
        self.pos
    }

    /// Returns true if the underlying target supports backward seeks.
    pub fn is_seekable(&self) -> bool {
        self.target.is_seekable()
    }

    /// Begin recording the byte spans of subsequent writes.
    pub fn start_tracking_writes(&mut self) {
        self.tracked = Some(Vec::new());
    }

    /// Stop recording and return the `[start, end)` spans written since tracking began.
    pub fn stop_tracking_writes(&mut self) -> Vec<(u64, u64)> {
        self.tracked.take().unwrap_or_default()
    }

    /// Write a buffer at the current position.
    pub async fn write(&mut self, buf: &[u8]) -> Result<()> {
        self.target.write(buf).await?;
        if let Some(spans) = &mut self.tracked {
            // Coalesce with the previous span when contiguous.
            match spans.last_mut() {
                Some(last) if last.1 == self.pos => last.1 = self.pos + buf.len() as u64,
                _ => spans.push((self.pos, self.pos + buf.len() as u64)),
            }
        }
        self.pos += buf.len() as u64;
        Ok(())
    }

    /// Reposition the output cursor.
    pub fn seek(&mut self, pos: u64) -> Result<()> {
        self.target.seek(pos)?;
        self.pos = pos;
        Ok(())
    }

    /// Flush buffered output to the target.
    pub async fn flush(&mut self) -> Result<()> {
        self.target.flush().await
    }

    /// Consume the writer and return the target.
    pub fn into_target(self) -> Box<dyn Target> {
        self.target
    }

    pub async fn write_u8(&mut self, value: u8) -> Result<()> {
        self.write(&[value]).await
    }

    pub async fn write_u16(&mut self, value: u16) -> Result<()> {
        self.write(&value.to_be_bytes()).await
    }

    pub async fn write_u16_le(&mut self, value: u16) -> Result<()> {
        self.write(&value.to_le_bytes()).await
    }

    pub async fn write_u24(&mut self, value: u32) -> Result<()> {
        self.write(&value.to_be_bytes()[1..]).await
    }

    pub async fn write_u32(&mut self, value: u32) -> Result<()> {
        self.write(&value.to_be_bytes()).await
    }

    pub async fn write_u32_le(&mut self, value: u32) -> Result<()> {
        self.write(&value.to_le_bytes()).await
    }

    pub async fn write_u64(&mut self, value: u64) -> Result<()> {
        self.write(&value.to_be_bytes()).await
    }

    pub async fn write_i16(&mut self, value: i16) -> Result<()> {
        self.write(&value.to_be_bytes()).await
    }

    pub async fn write_i32(&mut self, value: i32) -> Result<()> {
        self.write(&value.to_be_bytes()).await
    }

    pub async fn write_f64(&mut self, value: f64) -> Result<()> {
        self.write(&value.to_be_bytes()).await
    }

    /// Write an ASCII string without a terminator.
    pub async fn write_ascii(&mut self, value: &str) -> Result<()> {
        debug_assert!(value.is_ascii());
        self.write(value.as_bytes()).await
    }
}

#[cfg(test)]
mod tests {
    use super::Writer;
    use crate::io::target::BufferTarget;

    #[tokio::test]
    async fn verify_write_and_patch() {
        let mut writer = Writer::new(Box::new(BufferTarget::new()));

        writer.write_u32(0).await.unwrap();
        writer.write_ascii("data").await.unwrap();
        assert_eq!(writer.pos(), 8);

        // Back-patch the leading size field.
        writer.seek(0).unwrap();
        writer.write_u32(8).await.unwrap();
        writer.seek(8).unwrap();

        // No direct access to target internals through the trait object; writers only observe
        // their own cursor.
        assert_eq!(writer.pos(), 8);
    }

    #[tokio::test]
    async fn verify_write_tracking() {
        let mut writer = Writer::new(Box::new(BufferTarget::new()));

        writer.write(&[0u8; 4]).await.unwrap();
        writer.start_tracking_writes();
        writer.write(&[1u8; 4]).await.unwrap();
        writer.write(&[2u8; 4]).await.unwrap();
        writer.seek(16).unwrap();
        writer.write(&[3u8; 2]).await.unwrap();
        let spans = writer.stop_tracking_writes();

        assert_eq!(spans, vec![(4, 12), (16, 18)]);
    }
}
