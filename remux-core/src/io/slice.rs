// Remux
// Copyright (c) 2026 The Project Remux Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use std::sync::Arc;

use crate::errors::{invalid_format_error, Result};

/// A `SliceReader` is a contiguous byte window with an internal cursor, exposing aligned reads.
///
/// Slices share ownership of the bytes they view, so they remain valid regardless of cache
/// eviction in the [`crate::io::Reader`] that produced them. Every slice knows the file offset of
/// its first byte, letting parsers compute byte-exact positions in the source.
#[derive(Clone)]
pub struct SliceReader {
    data: Arc<[u8]>,
    /// File offset of `data[0]`.
    base: u64,
    /// Window bounds into `data`.
    lo: usize,
    hi: usize,
    /// Cursor, relative to `data`.
    pos: usize,
}

impl SliceReader {
    /// Create a reader over the whole buffer, whose first byte sits at `file_offset`.
    pub fn new(data: Arc<[u8]>, file_offset: u64) -> Self {
        let hi = data.len();
        SliceReader { data, base: file_offset, lo: 0, hi, pos: 0 }
    }

    /// Create a reader over the window `[lo, hi)` of the buffer. `file_offset` is the file offset
    /// of `data[0]`, not of the window.
    pub fn new_windowed(data: Arc<[u8]>, file_offset: u64, lo: usize, hi: usize) -> Self {
        assert!(lo <= hi && hi <= data.len());
        SliceReader { data, base: file_offset, lo, hi, pos: lo }
    }

    /// Create a reader over an owned buffer positioned at file offset 0. Intended for tests and
    /// for parsing already-extracted byte strings.
    pub fn from_vec(data: Vec<u8>) -> Self {
        SliceReader::new(Arc::from(data), 0)
    }

    /// The length of the window in bytes.
    #[inline]
    pub fn len(&self) -> usize {
        self.hi - self.lo
    }

    /// Returns true if the window is empty.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.hi == self.lo
    }

    /// The cursor position relative to the start of the window.
    #[inline]
    pub fn pos(&self) -> usize {
        self.pos - self.lo
    }

    /// The file offset of the cursor.
    #[inline]
    pub fn file_pos(&self) -> u64 {
        self.base + self.pos as u64
    }

    /// The number of unread bytes in the window.
    #[inline]
    pub fn bytes_remaining(&self) -> usize {
        self.hi - self.pos
    }

    /// Move the cursor to `pos`, relative to the start of the window.
    pub fn seek(&mut self, pos: usize) -> Result<()> {
        if pos > self.len() {
            return invalid_format_error("seek position beyond end of slice");
        }
        self.pos = self.lo + pos;
        Ok(())
    }

    /// Advance the cursor by `count` bytes.
    pub fn skip(&mut self, count: usize) -> Result<()> {
        if count > self.bytes_remaining() {
            return invalid_format_error("skip beyond end of slice");
        }
        self.pos += count;
        Ok(())
    }

    /// View the entire window.
    #[inline]
    pub fn as_bytes(&self) -> &[u8] {
        &self.data[self.lo..self.hi]
    }

    /// Read `count` bytes and return them as a borrowed slice.
    pub fn read_bytes(&mut self, count: usize) -> Result<&[u8]> {
        if count > self.bytes_remaining() {
            return invalid_format_error("unexpected end of slice");
        }
        let start = self.pos;
        self.pos += count;
        Ok(&self.data[start..self.pos])
    }

    /// Read `count` bytes into an owned boxed slice.
    pub fn read_boxed_slice(&mut self, count: usize) -> Result<Box<[u8]>> {
        Ok(Box::from(self.read_bytes(count)?))
    }

    /// Read all remaining bytes.
    pub fn read_remaining(&mut self) -> &[u8] {
        let start = self.pos;
        self.pos = self.hi;
        &self.data[start..self.hi]
    }

    #[inline]
    fn read_array<const N: usize>(&mut self) -> Result<[u8; N]> {
        if N > self.bytes_remaining() {
            return invalid_format_error("unexpected end of slice");
        }
        let mut out = [0u8; N];
        out.copy_from_slice(&self.data[self.pos..self.pos + N]);
        self.pos += N;
        Ok(out)
    }

    /// Read a single byte.
    #[inline]
    pub fn read_u8(&mut self) -> Result<u8> {
        Ok(self.read_array::<1>()?[0])
    }

    #[inline]
    pub fn read_i8(&mut self) -> Result<i8> {
        Ok(self.read_u8()? as i8)
    }

    #[inline]
    pub fn read_u16(&mut self) -> Result<u16> {
        Ok(u16::from_be_bytes(self.read_array::<2>()?))
    }

    #[inline]
    pub fn read_u16_le(&mut self) -> Result<u16> {
        Ok(u16::from_le_bytes(self.read_array::<2>()?))
    }

    #[inline]
    pub fn read_i16(&mut self) -> Result<i16> {
        Ok(self.read_u16()? as i16)
    }

    #[inline]
    pub fn read_i16_le(&mut self) -> Result<i16> {
        Ok(self.read_u16_le()? as i16)
    }

    #[inline]
    pub fn read_u24(&mut self) -> Result<u32> {
        let b = self.read_array::<3>()?;
        Ok(u32::from_be_bytes([0, b[0], b[1], b[2]]))
    }

    #[inline]
    pub fn read_u24_le(&mut self) -> Result<u32> {
        let b = self.read_array::<3>()?;
        Ok(u32::from_le_bytes([b[0], b[1], b[2], 0]))
    }

    #[inline]
    pub fn read_u32(&mut self) -> Result<u32> {
        Ok(u32::from_be_bytes(self.read_array::<4>()?))
    }

    #[inline]
    pub fn read_u32_le(&mut self) -> Result<u32> {
        Ok(u32::from_le_bytes(self.read_array::<4>()?))
    }

    #[inline]
    pub fn read_i32(&mut self) -> Result<i32> {
        Ok(self.read_u32()? as i32)
    }

    #[inline]
    pub fn read_i32_le(&mut self) -> Result<i32> {
        Ok(self.read_u32_le()? as i32)
    }

    #[inline]
    pub fn read_u64(&mut self) -> Result<u64> {
        Ok(u64::from_be_bytes(self.read_array::<8>()?))
    }

    #[inline]
    pub fn read_u64_le(&mut self) -> Result<u64> {
        Ok(u64::from_le_bytes(self.read_array::<8>()?))
    }

    #[inline]
    pub fn read_i64(&mut self) -> Result<i64> {
        Ok(self.read_u64()? as i64)
    }

    #[inline]
    pub fn read_f32(&mut self) -> Result<f32> {
        Ok(f32::from_be_bytes(self.read_array::<4>()?))
    }

    #[inline]
    pub fn read_f32_le(&mut self) -> Result<f32> {
        Ok(f32::from_le_bytes(self.read_array::<4>()?))
    }

    #[inline]
    pub fn read_f64(&mut self) -> Result<f64> {
        Ok(f64::from_be_bytes(self.read_array::<8>()?))
    }

    #[inline]
    pub fn read_f64_le(&mut self) -> Result<f64> {
        Ok(f64::from_le_bytes(self.read_array::<8>()?))
    }

    /// Read four bytes as a FourCC.
    #[inline]
    pub fn read_quad_bytes(&mut self) -> Result<[u8; 4]> {
        self.read_array::<4>()
    }

    /// Read a fixed-length ASCII string. Non-ASCII bytes are replaced.
    pub fn read_ascii(&mut self, len: usize) -> Result<String> {
        let bytes = self.read_bytes(len)?;
        Ok(bytes.iter().map(|&b| if b.is_ascii() { b as char } else { '\u{fffd}' }).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::SliceReader;

    #[test]
    fn verify_aligned_reads() {
        let mut reader = SliceReader::from_vec(vec![
            0x01, 0x02, 0x03, 0x04, 0x05, 0x06, 0x07, 0x08, b'f', b't', b'y', b'p',
        ]);

        assert_eq!(reader.read_u16().unwrap(), 0x0102);
        assert_eq!(reader.read_u16_le().unwrap(), 0x0403);
        assert_eq!(reader.read_u24().unwrap(), 0x050607);
        assert_eq!(reader.read_u8().unwrap(), 0x08);
        assert_eq!(reader.read_quad_bytes().unwrap(), *b"ftyp");
        assert!(reader.read_u8().is_err());
    }

    #[test]
    fn verify_windowed_file_pos() {
        let data: std::sync::Arc<[u8]> = std::sync::Arc::from(vec![0u8; 16]);
        let mut reader = SliceReader::new_windowed(data, 100, 4, 12);

        assert_eq!(reader.len(), 8);
        assert_eq!(reader.file_pos(), 104);
        reader.skip(3).unwrap();
        assert_eq!(reader.file_pos(), 107);
        assert_eq!(reader.pos(), 3);
    }
}
