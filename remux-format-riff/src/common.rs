// Remux
// Copyright (c) 2026 The Project Remux Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Shared RIFF chunk plumbing.

use remux_core::errors::Result;
use remux_core::io::Reader;

/// A RIFF chunk header: four-character id and payload size. Chunk payloads are padded to even
/// length; the pad byte is not part of the size.
#[derive(Copy, Clone, Debug)]
pub struct ChunkHeader {
    pub id: [u8; 4],
    pub size: u32,
    /// File offset of the first payload byte.
    pub data_pos: u64,
}

impl ChunkHeader {
    /// The file offset of the next sibling chunk.
    pub fn next_pos(&self) -> u64 {
        self.data_pos + padded_size(self.size)
    }
}

/// The payload size padded to even length.
pub fn padded_size(size: u32) -> u64 {
    u64::from(size) + u64::from(size & 1)
}

/// Read a chunk header at `pos`. `big_endian` selects RIFX-style big-endian sizes. Returns `None`
/// at end of stream.
pub async fn read_chunk_header(
    reader: &Reader,
    pos: u64,
    big_endian: bool,
) -> Result<Option<ChunkHeader>> {
    let mut slice = match reader.slice(pos, 8).await? {
        Some(slice) if slice.len() == 8 => slice,
        _ => return Ok(None),
    };

    let id = slice.read_quad_bytes()?;
    let size = if big_endian { slice.read_u32()? } else { slice.read_u32_le()? };

    Ok(Some(ChunkHeader { id, size, data_pos: pos + 8 }))
}

#[cfg(test)]
mod tests {
    use super::padded_size;

    #[test]
    fn verify_padding() {
        assert_eq!(padded_size(0), 0);
        assert_eq!(padded_size(3), 4);
        assert_eq!(padded_size(4), 4);
    }
}
