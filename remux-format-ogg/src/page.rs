// Remux
// Copyright (c) 2026 The Project Remux Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Ogg page reading and writing.

use remux_core::errors::Result;
use remux_core::io::Reader;
use remux_core::util::crc::Crc32;

pub const OGG_PAGE_MARKER: [u8; 4] = *b"OggS";
pub const OGG_PAGE_HEADER_SIZE: usize = 27;

/// The largest possible page: header, full segment table, and 255 segments of 255 bytes.
pub const OGG_PAGE_MAX_SIZE: u64 = (OGG_PAGE_HEADER_SIZE + 255 + 255 * 255) as u64;

pub const FLAG_CONTINUATION: u8 = 0x01;
pub const FLAG_BOS: u8 = 0x02;
pub const FLAG_EOS: u8 = 0x04;

/// A fully read and CRC-validated Ogg page.
#[derive(Clone)]
pub struct Page {
    pub offset: u64,
    pub granule: u64,
    pub serial: u32,
    pub sequence: u32,
    pub is_continuation: bool,
    pub is_bos: bool,
    pub is_eos: bool,
    /// The segment lacing values.
    pub lacing: Vec<u8>,
    /// The page body (all segments concatenated).
    pub body: Vec<u8>,
    /// File offset of the byte after the page.
    pub end_offset: u64,
}

impl Page {
    /// The sizes of the packets *completing* on this page, and whether a partial packet trails.
    ///
    /// A packet ends at the first segment with a lacing value below 255; a trailing run of
    /// 255-valued segments spills into the next page.
    pub fn packet_sizes(&self) -> (Vec<usize>, bool) {
        let mut sizes = Vec::new();
        let mut current = 0usize;
        let mut partial = false;

        for &lace in &self.lacing {
            current += lace as usize;
            if lace < 255 {
                sizes.push(current);
                current = 0;
                partial = false;
            }
            else {
                partial = true;
            }
        }

        (sizes, partial)
    }

    /// The body bytes belonging to the leading continuation, when the first packet of this page
    /// continues one from the previous page.
    pub fn continuation_len(&self) -> usize {
        if !self.is_continuation {
            return 0;
        }

        let mut len = 0usize;
        for &lace in &self.lacing {
            len += lace as usize;
            if lace < 255 {
                break;
            }
        }
        len
    }
}

/// Read and validate the page at exactly `offset`. Returns `None` on marker mismatch, a bad CRC,
/// or truncation.
pub async fn read_page_at(reader: &Reader, offset: u64) -> Result<Option<Page>> {
    let head = match reader.slice(offset, OGG_PAGE_HEADER_SIZE as u64 + 255).await? {
        Some(head) if head.len() >= OGG_PAGE_HEADER_SIZE => head,
        _ => return Ok(None),
    };
    let head_bytes = head.as_bytes();

    if head_bytes[..4] != OGG_PAGE_MARKER || head_bytes[4] != 0 {
        return Ok(None);
    }

    let granule = u64::from_le_bytes(head_bytes[6..14].try_into().unwrap());
    let serial = u32::from_le_bytes(head_bytes[14..18].try_into().unwrap());
    let sequence = u32::from_le_bytes(head_bytes[18..22].try_into().unwrap());
    let crc = u32::from_le_bytes(head_bytes[22..26].try_into().unwrap());
    let n_segments = head_bytes[26] as usize;

    if head_bytes.len() < OGG_PAGE_HEADER_SIZE + n_segments {
        return Ok(None);
    }

    let lacing = head_bytes[OGG_PAGE_HEADER_SIZE..OGG_PAGE_HEADER_SIZE + n_segments].to_vec();
    let body_len: usize = lacing.iter().map(|&l| l as usize).sum();

    let header_len = OGG_PAGE_HEADER_SIZE + n_segments;
    let body = match reader.slice(offset + header_len as u64, body_len as u64).await? {
        Some(mut body) if body.len() == body_len => body.read_remaining().to_vec(),
        _ if body_len == 0 => Vec::new(),
        _ => return Ok(None),
    };

    // Validate the CRC over the whole page with the checksum field zeroed.
    let mut crc32 = Crc32::new(0);
    crc32.process_buf_bytes(&head_bytes[..22]);
    crc32.process_buf_bytes(&[0u8; 4]);
    crc32.process_buf_bytes(&head_bytes[26..header_len]);
    crc32.process_buf_bytes(&body);

    if crc32.crc() != crc {
        return Ok(None);
    }

    let flags = head_bytes[5];

    Ok(Some(Page {
        offset,
        granule,
        serial,
        sequence,
        is_continuation: flags & FLAG_CONTINUATION != 0,
        is_bos: flags & FLAG_BOS != 0,
        is_eos: flags & FLAG_EOS != 0,
        lacing,
        body,
        end_offset: offset + (header_len + body_len) as u64,
    }))
}

/// Scan forward from `from` for the next valid page, stopping at `limit`. Invalid pages (bad
/// capture pattern or CRC) are skipped byte-by-byte, which is the demuxer's local recovery.
pub async fn sync_next_page(reader: &Reader, from: u64, limit: u64) -> Result<Option<Page>> {
    const WINDOW: u64 = 64 * 1024;
    let mut base = from;

    while base < limit {
        let window = match reader.slice(base, WINDOW).await? {
            Some(window) if window.len() >= 4 => window,
            _ => return Ok(None),
        };
        let bytes = window.as_bytes();

        for i in 0..bytes.len() - 3 {
            if bytes[i..i + 4] == OGG_PAGE_MARKER {
                if let Some(page) = read_page_at(reader, base + i as u64).await? {
                    return Ok(Some(page));
                }
            }
        }

        if (window.len() as u64) < WINDOW {
            return Ok(None);
        }
        base += WINDOW - 3;
    }

    Ok(None)
}

/// Serialize a page: the header is written with a placeholder checksum, then the CRC of the full
/// page is computed and patched in.
pub fn write_page(
    serial: u32,
    sequence: u32,
    granule: u64,
    flags: u8,
    lacing: &[u8],
    body: &[u8],
) -> Vec<u8> {
    assert!(lacing.len() <= 255);

    let mut out = Vec::with_capacity(OGG_PAGE_HEADER_SIZE + lacing.len() + body.len());
    out.extend_from_slice(&OGG_PAGE_MARKER);
    out.push(0);
    out.push(flags);
    out.extend_from_slice(&granule.to_le_bytes());
    out.extend_from_slice(&serial.to_le_bytes());
    out.extend_from_slice(&sequence.to_le_bytes());
    out.extend_from_slice(&[0u8; 4]); // checksum placeholder
    out.push(lacing.len() as u8);
    out.extend_from_slice(lacing);
    out.extend_from_slice(body);

    let mut crc = Crc32::new(0);
    crc.process_buf_bytes(&out);
    out[22..26].copy_from_slice(&crc.crc().to_le_bytes());

    out
}

/// Compute the lacing values for a packet of `len` bytes: 255-valued segments plus a terminating
/// short segment (possibly zero).
pub fn lacing_for_packet(len: usize) -> Vec<u8> {
    let mut lacing = vec![255u8; len / 255];
    lacing.push((len % 255) as u8);
    lacing
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use remux_core::io::{BufSource, Reader};

    use super::{lacing_for_packet, read_page_at, write_page, FLAG_BOS};

    #[tokio::test]
    async fn verify_page_round_trip_and_crc() {
        let body = vec![7u8; 300];
        let lacing = lacing_for_packet(body.len());
        assert_eq!(lacing, vec![255, 45]);

        let page = write_page(0x1234, 0, 48_000, FLAG_BOS, &lacing, &body);

        let reader = Reader::new(Arc::new(BufSource::new(page.clone())));
        let parsed = read_page_at(&reader, 0).await.unwrap().unwrap();

        assert_eq!(parsed.serial, 0x1234);
        assert_eq!(parsed.granule, 48_000);
        assert!(parsed.is_bos);
        let (sizes, partial) = parsed.packet_sizes();
        assert_eq!(sizes, vec![300]);
        assert!(!partial);

        // Corrupting any byte must invalidate the CRC.
        let mut corrupt = page;
        let last = corrupt.len() - 1;
        corrupt[last] ^= 0xff;
        let reader = Reader::new(Arc::new(BufSource::new(corrupt)));
        assert!(read_page_at(&reader, 0).await.unwrap().is_none());
    }
}
