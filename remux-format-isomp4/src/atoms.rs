// Remux
// Copyright (c) 2026 The Project Remux Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! ISOBMFF box plumbing: headers, iteration within fetched slices, and the MPEG-4 descriptor
//! syntax used by `esds`.

use remux_core::errors::{invalid_format_error, Result};
use remux_core::io::{Reader, SliceReader};

/// A box header. `data_len` covers the payload only.
#[derive(Copy, Clone, Debug)]
pub struct BoxHeader {
    pub fourcc: [u8; 4],
    /// File offset of the first size byte.
    pub pos: u64,
    /// File offset of the payload.
    pub data_pos: u64,
    pub data_len: u64,
}

impl BoxHeader {
    pub fn end(&self) -> u64 {
        self.data_pos + self.data_len
    }
}

/// Read a box header at `pos` through the cached reader. Returns `None` at end of stream.
pub async fn read_box_header_at(reader: &Reader, pos: u64) -> Result<Option<BoxHeader>> {
    let mut head = match reader.slice(pos, 16).await? {
        Some(head) if head.len() >= 8 => head,
        _ => return Ok(None),
    };

    let size32 = head.read_u32()?;
    let fourcc = head.read_quad_bytes()?;

    let (data_pos, data_len) = match size32 {
        // Box extends to the end of the file.
        0 => {
            let file_len = reader.byte_len().await?;
            (pos + 8, file_len.saturating_sub(pos + 8))
        }
        // 64-bit largesize follows the fourcc.
        1 => {
            if head.len() < 16 {
                return invalid_format_error("isomp4: truncated large box header");
            }
            let size64 = head.read_u64()?;
            if size64 < 16 {
                return invalid_format_error("isomp4: invalid large box size");
            }
            (pos + 16, size64 - 16)
        }
        _ => {
            if size32 < 8 {
                return invalid_format_error("isomp4: invalid box size");
            }
            (pos + 8, u64::from(size32) - 8)
        }
    };

    Ok(Some(BoxHeader { fourcc, pos, data_pos, data_len }))
}

/// A synchronous box header within an already-fetched slice.
#[derive(Copy, Clone, Debug)]
pub struct ChildBox {
    pub fourcc: [u8; 4],
    /// Payload offset relative to the window start.
    pub data_start: usize,
    pub data_len: usize,
}

/// Read a child box header at the slice cursor; the cursor advances to the payload.
pub fn read_child_box(slice: &mut SliceReader) -> Result<ChildBox> {
    let size32 = slice.read_u32()?;
    let fourcc = slice.read_quad_bytes()?;

    let data_len = match size32 {
        0 => slice.bytes_remaining(),
        1 => {
            let size64 = slice.read_u64()?;
            if size64 < 16 {
                return invalid_format_error("isomp4: invalid large box size");
            }
            (size64 - 16) as usize
        }
        _ => {
            if size32 < 8 {
                return invalid_format_error("isomp4: invalid box size");
            }
            size32 as usize - 8
        }
    };

    if data_len > slice.bytes_remaining() {
        return invalid_format_error("isomp4: box runs past its container");
    }

    Ok(ChildBox { fourcc, data_start: slice.pos(), data_len })
}

/// Iterate the child boxes of the remaining window, invoking `f` with each child's fourcc and a
/// sub-slice over its payload.
pub fn for_each_child<F>(slice: &mut SliceReader, mut f: F) -> Result<()>
where
    F: FnMut([u8; 4], &mut SliceReader) -> Result<()>,
{
    while slice.bytes_remaining() >= 8 {
        let child = read_child_box(slice)?;
        let mut body = SliceReader::from_vec(slice.read_bytes(child.data_len)?.to_vec());
        f(child.fourcc, &mut body)?;
    }
    Ok(())
}

/// Read a full-box version byte and 24-bit flags.
pub fn read_full_box(slice: &mut SliceReader) -> Result<(u8, u32)> {
    let version = slice.read_u8()?;
    let flags = slice.read_u24()?;
    Ok((version, flags))
}

/// Append a complete box with the given payload.
pub fn write_box(out: &mut Vec<u8>, fourcc: &[u8; 4], payload: &[u8]) {
    out.extend_from_slice(&((payload.len() + 8) as u32).to_be_bytes());
    out.extend_from_slice(fourcc);
    out.extend_from_slice(payload);
}

/// Append a full box (version + flags) with the given payload.
pub fn write_full_box(out: &mut Vec<u8>, fourcc: &[u8; 4], version: u8, flags: u32, payload: &[u8]) {
    let mut body = Vec::with_capacity(payload.len() + 4);
    body.push(version);
    body.extend_from_slice(&flags.to_be_bytes()[1..]);
    body.extend_from_slice(payload);
    write_box(out, fourcc, &body);
}

// MPEG-4 descriptor syntax (ISO/IEC 14496-1), as carried by the `esds` box.

const DESCRIPTOR_ES: u8 = 0x03;
const DESCRIPTOR_DECODER_CONFIG: u8 = 0x04;
const DESCRIPTOR_DECODER_SPECIFIC: u8 = 0x05;
const DESCRIPTOR_SL_CONFIG: u8 = 0x06;

/// Parsed `esds` contents.
#[derive(Clone, Debug)]
pub struct EsDescriptor {
    pub object_type: u8,
    pub decoder_specific_info: Option<Box<[u8]>>,
}

fn read_descriptor_len(slice: &mut SliceReader) -> Result<usize> {
    let mut len = 0usize;
    for _ in 0..4 {
        let byte = slice.read_u8()?;
        len = (len << 7) | usize::from(byte & 0x7f);
        if byte & 0x80 == 0 {
            return Ok(len);
        }
    }
    invalid_format_error("isomp4: descriptor length too long")
}

/// Parse an `esds` payload (after the full-box header).
pub fn parse_es_descriptor(slice: &mut SliceReader) -> Result<EsDescriptor> {
    let tag = slice.read_u8()?;
    if tag != DESCRIPTOR_ES {
        return invalid_format_error("isomp4: missing ES descriptor");
    }
    read_descriptor_len(slice)?;

    // ES_ID and stream flags.
    slice.skip(2)?;
    let flags = slice.read_u8()?;
    if flags & 0x80 != 0 {
        slice.skip(2)?;
    }
    if flags & 0x40 != 0 {
        let url_len = slice.read_u8()? as usize;
        slice.skip(url_len)?;
    }
    if flags & 0x20 != 0 {
        slice.skip(2)?;
    }

    let tag = slice.read_u8()?;
    if tag != DESCRIPTOR_DECODER_CONFIG {
        return invalid_format_error("isomp4: missing decoder config descriptor");
    }
    let config_len = read_descriptor_len(slice)?;
    let config_start = slice.pos();

    let object_type = slice.read_u8()?;
    // streamType/upStream/bufferSizeDB, maxBitrate, avgBitrate.
    slice.skip(4 + 4 + 4)?;

    let mut decoder_specific_info = None;
    if slice.pos() - config_start < config_len && slice.bytes_remaining() > 1 {
        let tag = slice.read_u8()?;
        if tag == DESCRIPTOR_DECODER_SPECIFIC {
            let len = read_descriptor_len(slice)?;
            decoder_specific_info = Some(Box::from(slice.read_bytes(len)?));
        }
    }

    Ok(EsDescriptor { object_type, decoder_specific_info })
}

fn write_descriptor(out: &mut Vec<u8>, tag: u8, payload: &[u8]) {
    out.push(tag);
    // Lengths below 128 fit one byte; the descriptors written here always do, except the ES
    // wrapper which may need two.
    let len = payload.len();
    if len < 0x80 {
        out.push(len as u8);
    }
    else {
        out.push(0x80 | ((len >> 7) as u8));
        out.push((len & 0x7f) as u8);
    }
    out.extend_from_slice(payload);
}

/// Build an `esds` payload (without the full-box header) for the given object type and optional
/// decoder specific info.
pub fn build_es_descriptor(object_type: u8, decoder_specific_info: Option<&[u8]>) -> Vec<u8> {
    let mut decoder_config = Vec::new();
    decoder_config.push(object_type);
    // streamType = audio (0x05), upStream = 0, reserved = 1.
    decoder_config.push(0x15);
    // bufferSizeDB, maxBitrate, avgBitrate: left zero.
    decoder_config.extend_from_slice(&[0u8; 3]);
    decoder_config.extend_from_slice(&0u32.to_be_bytes());
    decoder_config.extend_from_slice(&0u32.to_be_bytes());

    if let Some(info) = decoder_specific_info {
        write_descriptor(&mut decoder_config, DESCRIPTOR_DECODER_SPECIFIC, info);
    }

    let mut es = Vec::new();
    // ES_ID = 1, no flags.
    es.extend_from_slice(&1u16.to_be_bytes());
    es.push(0);
    write_descriptor(&mut es, DESCRIPTOR_DECODER_CONFIG, &decoder_config);
    write_descriptor(&mut es, DESCRIPTOR_SL_CONFIG, &[0x02]);

    let mut out = Vec::new();
    write_descriptor(&mut out, DESCRIPTOR_ES, &es);
    out
}

#[cfg(test)]
mod tests {
    use remux_core::io::SliceReader;

    use super::{build_es_descriptor, parse_es_descriptor, read_child_box, write_box};

    #[test]
    fn verify_box_round_trip() {
        let mut out = Vec::new();
        write_box(&mut out, b"ftyp", b"isompayload");

        let mut slice = SliceReader::from_vec(out);
        let child = read_child_box(&mut slice).unwrap();
        assert_eq!(&child.fourcc, b"ftyp");
        assert_eq!(child.data_len, 11);
    }

    #[test]
    fn verify_es_descriptor_round_trip() {
        let asc = [0x12u8, 0x10];
        let esds = build_es_descriptor(0x40, Some(&asc));

        let mut slice = SliceReader::from_vec(esds);
        let parsed = parse_es_descriptor(&mut slice).unwrap();

        assert_eq!(parsed.object_type, 0x40);
        assert_eq!(parsed.decoder_specific_info.as_deref(), Some(&asc[..]));
    }
}
