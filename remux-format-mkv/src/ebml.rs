// Remux
// Copyright (c) 2026 The Project Remux Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! EBML primitives: variable-length integers, element headers, and write-side builders.

use remux_core::errors::{invalid_format_error, Result};
use remux_core::io::SliceReader;
use remux_core::util::bits::sign_extend_leq64_to_i64;

use crate::element_ids::{ElementType, ELEMENTS};

/// Read a single EBML element id (as in RFC 8794) from the slice: one to four bytes, marker bits
/// included.
pub fn read_id(reader: &mut SliceReader) -> Result<u32> {
    let byte = reader.read_u8()?;
    let extra_octets = byte.leading_zeros();
    if extra_octets > 3 {
        return invalid_format_error("mkv: invalid element id");
    }

    let mut id = u32::from(byte);
    for _ in 0..extra_octets {
        id = (id << 8) | u32::from(reader.read_u8()?);
    }
    Ok(id)
}

/// Read an unsigned variable-length integer, returning the value and its width in bytes.
pub fn read_vint(reader: &mut SliceReader) -> Result<(u64, u32)> {
    let byte = reader.read_u8()?;
    if byte == 0 {
        return invalid_format_error("mkv: invalid variable-length integer");
    }

    let width = byte.leading_zeros();
    let mut value = u64::from(byte);
    // Clear the VINT_MARKER bit.
    value ^= 1 << (7 - width);

    for _ in 0..width {
        value = (value << 8) | u64::from(reader.read_u8()?);
    }

    Ok((value, width + 1))
}

/// Read an element size. `None` signals an unknown-sized element (a size whose value bits are all
/// ones).
pub fn read_size(reader: &mut SliceReader) -> Result<Option<u64>> {
    let (value, width) = read_vint(reader)?;

    let all_ones = (1u64 << (7 * width)) - 1;
    if value == all_ones {
        return Ok(None);
    }
    Ok(Some(value))
}

/// Read a signed variable-length integer by range shifting.
pub fn read_signed_vint(reader: &mut SliceReader) -> Result<i64> {
    let (value, width) = read_vint(reader)?;
    let half_range = (1i64 << (7 * width - 1)) - 1;
    Ok(value as i64 - half_range)
}

/// An EBML element header.
#[derive(Copy, Clone, Debug)]
pub struct ElementHeader {
    pub id: u32,
    /// The file offset of the first id byte.
    pub pos: u64,
    /// The file offset of the payload.
    pub data_pos: u64,
    /// The payload length; `None` for unknown-sized elements.
    pub data_len: Option<u64>,
}

impl ElementHeader {
    /// Read an element header at the slice cursor. The slice's file offset anchors the absolute
    /// positions.
    pub fn read(reader: &mut SliceReader) -> Result<ElementHeader> {
        let pos = reader.file_pos();
        let id = read_id(reader)?;
        let data_len = read_size(reader)?;

        Ok(ElementHeader { id, pos, data_pos: reader.file_pos(), data_len })
    }

    /// The datatype of the element, defaulting to binary for unknown ids.
    pub fn element_type(&self) -> ElementType {
        ELEMENTS.get(&self.id).copied().unwrap_or(ElementType::Binary)
    }
}

/// Parsed element payload data.
pub fn read_unsigned(reader: &mut SliceReader, len: usize) -> Result<u64> {
    if len > 8 {
        return invalid_format_error("mkv: invalid unsigned integer length");
    }

    let mut value = 0u64;
    for _ in 0..len {
        value = (value << 8) | u64::from(reader.read_u8()?);
    }
    Ok(value)
}

pub fn read_signed(reader: &mut SliceReader, len: usize) -> Result<i64> {
    let value = read_unsigned(reader, len)?;
    Ok(sign_extend_leq64_to_i64(value, (len as u32) * 8))
}

pub fn read_float(reader: &mut SliceReader, len: usize) -> Result<f64> {
    match len {
        0 => Ok(0.0),
        4 => Ok(f64::from(reader.read_f32()?)),
        8 => reader.read_f64(),
        _ => invalid_format_error("mkv: invalid float length"),
    }
}

pub fn read_string(reader: &mut SliceReader, len: usize) -> Result<String> {
    let bytes = reader.read_bytes(len)?;
    let bytes = bytes.split(|&b| b == 0).next().unwrap_or(bytes);
    Ok(String::from_utf8_lossy(bytes).into_owned())
}

// Write-side builders. Elements are assembled in memory and sized exactly; only the Segment uses
// an unknown size while streaming.

/// Append an element id.
pub fn write_id(out: &mut Vec<u8>, id: u32) {
    let bytes = id.to_be_bytes();
    let skip = bytes.iter().position(|&b| b != 0).unwrap_or(3);
    out.extend_from_slice(&bytes[skip..]);
}

/// Append a size as a minimal-width variable-length integer.
pub fn write_size(out: &mut Vec<u8>, size: u64) {
    let width = vint_width(size);
    let marked = size | (1u64 << (7 * width));
    let bytes = marked.to_be_bytes();
    out.extend_from_slice(&bytes[8 - width as usize..]);
}

/// Append a size as an 8-byte variable-length integer, so the field can be back-patched later
/// regardless of the final value.
pub fn write_size_wide(out: &mut Vec<u8>, size: u64) {
    let marked = size | (1u64 << 56);
    out.extend_from_slice(&marked.to_be_bytes());
}

/// The all-ones "unknown size" marker, 8 bytes wide.
pub fn write_unknown_size(out: &mut Vec<u8>) {
    out.extend_from_slice(&[0x01, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff]);
}

/// The width in bytes needed to store `value` as a size vint.
pub fn vint_width(value: u64) -> u32 {
    for width in 1..=8u32 {
        // The all-ones pattern is reserved for unknown sizes.
        if value < (1u64 << (7 * width)) - 1 {
            return width;
        }
    }
    8
}

/// Append a complete element with the given payload.
pub fn write_element(out: &mut Vec<u8>, id: u32, payload: &[u8]) {
    write_id(out, id);
    write_size(out, payload.len() as u64);
    out.extend_from_slice(payload);
}

/// Append an unsigned-integer element with a minimal-length payload.
pub fn write_unsigned_element(out: &mut Vec<u8>, id: u32, value: u64) {
    let bytes = value.to_be_bytes();
    let skip = bytes.iter().position(|&b| b != 0).unwrap_or(7);
    write_element(out, id, &bytes[skip..]);
}

/// Append a float element (always 8 bytes).
pub fn write_float_element(out: &mut Vec<u8>, id: u32, value: f64) {
    write_element(out, id, &value.to_be_bytes());
}

/// Append a string element.
pub fn write_string_element(out: &mut Vec<u8>, id: u32, value: &str) {
    write_element(out, id, value.as_bytes());
}

#[cfg(test)]
mod tests {
    use remux_core::io::SliceReader;

    use super::{read_id, read_signed_vint, read_size, read_vint, vint_width, write_size};

    #[test]
    fn verify_id_parsing() {
        let mut r = SliceReader::from_vec(vec![0x82]);
        assert_eq!(read_id(&mut r).unwrap(), 0x82);
        let mut r = SliceReader::from_vec(vec![0x40, 0x02]);
        assert_eq!(read_id(&mut r).unwrap(), 0x4002);
        let mut r = SliceReader::from_vec(vec![0x20, 0x00, 0x02]);
        assert_eq!(read_id(&mut r).unwrap(), 0x200002);
        let mut r = SliceReader::from_vec(vec![0x1a, 0x45, 0xdf, 0xa3]);
        assert_eq!(read_id(&mut r).unwrap(), 0x1a45_dfa3);
    }

    #[test]
    fn verify_vint_parsing() {
        for bytes in [
            vec![0x82],
            vec![0x40, 0x02],
            vec![0x20, 0x00, 0x02],
            vec![0x10, 0x00, 0x00, 0x02],
            vec![0x08, 0x00, 0x00, 0x00, 0x02],
        ] {
            let mut r = SliceReader::from_vec(bytes);
            assert_eq!(read_vint(&mut r).unwrap().0, 2);
        }
    }

    #[test]
    fn verify_signed_vint_parsing() {
        let mut r = SliceReader::from_vec(vec![0x80]);
        assert_eq!(read_signed_vint(&mut r).unwrap(), -63);
        let mut r = SliceReader::from_vec(vec![0x40, 0x00]);
        assert_eq!(read_signed_vint(&mut r).unwrap(), -8191);
    }

    #[test]
    fn verify_unknown_size() {
        let mut r = SliceReader::from_vec(vec![0xff]);
        assert_eq!(read_size(&mut r).unwrap(), None);

        let mut r = SliceReader::from_vec(vec![0x01, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff]);
        assert_eq!(read_size(&mut r).unwrap(), None);
    }

    #[test]
    fn verify_size_write_read_round_trip() {
        for value in [0u64, 1, 126, 127, 128, 16_382, 16_383, 1 << 20, (1 << 35) + 7] {
            let mut out = Vec::new();
            write_size(&mut out, value);
            assert_eq!(out.len(), vint_width(value) as usize);

            let mut r = SliceReader::from_vec(out);
            assert_eq!(read_size(&mut r).unwrap(), Some(value));
        }
    }
}
