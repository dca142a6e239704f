// Remux
// Copyright (c) 2026 The Project Remux Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! AVC (H.264) and HEVC (H.265) NAL-unit and parameter-set inspection.

pub mod avc;
pub mod hevc;

use remux_core::errors::{invalid_format_error, Result};

/// The framing of NAL units within a packet or parameter-set blob.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum NalFraming {
    /// Start-code (`00 00 01` / `00 00 00 01`) delimited, as produced by raw encoders.
    AnnexB,
    /// Length-prefixed with the given prefix size in bytes, as stored in ISOBMFF and Matroska.
    LengthPrefixed(u8),
}

/// Iterate the NAL units within `data` under the given framing, yielding one byte slice per NAL
/// unit (header byte included, start codes and length prefixes excluded).
pub fn iter_nal_units(data: &[u8], framing: NalFraming) -> NalUnitIter<'_> {
    NalUnitIter { data, pos: 0, framing }
}

pub struct NalUnitIter<'a> {
    data: &'a [u8],
    pos: usize,
    framing: NalFraming,
}

impl<'a> Iterator for NalUnitIter<'a> {
    type Item = &'a [u8];

    fn next(&mut self) -> Option<Self::Item> {
        match self.framing {
            NalFraming::AnnexB => {
                // Find the next start code at or after the cursor.
                let start = find_start_code(self.data, self.pos)?;
                let begin = start.0 + start.1;
                // The NAL unit ends at the next start code, or at the end of the buffer.
                let end = match find_start_code(self.data, begin) {
                    Some((next, _)) => next,
                    None => self.data.len(),
                };
                self.pos = end;
                // Trailing zero bytes before the next start code belong to it, not the NAL unit.
                let mut end = end;
                while end > begin && self.data[end - 1] == 0 {
                    end -= 1;
                }
                (end > begin).then(|| &self.data[begin..end])
            }
            NalFraming::LengthPrefixed(prefix) => {
                let prefix = prefix as usize;
                if self.pos + prefix > self.data.len() {
                    return None;
                }
                let mut len = 0usize;
                for &byte in &self.data[self.pos..self.pos + prefix] {
                    len = (len << 8) | usize::from(byte);
                }
                let begin = self.pos + prefix;
                let end = begin.checked_add(len)?;
                if end > self.data.len() {
                    return None;
                }
                self.pos = end;
                Some(&self.data[begin..end])
            }
        }
    }
}

fn find_start_code(data: &[u8], from: usize) -> Option<(usize, usize)> {
    let mut i = from;
    while i + 3 <= data.len() {
        if data[i] == 0 && data[i + 1] == 0 {
            if data[i + 2] == 1 {
                return Some((i, 3));
            }
            if i + 4 <= data.len() && data[i + 2] == 0 && data[i + 3] == 1 {
                return Some((i, 4));
            }
        }
        i += 1;
    }
    None
}

/// Convert an Annex-B packet into length-prefixed form with four-byte prefixes, preserving the
/// NAL unit payload bytes exactly.
pub fn annex_b_to_length_prefixed(data: &[u8]) -> Result<Vec<u8>> {
    let mut out = Vec::with_capacity(data.len() + 16);
    let mut any = false;

    for nal in iter_nal_units(data, NalFraming::AnnexB) {
        any = true;
        out.extend_from_slice(&(nal.len() as u32).to_be_bytes());
        out.extend_from_slice(nal);
    }

    if !any {
        return invalid_format_error("no start codes in annex-b packet");
    }

    Ok(out)
}

/// Returns true if the packet appears to use Annex-B framing.
pub fn is_annex_b(data: &[u8]) -> bool {
    find_start_code(data, 0).map_or(false, |(pos, _)| pos == 0)
}

#[cfg(test)]
mod tests {
    use super::{annex_b_to_length_prefixed, iter_nal_units, NalFraming};

    #[test]
    fn verify_annex_b_iteration() {
        let data = [
            0x00, 0x00, 0x00, 0x01, 0x67, 0xaa, // SPS
            0x00, 0x00, 0x01, 0x68, 0xbb, 0xcc, // PPS
            0x00, 0x00, 0x01, 0x65, 0x11, // IDR
        ];

        let nals: Vec<&[u8]> = iter_nal_units(&data, NalFraming::AnnexB).collect();
        assert_eq!(nals.len(), 3);
        assert_eq!(nals[0], &[0x67, 0xaa]);
        assert_eq!(nals[1], &[0x68, 0xbb, 0xcc]);
        assert_eq!(nals[2], &[0x65, 0x11]);
    }

    #[test]
    fn verify_length_prefixed_iteration() {
        let data = [0x00, 0x00, 0x00, 0x02, 0x67, 0xaa, 0x00, 0x00, 0x00, 0x01, 0x65];

        let nals: Vec<&[u8]> = iter_nal_units(&data, NalFraming::LengthPrefixed(4)).collect();
        assert_eq!(nals.len(), 2);
        assert_eq!(nals[0], &[0x67, 0xaa]);
        assert_eq!(nals[1], &[0x65]);
    }

    #[test]
    fn verify_annex_b_conversion_preserves_payloads() {
        let data = [0x00, 0x00, 0x00, 0x01, 0x67, 0xaa, 0x00, 0x00, 0x01, 0x65, 0x11, 0x22];
        let converted = annex_b_to_length_prefixed(&data).unwrap();

        assert_eq!(
            converted,
            vec![0x00, 0x00, 0x00, 0x02, 0x67, 0xaa, 0x00, 0x00, 0x00, 0x03, 0x65, 0x11, 0x22]
        );
    }
}
