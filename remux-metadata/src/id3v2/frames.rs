// Remux
// Copyright (c) 2026 The Project Remux Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! ID3v2 frame readers.

use log::trace;

use remux_core::errors::{invalid_format_error, Result};

use crate::{AttachedImage, MetadataTags};

use super::unsync::{decode_unsynchronisation, read_syncsafe_u32};

/// Read one frame from the front of `data`, merge it into `tags`, and return the number of bytes
/// consumed (header included).
pub fn read_frame(data: &[u8], major_version: u8, tags: &mut MetadataTags) -> Result<usize> {
    if data.len() < 10 {
        return invalid_format_error("id3v2: truncated frame header");
    }

    let id = &data[..4];
    if !id.iter().all(|&b| b.is_ascii_uppercase() || b.is_ascii_digit()) {
        return invalid_format_error("id3v2: invalid frame id");
    }

    let size = if major_version == 4 {
        read_syncsafe_u32(&data[4..8]) as usize
    }
    else {
        u32::from_be_bytes([data[4], data[5], data[6], data[7]]) as usize
    };

    let flags = u16::from_be_bytes([data[8], data[9]]);

    let total = 10 + size;
    if total > data.len() {
        return invalid_format_error("id3v2: frame exceeds tag body");
    }

    let mut body = data[10..total].to_vec();

    // ID3v2.4 frame-level unsynchronisation.
    if major_version == 4 && flags & 0x0002 != 0 {
        let len = decode_unsynchronisation(&mut body);
        body.truncate(len);
    }

    // A data-length indicator precedes the payload when flagged.
    if major_version == 4 && flags & 0x0001 != 0 && body.len() >= 4 {
        body.drain(..4);
    }

    // Compressed or encrypted frames are not decoded.
    if flags & if major_version == 4 { 0x000c } else { 0x00c0 } != 0 {
        trace!("skipping compressed or encrypted id3v2 frame");
        return Ok(total);
    }

    match id {
        b"TIT2" => tags.title = read_text(&body),
        b"TPE1" => tags.artist = read_text(&body),
        b"TALB" => tags.album = read_text(&body),
        b"TPE2" => tags.album_artist = read_text(&body),
        b"TCON" => tags.genre = read_text(&body).map(normalize_genre),
        b"TDRC" | b"TYER" => tags.date = read_text(&body),
        b"TRCK" => {
            let (number, out_of) = read_number_pair(&body);
            tags.track_number = number;
            tags.tracks_total = out_of;
        }
        b"TPOS" => {
            let (number, out_of) = read_number_pair(&body);
            tags.disc_number = number;
            tags.discs_total = out_of;
        }
        b"COMM" => tags.comment = read_language_text(&body),
        b"USLT" => tags.lyrics = read_language_text(&body),
        b"APIC" => {
            if let Some(image) = read_attached_picture(&body) {
                tags.images.push(image);
            }
        }
        _ => trace!("ignoring id3v2 frame {}", String::from_utf8_lossy(id)),
    }

    Ok(total)
}

/// Decode a text payload: an encoding byte followed by encoded text. Only the first string of a
/// multi-string frame is returned.
fn read_text(body: &[u8]) -> Option<String> {
    let (&encoding, text) = body.split_first()?;
    let text = decode_text(encoding, text)?;
    let first = text.split('\0').next().unwrap_or_default().trim();
    (!first.is_empty()).then(|| first.to_string())
}

/// Decode a `n` or `n/total` numeric pair as used by TRCK and TPOS.
fn read_number_pair(body: &[u8]) -> (Option<u32>, Option<u32>) {
    let text = match read_text(body) {
        Some(text) => text,
        None => return (None, None),
    };

    let mut parts = text.splitn(2, '/');
    let number = parts.next().and_then(|p| p.trim().parse().ok());
    let out_of = parts.next().and_then(|p| p.trim().parse().ok());
    (number, out_of)
}

/// Decode a COMM/USLT payload: encoding, 3-byte language, terminated short description, text.
fn read_language_text(body: &[u8]) -> Option<String> {
    let (&encoding, rest) = body.split_first()?;
    let rest = rest.get(3..)?;

    let rest = skip_terminated(encoding, rest)?;
    let text = decode_text(encoding, rest)?;
    let text = text.trim_end_matches('\0').trim();
    (!text.is_empty()).then(|| text.to_string())
}

fn read_attached_picture(body: &[u8]) -> Option<AttachedImage> {
    let (&encoding, rest) = body.split_first()?;

    let nul = rest.iter().position(|&b| b == 0)?;
    let media_type = String::from_utf8_lossy(&rest[..nul]).into_owned();
    let rest = &rest[nul + 1..];

    let (&picture_type, rest) = rest.split_first()?;

    let data_start = skip_terminated(encoding, rest)?;
    let desc_len = rest.len() - data_start.len();
    let description = decode_text(encoding, &rest[..desc_len])
        .map(|d| d.trim_end_matches('\0').to_string())
        .unwrap_or_default();

    Some(AttachedImage {
        media_type,
        picture_type,
        description,
        data: Box::from(data_start),
    })
}

/// Skip a terminated string of the given encoding, returning the remainder after the terminator.
fn skip_terminated(encoding: u8, data: &[u8]) -> Option<&[u8]> {
    match encoding {
        // Single-byte encodings terminate with one zero byte.
        0 | 3 => {
            let nul = data.iter().position(|&b| b == 0)?;
            Some(&data[nul + 1..])
        }
        // UTF-16 terminates with a zero code unit.
        _ => {
            let mut i = 0;
            while i + 2 <= data.len() {
                if data[i] == 0 && data[i + 1] == 0 {
                    return Some(&data[i + 2..]);
                }
                i += 2;
            }
            None
        }
    }
}

/// Decode text bytes according to the ID3v2 encoding byte.
fn decode_text(encoding: u8, data: &[u8]) -> Option<String> {
    match encoding {
        // ISO-8859-1 maps bytes to the first 256 code points.
        0 => Some(data.iter().map(|&b| b as char).collect()),
        // UTF-16 with a byte-order mark.
        1 => {
            let (be, data) = match data {
                [0xfe, 0xff, rest @ ..] => (true, rest),
                [0xff, 0xfe, rest @ ..] => (false, rest),
                _ => (false, data),
            };
            decode_utf16(data, be)
        }
        // UTF-16 big-endian, no byte-order mark.
        2 => decode_utf16(data, true),
        // UTF-8.
        3 => String::from_utf8(data.to_vec()).ok(),
        _ => None,
    }
}

fn decode_utf16(data: &[u8], be: bool) -> Option<String> {
    let units: Vec<u16> = data
        .chunks_exact(2)
        .map(|pair| {
            if be {
                u16::from_be_bytes([pair[0], pair[1]])
            }
            else {
                u16::from_le_bytes([pair[0], pair[1]])
            }
        })
        .collect();

    Some(String::from_utf16_lossy(&units))
}

/// Resolve legacy `(NN)` genre references to their plain-text remainder when present.
fn normalize_genre(genre: String) -> String {
    if let Some(end) = genre.strip_prefix('(').and_then(|rest| rest.find(')')) {
        let rest = genre[end + 2..].trim();
        if !rest.is_empty() {
            return rest.to_string();
        }
    }
    genre
}

#[cfg(test)]
mod tests {
    use super::read_frame;
    use crate::MetadataTags;

    fn text_frame(id: &[u8; 4], encoding: u8, text: &[u8]) -> Vec<u8> {
        let mut frame = Vec::new();
        frame.extend_from_slice(id);
        frame.extend_from_slice(&((text.len() + 1) as u32).to_be_bytes());
        frame.extend_from_slice(&[0, 0]);
        frame.push(encoding);
        frame.extend_from_slice(text);
        frame
    }

    #[test]
    fn verify_text_frame_encodings() {
        let mut tags = MetadataTags::default();

        // ISO-8859-1.
        let frame = text_frame(b"TIT2", 0, b"Caf\xe9");
        read_frame(&frame, 3, &mut tags).unwrap();
        assert_eq!(tags.title.as_deref(), Some("Café"));

        // UTF-8 in a v2.4 frame (synchsafe size).
        let frame = text_frame(b"TPE1", 3, "Füße".as_bytes());
        read_frame(&frame, 4, &mut tags).unwrap();
        assert_eq!(tags.artist.as_deref(), Some("Füße"));

        // UTF-16 with little-endian BOM.
        let mut utf16 = vec![0xff, 0xfe];
        for unit in "Nacht".encode_utf16() {
            utf16.extend_from_slice(&unit.to_le_bytes());
        }
        let frame = text_frame(b"TALB", 1, &utf16);
        read_frame(&frame, 3, &mut tags).unwrap();
        assert_eq!(tags.album.as_deref(), Some("Nacht"));
    }

    #[test]
    fn verify_track_pair() {
        let mut tags = MetadataTags::default();
        let frame = text_frame(b"TRCK", 0, b"7/12");
        read_frame(&frame, 3, &mut tags).unwrap();
        assert_eq!((tags.track_number, tags.tracks_total), (Some(7), Some(12)));
    }

    #[test]
    fn verify_comment_frame() {
        let mut tags = MetadataTags::default();

        let mut body = vec![0u8]; // ISO-8859-1
        body.extend_from_slice(b"eng");
        body.extend_from_slice(b"desc\0the comment");

        let mut frame = Vec::new();
        frame.extend_from_slice(b"COMM");
        frame.extend_from_slice(&(body.len() as u32).to_be_bytes());
        frame.extend_from_slice(&[0, 0]);
        frame.extend_from_slice(&body);

        read_frame(&frame, 3, &mut tags).unwrap();
        assert_eq!(tags.comment.as_deref(), Some("the comment"));
    }
}
